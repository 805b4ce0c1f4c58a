//! XSETTINGS blob decoder.
//!
//! Layout:
//!
//! ```text
//! CARD8  byte order (0 = LSB first, 1 = MSB first)
//! 3      unused
//! CARD32 serial
//! CARD32 number of settings
//! per setting:
//!   CARD8  type (0 integer, 1 string, 2 colour)
//!   1      unused
//!   CARD16 name length, name bytes, pad to 4
//!   CARD32 last-change serial
//!   value: INT32 | CARD32 length + bytes + pad to 4 | 4 x CARD16 (r, b, g, a)
//! ```
//!
//! Decoding is all-or-nothing: any truncation or unknown type fails the
//! whole blob.

use bytes::Buf;

use super::{Colour, SettingValue};

const LSB_FIRST: u8 = 0;
const MSB_FIRST: u8 = 1;

const TYPE_INTEGER: u8 = 0;
const TYPE_STRING: u8 = 1;
const TYPE_COLOUR: u8 = 2;

/// Why a settings blob was rejected.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SettingsParseError {
    #[error("truncated: needed {needed} bytes, {remaining} remaining")]
    Truncated { needed: usize, remaining: usize },
    #[error("unknown byte order marker {0}")]
    ByteOrder(u8),
    #[error("unknown setting type {0}")]
    UnknownType(u8),
}

/// A fully decoded blob.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SettingsBlob {
    pub serial: u32,
    /// Entries in blob order.
    pub entries: Vec<(String, SettingValue)>,
}

struct Reader<'a> {
    buf: &'a [u8],
    msb_first: bool,
}

impl<'a> Reader<'a> {
    fn need(&self, n: usize) -> Result<(), SettingsParseError> {
        if self.buf.remaining() < n {
            return Err(SettingsParseError::Truncated {
                needed: n,
                remaining: self.buf.remaining(),
            });
        }
        Ok(())
    }

    fn u8(&mut self) -> Result<u8, SettingsParseError> {
        self.need(1)?;
        Ok(self.buf.get_u8())
    }

    fn u16(&mut self) -> Result<u16, SettingsParseError> {
        self.need(2)?;
        Ok(if self.msb_first {
            self.buf.get_u16()
        } else {
            self.buf.get_u16_le()
        })
    }

    fn u32(&mut self) -> Result<u32, SettingsParseError> {
        self.need(4)?;
        Ok(if self.msb_first {
            self.buf.get_u32()
        } else {
            self.buf.get_u32_le()
        })
    }

    fn skip(&mut self, n: usize) -> Result<(), SettingsParseError> {
        self.need(n)?;
        self.buf.advance(n);
        Ok(())
    }

    /// `len` bytes of text followed by padding to a 4-byte boundary.
    fn padded_string(&mut self, len: usize) -> Result<String, SettingsParseError> {
        let padded = len.next_multiple_of(4);
        self.need(padded)?;
        let text = String::from_utf8_lossy(&self.buf[..len]).into_owned();
        self.buf.advance(padded);
        Ok(text)
    }
}

/// Serial number of a blob, without decoding its entries.
pub fn peek_serial(data: &[u8]) -> Result<u32, SettingsParseError> {
    let mut reader = header(data)?;
    reader.u32()
}

fn header(data: &[u8]) -> Result<Reader<'_>, SettingsParseError> {
    let mut reader = Reader {
        buf: data,
        msb_first: false,
    };
    reader.msb_first = match reader.u8()? {
        LSB_FIRST => false,
        MSB_FIRST => true,
        other => return Err(SettingsParseError::ByteOrder(other)),
    };
    reader.skip(3)?;
    Ok(reader)
}

/// Decode a complete settings blob.
pub fn parse(data: &[u8]) -> Result<SettingsBlob, SettingsParseError> {
    let mut reader = header(data)?;
    let serial = reader.u32()?;
    let count = reader.u32()?;

    let mut entries = Vec::new();
    for _ in 0..count {
        let type_ = reader.u8()?;
        reader.skip(1)?;
        let name_len = usize::from(reader.u16()?);
        let name = reader.padded_string(name_len)?;
        let _last_change_serial = reader.u32()?;

        let value = match type_ {
            TYPE_INTEGER => SettingValue::Integer(reader.u32()? as i32),
            TYPE_STRING => {
                let len = reader.u32()? as usize;
                SettingValue::String(reader.padded_string(len)?)
            }
            TYPE_COLOUR => {
                let red = reader.u16()?;
                let blue = reader.u16()?;
                let green = reader.u16()?;
                let alpha = reader.u16()?;
                SettingValue::Colour(Colour {
                    red: (red >> 8) as u8,
                    green: (green >> 8) as u8,
                    blue: (blue >> 8) as u8,
                    alpha: (alpha >> 8) as u8,
                })
            }
            other => return Err(SettingsParseError::UnknownType(other)),
        };
        entries.push((name, value));
    }

    Ok(SettingsBlob { serial, entries })
}
