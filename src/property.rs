//! Property reader: fetches a window property into an owned value.
//!
//! The returned [`XProperty`] owns its buffer; there is no release step for
//! callers to forget.

use crate::protocol::{ANY_PROPERTY_TYPE, Atom, NONE, Window, XProtocol};

/// Longs asked for per `GetProperty` by [`XProperty::fetch_all`].
pub const FETCH_CHUNK_LONGS: u32 = 0x4000;

/// A fetched window property.
///
/// `success` is false when the window is gone, the property is absent or
/// its type does not match the requested one. In that case `data` is
/// empty and the other fields describe whatever the server reported.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct XProperty {
    pub success: bool,
    pub actual_type: Atom,
    /// 8, 16 or 32; -1 when nothing was read.
    pub actual_format: i32,
    pub num_items: usize,
    pub bytes_left: u32,
    pub data: Vec<u8>,
}

impl XProperty {
    /// Read `property` from `window`.
    ///
    /// `long_offset` and `long_length` are in 32-bit units as on the wire.
    /// `requested_type` of [`ANY_PROPERTY_TYPE`] accepts any type.
    pub fn fetch(
        conn: &impl XProtocol,
        window: Window,
        property: Atom,
        long_offset: u32,
        long_length: u32,
        should_delete: bool,
        requested_type: Atom,
    ) -> Self {
        let failed = |actual_type: Atom, bytes_left: u32| Self {
            success: false,
            actual_type,
            actual_format: -1,
            num_items: 0,
            bytes_left,
            data: Vec::new(),
        };

        if window == NONE || property == NONE {
            return failed(NONE, 0);
        }

        let reply = match conn.get_property(
            window,
            property,
            requested_type,
            long_offset,
            long_length,
            should_delete,
        ) {
            Ok(reply) => reply,
            Err(e) => {
                tracing::debug!(
                    window = format_args!("0x{window:x}"),
                    property,
                    error = %e,
                    "GetProperty failed"
                );
                return failed(NONE, 0);
            }
        };

        let type_matches = requested_type == ANY_PROPERTY_TYPE || reply.type_ == requested_type;
        if reply.type_ == NONE || reply.format == 0 || !type_matches {
            return failed(reply.type_, reply.bytes_after);
        }

        let unit = usize::from(reply.format / 8).max(1);
        Self {
            success: true,
            actual_type: reply.type_,
            actual_format: i32::from(reply.format),
            num_items: reply.value.len() / unit,
            bytes_left: reply.bytes_after,
            data: reply.value,
        }
    }

    /// Read the whole property regardless of size, in requests of
    /// [`FETCH_CHUNK_LONGS`] until the server reports nothing left.
    pub fn fetch_all(
        conn: &impl XProtocol,
        window: Window,
        property: Atom,
        should_delete: bool,
        requested_type: Atom,
    ) -> Self {
        let mut whole = Self::fetch(
            conn,
            window,
            property,
            0,
            FETCH_CHUNK_LONGS,
            should_delete,
            requested_type,
        );
        while whole.success && whole.bytes_left > 0 {
            let offset = (whole.data.len() / 4) as u32;
            let next = Self::fetch(
                conn,
                window,
                property,
                offset,
                FETCH_CHUNK_LONGS,
                should_delete,
                requested_type,
            );
            // Changed underneath us, or no progress.
            if !next.success || next.actual_format != whole.actual_format || next.data.is_empty() {
                break;
            }
            whole.data.extend_from_slice(&next.data);
            whole.bytes_left = next.bytes_left;
        }
        let unit = usize::try_from(whole.actual_format / 8).unwrap_or(1).max(1);
        whole.num_items = whole.data.len() / unit;
        whole
    }

    /// Elements of a 32-bit property, in native byte order.
    pub fn as_u32s(&self) -> Vec<u32> {
        if !self.success || self.actual_format != 32 {
            return Vec::new();
        }
        self.data
            .chunks_exact(4)
            .map(|c| u32::from_ne_bytes([c[0], c[1], c[2], c[3]]))
            .collect()
    }

    /// First element of a 32-bit property.
    pub fn first_u32(&self) -> Option<u32> {
        self.as_u32s().first().copied()
    }

    /// Contents of an 8-bit property as (lossy) UTF-8.
    pub fn as_string(&self) -> Option<String> {
        if !self.success || self.actual_format != 8 {
            return None;
        }
        Some(String::from_utf8_lossy(&self.data).into_owned())
    }
}

/// Serialise 32-bit values for a format-32 `ChangeProperty`.
pub fn u32_bytes(values: &[u32]) -> Vec<u8> {
    values.iter().flat_map(|v| v.to_ne_bytes()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::fake::{FakeServer, ROOT};
    use crate::protocol::predefined;

    #[test]
    fn reads_cardinal_property() {
        let server = FakeServer::new();
        let prop = server.atom("_TEST_CARDINALS");
        server.set_property(ROOT, prop, predefined::CARDINAL, 32, &u32_bytes(&[1, 2, 3, 4]));

        let p = XProperty::fetch_all(&server, ROOT, prop, false, predefined::CARDINAL);
        assert!(p.success);
        assert_eq!(p.actual_format, 32);
        assert_eq!(p.num_items, 4);
        assert_eq!(p.bytes_left, 0);
        assert_eq!(p.as_u32s(), vec![1, 2, 3, 4]);
    }

    #[test]
    fn partial_read_reports_bytes_left() {
        let server = FakeServer::new();
        let prop = server.atom("_TEST_PARTIAL");
        server.set_property(ROOT, prop, predefined::CARDINAL, 32, &u32_bytes(&[1, 2, 3, 4]));

        let p = XProperty::fetch(&server, ROOT, prop, 1, 2, false, predefined::CARDINAL);
        assert!(p.success);
        assert_eq!(p.as_u32s(), vec![2, 3]);
        assert_eq!(p.bytes_left, 4);
    }

    #[test]
    fn absent_property_fails() {
        let server = FakeServer::new();
        let prop = server.atom("_TEST_ABSENT");
        let p = XProperty::fetch_all(&server, ROOT, prop, false, ANY_PROPERTY_TYPE);
        assert!(!p.success);
        assert!(p.data.is_empty());
        assert_eq!(p.actual_format, -1);
    }

    #[test]
    fn type_mismatch_fails() {
        let server = FakeServer::new();
        let prop = server.atom("_TEST_STRING");
        server.set_property(ROOT, prop, predefined::STRING, 8, b"hello");
        let p = XProperty::fetch_all(&server, ROOT, prop, false, predefined::CARDINAL);
        assert!(!p.success);
        assert_eq!(p.actual_type, predefined::STRING);
        assert!(p.data.is_empty());
    }

    #[test]
    fn missing_window_fails() {
        let server = FakeServer::new();
        let prop = server.atom("_TEST_ANY");
        let p = XProperty::fetch_all(&server, 0xdead, prop, false, ANY_PROPERTY_TYPE);
        assert!(!p.success);
    }

    #[test]
    fn delete_after_read_removes_property() {
        let server = FakeServer::new();
        let prop = server.atom("_TEST_DELETE");
        server.set_property(ROOT, prop, predefined::STRING, 8, b"once");
        let p = XProperty::fetch_all(&server, ROOT, prop, true, ANY_PROPERTY_TYPE);
        assert_eq!(p.as_string().as_deref(), Some("once"));
        assert!(server.property(ROOT, prop).is_none());
    }

    #[test]
    fn long_property_is_read_in_chunks() {
        let server = FakeServer::new();
        let prop = server.atom("_TEST_LONG");
        let body: Vec<u8> = (0..FETCH_CHUNK_LONGS as usize * 4 * 2 + 10).map(|i| i as u8).collect();
        server.set_property(ROOT, prop, predefined::STRING, 8, &body);

        let first = XProperty::fetch(&server, ROOT, prop, 0, FETCH_CHUNK_LONGS, false, ANY_PROPERTY_TYPE);
        assert!(first.bytes_left > 0);

        let p = XProperty::fetch_all(&server, ROOT, prop, true, ANY_PROPERTY_TYPE);
        assert!(p.success);
        assert_eq!(p.bytes_left, 0);
        assert_eq!(p.num_items, body.len());
        assert_eq!(p.data, body);
        assert!(server.property(ROOT, prop).is_none());
    }
}
