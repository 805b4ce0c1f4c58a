//! Mouse cursors and the screen saver.

use crate::protocol::{Cursor, CursorBitmap, NONE, Window, XProtocol};

use super::WindowSystem;

/// Built-in cursor shapes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StandardCursor {
    /// Inherit the parent's cursor.
    Parent,
    /// Invisible.
    NoCursor,
    Normal,
    Wait,
    IBeam,
    Crosshair,
    PointingHand,
    DraggingHand,
    LeftRightResize,
    UpDownResize,
    UpDownLeftRightResize,
    TopEdgeResize,
    BottomEdgeResize,
    LeftEdgeResize,
    RightEdgeResize,
    TopLeftCornerResize,
    TopRightCornerResize,
    BottomLeftCornerResize,
    BottomRightCornerResize,
    Copying,
}

impl StandardCursor {
    /// Glyph in the core cursor font.
    fn glyph(self) -> Option<u16> {
        use StandardCursor::*;
        Some(match self {
            Parent | NoCursor => return None,
            Normal => 68,
            Wait => 150,
            IBeam => 152,
            Crosshair => 34,
            PointingHand => 60,
            DraggingHand => 52,
            LeftRightResize => 108,
            UpDownResize => 116,
            UpDownLeftRightResize => 52,
            TopEdgeResize => 138,
            BottomEdgeResize => 16,
            LeftEdgeResize => 70,
            RightEdgeResize => 96,
            TopLeftCornerResize => 134,
            TopRightCornerResize => 136,
            BottomLeftCornerResize => 12,
            BottomRightCornerResize => 14,
            Copying => 90,
        })
    }
}

/// Bytes per row of a 1-bit bitmap padded to 32 bits.
fn stride(width: u16) -> usize {
    usize::from(width).div_ceil(32) * 4
}

/// Two-colour approximation of an ARGB image: opaque-enough pixels are
/// shown, dark ones in the foreground colour.
fn bitmap_from_argb(
    width: u16,
    height: u16,
    argb: &[u32],
    hotspot_x: u16,
    hotspot_y: u16,
) -> CursorBitmap {
    let row = stride(width);
    let mut source = vec![0u8; row * usize::from(height)];
    let mut mask = vec![0u8; row * usize::from(height)];
    for y in 0..usize::from(height) {
        for x in 0..usize::from(width) {
            let pixel = argb.get(y * usize::from(width) + x).copied().unwrap_or(0);
            let alpha = pixel >> 24;
            let [r, g, b] = [(pixel >> 16) & 0xff, (pixel >> 8) & 0xff, pixel & 0xff];
            let byte = y * row + x / 8;
            let bit = 1u8 << (x % 8);
            if alpha >= 128 {
                mask[byte] |= bit;
                if (r * 3 + g * 6 + b) / 10 < 128 {
                    source[byte] |= bit;
                }
            }
        }
    }
    CursorBitmap {
        width,
        height,
        hotspot_x: hotspot_x.min(width.saturating_sub(1)),
        hotspot_y: hotspot_y.min(height.saturating_sub(1)),
        source,
        mask,
    }
}

impl<C: XProtocol> WindowSystem<C> {
    /// Server cursor for `shape`. [`StandardCursor::Parent`] is `NONE`.
    pub fn create_standard_cursor(&self, shape: StandardCursor) -> Cursor {
        if shape == StandardCursor::Parent {
            return NONE;
        }
        self.with_conn("create_standard_cursor", |_, conn| match shape.glyph() {
            Some(glyph) => conn.create_font_cursor(glyph),
            None => conn.create_bitmap_cursor(&CursorBitmap {
                width: 1,
                height: 1,
                hotspot_x: 0,
                hotspot_y: 0,
                source: vec![0; 4],
                mask: vec![0; 4],
            }),
        })
        .unwrap_or(NONE)
    }

    /// Cursor from `width * height` ARGB pixels.
    pub fn create_custom_mouse_cursor(
        &self,
        width: u16,
        height: u16,
        argb: &[u32],
        hotspot_x: u16,
        hotspot_y: u16,
    ) -> Cursor {
        if width == 0 || height == 0 {
            return NONE;
        }
        let bitmap = bitmap_from_argb(width, height, argb, hotspot_x, hotspot_y);
        self.with_conn("create_custom_mouse_cursor", |_, conn| {
            conn.create_bitmap_cursor(&bitmap)
        })
        .unwrap_or(NONE)
    }

    pub fn delete_mouse_cursor(&self, cursor: Cursor) {
        if cursor == NONE {
            return;
        }
        self.with_conn("delete_mouse_cursor", |_, conn| conn.free_cursor(cursor));
    }

    pub fn show_cursor(&self, window: Window, cursor: Cursor) {
        self.with_conn("show_cursor", |_, conn| {
            conn.define_cursor(window, cursor)?;
            conn.flush()
        });
    }

    pub fn set_screen_saver_enabled(&self, enabled: bool) {
        self.with_conn("set_screen_saver_enabled", |_, conn| {
            conn.set_screen_saver(enabled)?;
            conn.flush()
        });
    }
}

#[cfg(test)]
mod tests {
    use super::super::testing::{system, window};
    use super::*;
    use crate::protocol::fake::Sent;

    #[test]
    fn argb_maps_to_source_and_mask() {
        // Opaque black, opaque white, transparent, half-opaque dark.
        let bitmap = bitmap_from_argb(4, 1, &[0xff00_0000, 0xffff_ffff, 0x0000_0000, 0x8010_1010], 9, 9);
        assert_eq!(bitmap.mask[0], 0b1011);
        assert_eq!(bitmap.source[0], 0b1001);
        assert_eq!(bitmap.mask.len(), 4);
        assert_eq!((bitmap.hotspot_x, bitmap.hotspot_y), (3, 0));
    }

    #[test]
    fn rows_are_padded() {
        assert_eq!(stride(1), 4);
        assert_eq!(stride(32), 4);
        assert_eq!(stride(33), 8);
        let bitmap = bitmap_from_argb(33, 2, &[0xff00_0000; 66], 0, 0);
        assert_eq!(bitmap.mask.len(), 16);
        assert_eq!(bitmap.mask[4], 1);
        assert_eq!(bitmap.mask[5], 0);
        assert_eq!(bitmap.mask[8], 0xff);
        assert_eq!(bitmap.mask[12], 1);
    }

    #[test]
    fn standard_cursor_lifecycle() {
        let (server, system) = system();
        let (w, _peer) = window(&system);

        assert_eq!(system.create_standard_cursor(StandardCursor::Parent), NONE);
        let wait = system.create_standard_cursor(StandardCursor::Wait);
        let blank = system.create_standard_cursor(StandardCursor::NoCursor);
        assert_ne!(wait, NONE);
        assert_ne!(blank, NONE);

        system.show_cursor(w, wait);
        assert_eq!(server.state().windows[&w].cursor, wait);

        system.delete_mouse_cursor(wait);
        system.delete_mouse_cursor(blank);
        assert!(server.state().cursors.is_empty());
    }

    #[test]
    fn empty_custom_cursor_is_none() {
        let (_server, system) = system();
        assert_eq!(system.create_custom_mouse_cursor(0, 4, &[], 0, 0), NONE);
        assert_ne!(system.create_custom_mouse_cursor(1, 1, &[0xff00_0000], 0, 0), NONE);
    }

    #[test]
    fn screen_saver_toggle() {
        let (server, system) = system();
        system.set_screen_saver_enabled(false);
        assert_eq!(server.take_sent(), vec![Sent::ScreenSaver(false)]);
    }
}
