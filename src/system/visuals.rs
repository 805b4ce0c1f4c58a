//! Visual selection for new windows.

use crate::protocol::{ScreenInfo, VisualInfo};

/// The TrueColor visuals a window can be created with, one per depth.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DisplayVisuals {
    pub visual16: Option<VisualInfo>,
    pub visual24: Option<VisualInfo>,
    pub visual32: Option<VisualInfo>,
}

impl DisplayVisuals {
    pub fn new(screen: &ScreenInfo) -> Self {
        let find = |depth: u8, masks: (u32, u32, u32)| {
            // Prefer the root visual when it qualifies.
            let mut candidates: Vec<&VisualInfo> = screen
                .visuals
                .iter()
                .filter(|v| {
                    v.depth == depth
                        && v.true_colour
                        && (v.red_mask, v.green_mask, v.blue_mask) == masks
                })
                .collect();
            candidates.sort_by_key(|v| v.id != screen.root_visual);
            candidates.first().map(|v| (*v).clone())
        };

        Self {
            visual16: find(16, (0xf800, 0x07e0, 0x001f)),
            visual24: find(24, (0xff_0000, 0xff00, 0xff)),
            visual32: find(32, (0xff_0000, 0xff00, 0xff)),
        }
    }

    pub fn is_valid(&self) -> bool {
        self.visual16.is_some() || self.visual24.is_some() || self.visual32.is_some()
    }

    /// 32-bit when alpha is wanted and available, else 24, 32, 16 in that
    /// order of preference.
    pub fn best_for_window(&self, semi_transparent: bool) -> Option<&VisualInfo> {
        if semi_transparent && let Some(v) = &self.visual32 {
            return Some(v);
        }
        self.visual24
            .as_ref()
            .or(self.visual32.as_ref())
            .or(self.visual16.as_ref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::XProtocol;
    use crate::protocol::fake::FakeServer;

    fn screen_with(depths: &[u8]) -> ScreenInfo {
        let mut screen = FakeServer::new().screen().clone();
        screen.visuals.retain(|v| depths.contains(&v.depth));
        screen
    }

    #[test]
    fn semi_transparent_prefers_32_bit() {
        let visuals = DisplayVisuals::new(&screen_with(&[16, 24, 32]));
        assert_eq!(visuals.best_for_window(true).map(|v| v.depth), Some(32));
        assert_eq!(visuals.best_for_window(false).map(|v| v.depth), Some(24));
    }

    #[test]
    fn opaque_falls_back_to_32_then_16() {
        let visuals = DisplayVisuals::new(&screen_with(&[16, 32]));
        assert_eq!(visuals.best_for_window(false).map(|v| v.depth), Some(32));
        let visuals = DisplayVisuals::new(&screen_with(&[16]));
        assert_eq!(visuals.best_for_window(true).map(|v| v.depth), Some(16));
    }

    #[test]
    fn no_true_colour_visual_is_invalid() {
        let visuals = DisplayVisuals::new(&screen_with(&[]));
        assert!(!visuals.is_valid());
        assert!(visuals.best_for_window(false).is_none());
    }
}
