//! Keyboard and pointer tables: keycode/keysym lookup, modifier bits and
//! the pointer button remap, rebuilt whenever the server reports a mapping
//! change.

use crate::event::MappingKind;
use crate::geometry::Point;
use crate::peer::{ModifierKeys, MouseButton};
use crate::protocol::{KeyboardMapping, ModifierMapping, XProtocol};

use super::WindowSystem;

const SHIFT_MASK: u16 = 1 << 0;
const CONTROL_MASK: u16 = 1 << 2;
const BUTTON1_MASK: u16 = 1 << 8;
const BUTTON2_MASK: u16 = 1 << 9;
const BUTTON3_MASK: u16 = 1 << 10;

/// Mod2, the usual NumLock bit.
const NUMLOCK_FALLBACK: u16 = 1 << 4;
/// Mod1, the usual Alt bit.
const ALT_FALLBACK: u16 = 1 << 3;
/// Mod4, the usual Super bit.
const SUPER_FALLBACK: u16 = 1 << 6;

const XK_NUM_LOCK: u32 = 0xff7f;
const XK_META_L: u32 = 0xffe7;
const XK_META_R: u32 = 0xffe8;
const XK_ALT_L: u32 = 0xffe9;
const XK_ALT_R: u32 = 0xffea;
const XK_SUPER_L: u32 = 0xffeb;
const XK_SUPER_R: u32 = 0xffec;

/// Live keyboard tables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct KeyboardState {
    mapping: KeyboardMapping,
    pub numlock_mask: u16,
    pub alt_mask: u16,
    pub super_mask: u16,
}

impl Default for KeyboardState {
    fn default() -> Self {
        Self {
            mapping: KeyboardMapping::default(),
            numlock_mask: NUMLOCK_FALLBACK,
            alt_mask: ALT_FALLBACK,
            super_mask: SUPER_FALLBACK,
        }
    }
}

impl KeyboardState {
    /// Query the server's keyboard and modifier maps. Falls back to the
    /// common Mod1/Mod2/Mod4 layout when either query fails.
    pub fn load(conn: &impl XProtocol) -> Self {
        let mapping = conn.keyboard_mapping().unwrap_or_else(|e| {
            tracing::debug!(error = %e, "GetKeyboardMapping failed");
            KeyboardMapping::default()
        });
        let modifiers = conn.modifier_mapping().unwrap_or_else(|e| {
            tracing::debug!(error = %e, "GetModifierMapping failed");
            ModifierMapping::default()
        });
        Self::from_maps(mapping, &modifiers)
    }

    pub fn from_maps(mapping: KeyboardMapping, modifiers: &ModifierMapping) -> Self {
        let mut state = Self {
            mapping,
            ..Self::default()
        };
        state.numlock_mask = state
            .modifier_mask_for(modifiers, &[XK_NUM_LOCK])
            .unwrap_or(NUMLOCK_FALLBACK);
        state.alt_mask = state
            .modifier_mask_for(modifiers, &[XK_ALT_L, XK_ALT_R, XK_META_L, XK_META_R])
            .unwrap_or(ALT_FALLBACK);
        state.super_mask = state
            .modifier_mask_for(modifiers, &[XK_SUPER_L, XK_SUPER_R])
            .unwrap_or(SUPER_FALLBACK);
        tracing::debug!(
            numlock = format_args!("0x{:04x}", state.numlock_mask),
            alt = format_args!("0x{:04x}", state.alt_mask),
            super_ = format_args!("0x{:04x}", state.super_mask),
            "modifier mapping"
        );
        state
    }

    /// Keycodes producing any of `keysyms`.
    pub fn keycodes_for(&self, keysyms: &[u32]) -> Vec<u8> {
        let per = self.mapping.keysyms_per_keycode;
        if per == 0 {
            return Vec::new();
        }
        self.mapping
            .keysyms
            .chunks(per)
            .enumerate()
            .filter(|(_, syms)| syms.iter().any(|s| keysyms.contains(s)))
            .filter_map(|(i, _)| u8::try_from(usize::from(self.mapping.min_keycode) + i).ok())
            .collect()
    }

    /// Keysym at `index` (0 unshifted, 1 shifted) for `keycode`, 0 if none.
    pub fn keysym(&self, keycode: u8, index: usize) -> u32 {
        let per = self.mapping.keysyms_per_keycode;
        if per == 0 || keycode < self.mapping.min_keycode || index >= per {
            return 0;
        }
        let row = usize::from(keycode - self.mapping.min_keycode);
        self.mapping.keysyms.get(row * per + index).copied().unwrap_or(0)
    }

    /// Modifier bit whose row in the modifier map holds one of `keysyms`.
    ///
    /// The map has 8 rows of `keycodes_per_modifier` keycodes: Shift, Lock,
    /// Control, Mod1..Mod5. Row `i` corresponds to mask bit `1 << i`.
    fn modifier_mask_for(&self, modifiers: &ModifierMapping, keysyms: &[u32]) -> Option<u16> {
        let per = modifiers.keycodes_per_modifier;
        if per == 0 {
            return None;
        }
        let keycodes = self.keycodes_for(keysyms);
        modifiers
            .keycodes
            .chunks(per)
            .take(8)
            .position(|row| row.iter().any(|&k| k != 0 && keycodes.contains(&k)))
            .map(|row| 1u16 << row)
    }

    /// Toolkit modifiers for a core state mask.
    pub fn modifiers_from_state(&self, state: u16) -> ModifierKeys {
        let mut flags = 0;
        if state & SHIFT_MASK != 0 {
            flags |= ModifierKeys::SHIFT;
        }
        if state & CONTROL_MASK != 0 {
            flags |= ModifierKeys::CTRL;
        }
        if state & self.alt_mask != 0 {
            flags |= ModifierKeys::ALT;
        }
        if state & self.super_mask != 0 {
            flags |= ModifierKeys::COMMAND;
        }
        if state & BUTTON1_MASK != 0 {
            flags |= ModifierKeys::LEFT_BUTTON;
        }
        if state & BUTTON2_MASK != 0 {
            flags |= ModifierKeys::MIDDLE_BUTTON;
        }
        if state & BUTTON3_MASK != 0 {
            flags |= ModifierKeys::RIGHT_BUTTON;
        }
        ModifierKeys::new(flags)
    }
}

/// Logical meaning of core buttons 1-5.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct PointerMap([Option<MouseButton>; 5]);

impl Default for PointerMap {
    fn default() -> Self {
        Self::for_button_count(5)
    }
}

impl PointerMap {
    pub fn load(conn: &impl XProtocol) -> Self {
        match conn.pointer_mapping() {
            Ok(map) => Self::for_button_count(map.len()),
            Err(e) => {
                tracing::debug!(error = %e, "GetPointerMapping failed");
                Self::default()
            }
        }
    }

    pub fn for_button_count(buttons: usize) -> Self {
        use MouseButton::*;
        let mut map = [None; 5];
        match buttons {
            2 => {
                map[0] = Some(Left);
                map[1] = Some(Right);
            }
            n if n >= 3 => {
                map[0] = Some(Left);
                map[1] = Some(Middle);
                map[2] = Some(Right);
                if n >= 5 {
                    map[3] = Some(WheelUp);
                    map[4] = Some(WheelDown);
                }
            }
            _ => {}
        }
        Self(map)
    }

    /// Logical button for a core button number. Buttons past 5 pass
    /// through as [`MouseButton::Other`].
    pub fn button(&self, detail: u8) -> Option<MouseButton> {
        match detail {
            0 => None,
            1..=5 => self.0[usize::from(detail - 1)],
            n => Some(MouseButton::Other(n)),
        }
    }
}

impl<C: XProtocol> WindowSystem<C> {
    /// Whether a key producing `keysym` is held right now.
    pub fn is_key_currently_down(&self, keysym: u32) -> bool {
        let keycodes = self.state().keyboard.keycodes_for(&[keysym]);
        if keycodes.is_empty() {
            return false;
        }
        self.with_conn("is_key_currently_down", |_, conn| {
            let keymap = conn.query_keymap()?;
            Ok(keycodes
                .iter()
                .any(|&k| keymap[usize::from(k / 8)] & (1 << (k % 8)) != 0))
        })
        .unwrap_or(false)
    }

    /// Modifier and button state queried from the server.
    pub fn get_native_realtime_modifiers(&self) -> ModifierKeys {
        let Some(mask) = self.with_conn("get_native_realtime_modifiers", |d, conn| {
            Ok(conn.query_pointer(d.screen.root)?.mask)
        }) else {
            return ModifierKeys::default();
        };
        let mut state = self.state();
        let modifiers = state.keyboard.modifiers_from_state(mask);
        state.modifiers = modifiers;
        modifiers
    }

    /// Modifiers as last seen on an input event.
    pub fn current_modifiers(&self) -> ModifierKeys {
        self.state().modifiers
    }

    pub fn get_current_mouse_position(&self) -> Point {
        self.with_conn("get_current_mouse_position", |d, conn| {
            let p = conn.query_pointer(d.screen.root)?;
            Ok(Point::new(p.root_x, p.root_y))
        })
        .unwrap_or_default()
    }

    pub fn set_mouse_position(&self, position: Point) {
        self.with_conn("set_mouse_position", |d, conn| {
            conn.warp_pointer(d.screen.root, position.x, position.y)?;
            conn.flush()
        });
    }

    /// Rebuild the tables named by a `MappingNotify`.
    pub fn handle_mapping_notify(&self, kind: MappingKind) {
        let Some(display) = &self.display else {
            return;
        };
        let Ok(conn) = display.conn.lock() else {
            return;
        };
        match kind {
            MappingKind::Modifier | MappingKind::Keyboard => {
                let keyboard = KeyboardState::load(&*conn);
                self.state().keyboard = keyboard;
            }
            MappingKind::Pointer => {
                let pointer_map = PointerMap::load(&*conn);
                self.state().pointer_map = pointer_map;
            }
        }
    }
}
