//! Peer boundary: the toolkit object that owns a native window.
//!
//! The window system translates protocol events into the types below and
//! calls the [`Peer`] registered for the target window. Every callback has
//! a no-op default so a peer only implements what it cares about.

use crate::geometry::{Point, Rect};

/// Window-manager level style requested when a window is created.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowStyle {
    pub title_bar: bool,
    pub resizable: bool,
    pub minimise_button: bool,
    pub maximise_button: bool,
    pub close_button: bool,
    pub skip_taskbar: bool,
    /// Tooltip window type.
    pub tooltip: bool,
    /// Ask for a 32-bit visual with alpha.
    pub semi_transparent: bool,
    /// Menus and popups: override-redirect, no window manager involvement.
    pub temporary: bool,
}

impl Default for WindowStyle {
    fn default() -> Self {
        Self {
            title_bar: true,
            resizable: true,
            minimise_button: true,
            maximise_button: true,
            close_button: true,
            skip_taskbar: false,
            tooltip: false,
            semi_transparent: false,
            temporary: false,
        }
    }
}

impl WindowStyle {
    /// Undecorated override-redirect popup.
    pub fn popup() -> Self {
        Self {
            title_bar: false,
            resizable: false,
            minimise_button: false,
            maximise_button: false,
            close_button: false,
            skip_taskbar: true,
            temporary: true,
            ..Self::default()
        }
    }
}

/// Minimum and maximum client size for `WM_NORMAL_HINTS`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SizeConstraints {
    pub min: Option<(u32, u32)>,
    pub max: Option<(u32, u32)>,
}

/// Toolkit modifier and mouse-button state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct ModifierKeys(u16);

impl ModifierKeys {
    pub const SHIFT: u16 = 1 << 0;
    pub const CTRL: u16 = 1 << 1;
    pub const ALT: u16 = 1 << 2;
    pub const COMMAND: u16 = 1 << 3;
    pub const LEFT_BUTTON: u16 = 1 << 4;
    pub const RIGHT_BUTTON: u16 = 1 << 5;
    pub const MIDDLE_BUTTON: u16 = 1 << 6;

    pub const KEYS: u16 = Self::SHIFT | Self::CTRL | Self::ALT | Self::COMMAND;
    pub const BUTTONS: u16 = Self::LEFT_BUTTON | Self::RIGHT_BUTTON | Self::MIDDLE_BUTTON;

    pub const fn new(flags: u16) -> Self {
        Self(flags)
    }

    pub const fn flags(self) -> u16 {
        self.0
    }

    pub const fn contains(self, flag: u16) -> bool {
        self.0 & flag == flag
    }

    pub const fn with(self, flag: u16) -> Self {
        Self(self.0 | flag)
    }

    pub const fn without(self, flag: u16) -> Self {
        Self(self.0 & !flag)
    }

    pub const fn any_button_down(self) -> bool {
        self.0 & Self::BUTTONS != 0
    }
}

/// A core pointer button after applying the server's button remapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MouseButton {
    Left,
    Middle,
    Right,
    WheelUp,
    WheelDown,
    Other(u8),
}

impl MouseButton {
    /// The modifier flag held while this button is down.
    pub fn modifier_flag(self) -> u16 {
        match self {
            MouseButton::Left => ModifierKeys::LEFT_BUTTON,
            MouseButton::Middle => ModifierKeys::MIDDLE_BUTTON,
            MouseButton::Right => ModifierKeys::RIGHT_BUTTON,
            _ => 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyEvent {
    pub keycode: u8,
    /// Unshifted keysym for the keycode, 0 when unknown.
    pub keysym: u32,
    /// Shifted keysym when shift is held, otherwise the unshifted one.
    pub text_keysym: u32,
    pub modifiers: ModifierKeys,
    pub time: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MouseEvent {
    /// Relative to the window.
    pub position: Point,
    pub screen_position: Point,
    pub modifiers: ModifierKeys,
    pub time: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MouseAction {
    Down(MouseButton),
    Up(MouseButton),
    Move,
    Enter,
    Exit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TouchPhase {
    Begin,
    Update,
    End,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TouchEvent {
    /// Dense slot index, stable for the life of the touch.
    pub index: usize,
    /// Sub-pixel position relative to the window.
    pub x: f32,
    pub y: f32,
    pub modifiers: ModifierKeys,
    pub time: u32,
}

/// Data carried by a drag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DragPayload {
    Text(String),
    Files(Vec<String>),
}

impl DragPayload {
    pub fn is_files(&self) -> bool {
        matches!(self, DragPayload::Files(_))
    }
}

/// An inbound drag over a window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DragEvent {
    /// Relative to the window.
    pub position: Point,
    /// Whether the source offers a file list rather than text.
    pub files: bool,
    /// Only present for the drop itself.
    pub payload: Option<DragPayload>,
}

/// Where to put focus when an embedder hands it over.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FocusTarget {
    Current,
    First,
    Last,
}

/// XEmbed messages relevant to a peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmbedRequest {
    WindowActivate,
    WindowDeactivate,
    FocusIn(FocusTarget),
    FocusOut,
}

/// The toolkit side of one native window.
#[allow(unused_variables)]
pub trait Peer: Send + Sync {
    fn style(&self) -> WindowStyle {
        WindowStyle::default()
    }

    fn size_constraints(&self) -> SizeConstraints {
        SizeConstraints::default()
    }

    /// Position in screen coordinates and size changed.
    fn handle_moved_or_resized(&self, bounds: Rect) {}
    fn handle_focus_gain(&self) {}
    fn handle_focus_loss(&self) {}
    /// The user asked the window manager to close the window.
    fn handle_should_close(&self) {}
    fn handle_minimised_changed(&self, minimised: bool) {}

    /// Return true if the key was used.
    fn handle_key_down(&self, key: &KeyEvent) -> bool {
        false
    }
    fn handle_key_up(&self, key: &KeyEvent) -> bool {
        false
    }

    fn handle_mouse(&self, action: MouseAction, event: &MouseEvent) {}
    /// `delta_y` is positive for wheel-up.
    fn handle_mouse_wheel(&self, event: &MouseEvent, delta_y: f32) {}
    fn handle_touch(&self, phase: TouchPhase, touch: &TouchEvent) {}

    fn handle_paint_request(&self, area: Rect) {}

    fn handle_focus_request(&self, request: EmbedRequest) {}

    /// Return true to accept the drag at this position.
    fn handle_drag_move(&self, drag: &DragEvent) -> bool {
        false
    }
    fn handle_drag_exit(&self) {}
    /// Return true if the dropped payload was used.
    fn handle_drag_drop(&self, drag: &DragEvent) -> bool {
        false
    }

    /// Data for an outbound drag started by this peer. Consulted when the
    /// drop target asks for it; `None` falls back to the payload given
    /// when the drag started.
    fn provide_drag_payload(&self) -> Option<DragPayload> {
        None
    }

    fn is_blocked_by_modal(&self) -> bool {
        false
    }
    fn dismiss_blocking_modals(&self) {}
}
