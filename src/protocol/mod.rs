//! Protocol seam: every request the window system issues to the display.
//!
//! The facade never talks to x11rb directly. It goes through [`XProtocol`],
//! which keeps wire-level knowledge in one adapter ([`X11Connection`]) and
//! lets the in-memory fake stand in for a display server in tests.

mod connection;
#[cfg(test)]
pub(crate) mod fake;

use std::os::fd::RawFd;
use std::time::Duration;

use x11rb::errors::{ConnectError, ConnectionError, ReplyError, ReplyOrIdError};

pub use connection::X11Connection;

pub type Atom = u32;
pub type Window = u32;
pub type Cursor = u32;
pub type Pixmap = u32;
pub type Colormap = u32;
pub type Timestamp = u32;

/// The protocol's "no resource" value (`None` in Xlib terms).
pub const NONE: u32 = 0;
/// `CurrentTime` for requests carrying a timestamp.
pub const CURRENT_TIME: Timestamp = 0;
/// `AnyPropertyType` for property fetches.
pub const ANY_PROPERTY_TYPE: Atom = 0;

/// Predefined atoms from the core protocol.
pub mod predefined {
    use super::Atom;

    pub const PRIMARY: Atom = 1;
    pub const ATOM: Atom = 4;
    pub const CARDINAL: Atom = 6;
    pub const INTEGER: Atom = 19;
    pub const STRING: Atom = 31;
    pub const WINDOW: Atom = 33;
    pub const WM_HINTS: Atom = 35;
    pub const WM_NAME: Atom = 39;
    pub const WM_NORMAL_HINTS: Atom = 40;
    pub const WM_SIZE_HINTS: Atom = 41;
}

/// Core event mask bits used by this crate.
pub mod event_mask {
    pub const KEY_PRESS: u32 = 1 << 0;
    pub const KEY_RELEASE: u32 = 1 << 1;
    pub const BUTTON_PRESS: u32 = 1 << 2;
    pub const BUTTON_RELEASE: u32 = 1 << 3;
    pub const ENTER_WINDOW: u32 = 1 << 4;
    pub const LEAVE_WINDOW: u32 = 1 << 5;
    pub const POINTER_MOTION: u32 = 1 << 6;
    pub const KEYMAP_STATE: u32 = 1 << 14;
    pub const EXPOSURE: u32 = 1 << 15;
    pub const STRUCTURE_NOTIFY: u32 = 1 << 17;
    pub const SUBSTRUCTURE_NOTIFY: u32 = 1 << 19;
    pub const SUBSTRUCTURE_REDIRECT: u32 = 1 << 20;
    pub const FOCUS_CHANGE: u32 = 1 << 21;
    pub const PROPERTY_CHANGE: u32 = 1 << 22;
}

/// Errors surfaced by the protocol seam and the facade.
#[derive(Debug, thiserror::Error)]
pub enum XError {
    /// Display unreachable or setup rejected.
    #[error("X11 connect failed: {0}")]
    Connect(#[from] ConnectError),

    /// The connection broke while sending or receiving.
    #[error("X11 connection: {0}")]
    Connection(#[from] ConnectionError),

    /// The server answered a request with an error.
    #[error("X11 reply: {0}")]
    Reply(#[from] ReplyError),

    /// Resource id allocation or reply failure.
    #[error("X11 request: {0}")]
    ReplyOrId(#[from] ReplyOrIdError),

    /// A required protocol extension is not present on the server.
    #[error("missing extension: {0}")]
    MissingExtension(&'static str),

    /// The window does not exist (destroyed or never created).
    #[error("bad window: 0x{0:x}")]
    BadWindow(Window),

    /// The connection lock was poisoned by a panicking holder.
    #[error("display lock poisoned")]
    LockPoisoned,

    /// The window system runs without a display.
    #[error("X11 display unavailable")]
    Unavailable,

    /// A second display context was requested while one is alive.
    #[error("an X11 display context is already open")]
    AlreadyOpen,
}

/// Optional protocol extensions the core can use.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Extension {
    Shm,
    XInput,
    RandR,
}

/// A visual advertised by the screen.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VisualInfo {
    pub id: u32,
    pub depth: u8,
    pub true_colour: bool,
    pub red_mask: u32,
    pub green_mask: u32,
    pub blue_mask: u32,
}

/// Static description of the default screen.
#[derive(Debug, Clone)]
pub struct ScreenInfo {
    pub screen_num: usize,
    pub root: Window,
    pub width: u16,
    pub height: u16,
    pub width_mm: u16,
    pub height_mm: u16,
    pub root_depth: u8,
    pub root_visual: u32,
    pub default_colormap: u32,
    pub visuals: Vec<VisualInfo>,
}

/// A property value as returned by `GetProperty`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawProperty {
    /// Actual type (`NONE` when the property does not exist).
    pub type_: Atom,
    /// Element size in bits: 0 (absent), 8, 16 or 32.
    pub format: u8,
    /// Bytes still on the server past the requested range.
    pub bytes_after: u32,
    /// Raw value bytes, native byte order for 16/32-bit formats.
    pub value: Vec<u8>,
}

/// Parameters for `CreateWindow`.
#[derive(Debug, Clone)]
pub struct NewWindow {
    pub parent: Window,
    pub depth: u8,
    pub visual: u32,
    pub colormap: u32,
    pub x: i16,
    pub y: i16,
    pub width: u16,
    pub height: u16,
    pub input_only: bool,
    pub override_redirect: bool,
    pub event_mask: u32,
}

/// Stacking requests for `ConfigureWindow`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stacking {
    Above,
    Below(Window),
}

/// Subset of `ConfigureWindow` values; `None` leaves the field alone.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WindowChanges {
    pub x: Option<i32>,
    pub y: Option<i32>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub stacking: Option<Stacking>,
}

/// Relevant parts of `GetWindowAttributes`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowAttributes {
    pub viewable: bool,
    pub override_redirect: bool,
}

/// Window geometry relative to its parent.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Geometry {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
    pub border_width: u32,
}

/// Result of `QueryTree`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TreeInfo {
    pub root: Window,
    pub parent: Window,
    /// Children in bottom-to-top stacking order.
    pub children: Vec<Window>,
}

/// Result of `QueryPointer`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PointerInfo {
    pub root_x: i32,
    pub root_y: i32,
    pub child: Window,
    pub win_x: i32,
    pub win_y: i32,
    pub mask: u16,
}

/// A 32-bit format client message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClientMessage {
    pub window: Window,
    pub type_: Atom,
    pub data: [u32; 5],
}

/// A `SelectionNotify` event, sent or received.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SelectionNotify {
    pub time: Timestamp,
    pub requestor: Window,
    pub selection: Atom,
    pub target: Atom,
    /// `NONE` when the conversion was refused.
    pub property: Atom,
}

/// A two-colour cursor built from 1-bit source and mask bitmaps.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CursorBitmap {
    pub width: u16,
    pub height: u16,
    pub hotspot_x: u16,
    pub hotspot_y: u16,
    /// LSB-first bit rows, each padded to 32 bits.
    pub source: Vec<u8>,
    pub mask: Vec<u8>,
}

/// An image upload from an attached shared-memory segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShmBlit {
    pub shmseg: u32,
    pub offset: u32,
    pub depth: u8,
    pub total_width: u16,
    pub total_height: u16,
    pub src_x: u16,
    pub src_y: u16,
    pub dst_x: i16,
    pub dst_y: i16,
    pub width: u16,
    pub height: u16,
}

/// Core modifier map: 8 rows of `keycodes_per_modifier` keycodes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ModifierMapping {
    pub keycodes_per_modifier: usize,
    pub keycodes: Vec<u8>,
}

/// Core keyboard map from `min_keycode` upwards.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KeyboardMapping {
    pub min_keycode: u8,
    pub keysyms_per_keycode: usize,
    pub keysyms: Vec<u32>,
}

/// One physical monitor, in root window coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MonitorInfo {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
    pub width_mm: u32,
    pub height_mm: u32,
    pub primary: bool,
}

/// Requests and replies the window system needs from a display connection.
///
/// All methods take `&self`; callers serialise access through
/// [`crate::lock::ConnectionLock`].
pub trait XProtocol: Send {
    fn screen(&self) -> &ScreenInfo;
    fn has_extension(&self, ext: Extension) -> bool;
    fn flush(&self) -> Result<(), XError>;

    fn intern_atom(&self, name: &str, only_if_exists: bool) -> Result<Atom, XError>;
    fn atom_name(&self, atom: Atom) -> Result<String, XError>;

    fn get_property(
        &self,
        window: Window,
        property: Atom,
        type_: Atom,
        long_offset: u32,
        long_length: u32,
        delete: bool,
    ) -> Result<RawProperty, XError>;
    /// Replace a property. `data.len()` must be a multiple of `format / 8`.
    fn change_property(
        &self,
        window: Window,
        property: Atom,
        type_: Atom,
        format: u8,
        data: &[u8],
    ) -> Result<(), XError>;
    fn delete_property(&self, window: Window, property: Atom) -> Result<(), XError>;

    fn create_colormap(&self, visual: u32) -> Result<Colormap, XError>;
    fn free_colormap(&self, colormap: Colormap) -> Result<(), XError>;
    fn create_window(&self, params: &NewWindow) -> Result<Window, XError>;
    fn destroy_window(&self, window: Window) -> Result<(), XError>;
    fn map_window(&self, window: Window) -> Result<(), XError>;
    fn unmap_window(&self, window: Window) -> Result<(), XError>;
    fn configure_window(&self, window: Window, changes: &WindowChanges) -> Result<(), XError>;
    fn select_input(&self, window: Window, event_mask: u32) -> Result<(), XError>;
    fn window_attributes(&self, window: Window) -> Result<WindowAttributes, XError>;
    fn geometry(&self, window: Window) -> Result<Geometry, XError>;
    fn query_tree(&self, window: Window) -> Result<TreeInfo, XError>;
    /// Returns `(dst_x, dst_y, child)`.
    fn translate_coordinates(
        &self,
        src: Window,
        dst: Window,
        x: i32,
        y: i32,
    ) -> Result<(i32, i32, Window), XError>;

    fn query_pointer(&self, window: Window) -> Result<PointerInfo, XError>;
    fn warp_pointer(&self, dst: Window, x: i32, y: i32) -> Result<(), XError>;
    fn set_input_focus(&self, window: Window, time: Timestamp) -> Result<(), XError>;
    fn input_focus(&self) -> Result<Window, XError>;

    fn send_client_message(
        &self,
        destination: Window,
        event_mask: u32,
        message: &ClientMessage,
    ) -> Result<(), XError>;
    fn send_selection_notify(&self, notify: &SelectionNotify) -> Result<(), XError>;
    fn set_selection_owner(
        &self,
        selection: Atom,
        owner: Window,
        time: Timestamp,
    ) -> Result<(), XError>;
    fn selection_owner(&self, selection: Atom) -> Result<Window, XError>;
    fn convert_selection(
        &self,
        requestor: Window,
        selection: Atom,
        target: Atom,
        property: Atom,
        time: Timestamp,
    ) -> Result<(), XError>;
    /// Wait at most `timeout` for a `SelectionNotify` addressed to
    /// `requestor`. Other events read meanwhile are kept for `poll_event`.
    fn wait_for_selection_notify(
        &self,
        requestor: Window,
        timeout: Duration,
    ) -> Result<Option<SelectionNotify>, XError>;

    fn create_font_cursor(&self, glyph: u16) -> Result<Cursor, XError>;
    fn create_bitmap_cursor(&self, bitmap: &CursorBitmap) -> Result<Cursor, XError>;
    fn free_cursor(&self, cursor: Cursor) -> Result<(), XError>;
    fn define_cursor(&self, window: Window, cursor: Cursor) -> Result<(), XError>;

    /// Create a pixmap and upload `data` (ZPixmap, 32 bits per pixel).
    fn create_pixmap(
        &self,
        depth: u8,
        width: u16,
        height: u16,
        data: &[u8],
    ) -> Result<Pixmap, XError>;
    fn free_pixmap(&self, pixmap: Pixmap) -> Result<(), XError>;
    #[allow(clippy::too_many_arguments)]
    fn put_image(
        &self,
        window: Window,
        depth: u8,
        x: i16,
        y: i16,
        width: u16,
        height: u16,
        data: &[u8],
    ) -> Result<(), XError>;
    /// Upload from shared memory, asking for a completion event.
    fn shm_put_image(&self, window: Window, blit: &ShmBlit) -> Result<(), XError>;

    fn modifier_mapping(&self) -> Result<ModifierMapping, XError>;
    fn keyboard_mapping(&self) -> Result<KeyboardMapping, XError>;
    fn pointer_mapping(&self) -> Result<Vec<u8>, XError>;
    fn query_keymap(&self) -> Result<[u8; 32], XError>;

    fn set_screen_saver(&self, enabled: bool) -> Result<(), XError>;
    fn select_touch_events(&self, window: Window) -> Result<(), XError>;
    fn monitors(&self) -> Result<Vec<MonitorInfo>, XError>;

    /// Socket to poll for readiness; `None` when there is nothing to poll.
    fn raw_fd(&self) -> Option<RawFd> {
        None
    }
    fn poll_event(&self) -> Result<Option<x11rb::protocol::Event>, XError>;
}
