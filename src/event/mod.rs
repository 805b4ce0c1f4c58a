//! Typed events: the single place that knows x11rb's event layouts.
//!
//! [`XEvent::decode`] turns a wire event into a closed set of variants
//! before any handler logic runs. Events the window system never acts on
//! decode to `None`.

mod pump;

use x11rb::protocol::Event;
use x11rb::protocol::xproto::{Mapping, NotifyDetail, NotifyMode, Property};

pub use pump::spawn_event_thread;

use crate::geometry::Rect;
use crate::protocol::{Atom, SelectionNotify, Timestamp, Window};

/// Pointer or keyboard event fields shared by key, button, motion and
/// crossing events.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InputEvent {
    pub window: Window,
    /// Keycode or button number; 0 for motion and crossing.
    pub detail: u8,
    /// Core modifier and button mask.
    pub state: u16,
    pub time: Timestamp,
    pub x: i32,
    pub y: i32,
    pub root_x: i32,
    pub root_y: i32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TouchInput {
    pub window: Window,
    /// Server-assigned touch id.
    pub touch_id: u32,
    pub x: f32,
    pub y: f32,
    /// Effective core modifier mask.
    pub state: u16,
    pub time: Timestamp,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MappingKind {
    Modifier,
    Keyboard,
    Pointer,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum XEvent {
    KeyPress(InputEvent),
    KeyRelease(InputEvent),
    ButtonPress(InputEvent),
    ButtonRelease(InputEvent),
    Motion(InputEvent),
    /// `normal` is false for crossings caused by grabs.
    Enter { input: InputEvent, normal: bool },
    Leave { input: InputEvent, normal: bool },
    FocusIn(Window),
    FocusOut(Window),
    Expose { window: Window, area: Rect, count: u16 },
    Configure {
        window: Window,
        bounds: Rect,
        above_sibling: Window,
        synthetic: bool,
    },
    Gravity { window: Window },
    Map(Window),
    Unmap(Window),
    Reparent { window: Window, parent: Window },
    Destroy(Window),
    Property { window: Window, atom: Atom, deleted: bool },
    ClientMessage {
        window: Window,
        type_: Atom,
        format: u8,
        data: [u32; 5],
    },
    MappingNotify(MappingKind),
    SelectionRequest {
        time: Timestamp,
        owner: Window,
        requestor: Window,
        selection: Atom,
        target: Atom,
        property: Atom,
    },
    SelectionNotify(SelectionNotify),
    SelectionClear { owner: Window, selection: Atom },
    ShmCompletion { drawable: Window },
    TouchBegin(TouchInput),
    TouchUpdate(TouchInput),
    TouchEnd(TouchInput),
}

/// XInput2 fixed point 16.16.
fn fp1616(v: i32) -> f32 {
    v as f32 / 65536.0
}

macro_rules! input {
    ($e:expr, $detail:expr) => {
        InputEvent {
            window: $e.event,
            detail: $detail,
            state: u16::from($e.state),
            time: $e.time,
            x: i32::from($e.event_x),
            y: i32::from($e.event_y),
            root_x: i32::from($e.root_x),
            root_y: i32::from($e.root_y),
        }
    };
}

macro_rules! touch {
    ($e:expr) => {
        TouchInput {
            window: $e.event,
            touch_id: $e.detail,
            x: fp1616($e.event_x),
            y: fp1616($e.event_y),
            state: $e.mods.effective as u16,
            time: $e.time,
        }
    };
}

impl XEvent {
    pub fn decode(event: &Event) -> Option<Self> {
        let decoded = match event {
            Event::KeyPress(e) => XEvent::KeyPress(input!(e, e.detail)),
            Event::KeyRelease(e) => XEvent::KeyRelease(input!(e, e.detail)),
            Event::ButtonPress(e) => XEvent::ButtonPress(input!(e, e.detail)),
            Event::ButtonRelease(e) => XEvent::ButtonRelease(input!(e, e.detail)),
            Event::MotionNotify(e) => XEvent::Motion(input!(e, 0)),
            Event::EnterNotify(e) => XEvent::Enter {
                input: input!(e, 0),
                normal: e.mode == NotifyMode::NORMAL,
            },
            Event::LeaveNotify(e) => XEvent::Leave {
                input: input!(e, 0),
                normal: e.mode == NotifyMode::NORMAL,
            },
            // Pointer-detail focus changes describe the pointer window, not us.
            Event::FocusIn(e) if e.detail != NotifyDetail::POINTER => XEvent::FocusIn(e.event),
            Event::FocusOut(e) if e.detail != NotifyDetail::POINTER => XEvent::FocusOut(e.event),
            Event::Expose(e) => XEvent::Expose {
                window: e.window,
                area: Rect::new(
                    i32::from(e.x),
                    i32::from(e.y),
                    i32::from(e.width),
                    i32::from(e.height),
                ),
                count: e.count,
            },
            Event::ConfigureNotify(e) => XEvent::Configure {
                window: e.window,
                bounds: Rect::new(
                    i32::from(e.x),
                    i32::from(e.y),
                    i32::from(e.width),
                    i32::from(e.height),
                ),
                above_sibling: e.above_sibling,
                synthetic: e.response_type & 0x80 != 0,
            },
            Event::GravityNotify(e) => XEvent::Gravity { window: e.window },
            Event::MapNotify(e) => XEvent::Map(e.window),
            Event::UnmapNotify(e) => XEvent::Unmap(e.window),
            Event::ReparentNotify(e) => XEvent::Reparent {
                window: e.window,
                parent: e.parent,
            },
            Event::DestroyNotify(e) => XEvent::Destroy(e.window),
            Event::PropertyNotify(e) => XEvent::Property {
                window: e.window,
                atom: e.atom,
                deleted: e.state == Property::DELETE,
            },
            Event::ClientMessage(e) => XEvent::ClientMessage {
                window: e.window,
                type_: e.type_,
                format: e.format,
                data: e.data.as_data32(),
            },
            Event::MappingNotify(e) => XEvent::MappingNotify(if e.request == Mapping::MODIFIER {
                MappingKind::Modifier
            } else if e.request == Mapping::KEYBOARD {
                MappingKind::Keyboard
            } else {
                MappingKind::Pointer
            }),
            Event::SelectionRequest(e) => XEvent::SelectionRequest {
                time: e.time,
                owner: e.owner,
                requestor: e.requestor,
                selection: e.selection,
                target: e.target,
                property: e.property,
            },
            Event::SelectionNotify(e) => XEvent::SelectionNotify(SelectionNotify {
                time: e.time,
                requestor: e.requestor,
                selection: e.selection,
                target: e.target,
                property: e.property,
            }),
            Event::SelectionClear(e) => XEvent::SelectionClear {
                owner: e.owner,
                selection: e.selection,
            },
            Event::ShmCompletion(e) => XEvent::ShmCompletion {
                drawable: e.drawable,
            },
            Event::XinputTouchBegin(e) => XEvent::TouchBegin(touch!(e)),
            Event::XinputTouchUpdate(e) => XEvent::TouchUpdate(touch!(e)),
            Event::XinputTouchEnd(e) => XEvent::TouchEnd(touch!(e)),
            Event::Error(e) => {
                tracing::debug!(
                    error_kind = ?e.error_kind,
                    bad_value = e.bad_value,
                    major = e.major_opcode,
                    "X11 error event"
                );
                return None;
            }
            _ => return None,
        };
        Some(decoded)
    }

    /// Window the event is about, when it targets one.
    pub fn window(&self) -> Option<Window> {
        match *self {
            XEvent::KeyPress(i)
            | XEvent::KeyRelease(i)
            | XEvent::ButtonPress(i)
            | XEvent::ButtonRelease(i)
            | XEvent::Motion(i)
            | XEvent::Enter { input: i, .. }
            | XEvent::Leave { input: i, .. } => Some(i.window),
            XEvent::FocusIn(w)
            | XEvent::FocusOut(w)
            | XEvent::Map(w)
            | XEvent::Unmap(w)
            | XEvent::Destroy(w) => Some(w),
            XEvent::Expose { window, .. }
            | XEvent::Configure { window, .. }
            | XEvent::Gravity { window }
            | XEvent::Reparent { window, .. }
            | XEvent::Property { window, .. }
            | XEvent::ClientMessage { window, .. } => Some(window),
            XEvent::SelectionRequest { owner, .. } | XEvent::SelectionClear { owner, .. } => {
                Some(owner)
            }
            XEvent::SelectionNotify(n) => Some(n.requestor),
            XEvent::ShmCompletion { drawable } => Some(drawable),
            XEvent::TouchBegin(t) | XEvent::TouchUpdate(t) | XEvent::TouchEnd(t) => Some(t.window),
            XEvent::MappingNotify(_) => None,
        }
    }
}
