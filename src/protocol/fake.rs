//! In-memory display server used by unit tests.
//!
//! Implements enough of the protocol semantics (atoms, properties, window
//! tree, selections) to drive the facade, and records every message sent
//! so tests can assert on outbound traffic.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use x11rb::protocol::Event;

use super::{
    ANY_PROPERTY_TYPE, Atom, ClientMessage, Colormap, Cursor, CursorBitmap, Extension, Geometry,
    KeyboardMapping, ModifierMapping, MonitorInfo, NONE, NewWindow, Pixmap, PointerInfo,
    RawProperty, ScreenInfo, SelectionNotify, ShmBlit, Timestamp, TreeInfo, VisualInfo,
    Window, WindowAttributes, WindowChanges, XError, XProtocol,
};

pub const ROOT: Window = 0x100;

const PREDEFINED: &[(&str, Atom)] = &[
    ("PRIMARY", 1),
    ("SECONDARY", 2),
    ("ATOM", 4),
    ("CARDINAL", 6),
    ("INTEGER", 19),
    ("PIXMAP", 20),
    ("STRING", 31),
    ("WINDOW", 33),
    ("WM_HINTS", 35),
    ("WM_NAME", 39),
    ("WM_NORMAL_HINTS", 40),
    ("WM_SIZE_HINTS", 41),
];

#[derive(Debug, Clone)]
pub struct FakeWindow {
    pub parent: Window,
    pub geometry: Geometry,
    pub mapped: bool,
    pub override_redirect: bool,
    pub event_mask: u32,
    pub cursor: Cursor,
    pub colormap: Colormap,
    pub properties: HashMap<Atom, RawProperty>,
}

/// Everything the fake saw go over the wire, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Sent {
    ClientMessage { destination: Window, message: ClientMessage },
    SelectionNotify(SelectionNotify),
    ConvertSelection { requestor: Window, selection: Atom, target: Atom, property: Atom },
    Configure { window: Window, changes: WindowChanges },
    Focus(Window),
    PutImage { window: Window, width: u16, height: u16 },
    ShmPutImage { window: Window },
    Warp { x: i32, y: i32 },
    ScreenSaver(bool),
}

#[derive(Debug)]
pub struct FakeState {
    pub atoms: HashMap<String, Atom>,
    pub next_atom: Atom,
    pub next_id: u32,
    pub windows: HashMap<Window, FakeWindow>,
    pub selection_owners: HashMap<Atom, Window>,
    pub sent: Vec<Sent>,
    pub pixmaps: Vec<Pixmap>,
    pub colormaps: Vec<Colormap>,
    pub cursors: Vec<Cursor>,
    pub focus: Window,
    pub pointer: PointerInfo,
    pub keymap: [u8; 32],
    pub pointer_map: Vec<u8>,
    pub modifier_mapping: ModifierMapping,
    pub keyboard_mapping: KeyboardMapping,
    pub monitors: Vec<MonitorInfo>,
    pub extensions: Vec<Extension>,
    pub touch_selected: Vec<Window>,
    /// Reply returned by the next `wait_for_selection_notify`.
    pub selection_reply: Option<SelectionNotify>,
    pub events: VecDeque<Event>,
    pub fail_intern: bool,
    pub fail_shm: bool,
}

/// Cloneable handle: the facade owns one, the test keeps another.
#[derive(Clone)]
pub struct FakeServer {
    screen: ScreenInfo,
    state: Arc<Mutex<FakeState>>,
}

impl FakeServer {
    pub fn new() -> Self {
        let visuals = vec![
            VisualInfo {
                id: 0x21,
                depth: 24,
                true_colour: true,
                red_mask: 0xff0000,
                green_mask: 0xff00,
                blue_mask: 0xff,
            },
            VisualInfo {
                id: 0x22,
                depth: 32,
                true_colour: true,
                red_mask: 0xff0000,
                green_mask: 0xff00,
                blue_mask: 0xff,
            },
            VisualInfo {
                id: 0x23,
                depth: 16,
                true_colour: true,
                red_mask: 0xf800,
                green_mask: 0x7e0,
                blue_mask: 0x1f,
            },
        ];
        let screen = ScreenInfo {
            screen_num: 0,
            root: ROOT,
            width: 1920,
            height: 1080,
            width_mm: 508,
            height_mm: 286,
            root_depth: 24,
            root_visual: 0x21,
            default_colormap: 0x20,
            visuals,
        };

        let mut windows = HashMap::new();
        windows.insert(
            ROOT,
            FakeWindow {
                parent: NONE,
                geometry: Geometry {
                    x: 0,
                    y: 0,
                    width: 1920,
                    height: 1080,
                    border_width: 0,
                },
                mapped: true,
                override_redirect: false,
                event_mask: 0,
                cursor: NONE,
                colormap: NONE,
                properties: HashMap::new(),
            },
        );

        let state = FakeState {
            atoms: PREDEFINED
                .iter()
                .map(|&(name, atom)| (name.to_string(), atom))
                .collect(),
            next_atom: 69,
            next_id: 0x0040_0000,
            windows,
            selection_owners: HashMap::new(),
            sent: Vec::new(),
            pixmaps: Vec::new(),
            colormaps: Vec::new(),
            cursors: Vec::new(),
            focus: ROOT,
            pointer: PointerInfo::default(),
            keymap: [0; 32],
            pointer_map: vec![1, 2, 3, 4, 5, 6, 7],
            modifier_mapping: ModifierMapping::default(),
            keyboard_mapping: KeyboardMapping::default(),
            monitors: Vec::new(),
            extensions: vec![Extension::Shm, Extension::XInput],
            touch_selected: Vec::new(),
            selection_reply: None,
            events: VecDeque::new(),
            fail_intern: false,
            fail_shm: false,
        };

        Self {
            screen,
            state: Arc::new(Mutex::new(state)),
        }
    }

    pub fn state(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().unwrap()
    }

    /// Atom for `name`, interning it server-side if needed.
    pub fn atom(&self, name: &str) -> Atom {
        self.intern_atom(name, false).unwrap()
    }

    /// Create a window owned by "another client".
    pub fn foreign_window(&self, parent: Window, geometry: Geometry) -> Window {
        let mut s = self.state();
        let id = s.next_id;
        s.next_id += 1;
        s.windows.insert(
            id,
            FakeWindow {
                parent,
                geometry,
                mapped: true,
                override_redirect: false,
                event_mask: 0,
                cursor: NONE,
                colormap: NONE,
                properties: HashMap::new(),
            },
        );
        id
    }

    pub fn set_property(&self, window: Window, property: Atom, type_: Atom, format: u8, value: &[u8]) {
        self.change_property(window, property, type_, format, value)
            .unwrap();
    }

    pub fn property(&self, window: Window, property: Atom) -> Option<RawProperty> {
        self.state()
            .windows
            .get(&window)
            .and_then(|w| w.properties.get(&property).cloned())
    }

    pub fn take_sent(&self) -> Vec<Sent> {
        std::mem::take(&mut self.state().sent)
    }

    pub fn client_messages(&self) -> Vec<(Window, ClientMessage)> {
        self.state()
            .sent
            .iter()
            .filter_map(|s| match s {
                Sent::ClientMessage {
                    destination,
                    message,
                } => Some((*destination, *message)),
                _ => None,
            })
            .collect()
    }

    fn alloc_id(&self) -> u32 {
        let mut s = self.state();
        let id = s.next_id;
        s.next_id += 1;
        id
    }

    fn absolute_origin(s: &FakeState, mut window: Window) -> Option<(i32, i32)> {
        let (mut x, mut y) = (0, 0);
        while window != ROOT {
            let w = s.windows.get(&window)?;
            x += w.geometry.x;
            y += w.geometry.y;
            window = w.parent;
        }
        Some((x, y))
    }
}

impl XProtocol for FakeServer {
    fn screen(&self) -> &ScreenInfo {
        &self.screen
    }

    fn has_extension(&self, ext: Extension) -> bool {
        self.state().extensions.contains(&ext)
    }

    fn flush(&self) -> Result<(), XError> {
        Ok(())
    }

    fn intern_atom(&self, name: &str, only_if_exists: bool) -> Result<Atom, XError> {
        let mut s = self.state();
        if s.fail_intern {
            return Err(XError::BadWindow(NONE));
        }
        if let Some(&atom) = s.atoms.get(name) {
            return Ok(atom);
        }
        if only_if_exists {
            return Ok(NONE);
        }
        let atom = s.next_atom;
        s.next_atom += 1;
        s.atoms.insert(name.to_string(), atom);
        Ok(atom)
    }

    fn atom_name(&self, atom: Atom) -> Result<String, XError> {
        self.state()
            .atoms
            .iter()
            .find(|&(_, &a)| a == atom)
            .map(|(name, _)| name.clone())
            .ok_or(XError::BadWindow(atom))
    }

    fn get_property(
        &self,
        window: Window,
        property: Atom,
        type_: Atom,
        long_offset: u32,
        long_length: u32,
        delete: bool,
    ) -> Result<RawProperty, XError> {
        let mut s = self.state();
        let w = s.windows.get_mut(&window).ok_or(XError::BadWindow(window))?;
        let Some(prop) = w.properties.get(&property).cloned() else {
            return Ok(RawProperty::default());
        };
        if type_ != ANY_PROPERTY_TYPE && prop.type_ != type_ {
            return Ok(RawProperty {
                type_: prop.type_,
                format: prop.format,
                bytes_after: prop.value.len() as u32,
                value: Vec::new(),
            });
        }
        let start = (long_offset as usize * 4).min(prop.value.len());
        let end = start
            .saturating_add(long_length as usize * 4)
            .min(prop.value.len());
        let bytes_after = (prop.value.len() - end) as u32;
        if delete && bytes_after == 0 {
            w.properties.remove(&property);
        }
        Ok(RawProperty {
            type_: prop.type_,
            format: prop.format,
            bytes_after,
            value: prop.value[start..end].to_vec(),
        })
    }

    fn change_property(
        &self,
        window: Window,
        property: Atom,
        type_: Atom,
        format: u8,
        data: &[u8],
    ) -> Result<(), XError> {
        let mut s = self.state();
        let w = s.windows.get_mut(&window).ok_or(XError::BadWindow(window))?;
        w.properties.insert(
            property,
            RawProperty {
                type_,
                format,
                bytes_after: 0,
                value: data.to_vec(),
            },
        );
        Ok(())
    }

    fn delete_property(&self, window: Window, property: Atom) -> Result<(), XError> {
        if let Some(w) = self.state().windows.get_mut(&window) {
            w.properties.remove(&property);
        }
        Ok(())
    }

    fn create_colormap(&self, _visual: u32) -> Result<Colormap, XError> {
        let id = self.alloc_id();
        self.state().colormaps.push(id);
        Ok(id)
    }

    fn free_colormap(&self, colormap: Colormap) -> Result<(), XError> {
        self.state().colormaps.retain(|&c| c != colormap);
        Ok(())
    }

    fn create_window(&self, params: &NewWindow) -> Result<Window, XError> {
        let id = self.alloc_id();
        let mut s = self.state();
        if !s.windows.contains_key(&params.parent) {
            return Err(XError::BadWindow(params.parent));
        }
        s.windows.insert(
            id,
            FakeWindow {
                parent: params.parent,
                geometry: Geometry {
                    x: i32::from(params.x),
                    y: i32::from(params.y),
                    width: u32::from(params.width.max(1)),
                    height: u32::from(params.height.max(1)),
                    border_width: 0,
                },
                mapped: false,
                override_redirect: params.override_redirect,
                event_mask: params.event_mask,
                cursor: NONE,
                colormap: params.colormap,
                properties: HashMap::new(),
            },
        );
        Ok(id)
    }

    fn destroy_window(&self, window: Window) -> Result<(), XError> {
        let mut s = self.state();
        s.windows
            .remove(&window)
            .map(|_| ())
            .ok_or(XError::BadWindow(window))
    }

    fn map_window(&self, window: Window) -> Result<(), XError> {
        let mut s = self.state();
        let w = s.windows.get_mut(&window).ok_or(XError::BadWindow(window))?;
        w.mapped = true;
        Ok(())
    }

    fn unmap_window(&self, window: Window) -> Result<(), XError> {
        let mut s = self.state();
        let w = s.windows.get_mut(&window).ok_or(XError::BadWindow(window))?;
        w.mapped = false;
        Ok(())
    }

    fn configure_window(&self, window: Window, changes: &WindowChanges) -> Result<(), XError> {
        let mut s = self.state();
        let w = s.windows.get_mut(&window).ok_or(XError::BadWindow(window))?;
        if let Some(x) = changes.x {
            w.geometry.x = x;
        }
        if let Some(y) = changes.y {
            w.geometry.y = y;
        }
        if let Some(width) = changes.width {
            w.geometry.width = width.max(1);
        }
        if let Some(height) = changes.height {
            w.geometry.height = height.max(1);
        }
        s.sent.push(Sent::Configure {
            window,
            changes: *changes,
        });
        Ok(())
    }

    fn select_input(&self, window: Window, event_mask: u32) -> Result<(), XError> {
        let mut s = self.state();
        let w = s.windows.get_mut(&window).ok_or(XError::BadWindow(window))?;
        w.event_mask = event_mask;
        Ok(())
    }

    fn window_attributes(&self, window: Window) -> Result<WindowAttributes, XError> {
        let s = self.state();
        let w = s.windows.get(&window).ok_or(XError::BadWindow(window))?;
        Ok(WindowAttributes {
            viewable: w.mapped,
            override_redirect: w.override_redirect,
        })
    }

    fn geometry(&self, window: Window) -> Result<Geometry, XError> {
        let s = self.state();
        s.windows
            .get(&window)
            .map(|w| w.geometry)
            .ok_or(XError::BadWindow(window))
    }

    fn query_tree(&self, window: Window) -> Result<TreeInfo, XError> {
        let s = self.state();
        let w = s.windows.get(&window).ok_or(XError::BadWindow(window))?;
        let mut children: Vec<Window> = s
            .windows
            .iter()
            .filter(|&(&id, c)| c.parent == window && id != window)
            .map(|(&id, _)| id)
            .collect();
        children.sort_unstable();
        Ok(TreeInfo {
            root: ROOT,
            parent: w.parent,
            children,
        })
    }

    fn translate_coordinates(
        &self,
        src: Window,
        dst: Window,
        x: i32,
        y: i32,
    ) -> Result<(i32, i32, Window), XError> {
        let s = self.state();
        let (sx, sy) = Self::absolute_origin(&s, src).ok_or(XError::BadWindow(src))?;
        let (dx, dy) = Self::absolute_origin(&s, dst).ok_or(XError::BadWindow(dst))?;
        let (tx, ty) = (x + sx - dx, y + sy - dy);

        // Topmost mapped child of dst containing the point.
        let mut ids: Vec<&Window> = s.windows.keys().collect();
        ids.sort_unstable();
        let child = ids
            .into_iter()
            .rev()
            .copied()
            .find(|id| {
                let w = &s.windows[id];
                *id != dst
                    && w.parent == dst
                    && w.mapped
                    && tx >= w.geometry.x
                    && ty >= w.geometry.y
                    && tx < w.geometry.x + w.geometry.width as i32
                    && ty < w.geometry.y + w.geometry.height as i32
            })
            .unwrap_or(NONE);
        Ok((tx, ty, child))
    }

    fn query_pointer(&self, _window: Window) -> Result<PointerInfo, XError> {
        Ok(self.state().pointer)
    }

    fn warp_pointer(&self, _dst: Window, x: i32, y: i32) -> Result<(), XError> {
        let mut s = self.state();
        s.pointer.root_x = x;
        s.pointer.root_y = y;
        s.sent.push(Sent::Warp { x, y });
        Ok(())
    }

    fn set_input_focus(&self, window: Window, _time: Timestamp) -> Result<(), XError> {
        let mut s = self.state();
        s.focus = window;
        s.sent.push(Sent::Focus(window));
        Ok(())
    }

    fn input_focus(&self) -> Result<Window, XError> {
        Ok(self.state().focus)
    }

    fn send_client_message(
        &self,
        destination: Window,
        _event_mask: u32,
        message: &ClientMessage,
    ) -> Result<(), XError> {
        self.state().sent.push(Sent::ClientMessage {
            destination,
            message: *message,
        });
        Ok(())
    }

    fn send_selection_notify(&self, notify: &SelectionNotify) -> Result<(), XError> {
        self.state().sent.push(Sent::SelectionNotify(*notify));
        Ok(())
    }

    fn set_selection_owner(
        &self,
        selection: Atom,
        owner: Window,
        _time: Timestamp,
    ) -> Result<(), XError> {
        self.state().selection_owners.insert(selection, owner);
        Ok(())
    }

    fn selection_owner(&self, selection: Atom) -> Result<Window, XError> {
        Ok(self
            .state()
            .selection_owners
            .get(&selection)
            .copied()
            .unwrap_or(NONE))
    }

    fn convert_selection(
        &self,
        requestor: Window,
        selection: Atom,
        target: Atom,
        property: Atom,
        _time: Timestamp,
    ) -> Result<(), XError> {
        self.state().sent.push(Sent::ConvertSelection {
            requestor,
            selection,
            target,
            property,
        });
        Ok(())
    }

    fn wait_for_selection_notify(
        &self,
        requestor: Window,
        _timeout: Duration,
    ) -> Result<Option<SelectionNotify>, XError> {
        let mut s = self.state();
        match s.selection_reply {
            Some(reply) if reply.requestor == requestor => {
                s.selection_reply = None;
                Ok(Some(reply))
            }
            _ => Ok(None),
        }
    }

    fn create_font_cursor(&self, _glyph: u16) -> Result<Cursor, XError> {
        let id = self.alloc_id();
        self.state().cursors.push(id);
        Ok(id)
    }

    fn create_bitmap_cursor(&self, _bitmap: &CursorBitmap) -> Result<Cursor, XError> {
        let id = self.alloc_id();
        self.state().cursors.push(id);
        Ok(id)
    }

    fn free_cursor(&self, cursor: Cursor) -> Result<(), XError> {
        self.state().cursors.retain(|&c| c != cursor);
        Ok(())
    }

    fn define_cursor(&self, window: Window, cursor: Cursor) -> Result<(), XError> {
        let mut s = self.state();
        let w = s.windows.get_mut(&window).ok_or(XError::BadWindow(window))?;
        w.cursor = cursor;
        Ok(())
    }

    fn create_pixmap(
        &self,
        _depth: u8,
        _width: u16,
        _height: u16,
        _data: &[u8],
    ) -> Result<Pixmap, XError> {
        let id = self.alloc_id();
        self.state().pixmaps.push(id);
        Ok(id)
    }

    fn free_pixmap(&self, pixmap: Pixmap) -> Result<(), XError> {
        self.state().pixmaps.retain(|&p| p != pixmap);
        Ok(())
    }

    fn put_image(
        &self,
        window: Window,
        _depth: u8,
        _x: i16,
        _y: i16,
        width: u16,
        height: u16,
        _data: &[u8],
    ) -> Result<(), XError> {
        self.state().sent.push(Sent::PutImage {
            window,
            width,
            height,
        });
        Ok(())
    }

    fn shm_put_image(&self, window: Window, _blit: &ShmBlit) -> Result<(), XError> {
        let mut s = self.state();
        if s.fail_shm {
            return Err(XError::BadWindow(window));
        }
        s.sent.push(Sent::ShmPutImage { window });
        Ok(())
    }

    fn modifier_mapping(&self) -> Result<ModifierMapping, XError> {
        Ok(self.state().modifier_mapping.clone())
    }

    fn keyboard_mapping(&self) -> Result<KeyboardMapping, XError> {
        Ok(self.state().keyboard_mapping.clone())
    }

    fn pointer_mapping(&self) -> Result<Vec<u8>, XError> {
        Ok(self.state().pointer_map.clone())
    }

    fn query_keymap(&self) -> Result<[u8; 32], XError> {
        Ok(self.state().keymap)
    }

    fn set_screen_saver(&self, enabled: bool) -> Result<(), XError> {
        self.state().sent.push(Sent::ScreenSaver(enabled));
        Ok(())
    }

    fn select_touch_events(&self, window: Window) -> Result<(), XError> {
        self.state().touch_selected.push(window);
        Ok(())
    }

    fn monitors(&self) -> Result<Vec<MonitorInfo>, XError> {
        Ok(self.state().monitors.clone())
    }

    fn poll_event(&self) -> Result<Option<Event>, XError> {
        Ok(self.state().events.pop_front())
    }
}

