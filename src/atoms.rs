//! Atom table: name/atom resolution with a per-connection cache, plus the
//! set of well-known atoms interned once at startup.

use std::collections::HashMap;
use std::sync::RwLock;

use crate::protocol::{Atom, NONE, XProtocol, predefined};

/// Highest Xdnd protocol version this crate speaks.
pub const XDND_VERSION: u32 = 3;

/// Targets that carry a list of files.
const FILE_MIME_TYPES: &[&str] = &["text/uri-list", "x-special/gnome-copied-files"];

/// Caches every atom resolved through it for the life of the connection.
#[derive(Debug, Default)]
pub struct AtomTable {
    cache: RwLock<HashMap<String, Atom>>,
}

impl AtomTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve `name`, creating the server-side binding if needed.
    ///
    /// Returns [`NONE`] if the server cannot be asked.
    pub fn get_creating(&self, conn: &impl XProtocol, name: &str) -> Atom {
        self.resolve(conn, name, false)
    }

    /// Resolve `name` without creating it; [`NONE`] when unknown.
    pub fn get_if_exists(&self, conn: &impl XProtocol, name: &str) -> Atom {
        self.resolve(conn, name, true)
    }

    /// Inverse lookup. Always asks the server.
    pub fn get_name(&self, conn: &impl XProtocol, atom: Atom) -> Option<String> {
        if atom == NONE {
            return None;
        }
        match conn.atom_name(atom) {
            Ok(name) => Some(name),
            Err(e) => {
                tracing::debug!(atom, error = %e, "GetAtomName failed");
                None
            }
        }
    }

    /// Whether `atom` names one of the file-list MIME types.
    pub fn is_mime_type_file(&self, conn: &impl XProtocol, atom: Atom) -> bool {
        self.get_name(conn, atom)
            .is_some_and(|name| FILE_MIME_TYPES.iter().any(|m| m.eq_ignore_ascii_case(&name)))
    }

    fn resolve(&self, conn: &impl XProtocol, name: &str, only_if_exists: bool) -> Atom {
        if let Ok(cache) = self.cache.read()
            && let Some(&atom) = cache.get(name)
        {
            return atom;
        }

        let atom = match conn.intern_atom(name, only_if_exists) {
            Ok(atom) => atom,
            Err(e) => {
                tracing::warn!(name, error = %e, "InternAtom failed");
                return NONE;
            }
        };

        // Unknown names are not cached; they may be created later.
        if atom != NONE
            && let Ok(mut cache) = self.cache.write()
        {
            cache.insert(name.to_string(), atom);
        }
        atom
    }
}

/// Index of each entry in [`Atoms::protocol_list`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolItem {
    TakeFocus = 0,
    DeleteWindow = 1,
    Ping = 2,
}

/// Well-known atoms used throughout the window system.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Atoms {
    pub protocols: Atom,
    pub protocol_list: [Atom; 3],
    pub change_state: Atom,
    pub state: Atom,
    pub user_time: Atom,
    pub active_win: Atom,
    pub pid: Atom,
    pub window_type: Atom,
    pub window_state: Atom,
    pub window_state_hidden: Atom,
    pub window_state_maximized_horz: Atom,
    pub window_state_maximized_vert: Atom,
    pub window_state_skip_taskbar: Atom,
    pub window_type_normal: Atom,
    pub window_type_tooltip: Atom,
    pub window_type_combo: Atom,
    pub motif_wm_hints: Atom,
    pub allowed_actions_prop: Atom,
    pub net_wm_name: Atom,
    pub net_wm_icon: Atom,
    pub frame_extents: Atom,
    pub xdnd_aware: Atom,
    pub xdnd_enter: Atom,
    pub xdnd_leave: Atom,
    pub xdnd_position: Atom,
    pub xdnd_status: Atom,
    pub xdnd_drop: Atom,
    pub xdnd_finished: Atom,
    pub xdnd_selection: Atom,
    pub xdnd_type_list: Atom,
    pub xdnd_action_list: Atom,
    pub xdnd_action_description: Atom,
    pub xdnd_action_copy: Atom,
    pub xdnd_action_private: Atom,
    pub xembed_msg_type: Atom,
    pub xembed_info: Atom,
    /// Move, copy, link, ask, private.
    pub allowed_actions: [Atom; 5],
    /// UTF8_STRING, text/plain;charset=utf-8, text/plain, text/uri-list.
    pub allowed_mime_types: [Atom; 4],
    pub utf8_string: Atom,
    pub clipboard: Atom,
    pub targets: Atom,
    pub uri_list: Atom,
}

impl Atoms {
    /// Intern every well-known atom through `table`.
    pub fn new(conn: &impl XProtocol, table: &AtomTable) -> Self {
        let get = |name: &str| table.get_creating(conn, name);

        let utf8_string = get("UTF8_STRING");
        let uri_list = get("text/uri-list");
        let xdnd_action_copy = get("XdndActionCopy");
        let xdnd_action_private = get("XdndActionPrivate");

        Self {
            protocols: get("WM_PROTOCOLS"),
            protocol_list: [
                get("WM_TAKE_FOCUS"),
                get("WM_DELETE_WINDOW"),
                get("_NET_WM_PING"),
            ],
            change_state: get("WM_CHANGE_STATE"),
            state: get("WM_STATE"),
            user_time: get("_NET_WM_USER_TIME"),
            active_win: get("_NET_ACTIVE_WINDOW"),
            pid: get("_NET_WM_PID"),
            window_type: get("_NET_WM_WINDOW_TYPE"),
            window_state: get("_NET_WM_STATE"),
            window_state_hidden: get("_NET_WM_STATE_HIDDEN"),
            window_state_maximized_horz: get("_NET_WM_STATE_MAXIMIZED_HORZ"),
            window_state_maximized_vert: get("_NET_WM_STATE_MAXIMIZED_VERT"),
            window_state_skip_taskbar: get("_NET_WM_STATE_SKIP_TASKBAR"),
            window_type_normal: get("_NET_WM_WINDOW_TYPE_NORMAL"),
            window_type_tooltip: get("_NET_WM_WINDOW_TYPE_TOOLTIP"),
            window_type_combo: get("_NET_WM_WINDOW_TYPE_COMBO"),
            motif_wm_hints: get("_MOTIF_WM_HINTS"),
            allowed_actions_prop: get("_NET_WM_ALLOWED_ACTIONS"),
            net_wm_name: get("_NET_WM_NAME"),
            net_wm_icon: get("_NET_WM_ICON"),
            frame_extents: get("_NET_FRAME_EXTENTS"),
            xdnd_aware: get("XdndAware"),
            xdnd_enter: get("XdndEnter"),
            xdnd_leave: get("XdndLeave"),
            xdnd_position: get("XdndPosition"),
            xdnd_status: get("XdndStatus"),
            xdnd_drop: get("XdndDrop"),
            xdnd_finished: get("XdndFinished"),
            xdnd_selection: get("XdndSelection"),
            xdnd_type_list: get("XdndTypeList"),
            xdnd_action_list: get("XdndActionList"),
            xdnd_action_description: get("XdndActionDescription"),
            xdnd_action_copy,
            xdnd_action_private,
            xembed_msg_type: get("_XEMBED"),
            xembed_info: get("_XEMBED_INFO"),
            allowed_actions: [
                get("XdndActionMove"),
                xdnd_action_copy,
                get("XdndActionLink"),
                get("XdndActionAsk"),
                xdnd_action_private,
            ],
            allowed_mime_types: [
                utf8_string,
                get("text/plain;charset=utf-8"),
                get("text/plain"),
                uri_list,
            ],
            utf8_string,
            clipboard: get("CLIPBOARD"),
            targets: get("TARGETS"),
            uri_list,
        }
    }

    pub fn protocol(&self, item: ProtocolItem) -> Atom {
        self.protocol_list[item as usize]
    }

    /// Targets offered when this process owns a text selection.
    pub fn text_targets(&self) -> [Atom; 4] {
        [
            self.utf8_string,
            predefined::STRING,
            self.allowed_mime_types[1],
            self.allowed_mime_types[2],
        ]
    }

    /// Whether `atom` is a target under which plain text can be served.
    pub fn is_text_target(&self, atom: Atom) -> bool {
        atom != NONE && self.text_targets().contains(&atom)
    }
}
