//! Window lifecycle, geometry and window-manager hints.

use std::sync::Arc;

use crate::atoms::XDND_VERSION;
use crate::geometry::{BorderSize, Point, Rect};
use crate::peer::{Peer, SizeConstraints, WindowStyle};
use crate::property::{XProperty, u32_bytes};
use crate::protocol::{
    Atom, CURRENT_TIME, ClientMessage, Colormap, NONE, NewWindow, Stacking, VisualInfo, Window,
    WindowChanges, XError, XProtocol, event_mask, predefined,
};

use super::{Display, WindowRecord, WindowSystem};

const WINDOW_EVENTS: u32 = event_mask::KEY_PRESS
    | event_mask::KEY_RELEASE
    | event_mask::BUTTON_PRESS
    | event_mask::BUTTON_RELEASE
    | event_mask::ENTER_WINDOW
    | event_mask::LEAVE_WINDOW
    | event_mask::POINTER_MOTION
    | event_mask::KEYMAP_STATE
    | event_mask::EXPOSURE
    | event_mask::STRUCTURE_NOTIFY
    | event_mask::FOCUS_CHANGE
    | event_mask::PROPERTY_CHANGE;

const KEY_PROXY_EVENTS: u32 =
    event_mask::KEY_PRESS | event_mask::KEY_RELEASE | event_mask::FOCUS_CHANGE;

/// Mask for client messages addressed to the window manager via the root.
pub(super) const WM_MESSAGE_MASK: u32 =
    event_mask::SUBSTRUCTURE_NOTIFY | event_mask::SUBSTRUCTURE_REDIRECT;

const NET_WM_STATE_REMOVE: u32 = 0;
const NET_WM_STATE_ADD: u32 = 1;
/// Source indication for EWMH requests: a normal application.
const SOURCE_APPLICATION: u32 = 1;

const ICONIC_STATE: u32 = 3;
const NORMAL_STATE: u32 = 1;

// WM_HINTS flags.
const INPUT_HINT: u32 = 1 << 0;
const STATE_HINT: u32 = 1 << 1;
const ICON_PIXMAP_HINT: u32 = 1 << 2;

// WM_SIZE_HINTS flags.
const P_MIN_SIZE: u32 = 1 << 4;
const P_MAX_SIZE: u32 = 1 << 5;

// _MOTIF_WM_HINTS.
const MWM_HINTS_FUNCTIONS: u32 = 1 << 0;
const MWM_HINTS_DECORATIONS: u32 = 1 << 1;
const MWM_FUNC_RESIZE: u32 = 1 << 1;
const MWM_FUNC_MOVE: u32 = 1 << 2;
const MWM_FUNC_MINIMIZE: u32 = 1 << 3;
const MWM_FUNC_MAXIMIZE: u32 = 1 << 4;
const MWM_FUNC_CLOSE: u32 = 1 << 5;
const MWM_DECOR_BORDER: u32 = 1 << 1;
const MWM_DECOR_RESIZEH: u32 = 1 << 2;
const MWM_DECOR_TITLE: u32 = 1 << 3;
const MWM_DECOR_MENU: u32 = 1 << 4;
const MWM_DECOR_MINIMIZE: u32 = 1 << 5;
const MWM_DECOR_MAXIMIZE: u32 = 1 << 6;

/// Deepest window tree walk before giving up.
const MAX_TREE_DEPTH: usize = 32;

/// `WM_HINTS`: accepts input, starts normal, optional icon pixmap.
fn wm_hints(icon: Atom) -> [u32; 9] {
    let mut flags = INPUT_HINT | STATE_HINT;
    if icon != NONE {
        flags |= ICON_PIXMAP_HINT;
    }
    [flags, 1, NORMAL_STATE, icon, 0, 0, 0, 0, 0]
}

fn motif_hints(style: &WindowStyle) -> [u32; 5] {
    if !style.title_bar {
        return [MWM_HINTS_DECORATIONS, 0, 0, 0, 0];
    }
    let mut functions = MWM_FUNC_MOVE;
    let mut decorations = MWM_DECOR_BORDER | MWM_DECOR_TITLE | MWM_DECOR_MENU;
    if style.resizable {
        functions |= MWM_FUNC_RESIZE;
        decorations |= MWM_DECOR_RESIZEH;
    }
    if style.minimise_button {
        functions |= MWM_FUNC_MINIMIZE;
        decorations |= MWM_DECOR_MINIMIZE;
    }
    if style.maximise_button {
        functions |= MWM_FUNC_MAXIMIZE;
        decorations |= MWM_DECOR_MAXIMIZE;
    }
    if style.close_button {
        functions |= MWM_FUNC_CLOSE;
    }
    [
        MWM_HINTS_FUNCTIONS | MWM_HINTS_DECORATIONS,
        functions,
        decorations,
        0,
        0,
    ]
}

/// `WM_NORMAL_HINTS`. A fixed-size window pins min and max to `current`.
fn size_hints(
    style: &WindowStyle,
    constraints: SizeConstraints,
    current: Option<(u32, u32)>,
) -> [u32; 18] {
    let mut hints = [0u32; 18];
    let (min, max) = match current {
        Some(size) if !style.resizable => (Some(size), Some(size)),
        _ => (constraints.min, constraints.max),
    };
    if let Some((w, h)) = min {
        hints[0] |= P_MIN_SIZE;
        hints[5] = w;
        hints[6] = h;
    }
    if let Some((w, h)) = max {
        hints[0] |= P_MAX_SIZE;
        hints[7] = w;
        hints[8] = h;
    }
    hints
}

impl<C: XProtocol> WindowSystem<C> {
    /// Create a native window for `peer`, as a child of `parent` or a new
    /// top-level window.
    pub fn create_window(
        &self,
        parent: Option<Window>,
        peer: Arc<dyn Peer>,
    ) -> Result<Window, XError> {
        let display = self.display.as_ref().ok_or(XError::Unavailable)?;
        let style = peer.style();
        let constraints = peer.size_constraints();

        let (window, colormap) = {
            let visual = display
                .visuals
                .best_for_window(style.semi_transparent)
                .ok_or(XError::MissingExtension("TrueColor visual"))?;
            let conn = display.conn.lock()?;
            let colormap = conn.create_colormap(visual.id)?;
            let created =
                Self::create_native(display, &conn, parent, &style, constraints, visual, colormap);
            let window = match created {
                Ok(window) => window,
                Err(e) => {
                    conn.free_colormap(colormap)?;
                    return Err(e);
                }
            };
            conn.flush()?;
            (window, colormap)
        };

        self.state().windows.insert(
            window,
            WindowRecord {
                peer,
                style,
                parent: parent.unwrap_or(NONE),
                colormap,
                bounds: Rect::new(0, 0, 1, 1),
                border: None,
                minimised: false,
                fullscreen: false,
            },
        );
        tracing::debug!(
            window = format_args!("0x{window:x}"),
            parent = format_args!("0x{:x}", parent.unwrap_or(NONE)),
            "window created"
        );
        Ok(window)
    }

    fn create_native(
        d: &Display<C>,
        conn: &C,
        parent: Option<Window>,
        style: &WindowStyle,
        constraints: SizeConstraints,
        visual: &VisualInfo,
        colormap: Colormap,
    ) -> Result<Window, XError> {
        let window = conn.create_window(&NewWindow {
            parent: parent.unwrap_or(d.screen.root),
            depth: visual.depth,
            visual: visual.id,
            colormap,
            x: 0,
            y: 0,
            width: 1,
            height: 1,
            input_only: false,
            override_redirect: style.temporary,
            event_mask: WINDOW_EVENTS,
        })?;

        let atoms = &d.atoms;
        let set32 = |property: Atom, type_: Atom, values: &[u32]| {
            conn.change_property(window, property, type_, 32, &u32_bytes(values))
        };

        set32(atoms.protocols, predefined::ATOM, &atoms.protocol_list)?;
        set32(atoms.xdnd_aware, predefined::ATOM, &[XDND_VERSION])?;
        set32(atoms.pid, predefined::CARDINAL, &[std::process::id()])?;
        set32(predefined::WM_HINTS, predefined::WM_HINTS, &wm_hints(NONE))?;

        let window_type = if style.tooltip {
            atoms.window_type_tooltip
        } else if style.temporary {
            atoms.window_type_combo
        } else {
            atoms.window_type_normal
        };
        set32(atoms.window_type, predefined::ATOM, &[window_type])?;

        set32(atoms.motif_wm_hints, atoms.motif_wm_hints, &motif_hints(style))?;
        if style.title_bar {
            let mut actions = vec!["_NET_WM_ACTION_MOVE", "_NET_WM_ACTION_FULLSCREEN"];
            if style.resizable {
                actions.push("_NET_WM_ACTION_RESIZE");
            }
            if style.minimise_button {
                actions.push("_NET_WM_ACTION_MINIMIZE");
            }
            if style.maximise_button {
                actions.extend(["_NET_WM_ACTION_MAXIMIZE_HORZ", "_NET_WM_ACTION_MAXIMIZE_VERT"]);
            }
            if style.close_button {
                actions.push("_NET_WM_ACTION_CLOSE");
            }
            let actions: Vec<Atom> = actions.into_iter().map(|a| d.atom(conn, a)).collect();
            set32(atoms.allowed_actions_prop, predefined::ATOM, &actions)?;
        }
        if style.skip_taskbar {
            set32(atoms.window_state, predefined::ATOM, &[atoms.window_state_skip_taskbar])?;
        }
        set32(
            predefined::WM_NORMAL_HINTS,
            predefined::WM_SIZE_HINTS,
            &size_hints(style, constraints, None),
        )?;

        if d.xinput
            && let Err(e) = conn.select_touch_events(window)
        {
            tracing::debug!(error = %e, "touch events unavailable");
        }
        Ok(window)
    }

    /// Release everything held for `window`, then destroy it.
    ///
    /// Per-window caches are cleared before the native handle goes, so an
    /// event still in flight for the window finds no bookkeeping to touch.
    pub fn destroy_window(&self, window: Window) {
        let (colormap, pixmaps, proxies, finished_drag) = {
            let mut state = self.state();
            let Some(record) = state.windows.remove(&window) else {
                tracing::debug!(window = format_args!("0x{window:x}"), "destroy of unknown window");
                return;
            };
            let paints = state.paints.remove_window(window);
            let touches = state.touches.remove_window(window);
            let pixmaps = state.icon_pixmaps.remove(&window).unwrap_or_default();
            let proxies: Vec<Window> = state
                .key_proxies
                .iter()
                .filter(|&(_, &owner)| owner == window)
                .map(|(&proxy, _)| proxy)
                .collect();
            for proxy in &proxies {
                state.key_proxies.remove(proxy);
            }
            state.drag_target.forget_window(window);
            let finished_drag = state
                .drag_source
                .take_if(|source| source.window() == window);
            tracing::debug!(
                window = format_args!("0x{window:x}"),
                paints,
                touches,
                pixmaps = pixmaps.len(),
                "window caches cleared"
            );
            (record.colormap, pixmaps, proxies, finished_drag)
        };

        self.flush_outbox();
        self.with_conn("destroy_window", |_, conn| {
            for pixmap in pixmaps {
                conn.free_pixmap(pixmap)?;
            }
            for proxy in proxies {
                conn.destroy_window(proxy)?;
            }
            conn.destroy_window(window)?;
            conn.free_colormap(colormap)?;
            conn.flush()
        });
        if let Some(source) = finished_drag {
            source.finish();
        }
    }

    /// Move and resize. Entering or leaving fullscreen is requested from
    /// the window manager.
    pub fn set_bounds(&self, window: Window, bounds: Rect, fullscreen: bool) {
        let Some((style, was_fullscreen, peer)) = self.record(window, |r| {
            (r.style, r.fullscreen, Arc::clone(&r.peer))
        }) else {
            return;
        };
        let constraints = peer.size_constraints();
        let width = bounds.width.max(1) as u32;
        let height = bounds.height.max(1) as u32;

        let done = self.with_conn("set_bounds", |d, conn| {
            if fullscreen != was_fullscreen {
                let atom = d.atom(conn, "_NET_WM_STATE_FULLSCREEN");
                Self::send_wm_state(d, conn, window, fullscreen, atom, NONE)?;
            }
            conn.configure_window(
                window,
                &WindowChanges {
                    x: Some(bounds.x),
                    y: Some(bounds.y),
                    width: Some(width),
                    height: Some(height),
                    stacking: None,
                },
            )?;
            conn.change_property(
                window,
                predefined::WM_NORMAL_HINTS,
                predefined::WM_SIZE_HINTS,
                32,
                &u32_bytes(&size_hints(&style, constraints, Some((width, height)))),
            )?;
            conn.flush()
        });

        if done.is_some()
            && let Some(record) = self.state().windows.get_mut(&window)
        {
            record.bounds = bounds;
            record.fullscreen = fullscreen;
        }
    }

    /// Frame extents published by the window manager, if any.
    pub fn get_border_size(&self, window: Window) -> Option<BorderSize> {
        let border = self.with_conn("get_border_size", |d, conn| {
            let extents = XProperty::fetch(
                conn,
                window,
                d.atoms.frame_extents,
                0,
                4,
                false,
                predefined::CARDINAL,
            )
            .as_u32s();
            Ok(match extents[..] {
                [left, right, top, bottom] => Some(BorderSize {
                    top: top as i32,
                    left: left as i32,
                    bottom: bottom as i32,
                    right: right as i32,
                }),
                _ => None,
            })
        })??;
        if let Some(record) = self.state().windows.get_mut(&window) {
            record.border = Some(border);
        }
        Some(border)
    }

    /// Bounds relative to the parent window, or to the screen for
    /// top-level windows. Remembers the parent's screen position.
    pub fn get_window_bounds(&self, window: Window) -> Rect {
        let parent = self.record(window, |r| r.parent).unwrap_or(NONE);
        let Some((bounds, parent_position)) = self.with_conn("get_window_bounds", |d, conn| {
            let root = d.screen.root;
            let geometry = conn.geometry(window)?;
            let (x, y, _) = conn.translate_coordinates(window, root, 0, 0)?;
            let parent_position = if parent != NONE {
                let (px, py, _) = conn.translate_coordinates(parent, root, 0, 0)?;
                Point::new(px, py)
            } else {
                Point::default()
            };
            let bounds = Rect::new(
                x - parent_position.x,
                y - parent_position.y,
                geometry.width as i32,
                geometry.height as i32,
            );
            Ok((bounds, parent_position))
        }) else {
            return Rect::default();
        };

        let mut state = self.state();
        state.parent_screen_position = parent_position;
        if let Some(record) = state.windows.get_mut(&window) {
            record.bounds = bounds;
        }
        bounds
    }

    /// Screen position of the parent seen by the last bounds query.
    pub fn get_physical_parent_screen_position(&self) -> Point {
        self.state().parent_screen_position
    }

    /// Whether `local` is inside `window` and not covered by a child.
    pub fn contains(&self, window: Window, local: Point) -> bool {
        self.with_conn("contains", |_, conn| {
            if !conn.window_attributes(window)?.viewable {
                return Ok(false);
            }
            let g = conn.geometry(window)?;
            let area = Rect::new(0, 0, g.width as i32, g.height as i32);
            if !area.contains(local) {
                return Ok(false);
            }
            let (_, _, child) = conn.translate_coordinates(window, window, local.x, local.y)?;
            Ok(child == NONE)
        })
        .unwrap_or(false)
    }

    pub fn set_visible(&self, window: Window, visible: bool) {
        self.with_conn("set_visible", |_, conn| {
            if visible {
                conn.map_window(window)?;
            } else {
                conn.unmap_window(window)?;
            }
            conn.flush()
        });
    }

    pub fn set_title(&self, window: Window, title: &str) {
        self.with_conn("set_title", |d, conn| {
            let latin1: Vec<u8> = title
                .chars()
                .map(|c| u8::try_from(u32::from(c)).unwrap_or(b'?'))
                .collect();
            conn.change_property(window, predefined::WM_NAME, predefined::STRING, 8, &latin1)?;
            conn.change_property(
                window,
                d.atoms.net_wm_name,
                d.atoms.utf8_string,
                8,
                title.as_bytes(),
            )?;
            conn.flush()
        });
    }

    /// Set the window icon from `width * height` ARGB pixels.
    pub fn set_icon(&self, window: Window, width: u16, height: u16, argb: &[u32]) {
        let count = usize::from(width) * usize::from(height);
        if count == 0 || argb.len() < count {
            tracing::debug!(width, height, pixels = argb.len(), "icon size mismatch");
            return;
        }
        let argb = &argb[..count];

        let Some(pixmap) = self.with_conn("set_icon", |d, conn| {
            let mut values = Vec::with_capacity(count + 2);
            values.extend([u32::from(width), u32::from(height)]);
            values.extend_from_slice(argb);
            conn.change_property(
                window,
                d.atoms.net_wm_icon,
                predefined::CARDINAL,
                32,
                &u32_bytes(&values),
            )?;

            let pixmap = conn.create_pixmap(d.screen.root_depth, width, height, &u32_bytes(argb))?;
            conn.change_property(
                window,
                predefined::WM_HINTS,
                predefined::WM_HINTS,
                32,
                &u32_bytes(&wm_hints(pixmap)),
            )?;
            conn.flush()?;
            Ok(pixmap)
        }) else {
            return;
        };

        let previous = {
            let mut state = self.state();
            if !state.windows.contains_key(&window) {
                vec![pixmap]
            } else {
                std::mem::replace(
                    state.icon_pixmaps.entry(window).or_default(),
                    vec![pixmap],
                )
            }
        };
        if !previous.is_empty() {
            self.with_conn("set_icon", |_, conn| {
                for pixmap in previous {
                    conn.free_pixmap(pixmap)?;
                }
                Ok(())
            });
        }
    }

    pub fn set_minimised(&self, window: Window, minimised: bool) {
        self.with_conn("set_minimised", |d, conn| {
            if minimised {
                conn.send_client_message(
                    d.screen.root,
                    WM_MESSAGE_MASK,
                    &ClientMessage {
                        window,
                        type_: d.atoms.change_state,
                        data: [ICONIC_STATE, 0, 0, 0, 0],
                    },
                )?;
            } else {
                conn.map_window(window)?;
            }
            conn.flush()
        });
    }

    /// `WM_STATE` says iconic.
    pub fn is_minimised(&self, window: Window) -> bool {
        self.with_conn("is_minimised", |d, conn| {
            let state = XProperty::fetch(conn, window, d.atoms.state, 0, 2, false, d.atoms.state);
            Ok(state.first_u32() == Some(ICONIC_STATE))
        })
        .unwrap_or(false)
    }

    pub fn set_maximised(&self, window: Window, maximised: bool) {
        self.with_conn("set_maximised", |d, conn| {
            Self::send_wm_state(
                d,
                conn,
                window,
                maximised,
                d.atoms.window_state_maximized_horz,
                d.atoms.window_state_maximized_vert,
            )?;
            conn.flush()
        });
    }

    pub fn to_front(&self, window: Window, make_active: bool) {
        self.with_conn("to_front", |d, conn| {
            if make_active {
                conn.send_client_message(
                    d.screen.root,
                    WM_MESSAGE_MASK,
                    &ClientMessage {
                        window,
                        type_: d.atoms.active_win,
                        data: [2, CURRENT_TIME, 0, 0, 0],
                    },
                )?;
            }
            conn.configure_window(
                window,
                &WindowChanges {
                    stacking: Some(Stacking::Above),
                    ..WindowChanges::default()
                },
            )?;
            conn.flush()
        });
    }

    pub fn to_behind(&self, window: Window, other: Window) {
        self.with_conn("to_behind", |_, conn| {
            conn.configure_window(
                window,
                &WindowChanges {
                    stacking: Some(Stacking::Below(other)),
                    ..WindowChanges::default()
                },
            )?;
            conn.flush()
        });
    }

    /// Input focus is on `window` or one of its key proxies.
    pub fn is_focused(&self, window: Window) -> bool {
        let Some(focus) = self.with_conn("is_focused", |_, conn| conn.input_focus()) else {
            return false;
        };
        focus == window || self.state().key_proxies.get(&focus) == Some(&window)
    }

    /// Move input focus to `window` if it is viewable.
    pub fn grab_focus(&self, window: Window) -> bool {
        self.with_conn("grab_focus", |_, conn| {
            if !conn.window_attributes(window)?.viewable {
                return Ok(false);
            }
            conn.set_input_focus(window, CURRENT_TIME)?;
            conn.flush()?;
            Ok(true)
        })
        .unwrap_or(false)
    }

    /// Whether `possible_child` sits anywhere below `window` in the tree.
    pub fn is_parent_window_of(&self, window: Window, possible_child: Window) -> bool {
        if window == NONE || possible_child == NONE || window == possible_child {
            return false;
        }
        self.with_conn("is_parent_window_of", |d, conn| {
            let mut current = possible_child;
            for _ in 0..MAX_TREE_DEPTH {
                let parent = conn.query_tree(current)?.parent;
                if parent == window {
                    return Ok(true);
                }
                if parent == NONE || parent == d.screen.root {
                    return Ok(false);
                }
                current = parent;
            }
            Ok(false)
        })
        .unwrap_or(false)
    }

    /// The direct child of the root containing `window`: the window
    /// manager's frame when reparented, else the window itself.
    pub fn find_top_level_window_of(&self, window: Window) -> Window {
        self.with_conn("find_top_level_window_of", |d, conn| {
            Self::top_level_of(d, conn, window)
        })
        .unwrap_or(NONE)
    }

    fn top_level_of(d: &Display<C>, conn: &C, window: Window) -> Result<Window, XError> {
        let mut current = window;
        for _ in 0..MAX_TREE_DEPTH {
            let parent = conn.query_tree(current)?.parent;
            if parent == d.screen.root || parent == NONE {
                return Ok(current);
            }
            current = parent;
        }
        Ok(NONE)
    }

    /// Whether `window` is stacked above every other window we manage.
    pub fn is_front_window(&self, window: Window) -> bool {
        let ours: Vec<Window> = {
            let state = self.state();
            state
                .windows
                .iter()
                .filter(|(_, r)| r.parent == NONE)
                .map(|(&w, _)| w)
                .collect()
        };
        self.with_conn("is_front_window", |d, conn| {
            let target = Self::top_level_of(d, conn, window)?;
            let mut tops = Vec::with_capacity(ours.len());
            for &w in &ours {
                tops.push(Self::top_level_of(d, conn, w)?);
            }
            let children = conn.query_tree(d.screen.root)?.children;
            for &child in children.iter().rev() {
                if !tops.contains(&child) || !conn.window_attributes(child)?.viewable {
                    continue;
                }
                return Ok(child == target);
            }
            Ok(false)
        })
        .unwrap_or(false)
    }

    /// Hidden input-only child that receives keyboard focus on behalf of
    /// `window`.
    pub fn create_key_proxy(&self, window: Window) -> Option<Window> {
        if !self.state().windows.contains_key(&window) {
            return None;
        }
        let proxy = self.with_conn("create_key_proxy", |_, conn| {
            let proxy = conn.create_window(&NewWindow {
                parent: window,
                depth: 0,
                visual: 0,
                colormap: NONE,
                x: -1,
                y: -1,
                width: 1,
                height: 1,
                input_only: true,
                override_redirect: false,
                event_mask: KEY_PROXY_EVENTS,
            })?;
            conn.map_window(proxy)?;
            conn.flush()?;
            Ok(proxy)
        })?;
        self.state().key_proxies.insert(proxy, window);
        Some(proxy)
    }

    pub fn delete_key_proxy(&self, proxy: Window) {
        if self.state().key_proxies.remove(&proxy).is_none() {
            return;
        }
        self.with_conn("delete_key_proxy", |_, conn| {
            conn.destroy_window(proxy)?;
            conn.flush()
        });
    }

    /// `_NET_WM_STATE` add/remove request for up to two state atoms.
    fn send_wm_state(
        d: &Display<C>,
        conn: &C,
        window: Window,
        add: bool,
        first: Atom,
        second: Atom,
    ) -> Result<(), XError> {
        let action = if add { NET_WM_STATE_ADD } else { NET_WM_STATE_REMOVE };
        conn.send_client_message(
            d.screen.root,
            WM_MESSAGE_MASK,
            &ClientMessage {
                window,
                type_: d.atoms.window_state,
                data: [action, first, second, SOURCE_APPLICATION, 0],
            },
        )
    }

    /// Read a field of a window's record.
    pub(super) fn record<R>(&self, window: Window, f: impl FnOnce(&WindowRecord) -> R) -> Option<R> {
        self.state().windows.get(&window).map(f)
    }
}
