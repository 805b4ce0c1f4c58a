//! Xdnd drag and drop: the inbound target state machine, outbound drag
//! sessions and the queue of client messages they emit.
//!
//! Every inbound drop is answered with exactly one `XdndFinished`. The
//! [`FinishGuard`] created when a drop arrives sends a rejecting reply when
//! it is dropped without having been completed, so tearing a session down
//! at any point still releases the source.

use std::sync::Mutex;
use std::sync::mpsc::{Receiver, Sender, channel};

use crate::atoms::{Atoms, XDND_VERSION};
use crate::geometry::Point;
use crate::peer::{DragEvent, DragPayload};
use crate::property::{XProperty, u32_bytes};
use crate::protocol::{
    ANY_PROPERTY_TYPE, Atom, CURRENT_TIME, ClientMessage, NONE, SelectionNotify, Timestamp, Window, XError,
    XProtocol, predefined,
};

use super::WindowSystem;

/// Deepest window nesting searched for a drop target.
const MAX_TARGET_DEPTH: usize = 16;

type Outgoing = (Window, ClientMessage);

/// Client messages waiting to be written once the connection is free.
pub(crate) struct Outbox {
    tx: Sender<Outgoing>,
    rx: Mutex<Receiver<Outgoing>>,
}

impl Outbox {
    pub fn new() -> Self {
        let (tx, rx) = channel();
        Self {
            tx,
            rx: Mutex::new(rx),
        }
    }

    pub fn sender(&self) -> Sender<Outgoing> {
        self.tx.clone()
    }

    pub fn push(&self, destination: Window, message: ClientMessage) {
        // The receiver lives as long as self.
        let _ = self.tx.send((destination, message));
    }

    fn drain(&self) -> Vec<Outgoing> {
        match self.rx.lock() {
            Ok(rx) => rx.try_iter().collect(),
            Err(poisoned) => poisoned.into_inner().try_iter().collect(),
        }
    }
}

/// Owes the drag source one `XdndFinished`.
pub(crate) struct FinishGuard {
    tx: Sender<Outgoing>,
    source: Window,
    message: ClientMessage,
    sent: bool,
}

impl FinishGuard {
    fn new(tx: Sender<Outgoing>, atoms: &Atoms, source: Window, target: Window) -> Self {
        Self {
            tx,
            source,
            message: ClientMessage {
                window: source,
                type_: atoms.xdnd_finished,
                data: [target, 0, 0, 0, 0],
            },
            sent: false,
        }
    }

    /// Reply with the drop's outcome.
    fn complete(mut self, accepted: bool, action: Atom) {
        self.send(accepted, action);
    }

    fn send(&mut self, accepted: bool, action: Atom) {
        if self.sent {
            return;
        }
        self.sent = true;
        let mut message = self.message;
        message.data[1] = u32::from(accepted);
        message.data[2] = if accepted { action } else { NONE };
        let _ = self.tx.send((self.source, message));
    }
}

impl Drop for FinishGuard {
    fn drop(&mut self) {
        if !self.sent {
            tracing::debug!(
                source = format_args!("0x{:x}", self.source),
                "drop abandoned, rejecting"
            );
        }
        self.send(false, NONE);
    }
}

/// An inbound drag over one of our windows.
#[derive(Debug, Clone)]
pub(crate) struct Session {
    source: Window,
    window: Window,
    version: u32,
    /// Best offered type we can read, `NONE` if there is none.
    mime: Atom,
    files: bool,
    accepted: bool,
    action: Atom,
    position: Point,
}

/// Inbound Xdnd state.
#[derive(Default)]
pub(crate) enum DragTarget {
    #[default]
    Idle,
    Tracking(Session),
    /// Drop received, waiting for the payload.
    Dropping { session: Session, guard: FinishGuard },
    /// The drop was answered; anything further from `source` is stale.
    Finished { source: Window },
}

impl DragTarget {
    fn name(&self) -> &'static str {
        match self {
            DragTarget::Idle => "idle",
            DragTarget::Tracking(_) => "tracking",
            DragTarget::Dropping { .. } => "dropping",
            DragTarget::Finished { .. } => "finished",
        }
    }

    fn tracking(&mut self, source: Window) -> Option<&mut Session> {
        match self {
            DragTarget::Tracking(session) if session.source == source => Some(session),
            _ => None,
        }
    }

    fn is_finished_for(&self, source: Window) -> bool {
        match self {
            DragTarget::Finished { source: s } => *s == source,
            DragTarget::Dropping { session, .. } => session.source == source,
            _ => false,
        }
    }

    /// Abandon any session over `window`.
    pub fn forget_window(&mut self, window: Window) {
        let over_window = match self {
            DragTarget::Tracking(session) | DragTarget::Dropping { session, .. } => {
                session.window == window
            }
            _ => false,
        };
        if over_window {
            *self = DragTarget::Idle;
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SourceState {
    /// Selection owned, pointer not over any Xdnd-aware window yet.
    Armed,
    Tracking {
        target: Window,
        accepted: bool,
        action: Atom,
    },
    Dropped {
        target: Window,
    },
}

/// An outbound drag started by one of our windows.
pub(crate) struct DragSource {
    window: Window,
    payload: DragPayload,
    types: Vec<Atom>,
    action: Atom,
    state: SourceState,
    completion: Option<Box<dyn FnOnce() + Send>>,
}

impl DragSource {
    pub fn window(&self) -> Window {
        self.window
    }

    /// End the session, running its completion callback.
    pub fn finish(mut self) {
        tracing::debug!(window = format_args!("0x{:x}", self.window), "outbound drag finished");
        if let Some(completion) = self.completion.take() {
            completion();
        }
    }
}

/// Paths from a `text/uri-list` body.
fn parse_uri_list(body: &str) -> Vec<String> {
    body.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(|line| {
            let path = match line.strip_prefix("file://") {
                // Drop the host part, keep the absolute path.
                Some(rest) => rest.find('/').map_or(rest, |i| &rest[i..]),
                None => line,
            };
            percent_decode(path)
        })
        .collect()
}

fn percent_decode(s: &str) -> String {
    let bytes = s.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%'
            && let Some(hex) = s.get(i + 1..i + 3)
            && let Ok(b) = u8::from_str_radix(hex, 16)
        {
            out.push(b);
            i += 3;
            continue;
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

fn uri_list_body(files: &[String]) -> String {
    files
        .iter()
        .map(|f| {
            let mut uri = String::from("file://");
            for b in f.bytes() {
                if b.is_ascii_alphanumeric() || b"/-_.~".contains(&b) {
                    uri.push(char::from(b));
                } else {
                    uri.push_str(&format!("%{b:02X}"));
                }
            }
            uri + "\r\n"
        })
        .collect()
}

/// Bytes and type to serve for `target`, `None` if the payload cannot be
/// expressed that way.
pub(super) fn encode_payload(
    payload: &DragPayload,
    target: Atom,
    atoms: &Atoms,
) -> Option<Vec<u8>> {
    match payload {
        DragPayload::Files(files) if target == atoms.uri_list => {
            Some(uri_list_body(files).into_bytes())
        }
        DragPayload::Files(files) if atoms.is_text_target(target) => {
            Some(files.join("\n").into_bytes())
        }
        DragPayload::Text(text) if atoms.is_text_target(target) => Some(text.as_bytes().to_vec()),
        _ => None,
    }
}

impl<C: XProtocol> WindowSystem<C> {
    /// Write every queued client message.
    pub(super) fn flush_outbox(&self) {
        let pending = self.outbox.drain();
        if pending.is_empty() {
            return;
        }
        self.with_conn("flush_outbox", |_, conn| {
            for (destination, message) in &pending {
                conn.send_client_message(*destination, 0, message)?;
            }
            conn.flush()
        });
    }

    /// Handle an Xdnd client message addressed to `window`. Returns false
    /// if `type_` is not an Xdnd message.
    pub(super) fn handle_drag_message(&self, window: Window, type_: Atom, data: [u32; 5]) -> bool {
        let Some(atoms) = self.atoms() else {
            return false;
        };
        if type_ == NONE {
            return false;
        }
        if type_ == atoms.xdnd_enter {
            self.drag_enter(window, data);
        } else if type_ == atoms.xdnd_position {
            self.drag_position(window, data);
        } else if type_ == atoms.xdnd_leave {
            self.drag_leave(data[0]);
        } else if type_ == atoms.xdnd_drop {
            self.drag_drop(window, data);
        } else if type_ == atoms.xdnd_status {
            self.drag_source_status(data);
        } else if type_ == atoms.xdnd_finished {
            self.drag_source_finished(data[0]);
        } else {
            return false;
        }
        self.flush_outbox();
        true
    }

    fn drag_enter(&self, window: Window, data: [u32; 5]) {
        let source = data[0];
        let version = (data[1] >> 24).min(XDND_VERSION);
        let Some((mime, files)) = self.with_conn("xdnd_enter", |d, conn| {
            let types: Vec<Atom> = if data[1] & 1 != 0 {
                XProperty::fetch_all(conn, source, d.atoms.xdnd_type_list, false, predefined::ATOM)
                    .as_u32s()
            } else {
                data[2..5].iter().copied().filter(|&t| t != NONE).collect()
            };
            // A file list wins over its text rendering whatever the offer order.
            let accepted = |m: &Atom| *m != NONE && types.contains(m);
            let allowed = || d.atoms.allowed_mime_types.iter().copied();
            let file = allowed()
                .filter(accepted)
                .find(|&m| d.atom_table.is_mime_type_file(conn, m));
            Ok(match file {
                Some(mime) => (mime, true),
                None => (allowed().find(accepted).unwrap_or(NONE), false),
            })
        }) else {
            return;
        };

        tracing::debug!(
            source = format_args!("0x{source:x}"),
            window = format_args!("0x{window:x}"),
            version,
            files,
            "xdnd enter"
        );
        self.state().drag_target = DragTarget::Tracking(Session {
            source,
            window,
            version,
            mime,
            files,
            accepted: false,
            action: NONE,
            position: Point::default(),
        });
    }

    fn drag_position(&self, window: Window, data: [u32; 5]) {
        let Some(atoms) = self.atoms().cloned() else {
            return;
        };
        let source = data[0];
        let root_x = i32::from((data[2] >> 16) as i16);
        let root_y = i32::from((data[2] & 0xffff) as i16);
        let requested = data[4];

        let session = {
            let mut state = self.state();
            if state.drag_target.is_finished_for(source) {
                tracing::trace!(source = format_args!("0x{source:x}"), "late xdnd position ignored");
                return;
            }
            state.drag_target.tracking(source).cloned()
        };
        let Some(session) = session else {
            self.outbox.push(source, Self::status(&atoms, source, window, false, NONE));
            return;
        };

        let local = self.with_conn("xdnd_position", |d, conn| {
            let (x, y, _) = conn.translate_coordinates(d.screen.root, window, root_x, root_y)?;
            let g = conn.geometry(window)?;
            let inside = x >= 0 && y >= 0 && x < g.width as i32 && y < g.height as i32;
            Ok(inside.then_some(Point::new(x, y)))
        });
        let Some(peer) = self.peer_for(window) else {
            return;
        };

        let Some(Some(position)) = local else {
            self.state().drag_target = DragTarget::Idle;
            peer.handle_drag_exit();
            self.outbox.push(source, Self::status(&atoms, source, window, false, NONE));
            return;
        };

        tracing::trace!(
            source = format_args!("0x{source:x}"),
            version = session.version,
            x = position.x,
            y = position.y,
            "xdnd position"
        );
        let accepted = peer.handle_drag_move(&DragEvent {
            position,
            files: session.files,
            payload: None,
        }) && session.mime != NONE;
        let action = if !accepted {
            NONE
        } else if requested != NONE && atoms.allowed_actions.contains(&requested) {
            requested
        } else {
            atoms.xdnd_action_copy
        };

        if let Some(session) = self.state().drag_target.tracking(source) {
            session.accepted = accepted;
            session.action = action;
            session.position = position;
        }
        self.outbox.push(source, Self::status(&atoms, source, window, accepted, action));
    }

    fn status(atoms: &Atoms, source: Window, target: Window, accepted: bool, action: Atom) -> ClientMessage {
        ClientMessage {
            window: source,
            type_: atoms.xdnd_status,
            data: [target, u32::from(accepted), 0, 0, action],
        }
    }

    fn drag_leave(&self, source: Window) {
        let window = {
            let mut state = self.state();
            let Some(session) = state.drag_target.tracking(source) else {
                return;
            };
            let window = session.window;
            state.drag_target = DragTarget::Idle;
            window
        };
        if let Some(peer) = self.peer_for(window) {
            peer.handle_drag_exit();
        }
    }

    fn drag_drop(&self, window: Window, data: [u32; 5]) {
        let Some(atoms) = self.atoms() else {
            return;
        };
        let source = data[0];
        let time: Timestamp = data[2];
        let session = {
            let mut state = self.state();
            match std::mem::take(&mut state.drag_target) {
                DragTarget::Tracking(session) if session.source == source => Some(session),
                other => {
                    tracing::debug!(
                        source = format_args!("0x{source:x}"),
                        state = other.name(),
                        "xdnd drop outside a session"
                    );
                    let stale = other.is_finished_for(source);
                    state.drag_target = other;
                    if stale {
                        return;
                    }
                    None
                }
            }
        };
        let guard = FinishGuard::new(self.outbox.sender(), atoms, source, window);
        let Some(session) = session else {
            // The guard rejects on drop.
            return;
        };

        if !session.accepted || session.mime == NONE {
            guard.complete(false, NONE);
            self.state().drag_target = DragTarget::Finished { source };
            if let Some(peer) = self.peer_for(session.window) {
                peer.handle_drag_exit();
            }
            return;
        }

        let requested = self.with_conn("xdnd_drop", |d, conn| {
            conn.convert_selection(
                window,
                d.atoms.xdnd_selection,
                session.mime,
                d.atoms.xdnd_selection,
                time,
            )?;
            conn.flush()
        });
        if requested.is_none() {
            // Guard rejects on drop.
            self.state().drag_target = DragTarget::Finished { source };
            return;
        }
        self.state().drag_target = DragTarget::Dropping { session, guard };
    }

    /// Payload for an accepted drop arrived. Returns false if `notify` is
    /// not about the Xdnd selection.
    pub(super) fn handle_drag_selection_notify(&self, notify: &SelectionNotify) -> bool {
        let Some(xdnd_selection) = self.atoms().map(|a| a.xdnd_selection) else {
            return false;
        };
        if notify.selection != xdnd_selection {
            return false;
        }

        let (session, guard) = {
            let mut state = self.state();
            match std::mem::take(&mut state.drag_target) {
                DragTarget::Dropping { session, guard } if session.window == notify.requestor => {
                    state.drag_target = DragTarget::Finished {
                        source: session.source,
                    };
                    (session, guard)
                }
                other => {
                    state.drag_target = other;
                    return true;
                }
            }
        };

        let body = if notify.property == NONE {
            None
        } else {
            self.with_conn("xdnd_selection", |_, conn| {
                let prop = XProperty::fetch_all(
                    conn,
                    notify.requestor,
                    notify.property,
                    true,
                    ANY_PROPERTY_TYPE,
                );
                Ok(prop.success.then(|| String::from_utf8_lossy(&prop.data).into_owned()))
            })
            .flatten()
        };

        let Some(peer) = self.peer_for(session.window) else {
            return true;
        };
        match body {
            Some(body) => {
                let payload = if session.files {
                    DragPayload::Files(parse_uri_list(&body))
                } else {
                    DragPayload::Text(body)
                };
                let accepted = peer.handle_drag_drop(&DragEvent {
                    position: session.position,
                    files: session.files,
                    payload: Some(payload),
                });
                guard.complete(accepted, session.action);
            }
            None => {
                peer.handle_drag_exit();
                drop(guard);
            }
        }
        self.flush_outbox();
        true
    }

    /// Start dragging text out of `window`. `completion` runs once the
    /// drag ends, whatever the outcome.
    pub fn external_drag_text_init(
        &self,
        window: Window,
        text: &str,
        completion: impl FnOnce() + Send + 'static,
    ) -> bool {
        self.start_drag(window, DragPayload::Text(text.to_string()), false, Box::new(completion))
    }

    /// Start dragging `files` out of `window`.
    pub fn external_drag_file_init(
        &self,
        window: Window,
        files: Vec<String>,
        can_move: bool,
        completion: impl FnOnce() + Send + 'static,
    ) -> bool {
        self.start_drag(window, DragPayload::Files(files), can_move, Box::new(completion))
    }

    fn start_drag(
        &self,
        window: Window,
        payload: DragPayload,
        can_move: bool,
        completion: Box<dyn FnOnce() + Send>,
    ) -> bool {
        if !self.state().windows.contains_key(&window) {
            return false;
        }

        let Some((types, action)) = self.with_conn("start_drag", |d, conn| {
            let atoms = &d.atoms;
            let types = if payload.is_files() {
                vec![atoms.uri_list, atoms.utf8_string, predefined::STRING]
            } else {
                vec![atoms.utf8_string, atoms.allowed_mime_types[1], predefined::STRING]
            };
            conn.set_selection_owner(atoms.xdnd_selection, window, CURRENT_TIME)?;
            if conn.selection_owner(atoms.xdnd_selection)? != window {
                return Err(XError::BadWindow(window));
            }
            conn.change_property(
                window,
                atoms.xdnd_type_list,
                predefined::ATOM,
                32,
                &u32_bytes(&types),
            )?;
            conn.flush()?;
            let action = if can_move {
                atoms.allowed_actions[0]
            } else {
                atoms.xdnd_action_copy
            };
            Ok((types, action))
        }) else {
            return false;
        };

        let previous = self.state().drag_source.replace(DragSource {
            window,
            payload,
            types,
            action,
            state: SourceState::Armed,
            completion: Some(completion),
        });
        if let Some(previous) = previous {
            tracing::warn!(
                window = format_args!("0x{:x}", previous.window),
                "outbound drag replaced before it finished"
            );
            self.abandon_source(&previous);
            previous.finish();
        }
        true
    }

    /// Tell the current target, if any, that the drag is gone.
    fn abandon_source(&self, source: &DragSource) {
        let Some(atoms) = self.atoms() else {
            return;
        };
        if let SourceState::Tracking { target, .. } = source.state {
            self.outbox.push(target, Self::leave(atoms, source.window, target));
        }
        self.flush_outbox();
    }

    fn leave(atoms: &Atoms, source: Window, target: Window) -> ClientMessage {
        ClientMessage {
            window: target,
            type_: atoms.xdnd_leave,
            data: [source, 0, 0, 0, 0],
        }
    }

    /// Topmost Xdnd-aware window under the root position.
    fn find_drop_target(&self, root_x: i32, root_y: i32) -> Window {
        self.with_conn("find_drop_target", |d, conn| {
            let root = d.screen.root;
            let mut current = root;
            for _ in 0..MAX_TARGET_DEPTH {
                let (_, _, child) = conn.translate_coordinates(root, current, root_x, root_y)?;
                if child == NONE {
                    break;
                }
                let aware =
                    XProperty::fetch(conn, child, d.atoms.xdnd_aware, 0, 1, false, predefined::ATOM);
                if aware.first_u32().is_some_and(|v| v >= 3) {
                    return Ok(child);
                }
                current = child;
            }
            Ok(NONE)
        })
        .unwrap_or(NONE)
    }

    /// Pointer motion while an outbound drag is live. Returns true if the
    /// event belonged to the drag.
    pub(super) fn drag_source_motion(
        &self,
        window: Window,
        root_x: i32,
        root_y: i32,
        time: Timestamp,
    ) -> bool {
        let Some(atoms) = self.atoms() else {
            return false;
        };
        let current = {
            let state = self.state();
            match &state.drag_source {
                Some(source) if source.window == window => source.state,
                _ => return false,
            }
        };
        if matches!(current, SourceState::Dropped { .. }) {
            return true;
        }

        let target = self.find_drop_target(root_x, root_y);
        let mut state = self.state();
        let Some(source) = state.drag_source.as_mut() else {
            return true;
        };

        let position = ClientMessage {
            window: target,
            type_: atoms.xdnd_position,
            data: [
                window,
                0,
                ((root_x as u32 & 0xffff) << 16) | (root_y as u32 & 0xffff),
                time,
                source.action,
            ],
        };

        match source.state {
            SourceState::Tracking { target: old, .. } if old == target => {
                self.outbox.push(target, position);
            }
            previous => {
                if let SourceState::Tracking { target: old, .. } = previous {
                    self.outbox.push(old, Self::leave(atoms, window, old));
                }
                if target == NONE {
                    source.state = SourceState::Armed;
                } else {
                    let more_types = u32::from(source.types.len() > 3);
                    let mut enter = [window, (XDND_VERSION << 24) | more_types, 0, 0, 0];
                    for (slot, ty) in enter[2..].iter_mut().zip(&source.types) {
                        *slot = *ty;
                    }
                    self.outbox.push(
                        target,
                        ClientMessage {
                            window: target,
                            type_: atoms.xdnd_enter,
                            data: enter,
                        },
                    );
                    self.outbox.push(target, position);
                    source.state = SourceState::Tracking {
                        target,
                        accepted: false,
                        action: NONE,
                    };
                }
            }
        }
        drop(state);
        self.flush_outbox();
        true
    }

    /// Button released while an outbound drag is live.
    pub(super) fn drag_source_release(&self, window: Window, time: Timestamp) -> bool {
        let Some(atoms) = self.atoms() else {
            return false;
        };
        let finished = {
            let mut state = self.state();
            let Some(source) = state.drag_source.as_mut().filter(|s| s.window == window) else {
                return false;
            };
            match source.state {
                SourceState::Tracking {
                    target,
                    accepted: true,
                    action,
                } => {
                    tracing::debug!(
                        drop_target = format_args!("0x{target:x}"),
                        action,
                        "xdnd drop sent"
                    );
                    self.outbox.push(
                        target,
                        ClientMessage {
                            window: target,
                            type_: atoms.xdnd_drop,
                            data: [window, 0, time, 0, 0],
                        },
                    );
                    source.state = SourceState::Dropped { target };
                    None
                }
                SourceState::Tracking { target, .. } => {
                    self.outbox.push(target, Self::leave(atoms, window, target));
                    state.drag_source.take()
                }
                SourceState::Armed => state.drag_source.take(),
                SourceState::Dropped { .. } => None,
            }
        };
        self.flush_outbox();
        if let Some(source) = finished {
            source.finish();
        }
        true
    }

    fn drag_source_status(&self, data: [u32; 5]) {
        let mut state = self.state();
        let Some(source) = state.drag_source.as_mut() else {
            return;
        };
        match &mut source.state {
            SourceState::Tracking {
                target,
                accepted,
                action,
            } if *target == data[0] => {
                *accepted = data[1] & 1 != 0;
                *action = data[4];
            }
            _ => tracing::trace!(drop_target = format_args!("0x{:x}", data[0]), "stale xdnd status"),
        }
    }

    fn drag_source_finished(&self, target: Window) {
        let finished = {
            let mut state = self.state();
            state.drag_source.take_if(|source| {
                matches!(source.state, SourceState::Dropped { target: t } if t == target)
            })
        };
        match finished {
            Some(source) => {
                self.with_conn("xdnd_finished", |d, conn| {
                    conn.set_selection_owner(
                        d.atoms.xdnd_selection,
                        NONE,
                        CURRENT_TIME,
                    )
                });
                source.finish();
            }
            None => tracing::trace!(drop_target = format_args!("0x{target:x}"), "stale xdnd finished"),
        }
    }

    /// Payload of the live outbound drag from `owner`, asking its peer
    /// first.
    pub(super) fn outbound_drag_payload(&self, owner: Window) -> Option<DragPayload> {
        let stored = {
            let state = self.state();
            let source = state.drag_source.as_ref().filter(|s| s.window == owner)?;
            source.payload.clone()
        };
        let provided = self.peer_for(owner).and_then(|peer| peer.provide_drag_payload());
        Some(provided.unwrap_or(stored))
    }

    /// Whether an outbound drag is in progress.
    pub fn is_dragging(&self) -> bool {
        self.state().drag_source.is_some()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::super::testing::{Call, RecordingPeer, system, window, window_with};
    use super::*;
    use crate::geometry::Rect;
    use crate::protocol::fake::{FakeServer, ROOT, Sent};
    use crate::protocol::Geometry;

    const SOURCE: Window = 0x7000;

    fn atoms(system: &WindowSystem<FakeServer>) -> Atoms {
        system.atoms().unwrap().clone()
    }

    fn shown_window(
        system: &WindowSystem<FakeServer>,
        peer: RecordingPeer,
    ) -> (Window, Arc<RecordingPeer>) {
        let (w, peer) = window_with(system, peer);
        system.set_bounds(w, Rect::new(100, 100, 200, 200), false);
        system.set_visible(w, true);
        (w, peer)
    }

    fn send(system: &WindowSystem<FakeServer>, window: Window, type_: Atom, data: [u32; 5]) {
        assert!(system.handle_drag_message(window, type_, data));
    }

    fn enter(system: &WindowSystem<FakeServer>, w: Window, offered: Atom) {
        let a = atoms(system);
        send(system, w, a.xdnd_enter, [SOURCE, 3 << 24, offered, 0, 0]);
    }

    fn position(system: &WindowSystem<FakeServer>, w: Window, x: u32, y: u32) {
        let a = atoms(system);
        send(system, w, a.xdnd_position, [SOURCE, 0, (x << 16) | y, 0, a.xdnd_action_copy]);
    }

    fn drop_at(system: &WindowSystem<FakeServer>, w: Window) {
        let a = atoms(system);
        send(system, w, a.xdnd_drop, [SOURCE, 0, 1234, 0, 0]);
    }

    fn finished_messages(server: &FakeServer, system: &WindowSystem<FakeServer>) -> Vec<ClientMessage> {
        let finished = atoms(system).xdnd_finished;
        server
            .client_messages()
            .into_iter()
            .filter(|(dest, m)| *dest == SOURCE && m.type_ == finished)
            .map(|(_, m)| m)
            .collect()
    }

    fn deliver_payload(server: &FakeServer, system: &WindowSystem<FakeServer>, w: Window, body: &[u8]) {
        let a = atoms(system);
        server.set_property(w, a.xdnd_selection, a.utf8_string, 8, body);
        assert!(system.handle_drag_selection_notify(&SelectionNotify {
            time: 0,
            requestor: w,
            selection: a.xdnd_selection,
            target: a.utf8_string,
            property: a.xdnd_selection,
        }));
    }

    // -- Helpers --

    #[test]
    fn uri_list_parsing() {
        let body = "# comment\r\nfile:///home/me/a%20b.txt\r\nfile://host/tmp/x\r\n\r\n/plain\n";
        assert_eq!(
            parse_uri_list(body),
            vec!["/home/me/a b.txt", "/tmp/x", "/plain"]
        );
    }

    #[test]
    fn uri_list_encoding_escapes() {
        assert_eq!(
            uri_list_body(&["/a b/ü".to_string()]),
            "file:///a%20b/%C3%BC\r\n"
        );
        assert_eq!(parse_uri_list(&uri_list_body(&["/a b/ü".to_string()])), vec!["/a b/ü"]);
    }

    #[test]
    fn finish_guard_completes_or_rejects() {
        let (server, system) = system();
        let a = atoms(&system);
        let guard = FinishGuard::new(system.outbox.sender(), &a, SOURCE, 1);
        guard.complete(true, a.xdnd_action_copy);
        let guard = FinishGuard::new(system.outbox.sender(), &a, SOURCE, 1);
        drop(guard);
        system.flush_outbox();

        let finished = finished_messages(&server, &system);
        assert_eq!(finished.len(), 2);
        assert_eq!(finished[0].data[1..3], [1, a.xdnd_action_copy]);
        assert_eq!(finished[1].data[1..3], [0, NONE]);
    }

    // -- Inbound --

    #[test]
    fn accepted_drop_delivers_text_and_finishes_once() {
        let (server, system) = system();
        let (w, peer) = shown_window(&system, RecordingPeer::default());
        let a = atoms(&system);

        enter(&system, w, a.utf8_string);
        position(&system, w, 150, 160);
        let status = server
            .client_messages()
            .into_iter()
            .find(|(_, m)| m.type_ == a.xdnd_status)
            .unwrap()
            .1;
        assert_eq!(status.data[0], w);
        assert_eq!(status.data[1] & 1, 1);
        assert_eq!(status.data[4], a.xdnd_action_copy);

        drop_at(&system, w);
        assert!(server.take_sent().iter().any(|s| matches!(s,
            Sent::ConvertSelection { requestor, target, .. } if *requestor == w && *target == a.utf8_string)));
        assert!(finished_messages(&server, &system).is_empty());

        deliver_payload(&server, &system, w, b"hello");
        let finished = finished_messages(&server, &system);
        assert_eq!(finished.len(), 1);
        assert_eq!(finished[0].data, [w, 1, a.xdnd_action_copy, 0, 0]);

        let calls = peer.calls();
        assert!(calls.contains(&Call::DragMove(DragEvent {
            position: Point::new(50, 60),
            files: false,
            payload: None,
        })));
        assert!(calls.contains(&Call::DragDrop(DragEvent {
            position: Point::new(50, 60),
            files: false,
            payload: Some(DragPayload::Text("hello".into())),
        })));
        // Property was consumed.
        assert!(server.property(w, a.xdnd_selection).is_none());
    }

    #[test]
    fn rejected_drop_still_finishes_once() {
        let (server, system) = system();
        let (w, peer) = shown_window(
            &system,
            RecordingPeer {
                accept_drags: false,
                ..RecordingPeer::default()
            },
        );
        let a = atoms(&system);

        enter(&system, w, a.utf8_string);
        position(&system, w, 150, 150);
        drop_at(&system, w);

        let finished = finished_messages(&server, &system);
        assert_eq!(finished.len(), 1);
        assert_eq!(finished[0].data[1], 0);
        assert_eq!(finished[0].data[2], NONE);
        assert!(peer.calls().contains(&Call::DragExit));
        assert!(matches!(system.state().drag_target, DragTarget::Finished { source } if source == SOURCE));
    }

    #[test]
    fn unsupported_type_is_never_accepted() {
        let (server, system) = system();
        let (w, _peer) = shown_window(&system, RecordingPeer::default());
        let image = server.atom("image/png");

        enter(&system, w, image);
        position(&system, w, 150, 150);
        let (_, status) = server.client_messages()[0];
        assert_eq!(status.data[1], 0);
        assert_eq!(status.data[4], NONE);

        drop_at(&system, w);
        assert_eq!(finished_messages(&server, &system).len(), 1);
        assert!(!server.take_sent().iter().any(|s| matches!(s, Sent::ConvertSelection { .. })));
    }

    #[test]
    fn refused_conversion_rejects() {
        let (server, system) = system();
        let (w, peer) = shown_window(&system, RecordingPeer::default());
        let a = atoms(&system);
        enter(&system, w, a.utf8_string);
        position(&system, w, 150, 150);
        drop_at(&system, w);

        assert!(system.handle_drag_selection_notify(&SelectionNotify {
            time: 0,
            requestor: w,
            selection: a.xdnd_selection,
            target: a.utf8_string,
            property: NONE,
        }));
        let finished = finished_messages(&server, &system);
        assert_eq!(finished.len(), 1);
        assert_eq!(finished[0].data[1], 0);
        assert_eq!(peer.calls().last(), Some(&Call::DragExit));
    }

    #[test]
    fn file_drop_decodes_uri_list() {
        let (server, system) = system();
        let (w, peer) = shown_window(&system, RecordingPeer::default());
        let a = atoms(&system);
        enter(&system, w, a.uri_list);
        position(&system, w, 110, 110);
        drop_at(&system, w);
        deliver_payload(&server, &system, w, b"file:///tmp/one.txt\r\nfile:///tmp/two%21\r\n");

        assert!(peer.calls().contains(&Call::DragDrop(DragEvent {
            position: Point::new(10, 10),
            files: true,
            payload: Some(DragPayload::Files(vec![
                "/tmp/one.txt".into(),
                "/tmp/two!".into()
            ])),
        })));
    }

    #[test]
    fn file_list_preferred_over_text_in_mixed_offer() {
        let (server, system) = system();
        let (w, peer) = shown_window(&system, RecordingPeer::default());
        let a = atoms(&system);
        send(&system, w, a.xdnd_enter, [SOURCE, 5 << 24, a.utf8_string, a.uri_list, 0]);
        position(&system, w, 110, 110);
        drop_at(&system, w);

        let targets: Vec<Atom> = server
            .take_sent()
            .into_iter()
            .filter_map(|s| match s {
                Sent::ConvertSelection { target, .. } => Some(target),
                _ => None,
            })
            .collect();
        assert_eq!(targets, vec![a.uri_list]);

        deliver_payload(&server, &system, w, b"file:///tmp/one.txt\r\n");
        assert!(peer.calls().contains(&Call::DragDrop(DragEvent {
            position: Point::new(10, 10),
            files: true,
            payload: Some(DragPayload::Files(vec!["/tmp/one.txt".into()])),
        })));
    }

    #[test]
    fn type_list_property_is_read_when_flagged() {
        let (server, system) = system();
        let (w, _peer) = shown_window(&system, RecordingPeer::default());
        let a = atoms(&system);
        let source = server.foreign_window(ROOT, Geometry::default());
        let extra = [server.atom("image/png"), server.atom("text/html"), server.atom("x-a"), a.uri_list];
        server.set_property(source, a.xdnd_type_list, predefined::ATOM, 32, &u32_bytes(&extra));

        send(&system, w, a.xdnd_enter, [source, (3 << 24) | 1, 0, 0, 0]);
        match &system.state().drag_target {
            DragTarget::Tracking(session) => {
                assert_eq!(session.mime, a.uri_list);
                assert!(session.files);
                assert_eq!(session.version, 3);
            }
            _ => panic!("expected tracking"),
        }
    }

    #[test]
    fn position_outside_window_exits() {
        let (server, system) = system();
        let (w, peer) = shown_window(&system, RecordingPeer::default());
        let a = atoms(&system);
        enter(&system, w, a.utf8_string);
        position(&system, w, 10, 10);

        assert_eq!(peer.calls(), vec![Call::DragExit]);
        assert!(matches!(system.state().drag_target, DragTarget::Idle));
        let (_, status) = server.client_messages()[0];
        assert_eq!(status.data[1], 0);
    }

    #[test]
    fn leave_returns_to_idle() {
        let (_server, system) = system();
        let (w, peer) = shown_window(&system, RecordingPeer::default());
        let a = atoms(&system);
        enter(&system, w, a.utf8_string);
        send(&system, w, a.xdnd_leave, [SOURCE, 0, 0, 0, 0]);
        assert!(matches!(system.state().drag_target, DragTarget::Idle));
        assert_eq!(peer.calls(), vec![Call::DragExit]);
    }

    #[test]
    fn late_events_after_finish_are_ignored() {
        let (server, system) = system();
        let (w, peer) = shown_window(&system, RecordingPeer::default());
        let a = atoms(&system);
        enter(&system, w, a.utf8_string);
        position(&system, w, 150, 150);
        drop_at(&system, w);
        deliver_payload(&server, &system, w, b"x");
        server.take_sent();
        peer.take_calls();

        position(&system, w, 150, 150);
        send(&system, w, a.xdnd_leave, [SOURCE, 0, 0, 0, 0]);
        drop_at(&system, w);

        assert!(server.take_sent().is_empty());
        assert!(peer.calls().is_empty());
        assert!(matches!(system.state().drag_target, DragTarget::Finished { source } if source == SOURCE));
    }

    #[test]
    fn drop_without_session_is_rejected() {
        let (server, system) = system();
        let (w, _peer) = shown_window(&system, RecordingPeer::default());
        drop_at(&system, w);
        let finished = finished_messages(&server, &system);
        assert_eq!(finished.len(), 1);
        assert_eq!(finished[0].data[1], 0);
    }

    #[test]
    fn destroying_window_mid_drop_rejects() {
        let (server, system) = system();
        let (w, _peer) = shown_window(&system, RecordingPeer::default());
        let a = atoms(&system);
        enter(&system, w, a.utf8_string);
        position(&system, w, 150, 150);
        drop_at(&system, w);
        system.destroy_window(w);

        let finished = finished_messages(&server, &system);
        assert_eq!(finished.len(), 1);
        assert_eq!(finished[0].data[1], 0);
    }

    // -- Outbound --

    fn drop_target(server: &FakeServer) -> Window {
        let target = server.foreign_window(
            ROOT,
            Geometry {
                x: 500,
                y: 500,
                width: 100,
                height: 100,
                border_width: 0,
            },
        );
        let aware = server.atom("XdndAware");
        server.set_property(target, aware, predefined::ATOM, 32, &u32_bytes(&[5]));
        target
    }

    fn counter() -> (Arc<AtomicUsize>, impl FnOnce() + Send + 'static) {
        let count = Arc::new(AtomicUsize::new(0));
        let inner = Arc::clone(&count);
        (count, move || {
            inner.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[test]
    fn outbound_drag_full_cycle() {
        let (server, system) = system();
        let (w, _peer) = window(&system);
        let target = drop_target(&server);
        let a = atoms(&system);
        let (done, completion) = counter();

        assert!(system.external_drag_text_init(w, "payload", completion));
        assert_eq!(server.state().selection_owners[&a.xdnd_selection], w);

        assert!(system.drag_source_motion(w, 520, 530, 1));
        let messages = server.client_messages();
        assert_eq!(messages[0].1.type_, a.xdnd_enter);
        assert_eq!(messages[0].1.data[0], w);
        assert_eq!(messages[0].1.data[1] >> 24, XDND_VERSION);
        assert_eq!(messages[0].1.data[2], a.utf8_string);
        assert_eq!(messages[1].1.type_, a.xdnd_position);
        assert_eq!(messages[1].1.data[2], (520 << 16) | 530);
        server.take_sent();

        send(&system, w, a.xdnd_status, [target, 1, 0, 0, a.xdnd_action_copy]);
        assert!(system.drag_source_release(w, 2));
        let (dest, dropped) = server.client_messages()[0];
        assert_eq!(dest, target);
        assert_eq!(dropped.type_, a.xdnd_drop);
        assert_eq!(done.load(Ordering::SeqCst), 0);

        send(&system, w, a.xdnd_finished, [target, 1, a.xdnd_action_copy, 0, 0]);
        assert_eq!(done.load(Ordering::SeqCst), 1);
        assert!(!system.is_dragging());

        // Late messages for the finished session change nothing.
        send(&system, w, a.xdnd_finished, [target, 1, 0, 0, 0]);
        send(&system, w, a.xdnd_status, [target, 1, 0, 0, 0]);
        assert_eq!(done.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn release_without_acceptance_leaves_target() {
        let (server, system) = system();
        let (w, _peer) = window(&system);
        let target = drop_target(&server);
        let a = atoms(&system);
        let (done, completion) = counter();

        system.external_drag_file_init(w, vec!["/tmp/f".into()], true, completion);
        system.drag_source_motion(w, 510, 510, 1);
        server.take_sent();
        system.drag_source_release(w, 2);

        let (dest, leave) = server.client_messages()[0];
        assert_eq!(dest, target);
        assert_eq!(leave.type_, a.xdnd_leave);
        assert_eq!(done.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn moving_off_target_sends_leave() {
        let (server, system) = system();
        let (w, _peer) = window(&system);
        let target = drop_target(&server);
        let a = atoms(&system);
        let (_done, completion) = counter();

        system.external_drag_text_init(w, "t", completion);
        system.drag_source_motion(w, 510, 510, 1);
        server.take_sent();
        system.drag_source_motion(w, 10, 10, 2);
        let messages = server.client_messages();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].0, target);
        assert_eq!(messages[0].1.type_, a.xdnd_leave);
    }

    #[test]
    fn new_drag_replaces_unfinished_one() {
        let (_server, system) = system();
        let (w, _peer) = window(&system);
        let (first, first_completion) = counter();
        let (second, second_completion) = counter();

        system.external_drag_text_init(w, "one", first_completion);
        system.external_drag_text_init(w, "two", second_completion);
        assert_eq!(first.load(Ordering::SeqCst), 1);
        assert_eq!(second.load(Ordering::SeqCst), 0);
        assert_eq!(
            system.outbound_drag_payload(w),
            Some(DragPayload::Text("two".into()))
        );
    }

    #[test]
    fn peer_payload_overrides_stored_one() {
        let (_server, system) = system();
        let (w, _peer) = window_with(
            &system,
            RecordingPeer {
                drag_payload: Some(DragPayload::Text("fresh".into())),
                ..RecordingPeer::default()
            },
        );
        system.external_drag_text_init(w, "stale", || {});
        assert_eq!(
            system.outbound_drag_payload(w),
            Some(DragPayload::Text("fresh".into()))
        );
    }

    #[test]
    fn drag_from_unknown_window_is_refused() {
        let (_server, system) = system();
        assert!(!system.external_drag_text_init(0xbad, "x", || {}));
        assert!(!system.is_dragging());
    }
}
