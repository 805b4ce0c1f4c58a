//! Event dispatch: routes decoded [`XEvent`]s to the facade's own
//! bookkeeping and to the peer owning the target window.

use std::sync::Arc;

use crate::atoms::ProtocolItem;
use crate::event::{InputEvent, TouchInput, XEvent};
use crate::geometry::Point;
use crate::peer::{
    EmbedRequest, FocusTarget, KeyEvent, ModifierKeys, MouseAction, MouseButton, MouseEvent,
    TouchEvent, TouchPhase,
};
use crate::property::XProperty;
use crate::protocol::{ClientMessage, NONE, Window, XProtocol};

use super::WindowSystem;
use super::clipboard::SelectionRequest;
use super::window::WM_MESSAGE_MASK;

/// Wheel travel reported per click.
const WHEEL_STEP: f32 = 50.0 / 256.0;

const XEMBED_WINDOW_ACTIVATE: u32 = 1;
const XEMBED_WINDOW_DEACTIVATE: u32 = 2;
const XEMBED_FOCUS_IN: u32 = 4;
const XEMBED_FOCUS_OUT: u32 = 5;

fn focus_target(detail: u32) -> FocusTarget {
    match detail {
        1 => FocusTarget::First,
        2 => FocusTarget::Last,
        _ => FocusTarget::Current,
    }
}

fn mouse_event(input: &InputEvent, modifiers: ModifierKeys) -> MouseEvent {
    MouseEvent {
        position: Point::new(input.x, input.y),
        screen_position: Point::new(input.root_x, input.root_y),
        modifiers,
        time: input.time,
    }
}

impl<C: XProtocol> WindowSystem<C> {
    /// Handle one event from the event thread.
    pub fn dispatch_event(&self, event: &XEvent) {
        match *event {
            XEvent::KeyPress(input) => self.handle_key(&input, true),
            XEvent::KeyRelease(input) => self.handle_key(&input, false),
            XEvent::ButtonPress(input) => self.handle_button_press(&input),
            XEvent::ButtonRelease(input) => self.handle_button_release(&input),
            XEvent::Motion(input) => self.handle_motion(&input),
            XEvent::Enter { input, .. } => self.handle_crossing(&input, MouseAction::Enter, true),
            XEvent::Leave { input, normal } => {
                self.handle_crossing(&input, MouseAction::Exit, normal)
            }
            XEvent::FocusIn(window) => {
                if let Some(peer) = self.peer_for(window) {
                    peer.handle_focus_gain();
                }
            }
            XEvent::FocusOut(window) => {
                if let Some(peer) = self.peer_for(window) {
                    peer.handle_focus_loss();
                }
            }
            XEvent::Expose { window, area, .. } => {
                if let Some(peer) = self.peer_for(window) {
                    peer.handle_paint_request(area);
                }
            }
            XEvent::Configure {
                window,
                above_sibling,
                ..
            } => self.handle_configure(window, above_sibling),
            XEvent::Gravity { window } => self.handle_configure(window, NONE),
            XEvent::Reparent { window, .. } => {
                if let Some(record) = self.state().windows.get_mut(&window) {
                    record.border = None;
                }
                self.handle_configure(window, NONE);
            }
            XEvent::Map(window) => self.handle_map(window),
            XEvent::Unmap(window) | XEvent::Destroy(window) => {
                tracing::trace!(window = format_args!("0x{window:x}"), ?event, "ignored");
            }
            XEvent::Property {
                window,
                atom,
                deleted,
            } => self.handle_property(window, atom, deleted),
            XEvent::ClientMessage {
                window,
                type_,
                format,
                data,
            } => {
                if format == 32 {
                    self.handle_client_message(window, type_, data);
                }
            }
            XEvent::MappingNotify(kind) => self.handle_mapping_notify(kind),
            XEvent::SelectionRequest {
                time,
                owner,
                requestor,
                selection,
                target,
                property,
            } => self.handle_selection_request(&SelectionRequest {
                time,
                owner,
                requestor,
                selection,
                target,
                property,
            }),
            XEvent::SelectionNotify(notify) => {
                if !self.handle_drag_selection_notify(&notify) {
                    tracing::trace!(selection = notify.selection, "unsolicited SelectionNotify");
                }
            }
            XEvent::SelectionClear { owner, selection } => {
                self.handle_selection_clear(owner, selection)
            }
            XEvent::ShmCompletion { drawable } => self.process_pending_paints_for_window(drawable),
            XEvent::TouchBegin(touch) => self.handle_touch(&touch, TouchPhase::Begin),
            XEvent::TouchUpdate(touch) => self.handle_touch(&touch, TouchPhase::Update),
            XEvent::TouchEnd(touch) => self.handle_touch(&touch, TouchPhase::End),
        }
    }

    /// Translate a core state mask and remember it as the current
    /// modifiers.
    fn update_modifiers(
        &self,
        state: u16,
        adjust: impl FnOnce(ModifierKeys) -> ModifierKeys,
    ) -> ModifierKeys {
        let mut guard = self.state();
        let modifiers = adjust(guard.keyboard.modifiers_from_state(state));
        guard.modifiers = modifiers;
        modifiers
    }

    // -- Keyboard --

    fn handle_key(&self, input: &InputEvent, down: bool) {
        let Some(peer) = self.peer_for(input.window) else {
            return;
        };
        let key = {
            let mut state = self.state();
            let modifiers = state.keyboard.modifiers_from_state(input.state);
            state.modifiers = modifiers;
            let keysym = state.keyboard.keysym(input.detail, 0);
            let text_keysym = if modifiers.contains(ModifierKeys::SHIFT) {
                match state.keyboard.keysym(input.detail, 1) {
                    0 => keysym,
                    shifted => shifted,
                }
            } else {
                keysym
            };
            KeyEvent {
                keycode: input.detail,
                keysym,
                text_keysym,
                modifiers,
                time: input.time,
            }
        };
        let used = if down {
            peer.handle_key_down(&key)
        } else {
            peer.handle_key_up(&key)
        };
        tracing::trace!(keycode = key.keycode, keysym = key.keysym, down, used, "key");
    }

    // -- Pointer --

    fn handle_button_press(&self, input: &InputEvent) {
        let Some(peer) = self.peer_for(input.window) else {
            return;
        };
        let Some(button) = self.state().pointer_map.button(input.detail) else {
            return;
        };
        match button {
            MouseButton::WheelUp | MouseButton::WheelDown => {
                let modifiers = self.update_modifiers(input.state, |m| m);
                let delta = if button == MouseButton::WheelUp {
                    WHEEL_STEP
                } else {
                    -WHEEL_STEP
                };
                peer.handle_mouse_wheel(&mouse_event(input, modifiers), delta);
            }
            _ => {
                let modifiers =
                    self.update_modifiers(input.state, |m| m.with(button.modifier_flag()));
                peer.handle_mouse(MouseAction::Down(button), &mouse_event(input, modifiers));
            }
        }
    }

    fn handle_button_release(&self, input: &InputEvent) {
        if self.drag_source_release(input.window, input.time) {
            self.update_modifiers(input.state, |m| m.without(ModifierKeys::BUTTONS));
            return;
        }
        let Some(peer) = self.peer_for(input.window) else {
            return;
        };
        let Some(button) = self.state().pointer_map.button(input.detail) else {
            return;
        };
        if matches!(button, MouseButton::WheelUp | MouseButton::WheelDown) {
            return;
        }
        let modifiers = self.update_modifiers(input.state, |m| m.without(button.modifier_flag()));
        peer.handle_mouse(MouseAction::Up(button), &mouse_event(input, modifiers));
    }

    fn handle_motion(&self, input: &InputEvent) {
        if self.drag_source_motion(input.window, input.root_x, input.root_y, input.time) {
            return;
        }
        let Some(peer) = self.peer_for(input.window) else {
            return;
        };
        let modifiers = self.update_modifiers(input.state, |m| m);
        peer.handle_mouse(MouseAction::Move, &mouse_event(input, modifiers));
    }

    /// Enter and leave are swallowed while a button is held, so a drag
    /// that strays outside the window keeps its capture.
    fn handle_crossing(&self, input: &InputEvent, action: MouseAction, normal: bool) {
        let Some(peer) = self.peer_for(input.window) else {
            return;
        };
        let modifiers = self.update_modifiers(input.state, |m| m);
        if modifiers.any_button_down() || !normal {
            return;
        }
        peer.handle_mouse(action, &mouse_event(input, modifiers));
    }

    fn handle_touch(&self, touch: &TouchInput, phase: TouchPhase) {
        let Some(peer) = self.peer_for(touch.window) else {
            return;
        };
        let (slot, modifiers) = {
            let mut state = self.state();
            let slot = match phase {
                TouchPhase::Begin => state.touches.begin(touch.touch_id, touch.window),
                TouchPhase::Update => state.touches.slot(touch.touch_id),
                TouchPhase::End => state.touches.end(touch.touch_id),
            };
            (slot, state.keyboard.modifiers_from_state(touch.state))
        };
        let Some(index) = slot else {
            tracing::trace!(touch_id = touch.touch_id, ?phase, "touch without a slot");
            return;
        };
        peer.handle_touch(
            phase,
            &TouchEvent {
                index,
                x: touch.x,
                y: touch.y,
                modifiers,
                time: touch.time,
            },
        );
    }

    // -- Structure --

    /// Re-derive bounds after the window moved, resized or was reparented.
    fn handle_configure(&self, window: Window, above_sibling: Window) {
        let Some((peer, previous, border)) =
            self.record(window, |r| (Arc::clone(&r.peer), r.bounds, r.border))
        else {
            return;
        };

        let bounds = self.get_window_bounds(window);
        if border.is_none() {
            self.get_border_size(window);
        }
        if bounds != previous {
            peer.handle_moved_or_resized(bounds);
        }

        if above_sibling != NONE && peer.is_blocked_by_modal() && !self.is_front_window(window) {
            peer.dismiss_blocking_modals();
        }
    }

    fn handle_map(&self, window: Window) {
        let Some((peer, was_minimised)) = self.state().windows.get_mut(&window).map(|r| {
            let was = r.minimised;
            r.minimised = false;
            (Arc::clone(&r.peer), was)
        }) else {
            return;
        };
        if was_minimised {
            peer.handle_minimised_changed(false);
        }
    }

    fn handle_property(&self, window: Window, atom: u32, deleted: bool) {
        if let Some(settings) = self.settings()
            && window == settings.settings_window()
        {
            if atom == settings.settings_property() && !deleted {
                self.reload_settings();
            }
            return;
        }

        let Some(atoms) = self.atoms() else {
            return;
        };
        if atom == atoms.state || atom == atoms.window_state {
            self.refresh_minimised(window);
        } else if atom == atoms.frame_extents {
            self.get_border_size(window);
        }
    }

    fn refresh_minimised(&self, window: Window) {
        let Some(peer) = self.peer_for(window) else {
            return;
        };
        let minimised = self.is_minimised(window);
        let changed = self
            .state()
            .windows
            .get_mut(&window)
            .is_some_and(|r| std::mem::replace(&mut r.minimised, minimised) != minimised);
        if !changed {
            return;
        }
        peer.handle_minimised_changed(minimised);
        if minimised && peer.is_blocked_by_modal() {
            peer.dismiss_blocking_modals();
        }
    }

    /// Fetch the XSETTINGS blob under the connection lock, apply it after.
    fn reload_settings(&self) {
        let Some(settings) = self.settings() else {
            return;
        };
        let Some(prop) = self.with_conn("reload_settings", |_, conn| {
            Ok(XProperty::fetch_all(
                conn,
                settings.settings_window(),
                settings.settings_property(),
                false,
                settings.settings_property(),
            ))
        }) else {
            return;
        };
        if !prop.success || prop.actual_format != 8 {
            tracing::debug!("XSETTINGS property unavailable");
            return;
        }
        // Bad blobs are logged by `apply` and change nothing.
        let _ = settings.apply(&prop.data);
    }

    // -- Client messages --

    fn handle_client_message(&self, window: Window, type_: u32, data: [u32; 5]) {
        if self.handle_drag_message(window, type_, data) {
            return;
        }
        let Some(atoms) = self.atoms() else {
            return;
        };
        if type_ == atoms.protocols {
            let protocol = data[0];
            if protocol == atoms.protocol(ProtocolItem::Ping) {
                self.answer_ping(data);
            } else if protocol == atoms.protocol(ProtocolItem::TakeFocus) {
                self.take_focus(window, data[1]);
            } else if protocol == atoms.protocol(ProtocolItem::DeleteWindow) {
                if let Some(peer) = self.peer_for(window) {
                    peer.handle_should_close();
                }
            }
        } else if type_ == atoms.xembed_msg_type {
            self.handle_xembed(window, data);
        } else {
            tracing::trace!(
                window = format_args!("0x{window:x}"),
                type_,
                "unhandled client message"
            );
        }
    }

    /// Bounce `_NET_WM_PING` back to the root window.
    fn answer_ping(&self, data: [u32; 5]) {
        self.with_conn("answer_ping", |d, conn| {
            let root = d.screen.root;
            conn.send_client_message(
                root,
                WM_MESSAGE_MASK,
                &ClientMessage {
                    window: root,
                    type_: d.atoms.protocols,
                    data,
                },
            )?;
            conn.flush()
        });
    }

    fn take_focus(&self, window: Window, time: u32) {
        if self.peer_for(window).is_none() {
            return;
        }
        self.with_conn("take_focus", |_, conn| {
            if conn.window_attributes(window)?.viewable {
                conn.set_input_focus(window, time)?;
                conn.flush()?;
            }
            Ok(())
        });
    }

    fn handle_xembed(&self, window: Window, data: [u32; 5]) {
        let request = match data[1] {
            XEMBED_WINDOW_ACTIVATE => EmbedRequest::WindowActivate,
            XEMBED_WINDOW_DEACTIVATE => EmbedRequest::WindowDeactivate,
            XEMBED_FOCUS_IN => EmbedRequest::FocusIn(focus_target(data[2])),
            XEMBED_FOCUS_OUT => EmbedRequest::FocusOut,
            opcode => {
                tracing::trace!(opcode, "ignored XEmbed message");
                return;
            }
        };
        if let Some(peer) = self.peer_for(window) {
            peer.handle_focus_request(request);
        }
    }
}
