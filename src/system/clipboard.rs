//! Text clipboard over the PRIMARY and CLIPBOARD selections.
//!
//! Copied text is kept locally and both selections are claimed for the
//! message window. Reads from our own selection are answered from the
//! local copy without a round trip.

use crate::property::{XProperty, u32_bytes};
use crate::protocol::{
    ANY_PROPERTY_TYPE, Atom, CURRENT_TIME, NONE, SelectionNotify, Timestamp, Window, XProtocol,
    predefined,
};

use super::WindowSystem;
use super::dnd::encode_payload;

/// Property our clipboard conversions are delivered into.
const TRANSFER_PROPERTY: &str = "XWINSYS_SEL";

/// A `SelectionRequest` addressed to one of our windows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct SelectionRequest {
    pub time: Timestamp,
    pub owner: Window,
    pub requestor: Window,
    pub selection: Atom,
    pub target: Atom,
    pub property: Atom,
}

impl<C: XProtocol> WindowSystem<C> {
    /// Put `text` on the clipboard.
    pub fn copy_text_to_clipboard(&self, text: &str) {
        self.state().clipboard = text.to_string();
        self.with_conn("copy_text_to_clipboard", |d, conn| {
            for selection in [predefined::PRIMARY, d.atoms.clipboard] {
                conn.set_selection_owner(selection, d.message_window, CURRENT_TIME)?;
            }
            conn.flush()
        });
    }

    /// Current clipboard text, or an empty string.
    ///
    /// Waits at most the configured clipboard timeout for another client
    /// to hand its selection over.
    pub fn get_text_from_clipboard(&self) -> String {
        let local = self.state().clipboard.clone();
        let timeout = self.config.clipboard_timeout;
        self.with_conn("get_text_from_clipboard", |d, conn| {
            let mut selection = predefined::PRIMARY;
            let mut owner = conn.selection_owner(selection)?;
            if owner == NONE {
                selection = d.atoms.clipboard;
                owner = conn.selection_owner(selection)?;
            }
            if owner == NONE {
                return Ok(String::new());
            }
            if owner == d.message_window {
                return Ok(local);
            }

            let property = d.atom(conn, TRANSFER_PROPERTY);
            for target in [d.atoms.utf8_string, predefined::STRING] {
                conn.convert_selection(d.message_window, selection, target, property, CURRENT_TIME)?;
                conn.flush()?;
                let Some(notify) = conn.wait_for_selection_notify(d.message_window, timeout)?
                else {
                    tracing::debug!(owner = format_args!("0x{owner:x}"), "clipboard owner timed out");
                    return Ok(String::new());
                };
                if notify.property == NONE {
                    continue;
                }
                let prop = XProperty::fetch_all(
                    conn,
                    d.message_window,
                    notify.property,
                    true,
                    ANY_PROPERTY_TYPE,
                );
                if let Some(text) = prop.as_string() {
                    return Ok(text);
                }
            }
            Ok(String::new())
        })
        .unwrap_or_default()
    }

    /// Serve a selection we own.
    pub(super) fn handle_selection_request(&self, request: &SelectionRequest) {
        let Some(atoms) = self.atoms() else {
            return;
        };
        // Obsolete clients leave the property unset.
        let property = if request.property == NONE {
            request.target
        } else {
            request.property
        };

        let reply: Option<(Atom, u8, Vec<u8>)> = if request.selection == atoms.xdnd_selection {
            self.outbound_drag_payload(request.owner).and_then(|payload| {
                if request.target == atoms.targets {
                    let targets = if payload.is_files() {
                        vec![atoms.targets, atoms.uri_list, atoms.utf8_string, predefined::STRING]
                    } else {
                        let mut t = vec![atoms.targets];
                        t.extend(atoms.text_targets());
                        t
                    };
                    Some((predefined::ATOM, 32, u32_bytes(&targets)))
                } else {
                    encode_payload(&payload, request.target, atoms)
                        .map(|bytes| (request.target, 8, bytes))
                }
            })
        } else if request.selection == predefined::PRIMARY || request.selection == atoms.clipboard
        {
            if request.target == atoms.targets {
                let mut targets = vec![atoms.targets];
                targets.extend(atoms.text_targets());
                Some((predefined::ATOM, 32, u32_bytes(&targets)))
            } else if atoms.is_text_target(request.target) {
                let text = self.state().clipboard.clone();
                Some((request.target, 8, text.into_bytes()))
            } else {
                None
            }
        } else {
            None
        };

        let refused = reply.is_none();
        self.with_conn("handle_selection_request", |_, conn| {
            let property = match reply {
                Some((type_, format, data)) => {
                    conn.change_property(request.requestor, property, type_, format, &data)?;
                    property
                }
                None => NONE,
            };
            conn.send_selection_notify(&SelectionNotify {
                time: request.time,
                requestor: request.requestor,
                selection: request.selection,
                target: request.target,
                property,
            })?;
            conn.flush()
        });
        if refused {
            tracing::debug!(
                selection = request.selection,
                requested = request.target,
                "selection request refused"
            );
        }
    }

    /// Another client took a selection from us.
    pub(super) fn handle_selection_clear(&self, owner: Window, selection: Atom) {
        tracing::debug!(
            owner = format_args!("0x{owner:x}"),
            selection,
            "selection ownership lost"
        );
    }
}
