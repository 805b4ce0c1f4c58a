//! Event thread: polls the display socket and forwards decoded events.

use std::os::fd::BorrowedFd;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;
use std::time::Duration;

use nix::poll::{PollFd, PollFlags, PollTimeout, poll};
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender, unbounded_channel};

use super::XEvent;
use crate::lock::ConnectionLock;
use crate::protocol::XProtocol;

const POLL_INTERVAL_MS: u16 = 100;

/// Spawn a dedicated thread that reads events off the connection.
///
/// Uses `nix::poll()` on the connection fd with a 100ms timeout and drains
/// every queued event after each wakeup, including events x11rb buffered
/// while answering a request. Checks `stop` each iteration.
pub fn spawn_event_thread<C: XProtocol + 'static>(
    conn: Arc<ConnectionLock<C>>,
    stop: Arc<AtomicBool>,
) -> std::io::Result<(UnboundedReceiver<XEvent>, JoinHandle<()>)> {
    let (tx, rx) = unbounded_channel();

    let handle = std::thread::Builder::new()
        .name("x11-events".into())
        .spawn(move || {
            let raw_fd = match conn.lock() {
                Ok(c) => c.raw_fd(),
                Err(_) => return,
            };

            while !stop.load(Ordering::Relaxed) {
                match raw_fd {
                    Some(fd) => {
                        // SAFETY: fd is the connection socket, open while conn is alive.
                        let borrowed = unsafe { BorrowedFd::borrow_raw(fd) };
                        let mut fds = [PollFd::new(borrowed, PollFlags::POLLIN)];
                        match poll(&mut fds, PollTimeout::from(POLL_INTERVAL_MS)) {
                            Ok(_) | Err(nix::Error::EINTR) => {}
                            Err(e) => {
                                tracing::error!(error = %e, "poll error on X11 fd");
                                return;
                            }
                        }
                    }
                    None => std::thread::sleep(Duration::from_millis(u64::from(POLL_INTERVAL_MS))),
                }

                if !drain(&conn, &tx) {
                    return;
                }
            }
        })?;

    Ok((rx, handle))
}

/// Forward every queued event. Returns false when the thread should exit.
fn drain<C: XProtocol>(conn: &ConnectionLock<C>, tx: &UnboundedSender<XEvent>) -> bool {
    let Ok(conn) = conn.lock() else {
        return false;
    };
    loop {
        match conn.poll_event() {
            Ok(Some(event)) => {
                if let Some(event) = XEvent::decode(&event)
                    && tx.send(event).is_err()
                {
                    // Receiver dropped.
                    return false;
                }
            }
            Ok(None) => return true,
            Err(e) => {
                tracing::error!(error = %e, "X11 connection error");
                return false;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::fake::FakeServer;
    use x11rb::protocol::Event;
    use x11rb::protocol::xproto::{GravityNotifyEvent, MapNotifyEvent};

    #[test]
    fn forwards_decoded_events_and_stops() {
        let server = FakeServer::new();
        {
            let mut s = server.state();
            s.events.push_back(Event::MapNotify(MapNotifyEvent {
                window: 11,
                ..Default::default()
            }));
            s.events.push_back(Event::GravityNotify(GravityNotifyEvent {
                window: 12,
                ..Default::default()
            }));
        }

        let conn = Arc::new(ConnectionLock::new(server));
        let stop = Arc::new(AtomicBool::new(false));
        let (mut rx, handle) = spawn_event_thread(conn, Arc::clone(&stop)).unwrap();

        assert_eq!(rx.blocking_recv(), Some(XEvent::Map(11)));
        assert_eq!(rx.blocking_recv(), Some(XEvent::Gravity { window: 12 }));

        stop.store(true, Ordering::Relaxed);
        handle.join().unwrap();
        assert_eq!(rx.blocking_recv(), None);
    }

    #[test]
    fn exits_when_receiver_is_dropped() {
        let server = FakeServer::new();
        server.state().events.push_back(Event::MapNotify(MapNotifyEvent {
            window: 1,
            ..Default::default()
        }));
        let conn = Arc::new(ConnectionLock::new(server));
        let (rx, handle) = spawn_event_thread(conn, Arc::new(AtomicBool::new(false))).unwrap();
        drop(rx);
        handle.join().unwrap();
    }
}
