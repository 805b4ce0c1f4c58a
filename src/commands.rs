//! Diagnostic subcommands built on the library facade.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::signal::unix::{SignalKind, signal as tokio_signal};
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender, unbounded_channel};

use xwinsys::atoms::AtomTable;
use xwinsys::event::spawn_event_thread;
use xwinsys::geometry::Rect;
use xwinsys::peer::{
    DragEvent, EmbedRequest, KeyEvent, MouseAction, MouseEvent, Peer, TouchEvent, TouchPhase,
    WindowStyle,
};
use xwinsys::protocol::NONE;
use xwinsys::settings::{SettingValue, SettingsListener, XSetting};
use xwinsys::{SystemConfig, WindowSystem, XError};

use crate::cli::ClipboardAction;

#[derive(Debug, thiserror::Error)]
pub enum CommandError {
    #[error(transparent)]
    X11(#[from] XError),
    #[error("no X11 display available")]
    Unavailable,
    #[error("no XSETTINGS daemon is running")]
    NoSettingsDaemon,
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

fn open(config: SystemConfig) -> Result<WindowSystem, CommandError> {
    let system = WindowSystem::connect(config)?;
    if !system.is_x11_available() {
        return Err(CommandError::Unavailable);
    }
    Ok(system)
}

fn describe(setting: &XSetting) -> String {
    match &setting.value {
        SettingValue::Integer(v) => v.to_string(),
        SettingValue::String(s) => format!("{s:?}"),
        SettingValue::Colour(c) => format!(
            "#{:02x}{:02x}{:02x}{:02x}",
            c.red, c.green, c.blue, c.alpha
        ),
        SettingValue::Invalid => "(invalid)".to_string(),
    }
}

pub fn probe(config: SystemConfig) -> Result<(), CommandError> {
    let system = open(config)?;
    if let Some(screen) = system.screen() {
        println!(
            "screen {}: {}x{} ({}x{} mm), depth {}",
            screen.screen_num,
            screen.width,
            screen.height,
            screen.width_mm,
            screen.height_mm,
            screen.root_depth
        );
    }
    println!("xsettings daemon:   {}", system.settings().is_some());
    println!("scaling factor:     {}", system.window_scaling_factor());
    println!("dark mode:          {}", system.is_dark_mode_active());
    println!("semi-transparency:  {}", system.can_use_semi_transparent_windows());
    println!("argb images:        {}", system.can_use_argb_images());
    for (i, display) in system.find_displays(1.0).iter().enumerate() {
        let Rect { x, y, width, height } = display.total_area;
        println!(
            "display {i}: {width}x{height}+{x}+{y}, {:.0} dpi, scale {}{}",
            display.dpi,
            display.scale,
            if display.is_main { ", main" } else { "" }
        );
    }
    Ok(())
}

struct PrintingListener;

impl SettingsListener for PrintingListener {
    fn setting_changed(&self, setting: &XSetting) {
        println!("{} = {}", setting.name, describe(setting));
    }
}

pub async fn settings(config: SystemConfig, watch: bool) -> Result<(), CommandError> {
    let system = open(config)?;
    let settings = system.settings().ok_or(CommandError::NoSettingsDaemon)?;

    let mut all = settings.all();
    all.sort_by(|a, b| a.name.cmp(&b.name));
    for setting in &all {
        println!("{} = {}", setting.name, describe(setting));
    }
    if !watch {
        return Ok(());
    }

    let token = settings.add_listener(Arc::new(PrintingListener));
    let (_keep, close_rx) = unbounded_channel();
    let result = event_loop(&system, close_rx).await;
    settings.remove_listener(token);
    result
}

pub fn atom(config: SystemConfig, names: &[String], create: bool) -> Result<(), CommandError> {
    let system = open(config)?;
    let shared = system.connection().ok_or(CommandError::Unavailable)?;
    let conn = shared.lock()?;
    let table = AtomTable::new();
    for name in names {
        let atom = if create {
            table.get_creating(&*conn, name)
        } else {
            table.get_if_exists(&*conn, name)
        };
        if atom == NONE {
            println!("{name}: (none)");
        } else {
            println!("{name}: {atom}");
        }
    }
    Ok(())
}

pub async fn clipboard(config: SystemConfig, action: ClipboardAction) -> Result<(), CommandError> {
    let system = open(config)?;
    match action {
        ClipboardAction::Get => {
            println!("{}", system.get_text_from_clipboard());
            Ok(())
        }
        ClipboardAction::Set { text, hold } => {
            system.copy_text_to_clipboard(&text);
            if !hold {
                tracing::warn!("selection is released on exit, use --hold to keep serving it");
                return Ok(());
            }
            let (_keep, close_rx) = unbounded_channel();
            event_loop(&system, close_rx).await
        }
    }
}

/// Logs everything the window system tells it.
struct LoggingPeer {
    style: WindowStyle,
    close: UnboundedSender<()>,
}

impl Peer for LoggingPeer {
    fn style(&self) -> WindowStyle {
        self.style
    }

    fn handle_moved_or_resized(&self, bounds: Rect) {
        tracing::info!(?bounds, "moved or resized");
    }

    fn handle_focus_gain(&self) {
        tracing::info!("focus gained");
    }

    fn handle_focus_loss(&self) {
        tracing::info!("focus lost");
    }

    fn handle_should_close(&self) {
        tracing::info!("close requested");
        let _ = self.close.send(());
    }

    fn handle_minimised_changed(&self, minimised: bool) {
        tracing::info!(minimised, "minimised state changed");
    }

    fn handle_key_down(&self, key: &KeyEvent) -> bool {
        tracing::info!(
            keycode = key.keycode,
            keysym = format_args!("0x{:x}", key.keysym),
            modifiers = key.modifiers.flags(),
            "key down"
        );
        false
    }

    fn handle_key_up(&self, key: &KeyEvent) -> bool {
        tracing::debug!(keycode = key.keycode, "key up");
        false
    }

    fn handle_mouse(&self, action: MouseAction, event: &MouseEvent) {
        match action {
            MouseAction::Move => tracing::trace!(position = ?event.position, "mouse move"),
            _ => tracing::info!(?action, position = ?event.position, "mouse"),
        }
    }

    fn handle_mouse_wheel(&self, event: &MouseEvent, delta_y: f32) {
        tracing::info!(delta_y, position = ?event.position, "wheel");
    }

    fn handle_touch(&self, phase: TouchPhase, touch: &TouchEvent) {
        tracing::info!(?phase, index = touch.index, x = touch.x, y = touch.y, "touch");
    }

    fn handle_paint_request(&self, area: Rect) {
        tracing::debug!(?area, "paint requested");
    }

    fn handle_focus_request(&self, request: EmbedRequest) {
        tracing::info!(?request, "embedder focus request");
    }

    fn handle_drag_move(&self, drag: &DragEvent) -> bool {
        tracing::debug!(position = ?drag.position, files = drag.files, "drag over");
        true
    }

    fn handle_drag_exit(&self) {
        tracing::info!("drag left");
    }

    fn handle_drag_drop(&self, drag: &DragEvent) -> bool {
        tracing::info!(payload = ?drag.payload, "dropped");
        true
    }
}

pub async fn window(config: SystemConfig, title: &str, transparent: bool) -> Result<(), CommandError> {
    let system = open(config)?;
    let (close_tx, close_rx) = unbounded_channel();
    let peer = Arc::new(LoggingPeer {
        style: WindowStyle {
            semi_transparent: transparent,
            ..WindowStyle::default()
        },
        close: close_tx,
    });

    let window = system.create_window(None, peer)?;
    system.set_title(window, title);
    system.set_bounds(window, Rect::new(100, 100, 480, 320), false);
    system.set_visible(window, true);
    tracing::info!(window = format_args!("0x{window:x}"), "window open");

    let result = event_loop(&system, close_rx).await;
    system.destroy_window(window);
    result
}

/// Dispatch display events until a signal arrives or `close` fires.
async fn event_loop(
    system: &WindowSystem,
    mut close: UnboundedReceiver<()>,
) -> Result<(), CommandError> {
    let conn = system.connection().ok_or(CommandError::Unavailable)?;
    let stop = Arc::new(AtomicBool::new(false));
    let (mut event_rx, event_thread) = spawn_event_thread(conn, Arc::clone(&stop))?;

    let mut sig_term = tokio_signal(SignalKind::terminate())?;
    let mut sig_int = tokio_signal(SignalKind::interrupt())?;

    loop {
        tokio::select! {
            event = event_rx.recv() => {
                let Some(event) = event else {
                    tracing::error!("X11 event thread exited");
                    break;
                };
                system.dispatch_event(&event);
            }

            Some(()) = close.recv() => {
                tracing::info!("window closed, shutting down");
                break;
            }

            _ = sig_term.recv() => {
                tracing::info!("received SIGTERM, shutting down");
                break;
            }

            _ = sig_int.recv() => {
                tracing::info!("received SIGINT, shutting down");
                break;
            }
        }
    }

    stop.store(true, Ordering::Relaxed);
    if event_thread.join().is_err() {
        tracing::warn!("X11 event thread panicked");
    }
    Ok(())
}
