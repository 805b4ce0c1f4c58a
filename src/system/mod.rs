//! Window system facade: owns the display connection and every native
//! window created through it.
//!
//! One [`WindowSystem`] exists per process while a display is open. When
//! the display cannot be reached the facade still constructs, in disabled
//! mode: [`WindowSystem::is_x11_available`] is false and every operation is
//! a no-op returning a neutral value.
//!
//! Locking: the connection lock is always taken before the state lock, and
//! neither is held while a [`Peer`] callback runs.

mod clipboard;
mod cursor;
mod displays;
mod dnd;
mod handlers;
mod input;
mod paint;
mod visuals;
mod window;

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

pub use cursor::StandardCursor;
pub use displays::DisplayInfo;
pub use paint::{Image, ImageStorage};
pub use visuals::DisplayVisuals;

use crate::atoms::{AtomTable, Atoms};
use crate::geometry::{BorderSize, Point, Rect};
use crate::lock::ConnectionLock;
use crate::peer::{ModifierKeys, Peer, WindowStyle};
use crate::protocol::{
    Atom, Colormap, Extension, NONE, NewWindow, Pixmap, ScreenInfo, Window, X11Connection, XError,
    XProtocol, event_mask,
};
use crate::settings::{self, XSetting, XSettings};
use crate::touch::{DEFAULT_MAX_TOUCHES, TouchIdAllocator};

use dnd::{DragSource, DragTarget, Outbox};
use input::{KeyboardState, PointerMap};
use paint::PendingPaints;

/// Set while a connected [`WindowSystem`] is alive.
static INSTANCE_OPEN: AtomicBool = AtomicBool::new(false);

/// Runtime options for the window system.
#[derive(Debug, Clone)]
pub struct SystemConfig {
    /// Display name, `None` for `$DISPLAY`.
    pub display: Option<String>,
    /// Upper bound on waiting for another client's clipboard contents.
    pub clipboard_timeout: Duration,
    pub max_touches: usize,
}

impl Default for SystemConfig {
    fn default() -> Self {
        Self {
            display: None,
            clipboard_timeout: Duration::from_millis(400),
            max_touches: DEFAULT_MAX_TOUCHES,
        }
    }
}

/// Everything that only exists while a display is open.
struct Display<C> {
    conn: Arc<ConnectionLock<C>>,
    screen: ScreenInfo,
    atom_table: AtomTable,
    atoms: Atoms,
    visuals: DisplayVisuals,
    settings: Option<XSettings>,
    /// Hidden window owning our selections.
    message_window: Window,
    xinput: bool,
    shm: bool,
}

impl<C: XProtocol> Display<C> {
    fn atom(&self, conn: &C, name: &str) -> Atom {
        self.atom_table.get_creating(conn, name)
    }
}

/// Bookkeeping for one window created through the facade.
struct WindowRecord {
    peer: Arc<dyn Peer>,
    style: WindowStyle,
    /// `NONE` for top-level windows.
    parent: Window,
    colormap: Colormap,
    /// Last known bounds in screen coordinates.
    bounds: Rect,
    border: Option<BorderSize>,
    minimised: bool,
    fullscreen: bool,
}

struct SystemState {
    windows: HashMap<Window, WindowRecord>,
    /// Key proxy window to the window it forwards to.
    key_proxies: HashMap<Window, Window>,
    paints: PendingPaints,
    icon_pixmaps: HashMap<Window, Vec<Pixmap>>,
    touches: TouchIdAllocator,
    keyboard: KeyboardState,
    pointer_map: PointerMap,
    modifiers: ModifierKeys,
    clipboard: String,
    drag_target: DragTarget,
    drag_source: Option<DragSource>,
    parent_screen_position: Point,
}

impl SystemState {
    fn new(config: &SystemConfig) -> Self {
        Self {
            windows: HashMap::new(),
            key_proxies: HashMap::new(),
            paints: PendingPaints::default(),
            icon_pixmaps: HashMap::new(),
            touches: TouchIdAllocator::new(config.max_touches),
            keyboard: KeyboardState::default(),
            pointer_map: PointerMap::default(),
            modifiers: ModifierKeys::default(),
            clipboard: String::new(),
            drag_target: DragTarget::default(),
            drag_source: None,
            parent_screen_position: Point::default(),
        }
    }
}

pub struct WindowSystem<C: XProtocol = X11Connection> {
    config: SystemConfig,
    display: Option<Display<C>>,
    state: Mutex<SystemState>,
    outbox: Outbox,
    owns_instance: bool,
}

impl WindowSystem<X11Connection> {
    /// Open the display named in `config`.
    ///
    /// An unreachable display yields a disabled facade, not an error. Only
    /// a second live instance is refused.
    pub fn connect(config: SystemConfig) -> Result<Self, XError> {
        if INSTANCE_OPEN.swap(true, Ordering::AcqRel) {
            return Err(XError::AlreadyOpen);
        }

        match X11Connection::connect(config.display.as_deref()) {
            Ok(conn) => {
                let mut system = Self::from_protocol(conn, config);
                if system.is_x11_available() {
                    system.owns_instance = true;
                } else {
                    INSTANCE_OPEN.store(false, Ordering::Release);
                }
                Ok(system)
            }
            Err(e) => {
                INSTANCE_OPEN.store(false, Ordering::Release);
                tracing::warn!(error = %e, "X11 unavailable, window system disabled");
                Ok(Self::disabled(config))
            }
        }
    }
}

impl<C: XProtocol> WindowSystem<C> {
    /// Facade without a display.
    pub fn disabled(config: SystemConfig) -> Self {
        Self {
            state: Mutex::new(SystemState::new(&config)),
            config,
            display: None,
            outbox: Outbox::new(),
            owns_instance: false,
        }
    }

    /// Build the facade over an already open connection.
    pub fn from_protocol(conn: C, config: SystemConfig) -> Self {
        match Self::initialise(&conn) {
            Ok((parts, keyboard, pointer_map)) => {
                let mut state = SystemState::new(&config);
                state.keyboard = keyboard;
                state.pointer_map = pointer_map;
                let opened = Display {
                    conn: Arc::new(ConnectionLock::new(conn)),
                    screen: parts.screen,
                    atom_table: parts.atom_table,
                    atoms: parts.atoms,
                    visuals: parts.visuals,
                    settings: parts.settings,
                    message_window: parts.message_window,
                    xinput: parts.xinput,
                    shm: parts.shm,
                };
                tracing::info!(
                    screen = opened.screen.screen_num,
                    xinput = opened.xinput,
                    shm = opened.shm,
                    xsettings = opened.settings.is_some(),
                    "X11 display initialised"
                );
                Self {
                    config,
                    display: Some(opened),
                    state: Mutex::new(state),
                    outbox: Outbox::new(),
                    owns_instance: false,
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "X11 initialisation failed, window system disabled");
                Self::disabled(config)
            }
        }
    }

    fn initialise(conn: &C) -> Result<(InitParts, KeyboardState, PointerMap), XError> {
        let screen = conn.screen().clone();
        let visuals = DisplayVisuals::new(&screen);
        if !visuals.is_valid() {
            return Err(XError::MissingExtension("TrueColor visual"));
        }

        let atom_table = AtomTable::new();
        let atoms = Atoms::new(conn, &atom_table);

        let message_window = conn.create_window(&NewWindow {
            parent: screen.root,
            depth: 0,
            visual: 0,
            colormap: NONE,
            x: -100,
            y: -100,
            width: 1,
            height: 1,
            input_only: true,
            override_redirect: true,
            event_mask: event_mask::PROPERTY_CHANGE,
        })?;

        let settings = XSettings::create(conn, &atom_table);
        let keyboard = KeyboardState::load(conn);
        let pointer_map = PointerMap::load(conn);

        let parts = InitParts {
            xinput: conn.has_extension(Extension::XInput),
            shm: conn.has_extension(Extension::Shm),
            screen,
            atom_table,
            atoms,
            visuals,
            settings,
            message_window,
        };
        conn.flush()?;
        Ok((parts, keyboard, pointer_map))
    }

    pub fn is_x11_available(&self) -> bool {
        self.display.is_some()
    }

    pub fn config(&self) -> &SystemConfig {
        &self.config
    }

    /// Shared connection, for the event thread.
    pub fn connection(&self) -> Option<Arc<ConnectionLock<C>>> {
        self.display.as_ref().map(|d| Arc::clone(&d.conn))
    }

    pub fn atoms(&self) -> Option<&Atoms> {
        self.display.as_ref().map(|d| &d.atoms)
    }

    pub fn screen(&self) -> Option<&ScreenInfo> {
        self.display.as_ref().map(|d| &d.screen)
    }

    pub fn settings(&self) -> Option<&XSettings> {
        self.display.as_ref().and_then(|d| d.settings.as_ref())
    }

    /// Cached XSETTINGS value, or the invalid sentinel.
    pub fn get_setting(&self, name: &str) -> XSetting {
        self.settings()
            .map(|s| s.get_setting(name))
            .unwrap_or_else(|| XSetting::invalid(name))
    }

    /// The desktop scale factor, 1.0 when unset.
    pub fn window_scaling_factor(&self) -> f64 {
        match self.get_setting(settings::SCALING_FACTOR).as_integer() {
            Some(v) if v > 0 => f64::from(v),
            _ => 1.0,
        }
    }

    pub fn is_dark_mode_active(&self) -> bool {
        self.get_setting(settings::THEME_NAME)
            .as_str()
            .is_some_and(|theme| theme.to_ascii_lowercase().contains("-dark"))
    }

    /// Needs a 32-bit visual and a running compositing manager.
    pub fn can_use_semi_transparent_windows(&self) -> bool {
        self.with_conn("can_use_semi_transparent_windows", |d, conn| {
            if d.visuals.visual32.is_none() {
                return Ok(false);
            }
            let cm = d.atom(conn, &format!("_NET_WM_CM_S{}", d.screen.screen_num));
            Ok(cm != NONE && conn.selection_owner(cm)? != NONE)
        })
        .unwrap_or(false)
    }

    pub fn can_use_argb_images(&self) -> bool {
        self.display
            .as_ref()
            .is_some_and(|d| d.visuals.visual32.is_some() || d.screen.root_depth >= 24)
    }

    /// Run `f` with the connection locked. Failures are logged and turn
    /// into `None`, as does disabled mode.
    fn with_conn<R>(
        &self,
        op: &'static str,
        f: impl FnOnce(&Display<C>, &C) -> Result<R, XError>,
    ) -> Option<R> {
        let display = self.display.as_ref()?;
        let result = display.conn.lock().and_then(|conn| f(display, &conn));
        match result {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::warn!(op, error = %e, "X11 request failed");
                None
            }
        }
    }

    fn state(&self) -> MutexGuard<'_, SystemState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Peer owning `window`, following key proxies.
    fn peer_for(&self, window: Window) -> Option<Arc<dyn Peer>> {
        let state = self.state();
        let owner = state.key_proxies.get(&window).copied().unwrap_or(window);
        state.windows.get(&owner).map(|r| Arc::clone(&r.peer))
    }

    /// Windows currently managed by the facade.
    pub fn windows(&self) -> Vec<Window> {
        let mut windows: Vec<Window> = self.state().windows.keys().copied().collect();
        windows.sort_unstable();
        windows
    }
}

struct InitParts {
    screen: ScreenInfo,
    atom_table: AtomTable,
    atoms: Atoms,
    visuals: DisplayVisuals,
    settings: Option<XSettings>,
    message_window: Window,
    xinput: bool,
    shm: bool,
}

impl<C: XProtocol> Drop for WindowSystem<C> {
    fn drop(&mut self) {
        if let Some(display) = &self.display {
            for window in self.windows() {
                self.destroy_window(window);
            }
            if let Ok(conn) = display.conn.lock() {
                if let Err(e) = conn.destroy_window(display.message_window) {
                    tracing::debug!(error = %e, "destroying message window failed");
                }
                let _ = conn.flush();
            }
            tracing::debug!("X11 display closed");
        }
        if self.owns_instance {
            INSTANCE_OPEN.store(false, Ordering::Release);
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! Helpers shared by the facade's test modules.

    use std::sync::Mutex;

    use super::*;
    use crate::geometry::Rect;
    use crate::peer::{
        DragEvent, DragPayload, EmbedRequest, KeyEvent, MouseAction, MouseEvent, SizeConstraints,
        TouchEvent, TouchPhase,
    };
    use crate::protocol::fake::FakeServer;

    /// What a [`RecordingPeer`] was told.
    #[derive(Debug, Clone, PartialEq)]
    pub enum Call {
        MovedOrResized(Rect),
        FocusGain,
        FocusLoss,
        ShouldClose,
        Minimised(bool),
        KeyDown(KeyEvent),
        KeyUp(KeyEvent),
        Mouse(MouseAction, MouseEvent),
        Wheel(f32),
        Touch(TouchPhase, TouchEvent),
        Paint(Rect),
        Focus(EmbedRequest),
        DragMove(DragEvent),
        DragExit,
        DragDrop(DragEvent),
        DismissModals,
    }

    pub struct RecordingPeer {
        pub style: WindowStyle,
        pub constraints: SizeConstraints,
        pub accept_drags: bool,
        pub blocked_by_modal: bool,
        pub drag_payload: Option<DragPayload>,
        pub calls: Mutex<Vec<Call>>,
    }

    impl Default for RecordingPeer {
        fn default() -> Self {
            Self {
                style: WindowStyle::default(),
                constraints: SizeConstraints::default(),
                accept_drags: true,
                blocked_by_modal: false,
                drag_payload: None,
                calls: Mutex::new(Vec::new()),
            }
        }
    }

    impl RecordingPeer {
        pub fn calls(&self) -> Vec<Call> {
            self.calls.lock().unwrap().clone()
        }

        pub fn take_calls(&self) -> Vec<Call> {
            std::mem::take(&mut *self.calls.lock().unwrap())
        }

        fn push(&self, call: Call) {
            self.calls.lock().unwrap().push(call);
        }
    }

    impl Peer for RecordingPeer {
        fn style(&self) -> WindowStyle {
            self.style
        }
        fn size_constraints(&self) -> SizeConstraints {
            self.constraints
        }
        fn handle_moved_or_resized(&self, bounds: Rect) {
            self.push(Call::MovedOrResized(bounds));
        }
        fn handle_focus_gain(&self) {
            self.push(Call::FocusGain);
        }
        fn handle_focus_loss(&self) {
            self.push(Call::FocusLoss);
        }
        fn handle_should_close(&self) {
            self.push(Call::ShouldClose);
        }
        fn handle_minimised_changed(&self, minimised: bool) {
            self.push(Call::Minimised(minimised));
        }
        fn handle_key_down(&self, key: &KeyEvent) -> bool {
            self.push(Call::KeyDown(key.clone()));
            true
        }
        fn handle_key_up(&self, key: &KeyEvent) -> bool {
            self.push(Call::KeyUp(key.clone()));
            true
        }
        fn handle_mouse(&self, action: MouseAction, event: &MouseEvent) {
            self.push(Call::Mouse(action, *event));
        }
        fn handle_mouse_wheel(&self, _event: &MouseEvent, delta_y: f32) {
            self.push(Call::Wheel(delta_y));
        }
        fn handle_touch(&self, phase: TouchPhase, touch: &TouchEvent) {
            self.push(Call::Touch(phase, *touch));
        }
        fn handle_paint_request(&self, area: Rect) {
            self.push(Call::Paint(area));
        }
        fn handle_focus_request(&self, request: EmbedRequest) {
            self.push(Call::Focus(request));
        }
        fn handle_drag_move(&self, drag: &DragEvent) -> bool {
            self.push(Call::DragMove(drag.clone()));
            self.accept_drags
        }
        fn handle_drag_exit(&self) {
            self.push(Call::DragExit);
        }
        fn handle_drag_drop(&self, drag: &DragEvent) -> bool {
            self.push(Call::DragDrop(drag.clone()));
            self.accept_drags
        }
        fn provide_drag_payload(&self) -> Option<DragPayload> {
            self.drag_payload.clone()
        }
        fn is_blocked_by_modal(&self) -> bool {
            self.blocked_by_modal
        }
        fn dismiss_blocking_modals(&self) {
            self.push(Call::DismissModals);
        }
    }

    pub fn system() -> (FakeServer, WindowSystem<FakeServer>) {
        let server = FakeServer::new();
        let system = WindowSystem::from_protocol(server.clone(), SystemConfig::default());
        assert!(system.is_x11_available());
        server.take_sent();
        (server, system)
    }

    pub fn window_with(
        system: &WindowSystem<FakeServer>,
        peer: RecordingPeer,
    ) -> (Window, Arc<RecordingPeer>) {
        let peer = Arc::new(peer);
        let window = system
            .create_window(None, Arc::clone(&peer) as Arc<dyn Peer>)
            .unwrap();
        (window, peer)
    }

    pub fn window(system: &WindowSystem<FakeServer>) -> (Window, Arc<RecordingPeer>) {
        window_with(system, RecordingPeer::default())
    }
}
