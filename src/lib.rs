//! X11 window-system layer for a GUI toolkit.
//!
//! [`system::WindowSystem`] owns the display connection and every native
//! window created through it. Peers receive decoded input, focus, paint
//! and drag events; the facade keeps the per-window bookkeeping.

pub mod atoms;
pub mod event;
pub mod geometry;
pub mod lock;
pub mod peer;
pub mod property;
pub mod protocol;
pub mod settings;
pub mod system;
pub mod touch;

pub use protocol::XError;
pub use system::{SystemConfig, WindowSystem};
