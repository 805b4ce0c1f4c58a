//! Scoped connection lock: serialises every request on the shared display
//! connection.
//!
//! The lock is not reentrant: a holder must pass the guarded connection
//! down to helpers instead of locking again.

use std::ops::Deref;
use std::sync::{Mutex, MutexGuard};

use crate::protocol::{XError, XProtocol};

/// Owner of the single display connection.
pub struct ConnectionLock<C> {
    conn: Mutex<C>,
}

/// Exclusive access to the connection for the guard's lifetime.
///
/// Acquired by [`ConnectionLock::lock`], released on drop.
pub struct ScopedXLock<'a, C> {
    guard: MutexGuard<'a, C>,
}

impl<C: XProtocol> ConnectionLock<C> {
    pub fn new(conn: C) -> Self {
        Self {
            conn: Mutex::new(conn),
        }
    }

    /// Acquire the connection.
    ///
    /// A poisoned lock means a previous holder panicked mid-request; the
    /// caller's operation is aborted with [`XError::LockPoisoned`].
    pub fn lock(&self) -> Result<ScopedXLock<'_, C>, XError> {
        match self.conn.lock() {
            Ok(guard) => Ok(ScopedXLock { guard }),
            Err(_) => {
                tracing::error!("display connection lock poisoned");
                Err(XError::LockPoisoned)
            }
        }
    }
}

impl<C> Deref for ScopedXLock<'_, C> {
    type Target = C;

    fn deref(&self) -> &C {
        &self.guard
    }
}
