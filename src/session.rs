//! Connection monitor.
//!
//! Tracks whether a session is established and fans connection-loss
//! notifications out to subscribed listeners. Listeners are held weakly, so
//! a dropped callee unsubscribes itself.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use crate::error::{CloseInfo, ConnectionLoss};

/// Receives connection-loss notifications.
pub trait ConnectionListener: Send + Sync {
    /// The session closed (GOODBYE, ABORT, transport EOF).
    fn connection_broken(&self, info: &CloseInfo);

    /// The transport or protocol failed.
    fn connection_error(&self, message: &str);
}

/// Session state shared between the transport and its listeners.
#[derive(Default)]
pub struct ConnectionMonitor {
    connected: AtomicBool,
    listeners: Mutex<Vec<Weak<dyn ConnectionListener>>>,
}

impl ConnectionMonitor {
    /// Create a monitor in the disconnected state.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Whether a session is currently established.
    #[inline]
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Subscribe a listener for connection-loss notifications.
    pub fn subscribe(&self, listener: Weak<dyn ConnectionListener>) {
        let mut listeners = self.listeners.lock();
        listeners.retain(|l| l.strong_count() > 0);
        listeners.push(listener);
    }

    /// Mark the session as established.
    pub fn set_connected(&self) {
        self.connected.store(true, Ordering::SeqCst);
    }

    /// Report that the session closed.
    ///
    /// The connected flag is cleared before listeners run.
    pub fn connection_broken(&self, info: CloseInfo) {
        self.notify(ConnectionLoss::Broken(info));
    }

    /// Report a transport or protocol failure.
    pub fn connection_error(&self, message: impl Into<String>) {
        self.notify(ConnectionLoss::Error(message.into()));
    }

    fn notify(&self, loss: ConnectionLoss) {
        self.connected.store(false, Ordering::SeqCst);

        // Listeners run without the lock held.
        let listeners: Vec<_> = self
            .listeners
            .lock()
            .iter()
            .filter_map(Weak::upgrade)
            .collect();

        tracing::debug!(listeners = listeners.len(), "{}", loss);

        for listener in listeners {
            match &loss {
                ConnectionLoss::Broken(info) => listener.connection_broken(info),
                ConnectionLoss::Error(message) => listener.connection_error(message),
            }
        }
    }
}
