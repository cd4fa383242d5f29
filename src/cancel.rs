//! Cooperative cancellation shared by the receive and terminate paths.

use crossbeam_channel::{bounded, Receiver, Sender};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Cloneable cancellation signal.
///
/// Cancelling sets a flag and drops the only sender of an internal channel,
/// so every clone's [`signal`](CancelToken::signal) receiver becomes ready at
/// once. Blocking waits select on that receiver next to their real work.
#[derive(Clone)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
    trigger: Arc<Mutex<Option<Sender<()>>>>,
    signal: Receiver<()>,
}

impl CancelToken {
    pub fn new() -> Self {
        let (trigger, signal) = bounded(0);
        Self {
            cancelled: Arc::new(AtomicBool::new(false)),
            trigger: Arc::new(Mutex::new(Some(trigger))),
            signal,
        }
    }

    /// Request cancellation. Returns false if it was already requested.
    pub fn cancel(&self) -> bool {
        let first = !self.cancelled.swap(true, Ordering::SeqCst);
        self.trigger.lock().take();
        first
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Receiver that disconnects when cancellation is requested.
    /// Never yields a message.
    pub fn signal(&self) -> &Receiver<()> {
        &self.signal
    }

    /// Sleep for `timeout` unless cancelled first.
    /// Returns true if the wait was cut short by cancellation.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        if self.is_cancelled() {
            return true;
        }
        match self.signal.recv_timeout(timeout) {
            Err(crossbeam_channel::RecvTimeoutError::Timeout) => self.is_cancelled(),
            _ => true,
        }
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for CancelToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CancelToken")
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}
