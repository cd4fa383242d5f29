//! Session lifecycle types.

use crate::cancel::CancelToken;
use crate::error::{ClientError, FailureKind, Result};
use crate::retry::RetryPolicy;
use crate::types::{ConnectionIdentity, StreamRecord, TerminationStatus};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

/// Configuration for a subscription session.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Backoff for `Unavailable` failures.
    pub retry: RetryPolicy,

    /// Consecutive conflict-driven rotations before giving up.
    /// Default: 3
    pub max_identity_rotations: u32,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            max_identity_rotations: 3,
        }
    }
}

/// Lifecycle state of a session.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// No call issued yet.
    Idle,
    /// Identity obtained, stream-open call in flight.
    Subscribing,
    /// Records are being delivered.
    Streaming,
    /// Waiting out a backoff delay.
    Retrying,
    /// Termination requested; the stream is being torn down.
    Terminating,
    /// Terminal. Create a new session to subscribe again.
    Ended,
}

impl SessionState {
    /// Whether the lifecycle allows moving from `self` to `next`.
    pub fn can_transition_to(self, next: SessionState) -> bool {
        use SessionState::*;

        match (self, next) {
            (Ended, _) => false,
            (_, Ended) => true,
            (Terminating, _) => false,
            (_, Terminating) => true,
            (Idle, Subscribing) => true,
            (Subscribing, Subscribing | Streaming | Retrying) => true,
            (Streaming, Subscribing | Retrying) => true,
            (Retrying, Subscribing) => true,
            _ => false,
        }
    }

    /// A subscription attempt is underway.
    pub fn is_live(self) -> bool {
        matches!(
            self,
            SessionState::Subscribing | SessionState::Streaming | SessionState::Retrying
        )
    }
}

/// Why a session reached `Ended`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EndReason {
    /// Server closed the stream cleanly.
    Completed,
    /// Caller cancelled without terminating.
    Cancelled,
    /// Termination ran; carries its outcome.
    Terminated(TerminationStatus),
    /// A fatal error was surfaced to the caller.
    Failed(Option<FailureKind>),
}

/// What a call to `recv` produced.
#[derive(Clone, Debug, PartialEq)]
pub enum Delivery {
    /// Next record, in arrival order.
    Record(StreamRecord),
    /// The server ended the stream normally.
    Completed,
    /// The session was cancelled or terminated.
    Cancelled,
}

/// State shared between the receiving side and the terminating side.
pub(crate) struct SessionCore {
    pub(crate) state: SessionState,
    pub(crate) identity: Option<ConnectionIdentity>,
    pub(crate) retries: u32,
    pub(crate) rotations: u32,
    pub(crate) end: Option<EndReason>,
}

impl SessionCore {
    fn new() -> Self {
        Self {
            state: SessionState::Idle,
            identity: None,
            retries: 0,
            rotations: 0,
            end: None,
        }
    }

    pub(crate) fn transition(&mut self, next: SessionState) -> Result<()> {
        if !self.state.can_transition_to(next) {
            return Err(ClientError::InvalidTransition {
                from: self.state,
                to: next,
            });
        }
        tracing::debug!(from = ?self.state, to = ?next, "session transition");
        self.state = next;
        Ok(())
    }

    /// Move to `Ended` with `reason`. No-op once ended.
    pub(crate) fn finish(&mut self, reason: EndReason) {
        if self.state == SessionState::Ended {
            return;
        }
        tracing::debug!(from = ?self.state, reason = ?reason, "session ended");
        self.state = SessionState::Ended;
        self.end = Some(reason);
    }
}

/// The single synchronisation point of a session.
///
/// The lock covers state reads and writes only; it is never held across a
/// network call, a backoff wait or storage I/O.
pub(crate) struct SessionShared {
    pub(crate) core: Mutex<SessionCore>,
    pub(crate) cancel: CancelToken,
}

impl SessionShared {
    pub(crate) fn new() -> Self {
        Self {
            core: Mutex::new(SessionCore::new()),
            cancel: CancelToken::new(),
        }
    }
}
