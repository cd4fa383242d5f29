//! Explicit termination of a subscription.

use crate::identity::IdentityProvider;
use crate::session::types::{EndReason, SessionShared, SessionState};
use crate::transport::{RpcChannel, TransportAdapter};
use crate::types::TerminationOutcome;
use std::sync::Arc;

/// Ends a session's subscription at the server and reconciles local state.
///
/// Safe to use from any thread while the session is blocked in `recv`:
/// the session's cancellation signal unblocks the receiver, which then
/// reports `Delivery::Cancelled` rather than an error.
pub struct TerminationCoordinator<C: RpcChannel> {
    shared: Arc<SessionShared>,
    transport: Arc<TransportAdapter<C>>,
    identities: Arc<IdentityProvider>,
}

impl<C: RpcChannel> Clone for TerminationCoordinator<C> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
            transport: Arc::clone(&self.transport),
            identities: Arc::clone(&self.identities),
        }
    }
}

impl<C: RpcChannel> TerminationCoordinator<C> {
    pub(crate) fn new(
        shared: Arc<SessionShared>,
        transport: Arc<TransportAdapter<C>>,
        identities: Arc<IdentityProvider>,
    ) -> Self {
        Self {
            shared,
            transport,
            identities,
        }
    }

    /// Terminate the subscription.
    ///
    /// Reports `Skipped` without side effects when the session has no active
    /// identity, has already ended, or is already terminating. Otherwise the
    /// session moves to `Terminating`, its stream is cancelled, and the
    /// termination call is sent. The persisted identity is discarded only if
    /// the server confirms; the session ends either way.
    pub fn terminate(&self) -> TerminationOutcome {
        let identity = {
            let mut core = self.shared.core.lock();
            match core.state {
                SessionState::Ended => {
                    return TerminationOutcome::skipped("session already ended");
                }
                SessionState::Terminating => {
                    return TerminationOutcome::skipped("termination already in progress");
                }
                _ => {}
            }
            let Some(identity) = core.identity.clone() else {
                return TerminationOutcome::skipped("no active identity");
            };
            if let Err(err) = core.transition(SessionState::Terminating) {
                return TerminationOutcome::failed(err.to_string());
            }
            identity
        };

        self.shared.cancel.cancel();
        tracing::info!(identity = %identity, "terminating subscription");

        let mut outcome = self.transport.send_termination(&identity);
        if outcome.success() {
            if let Err(err) = self.identities.discard_identity() {
                tracing::warn!(
                    error = %err,
                    identity = %identity,
                    "terminated, but persisted identity could not be removed"
                );
                outcome = outcome.with_detail(format!("persisted identity not removed: {err}"));
            }
        } else {
            tracing::warn!(
                identity = %identity,
                detail = outcome.detail.as_deref().unwrap_or(""),
                "termination not confirmed, keeping identity"
            );
        }

        let mut core = self.shared.core.lock();
        if outcome.success() {
            core.identity = None;
        }
        core.finish(EndReason::Terminated(outcome.status));

        outcome
    }
}
