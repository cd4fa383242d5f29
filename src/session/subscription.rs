//! The subscription session: drives one logical subscription through its
//! lifecycle and applies the failure policy.

use super::types::{Delivery, EndReason, SessionConfig, SessionShared, SessionState};
use crate::error::{ClientError, FailureKind, Result, TransportError};
use crate::identity::IdentityProvider;
use crate::retry::Backoff;
use crate::termination::TerminationCoordinator;
use crate::transport::{RecordStream, RpcChannel, TransportAdapter};
use crate::types::{ConnectionIdentity, StreamRecord, TerminationOutcome};
use std::sync::Arc;

/// Result of driving the session towards an open stream.
enum Flow {
    Open,
    Cancelled,
}

/// What the failure policy decided.
enum Recovery {
    Resubscribe(ConnectionIdentity),
    Cancelled,
}

/// One logical subscription.
///
/// The session is owned by the receiving side. Use [`handle`](Self::handle)
/// to cancel or terminate it from another thread while `recv` is blocked.
pub struct SubscriptionSession<C: RpcChannel> {
    shared: Arc<SessionShared>,
    transport: Arc<TransportAdapter<C>>,
    identities: Arc<IdentityProvider>,
    config: SessionConfig,
    backoff: Backoff,
    stream: Option<RecordStream>,
    /// The end of the session was already reported to the caller.
    end_reported: bool,
}

impl<C: RpcChannel> SubscriptionSession<C> {
    pub fn new(
        transport: Arc<TransportAdapter<C>>,
        identities: Arc<IdentityProvider>,
        config: SessionConfig,
    ) -> Self {
        Self {
            shared: Arc::new(SessionShared::new()),
            transport,
            identities,
            backoff: config.retry.backoff(),
            config,
            stream: None,
            end_reported: false,
        }
    }

    /// Cloneable handle for cancelling or terminating from elsewhere.
    pub fn handle(&self) -> SessionHandle<C> {
        SessionHandle {
            shared: Arc::clone(&self.shared),
            coordinator: TerminationCoordinator::new(
                Arc::clone(&self.shared),
                Arc::clone(&self.transport),
                Arc::clone(&self.identities),
            ),
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn state(&self) -> SessionState {
        self.shared.core.lock().state
    }

    pub fn identity(&self) -> Option<ConnectionIdentity> {
        self.shared.core.lock().identity.clone()
    }

    /// Consecutive `Unavailable` retries since the last successful open.
    pub fn retry_count(&self) -> u32 {
        self.shared.core.lock().retries
    }

    /// Consecutive identity rotations since the last successful open.
    pub fn rotation_count(&self) -> u32 {
        self.shared.core.lock().rotations
    }

    pub fn end_reason(&self) -> Option<EndReason> {
        self.shared.core.lock().end
    }

    /// Subscribe and wait until records can flow.
    ///
    /// Returns once the session is `Streaming`, or once it ended without
    /// error (cancelled, terminated, or closed by the server).
    /// Fatal failures are returned here and not reported again by `recv`.
    pub fn start(&mut self) -> Result<()> {
        match self.state() {
            SessionState::Idle => self.begin().map(|_| ()),
            SessionState::Ended if self.end_reported => Err(ClientError::SessionEnded),
            _ => Ok(()),
        }
    }

    /// Next delivery: a record, or the end of the session.
    ///
    /// Starts the session if it is still idle. `Completed` and `Cancelled`
    /// are reported once, as is any fatal error; after that every call
    /// returns [`ClientError::SessionEnded`].
    pub fn recv(&mut self) -> Result<Delivery> {
        loop {
            if let Some(stream) = self.stream.as_mut() {
                match stream.next() {
                    Some(Ok(record)) => return Ok(Delivery::Record(record)),
                    Some(Err(err)) => {
                        self.stream = None;
                        let flow = match self.recover(err)? {
                            Recovery::Resubscribe(identity) => self.subscribe(identity)?,
                            Recovery::Cancelled => Flow::Cancelled,
                        };
                        match flow {
                            Flow::Open => continue,
                            Flow::Cancelled => return self.report_end(),
                        }
                    }
                    None => {
                        self.stream = None;
                        {
                            let mut core = self.shared.core.lock();
                            if core.state == SessionState::Streaming {
                                core.finish(EndReason::Completed);
                                tracing::info!("stream completed by server");
                            }
                        }
                        return self.report_end();
                    }
                }
            }

            let state = self.state();
            match state {
                SessionState::Idle => match self.begin()? {
                    Flow::Open => continue,
                    Flow::Cancelled => return self.report_end(),
                },
                SessionState::Terminating | SessionState::Ended => return self.report_end(),
                SessionState::Subscribing | SessionState::Streaming | SessionState::Retrying => {
                    return Err(ClientError::InvalidTransition {
                        from: state,
                        to: SessionState::Streaming,
                    });
                }
            }
        }
    }

    /// Iterate over records until the session ends.
    pub fn records(&mut self) -> Records<'_, C> {
        Records {
            session: self,
            done: false,
        }
    }

    /// Cancel without telling the server.
    pub fn cancel(&self) {
        self.handle().cancel();
    }

    /// Terminate the subscription at the server.
    pub fn terminate(&self) -> TerminationOutcome {
        self.handle().terminate()
    }

    // --- Lifecycle ---

    /// Idle -> Subscribing with an identity, then open the stream.
    fn begin(&mut self) -> Result<Flow> {
        let identity = match self.identities.obtain_identity() {
            Ok(identity) => identity,
            Err(err) if err.is_storage() => match self.identities.current() {
                Some(identity) => identity,
                None => return Err(self.fail(err)),
            },
            Err(err) => return Err(self.fail(err)),
        };

        {
            let mut core = self.shared.core.lock();
            if core.state != SessionState::Idle || self.shared.cancel.is_cancelled() {
                return Ok(Flow::Cancelled);
            }
            core.identity = Some(identity.clone());
            core.transition(SessionState::Subscribing)?;
        }

        self.subscribe(identity)
    }

    /// Open the stream, applying the failure policy until it opens, the
    /// session is cancelled, or a failure is fatal.
    fn subscribe(&mut self, mut identity: ConnectionIdentity) -> Result<Flow> {
        loop {
            match self.transport.open_stream(&identity, &self.shared.cancel) {
                Ok(stream) => {
                    {
                        let mut core = self.shared.core.lock();
                        if core.state != SessionState::Subscribing {
                            // Termination won the race; dropping the stream aborts it
                            return Ok(Flow::Cancelled);
                        }
                        core.transition(SessionState::Streaming)?;
                        core.retries = 0;
                        core.rotations = 0;
                    }
                    self.backoff.reset();
                    tracing::info!(identity = %identity, "stream established");
                    self.stream = Some(stream);
                    return Ok(Flow::Open);
                }
                Err(err) => match self.recover(err)? {
                    Recovery::Resubscribe(next) => identity = next,
                    Recovery::Cancelled => return Ok(Flow::Cancelled),
                },
            }
        }
    }

    /// Apply the failure policy to a terminal call failure.
    fn recover(&mut self, err: TransportError) -> Result<Recovery> {
        if !self.is_live() {
            return Ok(Recovery::Cancelled);
        }

        match err.kind {
            FailureKind::Cancelled => Ok(self.closed_by_server(err.detail)),
            FailureKind::IdentityConflict => self.rotate_after_conflict(err.detail),
            FailureKind::Unavailable => self.retry_after_outage(err.detail),
            FailureKind::AuthenticationFailed
            | FailureKind::InvalidRequest
            | FailureKind::StorageFailure => Err(self.fail(err.into())),
        }
    }

    /// The server cancelled the call while the caller did not: the
    /// subscription is over, the same as a server-side close.
    fn closed_by_server(&mut self, detail: String) -> Recovery {
        self.stream = None;
        let mut core = self.shared.core.lock();
        if core.state.is_live() {
            core.finish(EndReason::Completed);
            tracing::info!(detail = %detail, "stream cancelled by server");
        }
        Recovery::Cancelled
    }

    fn rotate_after_conflict(&mut self, detail: String) -> Result<Recovery> {
        let rotations = self.shared.core.lock().rotations;
        if rotations >= self.config.max_identity_rotations {
            return Err(self.fail(ClientError::IdentityConflict { rotations, detail }));
        }

        let identity = match self.identities.rotate_identity() {
            Ok(identity) => identity,
            // Termination discarded the identity while it was being replaced
            Err(_) if !self.is_live() => return Ok(Recovery::Cancelled),
            Err(err) if err.is_storage() => match self.identities.current() {
                Some(identity) => identity,
                None => return Err(self.fail(err)),
            },
            Err(err) => return Err(self.fail(err)),
        };

        {
            let mut core = self.shared.core.lock();
            if !core.state.is_live() || self.shared.cancel.is_cancelled() {
                return Ok(Recovery::Cancelled);
            }
            core.rotations += 1;
            core.retries = 0;
            core.identity = Some(identity.clone());
            core.transition(SessionState::Subscribing)?;
            tracing::warn!(
                rotation = core.rotations,
                identity = %identity,
                detail = %detail,
                "identity conflict, resubscribing with rotated identity"
            );
        }
        self.backoff.reset();

        Ok(Recovery::Resubscribe(identity))
    }

    fn retry_after_outage(&mut self, detail: String) -> Result<Recovery> {
        let Some(delay) = self.backoff.next_delay() else {
            let retries = self.backoff.retries();
            return Err(self.fail(ClientError::Unavailable { retries, detail }));
        };

        {
            let mut core = self.shared.core.lock();
            if !core.state.is_live() || self.shared.cancel.is_cancelled() {
                return Ok(Recovery::Cancelled);
            }
            core.retries = self.backoff.retries();
            core.transition(SessionState::Retrying)?;
            tracing::warn!(
                attempt = core.retries,
                delay_ms = delay.as_millis() as u64,
                detail = %detail,
                "stream unavailable, backing off"
            );
        }

        if self.shared.cancel.wait_timeout(delay) {
            return Ok(Recovery::Cancelled);
        }

        let mut core = self.shared.core.lock();
        if core.state != SessionState::Retrying {
            return Ok(Recovery::Cancelled);
        }
        let identity = match core.identity.clone() {
            Some(identity) => identity,
            None => {
                drop(core);
                return Err(self.fail(ClientError::InvalidRequest(
                    "no identity to resubscribe with".into(),
                )));
            }
        };
        core.transition(SessionState::Subscribing)?;

        Ok(Recovery::Resubscribe(identity))
    }

    fn is_live(&self) -> bool {
        self.shared.core.lock().state.is_live() && !self.shared.cancel.is_cancelled()
    }

    /// End the session with a fatal error and hand the error back for
    /// surfacing. Termination, if in progress, owns the final transition.
    fn fail(&mut self, err: ClientError) -> ClientError {
        self.stream = None;
        self.end_reported = true;
        {
            let mut core = self.shared.core.lock();
            if core.state != SessionState::Terminating {
                core.finish(EndReason::Failed(err.kind()));
            }
        }
        tracing::warn!(error = %err, "subscription failed");
        err
    }

    fn report_end(&mut self) -> Result<Delivery> {
        if self.end_reported {
            return Err(ClientError::SessionEnded);
        }
        self.end_reported = true;

        match self.shared.core.lock().end {
            Some(EndReason::Completed) => Ok(Delivery::Completed),
            _ => Ok(Delivery::Cancelled),
        }
    }
}

/// Iterator over the records of a session. Stops at the end of the session;
/// a fatal error is yielded as the last item.
pub struct Records<'a, C: RpcChannel> {
    session: &'a mut SubscriptionSession<C>,
    done: bool,
}

impl<C: RpcChannel> Iterator for Records<'_, C> {
    type Item = Result<StreamRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.session.recv() {
            Ok(Delivery::Record(record)) => Some(Ok(record)),
            Ok(Delivery::Completed) | Ok(Delivery::Cancelled) | Err(ClientError::SessionEnded) => {
                self.done = true;
                None
            }
            Err(err) => {
                self.done = true;
                Some(Err(err))
            }
        }
    }
}

/// Cross-thread control surface of a session.
pub struct SessionHandle<C: RpcChannel> {
    shared: Arc<SessionShared>,
    coordinator: TerminationCoordinator<C>,
}

impl<C: RpcChannel> Clone for SessionHandle<C> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
            coordinator: self.coordinator.clone(),
        }
    }
}

impl<C: RpcChannel> SessionHandle<C> {
    /// Cancel immediately, without a termination call. The identity is kept.
    pub fn cancel(&self) {
        {
            let mut core = self.shared.core.lock();
            if core.state != SessionState::Terminating {
                core.finish(EndReason::Cancelled);
            }
        }
        if self.shared.cancel.cancel() {
            tracing::info!("session cancelled by caller");
        }
    }

    /// Terminate the subscription at the server. See [`TerminationCoordinator`].
    pub fn terminate(&self) -> TerminationOutcome {
        self.coordinator.terminate()
    }

    pub fn coordinator(&self) -> &TerminationCoordinator<C> {
        &self.coordinator
    }

    pub fn state(&self) -> SessionState {
        self.shared.core.lock().state
    }

    pub fn identity(&self) -> Option<ConnectionIdentity> {
        self.shared.core.lock().identity.clone()
    }

    pub fn is_cancelled(&self) -> bool {
        self.shared.cancel.is_cancelled()
    }
}
