//! Credential handling, call issuing and failure translation.

use super::{Metadata, RecordReceiver, RpcChannel, RpcStatus, SubscriptionRequest, TerminationRequest};
use crate::cancel::CancelToken;
use crate::error::{FailureKind, TransportError};
use crate::types::{ConnectionIdentity, StreamRecord, TerminationOutcome};
use std::fmt;
use std::sync::Arc;

/// Header carrying the authentication credential on every call.
pub const AUTH_METADATA_KEY: &str = "x-api-key";

/// Opaque authentication credential. Never printed.
#[derive(Clone, PartialEq, Eq)]
pub struct AuthToken(String);

impl AuthToken {
    pub fn new(token: impl Into<String>) -> Self {
        AuthToken(token.into())
    }

    pub fn is_empty(&self) -> bool {
        self.0.trim().is_empty()
    }

    pub(crate) fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for AuthToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("AuthToken(<redacted>)")
    }
}

/// Wraps an [`RpcChannel`] with the session's credential.
pub struct TransportAdapter<C: RpcChannel> {
    channel: Arc<C>,
    credential: AuthToken,
}

impl<C: RpcChannel> TransportAdapter<C> {
    pub fn new(channel: C, credential: AuthToken) -> Self {
        Self::from_shared(Arc::new(channel), credential)
    }

    /// Build over a channel that is also used elsewhere.
    pub fn from_shared(channel: Arc<C>, credential: AuthToken) -> Self {
        Self {
            channel,
            credential,
        }
    }

    pub fn channel(&self) -> &Arc<C> {
        &self.channel
    }

    fn metadata(&self) -> Result<Metadata, TransportError> {
        if self.credential.is_empty() {
            return Err(TransportError::new(
                FailureKind::AuthenticationFailed,
                "no authentication credential configured",
            ));
        }
        let mut metadata = Metadata::new();
        metadata.insert(AUTH_METADATA_KEY, self.credential.expose());
        Ok(metadata)
    }

    /// Open the record stream for `identity`.
    ///
    /// The returned stream observes `cancel` at every wait.
    pub fn open_stream(
        &self,
        identity: &ConnectionIdentity,
        cancel: &CancelToken,
    ) -> Result<RecordStream, TransportError> {
        if cancel.is_cancelled() {
            return Err(TransportError::cancelled());
        }
        let metadata = self.metadata()?;
        if identity.as_str().is_empty() {
            return Err(TransportError::new(
                FailureKind::InvalidRequest,
                "subscription request has no client id",
            ));
        }

        let request = SubscriptionRequest {
            client_id: identity.as_str().to_string(),
        };
        let items = self.channel.subscribe(request, &metadata)?;

        tracing::debug!(identity = %identity, "subscribe call accepted");
        Ok(RecordStream::new(items, cancel.clone(), identity.clone()))
    }

    /// Issue the unary termination call and report its outcome.
    pub fn send_termination(&self, identity: &ConnectionIdentity) -> TerminationOutcome {
        let metadata = match self.metadata() {
            Ok(metadata) => metadata,
            Err(err) => return TerminationOutcome::failed(err.to_string()),
        };

        let request = TerminationRequest {
            client_id: identity.as_str().to_string(),
        };
        match self.channel.terminate(request, &metadata) {
            Ok(response) if response.success => TerminationOutcome::succeeded(),
            Ok(_) => TerminationOutcome::failed("server reported termination failure"),
            Err(status) => TerminationOutcome::failed(TransportError::from(status).to_string()),
        }
    }

    /// Request a server-issued identity.
    pub fn generate_identity(&self) -> Result<ConnectionIdentity, TransportError> {
        let metadata = self.metadata()?;
        let issued = self.channel.generate_client_id(&metadata)?;
        ConnectionIdentity::parse(issued).map_err(|e| {
            TransportError::new(
                FailureKind::InvalidRequest,
                format!("server issued a malformed client id: {e}"),
            )
        })
    }
}

/// Outcome of one wait on the stream.
enum Step {
    Item(Result<StreamRecord, RpcStatus>),
    Closed,
    Cancelled,
}

/// Lazy, single-pass sequence of records from one `Subscribe` call.
///
/// `None` means the server closed the stream cleanly. A terminal failure or
/// cancellation is yielded once as `Err`, after which the stream is
/// exhausted. Dropping the stream aborts the call.
pub struct RecordStream {
    items: Option<RecordReceiver>,
    cancel: CancelToken,
    identity: ConnectionIdentity,
    delivered: u64,
}

impl RecordStream {
    fn new(items: RecordReceiver, cancel: CancelToken, identity: ConnectionIdentity) -> Self {
        Self {
            items: Some(items),
            cancel,
            identity,
            delivered: 0,
        }
    }

    pub fn identity(&self) -> &ConnectionIdentity {
        &self.identity
    }

    /// Records handed out so far.
    pub fn delivered(&self) -> u64 {
        self.delivered
    }

    pub fn is_exhausted(&self) -> bool {
        self.items.is_none()
    }

    fn close(&mut self) {
        self.items = None;
    }
}

impl Iterator for RecordStream {
    type Item = Result<StreamRecord, TransportError>;

    fn next(&mut self) -> Option<Self::Item> {
        let items = self.items.as_ref()?;

        let step = if self.cancel.is_cancelled() {
            Step::Cancelled
        } else {
            crossbeam_channel::select! {
                recv(items) -> msg => match msg {
                    Ok(item) => Step::Item(item),
                    Err(_) => Step::Closed,
                },
                recv(self.cancel.signal()) -> _ => Step::Cancelled,
            }
        };

        match step {
            Step::Item(Ok(record)) => {
                self.delivered += 1;
                Some(Ok(record))
            }
            Step::Item(Err(status)) => {
                self.close();
                Some(Err(status.into()))
            }
            Step::Closed => {
                self.close();
                None
            }
            Step::Cancelled => {
                self.close();
                Some(Err(TransportError::cancelled()))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::scripted::{ScriptedChannel, StreamScript};
    use crate::transport::StatusCode;
    use crate::types::{EpochMillis, TransitMode};
    use std::thread;
    use std::time::{Duration, Instant};

    fn record(vehicle: &str) -> StreamRecord {
        StreamRecord {
            vehicle: vehicle.to_string(),
            source_ip: None,
            timestamp: EpochMillis(1),
            latitude: 0.0,
            longitude: 0.0,
            heading: 0.0,
            speed: 0.0,
            transit_mode: TransitMode::Car,
            message: None,
            server_timestamp: EpochMillis(2),
        }
    }

    #[test]
    fn test_credential_attached_and_identity_in_body() {
        let channel = ScriptedChannel::new();
        channel.push_stream(StreamScript::records(vec![record("a")]));
        let adapter = TransportAdapter::new(channel, AuthToken::new("secret"));

        let identity = ConnectionIdentity::parse("client-1").unwrap();
        let stream = adapter.open_stream(&identity, &CancelToken::new()).unwrap();
        let records: Vec<_> = stream.collect();
        assert_eq!(records.len(), 1);

        let calls = adapter.channel().subscribe_calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].client_id, "client-1");
        assert_eq!(calls[0].credential.as_deref(), Some("secret"));
    }

    #[test]
    fn test_empty_credential_never_calls() {
        let adapter = TransportAdapter::new(ScriptedChannel::new(), AuthToken::new(""));
        let identity = ConnectionIdentity::random();

        let err = adapter.open_stream(&identity, &CancelToken::new()).err().unwrap();
        assert_eq!(err.kind, FailureKind::AuthenticationFailed);
        assert!(adapter.channel().subscribe_calls().is_empty());
    }

    #[test]
    fn test_stream_is_single_pass() {
        let channel = ScriptedChannel::new();
        channel.push_stream(StreamScript::records(vec![record("a"), record("b")]));
        let adapter = TransportAdapter::new(channel, AuthToken::new("k"));

        let mut stream = adapter
            .open_stream(&ConnectionIdentity::random(), &CancelToken::new())
            .unwrap();
        assert_eq!(stream.next().unwrap().unwrap().vehicle, "a");
        assert_eq!(stream.next().unwrap().unwrap().vehicle, "b");
        assert!(stream.next().is_none());
        assert!(stream.is_exhausted());
        assert!(stream.next().is_none());
        assert_eq!(stream.delivered(), 2);
    }

    #[test]
    fn test_mid_stream_status_translated() {
        let channel = ScriptedChannel::new();
        channel.push_stream(
            StreamScript::records(vec![record("a")])
                .then_fail(RpcStatus::new(StatusCode::Internal, "boom")),
        );
        let adapter = TransportAdapter::new(channel, AuthToken::new("k"));

        let mut stream = adapter
            .open_stream(&ConnectionIdentity::random(), &CancelToken::new())
            .unwrap();
        assert!(stream.next().unwrap().is_ok());
        let err = stream.next().unwrap().unwrap_err();
        assert_eq!(err.kind, FailureKind::Unavailable);
        assert!(stream.next().is_none());
    }

    #[test]
    fn test_cancel_unblocks_waiting_stream() {
        let channel = ScriptedChannel::new();
        channel.push_stream(StreamScript::records(vec![]).then_hold());
        let adapter = TransportAdapter::new(channel, AuthToken::new("k"));
        let cancel = CancelToken::new();

        let mut stream = adapter
            .open_stream(&ConnectionIdentity::random(), &cancel)
            .unwrap();

        let canceller = cancel.clone();
        let start = Instant::now();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            canceller.cancel();
        });

        let err = stream.next().unwrap().unwrap_err();
        assert_eq!(err.kind, FailureKind::Cancelled);
        assert!(start.elapsed() < Duration::from_secs(5));
        assert!(stream.next().is_none());
        handle.join().unwrap();
    }

    #[test]
    fn test_termination_outcomes() {
        let channel = ScriptedChannel::new();
        channel.push_termination(Ok(false));
        channel.push_termination(Err(RpcStatus::unavailable("down")));
        let adapter = TransportAdapter::new(channel, AuthToken::new("k"));
        let identity = ConnectionIdentity::random();

        let refused = adapter.send_termination(&identity);
        assert!(!refused.success());
        assert!(!refused.is_skipped());

        let failed = adapter.send_termination(&identity);
        assert!(!failed.success());
        assert!(failed.detail.unwrap().contains("down"));

        // Unscripted terminations succeed
        assert!(adapter.send_termination(&identity).success());
        assert_eq!(adapter.channel().terminate_calls().len(), 3);
    }

    #[test]
    fn test_generated_identity_validated() {
        let channel = ScriptedChannel::new();
        channel.push_issued_id("issued-7");
        channel.push_issued_id("not valid");
        let adapter = TransportAdapter::new(channel, AuthToken::new("k"));

        assert_eq!(adapter.generate_identity().unwrap().as_str(), "issued-7");
        let err = adapter.generate_identity().unwrap_err();
        assert_eq!(err.kind, FailureKind::InvalidRequest);
    }
}
