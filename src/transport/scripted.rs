//! In-process [`RpcChannel`] driven by a script.
//!
//! Each `Subscribe` call consumes the next scripted response: either an
//! immediate rejection or a stream that yields its records, then optionally
//! fails, holds the stream open, or closes cleanly. Records are handed over
//! through a rendezvous channel, so the binding never runs ahead of the
//! consumer. All calls are recorded for inspection.

use super::{
    Metadata, RecordReceiver, RpcChannel, RpcStatus, SubscriptionRequest, TerminationRequest,
    TerminationResponse, AUTH_METADATA_KEY,
};
use crate::types::StreamRecord;
use crossbeam_channel::{bounded, Sender};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use std::thread;

/// Scripted body of one accepted `Subscribe` call.
#[derive(Clone, Debug, Default)]
pub struct StreamScript {
    items: Vec<Result<StreamRecord, RpcStatus>>,
    hold: bool,
}

impl StreamScript {
    /// Yield these records, then close cleanly.
    pub fn records(records: Vec<StreamRecord>) -> Self {
        Self {
            items: records.into_iter().map(Ok).collect(),
            hold: false,
        }
    }

    /// End the stream with a terminal status after the records.
    pub fn then_fail(mut self, status: RpcStatus) -> Self {
        self.items.push(Err(status));
        self.hold = false;
        self
    }

    /// Keep the stream open after the records until the caller goes away.
    pub fn then_hold(mut self) -> Self {
        self.hold = true;
        self
    }
}

#[derive(Clone, Debug)]
enum SubscribeScript {
    Reject(RpcStatus),
    Open(StreamScript),
}

/// One recorded call.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RecordedCall {
    pub client_id: String,
    pub credential: Option<String>,
}

type HeldSender = Sender<Result<StreamRecord, RpcStatus>>;

/// Scripted loopback binding.
#[derive(Default)]
pub struct ScriptedChannel {
    required_credential: Option<String>,
    subscribes: Mutex<VecDeque<SubscribeScript>>,
    terminations: Mutex<VecDeque<Result<bool, RpcStatus>>>,
    issued_ids: Mutex<VecDeque<String>>,
    issued_count: Mutex<u64>,
    subscribe_calls: Mutex<Vec<RecordedCall>>,
    terminate_calls: Mutex<Vec<RecordedCall>>,
    /// Senders of streams scripted to stay open.
    held: Arc<Mutex<Vec<HeldSender>>>,
}

impl ScriptedChannel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject every call whose credential differs from `token`.
    pub fn with_credential(token: impl Into<String>) -> Self {
        Self {
            required_credential: Some(token.into()),
            ..Self::default()
        }
    }

    /// Next `Subscribe` fails to open with `status`.
    pub fn push_rejection(&self, status: RpcStatus) {
        self.subscribes
            .lock()
            .push_back(SubscribeScript::Reject(status));
    }

    /// Next `Subscribe` opens and plays `script`.
    pub fn push_stream(&self, script: StreamScript) {
        self.subscribes.lock().push_back(SubscribeScript::Open(script));
    }

    /// Next `Terminate` replies with `success` or fails with a status.
    /// Unscripted terminations succeed.
    pub fn push_termination(&self, reply: Result<bool, RpcStatus>) {
        self.terminations.lock().push_back(reply);
    }

    /// Next `GenerateClientId` returns `id`. Unscripted calls return
    /// `issued-<n>`.
    pub fn push_issued_id(&self, id: impl Into<String>) {
        self.issued_ids.lock().push_back(id.into());
    }

    pub fn subscribe_calls(&self) -> Vec<RecordedCall> {
        self.subscribe_calls.lock().clone()
    }

    pub fn terminate_calls(&self) -> Vec<RecordedCall> {
        self.terminate_calls.lock().clone()
    }

    /// Scripted responses not yet consumed by `Subscribe`.
    pub fn pending_subscribes(&self) -> usize {
        self.subscribes.lock().len()
    }

    fn check_credential(&self, metadata: &Metadata) -> Result<(), RpcStatus> {
        match (&self.required_credential, metadata.get(AUTH_METADATA_KEY)) {
            (None, _) => Ok(()),
            (Some(expected), Some(given)) if expected == given => Ok(()),
            _ => Err(RpcStatus::unauthenticated("invalid or missing api key")),
        }
    }

    fn record(calls: &Mutex<Vec<RecordedCall>>, client_id: &str, metadata: &Metadata) {
        calls.lock().push(RecordedCall {
            client_id: client_id.to_string(),
            credential: metadata.get(AUTH_METADATA_KEY).map(str::to_string),
        });
    }

    fn play(&self, script: StreamScript) -> Result<RecordReceiver, RpcStatus> {
        let (sender, receiver) = bounded(0);
        let held = Arc::clone(&self.held);

        thread::Builder::new()
            .name("scripted-stream".into())
            .spawn(move || {
                for item in script.items {
                    if sender.send(item).is_err() {
                        // Consumer cancelled
                        return;
                    }
                }
                if script.hold {
                    held.lock().push(sender);
                }
            })
            .map_err(|e| RpcStatus::unavailable(format!("failed to start stream: {e}")))?;

        Ok(receiver)
    }
}

impl RpcChannel for ScriptedChannel {
    fn subscribe(
        &self,
        request: SubscriptionRequest,
        metadata: &Metadata,
    ) -> Result<RecordReceiver, RpcStatus> {
        Self::record(&self.subscribe_calls, &request.client_id, metadata);
        self.check_credential(metadata)?;

        let next = self.subscribes.lock().pop_front();
        match next {
            Some(SubscribeScript::Reject(status)) => Err(status),
            Some(SubscribeScript::Open(script)) => self.play(script),
            None => Err(RpcStatus::unavailable("no scripted response")),
        }
    }

    fn terminate(
        &self,
        request: TerminationRequest,
        metadata: &Metadata,
    ) -> Result<TerminationResponse, RpcStatus> {
        Self::record(&self.terminate_calls, &request.client_id, metadata);
        self.check_credential(metadata)?;

        let reply = self.terminations.lock().pop_front().unwrap_or(Ok(true));
        reply.map(|success| TerminationResponse { success })
    }

    fn generate_client_id(&self, metadata: &Metadata) -> Result<String, RpcStatus> {
        self.check_credential(metadata)?;

        if let Some(id) = self.issued_ids.lock().pop_front() {
            return Ok(id);
        }
        let mut count = self.issued_count.lock();
        *count += 1;
        Ok(format!("issued-{}", *count))
    }
}
