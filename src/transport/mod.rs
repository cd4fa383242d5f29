//! RPC transport seam.
//!
//! [`RpcChannel`] is the black box a concrete RPC binding implements:
//! a server-streaming `Subscribe`, a unary `Terminate`, and optionally the
//! unary `GenerateClientId` of the server-issued identity variant.
//! [`TransportAdapter`] sits on top of it, attaches the credential, and
//! translates every [`RpcStatus`] into the crate's failure taxonomy so no
//! binding-specific failure leaks upward.

mod adapter;
pub mod scripted;

pub use adapter::{AuthToken, RecordStream, TransportAdapter, AUTH_METADATA_KEY};
pub use scripted::{ScriptedChannel, StreamScript};

use crate::error::{FailureKind, TransportError};
use crate::types::StreamRecord;
use crossbeam_channel::Receiver;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Items of an open server stream.
///
/// The binding drops its sender when the server closes the stream cleanly,
/// and sends one `Err` for a terminal status. The adapter drops the receiver
/// to cancel; bindings must treat a failed send as "abort the call".
pub type RecordReceiver = Receiver<Result<StreamRecord, RpcStatus>>;

/// Status codes reported by the RPC layer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StatusCode {
    Ok,
    Cancelled,
    Unknown,
    InvalidArgument,
    DeadlineExceeded,
    NotFound,
    AlreadyExists,
    PermissionDenied,
    ResourceExhausted,
    FailedPrecondition,
    Aborted,
    OutOfRange,
    Unimplemented,
    Internal,
    Unavailable,
    DataLoss,
    Unauthenticated,
}

impl StatusCode {
    /// Taxonomy kind for this code.
    pub fn failure_kind(self) -> FailureKind {
        match self {
            StatusCode::Unauthenticated | StatusCode::PermissionDenied => {
                FailureKind::AuthenticationFailed
            }
            StatusCode::AlreadyExists => FailureKind::IdentityConflict,
            StatusCode::Unavailable
            | StatusCode::Internal
            | StatusCode::Unknown
            | StatusCode::DeadlineExceeded
            | StatusCode::ResourceExhausted
            | StatusCode::Aborted
            | StatusCode::DataLoss => FailureKind::Unavailable,
            StatusCode::Cancelled => FailureKind::Cancelled,
            StatusCode::Ok
            | StatusCode::InvalidArgument
            | StatusCode::NotFound
            | StatusCode::FailedPrecondition
            | StatusCode::OutOfRange
            | StatusCode::Unimplemented => FailureKind::InvalidRequest,
        }
    }
}

/// Terminal status of a call, as the binding received it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RpcStatus {
    pub code: StatusCode,
    pub message: String,
}

impl RpcStatus {
    pub fn new(code: StatusCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::new(StatusCode::Unavailable, message)
    }

    pub fn already_exists(message: impl Into<String>) -> Self {
        Self::new(StatusCode::AlreadyExists, message)
    }

    pub fn unauthenticated(message: impl Into<String>) -> Self {
        Self::new(StatusCode::Unauthenticated, message)
    }
}

impl fmt::Display for RpcStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}: {}", self.code, self.message)
    }
}

impl From<RpcStatus> for TransportError {
    fn from(status: RpcStatus) -> Self {
        TransportError::new(status.code.failure_kind(), status.to_string())
    }
}

/// Out-of-band call headers.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Metadata(BTreeMap<String, String>);

impl Metadata {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.insert(key.into().to_ascii_lowercase(), value.into());
    }

    /// Header lookup; keys are case-insensitive.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(&key.to_ascii_lowercase()).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Body of the `Subscribe` call.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionRequest {
    pub client_id: String,
}

/// Body of the `Terminate` call.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TerminationRequest {
    pub client_id: String,
}

/// Reply to the `Terminate` call.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TerminationResponse {
    pub success: bool,
}

/// The RPC surface consumed by this crate.
pub trait RpcChannel: Send + Sync + 'static {
    /// Open the server stream. Failing to open is reported as `Err`; a
    /// stream that fails later reports through the receiver.
    fn subscribe(
        &self,
        request: SubscriptionRequest,
        metadata: &Metadata,
    ) -> Result<RecordReceiver, RpcStatus>;

    /// End the named subscription. Blocks until the server replies.
    fn terminate(
        &self,
        request: TerminationRequest,
        metadata: &Metadata,
    ) -> Result<TerminationResponse, RpcStatus>;

    /// Ask the server for a fresh client id (server-issued identity variant).
    fn generate_client_id(&self, _metadata: &Metadata) -> Result<String, RpcStatus> {
        Err(RpcStatus::new(
            StatusCode::Unimplemented,
            "server does not issue client ids",
        ))
    }
}
