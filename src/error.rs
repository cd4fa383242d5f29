//! Error types for the subscription client.

use crate::session::SessionState;
use std::fmt;
use thiserror::Error;

/// Failure kinds every transport and storage problem is translated into.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FailureKind {
    /// Missing or rejected credential.
    AuthenticationFailed,
    /// The identity is already in use at the server.
    IdentityConflict,
    /// Server unreachable or failing internally.
    Unavailable,
    /// Malformed request (caller defect).
    InvalidRequest,
    /// The call was cancelled, locally or by the server.
    Cancelled,
    /// Persisted identity could not be read or written.
    StorageFailure,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FailureKind::AuthenticationFailed => "authentication failed",
            FailureKind::IdentityConflict => "identity conflict",
            FailureKind::Unavailable => "unavailable",
            FailureKind::InvalidRequest => "invalid request",
            FailureKind::Cancelled => "cancelled",
            FailureKind::StorageFailure => "storage failure",
        };
        f.write_str(name)
    }
}

/// A terminal call failure, already translated out of the RPC layer.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
#[error("{kind}: {detail}")]
pub struct TransportError {
    pub kind: FailureKind,
    pub detail: String,
}

impl TransportError {
    pub fn new(kind: FailureKind, detail: impl Into<String>) -> Self {
        Self {
            kind,
            detail: detail.into(),
        }
    }

    pub fn cancelled() -> Self {
        Self::new(FailureKind::Cancelled, "call cancelled by caller")
    }
}

/// Main error type for client operations.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Identity conflict persisted after {rotations} rotations: {detail}")]
    IdentityConflict { rotations: u32, detail: String },

    #[error("Service unavailable after {retries} retries: {detail}")]
    Unavailable { retries: u32, detail: String },

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Deserialization error: {0}")]
    Deserialization(String),

    #[error("Corruption detected: {0}")]
    Corruption(String),

    #[error("Invalid store format: {0}")]
    InvalidFormat(String),

    #[error("Identity store is locked by another process")]
    Locked,

    #[error("Storage failure: {0}")]
    Storage(String),

    #[error("Invalid identity: {0}")]
    InvalidIdentity(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Invalid session transition: {from:?} -> {to:?}")]
    InvalidTransition { from: SessionState, to: SessionState },

    #[error("Session has ended")]
    SessionEnded,
}

impl ClientError {
    /// Taxonomy kind of this error, if it belongs to one.
    pub fn kind(&self) -> Option<FailureKind> {
        match self {
            ClientError::AuthenticationFailed(_) => Some(FailureKind::AuthenticationFailed),
            ClientError::IdentityConflict { .. } => Some(FailureKind::IdentityConflict),
            ClientError::Unavailable { .. } => Some(FailureKind::Unavailable),
            ClientError::InvalidRequest(_) => Some(FailureKind::InvalidRequest),
            ClientError::Cancelled => Some(FailureKind::Cancelled),
            ClientError::Io(_)
            | ClientError::Serialization(_)
            | ClientError::Deserialization(_)
            | ClientError::Corruption(_)
            | ClientError::InvalidFormat(_)
            | ClientError::Locked
            | ClientError::Storage(_) => Some(FailureKind::StorageFailure),
            ClientError::InvalidIdentity(_)
            | ClientError::Config(_)
            | ClientError::InvalidTransition { .. }
            | ClientError::SessionEnded => None,
        }
    }

    /// True for persisted-identity failures the caller may continue past.
    pub fn is_storage(&self) -> bool {
        self.kind() == Some(FailureKind::StorageFailure)
    }
}

impl From<TransportError> for ClientError {
    fn from(e: TransportError) -> Self {
        match e.kind {
            FailureKind::AuthenticationFailed => ClientError::AuthenticationFailed(e.detail),
            FailureKind::IdentityConflict => ClientError::IdentityConflict {
                rotations: 0,
                detail: e.detail,
            },
            FailureKind::Unavailable => ClientError::Unavailable {
                retries: 0,
                detail: e.detail,
            },
            FailureKind::InvalidRequest => ClientError::InvalidRequest(e.detail),
            FailureKind::Cancelled => ClientError::Cancelled,
            FailureKind::StorageFailure => ClientError::Storage(e.detail),
        }
    }
}

impl From<serde_json::Error> for ClientError {
    fn from(e: serde_json::Error) -> Self {
        ClientError::Config(e.to_string())
    }
}

impl From<rmp_serde::encode::Error> for ClientError {
    fn from(e: rmp_serde::encode::Error) -> Self {
        ClientError::Serialization(e.to_string())
    }
}

impl From<rmp_serde::decode::Error> for ClientError {
    fn from(e: rmp_serde::decode::Error) -> Self {
        ClientError::Deserialization(e.to_string())
    }
}

/// Result type for client operations.
pub type Result<T> = std::result::Result<T, ClientError>;
