//! # GDDS Stream Client
//!
//! Keeps a long-lived subscription to a server-pushed stream of vehicle
//! tracking records alive over an authenticated RPC channel.
//!
//! ## Core Concepts
//!
//! - **Identity**: a persisted connection token naming the subscription,
//!   rotated when the server reports a conflict
//! - **Transport**: the RPC binding behind [`RpcChannel`], wrapped by a
//!   [`TransportAdapter`] that attaches the credential and types failures
//! - **Session**: the lifecycle state machine applying the retry policy
//! - **Termination**: explicit, identity-bound shutdown of the subscription
//!
//! ## Example
//!
//! ```ignore
//! use gdds_client::{AuthToken, ClientConfig, Delivery, StreamClient};
//!
//! let client = StreamClient::new(channel, AuthToken::new(api_key), ClientConfig {
//!     identity_file: Some("./gdds/identity.bin".into()),
//!     ..Default::default()
//! })?;
//!
//! let mut session = client.session();
//! let handle = session.handle();
//!
//! std::thread::spawn(move || loop {
//!     match session.recv() {
//!         Ok(Delivery::Record(record)) => println!("Received GDDS: {record}"),
//!         Ok(_) => break,
//!         Err(err) => { eprintln!("{err}"); break; }
//!     }
//! });
//!
//! let outcome = handle.terminate();
//! ```

pub mod cancel;
pub mod client;
pub mod error;
pub mod identity;
pub mod retry;
pub mod session;
pub mod storage;
pub mod termination;
pub mod transport;
pub mod types;

// Re-exports
pub use cancel::CancelToken;
pub use client::{ClientConfig, IdentityMode, StreamClient};
pub use error::{ClientError, FailureKind, Result, TransportError};
pub use identity::{
    IdentityProvider, IdentitySource, RandomIdentity, ServerIssuedIdentity, DEFAULT_IDENTITY_KEY,
};
pub use retry::{Backoff, RetryPolicy};
pub use session::{
    Delivery, EndReason, Records, SessionConfig, SessionHandle, SessionState, SubscriptionSession,
};
pub use storage::{FileStore, KeyValueStore, MemoryStore};
pub use termination::TerminationCoordinator;
pub use transport::{
    AuthToken, Metadata, RecordReceiver, RecordStream, RpcChannel, RpcStatus, ScriptedChannel,
    StatusCode, StreamScript, SubscriptionRequest, TerminationRequest, TerminationResponse,
    TransportAdapter, AUTH_METADATA_KEY,
};
pub use types::*;
