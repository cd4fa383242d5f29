//! Subscription sessions.
//!
//! A session owns one logical subscription and walks it through
//! `Idle → Subscribing → Streaming → (Retrying | Terminating) → Ended`.
//! Failures reported by the transport are interpreted here:
//! - identity conflicts rotate the identity, a bounded number of times
//! - outages back off exponentially, a bounded number of times
//! - authentication and request errors end the session at once
//! - cancellation is honoured in any state
//!
//! # Example
//!
//! ```ignore
//! let mut session = client.session();
//! let handle = session.handle();
//!
//! let receiver = std::thread::spawn(move || {
//!     for record in session.records() {
//!         match record {
//!             Ok(record) => println!("{record}"),
//!             Err(err) => eprintln!("subscription failed: {err}"),
//!         }
//!     }
//! });
//!
//! // Later, from the foreground:
//! let outcome = handle.terminate();
//! receiver.join().unwrap();
//! ```

mod subscription;
pub(crate) mod types;

pub use subscription::{Records, SessionHandle, SubscriptionSession};
pub use types::{Delivery, EndReason, SessionConfig, SessionState};
