//! Connection identity provisioning.
//!
//! The provider hands out the identity a session subscribes with. It prefers
//! the persisted value, mints a new one when none is usable, rotates on a
//! server-reported conflict, and forgets the value once the server confirms
//! termination.
//!
//! Storage failures never leave the caller without an identity. An
//! unreadable store gets a freshly minted value written over it; when the
//! write fails too, the provider keeps the value in memory and returns the
//! storage error. `current()` is therefore always `Some` after
//! `obtain_identity` or `rotate_identity` returns, whether they succeeded or
//! failed with a storage error.

use crate::error::{ClientError, Result};
use crate::storage::KeyValueStore;
use crate::transport::{RpcChannel, TransportAdapter};
use crate::types::ConnectionIdentity;
use parking_lot::Mutex;
use std::sync::Arc;

/// Storage key of the persisted identity.
pub const DEFAULT_IDENTITY_KEY: &str = "connection_token";

/// Mints tried before giving up on getting a value distinct from the
/// conflicting one.
const MAX_MINT_ATTEMPTS: u32 = 3;

/// Where new identities come from.
pub trait IdentitySource: Send + Sync {
    fn mint(&self) -> Result<ConnectionIdentity>;
}

/// Client-generated UUID v4 identities. Never touches the network.
#[derive(Clone, Copy, Debug, Default)]
pub struct RandomIdentity;

impl IdentitySource for RandomIdentity {
    fn mint(&self) -> Result<ConnectionIdentity> {
        Ok(ConnectionIdentity::random())
    }
}

/// Identities issued by the server through `GenerateClientId`.
pub struct ServerIssuedIdentity<C: RpcChannel> {
    transport: Arc<TransportAdapter<C>>,
}

impl<C: RpcChannel> ServerIssuedIdentity<C> {
    pub fn new(transport: Arc<TransportAdapter<C>>) -> Self {
        Self { transport }
    }
}

impl<C: RpcChannel> IdentitySource for ServerIssuedIdentity<C> {
    fn mint(&self) -> Result<ConnectionIdentity> {
        Ok(self.transport.generate_identity()?)
    }
}

/// Obtains, rotates and discards the persisted connection identity.
pub struct IdentityProvider {
    store: Arc<dyn KeyValueStore>,
    source: Box<dyn IdentitySource>,
    key: String,
    current: Mutex<Option<ConnectionIdentity>>,
}

impl IdentityProvider {
    /// Provider minting random identities under the default key.
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self::with_source(store, Box::new(RandomIdentity))
    }

    pub fn with_source(store: Arc<dyn KeyValueStore>, source: Box<dyn IdentitySource>) -> Self {
        Self {
            store,
            source,
            key: DEFAULT_IDENTITY_KEY.to_string(),
            current: Mutex::new(None),
        }
    }

    /// Use a different storage key.
    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.key = key.into();
        self
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Identity in use by this process, if any.
    pub fn current(&self) -> Option<ConnectionIdentity> {
        self.current.lock().clone()
    }

    /// Return the persisted identity, or mint and persist a new one.
    pub fn obtain_identity(&self) -> Result<ConnectionIdentity> {
        if let Some(identity) = self.current() {
            return Ok(identity);
        }

        match self.store.get(&self.key) {
            Ok(Some(value)) => match ConnectionIdentity::parse(value) {
                Ok(identity) => {
                    tracing::debug!(identity = %identity, "loaded persisted identity");
                    *self.current.lock() = Some(identity.clone());
                    return Ok(identity);
                }
                Err(err) => {
                    tracing::warn!(error = %err, "replacing malformed persisted identity");
                }
            },
            Ok(None) => {}
            Err(err) => {
                let identity = self.source.mint()?;
                tracing::warn!(
                    error = %err,
                    identity = %identity,
                    "identity store unreadable, replacing its identity"
                );
                return self.adopt(identity);
            }
        }

        let identity = self.source.mint()?;
        tracing::debug!(identity = %identity, "minted new identity");
        self.adopt(identity)
    }

    /// Replace the current identity with a fresh, distinct one.
    pub fn rotate_identity(&self) -> Result<ConnectionIdentity> {
        let previous = self.current();

        let mut fresh = self.source.mint()?;
        let mut attempts = 1;
        while previous.as_ref() == Some(&fresh) {
            if attempts >= MAX_MINT_ATTEMPTS {
                return Err(ClientError::InvalidIdentity(
                    "identity source keeps returning the conflicting identity".into(),
                ));
            }
            fresh = self.source.mint()?;
            attempts += 1;
        }

        // Held across the write: a discard either runs after it or makes it fail
        let mut current = self.current.lock();
        if *current != previous {
            return Err(ClientError::InvalidIdentity(
                "identity was replaced or discarded during rotation".into(),
            ));
        }

        match &previous {
            Some(old) => tracing::info!(from = %old, to = %fresh, "rotated identity"),
            None => tracing::info!(to = %fresh, "rotated identity"),
        }
        self.persist(&mut current, fresh)
    }

    /// Forget the identity. Called only after confirmed termination.
    pub fn discard_identity(&self) -> Result<()> {
        let mut current = self.current.lock();
        current.take();
        self.store.delete(&self.key)?;
        tracing::debug!(key = %self.key, "discarded persisted identity");
        Ok(())
    }

    fn adopt(&self, identity: ConnectionIdentity) -> Result<ConnectionIdentity> {
        let mut current = self.current.lock();
        self.persist(&mut current, identity)
    }

    /// Cache `identity` and write it through. The identity stays cached when
    /// the write fails.
    fn persist(
        &self,
        current: &mut Option<ConnectionIdentity>,
        identity: ConnectionIdentity,
    ) -> Result<ConnectionIdentity> {
        *current = Some(identity.clone());
        if let Err(err) = self.store.set(&self.key, identity.as_str()) {
            tracing::warn!(
                error = %err,
                identity = %identity,
                "failed to persist identity, continuing in memory"
            );
            return Err(err);
        }
        Ok(identity)
    }
}
