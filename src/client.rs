//! Client entry point wiring storage, identity, transport and sessions.

use crate::error::{ClientError, Result};
use crate::identity::{IdentityProvider, ServerIssuedIdentity, DEFAULT_IDENTITY_KEY};
use crate::session::{SessionConfig, SubscriptionSession};
use crate::storage::{FileStore, KeyValueStore, MemoryStore};
use crate::transport::{AuthToken, RpcChannel, TransportAdapter};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// How new connection identities are produced.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdentityMode {
    /// Minted locally as random UUIDs.
    #[default]
    ClientGenerated,
    /// Requested from the server with `GenerateClientId`.
    ServerIssued,
}

/// Client configuration.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Retry and rotation bounds for each session.
    pub session: SessionConfig,

    /// File persisting the identity (None = keep it in memory only).
    pub identity_file: Option<PathBuf>,

    /// Key of the identity inside the store.
    /// Default: "connection_token"
    pub identity_key: String,

    pub identity_mode: IdentityMode,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            session: SessionConfig::default(),
            identity_file: None,
            identity_key: DEFAULT_IDENTITY_KEY.to_string(),
            identity_mode: IdentityMode::ClientGenerated,
        }
    }
}

impl ClientConfig {
    /// Parse a JSON document. Missing fields take their defaults; durations
    /// are given in milliseconds.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: ClientConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Load a JSON configuration file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let json = fs::read_to_string(path.as_ref())?;
        Self::from_json(&json)
    }

    pub fn validate(&self) -> Result<()> {
        if self.identity_key.trim().is_empty() {
            return Err(ClientError::Config("identity_key must not be empty".into()));
        }
        Ok(())
    }
}

/// Builds sessions that share one transport and one identity provider.
///
/// Sessions created from the same client share the persisted identity, so
/// they are meant to run one after another, not side by side.
pub struct StreamClient<C: RpcChannel> {
    transport: Arc<TransportAdapter<C>>,
    identities: Arc<IdentityProvider>,
    config: ClientConfig,
}

impl<C: RpcChannel> StreamClient<C> {
    /// Create a client, opening the identity file if one is configured.
    ///
    /// An identity file that cannot be opened (locked by another process,
    /// unwritable directory) leaves the client with an in-memory identity.
    pub fn new(channel: C, credential: AuthToken, config: ClientConfig) -> Result<Self> {
        let store: Arc<dyn KeyValueStore> = match &config.identity_file {
            Some(path) => match FileStore::open(path) {
                Ok(store) => Arc::new(store),
                Err(err) if err.is_storage() => {
                    tracing::warn!(
                        path = %path.display(),
                        error = %err,
                        "identity file unavailable, keeping identity in memory"
                    );
                    Arc::new(MemoryStore::new())
                }
                Err(err) => return Err(err),
            },
            None => Arc::new(MemoryStore::new()),
        };
        Self::with_store(channel, credential, store, config)
    }

    /// Create a client persisting its identity in `store`.
    pub fn with_store(
        channel: C,
        credential: AuthToken,
        store: Arc<dyn KeyValueStore>,
        config: ClientConfig,
    ) -> Result<Self> {
        config.validate()?;

        let transport = Arc::new(TransportAdapter::new(channel, credential));
        let provider = match config.identity_mode {
            IdentityMode::ClientGenerated => IdentityProvider::new(store),
            IdentityMode::ServerIssued => IdentityProvider::with_source(
                store,
                Box::new(ServerIssuedIdentity::new(Arc::clone(&transport))),
            ),
        };
        let identities = Arc::new(provider.with_key(config.identity_key.clone()));

        tracing::debug!(
            mode = ?config.identity_mode,
            persisted = config.identity_file.is_some(),
            "stream client ready"
        );

        Ok(Self {
            transport,
            identities,
            config,
        })
    }

    /// A fresh session in the `Idle` state.
    pub fn session(&self) -> SubscriptionSession<C> {
        SubscriptionSession::new(
            Arc::clone(&self.transport),
            Arc::clone(&self.identities),
            self.config.session.clone(),
        )
    }

    pub fn identities(&self) -> &Arc<IdentityProvider> {
        &self.identities
    }

    pub fn transport(&self) -> &Arc<TransportAdapter<C>> {
        &self.transport
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }
}
