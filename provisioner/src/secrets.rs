//! Resolution of private key material.
//!
//! Keys are resolved once per run and held only in memory; nothing here writes secrets back.

use crate::{keys::KeyPair, Error};
use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, fmt, fs::File, future::Future, path::Path};
use tracing::{debug, info};

/// Prefix of environment variables holding secrets
pub const ENV_PREFIX: &str = "MPC_SECRET__";

/// Name of the chain-authority key of participant `index`.
pub fn account_key_name(index: usize) -> String {
    format!("participant-{index}-account-key")
}

/// Name of the network-identity key of participant `index`.
pub fn network_key_name(index: usize) -> String {
    format!("participant-{index}-network-key")
}

/// Retrieves named private keys.
pub trait SecretStore: Send + Sync {
    /// Resolve `name`, failing with [Error::MissingSecret] if it is not stored.
    fn get(&self, name: &str) -> impl Future<Output = Result<KeyPair, Error>> + Send;
}

/// Where the master (deployer) key comes from.
#[derive(Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeySource {
    /// Key material supplied inline (development only).
    Direct(String),
    /// Name of a secret in the [SecretStore].
    Secret(String),
}

impl KeySource {
    pub async fn resolve<S: SecretStore>(&self, store: &S) -> Result<KeyPair, Error> {
        match self {
            KeySource::Direct(key) => KeyPair::parse(key),
            KeySource::Secret(name) => store.get(name).await,
        }
    }
}

impl fmt::Debug for KeySource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeySource::Direct(_) => f.write_str("Direct(<redacted>)"),
            KeySource::Secret(name) => f.debug_tuple("Secret").field(name).finish(),
        }
    }
}

/// Secrets loaded from a local file or the environment.
#[derive(Default)]
pub struct LocalSecrets {
    secrets: BTreeMap<String, String>,
}

impl LocalSecrets {
    /// Load a YAML map of secret name to key.
    pub fn from_file(path: &Path) -> Result<Self, Error> {
        let file = File::open(path)?;
        let secrets: BTreeMap<String, String> = serde_yaml::from_reader(file)?;
        info!(path = ?path, count = secrets.len(), "loaded secrets");
        Ok(Self { secrets })
    }

    /// Load every `MPC_SECRET__<NAME>` variable (`_` in `<NAME>` maps to `-`).
    pub fn from_env() -> Self {
        let secrets: BTreeMap<_, _> = std::env::vars()
            .filter_map(|(key, value)| {
                let name = key.strip_prefix(ENV_PREFIX)?;
                Some((name.to_lowercase().replace('_', "-"), value))
            })
            .collect();
        info!(count = secrets.len(), "loaded secrets from environment");
        Self { secrets }
    }

    pub fn insert(&mut self, name: impl Into<String>, key: impl Into<String>) {
        self.secrets.insert(name.into(), key.into());
    }
}

impl FromIterator<(String, String)> for LocalSecrets {
    fn from_iter<T: IntoIterator<Item = (String, String)>>(iter: T) -> Self {
        Self {
            secrets: iter.into_iter().collect(),
        }
    }
}

impl SecretStore for LocalSecrets {
    async fn get(&self, name: &str) -> Result<KeyPair, Error> {
        let key = self.secrets.get(name).ok_or_else(|| Error::MissingSecret {
            name: name.to_string(),
        })?;
        debug!(name, "resolved secret");
        KeyPair::parse(key)
    }
}
