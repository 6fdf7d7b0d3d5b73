//! Connection to the ledger plus the per-run key cache.

use crate::{
    account::AccountId,
    keys::KeyPair,
    ledger::{self, Connector, Ledger, Signer},
    Error,
};
use std::collections::HashMap;
use tracing::{debug, info};

/// Signing keys known for the current run, by account.
///
/// Written only by the reconcilers; later stages read it through a shared [Session].
#[derive(Default, Debug)]
pub struct KeyStore {
    keys: HashMap<AccountId, KeyPair>,
}

impl KeyStore {
    /// Store `key` for `account`, replacing any previous entry.
    pub fn insert(&mut self, account: AccountId, key: KeyPair) {
        self.keys.insert(account, key);
    }

    pub fn get(&self, account: &AccountId) -> Option<&KeyPair> {
        self.keys.get(account)
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

/// A ledger client and the key cache for one provisioning run.
pub struct Session<C: Connector> {
    connector: C,
    target: Option<(String, String)>,
    ledger: Option<C::Ledger>,
    keys: KeyStore,
}

impl<C: Connector> Session<C> {
    pub fn new(connector: C) -> Self {
        Self {
            connector,
            target: None,
            ledger: None,
            keys: KeyStore::default(),
        }
    }

    /// Connect to `endpoint` on `network`.
    ///
    /// Connecting again to the same target is a no-op.
    pub fn connect(&mut self, endpoint: &str, network: &str) -> Result<(), Error> {
        if let Some((current_endpoint, current_network)) = &self.target {
            if current_endpoint == endpoint && current_network == network && self.ledger.is_some()
            {
                debug!(endpoint, network, "already connected");
                return Ok(());
            }
        }
        let ledger = self
            .connector
            .connect(endpoint, network)
            .map_err(|source| Error::Connect {
                endpoint: endpoint.to_string(),
                source,
            })?;
        self.ledger = Some(ledger);
        self.target = Some((endpoint.to_string(), network.to_string()));
        info!(endpoint, network, "connected");
        Ok(())
    }

    pub fn ledger(&self) -> Result<&C::Ledger, Error> {
        self.ledger.as_ref().ok_or(Error::NotConnected)
    }

    /// Cache `key` as the signing key of `account` (last write wins).
    pub fn register_key(&mut self, account: AccountId, key: KeyPair) {
        debug!(%account, public_key = %key.public_key(), "registered key");
        self.keys.insert(account, key);
    }

    pub fn key(&self, account: &AccountId) -> Option<&KeyPair> {
        self.keys.get(account)
    }

    pub fn keys(&self) -> &KeyStore {
        &self.keys
    }

    /// Returns a [Signer] for `account` using its cached key.
    pub fn signer<'a>(&'a self, account: &'a AccountId) -> Result<Signer<'a>, Error> {
        let key = self
            .key(account)
            .ok_or_else(|| Error::MissingKey(account.clone()))?;
        Ok(Signer { account, key })
    }

    /// Returns whether `account` exists.
    ///
    /// Only a "not found" answer means absent; any other failure is propagated so an
    /// unreachable node is never mistaken for a missing account.
    pub async fn account_exists(&self, account: &AccountId) -> Result<bool, Error> {
        match self.ledger()?.view_account(account).await {
            Ok(_) => Ok(true),
            Err(ledger::Error::NotFound(_)) => Ok(false),
            Err(source) => Err(Error::Ledger {
                operation: "view account",
                account: account.clone(),
                source,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mocks::MockChain;

    fn account(id: &str) -> AccountId {
        AccountId::parse(id).unwrap()
    }

    #[test]
    fn test_connect_is_idempotent() {
        let chain = MockChain::default();
        let mut session = Session::new(chain.clone());
        assert!(matches!(session.ledger(), Err(Error::NotConnected)));
        session.connect("http://localhost:3030", "localnet").unwrap();
        session.connect("http://localhost:3030", "localnet").unwrap();
        assert_eq!(chain.connections(), 1);
        session.connect("http://localhost:3031", "localnet").unwrap();
        assert_eq!(chain.connections(), 2);
    }

    #[test]
    fn test_register_key_last_write_wins() {
        let mut session = Session::new(MockChain::default());
        let id = account("a.localnet");
        assert!(session.key(&id).is_none());
        session.register_key(id.clone(), KeyPair::from_seed([1; 32]));
        session.register_key(id.clone(), KeyPair::from_seed([2; 32]));
        assert_eq!(session.key(&id), Some(&KeyPair::from_seed([2; 32])));
        assert_eq!(session.keys().len(), 1);
        assert!(matches!(
            session.signer(&account("b.localnet")),
            Err(Error::MissingKey(_))
        ));
    }

    #[tokio::test]
    async fn test_account_exists_classifies_failures() {
        let chain = MockChain::default();
        let root = account("localnet");
        chain.add_account(&root, KeyPair::from_seed([1; 32]).public_key());
        let mut session = Session::new(chain.clone());
        session.connect("http://localhost:3030", "localnet").unwrap();

        assert!(session.account_exists(&root).await.unwrap());
        assert!(!session.account_exists(&account("missing.localnet")).await.unwrap());

        // An outage is not "absent"
        chain.fail_next("view_account", ledger::Error::Other("connection refused".into()), 1);
        let result = session.account_exists(&root).await;
        assert!(matches!(result, Err(Error::Ledger { .. })));
    }
}
