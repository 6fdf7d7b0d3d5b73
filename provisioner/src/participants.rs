//! Resolve and reconcile participant accounts.
//!
//! Every participant owns two keys from the secret store: a chain-authority key (controls its
//! account) and a network-identity key (identifies it to peers and the contract). The two are
//! never interchangeable.

use crate::{
    account::AccountId,
    hierarchy::{self, Outcome},
    keys::{KeyPair, PublicKey},
    ledger::Connector,
    secrets::{account_key_name, network_key_name, SecretStore},
    session::Session,
    topology::Placement,
    Error,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use tracing::info;

/// Port every participant serves its API (and `/health`) on
pub const DEFAULT_PARTICIPANT_PORT: u16 = 8080;

/// Parents participant accounts were created under by older tooling
pub const DEFAULT_LEGACY_PARENTS: &[&str] = &["node0"];

/// A participant as registered with the contract.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParticipantInfo {
    pub account: AccountId,
    pub index: usize,
    pub network_key: PublicKey,
    pub url: String,
}

/// A participant and the key that signs for its account.
#[derive(Clone, Debug)]
pub struct Participant {
    pub info: ParticipantInfo,
    pub key: KeyPair,
}

/// Returns the endpoint of a participant listening on `address`.
pub fn endpoint(address: &str, port: u16) -> String {
    format!("http://{address}:{port}")
}

/// Map a topology name to the participant's account under `master`.
///
/// Bare names become `<name>.<master>` and names under a legacy parent are moved under
/// `master`. Anything else could not be created by the master account and is rejected.
pub fn remap(name: &str, master: &AccountId, legacy_parents: &[String]) -> Result<AccountId, Error> {
    let uncreatable = || Error::UncreatableParticipant {
        name: name.to_string(),
        master: master.clone(),
    };
    let account = match name.split_once('.') {
        None => master.sub_account(name)?,
        Some((_, parent)) if parent == master.as_str() => AccountId::parse(name)?,
        Some((leaf, parent)) if legacy_parents.iter().any(|legacy| legacy == parent) => {
            let remapped = master.sub_account(leaf)?;
            info!(name, %remapped, "remapped legacy participant");
            remapped
        }
        Some(_) => return Err(uncreatable()),
    };

    // Only the direct parent may create an account
    if !account.is_sub_account_of(master) {
        return Err(uncreatable());
    }
    Ok(account)
}

/// Resolve every placement into a [Participant], in topology order.
///
/// Makes no chain calls: a bad name or a missing secret fails before anything is mutated.
pub async fn resolve<S: SecretStore>(
    store: &S,
    placements: &[Placement],
    master: &AccountId,
    legacy_parents: &[String],
    port: u16,
) -> Result<Vec<Participant>, Error> {
    let mut seen = BTreeSet::new();
    let mut participants = Vec::with_capacity(placements.len());
    for (index, placement) in placements.iter().enumerate() {
        let account = remap(&placement.name, master, legacy_parents)?;
        if !seen.insert(account.clone()) {
            return Err(Error::DuplicateParticipant(account));
        }
        let key = store.get(&account_key_name(index)).await?;
        let network = store.get(&network_key_name(index)).await?;
        if key.public_key() == network.public_key() {
            return Err(Error::ConflatedKeys { index });
        }
        participants.push(Participant {
            info: ParticipantInfo {
                account,
                index,
                network_key: network.public_key(),
                url: endpoint(&placement.address, port),
            },
            key,
        });
    }
    Ok(participants)
}

/// Ensure every participant account exists and is controlled by the participant's own key.
///
/// Missing accounts are created and funded (with `amount`) by `master`, whose key must already
/// be cached.
pub async fn reconcile<C: Connector>(
    session: &mut Session<C>,
    master: &AccountId,
    participants: &[Participant],
    amount: u128,
) -> Result<Vec<ParticipantInfo>, Error> {
    let mut registry = Vec::with_capacity(participants.len());
    for participant in participants {
        let info = &participant.info;
        let outcome = hierarchy::ensure(session, &info.account, master, &participant.key, amount).await?;
        info!(
            account = %info.account,
            index = info.index,
            created = outcome == Outcome::Created,
            "participant ready"
        );
        registry.push(info.clone());
    }
    Ok(registry)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        mocks::{self, MockChain},
        secrets::LocalSecrets,
        Kind,
    };
    use test_case::test_case;

    fn account(id: &str) -> AccountId {
        AccountId::parse(id).unwrap()
    }

    fn legacy() -> Vec<String> {
        DEFAULT_LEGACY_PARENTS.iter().map(|p| p.to_string()).collect()
    }

    #[test_case("mpc-node-0", Some("mpc-node-0.localnet"); "bare name")]
    #[test_case("mpc-node-1.localnet", Some("mpc-node-1.localnet"); "expected convention")]
    #[test_case("mpc-node-2.node0", Some("mpc-node-2.localnet"); "legacy parent")]
    #[test_case("mpc-node-3.testnet", None; "foreign parent")]
    #[test_case("a.b.localnet", None; "too deep")]
    fn test_remap(name: &str, expected: Option<&str>) {
        let result = remap(name, &account("localnet"), &legacy());
        match expected {
            Some(expected) => assert_eq!(result.unwrap(), account(expected)),
            None => assert!(matches!(result, Err(Error::UncreatableParticipant { .. }))),
        }
    }

    #[tokio::test]
    async fn test_resolve_assigns_indices_in_order() {
        let (store, keys) = mocks::secrets(3);
        let placements = mocks::placements(3);
        let participants = resolve(&store, &placements, &account("localnet"), &legacy(), 3000)
            .await
            .unwrap();
        for (index, participant) in participants.iter().enumerate() {
            assert_eq!(participant.info.index, index);
            assert_eq!(participant.info.account, account(&format!("mpc-node-{index}.localnet")));
            assert_eq!(participant.info.url, format!("http://10.0.0.{index}:3000"));
            assert_eq!(participant.key, keys[index].account);
            assert_eq!(participant.info.network_key, keys[index].network.public_key());
            assert_ne!(participant.info.network_key, participant.key.public_key());
        }
    }

    #[tokio::test]
    async fn test_resolve_missing_secret() {
        let (store, _) = mocks::secrets(2);
        let placements = mocks::placements(3);
        let result = resolve(&store, &placements, &account("localnet"), &legacy(), 3000).await;
        match result {
            Err(err @ Error::MissingSecret { .. }) => {
                assert_eq!(err.kind(), Kind::Configuration);
                assert!(err.to_string().contains("participant-2-account-key"));
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_resolve_rejects_conflated_keys() {
        let shared = KeyPair::from_seed([42; 32]).to_secret_string();
        let store: LocalSecrets = [
            (account_key_name(0), shared.clone()),
            (network_key_name(0), shared),
        ]
        .into_iter()
        .collect();
        let result = resolve(&store, &mocks::placements(1), &account("localnet"), &legacy(), 3000).await;
        assert!(matches!(result, Err(Error::ConflatedKeys { index: 0 })));
    }

    #[tokio::test]
    async fn test_resolve_rejects_duplicates() {
        let (store, _) = mocks::secrets(2);
        let mut placements = mocks::placements(2);
        placements[1].name = "mpc-node-0.node0".into();
        let result = resolve(&store, &placements, &account("localnet"), &legacy(), 3000).await;
        assert!(matches!(result, Err(Error::DuplicateParticipant(_))));
    }

    #[tokio::test]
    async fn test_reconcile_creates_with_participant_keys() {
        let chain = MockChain::default();
        let master = account("localnet");
        let master_key = KeyPair::from_seed([1; 32]);
        chain.add_account(&master, master_key.public_key());
        let mut session = Session::new(chain.clone());
        session.connect("http://localhost:3030", "localnet").unwrap();
        session.register_key(master.clone(), master_key);

        let (store, keys) = mocks::secrets(3);
        let participants = resolve(&store, &mocks::placements(3), &master, &legacy(), 3000)
            .await
            .unwrap();
        let registry = reconcile(&mut session, &master, &participants, 10).await.unwrap();
        assert_eq!(registry.len(), 3);

        let creations = chain.creations();
        assert_eq!(creations.len(), 3);
        for (index, (creator, created)) in creations.into_iter().enumerate() {
            assert_eq!(creator, master);
            assert_eq!(created, registry[index].account);
            assert_eq!(chain.access_keys_of(&created), vec![keys[index].account.public_key()]);
            assert_eq!(session.key(&created), Some(&keys[index].account));
        }
    }

    #[tokio::test]
    async fn test_reconcile_detects_foreign_key() {
        let chain = MockChain::default();
        let master = account("localnet");
        let master_key = KeyPair::from_seed([1; 32]);
        chain.add_account(&master, master_key.public_key());
        // Created by an earlier run with the master key instead of the participant key
        chain.add_account(&account("mpc-node-1.localnet"), master_key.public_key());
        let mut session = Session::new(chain.clone());
        session.connect("http://localhost:3030", "localnet").unwrap();
        session.register_key(master.clone(), master_key);

        let (store, _) = mocks::secrets(3);
        let participants = resolve(&store, &mocks::placements(3), &master, &legacy(), 3000)
            .await
            .unwrap();
        let result = reconcile(&mut session, &master, &participants, 10).await;
        match result {
            Err(Error::KeyAuthorityMismatch { account: failed, .. }) => {
                assert_eq!(failed, account("mpc-node-1.localnet"))
            }
            other => panic!("unexpected result: {other:?}"),
        }

        // Only the participant before the mismatch was created
        assert_eq!(chain.creations().len(), 1);
    }
}
