//! Reconcile the chain of accounts leading from the master account to the contract account.
//!
//! Accounts are handled top-down: an account is only touched once its parent exists and is
//! confirmed to be controlled by the expected key. Existing accounts are verified, never
//! modified.

use crate::{
    account::{AccountId, ContractId},
    keys::{KeyPair, PublicKey},
    ledger::{self, Connector, Ledger},
    retry::{retry, Policy},
    session::Session,
    stage::{Stage, Tracker},
    Error,
};
use tracing::info;

/// What reconciling a single account did.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Outcome {
    Created,
    Verified,
}

/// Fail with [Error::KeyAuthorityMismatch] unless `expected` may sign for `account`.
pub async fn verify_authority<C: Connector>(
    session: &Session<C>,
    account: &AccountId,
    expected: &PublicKey,
) -> Result<(), Error> {
    let keys = session
        .ledger()?
        .access_keys(account)
        .await
        .map_err(|source| Error::Ledger {
            operation: "view access keys",
            account: account.clone(),
            source,
        })?;
    if !keys.contains(expected) {
        return Err(Error::KeyAuthorityMismatch {
            account: account.clone(),
            expected: *expected,
        });
    }
    Ok(())
}

async fn create<C: Connector>(
    session: &Session<C>,
    account: &AccountId,
    creator: &AccountId,
    public_key: &PublicKey,
    amount: u128,
) -> Result<(), Error> {
    let signer = session.signer(creator)?;
    let ledger = session.ledger()?;
    retry(
        &Policy::chain(),
        |_| ledger.create_account(signer, account, public_key, amount),
        ledger::Error::is_stale,
    )
    .await
    .map_err(|failure| failure.into_fault("create account", account))
}

/// Ensure `account` exists and is controlled by `expected`.
///
/// A missing account is created by `creator` (whose key must already be cached) and funded
/// with `amount`. Either way, `expected` becomes the cached signing key of `account`.
pub async fn ensure<C: Connector>(
    session: &mut Session<C>,
    account: &AccountId,
    creator: &AccountId,
    expected: &KeyPair,
    amount: u128,
) -> Result<Outcome, Error> {
    let mut tracker = Tracker::new(account);
    let exists = match session.account_exists(account).await {
        Ok(exists) => exists,
        Err(err) => {
            tracker.advance(Stage::Fatal);
            return Err(err);
        }
    };
    let outcome = if exists {
        tracker.advance(Stage::Verifying);
        let result = verify_authority(session, account, &expected.public_key()).await;
        tracker.settle(result)?;
        info!(%account, "account already exists with expected key");
        Outcome::Verified
    } else {
        tracker.advance(Stage::Creating);
        let result = create(session, account, creator, &expected.public_key(), amount).await;
        tracker.settle(result)?;
        info!(%account, %creator, amount, "created account");
        Outcome::Created
    };
    session.register_key(account.clone(), expected.clone());
    Ok(outcome)
}

/// Ensure every account from the master account down to the contract account exists and is
/// controlled by the master key.
///
/// The master account itself must already exist: it is verified, never created. The contract
/// account is funded with `contract_amount`. Each intermediate account keeps `intermediate` on
/// top of what it passes down to its own child.
pub async fn reconcile<C: Connector>(
    session: &mut Session<C>,
    master: &AccountId,
    master_key: &KeyPair,
    contract: &ContractId,
    intermediate: u128,
    contract_amount: u128,
) -> Result<Vec<(AccountId, Outcome)>, Error> {
    let lineage = contract.account().lineage(master);
    if lineage.is_empty() {
        return Err(Error::UncreatableContract {
            contract: contract.account().clone(),
            master: master.clone(),
        });
    }

    if !session.account_exists(master).await? {
        return Err(Error::MissingMaster {
            account: master.clone(),
        });
    }
    verify_authority(session, master, &master_key.public_key()).await?;
    session.register_key(master.clone(), master_key.clone());
    info!(%master, "verified master account");

    let depth = lineage.len() as u128;
    let mut outcomes = Vec::with_capacity(lineage.len());
    let mut parent = master.clone();
    for (level, account) in (1..=depth).zip(lineage) {
        let amount = contract_amount.saturating_add(intermediate.saturating_mul(depth - level));
        let outcome = ensure(session, &account, &parent, master_key, amount).await?;
        outcomes.push((account.clone(), outcome));
        parent = account;
    }
    Ok(outcomes)
}
