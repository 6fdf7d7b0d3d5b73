//! Deploy and initialize the signing contract.

use crate::{
    account::{AccountId, ContractId},
    ledger::{self, Connector, FunctionCall, Ledger, ALREADY_INITIALIZED, NOT_INITIALIZED},
    participants::ParticipantInfo,
    retry::{retry, Policy},
    session::Session,
    stage::{Stage, Tracker},
    Error,
};
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use std::path::Path;
use tracing::{info, warn};

/// Read-only accessor for the contract's protocol state
pub const STATE_METHOD: &str = "state";

/// Entry point initializing the participant registry and threshold
pub const INIT_METHOD: &str = "init";

/// Default gas attached to contract calls (300 Tgas)
pub const DEFAULT_GAS: u64 = 300_000_000_000_000;

/// Lifecycle of the signing contract, as reported by its state.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum Lifecycle {
    Uninitialized,
    Initialized,
    /// Key generation for a voted domain is in progress.
    DomainPending,
    /// At least one domain has key material.
    DomainActive,
}

impl Lifecycle {
    /// Interpret the value returned by [STATE_METHOD].
    pub fn from_state(state: &Value) -> Self {
        if state.is_null() || state.as_str() == Some("NotInitialized") {
            return Lifecycle::Uninitialized;
        }
        if state.get("Initializing").is_some() {
            return Lifecycle::DomainPending;
        }
        let active = state
            .get("Running")
            .and_then(|running| running.pointer("/domains/domains"))
            .and_then(Value::as_array)
            .is_some_and(|domains| !domains.is_empty());
        if active {
            Lifecycle::DomainActive
        } else {
            Lifecycle::Initialized
        }
    }
}

/// What deploying did.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Deployment {
    Deployed,
    AlreadyDeployed,
}

/// What initializing did.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Initialization {
    Initialized,
    /// The probe found the contract initialized.
    AlreadyInitialized,
    /// The contract rejected initialization because an earlier run already did it.
    Absorbed,
}

/// Returns the code hash the chain reports for `code`.
pub fn code_hash(code: &[u8]) -> String {
    bs58::encode(Sha256::digest(code)).into_string()
}

/// Build the arguments of [INIT_METHOD].
///
/// Participants are listed by index: the contract addresses them positionally.
pub fn init_args(participants: &[ParticipantInfo], threshold: u64) -> Value {
    let mut ordered: Vec<_> = participants.iter().collect();
    ordered.sort_by_key(|p| p.index);
    let entries: Vec<Value> = ordered
        .into_iter()
        .map(|p| {
            json!([
                p.account,
                p.index,
                { "url": p.url, "sign_pk": p.network_key },
            ])
        })
        .collect();
    json!({
        "parameters": {
            "participants": {
                "next_id": participants.len(),
                "participants": entries,
            },
            "threshold": threshold,
        }
    })
}

/// Fail unless `1 <= threshold <= participants`.
pub fn validate_threshold(threshold: u64, participants: usize) -> Result<(), Error> {
    if threshold == 0 || threshold > participants as u64 {
        return Err(Error::InvalidThreshold {
            threshold,
            participants,
        });
    }
    Ok(())
}

/// Read the contract's [Lifecycle].
pub async fn lifecycle<L: Ledger>(ledger: &L, contract: &AccountId) -> Result<Lifecycle, ledger::Error> {
    let state = ledger.view(contract, STATE_METHOD, &json!({})).await?;
    Ok(Lifecycle::from_state(&state))
}

/// Deploy the code at `artifact` to the contract account unless code is already present.
///
/// The contract account's key must already be cached.
pub async fn deploy<C: Connector>(
    session: &Session<C>,
    contract: &ContractId,
    artifact: &Path,
) -> Result<Deployment, Error> {
    let account = contract.account();
    let ledger = session.ledger()?;
    let view = ledger
        .view_account(account)
        .await
        .map_err(|source| Error::Ledger {
            operation: "view account",
            account: account.clone(),
            source,
        })?;
    if view.has_code() {
        match std::fs::read(artifact) {
            Ok(code) if code_hash(&code) != view.code_hash => warn!(
                %account,
                deployed = view.code_hash.as_str(),
                local = code_hash(&code).as_str(),
                "deployed code differs from local artifact (not redeploying)"
            ),
            _ => {}
        }
        info!(%account, code_hash = view.code_hash.as_str(), "contract already deployed");
        return Ok(Deployment::AlreadyDeployed);
    }

    let code = match std::fs::read(artifact) {
        Ok(code) => code,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            return Err(Error::MissingArtifact {
                path: artifact.to_path_buf(),
            })
        }
        Err(err) => return Err(err.into()),
    };
    let mut tracker = Tracker::new(account);
    tracker.advance(Stage::Creating);
    let signer = session.signer(account)?;
    let result = retry(
        &Policy::chain(),
        |_| ledger.deploy(signer, &code),
        ledger::Error::is_stale,
    )
    .await
    .map_err(|failure| failure.into_fault("deploy", account));
    tracker.settle(result)?;
    info!(%account, bytes = code.len(), code_hash = code_hash(&code).as_str(), "deployed contract");
    Ok(Deployment::Deployed)
}

/// Initialize the contract with the full participant registry unless already initialized.
///
/// Signed by `master` (whose key must already be cached).
pub async fn initialize<C: Connector>(
    session: &Session<C>,
    contract: &ContractId,
    master: &AccountId,
    participants: &[ParticipantInfo],
    threshold: u64,
    gas: u64,
) -> Result<Initialization, Error> {
    validate_threshold(threshold, participants.len())?;
    let account = contract.account();
    let ledger = session.ledger()?;
    let mut tracker = Tracker::new(account);

    // Probe first: a readable state means an earlier run already initialized the contract
    match lifecycle(ledger, account).await {
        Ok(Lifecycle::Uninitialized) => {}
        Ok(stage) => {
            info!(%account, ?stage, "contract already initialized");
            return Ok(Initialization::AlreadyInitialized);
        }
        Err(err) if matches!(err, ledger::Error::NotFound(_)) || ledger::matches(NOT_INITIALIZED, err.message()) => {
            info!(%account, "contract not initialized");
        }
        Err(err) => {
            warn!(%account, error = %err, "unexpected failure probing contract state, attempting initialization anyway");
        }
    }

    tracker.advance(Stage::Creating);
    let signer = session.signer(master)?;
    let call = FunctionCall {
        contract: account.clone(),
        method: INIT_METHOD,
        args: init_args(participants, threshold),
        gas,
        deposit: 0,
    };
    let result = match retry(&Policy::chain(), |_| ledger.call(signer, &call), ledger::Error::is_stale).await {
        Ok(_) => {
            info!(%account, participants = participants.len(), threshold, "initialized contract");
            Ok(Initialization::Initialized)
        }
        Err(failure) if failure.error().is_rejection(ALREADY_INITIALIZED) => {
            info!(%account, reason = failure.error().message(), "contract initialized by an earlier run");
            Ok(Initialization::Absorbed)
        }
        Err(failure) => Err(failure.into_fault("initialize", account)),
    };
    tracker.settle(result)
}
