//! Provision a threshold-signature (MPC) network on a running chain.
//!
//! Starting from an unknown prior state, the provisioner brings a nested account hierarchy,
//! a set of participant accounts, and a signing contract into a ready configuration, asks every
//! participant to vote for the signing domain (which triggers distributed key generation), and
//! finally confirms that the contract and every participant endpoint report ready.
//!
//! Every stage is safe to re-run after a crash at any step:
//! - Accounts that already exist are verified (never mutated). If an existing account is not
//!   controlled by the expected key, provisioning stops with [Error::KeyAuthorityMismatch].
//! - Contract deployment and initialization are skipped when already done, and "already
//!   initialized" or "already voted" rejections are treated as success.
//! - The only retried failure is the chain reporting that a transaction's reference block no
//!   longer belongs to the canonical chain (see [retry::Policy::chain]).
//!
//! # Usage (Provision)
//!
//! ```bash
//! provisioner provision --config config.yaml --topology topology.yaml --secrets secrets.yaml
//! ```
//!
//! # Usage (Patch Localnet Genesis)
//!
//! ```bash
//! provisioner genesis --config config.yaml --topology topology.yaml --secrets secrets.yaml \
//!     --genesis ~/.near/localnet/node0/genesis.json
//! ```

use std::{path::PathBuf, time::Duration};
use thiserror::Error;

pub mod account;
pub mod contract;
pub mod convergence;
pub mod genesis;
pub mod hierarchy;
pub mod keys;
pub mod ledger;
pub mod orchestrator;
pub mod participants;
pub mod retry;
pub mod rpc;
pub mod secrets;
pub mod session;
pub mod stage;
pub mod topology;
pub mod voting;

#[cfg(test)]
mod mocks;

pub use account::{AccountId, ContractId};
pub use keys::{KeyPair, PublicKey};
pub use orchestrator::{Config, Network, Orchestrator};

/// Category of a fatal fault, for callers that react to the kind rather than the message.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Kind {
    /// Missing artifact, missing secret, malformed identifier, or missing key source.
    Configuration,
    /// An existing account is not controlled by the expected key.
    KeyAuthorityMismatch,
    /// The chain view kept racing transaction submission after every retry.
    TransientChainRace,
    /// A polling loop exhausted its attempt budget.
    ConvergenceTimeout,
    /// The caller-imposed deadline elapsed.
    Deadline,
    /// Any other collaborator failure.
    Unclassified,
}

#[derive(Error, Debug)]
pub enum Error {
    #[error("invalid account id {id}: {reason}")]
    InvalidAccountId { id: String, reason: &'static str },
    #[error("invalid contract id {id}: leaf must be {prefix}<version> below a parent account")]
    InvalidContractId { id: String, prefix: String },
    #[error("invalid key: {0}")]
    InvalidKey(String),
    #[error("missing secret {name}: add it to the secret store and re-run")]
    MissingSecret { name: String },
    #[error("missing code artifact {}: build the contract and re-run", path.display())]
    MissingArtifact { path: PathBuf },
    #[error("master account {account} does not exist: fund it on the chain before provisioning")]
    MissingMaster { account: AccountId },
    #[error("contract {contract} is not below master account {master}: pick a contract id the master can create")]
    UncreatableContract {
        contract: AccountId,
        master: AccountId,
    },
    #[error("participant {name} cannot be created by master account {master}: rename it to <name>.{master}")]
    UncreatableParticipant { name: String, master: AccountId },
    #[error("duplicate participant {0}")]
    DuplicateParticipant(AccountId),
    #[error("participant {index} uses the same key for chain authority and network identity: provision distinct secrets")]
    ConflatedKeys { index: usize },
    #[error("invalid threshold {threshold} for {participants} participants")]
    InvalidThreshold { threshold: u64, participants: usize },
    #[error("no signing key registered for {0}")]
    MissingKey(AccountId),
    #[error("invalid genesis {}: {reason}", path.display())]
    InvalidGenesis { path: PathBuf, reason: String },
    #[error("key authority mismatch on {account}: {expected} is not among its access keys (created by an earlier run with a different key?); reset the chain state and re-run")]
    KeyAuthorityMismatch {
        account: AccountId,
        expected: PublicKey,
    },
    #[error("{operation} on {account} kept racing the chain view after {attempts} attempts: {source}")]
    ChainRace {
        operation: &'static str,
        account: AccountId,
        attempts: usize,
        #[source]
        source: ledger::Error,
    },
    #[error("{target} not ready after {attempts} attempts")]
    ConvergenceTimeout { target: String, attempts: usize },
    #[error("{} of {total} votes failed: {failures:?}", failures.len())]
    VotesFailed {
        total: usize,
        failures: Vec<(AccountId, String)>,
    },
    #[error("{operation} on {account} failed: {source}")]
    Ledger {
        operation: &'static str,
        account: AccountId,
        #[source]
        source: ledger::Error,
    },
    #[error("failed to connect to {endpoint}: {source}")]
    Connect {
        endpoint: String,
        #[source]
        source: ledger::Error,
    },
    #[error("session is not connected")]
    NotConnected,
    #[error("deadline of {0:?} exceeded")]
    DeadlineExceeded(Duration),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("yaml error: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
}

impl Error {
    pub fn kind(&self) -> Kind {
        match self {
            Error::InvalidAccountId { .. }
            | Error::InvalidContractId { .. }
            | Error::InvalidKey(_)
            | Error::MissingSecret { .. }
            | Error::MissingArtifact { .. }
            | Error::MissingMaster { .. }
            | Error::UncreatableContract { .. }
            | Error::UncreatableParticipant { .. }
            | Error::DuplicateParticipant(_)
            | Error::ConflatedKeys { .. }
            | Error::InvalidThreshold { .. }
            | Error::MissingKey(_)
            | Error::InvalidGenesis { .. }
            | Error::Io(_)
            | Error::Yaml(_) => Kind::Configuration,
            Error::KeyAuthorityMismatch { .. } => Kind::KeyAuthorityMismatch,
            Error::ChainRace { .. } => Kind::TransientChainRace,
            Error::ConvergenceTimeout { .. } => Kind::ConvergenceTimeout,
            Error::DeadlineExceeded(_) => Kind::Deadline,
            Error::VotesFailed { .. }
            | Error::Ledger { .. }
            | Error::Connect { .. }
            | Error::NotConnected
            | Error::Json(_)
            | Error::Http(_) => Kind::Unclassified,
        }
    }
}
