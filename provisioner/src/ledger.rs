//! Interface to the chain the network is provisioned on.
//!
//! The chain is treated as an opaque ledger of accounts, access keys, and contract state. Failures
//! are classified into a small set of kinds the reconcilers can act on:
//! - [Error::NotFound]: the queried account does not exist.
//! - [Error::StaleReference]: the transaction referenced a block that is no longer canonical
//!   (the only condition retried, see [crate::retry::Policy::chain]).
//! - [Error::Rejected]: the transaction executed and failed with a named reason (some reasons
//!   are absorbed as "already done").
//! - [Error::Other]: anything else.
//!
//! Structured codes are preferred wherever the RPC provides them. The substring lists below are
//! the fallback and encode real recoverable conditions: keep them as they are.

use crate::{account::AccountId, keys::KeyPair, keys::PublicKey, retry::Failure};
use serde_json::Value;
use std::future::Future;
use thiserror::Error;

/// Code hash reported for accounts without a deployed contract
pub const NO_CODE: &str = "11111111111111111111111111111111";

/// Messages meaning the queried entity does not exist
pub const NOT_FOUND: &[&str] = &["does not exist", "UNKNOWN_ACCOUNT"];

/// Messages meaning the transaction's reference block left the canonical chain
pub const STALE_REFERENCE: &[&str] = &["doesn't belong to the current chain"];

/// Rejections meaning the contract was initialized by an earlier run
pub const ALREADY_INITIALIZED: &[&str] = &["already been initialized", "already initialized"];

/// Rejections meaning the participant's vote already counts
pub const ALREADY_VOTED: &[&str] = &["already voted", "already in progress"];

/// Probe failures meaning the contract has not been initialized yet
pub const NOT_INITIALIZED: &[&str] = &[
    "not initialized",
    "does not exist",
    "CodeDoesNotExist",
    "MethodNotFound",
];

/// Returns true if `message` contains any of `markers`.
pub fn matches(markers: &[&str], message: &str) -> bool {
    markers.iter().any(|marker| message.contains(marker))
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    #[error("not found: {0}")]
    NotFound(String),
    #[error("stale reference block: {0}")]
    StaleReference(String),
    #[error("rejected: {0}")]
    Rejected(String),
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Classify an unstructured failure message.
    pub fn classify(message: impl Into<String>) -> Self {
        let message = message.into();
        if matches(STALE_REFERENCE, &message) {
            Error::StaleReference(message)
        } else if matches(NOT_FOUND, &message) {
            Error::NotFound(message)
        } else {
            Error::Other(message)
        }
    }

    pub fn message(&self) -> &str {
        match self {
            Error::NotFound(m) | Error::StaleReference(m) | Error::Rejected(m) | Error::Other(m) => m,
        }
    }

    pub fn is_stale(&self) -> bool {
        matches!(self, Error::StaleReference(_))
    }

    /// Returns true if the failure is a rejection carrying one of `markers`.
    pub fn is_rejection(&self, markers: &[&str]) -> bool {
        match self {
            Error::Rejected(reason) => matches(markers, reason),
            _ => false,
        }
    }
}

impl Failure<Error> {
    /// Convert a failed chain operation into a fatal fault.
    pub fn into_fault(self, operation: &'static str, account: &AccountId) -> crate::Error {
        match self {
            Failure::Exhausted { error, attempts } => crate::Error::ChainRace {
                operation,
                account: account.clone(),
                attempts,
                source: error,
            },
            Failure::Aborted { error, .. } => crate::Error::Ledger {
                operation,
                account: account.clone(),
                source: error,
            },
        }
    }
}

/// State of an account.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AccountView {
    pub amount: u128,
    pub code_hash: String,
}

impl AccountView {
    pub fn has_code(&self) -> bool {
        self.code_hash != NO_CODE
    }
}

/// An account and the key it signs with.
#[derive(Clone, Copy, Debug)]
pub struct Signer<'a> {
    pub account: &'a AccountId,
    pub key: &'a KeyPair,
}

/// A mutating contract call.
#[derive(Clone, Debug)]
pub struct FunctionCall {
    pub contract: AccountId,
    pub method: &'static str,
    pub args: Value,
    pub gas: u64,
    pub deposit: u128,
}

/// Builds a [Ledger] client for an endpoint.
pub trait Connector: Send + Sync {
    type Ledger: Ledger;

    fn connect(&self, endpoint: &str, network: &str) -> Result<Self::Ledger, Error>;
}

/// Queries and signed transactions against the chain.
pub trait Ledger: Send + Sync {
    /// Fetch the state of `account`.
    fn view_account(
        &self,
        account: &AccountId,
    ) -> impl Future<Output = Result<AccountView, Error>> + Send;

    /// Fetch the public keys authorized to sign for `account`.
    fn access_keys(
        &self,
        account: &AccountId,
    ) -> impl Future<Output = Result<Vec<PublicKey>, Error>> + Send;

    /// Call a read-only contract method.
    fn view(
        &self,
        contract: &AccountId,
        method: &str,
        args: &Value,
    ) -> impl Future<Output = Result<Value, Error>> + Send;

    /// Create `account` (a sub-account of the signer) controlled by `public_key`
    /// and funded with `amount`.
    fn create_account(
        &self,
        signer: Signer<'_>,
        account: &AccountId,
        public_key: &PublicKey,
        amount: u128,
    ) -> impl Future<Output = Result<(), Error>> + Send;

    /// Deploy `code` to the signer's own account.
    fn deploy(
        &self,
        signer: Signer<'_>,
        code: &[u8],
    ) -> impl Future<Output = Result<(), Error>> + Send;

    /// Submit a contract call and return its decoded result.
    fn call(
        &self,
        signer: Signer<'_>,
        call: &FunctionCall,
    ) -> impl Future<Output = Result<Value, Error>> + Send;
}
