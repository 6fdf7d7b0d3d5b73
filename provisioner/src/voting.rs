//! Ask every participant to vote for the signing domain.
//!
//! The contract decides when enough votes arrived; this module only makes sure every
//! participant with a known key submitted its vote.

use crate::{
    account::AccountId,
    ledger::{self, Connector, FunctionCall, Ledger, ALREADY_VOTED},
    participants::ParticipantInfo,
    retry::{retry, Policy},
    session::Session,
    Error,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{error, info, warn};

/// Entry point voting to add signing domains
pub const VOTE_METHOD: &str = "vote_add_domains";

/// Scheme of the domain required to bootstrap signing
pub const DEFAULT_SCHEME: &str = "Secp256k1";

/// A signing scheme instance the network generates key material for.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Domain {
    pub id: u64,
    pub scheme: String,
}

impl Default for Domain {
    fn default() -> Self {
        Self {
            id: 0,
            scheme: DEFAULT_SCHEME.to_string(),
        }
    }
}

/// Outcome of a voting round.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct VoteReport {
    /// Votes accepted by the contract.
    pub submitted: Vec<AccountId>,
    /// Votes rejected because they were already counted.
    pub absorbed: Vec<AccountId>,
    /// Participants without a cached key.
    pub skipped: Vec<AccountId>,
}

/// Submit one vote for `domain` from every participant, in index order.
///
/// Participants without a cached key are skipped (the contract's quorum rule decides whether the
/// remaining votes suffice). A failed vote does not stop the remaining participants from voting,
/// but fails the round once everyone had their turn.
pub async fn vote<C: Connector>(
    session: &Session<C>,
    contract: &AccountId,
    participants: &[ParticipantInfo],
    domain: &Domain,
    gas: u64,
) -> Result<VoteReport, Error> {
    let ledger = session.ledger()?;
    let call = FunctionCall {
        contract: contract.clone(),
        method: VOTE_METHOD,
        args: json!({ "domains": [domain] }),
        gas,
        deposit: 0,
    };

    let mut ordered: Vec<_> = participants.iter().collect();
    ordered.sort_by_key(|p| p.index);
    let mut report = VoteReport::default();
    let mut failures = Vec::new();
    for participant in ordered {
        let account = &participant.account;
        let Ok(signer) = session.signer(account) else {
            warn!(%account, index = participant.index, "no key available, skipping vote");
            report.skipped.push(account.clone());
            continue;
        };
        match retry(&Policy::chain(), |_| ledger.call(signer, &call), ledger::Error::is_stale).await {
            Ok(_) => {
                info!(%account, domain = domain.id, "submitted vote");
                report.submitted.push(account.clone());
            }
            Err(failure) if failure.error().is_rejection(ALREADY_VOTED) => {
                info!(%account, reason = failure.error().message(), "vote already counted");
                report.absorbed.push(account.clone());
            }
            Err(failure) => {
                let fault = failure.into_fault("vote", account);
                error!(%account, error = %fault, "vote failed");
                failures.push((account.clone(), fault.to_string()));
            }
        }
    }

    if !report.skipped.is_empty() {
        warn!(skipped = ?report.skipped, "partial quorum: some participants did not vote");
    }
    if !failures.is_empty() {
        return Err(Error::VotesFailed {
            total: participants.len(),
            failures,
        });
    }
    Ok(report)
}
