//! Pre-fund participant accounts in a localnet genesis file.
//!
//! Patching genesis lets a fresh localnet start with participant accounts already present, so
//! the reconcilers only verify them. Patching is idempotent: accounts already in the file are
//! left untouched.

use crate::{account::AccountId, keys::PublicKey, ledger::NO_CODE, Error};
use serde_json::{json, Value};
use std::path::Path;
use tracing::{info, warn};

/// An account to add to genesis.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GenesisAccount {
    pub account: AccountId,
    pub public_key: PublicKey,
}

/// Summary of a patched genesis file.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Patch {
    pub added: Vec<AccountId>,
    pub skipped: Vec<AccountId>,
}

fn invalid(path: &Path, reason: impl Into<String>) -> Error {
    Error::InvalidGenesis {
        path: path.to_path_buf(),
        reason: reason.into(),
    }
}

fn account_record(account: &AccountId, amount: u128) -> Value {
    json!({
        "Account": {
            "account_id": account,
            "account": {
                "amount": amount.to_string(),
                "locked": "0",
                "code_hash": NO_CODE,
                "storage_usage": 0,
                "version": "V1",
            }
        }
    })
}

fn access_key_record(account: &AccountId, public_key: &PublicKey) -> Value {
    json!({
        "AccessKey": {
            "account_id": account,
            "public_key": public_key,
            "access_key": {
                "nonce": 0,
                "permission": "FullAccess",
            }
        }
    })
}

/// Add every missing account (funded with `amount`) to the genesis file at `path`, deducting
/// the total from `treasury`.
///
/// Returns `None` if the file does not exist.
pub fn patch(
    path: &Path,
    accounts: &[GenesisAccount],
    amount: u128,
    treasury: &AccountId,
) -> Result<Option<Patch>, Error> {
    let raw = match std::fs::read(path) {
        Ok(raw) => raw,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            warn!(path = ?path, "genesis not found, skipping");
            return Ok(None);
        }
        Err(err) => return Err(err.into()),
    };
    let mut genesis: Value = serde_json::from_slice(&raw)?;
    let records = genesis
        .get_mut("records")
        .and_then(Value::as_array_mut)
        .ok_or_else(|| invalid(path, "missing records"))?;

    let existing: Vec<String> = records
        .iter()
        .filter_map(|record| record.pointer("/Account/account_id")?.as_str())
        .map(str::to_string)
        .collect();
    let mut patch = Patch::default();
    for entry in accounts {
        if existing.iter().any(|id| id == entry.account.as_str()) {
            info!(account = %entry.account, "already in genesis");
            patch.skipped.push(entry.account.clone());
            continue;
        }
        records.push(account_record(&entry.account, amount));
        records.push(access_key_record(&entry.account, &entry.public_key));
        info!(account = %entry.account, "added to genesis");
        patch.added.push(entry.account.clone());
    }
    if patch.added.is_empty() {
        return Ok(Some(patch));
    }

    // Keep total supply unchanged
    let total = amount
        .checked_mul(patch.added.len() as u128)
        .ok_or_else(|| invalid(path, "funding overflows"))?;
    let balance = records
        .iter_mut()
        .find(|record| {
            record.pointer("/Account/account_id").and_then(Value::as_str) == Some(treasury.as_str())
        })
        .and_then(|record| record.pointer_mut("/Account/account/amount"))
        .ok_or_else(|| invalid(path, format!("treasury {treasury} not found")))?;
    let current: u128 = balance
        .as_str()
        .and_then(|amount| amount.parse().ok())
        .ok_or_else(|| invalid(path, format!("treasury {treasury} has a malformed balance")))?;
    let remaining = current
        .checked_sub(total)
        .ok_or_else(|| invalid(path, format!("treasury {treasury} cannot cover {total}")))?;
    *balance = json!(remaining.to_string());
    info!(%treasury, deducted = total, "deducted from treasury");

    std::fs::write(path, serde_json::to_string_pretty(&genesis)?)?;
    Ok(Some(patch))
}
