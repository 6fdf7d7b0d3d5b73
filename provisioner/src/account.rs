//! Hierarchical account identifiers.

use crate::Error;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Minimum length of an account identifier
pub const MIN_ACCOUNT_LEN: usize = 2;

/// Maximum length of an account identifier
pub const MAX_ACCOUNT_LEN: usize = 64;

/// Default prefix of the contract's leaf segment (e.g. `v1`)
pub const DEFAULT_CONTRACT_TAG: &str = "v";

/// An account identifier of the form `child.parent.root`.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct AccountId(String);

impl AccountId {
    /// Parse and validate an account identifier.
    pub fn parse(id: &str) -> Result<Self, Error> {
        let invalid = |reason| Error::InvalidAccountId {
            id: id.to_string(),
            reason,
        };
        if id.len() < MIN_ACCOUNT_LEN || id.len() > MAX_ACCOUNT_LEN {
            return Err(invalid("length must be between 2 and 64"));
        }
        let mut previous_separator = true;
        for c in id.chars() {
            match c {
                'a'..='z' | '0'..='9' => previous_separator = false,
                '-' | '_' | '.' => {
                    if previous_separator {
                        return Err(invalid("separators must sit between alphanumerics"));
                    }
                    previous_separator = true;
                }
                _ => return Err(invalid("only lowercase alphanumerics and - _ . are allowed")),
            }
        }
        if previous_separator {
            return Err(invalid("separators must sit between alphanumerics"));
        }
        Ok(Self(id.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns the first segment of the identifier.
    pub fn leaf(&self) -> &str {
        self.0.split('.').next().unwrap_or(&self.0)
    }

    /// Returns the identifier without its leaf segment (if any).
    pub fn parent(&self) -> Option<AccountId> {
        self.0
            .split_once('.')
            .map(|(_, parent)| AccountId(parent.to_string()))
    }

    /// Returns the direct sub-account `<leaf>.<self>`.
    pub fn sub_account(&self, leaf: &str) -> Result<AccountId, Error> {
        Self::parse(&format!("{leaf}.{}", self.0))
    }

    /// Returns true if `self` is exactly one level below `parent`.
    pub fn is_sub_account_of(&self, parent: &AccountId) -> bool {
        self.parent().as_ref() == Some(parent)
    }

    /// Returns true if `self` sits anywhere below `ancestor`.
    pub fn is_descendant_of(&self, ancestor: &AccountId) -> bool {
        self.0.len() > ancestor.0.len()
            && self.0.ends_with(&ancestor.0)
            && self.0.as_bytes()[self.0.len() - ancestor.0.len() - 1] == b'.'
    }

    /// Lists every account strictly below `ancestor` on the way to (and including) `self`,
    /// ordered from the one adjacent to `ancestor` down to `self`.
    ///
    /// Returns an empty list if `self` is not a descendant of `ancestor`.
    pub fn lineage(&self, ancestor: &AccountId) -> Vec<AccountId> {
        let mut lineage = Vec::new();
        let mut current = Some(self.clone());
        while let Some(account) = current {
            if &account == ancestor {
                lineage.reverse();
                return lineage;
            }
            current = account.parent();
            lineage.push(account);
        }
        Vec::new()
    }
}

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for AccountId {
    type Error = Error;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<AccountId> for String {
    fn from(value: AccountId) -> Self {
        value.0
    }
}

/// The account the signing contract is deployed to.
///
/// The leaf segment must be a version tag (`<prefix><digits>`, e.g. `v1`) and the
/// identifier must have a parent to be created by.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ContractId(AccountId);

impl ContractId {
    pub fn parse(id: &str, prefix: &str) -> Result<Self, Error> {
        let invalid = || Error::InvalidContractId {
            id: id.to_string(),
            prefix: prefix.to_string(),
        };
        let account = AccountId::parse(id).map_err(|_| invalid())?;
        if account.parent().is_none() {
            return Err(invalid());
        }
        let version = account.leaf().strip_prefix(prefix).ok_or_else(invalid)?;
        if version.is_empty() || !version.chars().all(|c| c.is_ascii_digit()) {
            return Err(invalid());
        }
        Ok(Self(account))
    }

    pub fn account(&self) -> &AccountId {
        &self.0
    }
}

impl fmt::Display for ContractId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}
