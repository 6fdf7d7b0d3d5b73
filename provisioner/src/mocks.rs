//! In-memory chain and probe for tests.

use crate::{
    account::AccountId,
    contract::{code_hash, init_args, INIT_METHOD, STATE_METHOD},
    convergence::Probe,
    keys::{KeyPair, PublicKey},
    ledger::{self, AccountView, Connector, FunctionCall, Ledger, Signer, NO_CODE},
    participants::{endpoint, ParticipantInfo, DEFAULT_PARTICIPANT_PORT},
    secrets::{account_key_name, network_key_name, LocalSecrets},
    topology::Placement,
    voting::VOTE_METHOD,
};
use rand::{rngs::StdRng, Rng, SeedableRng};
use serde_json::{json, Value};
use std::{
    collections::{BTreeMap, BTreeSet, HashMap, VecDeque},
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    },
    path::PathBuf,
};

/// A fresh path under the system temp directory (not created).
pub fn temp_dir(prefix: &str) -> PathBuf {
    let mut rng = StdRng::from_entropy();
    std::env::temp_dir().join(format!("{prefix}_{}", rng.gen::<u64>()))
}

/// Keys of a test participant.
pub struct TestKeys {
    pub account: KeyPair,
    pub network: KeyPair,
}

fn participant_keys(index: usize) -> TestKeys {
    TestKeys {
        account: KeyPair::from_seed([10 + index as u8; 32]),
        network: KeyPair::from_seed([50 + index as u8; 32]),
    }
}

/// A secret store holding keys for `n` participants.
pub fn secrets(n: usize) -> (LocalSecrets, Vec<TestKeys>) {
    let keys: Vec<_> = (0..n).map(participant_keys).collect();
    let store = keys
        .iter()
        .enumerate()
        .flat_map(|(index, keys)| {
            [
                (account_key_name(index), keys.account.to_secret_string()),
                (network_key_name(index), keys.network.to_secret_string()),
            ]
        })
        .collect();
    (store, keys)
}

/// Placements `mpc-node-<i>` at `10.0.0.<i>`.
pub fn placements(n: usize) -> Vec<Placement> {
    (0..n)
        .map(|index| Placement {
            name: format!("mpc-node-{index}"),
            address: format!("10.0.0.{index}"),
        })
        .collect()
}

/// The registry [placements] resolves to under `localnet`.
pub fn registry(n: usize) -> Vec<ParticipantInfo> {
    (0..n)
        .map(|index| ParticipantInfo {
            account: AccountId::parse(&format!("mpc-node-{index}.localnet")).unwrap(),
            index,
            network_key: participant_keys(index).network.public_key(),
            url: endpoint(&format!("10.0.0.{index}"), DEFAULT_PARTICIPANT_PORT),
        })
        .collect()
}

/// A successful contract call.
#[derive(Clone, Debug)]
pub struct Call {
    pub signer: AccountId,
    pub contract: AccountId,
    pub args: Value,
}

struct Account {
    keys: Vec<PublicKey>,
    amount: u128,
    code: Option<Vec<u8>>,
}

#[derive(Default)]
struct Contract {
    initialized: bool,
    threshold: usize,
    participants: Vec<AccountId>,
    votes: BTreeSet<AccountId>,
}

#[derive(Default)]
struct State {
    connections: usize,
    queries: usize,
    accounts: BTreeMap<AccountId, Account>,
    contracts: BTreeMap<AccountId, Contract>,
    faults: HashMap<String, VecDeque<ledger::Error>>,
    attempts: HashMap<String, usize>,
    creations: Vec<(AccountId, AccountId)>,
    calls: HashMap<String, Vec<Call>>,
}

impl State {
    fn query(&mut self, operation: &str) -> Result<(), ledger::Error> {
        self.queries += 1;
        self.fault(operation)
    }

    fn attempt(&mut self, operation: &str) -> Result<(), ledger::Error> {
        *self.attempts.entry(operation.to_string()).or_default() += 1;
        self.fault(operation)
    }

    fn fault(&mut self, operation: &str) -> Result<(), ledger::Error> {
        match self.faults.get_mut(operation).and_then(VecDeque::pop_front) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn authorize(&self, signer: Signer<'_>) -> Result<(), ledger::Error> {
        let authorized = self
            .accounts
            .get(signer.account)
            .is_some_and(|account| account.keys.contains(&signer.key.public_key()));
        if !authorized {
            return Err(ledger::Error::Rejected(format!(
                "InvalidAccessKeyError: access key not found for {}",
                signer.account
            )));
        }
        Ok(())
    }

    fn initialize(&mut self, contract: &AccountId, args: &Value) -> Result<(), ledger::Error> {
        let state = self.contracts.entry(contract.clone()).or_default();
        if state.initialized {
            return Err(ledger::Error::Rejected(
                "Smart contract panicked: Contract has already been initialized".into(),
            ));
        }
        let participants = args
            .pointer("/parameters/participants/participants")
            .and_then(Value::as_array)
            .ok_or_else(|| ledger::Error::Rejected("invalid parameters".into()))?;
        state.participants = participants
            .iter()
            .filter_map(|entry| entry[0].as_str())
            .filter_map(|id| AccountId::parse(id).ok())
            .collect();
        state.threshold = args
            .pointer("/parameters/threshold")
            .and_then(Value::as_u64)
            .unwrap_or_default() as usize;
        state.initialized = true;
        Ok(())
    }

    fn vote(&mut self, contract: &AccountId, voter: &AccountId) -> Result<(), ledger::Error> {
        let state = self.contracts.entry(contract.clone()).or_default();
        if !state.initialized {
            return Err(ledger::Error::Rejected(
                "Smart contract panicked: Contract is not initialized".into(),
            ));
        }
        if !state.participants.contains(voter) {
            return Err(ledger::Error::Rejected(format!("{voter} is not a participant")));
        }
        if !state.votes.insert(voter.clone()) {
            return Err(ledger::Error::Rejected(format!("{voter} already voted")));
        }
        Ok(())
    }
}

/// A chain kept in memory, shared by every clone.
#[derive(Clone, Default)]
pub struct MockChain {
    state: Arc<Mutex<State>>,
}

impl MockChain {
    fn state(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().unwrap()
    }

    /// Add `account` controlled by `key` (or add `key` to an existing account).
    pub fn add_account(&self, account: &AccountId, key: PublicKey) {
        let mut state = self.state();
        let entry = state.accounts.entry(account.clone()).or_insert(Account {
            keys: Vec::new(),
            amount: 0,
            code: None,
        });
        entry.keys.push(key);
    }

    pub fn set_code(&self, account: &AccountId, code: Vec<u8>) {
        if let Some(entry) = self.state().accounts.get_mut(account) {
            entry.code = Some(code);
        }
    }

    /// Initialize `contract` directly (without a transaction).
    pub fn initialize(&self, contract: &AccountId, registry: &[ParticipantInfo], threshold: u64) {
        self.state()
            .initialize(contract, &init_args(registry, threshold))
            .unwrap();
    }

    /// Make the next `times` invocations of `operation` fail with `err`.
    ///
    /// `operation` is a [Ledger] method name or, for calls, the contract method.
    pub fn fail_next(&self, operation: &str, err: ledger::Error, times: usize) {
        let mut state = self.state();
        let faults = state.faults.entry(operation.to_string()).or_default();
        faults.extend(std::iter::repeat(err).take(times));
    }

    pub fn connections(&self) -> usize {
        self.state().connections
    }

    /// Number of read-only requests.
    pub fn queries(&self) -> usize {
        self.state().queries
    }

    /// Number of submitted transactions of `operation` (successful or not).
    pub fn attempts(&self, operation: &str) -> usize {
        self.state().attempts.get(operation).copied().unwrap_or_default()
    }

    /// Number of submitted transactions of any kind.
    pub fn mutations(&self) -> usize {
        self.state().attempts.values().sum()
    }

    /// Successful account creations as `(creator, created)`.
    pub fn creations(&self) -> Vec<(AccountId, AccountId)> {
        self.state().creations.clone()
    }

    /// Successful calls of contract `method`.
    pub fn calls(&self, method: &str) -> Vec<Call> {
        self.state().calls.get(method).cloned().unwrap_or_default()
    }

    pub fn access_keys_of(&self, account: &AccountId) -> Vec<PublicKey> {
        self.state()
            .accounts
            .get(account)
            .map(|a| a.keys.clone())
            .unwrap_or_default()
    }

    pub fn balance(&self, account: &AccountId) -> Option<u128> {
        self.state().accounts.get(account).map(|a| a.amount)
    }

    pub fn code_hash(&self, account: &AccountId) -> Option<String> {
        self.state()
            .accounts
            .get(account)
            .and_then(|a| a.code.as_deref().map(code_hash))
    }

    pub fn votes(&self, contract: &AccountId) -> Vec<AccountId> {
        self.state()
            .contracts
            .get(contract)
            .map(|c| c.votes.iter().cloned().collect())
            .unwrap_or_default()
    }
}

impl Connector for MockChain {
    type Ledger = MockChain;

    fn connect(&self, _endpoint: &str, _network: &str) -> Result<Self::Ledger, ledger::Error> {
        self.state().connections += 1;
        Ok(self.clone())
    }
}

impl Ledger for MockChain {
    async fn view_account(&self, account: &AccountId) -> Result<AccountView, ledger::Error> {
        let mut state = self.state();
        state.query("view_account")?;
        let entry = state.accounts.get(account).ok_or_else(|| {
            ledger::Error::NotFound(format!("account {account} does not exist while viewing"))
        })?;
        Ok(AccountView {
            amount: entry.amount,
            code_hash: entry
                .code
                .as_deref()
                .map(code_hash)
                .unwrap_or_else(|| NO_CODE.to_string()),
        })
    }

    async fn access_keys(&self, account: &AccountId) -> Result<Vec<PublicKey>, ledger::Error> {
        let mut state = self.state();
        state.query("access_keys")?;
        state
            .accounts
            .get(account)
            .map(|a| a.keys.clone())
            .ok_or_else(|| ledger::Error::NotFound(format!("account {account} does not exist")))
    }

    async fn view(&self, contract: &AccountId, method: &str, _args: &Value) -> Result<Value, ledger::Error> {
        let mut state = self.state();
        state.query("view")?;
        let account = state.accounts.get(contract).ok_or_else(|| {
            ledger::Error::NotFound(format!("account {contract} does not exist while viewing"))
        })?;
        if account.code.is_none() {
            return Err(ledger::Error::Other(
                "wasm execution failed with error: CodeDoesNotExist".into(),
            ));
        }
        if method != STATE_METHOD {
            return Err(ledger::Error::Other("MethodNotFound".into()));
        }
        let Some(contract) = state.contracts.get(contract).filter(|c| c.initialized) else {
            return Err(ledger::Error::Other(
                "Smart contract panicked: Contract is not initialized".into(),
            ));
        };
        let state = if contract.votes.is_empty() {
            json!({"Running": {"domains": {"domains": []}}})
        } else if contract.votes.len() < contract.threshold {
            json!({"Initializing": {"domains": {"domains": [{"id": 0, "scheme": "Secp256k1"}]}}})
        } else {
            json!({"Running": {"domains": {"domains": [{"id": 0, "scheme": "Secp256k1"}]}}})
        };
        Ok(state)
    }

    async fn create_account(
        &self,
        signer: Signer<'_>,
        account: &AccountId,
        public_key: &PublicKey,
        amount: u128,
    ) -> Result<(), ledger::Error> {
        let mut state = self.state();
        state.attempt("create_account")?;
        state.authorize(signer)?;
        if !account.is_sub_account_of(signer.account) {
            return Err(ledger::Error::Rejected(format!(
                "CreateAccountNotAllowed: {signer} cannot create {account}",
                signer = signer.account
            )));
        }
        if state.accounts.contains_key(account) {
            return Err(ledger::Error::Rejected(format!("AccountAlreadyExists: {account}")));
        }
        state.accounts.insert(
            account.clone(),
            Account {
                keys: vec![*public_key],
                amount,
                code: None,
            },
        );
        state.creations.push((signer.account.clone(), account.clone()));
        Ok(())
    }

    async fn deploy(&self, signer: Signer<'_>, code: &[u8]) -> Result<(), ledger::Error> {
        let mut state = self.state();
        state.attempt("deploy")?;
        state.authorize(signer)?;
        if let Some(account) = state.accounts.get_mut(signer.account) {
            account.code = Some(code.to_vec());
        }
        Ok(())
    }

    async fn call(&self, signer: Signer<'_>, call: &FunctionCall) -> Result<Value, ledger::Error> {
        let mut state = self.state();
        state.attempt(call.method)?;
        state.authorize(signer)?;
        let deployed = state
            .accounts
            .get(&call.contract)
            .is_some_and(|a| a.code.is_some());
        if !deployed {
            return Err(ledger::Error::Rejected("CodeDoesNotExist".into()));
        }
        match call.method {
            INIT_METHOD => state.initialize(&call.contract, &call.args)?,
            VOTE_METHOD => state.vote(&call.contract, signer.account)?,
            other => return Err(ledger::Error::Rejected(format!("MethodNotFound: {other}"))),
        }
        state.calls.entry(call.method.to_string()).or_default().push(Call {
            signer: signer.account.clone(),
            contract: call.contract.clone(),
            args: call.args.clone(),
        });
        Ok(Value::Null)
    }
}

/// A probe with scripted answers.
#[derive(Default)]
pub struct MockProbe {
    ready_after: AtomicUsize,
    contract_probes: AtomicUsize,
    endpoint_probes: AtomicUsize,
    unhealthy: Mutex<BTreeSet<String>>,
}

impl MockProbe {
    pub fn set_contract_ready(&self, ready: bool) {
        let after = if ready { 0 } else { usize::MAX };
        self.ready_after.store(after, Ordering::SeqCst);
    }

    /// Report the contract ready from the `probes`-th probe on.
    pub fn set_contract_ready_after(&self, probes: usize) {
        self.ready_after.store(probes, Ordering::SeqCst);
    }

    pub fn set_unhealthy(&self, url: &str) {
        self.unhealthy.lock().unwrap().insert(url.to_string());
    }

    pub fn contract_probes(&self) -> usize {
        self.contract_probes.load(Ordering::SeqCst)
    }

    pub fn endpoint_probes(&self) -> usize {
        self.endpoint_probes.load(Ordering::SeqCst)
    }
}

impl Probe for MockProbe {
    async fn contract_ready<L: Ledger>(&self, _ledger: &L, _contract: &AccountId) -> bool {
        let probes = self.contract_probes.fetch_add(1, Ordering::SeqCst) + 1;
        probes >= self.ready_after.load(Ordering::SeqCst)
    }

    async fn endpoint_healthy(&self, url: &str) -> bool {
        self.endpoint_probes.fetch_add(1, Ordering::SeqCst);
        !self.unhealthy.lock().unwrap().contains(url)
    }
}
