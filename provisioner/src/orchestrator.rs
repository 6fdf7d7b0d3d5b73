//! Drive every stage of provisioning, in order, against a single session.

use crate::{
    account::{AccountId, ContractId, DEFAULT_CONTRACT_TAG},
    contract::{self, DEFAULT_GAS},
    convergence::{self, Probe},
    genesis::{self, GenesisAccount, Patch},
    hierarchy,
    ledger::Connector,
    participants::{self, ParticipantInfo, DEFAULT_LEGACY_PARENTS, DEFAULT_PARTICIPANT_PORT},
    retry::Policy,
    secrets::{KeySource, SecretStore},
    session::Session,
    stage::{Stage, Tracker},
    topology::Topology,
    voting::{self, Domain},
    Error,
};
use serde::{Deserialize, Serialize};
use std::{
    fs::File,
    future::Future,
    path::{Path, PathBuf},
    time::Duration,
};
use tracing::{error, info};

/// One NEAR in yoctoNEAR
pub const NEAR: u128 = 1_000_000_000_000_000_000_000_000;

/// Amounts are written as yoctoNEAR strings (YAML integers cannot hold them).
mod yocto {
    use serde::{de::Error as _, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(amount: &u128, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&amount.to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u128, D::Error> {
        let text = String::deserialize(deserializer)?;
        text.parse()
            .map_err(|_| D::Error::custom(format!("invalid yoctoNEAR amount: {text}")))
    }
}

/// Balances given to newly created accounts.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Funding {
    /// Kept by each intermediate account (on top of what it passes down).
    #[serde(with = "yocto")]
    pub intermediate: u128,
    #[serde(with = "yocto")]
    pub contract: u128,
    #[serde(with = "yocto")]
    pub participant: u128,
}

impl Default for Funding {
    fn default() -> Self {
        Self {
            intermediate: 10 * NEAR,
            contract: 50 * NEAR,
            participant: 10 * NEAR,
        }
    }
}

fn default_contract_tag() -> String {
    DEFAULT_CONTRACT_TAG.to_string()
}

fn default_port() -> u16 {
    DEFAULT_PARTICIPANT_PORT
}

fn default_legacy_parents() -> Vec<String> {
    DEFAULT_LEGACY_PARENTS.iter().map(|p| p.to_string()).collect()
}

fn default_gas() -> u64 {
    DEFAULT_GAS
}

/// Provisioning configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Config {
    /// RPC endpoint of a chain node.
    pub rpc: String,
    /// Network (chain) id.
    pub network: String,
    /// Pre-existing account every other account descends from.
    pub master: AccountId,
    /// Written as a single-entry map (`secret: <name>` or `direct: <key>`).
    #[serde(with = "serde_yaml::with::singleton_map")]
    pub master_key: KeySource,
    /// Leaf prefix the contract account must carry (followed by a version).
    #[serde(default = "default_contract_tag")]
    pub contract_tag: String,
    /// Compiled contract artifact.
    pub code: PathBuf,
    pub threshold: u64,
    /// Port every participant serves on.
    #[serde(default = "default_port")]
    pub port: u16,
    /// Parents participant names are moved from to the master account.
    #[serde(default = "default_legacy_parents")]
    pub legacy_parents: Vec<String>,
    #[serde(default)]
    pub funding: Funding,
    #[serde(default = "default_gas")]
    pub gas: u64,
    #[serde(default)]
    pub domain: Domain,
    /// Abort provisioning after this many seconds.
    #[serde(default)]
    pub deadline: Option<u64>,
}

impl Config {
    pub fn load(path: &Path) -> Result<Self, Error> {
        let file = File::open(path)?;
        let config: Config = serde_yaml::from_reader(file)?;
        info!(path = ?path, master = %config.master, network = config.network.as_str(), "loaded config");
        Ok(config)
    }
}

/// A provisioned network.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Network {
    pub contract: AccountId,
    /// Ordered by participant index.
    pub participants: Vec<ParticipantInfo>,
}

/// Run `fut` as orchestration stage `name`, logging its outcome.
async fn stage<T>(name: &'static str, fut: impl Future<Output = Result<T, Error>>) -> Result<T, Error> {
    let mut tracker = Tracker::new(name);
    tracker.advance(Stage::Creating);
    info!(stage = name, "starting stage");
    let result = fut.await;
    match &result {
        Ok(_) => info!(stage = name, "stage done"),
        Err(err) => error!(stage = name, kind = ?err.kind(), error = %err, "stage failed"),
    }
    tracker.settle(result)
}

/// Provisions a network from configuration and topology.
pub struct Orchestrator<C: Connector + Clone, S: SecretStore, P: Probe> {
    config: Config,
    connector: C,
    secrets: S,
    probe: P,
}

impl<C: Connector + Clone, S: SecretStore, P: Probe> Orchestrator<C, S, P> {
    pub fn new(config: Config, connector: C, secrets: S, probe: P) -> Self {
        Self {
            config,
            connector,
            secrets,
            probe,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Bring the network described by `topology` to a ready state.
    ///
    /// Safe to re-run after a failure at any point. If a deadline is configured, exceeding it
    /// abandons the in-flight call and fails with [Error::DeadlineExceeded].
    pub async fn run(&self, topology: &Topology) -> Result<Network, Error> {
        let Some(seconds) = self.config.deadline else {
            return self.provision(topology).await;
        };
        let deadline = Duration::from_secs(seconds);
        tokio::time::timeout(deadline, self.provision(topology))
            .await
            .map_err(|_| {
                error!(?deadline, "deadline exceeded");
                Error::DeadlineExceeded(deadline)
            })?
    }

    async fn provision(&self, topology: &Topology) -> Result<Network, Error> {
        let config = &self.config;

        // Everything that can be checked offline is checked before connecting
        let contract = ContractId::parse(&topology.contract, &config.contract_tag)?;
        contract::validate_threshold(config.threshold, topology.participants.len())?;
        let master_key = config.master_key.resolve(&self.secrets).await?;
        let resolved = participants::resolve(
            &self.secrets,
            &topology.participants,
            &config.master,
            &config.legacy_parents,
            config.port,
        )
        .await?;
        info!(%contract, participants = resolved.len(), threshold = config.threshold, "resolved configuration");

        let mut session = Session::new(self.connector.clone());
        stage("connect", async { session.connect(&config.rpc, &config.network) }).await?;
        stage(
            "hierarchy",
            hierarchy::reconcile(
                &mut session,
                &config.master,
                &master_key,
                &contract,
                config.funding.intermediate,
                config.funding.contract,
            ),
        )
        .await?;
        let registry = stage(
            "participants",
            participants::reconcile(&mut session, &config.master, &resolved, config.funding.participant),
        )
        .await?;
        stage("deploy", contract::deploy(&session, &contract, &config.code)).await?;
        stage(
            "initialize",
            contract::initialize(
                &session,
                &contract,
                &config.master,
                &registry,
                config.threshold,
                config.gas,
            ),
        )
        .await?;
        let report = stage(
            "vote",
            voting::vote(&session, contract.account(), &registry, &config.domain, config.gas),
        )
        .await?;
        info!(
            submitted = report.submitted.len(),
            absorbed = report.absorbed.len(),
            skipped = report.skipped.len(),
            "votes settled"
        );
        stage(
            "convergence",
            convergence::await_convergence(
                session.ledger()?,
                &self.probe,
                contract.account(),
                &registry,
                &Policy::convergence(),
            ),
        )
        .await?;

        info!(%contract, participants = registry.len(), "network ready");
        Ok(Network {
            contract: contract.account().clone(),
            participants: registry,
        })
    }

    /// Add every participant account to the localnet genesis files at `paths`.
    ///
    /// Makes no chain calls. Missing files are skipped.
    pub async fn patch_genesis(
        &self,
        topology: &Topology,
        paths: &[PathBuf],
        treasury: &AccountId,
    ) -> Result<Vec<(PathBuf, Option<Patch>)>, Error> {
        let config = &self.config;
        let accounts: Vec<_> = participants::resolve(
            &self.secrets,
            &topology.participants,
            &config.master,
            &config.legacy_parents,
            config.port,
        )
        .await?
        .into_iter()
        .map(|participant| GenesisAccount {
            public_key: participant.key.public_key(),
            account: participant.info.account,
        })
        .collect();

        let mut patches = Vec::with_capacity(paths.len());
        for path in paths {
            let patch = genesis::patch(path, &accounts, config.funding.participant, treasury)?;
            patches.push((path.clone(), patch));
        }
        Ok(patches)
    }
}
