//! MPC Network Provisioner CLI

use clap::{Arg, ArgAction, Command};
use mpc_provisioner::{
    convergence::LiveProbe, rpc, secrets::LocalSecrets, topology::Topology, AccountId, Config,
    Error, Orchestrator,
};
use std::path::{Path, PathBuf};
use tracing::{error, info, warn};

/// Returns the version of the crate.
pub const fn crate_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

/// Flag for verbose output
const VERBOSE_FLAG: &str = "verbose";

const PROVISION_CMD: &str = "provision";
const GENESIS_CMD: &str = "genesis";

/// Account genesis funding is deducted from
const DEFAULT_TREASURY: &str = "near";

fn config_arg() -> Arg {
    Arg::new("config")
        .long("config")
        .required(true)
        .help("Path to YAML config file")
        .value_parser(clap::value_parser!(PathBuf))
}

fn topology_arg() -> Arg {
    Arg::new("topology")
        .long("topology")
        .required(true)
        .help("Path to YAML topology file")
        .value_parser(clap::value_parser!(PathBuf))
}

fn secrets_arg() -> Arg {
    Arg::new("secrets")
        .long("secrets")
        .help("Path to YAML secrets file (if not provided, secrets are read from MPC_SECRET__* environment variables)")
        .value_parser(clap::value_parser!(PathBuf))
}

fn load_secrets(path: Option<&PathBuf>) -> Result<LocalSecrets, Error> {
    match path {
        Some(path) => LocalSecrets::from_file(path),
        None => Ok(LocalSecrets::from_env()),
    }
}

async fn provision(config: &Path, topology: &Path, secrets: Option<&PathBuf>) -> Result<(), Error> {
    let config = Config::load(config)?;
    let topology = Topology::load(topology)?;
    let secrets = load_secrets(secrets)?;
    let orchestrator = Orchestrator::new(config, rpc::Connector::default(), secrets, LiveProbe::new()?);
    let network = orchestrator.run(&topology).await?;
    println!("{}", serde_yaml::to_string(&network)?);
    Ok(())
}

async fn genesis(
    config: &Path,
    topology: &Path,
    secrets: Option<&PathBuf>,
    paths: &[PathBuf],
    treasury: &str,
) -> Result<(), Error> {
    let config = Config::load(config)?;
    let topology = Topology::load(topology)?;
    let secrets = load_secrets(secrets)?;
    let treasury = AccountId::parse(treasury)?;
    let orchestrator = Orchestrator::new(config, rpc::Connector::default(), secrets, LiveProbe::new()?);
    let patches = orchestrator.patch_genesis(&topology, paths, &treasury).await?;
    for (path, patch) in patches {
        match patch {
            Some(patch) => info!(
                path = ?path,
                added = patch.added.len(),
                skipped = patch.skipped.len(),
                "patched genesis"
            ),
            None => warn!(path = ?path, "genesis not found"),
        }
    }
    Ok(())
}

/// Entrypoint for the MPC Network Provisioner CLI
#[tokio::main]
async fn main() -> std::process::ExitCode {
    // Define application
    let matches = Command::new("provisioner")
        .version(crate_version())
        .about("Provision a threshold-signature (MPC) network on a running chain.")
        .arg(
            Arg::new(VERBOSE_FLAG)
                .short('v')
                .long(VERBOSE_FLAG)
                .action(ArgAction::SetTrue),
        )
        .subcommand(
            Command::new(PROVISION_CMD)
                .about("Reconcile accounts, deploy and initialize the signing contract, collect domain votes, and wait until every participant reports ready. Safe to re-run.")
                .arg(config_arg())
                .arg(topology_arg())
                .arg(secrets_arg()),
        )
        .subcommand(
            Command::new(GENESIS_CMD)
                .about("Add participant accounts to localnet genesis files (skipping accounts already present).")
                .arg(config_arg())
                .arg(topology_arg())
                .arg(secrets_arg())
                .arg(
                    Arg::new("genesis")
                        .long("genesis")
                        .required(true)
                        .num_args(1..)
                        .help("Path(s) to genesis.json (missing files are skipped)")
                        .value_parser(clap::value_parser!(PathBuf)),
                )
                .arg(
                    Arg::new("treasury")
                        .long("treasury")
                        .default_value(DEFAULT_TREASURY)
                        .help("Account the funding of added accounts is deducted from")
                        .value_parser(clap::value_parser!(String)),
                ),
        )
        .get_matches();

    // Create logger
    let level = if matches.get_flag(VERBOSE_FLAG) {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };
    tracing_subscriber::fmt().with_max_level(level).init();

    // Parse subcommands
    match matches.subcommand() {
        Some((PROVISION_CMD, matches)) => {
            let config = matches.get_one::<PathBuf>("config").unwrap();
            let topology = matches.get_one::<PathBuf>("topology").unwrap();
            let secrets = matches.get_one::<PathBuf>("secrets");
            if let Err(e) = provision(config, topology, secrets).await {
                error!(error=?e, kind=?e.kind(), "failed to provision network");
            } else {
                return std::process::ExitCode::SUCCESS;
            }
        }
        Some((GENESIS_CMD, matches)) => {
            let config = matches.get_one::<PathBuf>("config").unwrap();
            let topology = matches.get_one::<PathBuf>("topology").unwrap();
            let secrets = matches.get_one::<PathBuf>("secrets");
            let paths: Vec<PathBuf> = matches.get_many::<PathBuf>("genesis").unwrap().cloned().collect();
            let treasury = matches.get_one::<String>("treasury").unwrap();
            if let Err(e) = genesis(config, topology, secrets, &paths, treasury).await {
                error!(error=?e, "failed to patch genesis");
            } else {
                return std::process::ExitCode::SUCCESS;
            }
        }
        Some((cmd, _)) => {
            error!(cmd, "invalid subcommand");
        }
        None => {
            error!("no subcommand provided");
        }
    }
    std::process::ExitCode::FAILURE
}
