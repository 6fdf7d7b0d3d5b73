//! Wait for the contract and every participant to report ready.

use crate::{
    account::AccountId,
    contract::{self, Lifecycle},
    ledger::Ledger,
    participants::ParticipantInfo,
    retry::{poll, Policy},
    Error,
};
use futures::future::try_join_all;
use std::{future::Future, time::Duration};
use tracing::{debug, info};

/// Path every participant serves its liveness check on
pub const HEALTH_PATH: &str = "/health";

/// Timeout of a single liveness request
pub const HEALTH_TIMEOUT: Duration = Duration::from_secs(5);

/// Answers whether provisioned entities are ready.
///
/// Probes never fail: anything other than a positive answer means "not yet".
pub trait Probe: Send + Sync {
    /// Returns true once `contract` has code and is initialized.
    fn contract_ready<L: Ledger>(
        &self,
        ledger: &L,
        contract: &AccountId,
    ) -> impl Future<Output = bool> + Send;

    /// Returns true once the participant at `url` answers its liveness check.
    fn endpoint_healthy(&self, url: &str) -> impl Future<Output = bool> + Send;
}

/// Probes the chain and participants over the network.
#[derive(Clone)]
pub struct LiveProbe {
    http: reqwest::Client,
}

impl LiveProbe {
    pub fn new() -> Result<Self, reqwest::Error> {
        let http = reqwest::Client::builder().timeout(HEALTH_TIMEOUT).build()?;
        Ok(Self { http })
    }
}

/// Returns the liveness URL of a participant endpoint.
pub fn health_url(url: &str) -> String {
    format!("{}{HEALTH_PATH}", url.trim_end_matches('/'))
}

impl Probe for LiveProbe {
    async fn contract_ready<L: Ledger>(&self, ledger: &L, contract: &AccountId) -> bool {
        match ledger.view_account(contract).await {
            Ok(view) if view.has_code() => {}
            Ok(_) => return false,
            Err(err) => {
                debug!(%contract, error = %err, "contract not visible yet");
                return false;
            }
        }
        match contract::lifecycle(ledger, contract).await {
            Ok(stage) => {
                debug!(%contract, ?stage, "contract stage");
                stage >= Lifecycle::Initialized
            }
            Err(err) => {
                debug!(%contract, error = %err, "contract state not readable yet");
                false
            }
        }
    }

    async fn endpoint_healthy(&self, url: &str) -> bool {
        match self.http.get(health_url(url)).send().await {
            Ok(response) => response.status().is_success(),
            Err(err) => {
                debug!(url, error = %err, "liveness check failed");
                false
            }
        }
    }
}

/// Poll until the contract reports ready, then until every participant endpoint does.
///
/// Endpoints are polled concurrently, each with its own attempt budget.
pub async fn await_convergence<L: Ledger, P: Probe>(
    ledger: &L,
    probe: &P,
    contract: &AccountId,
    participants: &[ParticipantInfo],
    policy: &Policy,
) -> Result<(), Error> {
    let attempts = poll(policy, |_| probe.contract_ready(ledger, contract))
        .await
        .map_err(|attempts| Error::ConvergenceTimeout {
            target: format!("contract {contract}"),
            attempts,
        })?;
    info!(%contract, attempts, "contract ready");

    try_join_all(participants.iter().map(|participant| async move {
        let url = participant.url.as_str();
        let attempts = poll(policy, |_| probe.endpoint_healthy(url))
            .await
            .map_err(|attempts| Error::ConvergenceTimeout {
                target: format!("endpoint {url} ({})", participant.account),
                attempts,
            })?;
        info!(account = %participant.account, url, attempts, "participant healthy");
        Ok::<_, Error>(())
    }))
    .await?;
    Ok(())
}
