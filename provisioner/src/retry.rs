//! Bounded retry and polling.
//!
//! Both the chain retry (narrow, linear backoff) and the convergence polls (fixed interval) are
//! expressed as a [Policy] driving the same attempt loop.

use std::{future::Future, time::Duration};
use tokio::time::sleep;
use tracing::debug;

/// Maximum number of attempts for a transaction racing the chain view
pub const CHAIN_ATTEMPTS: usize = 5;

/// Backoff step for a transaction racing the chain view
pub const CHAIN_BACKOFF: Duration = Duration::from_millis(1_500);

/// Maximum number of polling attempts for convergence
pub const MAX_POLL_ATTEMPTS: usize = 30;

/// Interval between convergence polls
pub const POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Delay between attempts.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Backoff {
    /// Wait `step * k` before attempt `k + 1`.
    Linear(Duration),
    /// Wait the same interval before every retry.
    Fixed(Duration),
}

impl Backoff {
    /// Delay to wait after `attempt` (1-based) failed.
    pub fn delay(&self, attempt: usize) -> Duration {
        match self {
            Backoff::Linear(step) => step.saturating_mul(attempt as u32),
            Backoff::Fixed(interval) => *interval,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Policy {
    pub attempts: usize,
    pub backoff: Backoff,
}

impl Policy {
    /// Policy for transactions whose reference block left the canonical chain.
    pub const fn chain() -> Self {
        Self {
            attempts: CHAIN_ATTEMPTS,
            backoff: Backoff::Linear(CHAIN_BACKOFF),
        }
    }

    /// Policy for convergence polls.
    pub const fn convergence() -> Self {
        Self {
            attempts: MAX_POLL_ATTEMPTS,
            backoff: Backoff::Fixed(POLL_INTERVAL),
        }
    }
}

/// Why a retried operation gave up.
#[derive(Debug, PartialEq, Eq)]
pub enum Failure<E> {
    /// The error was not retryable.
    Aborted { error: E, attempts: usize },
    /// Every attempt failed with a retryable error.
    Exhausted { error: E, attempts: usize },
}

impl<E> Failure<E> {
    pub fn error(&self) -> &E {
        match self {
            Failure::Aborted { error, .. } | Failure::Exhausted { error, .. } => error,
        }
    }

    pub fn attempts(&self) -> usize {
        match self {
            Failure::Aborted { attempts, .. } | Failure::Exhausted { attempts, .. } => *attempts,
        }
    }
}

/// Run `op` until it succeeds, fails with an error `retryable` rejects, or the policy's
/// attempts are exhausted.
///
/// `op` receives the 1-based attempt number.
pub async fn retry<T, E, F, Fut, R>(policy: &Policy, mut op: F, retryable: R) -> Result<T, Failure<E>>
where
    F: FnMut(usize) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    R: Fn(&E) -> bool,
{
    let mut attempt = 1;
    loop {
        let error = match op(attempt).await {
            Ok(value) => return Ok(value),
            Err(error) => error,
        };
        if !retryable(&error) {
            return Err(Failure::Aborted {
                error,
                attempts: attempt,
            });
        }
        if attempt >= policy.attempts {
            return Err(Failure::Exhausted {
                error,
                attempts: attempt,
            });
        }
        let delay = policy.backoff.delay(attempt);
        debug!(attempt, ?delay, "retrying");
        sleep(delay).await;
        attempt += 1;
    }
}

/// Poll `ready` until it returns true, returning the number of attempts used.
///
/// Exhausting the policy returns the number of attempts made.
pub async fn poll<F, Fut>(policy: &Policy, mut ready: F) -> Result<usize, usize>
where
    F: FnMut(usize) -> Fut,
    Fut: Future<Output = bool>,
{
    retry(
        policy,
        |attempt| {
            let probe = ready(attempt);
            async move {
                if probe.await {
                    Ok(attempt)
                } else {
                    Err(())
                }
            }
        },
        |_| true,
    )
    .await
    .map_err(|failure| failure.attempts())
}
