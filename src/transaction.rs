//! Transaction wrapper with bounded retries
//!
//! [`with_transaction`] runs a [`UnitOfWork`] inside one store session per
//! attempt. Each attempt is bounded by a timeout. Transient failures roll the
//! session back and retry with exponential backoff; anything else is
//! returned after rollback. A commit that times out is never retried, since
//! the store may have applied it.

use crate::error::{LmsError, Result};
use crate::store::ItemStore;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

/// Retry and timeout settings for store transactions
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransactionConfig {
    /// Retries after the first attempt
    pub max_retries: u32,
    /// Delay before the first retry
    pub initial_backoff: Duration,
    /// Upper bound for any single delay
    pub max_backoff: Duration,
    /// Limit for one attempt, commit included
    pub timeout: Duration,
}

impl Default for TransactionConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_backoff: Duration::from_millis(50),
            max_backoff: Duration::from_secs(2),
            timeout: Duration::from_secs(10),
        }
    }
}

impl TransactionConfig {
    pub fn validate(&self) -> Result<()> {
        if self.timeout.is_zero() {
            return Err(LmsError::Config(
                "transaction timeout must be greater than 0".to_string(),
            ));
        }
        if self.initial_backoff > self.max_backoff {
            return Err(LmsError::Config(
                "initial_backoff must not exceed max_backoff".to_string(),
            ));
        }
        Ok(())
    }

    /// Delay before retry number `attempt` (0-based), doubling each time
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt);
        self.initial_backoff
            .checked_mul(factor)
            .unwrap_or(self.max_backoff)
            .min(self.max_backoff)
    }
}

/// Work performed inside one store session
#[async_trait]
pub trait UnitOfWork<S: ItemStore>: Send + Sync {
    type Output: Send;

    async fn run(&self, store: &S, session: &mut S::Session) -> Result<Self::Output>;
}

/// Run `work` atomically, retrying transient failures
pub async fn with_transaction<S, W>(
    store: &S,
    config: &TransactionConfig,
    work: &W,
) -> Result<W::Output>
where
    S: ItemStore,
    W: UnitOfWork<S>,
{
    let mut attempt = 0;
    loop {
        let result = run_attempt(store, config, work).await;

        match result {
            Ok(output) => {
                if attempt > 0 {
                    debug!(attempt, "Transaction succeeded after retry");
                }
                return Ok(output);
            }
            Err(e) if e.is_transient() && attempt < config.max_retries => {
                let delay = config.backoff_delay(attempt);
                attempt += 1;
                warn!(
                    "Transaction failed (attempt {}/{}), retrying after {:?}: {}",
                    attempt,
                    config.max_retries + 1,
                    delay,
                    e
                );
                tokio::time::sleep(delay).await;
            }
            Err(e) => return Err(e),
        }
    }
}

async fn run_attempt<S, W>(store: &S, config: &TransactionConfig, work: &W) -> Result<W::Output>
where
    S: ItemStore,
    W: UnitOfWork<S>,
{
    let mut session = store.begin().await?;
    let timeout_ms = config.timeout.as_millis() as u64;

    let outcome = match tokio::time::timeout(config.timeout, work.run(store, &mut session)).await {
        Ok(outcome) => outcome,
        Err(_) => Err(LmsError::Timeout {
            timeout_ms,
            context: "transaction body".to_string(),
        }),
    };

    match outcome {
        Ok(output) => match tokio::time::timeout(config.timeout, store.commit(session)).await {
            Ok(Ok(())) => Ok(output),
            Ok(Err(e)) => Err(e),
            Err(_) => {
                warn!(timeout_ms, "Commit timed out, outcome unknown");
                Err(LmsError::CommitUnknown { timeout_ms })
            }
        },
        Err(e) => {
            if let Err(rollback_err) = store.rollback(session).await {
                warn!("Rollback failed after {}: {}", e, rollback_err);
            }
            Err(e)
        }
    }
}
