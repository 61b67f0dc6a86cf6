//! Bounded retry with exponential backoff for transient storage failures.
//!
//! Storage backends signal transient trouble with `Storage`/`Io` errors;
//! everything else (not-found, validation) fails immediately. After the
//! attempt budget is spent the last transient error is surfaced as
//! `StorageUnavailable`, at which point the caller marks the backup failed
//! rather than retrying forever.

use std::future::Future;
use std::time::Duration;

use crate::error::{AppError, Result};

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            base_delay: Duration::from_millis(250),
        }
    }
}

fn is_transient(err: &AppError) -> bool {
    matches!(
        err,
        AppError::Storage(_) | AppError::StorageUnavailable(_) | AppError::Io(_)
    )
}

/// Run `op`, retrying transient failures up to the policy's attempt budget.
pub async fn with_backoff<T, F, Fut>(policy: RetryPolicy, op_name: &str, mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let attempts = policy.max_attempts.max(1);
    let mut delay = policy.base_delay;
    let mut last_err = None;

    for attempt in 1..=attempts {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if is_transient(&err) && attempt < attempts => {
                tracing::warn!(
                    op = op_name,
                    attempt,
                    error = %err,
                    retry_in_ms = delay.as_millis() as u64,
                    "transient storage failure, retrying"
                );
                tokio::time::sleep(delay).await;
                delay = delay.saturating_mul(2);
                last_err = Some(err);
            }
            Err(err) if is_transient(&err) => {
                return Err(AppError::StorageUnavailable(format!(
                    "{op_name} failed after {attempts} attempts: {err}"
                )));
            }
            Err(err) => return Err(err),
        }
    }

    // Reachable only with max_attempts forced to zero.
    Err(last_err.unwrap_or_else(|| {
        AppError::StorageUnavailable(format!("{op_name} failed with no attempts made"))
    }))
}
