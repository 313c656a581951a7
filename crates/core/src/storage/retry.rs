use rand::Rng;
use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

// serialization_failure, deadlock_detected
const TRANSIENT_SQLSTATES: &[&str] = &["40001", "40P01"];

// Lowercase; matched against the lowercased error chain for errors that carry
// no typed cause.
const TRANSIENT_PATTERNS: &[&str] = &[
    "restart transaction",
    "serialization failure",
    "could not serialize access",
    "deadlock detected",
    "40001",
    "connection reset by peer",
    "connection refused",
    "context deadline exceeded",
    "deadline exceeded",
    "no connection to the server",
    "pool timed out",
    "read-only transaction",
];

pub fn is_transient(err: &anyhow::Error) -> bool {
    if err.chain().any(is_transient_cause) {
        return true;
    }
    let msg = format!("{err:#}").to_ascii_lowercase();
    TRANSIENT_PATTERNS.iter().any(|p| msg.contains(p))
}

fn is_transient_cause(cause: &(dyn std::error::Error + 'static)) -> bool {
    if let Some(err) = cause.downcast_ref::<sqlx::Error>() {
        return match err {
            sqlx::Error::Io(_)
            | sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed
            | sqlx::Error::WorkerCrashed => true,
            sqlx::Error::Database(db) => db
                .code()
                .is_some_and(|code| TRANSIENT_SQLSTATES.contains(&code.as_ref())),
            _ => false,
        };
    }
    if let Some(err) = cause.downcast_ref::<std::io::Error>() {
        use std::io::ErrorKind::*;
        return matches!(
            err.kind(),
            ConnectionReset | ConnectionRefused | ConnectionAborted | BrokenPipe | TimedOut
        );
    }
    false
}

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts, including the first one.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_jitter: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_millis(50),
            max_jitter: Duration::from_millis(50),
        }
    }
}

impl RetryPolicy {
    /// Backoff before the retry that follows failed attempt `attempt_index` (0-based).
    pub fn delay_for_attempt(&self, attempt_index: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt_index).unwrap_or(u32::MAX);
        self.base_delay.saturating_mul(factor)
    }

    fn jitter(&self) -> Duration {
        let max_ms = self.max_jitter.as_millis() as u64;
        if max_ms == 0 {
            return Duration::ZERO;
        }
        Duration::from_millis(rand::thread_rng().gen_range(0..max_ms))
    }
}

#[derive(Debug, Error)]
pub enum RetryError {
    #[error("operation cancelled")]
    Cancelled,
    #[error("max retries exceeded after {attempts} attempts: {source:#}")]
    Exhausted {
        attempts: u32,
        #[source]
        source: anyhow::Error,
    },
    #[error("{0:#}")]
    Permanent(anyhow::Error),
}

/// Runs `op` until it succeeds, fails with a non-transient error, runs out of
/// attempts, or `cancel` fires during a backoff wait. `op` receives the
/// 0-based attempt index.
pub async fn run_with_retry<T, F, Fut>(
    policy: &RetryPolicy,
    cancel: &CancellationToken,
    mut op: F,
) -> Result<T, RetryError>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = anyhow::Result<T>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt: u32 = 0;

    loop {
        let err = match op(attempt).await {
            Ok(v) => return Ok(v),
            Err(err) => err,
        };

        if !is_transient(&err) {
            return Err(RetryError::Permanent(err));
        }

        attempt += 1;
        if attempt >= max_attempts {
            return Err(RetryError::Exhausted {
                attempts: attempt,
                source: err,
            });
        }

        let backoff = policy.delay_for_attempt(attempt - 1) + policy.jitter();
        let reason = format!("{err:#}");
        tracing::warn!(attempt, ?backoff, error = %reason, "transient storage error; retrying");

        tokio::select! {
            _ = cancel.cancelled() => return Err(RetryError::Cancelled),
            _ = tokio::time::sleep(backoff) => {}
        }
    }
}
