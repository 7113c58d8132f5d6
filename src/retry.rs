//! Retry-forever with exponential backoff for transient store failures.
//!
//! The pipeline has no user waiting synchronously, so transient failures are
//! retried without an attempt limit: an outage shorter than the operator's
//! patience shows up as elevated log volume, never as downtime. Fatal errors
//! (auth, malformed queries) propagate on the first attempt.

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{error, info};

use crate::error::SyncError;

/// Exponential backoff policy: `min(initial * 2^attempt, cap)`.
#[derive(Debug, Clone, Copy)]
pub struct Backoff {
    pub initial: Duration,
    pub cap: Duration,
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            initial: Duration::from_millis(100),
            cap: Duration::from_secs(10),
        }
    }
}

impl Backoff {
    /// Delay before the retry following failure number `attempt` (0-based).
    pub fn delay(&self, attempt: u32) -> Duration {
        // 2^20 * initial is already far past any sane cap; clamping the
        // exponent keeps the shift from overflowing.
        let exponent = attempt.min(20);
        self.initial.saturating_mul(1u32 << exponent).min(self.cap)
    }
}

/// Run `op` until it succeeds or fails non-transiently.
///
/// Transient failures ([`SyncError::is_transient`]) are logged and retried
/// after an exponentially growing delay; anything else propagates
/// immediately. On eventual success after retries, the attempt count and
/// total elapsed time are logged.
pub async fn retry_forever<T, F, Fut>(
    policy: &Backoff,
    label: &str,
    mut op: F,
) -> Result<T, SyncError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, SyncError>>,
{
    let started = Instant::now();
    let mut attempt: u32 = 0;
    loop {
        match op().await {
            Ok(value) => {
                if attempt > 0 {
                    info!(
                        attempts = attempt + 1,
                        elapsed_ms = started.elapsed().as_millis() as u64,
                        "{label} succeeded after retries"
                    );
                }
                return Ok(value);
            }
            Err(err) if err.is_transient() => {
                let delay = policy.delay(attempt);
                error!(
                    error = %err,
                    delay_ms = delay.as_millis() as u64,
                    "{label} failed, retrying"
                );
                attempt = attempt.saturating_add(1);
                tokio::time::sleep(delay).await;
            }
            Err(err) => return Err(err),
        }
    }
}
