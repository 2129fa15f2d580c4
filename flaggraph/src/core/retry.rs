// =============================================================================
// RETRY BEHAVIOR
// =============================================================================
//
// Primary operations (create, enable, disable) never retry inside the engine:
// their failures go straight back to the caller, who decides based on
// `Retryable::is_retryable()`.
//
// Cascade steps are different. The root disable has already committed, so a
// failed step on one dependent is retried in place under the configured
// `RetryPolicy` before being surfaced as a warning.
// =============================================================================

use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;

/// Classifies errors as transient (worth retrying) or permanent.
pub trait Retryable {
    fn is_retryable(&self) -> bool;
}

/// How many times to attempt an operation and how long to wait in between.
///
/// # Examples
///
/// ```
/// use flaggraph::RetryPolicy;
/// use std::time::Duration;
///
/// let policy = RetryPolicy::STANDARD;
/// assert_eq!(policy.delay_for_attempt(1), Some(Duration::from_millis(50)));
/// assert_eq!(policy.delay_for_attempt(3), None);
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Maximum number of attempts, including the first try.
    pub max_attempts: u32,

    /// Delay before the first retry.
    #[serde(with = "duration_millis")]
    pub initial_delay: Duration,

    /// Cap for the exponential backoff.
    #[serde(with = "duration_millis")]
    pub max_delay: Duration,

    /// Each retry waits `initial_delay * backoff_multiplier^(attempt-1)`.
    pub backoff_multiplier: f64,
}

impl RetryPolicy {
    /// Single attempt, no retries.
    pub const NONE: Self = Self {
        max_attempts: 1,
        initial_delay: Duration::from_millis(0),
        max_delay: Duration::from_millis(0),
        backoff_multiplier: 1.0,
    };

    /// Three attempts: immediate, then 50ms, then 100ms.
    pub const STANDARD: Self = Self {
        max_attempts: 3,
        initial_delay: Duration::from_millis(50),
        max_delay: Duration::from_secs(2),
        backoff_multiplier: 2.0,
    };

    /// Same delays as [`RetryPolicy::STANDARD`] with a custom attempt count.
    pub const fn with_max_attempts(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            initial_delay: Duration::from_millis(50),
            max_delay: Duration::from_secs(2),
            backoff_multiplier: 2.0,
        }
    }

    /// Delay to wait after a failed `attempt` (1-indexed), or `None` when the
    /// attempts are exhausted.
    pub fn delay_for_attempt(&self, attempt: u32) -> Option<Duration> {
        if attempt >= self.max_attempts {
            return None;
        }

        let exponent = attempt.saturating_sub(1) as f64;
        let delay_secs = self.initial_delay.as_secs_f64() * self.backoff_multiplier.powf(exponent);
        Some(Duration::from_secs_f64(
            delay_secs.min(self.max_delay.as_secs_f64()),
        ))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::STANDARD
    }
}

impl From<u32> for RetryPolicy {
    fn from(max_attempts: u32) -> Self {
        Self::with_max_attempts(max_attempts)
    }
}

/// Runs `operation` until it succeeds, fails permanently, or the policy runs
/// out of attempts. The closure receives the 1-indexed attempt number.
///
/// Returns the final error together with the number of attempts made.
pub async fn retry_with_policy<F, Fut, T, E>(
    policy: RetryPolicy,
    mut operation: F,
) -> Result<T, (E, u32)>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Retryable + std::fmt::Display,
{
    let mut attempt = 1;

    loop {
        match operation(attempt).await {
            Ok(value) => return Ok(value),
            Err(error) => {
                if !error.is_retryable() {
                    tracing::debug!(attempt, %error, "operation failed with non-retryable error");
                    return Err((error, attempt));
                }

                match policy.delay_for_attempt(attempt) {
                    Some(delay) => {
                        tracing::debug!(
                            attempt,
                            max_attempts = policy.max_attempts,
                            ?delay,
                            %error,
                            "operation failed, retrying"
                        );
                        tokio::time::sleep(delay).await;
                        attempt += 1;
                    }
                    None => {
                        tracing::warn!(
                            attempt,
                            max_attempts = policy.max_attempts,
                            %error,
                            "operation failed and exhausted retry attempts"
                        );
                        return Err((error, attempt));
                    }
                }
            }
        }
    }
}

pub(crate) mod duration_millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}
