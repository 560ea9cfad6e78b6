//! Fixed-interval polling.
//!
//! Most integration scenarios end with "wait until the platform caught up":
//! a loader finished, a replayer drained its topic, a vault bundle got
//! cooked. All of them go through [`retry_until_success`], which calls a
//! predicate once per interval until it returns a truthy value.

use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, info};

use crate::error::HarnessError;

#[cfg(test)]
#[path = "retry_tests.rs"]
mod tests;

/// Default number of attempts made by [`retry_until_success`].
pub const DEFAULT_MAX_ATTEMPTS: u32 = 120;

/// Default delay between two attempts.
pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(1);

/// Polling parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollConfig {
    /// Maximum number of times the predicate is called.
    pub max_attempts: u32,
    /// Constant delay between two calls.
    pub interval: Duration,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            interval: DEFAULT_INTERVAL,
        }
    }
}

impl PollConfig {
    /// Poll at the default interval, at most `max_attempts` times.
    pub fn attempts(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            ..Self::default()
        }
    }

    /// Replace the delay between two attempts.
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }
}

/// Values a polled predicate may return.
///
/// A value is truthy when it carries a result the caller can proceed with:
/// `true`, `Some(_)`, a non-empty vector or a non-empty string.
pub trait Truthy {
    /// What [`retry_until_success`] hands back once the predicate succeeds.
    type Value;

    /// Returns the value if it is truthy, `None` otherwise.
    fn into_truthy(self) -> Option<Self::Value>;
}

impl Truthy for bool {
    type Value = bool;

    fn into_truthy(self) -> Option<bool> {
        self.then_some(true)
    }
}

impl<T> Truthy for Option<T> {
    type Value = T;

    fn into_truthy(self) -> Option<T> {
        self
    }
}

impl<T> Truthy for Vec<T> {
    type Value = Vec<T>;

    fn into_truthy(self) -> Option<Vec<T>> {
        (!self.is_empty()).then_some(self)
    }
}

impl Truthy for String {
    type Value = String;

    fn into_truthy(self) -> Option<String> {
        (!self.is_empty()).then_some(self)
    }
}

/// Call `predicate` until it returns a truthy value, and return that value.
///
/// The predicate is called at least once and at most `config.max_attempts`
/// times, with `config.interval` between two calls. Once all attempts are
/// exhausted, a [`HarnessError::RetryExhausted`] carrying `error_message` is
/// returned.
///
/// # Example
///
/// ```no_run
/// use integration_tests::retry::{retry_until_success, PollConfig};
///
/// # async fn example() -> Result<(), integration_tests::HarnessError> {
/// let mut calls = 0;
/// let value = retry_until_success(PollConfig::attempts(5), "never got 3", || {
///     calls += 1;
///     let current = calls;
///     async move { (current == 3).then_some(current) }
/// })
/// .await?;
/// assert_eq!(value, 3);
/// # Ok(())
/// # }
/// ```
pub async fn retry_until_success<F, Fut, T>(
    config: PollConfig,
    error_message: &str,
    mut predicate: F,
) -> Result<T::Value, HarnessError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = T>,
    T: Truthy,
{
    try_retry_until_success(config, error_message, || {
        let attempt = predicate();
        async move { Ok::<T, HarnessError>(attempt.await) }
    })
    .await
}

/// Same as [`retry_until_success`] for predicates that can fail.
///
/// An `Err` returned by the predicate stops the polling immediately and is
/// handed back to the caller as is: only falsy values are retried.
pub async fn try_retry_until_success<F, Fut, T, E>(
    config: PollConfig,
    error_message: &str,
    mut predicate: F,
) -> Result<T::Value, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    T: Truthy,
    E: From<HarnessError>,
{
    let max_attempts = config.max_attempts.max(1);

    for attempt in 1..=max_attempts {
        if let Some(value) = predicate().await?.into_truthy() {
            if attempt > 1 {
                info!(
                    attempt = attempt,
                    total_attempts = max_attempts,
                    "Condition met after retry"
                );
            }
            return Ok(value);
        }

        if attempt < max_attempts {
            debug!(
                attempt = attempt,
                total_attempts = max_attempts,
                delay_ms = config.interval.as_millis() as u64,
                "Condition not met yet, retrying after delay"
            );
            sleep(config.interval).await;
        }
    }

    Err(HarnessError::RetryExhausted {
        message: error_message.to_string(),
        attempts: max_attempts,
    }
    .into())
}
