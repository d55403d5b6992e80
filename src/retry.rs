//! Bounded retry with exponential backoff for flaky network and LLM calls.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use tokio::time::sleep;
use tracing::{debug, error};

use crate::config::RetrySettings;
use crate::error::RetryExhaustedError;

/// Parameters of a [`RetryExecutor`].
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Maximum number of invocations per `call`.
    pub max_attempts: u32,
    /// Multiplier applied to the delay after each failure.
    pub growth_factor: f64,
    /// Amount subtracted from the delay after a success (the larger of this
    /// and `initial_delay` is used).
    pub decrement: Duration,
    pub initial_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetrySettings::default().policy()
    }
}

/// Where a single `call` currently stands.
enum Attempt<T> {
    Attempting(u32),
    Succeeded(T),
    Exhausted,
}

/// Wraps a fallible async operation with bounded retries.
///
/// The backoff delay is shared across calls: failures grow it, successes
/// shrink it (saturating at zero), and [`reset`](Self::reset) restores it.
#[derive(Debug, Clone)]
pub struct RetryExecutor {
    policy: RetryPolicy,
    delay: Duration,
}

impl RetryExecutor {
    pub fn new(policy: RetryPolicy) -> Self {
        let delay = policy.initial_delay;
        Self { policy, delay }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// The delay that will be grown on the next failure.
    pub fn current_delay(&self) -> Duration {
        self.delay
    }

    pub fn reset(&mut self) {
        self.delay = self.policy.initial_delay;
    }

    /// Invoke `op` until it succeeds or `max_attempts` invocations failed.
    ///
    /// `label` only names the operation in log output.
    pub async fn call<T, E, F, Fut>(
        &mut self,
        label: &str,
        mut op: F,
    ) -> Result<T, RetryExhaustedError<E>>
    where
        E: Display,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let mut failures: Vec<E> = Vec::new();
        let mut attempt = Attempt::Attempting(0);

        loop {
            attempt = match attempt {
                Attempt::Attempting(count) if count >= self.policy.max_attempts => Attempt::Exhausted,
                Attempt::Attempting(count) => match op().await {
                    Ok(value) => {
                        let step = self.policy.initial_delay.max(self.policy.decrement);
                        self.delay = self.delay.saturating_sub(step);
                        debug!(operation = label, attempt = count + 1, delay_ms = self.delay.as_millis() as u64, "Call succeeded");
                        Attempt::Succeeded(value)
                    }
                    Err(err) => {
                        let count = count + 1;
                        debug!(operation = label, attempt = count, error = %err, "Call failed");
                        failures.push(err);
                        if count < self.policy.max_attempts {
                            self.delay = grow(self.delay, self.policy.growth_factor);
                            sleep(self.delay).await;
                        }
                        Attempt::Attempting(count)
                    }
                },
                Attempt::Succeeded(value) => return Ok(value),
                Attempt::Exhausted => {
                    error!(
                        operation = label,
                        attempts = failures.len(),
                        delay_ms = self.delay.as_millis() as u64,
                        "Retries exhausted"
                    );
                    return Err(RetryExhaustedError {
                        attempts: failures.len() as u32,
                        failures,
                    });
                }
            };
        }
    }
}

/// Multiply `delay` by `factor`, saturating at [`Duration::MAX`].
fn grow(delay: Duration, factor: f64) -> Duration {
    Duration::try_from_secs_f64(delay.as_secs_f64() * factor).unwrap_or(Duration::MAX)
}
