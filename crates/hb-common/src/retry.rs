//! Bounded retries for ledger writes.
//!
//! Background work gets exactly one attempt. Only the write that records an
//! operation's terminal state is retried: losing it would leave the
//! operation `in progress` with nobody left to finish it.
//!
//! ```ignore
//! use hb_common::retry::{retry_with_backoff_if, RetryConfig};
//!
//! retry_with_backoff_if(
//!     &RetryConfig::with_max_attempts(3),
//!     "update_operation_state",
//!     || ops.update_state_desc(&instance_id, &operation_id, state, desc.clone()),
//!     |e: &Error| e.is_retryable(),
//! ).await?;
//! ```

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tracing::{error, warn};

/// How often and how patiently to retry
#[derive(Clone, Debug, PartialEq)]
pub struct RetryConfig {
    /// Total attempts including the first one; 0 retries forever
    pub max_attempts: u32,
    /// Delay before the second attempt
    pub initial_delay: Duration,
    /// Cap on the delay between attempts
    pub max_delay: Duration,
    /// Growth factor of the delay
    pub backoff_multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(5),
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryConfig {
    /// Default delays with a custom attempt budget
    pub fn with_max_attempts(attempts: u32) -> Self {
        Self {
            max_attempts: attempts,
            ..Default::default()
        }
    }

    fn exhausted(&self, attempt: u32) -> bool {
        self.max_attempts > 0 && attempt >= self.max_attempts
    }
}

/// Jittered exponential delays derived from a [`RetryConfig`]
struct Backoff {
    next: Duration,
    max: Duration,
    multiplier: f64,
}

impl Backoff {
    fn new(config: &RetryConfig) -> Self {
        Self {
            next: config.initial_delay,
            max: config.max_delay,
            multiplier: config.backoff_multiplier,
        }
    }

    /// Next delay, somewhere between half and one and a half times the
    /// nominal value
    fn step(&mut self) -> Duration {
        let nominal = self.next;
        self.next = nominal.mul_f64(self.multiplier).min(self.max);
        nominal.mul_f64(rand::thread_rng().gen_range(0.5..1.5))
    }
}

/// Run `operation` until it succeeds, fails with an error `is_retryable`
/// rejects, or the attempt budget runs out.
///
/// The last error is returned unchanged.
pub async fn retry_with_backoff_if<F, Fut, T, E, P>(
    config: &RetryConfig,
    operation_name: &str,
    mut operation: F,
    is_retryable: P,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Display,
    P: Fn(&E) -> bool,
{
    let mut backoff = Backoff::new(config);
    let mut attempt = 0u32;

    loop {
        attempt += 1;
        let e = match operation().await {
            Ok(value) => return Ok(value),
            Err(e) => e,
        };

        if !is_retryable(&e) {
            warn!(operation = %operation_name, attempt, error = %e, "giving up on permanent error");
            return Err(e);
        }
        if config.exhausted(attempt) {
            error!(operation = %operation_name, attempt, error = %e, "retries exhausted");
            return Err(e);
        }

        let delay = backoff.step();
        warn!(
            operation = %operation_name,
            attempt,
            error = %e,
            delay_ms = delay.as_millis() as u64,
            "retrying"
        );
        tokio::time::sleep(delay).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn quick(attempts: u32) -> RetryConfig {
        RetryConfig {
            max_attempts: attempts,
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(4),
            backoff_multiplier: 2.0,
        }
    }

    async fn flaky_write(calls: &AtomicU32, failures: u32) -> Result<&'static str, Error> {
        if calls.fetch_add(1, Ordering::SeqCst) < failures {
            Err(Error::storage("etcd leader changed"))
        } else {
            Ok("written")
        }
    }

    #[tokio::test]
    async fn test_transient_failures_are_retried_until_success() {
        let calls = AtomicU32::new(0);
        let result = retry_with_backoff_if(
            &quick(5),
            "update_operation_state",
            || flaky_write(&calls, 2),
            |e: &Error| e.is_retryable(),
        )
        .await;

        assert_eq!(result.unwrap(), "written");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_budget_bounds_the_attempts() {
        let calls = AtomicU32::new(0);
        let result = retry_with_backoff_if(
            &quick(3),
            "update_operation_state",
            || flaky_write(&calls, u32::MAX),
            |e: &Error| e.is_retryable(),
        )
        .await;

        assert!(result.unwrap_err().is_retryable());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_permanent_error_is_not_retried() {
        let calls = AtomicU32::new(0);
        let result: Result<(), Error> = retry_with_backoff_if(
            &quick(5),
            "update_operation_state",
            || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(Error::not_found("operation", "op-1")) }
            },
            |e: &Error| e.is_retryable(),
        )
        .await;

        assert!(result.unwrap_err().is_not_found());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_backoff_grows_up_to_the_cap() {
        let mut backoff = Backoff::new(&quick(0));
        let delays: Vec<_> = (0..5).map(|_| backoff.step()).collect();

        assert!(delays[0] <= Duration::from_micros(1500));
        assert!(delays.iter().all(|d| *d <= Duration::from_millis(6)));
        assert_eq!(backoff.next, Duration::from_millis(4));
    }
}
