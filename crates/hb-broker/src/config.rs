//! Runtime knobs of the broker core

use std::time::Duration;

use hb_common::retry::RetryConfig;

use crate::dispatcher::{TaskDispatcher, DEFAULT_MAX_CONCURRENT_OPERATIONS};

/// Default number of attempts for the terminal state write
pub const DEFAULT_STATE_WRITE_ATTEMPTS: u32 = 3;

/// Default time given to in-flight operations on shutdown
pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

/// Configuration of a [`crate::Broker`]
#[derive(Debug, Clone, PartialEq)]
pub struct BrokerConfig {
    /// Cap on background operations running at once
    pub max_concurrent_operations: usize,
    /// Attempts for persisting an operation's final state
    pub state_write_attempts: u32,
    /// How long shutdown waits for in-flight operations
    pub shutdown_timeout: Duration,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            max_concurrent_operations: DEFAULT_MAX_CONCURRENT_OPERATIONS,
            state_write_attempts: DEFAULT_STATE_WRITE_ATTEMPTS,
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
        }
    }
}

impl BrokerConfig {
    /// Retry policy for the terminal state write; at least one attempt
    pub fn state_write_retry(&self) -> RetryConfig {
        RetryConfig::with_max_attempts(self.state_write_attempts.max(1))
    }

    /// Dispatcher sized for this configuration
    pub fn dispatcher(&self) -> TaskDispatcher {
        TaskDispatcher::new(self.max_concurrent_operations)
    }
}
