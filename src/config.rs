//! Command line and environment configuration

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

use hb_broker::config::{DEFAULT_SHUTDOWN_TIMEOUT, DEFAULT_STATE_WRITE_ATTEMPTS};
use hb_broker::dispatcher::DEFAULT_MAX_CONCURRENT_OPERATIONS;
use hb_broker::BrokerConfig;
use hb_common::telemetry::LogFormat;

/// Helm Broker - Open Service Broker backed by Helm charts
#[derive(Parser, Debug, Clone)]
#[command(name = "helm-broker", version, about, long_about = None)]
pub struct Cli {
    /// Address the OSB API listens on
    #[arg(long, env = "HB_ADDR", default_value = "0.0.0.0:8080")]
    pub addr: SocketAddr,

    /// Catalog directory, one subdirectory per bundle
    #[arg(long, env = "HB_CATALOG")]
    pub catalog: PathBuf,

    /// Helm binary used to install and delete releases
    #[arg(long, env = "HB_HELM_BINARY", default_value = "helm")]
    pub helm_binary: String,

    /// Maximum number of operations running in the background at once
    #[arg(long, env = "HB_MAX_CONCURRENT_OPERATIONS", default_value_t = DEFAULT_MAX_CONCURRENT_OPERATIONS)]
    pub max_concurrent_operations: usize,

    /// Attempts for persisting the final state of an operation
    #[arg(long, env = "HB_STATE_WRITE_ATTEMPTS", default_value_t = DEFAULT_STATE_WRITE_ATTEMPTS)]
    pub state_write_attempts: u32,

    /// Seconds to wait for in-flight operations on shutdown
    #[arg(long, env = "HB_SHUTDOWN_TIMEOUT_SECS", default_value_t = DEFAULT_SHUTDOWN_TIMEOUT.as_secs())]
    pub shutdown_timeout_secs: u64,

    /// Log format: json or text
    #[arg(long, env = "HB_LOG_FORMAT", default_value = "json")]
    pub log_format: LogFormat,
}

impl Cli {
    /// Settings of the broker core
    pub fn broker_config(&self) -> BrokerConfig {
        BrokerConfig {
            max_concurrent_operations: self.max_concurrent_operations,
            state_write_attempts: self.state_write_attempts,
            shutdown_timeout: Duration::from_secs(self.shutdown_timeout_secs),
        }
    }
}
