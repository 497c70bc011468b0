//! Metrics registry for broker observability
//!
//! Provides OpenTelemetry metrics for:
//! - Operations accepted into the ledger
//! - Background operations (outcome, duration, in flight)
//! - Terminal state writes that were lost after every retry
//!
//! Nothing is exported until a meter provider is installed, see
//! [`crate::telemetry`].

use std::time::Instant;

use once_cell::sync::Lazy;
use opentelemetry::global;
use opentelemetry::metrics::{Counter, Histogram, Meter, UpDownCounter};
use opentelemetry::KeyValue;

use crate::types::{OperationState, OperationType};

/// Global meter for broker metrics
static METER: Lazy<Meter> = Lazy::new(|| global::meter("helm_broker"));

// ============================================================================
// Operation Metrics
// ============================================================================

/// Counter of operations appended to the ledger
///
/// Labels:
/// - `type`: create, remove
pub static OPERATIONS_ACCEPTED: Lazy<Counter<u64>> = Lazy::new(|| {
    METER
        .u64_counter("helm_broker_operations_accepted_total")
        .with_description("Total number of operations accepted for background work")
        .with_unit("{operations}")
        .build()
});

/// Counter of background operations that reached a terminal state
///
/// Labels:
/// - `type`: create, remove
/// - `state`: succeeded, failed
pub static OPERATIONS_FINISHED: Lazy<Counter<u64>> = Lazy::new(|| {
    METER
        .u64_counter("helm_broker_operations_finished_total")
        .with_description("Total number of background operations finished")
        .with_unit("{operations}")
        .build()
});

/// Histogram of background operation duration
///
/// Labels:
/// - `type`: create, remove
/// - `state`: succeeded, failed
pub static OPERATION_DURATION: Lazy<Histogram<f64>> = Lazy::new(|| {
    METER
        .f64_histogram("helm_broker_operation_duration_seconds")
        .with_description("Duration of background operations in seconds")
        .with_unit("s")
        .build()
});

/// Background operations currently running
///
/// Labels:
/// - `type`: create, remove
pub static OPERATIONS_IN_FLIGHT: Lazy<UpDownCounter<i64>> = Lazy::new(|| {
    METER
        .i64_up_down_counter("helm_broker_operations_in_flight")
        .with_description("Number of background operations currently running")
        .with_unit("{operations}")
        .build()
});

/// Counter of terminal state writes given up on
///
/// Each one leaves an operation `in progress` for good.
///
/// Labels:
/// - `type`: create, remove
/// - `state`: the state that was not recorded
pub static TERMINAL_WRITES_LOST: Lazy<Counter<u64>> = Lazy::new(|| {
    METER
        .u64_counter("helm_broker_terminal_writes_lost_total")
        .with_description("Total number of terminal operation states that were never written")
        .with_unit("{writes}")
        .build()
});

// ============================================================================
// Metric Recording Helpers
// ============================================================================

fn type_label(op_type: OperationType) -> KeyValue {
    KeyValue::new("type", op_type.as_str())
}

fn state_label(state: OperationState) -> KeyValue {
    KeyValue::new("state", state.as_str())
}

/// Record an operation appended to the ledger
pub fn record_operation_accepted(op_type: OperationType) {
    OPERATIONS_ACCEPTED.add(1, &[type_label(op_type)]);
}

/// Record a terminal state that could not be written
pub fn record_terminal_write_lost(op_type: OperationType, state: OperationState) {
    TERMINAL_WRITES_LOST.add(1, &[type_label(op_type), state_label(state)]);
}

/// Times one background operation and tracks it as in flight until dropped
pub struct OperationTimer {
    op_type: OperationType,
    start: Instant,
}

impl OperationTimer {
    /// Start timing a background operation
    pub fn start(op_type: OperationType) -> Self {
        OPERATIONS_IN_FLIGHT.add(1, &[type_label(op_type)]);
        Self {
            op_type,
            start: Instant::now(),
        }
    }

    /// Record the outcome and duration
    pub fn finish(self, state: OperationState) {
        let duration = self.start.elapsed().as_secs_f64();
        let labels = [type_label(self.op_type), state_label(state)];
        OPERATION_DURATION.record(duration, &labels);
        OPERATIONS_FINISHED.add(1, &labels);
    }
}

impl Drop for OperationTimer {
    fn drop(&mut self) {
        OPERATIONS_IN_FLIGHT.add(-1, &[type_label(self.op_type)]);
    }
}
