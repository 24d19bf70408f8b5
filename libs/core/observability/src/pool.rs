//! Connection pool and executor metrics for clustered database clients.

use metrics::{counter, gauge, histogram};
use std::time::{Duration, Instant};

/// Operation names recorded under the `operation` label.
pub mod operation {
    pub const CHECKOUT: &str = "pool.checkout";
    pub const CHECKIN: &str = "pool.checkin";
    pub const DIAL: &str = "pool.dial";
    pub const QUERY: &str = "executor.query";
    pub const EXECUTE: &str = "executor.execute";
    pub const SWAP: &str = "executor.swap";
}

/// Pool metrics recorder
pub struct PoolMetrics;

impl PoolMetrics {
    // =========================================================================
    // Operation Metrics
    // =========================================================================

    /// Record the outcome and duration of a pool or executor operation
    pub fn record_operation(keyspace: &str, operation: &'static str, ok: bool, elapsed: Duration) {
        let outcome = if ok { "success" } else { "error" };
        counter!(
            "cassandra_pool_operations_total",
            "operation" => operation,
            "keyspace" => keyspace.to_string(),
            "outcome" => outcome
        )
        .increment(1);
        histogram!(
            "cassandra_pool_operation_duration_seconds",
            "operation" => operation,
            "keyspace" => keyspace.to_string()
        )
        .record(elapsed.as_secs_f64());
    }

    /// Record a checkout that had to wait for the full timeout
    pub fn record_checkout_timeout(keyspace: &str, host: &str) {
        counter!(
            "cassandra_pool_checkout_timeouts_total",
            "keyspace" => keyspace.to_string(),
            "host" => host.to_string()
        )
        .increment(1);
    }

    /// Record whether a checkout reused an established connection or dialed a new one
    pub fn record_checkout_source(keyspace: &str, reused: bool) {
        let source = if reused { "reused" } else { "dialed" };
        counter!(
            "cassandra_pool_checkouts_total",
            "keyspace" => keyspace.to_string(),
            "source" => source
        )
        .increment(1);
    }

    // =========================================================================
    // Gauge Metrics (Current State)
    // =========================================================================

    /// Set the number of live connections tracked by the active pool
    pub fn set_connections(keyspace: &str, count: usize) {
        gauge!("cassandra_pool_connections", "keyspace" => keyspace.to_string()).set(count as f64);
    }
}

/// Timer guard for automatic duration recording.
///
/// Records as a failure when dropped without `finish`, so an early return
/// through `?` still shows up in the error counters.
pub struct OperationTimer {
    start: Instant,
    keyspace: String,
    operation: &'static str,
    finished: bool,
}

impl OperationTimer {
    /// Start a new timer for an operation
    pub fn start(keyspace: &str, operation: &'static str) -> Self {
        Self {
            start: Instant::now(),
            keyspace: keyspace.to_string(),
            operation,
            finished: false,
        }
    }

    /// Stop the timer and record the outcome. Returns the elapsed time.
    pub fn finish(mut self, ok: bool) -> Duration {
        self.record(ok)
    }

    fn record(&mut self, ok: bool) -> Duration {
        let elapsed = self.start.elapsed();
        if !self.finished {
            self.finished = true;
            PoolMetrics::record_operation(&self.keyspace, self.operation, ok, elapsed);
        }
        elapsed
    }
}

impl Drop for OperationTimer {
    fn drop(&mut self) {
        if !self.finished {
            self.record(false);
        }
    }
}
