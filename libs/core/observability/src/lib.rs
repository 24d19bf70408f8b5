//! Observability utilities for clustered database clients.
//!
//! This crate provides:
//! - Prometheus recorder installation and rendering
//! - Pool and executor metrics (`PoolMetrics`, `OperationTimer`)
//!
//! # Example
//!
//! ```rust,ignore
//! use observability::{init_metrics, render_metrics, PoolMetrics};
//!
//! init_metrics();
//! PoolMetrics::set_connections("accounts", 6);
//! println!("{}", render_metrics());
//! ```

pub mod pool;

pub use pool::{OperationTimer, PoolMetrics, operation};

// Re-export metrics macros for convenience
pub use metrics::{counter, gauge, histogram};

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use once_cell::sync::OnceCell;
use tracing::{info, warn};

static METRICS_HANDLE: OnceCell<PrometheusHandle> = OnceCell::new();

/// Initialize the Prometheus metrics recorder.
///
/// Call once at application startup. Returns `None` if another global
/// recorder was installed first.
pub fn init_metrics() -> Option<&'static PrometheusHandle> {
    METRICS_HANDLE
        .get_or_try_init(|| {
            let handle = PrometheusBuilder::new().install_recorder()?;
            info!("Prometheus metrics recorder initialized");
            register_metric_descriptions();
            Ok::<_, metrics_exporter_prometheus::BuildError>(handle)
        })
        .map_err(|e| warn!(error = %e, "Failed to install Prometheus recorder"))
        .ok()
}

/// Get the metrics handle (must call init_metrics first)
pub fn get_metrics_handle() -> Option<&'static PrometheusHandle> {
    METRICS_HANDLE.get()
}

/// Render the current metrics in Prometheus text format
pub fn render_metrics() -> String {
    match get_metrics_handle() {
        Some(handle) => handle.render(),
        None => "# Metrics not initialized\n".to_string(),
    }
}

/// Register metric descriptions for documentation
fn register_metric_descriptions() {
    use metrics::describe_counter;
    use metrics::describe_gauge;
    use metrics::describe_histogram;

    describe_counter!(
        "cassandra_pool_operations_total",
        "Pool and executor operations by keyspace, operation and outcome"
    );
    describe_histogram!(
        "cassandra_pool_operation_duration_seconds",
        "Pool and executor operation duration in seconds"
    );
    describe_counter!(
        "cassandra_pool_checkout_timeouts_total",
        "Checkouts that timed out waiting for a free connection slot"
    );
    describe_counter!(
        "cassandra_pool_checkouts_total",
        "Successful checkouts by connection source (reused or dialed)"
    );
    describe_gauge!(
        "cassandra_pool_connections",
        "Live connections tracked by the active pool"
    );
}
