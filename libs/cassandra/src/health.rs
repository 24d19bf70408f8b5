use std::time::Instant;
use tracing::debug;

use crate::common::{ExecutorError, ExecutorResult};
use crate::driver::Row;
use crate::executor::Executor;

const HEALTH_QUERY: &str = "SELECT release_version FROM system.local";

/// Health check status for one keyspace
#[derive(Debug, Clone)]
pub struct HealthStatus {
    /// Whether the keyspace answered the health query
    pub healthy: bool,
    /// Optional message (e.g., error details)
    pub message: Option<String>,
    /// Response time in milliseconds
    pub response_time_ms: u64,
    /// Cassandra release version (if available)
    pub version: Option<String>,
}

impl Executor {
    /// Run a lightweight query through the pool and report the outcome.
    ///
    /// Never fails; errors end up in [`HealthStatus::message`].
    ///
    /// # Example
    /// ```ignore
    /// let status = registry.get("accounts").health_check().await;
    /// if status.healthy {
    ///     println!("Cassandra healthy, version: {:?}, latency: {}ms",
    ///         status.version, status.response_time_ms);
    /// } else {
    ///     println!("Cassandra unhealthy: {:?}", status.message);
    /// }
    /// ```
    pub async fn health_check(&self) -> HealthStatus {
        debug!(keyspace = %self.name(), "Running Cassandra health check");
        let start = Instant::now();

        match self.query(HEALTH_QUERY, &[]).await {
            Ok(rows) => HealthStatus {
                healthy: true,
                message: None,
                response_time_ms: start.elapsed().as_millis() as u64,
                version: extract_version(&rows),
            },
            Err(e) => HealthStatus {
                healthy: false,
                message: Some(e.to_string()),
                response_time_ms: start.elapsed().as_millis() as u64,
                version: None,
            },
        }
    }

    /// Fail when the active pool tracks more than `max` connections.
    ///
    /// Returns the current pool size otherwise.
    pub async fn check_max_connections(&self, max: usize) -> ExecutorResult<usize> {
        let size = self.pool_size().await;
        if size > max {
            return Err(ExecutorError::HealthCheck(format!(
                "keyspace '{}' has {} connections open, limit is {}",
                self.name(),
                size,
                max
            )));
        }
        Ok(size)
    }
}

fn extract_version(rows: &[Row]) -> Option<String> {
    rows.first()?
        .get("release_version")?
        .as_ref()?
        .as_text()
        .cloned()
}
