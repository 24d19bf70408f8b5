use std::time::Duration;

use core_config::ConfigError;

/// Errors raised by a driver-level connection.
#[derive(Debug, Clone, thiserror::Error)]
pub enum DriverError {
    /// Could not establish the connection
    #[error("Connection to {host} failed: {reason}")]
    Connect { host: String, reason: String },

    /// The statement reached the node but failed
    #[error("Query failed: {0}")]
    Query(String),

    /// The connection has already been closed
    #[error("Connection is closed")]
    Closed,

    /// The driver gave up waiting
    #[error("Driver timed out after {0:?}")]
    Timeout(Duration),
}

/// Errors raised by the connection pool.
///
/// Cloneable so a failed checkout can both report to the host selector and be
/// returned to the caller.
#[derive(Debug, Clone, thiserror::Error)]
pub enum PoolError {
    /// Every slot for the picked host stayed busy for the whole checkout budget
    #[error("No connection available to {host} after {waited:?}")]
    NoConnectionAvailable { host: String, waited: Duration },

    /// A new connection could not be dialed; the slot was restored
    #[error("Failed to dial {host}: {reason}")]
    DialFailed { host: String, reason: String },

    /// The pool was closed by a configuration swap
    #[error("Connection pool is closed")]
    PoolClosed,

    /// The configuration cannot back a pool
    #[error("Invalid pool configuration: {0}")]
    InvalidConfig(String),
}

impl PoolError {
    /// Whether the caller can reasonably try the same operation again.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            PoolError::NoConnectionAvailable { .. }
                | PoolError::DialFailed { .. }
                | PoolError::PoolClosed
        )
    }
}

/// Errors returned by the executor to callers.
#[derive(Debug, thiserror::Error)]
pub enum ExecutorError {
    /// Configuration could not be loaded
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// No connection could be checked out
    #[error(transparent)]
    Pool(#[from] PoolError),

    /// The statement failed on the connection
    #[error(transparent)]
    Driver(#[from] DriverError),

    /// The operation is a documented limitation of this layer
    #[error("{0} is not implemented")]
    NotImplemented(&'static str),

    /// A health check did not pass
    #[error("Health check failed: {0}")]
    HealthCheck(String),
}

impl ExecutorError {
    /// Whether the caller can reasonably try the same operation again.
    pub fn is_retryable(&self) -> bool {
        match self {
            ExecutorError::Pool(e) => e.is_retryable(),
            ExecutorError::Driver(DriverError::Timeout(_) | DriverError::Closed) => true,
            _ => false,
        }
    }
}

/// Result type alias for pool operations
pub type PoolResult<T> = Result<T, PoolError>;

/// Result type alias for executor operations
pub type ExecutorResult<T> = Result<T, ExecutorError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exhaustion_is_retryable() {
        let err = PoolError::NoConnectionAvailable {
            host: "10.0.0.1:9042".to_string(),
            waited: Duration::from_secs(5),
        };
        assert!(err.is_retryable());
        assert!(ExecutorError::from(err).is_retryable());
    }

    #[test]
    fn test_not_implemented_is_not_retryable() {
        let err = ExecutorError::NotImplemented("execute_atomically");
        assert!(!err.is_retryable());
        assert_eq!(err.to_string(), "execute_atomically is not implemented");
    }

    #[test]
    fn test_invalid_config_is_not_retryable() {
        assert!(!PoolError::InvalidConfig("no hosts".to_string()).is_retryable());
    }

    #[test]
    fn test_pool_error_display_is_transparent() {
        let err = ExecutorError::from(PoolError::PoolClosed);
        assert_eq!(err.to_string(), "Connection pool is closed");
    }
}
