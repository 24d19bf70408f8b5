//! Error taxonomy and retry policy shared across the pool, executor and driver

pub mod error;
pub mod retry;

pub use error::{DriverError, ExecutorError, ExecutorResult, PoolError, PoolResult};
pub use retry::RetryConfig;
