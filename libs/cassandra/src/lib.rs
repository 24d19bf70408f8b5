//! Pooled, hot-reloadable query execution for Cassandra/ScyllaDB keyspaces
//!
//! Sits between call sites and the `scylla` driver: keeps a bounded set of
//! connections per host, picks hosts with an epsilon-greedy policy that
//! follows observed latency and failures, and swaps the whole pool when a
//! keyspace's configuration changes.
//!
//! # Layers
//!
//! - [`HostSelector`] - adaptive host choice over a fixed host list
//! - [`ConnectionSlot`] - per-host established/unestablished capacity
//! - [`ConnectionPool`] - `checkout`/`checkin` over one slot per host
//! - [`Executor`] - lazy pool, config watcher, `query`/`execute`
//! - [`ExecutorRegistry`] - one executor per keyspace name
//!
//! # Example
//!
//! ```ignore
//! use cassandra_pool::{EnvConfigSource, ExecutorRegistry, ScyllaConnector};
//! use std::sync::Arc;
//!
//! let source = Arc::new(EnvConfigSource::new());
//! let registry = ExecutorRegistry::new(source.clone(), Arc::new(ScyllaConnector::new()));
//!
//! let accounts = registry.get("accounts");
//! accounts.execute("INSERT INTO users (id) VALUES (?)", &[CqlValue::Int(1)]).await?;
//! let rows = accounts.query("SELECT * FROM users", &[]).await?;
//!
//! // After changing CASSANDRA_* variables
//! source.notify();
//! ```

pub mod common;
mod config;
pub mod driver;
mod executor;
mod health;
mod pool;
mod registry;
mod selector;
mod session;
mod slot;
mod source;

#[cfg(test)]
mod testing;

pub use common::{DriverError, ExecutorError, ExecutorResult, PoolError, PoolResult, RetryConfig};
pub use config::{ClusterConfig, ConsistencyLevel};
pub use driver::scylla::{ScyllaConnection, ScyllaConnector};
pub use driver::{Connection, Connector, CqlValue, Row};
pub use executor::{Executor, ExecutorSettings};
pub use health::HealthStatus;
pub use pool::{CheckoutHandle, ConnectionPool, HostStats, PoolSettings};
pub use registry::ExecutorRegistry;
pub use selector::{HostResponse, HostSelector, SelectorSettings};
pub use session::{ConnectionSource, Session, SinglePool};
pub use slot::{Acquired, ConnectionSlot, ReservedToken, SlotCounts};
pub use source::{ConfigSource, EnvConfigSource, MemoryConfigSource};

// Re-export the config error so callers can match on load failures
pub use core_config::ConfigError;
