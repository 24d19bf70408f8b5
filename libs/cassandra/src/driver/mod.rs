//! Driver seam: what the pool needs from a low-level connection.
//!
//! The pool only dials, runs statements and closes. [`scylla`] provides the
//! production implementation; tests plug in fakes.

pub mod scylla;

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;

use crate::common::DriverError;
use crate::config::{ClusterConfig, ConsistencyLevel};

pub use ::scylla::value::CqlValue;

/// One decoded row: column name to value, `None` for a CQL null.
pub type Row = HashMap<String, Option<CqlValue>>;

/// A live connection to a single host.
#[async_trait]
pub trait Connection: Send + Sync {
    /// Run a statement and decode every returned row
    async fn query(
        &self,
        statement: &str,
        params: &[CqlValue],
        consistency: ConsistencyLevel,
    ) -> Result<Vec<Row>, DriverError>;

    /// Run a statement, discarding any rows
    async fn execute(
        &self,
        statement: &str,
        params: &[CqlValue],
        consistency: ConsistencyLevel,
    ) -> Result<(), DriverError>;

    /// Terminate the connection. Idempotent.
    fn close(&self);

    fn is_closed(&self) -> bool;
}

/// Dials new connections to a host.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Connector: Send + Sync {
    async fn dial(
        &self,
        host: &str,
        config: &ClusterConfig,
    ) -> Result<Arc<dyn Connection>, DriverError>;
}
