//! Per-call sessions over a source of connections.
//!
//! A [`Session`] runs statements on whatever its [`ConnectionSource`] picks.
//! The executor builds one per call around a [`SinglePool`] holding the
//! connection it just checked out, so the same session path serves both a
//! full pool and a single connection.

use std::sync::{Arc, Mutex, PoisonError};
use tracing::trace;

use crate::common::{DriverError, ExecutorError, ExecutorResult};
use crate::config::ConsistencyLevel;
use crate::driver::{Connection, CqlValue, Row};
use crate::pool::ConnectionPool;

/// Something that can hand out, count and close a set of connections.
pub trait ConnectionSource: Send + Sync {
    /// Connection for the next statement, if any is available
    fn pick(&self) -> Option<Arc<dyn Connection>>;

    fn size(&self) -> usize;

    fn close(&self);

    /// Replace the host set the source draws from
    fn set_hosts(&self, hosts: &[String]);

    /// Told about a statement that failed on `conn`
    fn handle_error(&self, conn: &Arc<dyn Connection>, error: &DriverError);
}

/// Checkout owns host selection and checkin owns outcome reporting, so the
/// pool only answers the sizing and shutdown half of the interface.
impl ConnectionSource for ConnectionPool {
    fn pick(&self) -> Option<Arc<dyn Connection>> {
        None
    }

    fn size(&self) -> usize {
        ConnectionPool::size(self)
    }

    fn close(&self) {
        ConnectionPool::close(self)
    }

    fn set_hosts(&self, _hosts: &[String]) {}

    fn handle_error(&self, _conn: &Arc<dyn Connection>, _error: &DriverError) {}
}

/// A source of exactly one connection.
///
/// Closing releases the reference without closing the connection itself;
/// the pool it was checked out from still owns it.
pub struct SinglePool {
    conn: Mutex<Option<Arc<dyn Connection>>>,
}

impl SinglePool {
    pub fn new(conn: Arc<dyn Connection>) -> Self {
        Self {
            conn: Mutex::new(Some(conn)),
        }
    }
}

impl ConnectionSource for SinglePool {
    fn pick(&self) -> Option<Arc<dyn Connection>> {
        self.conn
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn size(&self) -> usize {
        match *self.conn.lock().unwrap_or_else(PoisonError::into_inner) {
            Some(_) => 1,
            None => 0,
        }
    }

    fn close(&self) {
        self.conn
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
    }

    fn set_hosts(&self, _hosts: &[String]) {}

    fn handle_error(&self, _conn: &Arc<dyn Connection>, _error: &DriverError) {}
}

/// Runs statements at a fixed consistency level.
pub struct Session {
    source: Arc<dyn ConnectionSource>,
    consistency: ConsistencyLevel,
}

impl Session {
    pub fn new(source: Arc<dyn ConnectionSource>, consistency: ConsistencyLevel) -> Self {
        Self { source, consistency }
    }

    pub fn consistency(&self) -> ConsistencyLevel {
        self.consistency
    }

    pub async fn query(&self, statement: &str, params: &[CqlValue]) -> ExecutorResult<Vec<Row>> {
        let conn = self.pick()?;
        let result = conn.query(statement, params, self.consistency).await;
        self.observe(&conn, result)
    }

    pub async fn execute(&self, statement: &str, params: &[CqlValue]) -> ExecutorResult<()> {
        let conn = self.pick()?;
        let result = conn.execute(statement, params, self.consistency).await;
        self.observe(&conn, result)
    }

    pub fn close(&self) {
        self.source.close();
    }

    fn pick(&self) -> Result<Arc<dyn Connection>, DriverError> {
        self.source.pick().ok_or(DriverError::Closed)
    }

    fn observe<T>(&self, conn: &Arc<dyn Connection>, result: Result<T, DriverError>) -> ExecutorResult<T> {
        if let Err(e) = &result {
            trace!(error = %e, "Statement failed");
            self.source.handle_error(conn, e);
        }
        result.map_err(ExecutorError::from)
    }
}
