//! In-memory driver fakes shared by the unit tests.

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::common::DriverError;
use crate::config::{ClusterConfig, ConsistencyLevel};
use crate::driver::{Connection, Connector, CqlValue, Row};

/// A connection that records the statements it runs.
#[derive(Debug)]
pub struct FakeConnection {
    pub id: usize,
    pub host: String,
    closed: AtomicBool,
    pub statements: Mutex<Vec<(String, ConsistencyLevel)>>,
    pub fail_statements: AtomicBool,
    /// How long every statement takes before it runs
    pub latency: Mutex<Duration>,
}

impl FakeConnection {
    pub fn new(id: usize, host: &str) -> Arc<Self> {
        Self::with_latency(id, host, Duration::ZERO)
    }

    pub fn with_latency(id: usize, host: &str, latency: Duration) -> Arc<Self> {
        Arc::new(Self {
            id,
            host: host.to_string(),
            closed: AtomicBool::new(false),
            statements: Mutex::new(Vec::new()),
            fail_statements: AtomicBool::new(false),
            latency: Mutex::new(latency),
        })
    }

    pub fn set_latency(&self, latency: Duration) {
        *self.latency.lock().unwrap() = latency;
    }

    async fn wait(&self) {
        let latency = *self.latency.lock().unwrap();
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
    }

    fn record(&self, statement: &str, consistency: ConsistencyLevel) -> Result<(), DriverError> {
        if self.is_closed() {
            return Err(DriverError::Closed);
        }
        if self.fail_statements.load(Ordering::SeqCst) {
            return Err(DriverError::Query(format!("rejected by {}", self.host)));
        }
        self.statements
            .lock()
            .unwrap()
            .push((statement.to_string(), consistency));
        Ok(())
    }
}

#[async_trait]
impl Connection for FakeConnection {
    async fn query(
        &self,
        statement: &str,
        _params: &[CqlValue],
        consistency: ConsistencyLevel,
    ) -> Result<Vec<Row>, DriverError> {
        self.wait().await;
        self.record(statement, consistency)?;
        let mut row = HashMap::new();
        row.insert("host".to_string(), Some(CqlValue::Text(self.host.clone())));
        row.insert("release_version".to_string(), Some(CqlValue::Text("4.1.3".to_string())));
        row.insert("missing".to_string(), None);
        Ok(vec![row])
    }

    async fn execute(
        &self,
        statement: &str,
        _params: &[CqlValue],
        consistency: ConsistencyLevel,
    ) -> Result<(), DriverError> {
        self.wait().await;
        self.record(statement, consistency)
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

/// A connector handing out [`FakeConnection`]s and remembering every dial.
#[derive(Debug, Default)]
pub struct FakeConnector {
    next_id: AtomicUsize,
    pub dialed: Mutex<Vec<Arc<FakeConnection>>>,
    pub unreachable: Mutex<HashSet<String>>,
    dial_latency: Mutex<Duration>,
    statement_latency: Mutex<Duration>,
}

impl FakeConnector {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn dial_count(&self) -> usize {
        self.dialed.lock().unwrap().len()
    }

    pub fn set_unreachable(&self, host: &str) {
        self.unreachable.lock().unwrap().insert(host.to_string());
    }

    /// Delay every later dial by `latency`
    pub fn set_dial_latency(&self, latency: Duration) {
        *self.dial_latency.lock().unwrap() = latency;
    }

    /// Latency for statements on connections dialed from now on
    pub fn set_statement_latency(&self, latency: Duration) {
        *self.statement_latency.lock().unwrap() = latency;
    }

    pub fn connections(&self) -> Vec<Arc<FakeConnection>> {
        self.dialed.lock().unwrap().clone()
    }
}

#[async_trait]
impl Connector for FakeConnector {
    async fn dial(
        &self,
        host: &str,
        _config: &ClusterConfig,
    ) -> Result<Arc<dyn Connection>, DriverError> {
        let latency = *self.dial_latency.lock().unwrap();
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
        if self.unreachable.lock().unwrap().contains(host) {
            return Err(DriverError::Connect {
                host: host.to_string(),
                reason: "connection refused".to_string(),
            });
        }

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let conn = FakeConnection::with_latency(id, host, *self.statement_latency.lock().unwrap());
        self.dialed.lock().unwrap().push(conn.clone());
        Ok(conn)
    }
}
