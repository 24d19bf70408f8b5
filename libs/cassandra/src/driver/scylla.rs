use async_trait::async_trait;
use scylla::client::PoolSize;
use scylla::client::session::Session;
use scylla::client::session_builder::SessionBuilder;
use scylla::policies::host_filter::AllowListHostFilter;
use scylla::response::query_result::QueryResult;
use scylla::statement::unprepared::Statement;
use std::num::NonZeroUsize;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;
use tracing::{debug, warn};

use super::{Connection, Connector, CqlValue, Row};
use crate::common::DriverError;
use crate::config::{ClusterConfig, ConsistencyLevel};

/// Dials `scylla` sessions pinned to a single node.
///
/// Each dialed session talks to exactly one host through exactly one
/// connection, so the pool (not the driver) decides where statements go.
#[derive(Debug, Clone, Default)]
pub struct ScyllaConnector;

impl ScyllaConnector {
    pub fn new() -> Self {
        Self
    }

    fn builder(address: &str, config: &ClusterConfig) -> Result<SessionBuilder, DriverError> {
        let filter = AllowListHostFilter::new([address]).map_err(|e| DriverError::Connect {
            host: address.to_string(),
            reason: format!("cannot resolve host: {}", e),
        })?;

        let mut builder = SessionBuilder::new()
            .known_node(address)
            .connection_timeout(config.connect_timeout)
            .pool_size(PoolSize::PerHost(NonZeroUsize::MIN))
            .host_filter(Arc::new(filter))
            .fetch_schema_metadata(false)
            .use_keyspace(&config.name, true);

        // Set authentication if provided
        if let (Some(username), Some(password)) = (&config.username, &config.password) {
            builder = builder.user(username, password);
        }

        if let Some(datacenter) = &config.local_datacenter {
            debug!(
                keyspace = %config.name,
                host = %address,
                datacenter = %datacenter,
                "local_datacenter has no effect on a single-node session"
            );
        }

        if config.ssl_enabled {
            warn!(
                keyspace = %config.name,
                host = %address,
                "ssl_enabled is set but this connector dials plaintext sessions"
            );
        }

        Ok(builder)
    }
}

#[async_trait]
impl Connector for ScyllaConnector {
    async fn dial(
        &self,
        host: &str,
        config: &ClusterConfig,
    ) -> Result<Arc<dyn Connection>, DriverError> {
        let address = ClusterConfig::address_of(host);
        debug!(keyspace = %config.name, host = %address, "Dialing session");

        let builder = Self::builder(&address, config)?;
        let session = tokio::time::timeout(config.connect_timeout, builder.build())
            .await
            .map_err(|_| DriverError::Timeout(config.connect_timeout))?
            .map_err(|e| DriverError::Connect {
                host: address.clone(),
                reason: e.to_string(),
            })?;

        Ok(Arc::new(ScyllaConnection::new(
            session,
            config.request_timeout,
        )))
    }
}

/// One single-node `scylla` session presented as a pool connection.
pub struct ScyllaConnection {
    session: RwLock<Option<Arc<Session>>>,
    request_timeout: Duration,
}

impl ScyllaConnection {
    pub fn new(session: Session, request_timeout: Duration) -> Self {
        Self {
            session: RwLock::new(Some(Arc::new(session))),
            request_timeout,
        }
    }

    fn session(&self) -> Result<Arc<Session>, DriverError> {
        self.session
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or(DriverError::Closed)
    }

    fn statement(&self, statement: &str, consistency: ConsistencyLevel) -> Statement {
        let mut stmt = Statement::new(statement);
        stmt.set_consistency(consistency.into());
        stmt.set_request_timeout(Some(self.request_timeout));
        stmt
    }

    async fn run(
        &self,
        statement: &str,
        params: &[CqlValue],
        consistency: ConsistencyLevel,
    ) -> Result<QueryResult, DriverError> {
        let session = self.session()?;
        session
            .query_unpaged(self.statement(statement, consistency), params)
            .await
            .map_err(|e| DriverError::Query(e.to_string()))
    }
}

#[async_trait]
impl Connection for ScyllaConnection {
    async fn query(
        &self,
        statement: &str,
        params: &[CqlValue],
        consistency: ConsistencyLevel,
    ) -> Result<Vec<Row>, DriverError> {
        let result = self.run(statement, params, consistency).await?;
        decode_rows(result)
    }

    async fn execute(
        &self,
        statement: &str,
        params: &[CqlValue],
        consistency: ConsistencyLevel,
    ) -> Result<(), DriverError> {
        self.run(statement, params, consistency).await?;
        Ok(())
    }

    fn close(&self) {
        // Dropping the last Arc<Session> tears down its connection
        self.session
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
    }

    fn is_closed(&self) -> bool {
        self.session
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_none()
    }
}

/// Decode every row of a result into a column-name map.
///
/// Statements that return no rows (writes, DDL) decode to an empty list.
fn decode_rows(result: QueryResult) -> Result<Vec<Row>, DriverError> {
    if !result.is_rows() {
        return Ok(Vec::new());
    }

    let rows_result = result
        .into_rows_result()
        .map_err(|e| DriverError::Query(e.to_string()))?;

    let names: Vec<String> = rows_result
        .column_specs()
        .iter()
        .map(|column| column.name().to_string())
        .collect();

    let rows = rows_result
        .rows::<scylla::value::Row>()
        .map_err(|e| DriverError::Query(e.to_string()))?;

    rows.map(|row| {
        let row = row.map_err(|e| DriverError::Query(e.to_string()))?;
        Ok(names.iter().cloned().zip(row.columns).collect())
    })
    .collect()
}
