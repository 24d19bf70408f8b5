//! Per-keyspace statement executor with hot-swappable connection pool.
//!
//! An [`Executor`] builds its pool lazily on the first statement, then keeps
//! a background task subscribed to the [`ConfigSource`]. Whenever a change
//! notification arrives the configuration is reloaded and, if its
//! fingerprint differs from the one the active pool was built from, a new
//! pool is built, published and the old one closed. Callers already running
//! on the old pool finish on the connection they hold.

use observability::{OperationTimer, PoolMetrics, operation};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::time::Instant;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{OnceCell, RwLock, broadcast};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace, warn};

use crate::common::{ExecutorError, ExecutorResult, PoolError, RetryConfig};
use crate::config::ClusterConfig;
use crate::driver::{Connector, CqlValue, Row};
use crate::pool::{CheckoutHandle, ConnectionPool, HostStats, PoolSettings};
use crate::session::{Session, SinglePool};
use crate::source::ConfigSource;

/// Executor tuning.
#[derive(Debug, Clone, Default)]
pub struct ExecutorSettings {
    pub pool: PoolSettings,

    /// Backoff between attempts to apply a configuration whose pool could
    /// not be built
    pub retry: RetryConfig,
}

impl ExecutorSettings {
    pub fn with_pool(mut self, pool: PoolSettings) -> Self {
        self.pool = pool;
        self
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }
}

#[derive(Clone)]
struct ActivePool {
    pool: Arc<ConnectionPool>,
    config: Arc<ClusterConfig>,
    fingerprint: u64,
}

struct ExecutorInner {
    name: String,
    source: Arc<dyn ConfigSource>,
    connector: Arc<dyn Connector>,
    settings: ExecutorSettings,
    init: OnceCell<()>,
    active: RwLock<Option<ActivePool>>,
    // Serialises reloads from the watcher and from callers
    reload_lock: tokio::sync::Mutex<()>,
    watcher: Mutex<Option<JoinHandle<()>>>,
    shut_down: AtomicBool,
}

/// Runs statements for one keyspace on its current connection pool.
pub struct Executor {
    inner: Arc<ExecutorInner>,
}

impl Executor {
    pub fn new(
        name: impl Into<String>,
        source: Arc<dyn ConfigSource>,
        connector: Arc<dyn Connector>,
    ) -> Self {
        Self::with_settings(name, source, connector, ExecutorSettings::default())
    }

    pub fn with_settings(
        name: impl Into<String>,
        source: Arc<dyn ConfigSource>,
        connector: Arc<dyn Connector>,
        settings: ExecutorSettings,
    ) -> Self {
        Self {
            inner: Arc::new(ExecutorInner {
                name: name.into(),
                source,
                connector,
                settings,
                init: OnceCell::new(),
                active: RwLock::new(None),
                reload_lock: tokio::sync::Mutex::new(()),
                watcher: Mutex::new(None),
                shut_down: AtomicBool::new(false),
            }),
        }
    }

    /// Keyspace this executor serves
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Run a statement and return every row it produced.
    pub async fn query(&self, statement: &str, params: &[CqlValue]) -> ExecutorResult<Vec<Row>> {
        let timer = OperationTimer::start(&self.inner.name, operation::QUERY);
        let started = Instant::now();
        let lease = self.lease().await?;

        let result = lease.session.query(statement, params).await;
        lease.release(result.as_ref().err());

        trace!(
            keyspace = %self.inner.name,
            elapsed = ?started.elapsed(),
            statement = %statement,
            "Query finished"
        );
        timer.finish(result.is_ok());
        result
    }

    /// Run a statement, discarding any rows.
    pub async fn execute(&self, statement: &str, params: &[CqlValue]) -> ExecutorResult<()> {
        let timer = OperationTimer::start(&self.inner.name, operation::EXECUTE);
        let started = Instant::now();
        let lease = self.lease().await?;

        let result = lease.session.execute(statement, params).await;
        lease.release(result.as_ref().err());

        trace!(
            keyspace = %self.inner.name,
            elapsed = ?started.elapsed(),
            statement = %statement,
            "Execute finished"
        );
        timer.finish(result.is_ok());
        result
    }

    /// Multi-statement atomic execution is not supported by this layer.
    ///
    /// Always fails without touching configuration or connections.
    pub async fn execute_atomically(
        &self,
        _statements: &[&str],
        _params: &[Vec<CqlValue>],
    ) -> ExecutorResult<()> {
        Err(ExecutorError::NotImplemented("execute_atomically"))
    }

    /// Re-read the configuration and swap the pool if it changed.
    ///
    /// Returns whether the pool was replaced. On an executor that has not
    /// served anything yet this performs the initial build instead and
    /// returns `false`. Fails with [`PoolError::PoolClosed`] after
    /// [`shutdown`](Self::shutdown).
    pub async fn reload(&self) -> ExecutorResult<bool> {
        if !self.is_initialised() {
            self.ensure_ready().await?;
            return Ok(false);
        }
        self.inner.reload().await
    }

    pub fn is_initialised(&self) -> bool {
        self.inner.init.initialized()
    }

    /// Connections tracked by the active pool
    pub async fn pool_size(&self) -> usize {
        match self.inner.active.read().await.as_ref() {
            Some(active) => active.pool.size(),
            None => 0,
        }
    }

    /// Fingerprint of the configuration the active pool was built from
    pub async fn current_fingerprint(&self) -> Option<u64> {
        self.inner.active.read().await.as_ref().map(|a| a.fingerprint)
    }

    /// Configuration the active pool was built from
    pub async fn current_config(&self) -> Option<Arc<ClusterConfig>> {
        self.inner.active.read().await.as_ref().map(|a| a.config.clone())
    }

    pub async fn host_stats(&self) -> Vec<HostStats> {
        match self.inner.active.read().await.as_ref() {
            Some(active) => active.pool.host_stats(),
            None => Vec::new(),
        }
    }

    /// Stop watching for changes and close the active pool.
    ///
    /// Statements and reloads issued afterwards fail with
    /// [`PoolError::PoolClosed`].
    pub async fn shutdown(&self) {
        self.inner.shut_down.store(true, Ordering::Release);
        self.inner.stop_watcher();
        if let Some(active) = self.inner.active.write().await.take() {
            active.pool.close();
            PoolMetrics::set_connections(&self.inner.name, 0);
            info!(keyspace = %self.inner.name, "Executor shut down");
        }
    }

    async fn ensure_ready(&self) -> ExecutorResult<()> {
        self.inner
            .init
            .get_or_try_init(|| async {
                // Subscribe first so a write racing the initial load is not lost
                let changes = self.inner.source.subscribe();
                self.inner.ensure_running()?;
                let config = self.inner.source.load(&self.inner.name)?;
                let active = self.inner.build(config)?;

                let summary = active.config.to_string();
                self.inner.publish(active).await?;
                info!(keyspace = %self.inner.name, config = %summary, "Initialised executor");

                let handle = spawn_watcher(&self.inner, changes);
                *self
                    .inner
                    .watcher
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner) = Some(handle);
                // A shutdown racing the spawn must not leave the watcher running
                if self.inner.is_shut_down() {
                    self.inner.stop_watcher();
                }
                Ok::<(), ExecutorError>(())
            })
            .await?;
        Ok(())
    }

    /// Check out a connection from the active pool.
    ///
    /// A checkout that fails because its pool was swapped out while it
    /// waited is retried once on the pool that replaced it.
    async fn lease(&self) -> ExecutorResult<Lease> {
        self.ensure_ready().await?;

        let active = self.inner.current().await?;
        let first = active.pool.clone();
        match self.lease_from(active).await {
            Err(ExecutorError::Pool(PoolError::PoolClosed)) => {
                let current = self.inner.current().await?;
                if Arc::ptr_eq(&current.pool, &first) {
                    return Err(PoolError::PoolClosed.into());
                }
                debug!(keyspace = %self.inner.name, "Pool swapped during checkout; retrying on new pool");
                self.lease_from(current).await
            }
            other => other,
        }
    }

    async fn lease_from(&self, active: ActivePool) -> ExecutorResult<Lease> {
        let handle = active.pool.checkout().await;
        match handle.result() {
            Ok(conn) => Ok(Lease {
                keyspace: self.inner.name.clone(),
                pool: active.pool,
                handle,
                session: Session::new(Arc::new(SinglePool::new(conn)), active.config.consistency),
            }),
            Err(e) => {
                // The handle reports its own failure to the host selector
                let _ = active.pool.checkin(handle, None);
                Err(e.into())
            }
        }
    }
}

impl fmt::Debug for Executor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Executor")
            .field("name", &self.inner.name)
            .field("initialised", &self.is_initialised())
            .finish()
    }
}

/// One checked out connection wrapped in a per-call session.
///
/// Dropping a lease without [`release`](Self::release) returns the
/// connection through the [`CheckoutHandle`] drop.
struct Lease {
    keyspace: String,
    pool: Arc<ConnectionPool>,
    handle: CheckoutHandle,
    session: Session,
}

impl Lease {
    fn release(self, error: Option<&ExecutorError>) {
        let Lease {
            keyspace,
            pool,
            handle,
            session,
        } = self;

        let host = handle.host().to_string();
        if let Err(e) = pool.checkin(handle, error.map(|e| e as &dyn fmt::Display)) {
            debug!(keyspace = %keyspace, host = %host, error = %e, "Connection returned to superseded pool");
        }
        session.close();
    }
}

impl ExecutorInner {
    fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::Acquire)
    }

    fn ensure_running(&self) -> ExecutorResult<()> {
        if self.is_shut_down() {
            return Err(PoolError::PoolClosed.into());
        }
        Ok(())
    }

    async fn current(&self) -> ExecutorResult<ActivePool> {
        Ok(self.active.read().await.clone().ok_or(PoolError::PoolClosed)?)
    }

    /// Make `next` the active pool, returning the one it replaced.
    ///
    /// Refused once the executor is shut down; `next` is closed then.
    async fn publish(&self, next: ActivePool) -> ExecutorResult<Option<ActivePool>> {
        let mut active = self.active.write().await;
        if self.is_shut_down() {
            drop(active);
            next.pool.close();
            return Err(PoolError::PoolClosed.into());
        }
        Ok(active.replace(next))
    }

    fn build(&self, config: ClusterConfig) -> ExecutorResult<ActivePool> {
        let fingerprint = config.fingerprint();
        let config = Arc::new(config);
        let pool = ConnectionPool::new(config.clone(), self.connector.clone(), self.settings.pool.clone())?;
        Ok(ActivePool {
            pool: Arc::new(pool),
            config,
            fingerprint,
        })
    }

    async fn reload(&self) -> ExecutorResult<bool> {
        let _guard = self.reload_lock.lock().await;
        self.ensure_running()?;

        let config = self.source.load(&self.name).map_err(|e| {
            error!(keyspace = %self.name, error = %e, "Error loading new config");
            e
        })?;

        let fingerprint = config.fingerprint();
        let current = self.active.read().await.as_ref().map(|a| a.fingerprint);
        if current == Some(fingerprint) {
            debug!(
                keyspace = %self.name,
                fingerprint,
                "Config changed but not invalidating connection pool (fingerprint unchanged)"
            );
            return Ok(false);
        }

        info!(keyspace = %self.name, "Config changed; invalidating connection pool");
        let timer = OperationTimer::start(&self.name, operation::SWAP);
        let next = self.build(config).map_err(|e| {
            error!(keyspace = %self.name, error = %e, "Error building connection pool");
            e
        })?;

        let summary = next.config.to_string();
        let previous = self.publish(next).await?;
        if let Some(previous) = previous {
            previous.pool.close();
        }
        PoolMetrics::set_connections(&self.name, 0);
        timer.finish(true);

        info!(keyspace = %self.name, config = %summary, "Switched config");
        Ok(true)
    }

    fn stop_watcher(&self) {
        if let Some(handle) = self
            .watcher
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            handle.abort();
        }
    }
}

impl Drop for ExecutorInner {
    fn drop(&mut self) {
        self.stop_watcher();
        if let Some(active) = self.active.get_mut().take() {
            active.pool.close();
        }
    }
}

/// Reload on every change notification until the executor goes away.
///
/// A pool that fails to build is retried on the configured backoff even
/// without a new notification; a configuration that fails to load is not.
fn spawn_watcher(inner: &Arc<ExecutorInner>, mut changes: broadcast::Receiver<()>) -> JoinHandle<()> {
    let weak: Weak<ExecutorInner> = Arc::downgrade(inner);
    let retry = inner.settings.retry.clone();
    let keyspace = inner.name.clone();

    tokio::spawn(async move {
        let mut attempt: u32 = 0;

        loop {
            let wake = if attempt > 0 {
                tokio::select! {
                    received = changes.recv() => received,
                    _ = tokio::time::sleep(retry.delay_for_attempt(attempt)) => Ok(()),
                }
            } else {
                changes.recv().await
            };

            match wake {
                Ok(()) => {}
                Err(RecvError::Lagged(skipped)) => {
                    trace!(keyspace = %keyspace, skipped, "Coalesced config notifications");
                }
                Err(RecvError::Closed) => {
                    debug!(keyspace = %keyspace, "Config source closed; stopping watcher");
                    return;
                }
            }

            let Some(inner) = weak.upgrade() else {
                return;
            };

            attempt = match inner.reload().await {
                Ok(_) | Err(ExecutorError::Config(_)) => 0,
                Err(ExecutorError::Pool(PoolError::PoolClosed)) => return,
                Err(_) => {
                    let next = attempt + 1;
                    if retry.should_retry(next) {
                        warn!(
                            keyspace = %keyspace,
                            attempt = next,
                            delay = ?retry.delay_for_attempt(next),
                            "Retrying config switch after delay"
                        );
                        next
                    } else {
                        error!(keyspace = %keyspace, attempts = attempt, "Giving up on config switch");
                        0
                    }
                }
            };
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::DriverError;
    use crate::driver::{Connection, MockConnector};
    use crate::source::{MemoryConfigSource, MockConfigSource};
    use crate::testing::FakeConnector;
    use core_config::ConfigError;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn config(hosts: &[&str]) -> ClusterConfig {
        ClusterConfig::new("accounts", hosts.to_vec()).with_connections_per_host(1)
    }

    fn executor(source: Arc<MemoryConfigSource>, connector: Arc<FakeConnector>) -> Executor {
        Executor::new("accounts", source, connector)
    }

    async fn active_pool(executor: &Executor) -> Arc<ConnectionPool> {
        executor.inner.active.read().await.as_ref().unwrap().pool.clone()
    }

    async fn wait_for_fingerprint(executor: &Executor, expected: u64) {
        for _ in 0..200 {
            if executor.current_fingerprint().await == Some(expected) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("executor never switched to fingerprint {}", expected);
    }

    #[tokio::test]
    async fn test_first_query_initialises_lazily() {
        let source = Arc::new(MemoryConfigSource::new().with_config(config(&["host1"])));
        let connector = FakeConnector::new();
        let executor = executor(source, connector.clone());

        assert!(!executor.is_initialised());
        assert_eq!(connector.dial_count(), 0);

        let rows = executor.query("SELECT * FROM users", &[]).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert!(executor.is_initialised());
        assert_eq!(executor.pool_size().await, 1);
        assert_eq!(connector.dial_count(), 1);
    }

    #[tokio::test]
    async fn test_statements_reuse_connection_and_consistency() {
        let cfg = config(&["host1"]).with_consistency(crate::ConsistencyLevel::LocalQuorum);
        let source = Arc::new(MemoryConfigSource::new().with_config(cfg));
        let connector = FakeConnector::new();
        let executor = executor(source, connector.clone());

        executor.execute("INSERT INTO users (id) VALUES (?)", &[CqlValue::Int(1)]).await.unwrap();
        executor.query("SELECT * FROM users", &[]).await.unwrap();

        let conns = connector.connections();
        assert_eq!(conns.len(), 1);
        let statements = conns[0].statements.lock().unwrap();
        assert_eq!(statements.len(), 2);
        assert!(statements.iter().all(|(_, c)| *c == crate::ConsistencyLevel::LocalQuorum));
    }

    #[tokio::test]
    async fn test_failed_init_is_retried() {
        let source = Arc::new(MemoryConfigSource::new());
        let executor = executor(source.clone(), FakeConnector::new());

        let err = executor.query("SELECT * FROM users", &[]).await.unwrap_err();
        assert!(matches!(err, ExecutorError::Config(ConfigError::NotFound(_))));
        assert!(!executor.is_initialised());

        source.set(config(&["host1"]));
        executor.query("SELECT * FROM users", &[]).await.unwrap();
        assert!(executor.is_initialised());
    }

    #[tokio::test]
    async fn test_noop_reload_keeps_pool() {
        let source = Arc::new(MemoryConfigSource::new().with_config(config(&["host1"])));
        let executor = executor(source.clone(), FakeConnector::new());
        executor.query("SELECT * FROM users", &[]).await.unwrap();
        let before = active_pool(&executor).await;

        source.set(config(&["host1"]));
        assert!(!executor.reload().await.unwrap());

        let after = active_pool(&executor).await;
        assert!(Arc::ptr_eq(&before, &after));
        assert!(!before.is_closed());
    }

    #[tokio::test]
    async fn test_changed_config_swaps_and_closes_old_pool() {
        let source = Arc::new(MemoryConfigSource::new().with_config(config(&["host1"])));
        let connector = FakeConnector::new();
        let executor = executor(source.clone(), connector.clone());
        executor.query("SELECT * FROM users", &[]).await.unwrap();
        let before = active_pool(&executor).await;

        let next = config(&["host2"]);
        let next_fingerprint = next.fingerprint();
        source.set(next);
        assert!(executor.reload().await.unwrap());

        assert!(before.is_closed());
        assert!(connector.connections()[0].is_closed());
        assert_eq!(executor.current_fingerprint().await, Some(next_fingerprint));

        let rows = executor.query("SELECT * FROM users", &[]).await.unwrap();
        assert_eq!(rows[0]["host"], Some(CqlValue::Text("host2".to_string())));
    }

    #[tokio::test]
    async fn test_watcher_swaps_on_notification() {
        let source = Arc::new(MemoryConfigSource::new().with_config(config(&["host1"])));
        let executor = executor(source.clone(), FakeConnector::new());
        executor.query("SELECT * FROM users", &[]).await.unwrap();

        let next = config(&["host1", "host2"]);
        let next_fingerprint = next.fingerprint();
        source.set(next);

        wait_for_fingerprint(&executor, next_fingerprint).await;
        assert_eq!(executor.host_stats().await.len(), 2);
    }

    #[tokio::test]
    async fn test_failed_build_keeps_old_pool() {
        let source = Arc::new(MemoryConfigSource::new().with_config(config(&["host1"])));
        let executor = executor(source.clone(), FakeConnector::new());
        executor.query("SELECT * FROM users", &[]).await.unwrap();
        let before = executor.current_fingerprint().await;

        source.set(ClusterConfig::new("accounts", Vec::<String>::new()));
        let err = executor.reload().await.unwrap_err();
        assert!(matches!(err, ExecutorError::Pool(PoolError::InvalidConfig(_))));

        assert_eq!(executor.current_fingerprint().await, before);
        executor.query("SELECT * FROM users", &[]).await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_watcher_retries_failed_build() {
        let good = config(&["host1"]);
        let fixed = config(&["host2"]);
        let fixed_fingerprint = fixed.fingerprint();
        let (changes, _) = broadcast::channel(4);
        let loads = Arc::new(AtomicUsize::new(0));

        let mut source = MockConfigSource::new();
        let subscribe_changes = changes.clone();
        source.expect_subscribe().returning(move || subscribe_changes.subscribe());
        let counter = loads.clone();
        source.expect_load().returning(move |_| match counter.fetch_add(1, Ordering::SeqCst) {
            0 => Ok(good.clone()),
            1 => Ok(ClusterConfig::new("accounts", Vec::<String>::new())),
            _ => Ok(fixed.clone()),
        });

        let executor = Executor::new("accounts", Arc::new(source), FakeConnector::new());
        executor.query("SELECT * FROM users", &[]).await.unwrap();

        changes.send(()).unwrap();
        wait_for_fingerprint(&executor, fixed_fingerprint).await;
        assert!(loads.load(Ordering::SeqCst) >= 3);
    }

    #[tokio::test]
    async fn test_execute_atomically_is_not_implemented() {
        let mut connector = MockConnector::new();
        connector.expect_dial().never();
        let mut source = MockConfigSource::new();
        source.expect_load().never();
        source.expect_subscribe().never();

        let executor = Executor::new("accounts", Arc::new(source), Arc::new(connector));
        let err = executor
            .execute_atomically(
                &["INSERT INTO users (id) VALUES (?)"],
                &[vec![CqlValue::Int(1)]],
            )
            .await
            .unwrap_err();

        assert!(matches!(err, ExecutorError::NotImplemented(_)));
        assert!(!executor.is_initialised());
    }

    #[tokio::test]
    async fn test_shutdown_closes_pool() {
        let source = Arc::new(MemoryConfigSource::new().with_config(config(&["host1"])));
        let connector = FakeConnector::new();
        let executor = executor(source, connector.clone());
        executor.query("SELECT * FROM users", &[]).await.unwrap();

        executor.shutdown().await;
        assert!(connector.connections()[0].is_closed());
        assert_eq!(executor.pool_size().await, 0);

        let err = executor.query("SELECT * FROM users", &[]).await.unwrap_err();
        assert!(matches!(err, ExecutorError::Pool(PoolError::PoolClosed)));
    }

    #[tokio::test]
    async fn test_reload_after_shutdown_fails() {
        let source = Arc::new(MemoryConfigSource::new().with_config(config(&["host1"])));
        let connector = FakeConnector::new();
        let executor = executor(source.clone(), connector.clone());
        executor.query("SELECT * FROM users", &[]).await.unwrap();
        executor.shutdown().await;

        source.set(config(&["host2"]));
        let err = executor.reload().await.unwrap_err();
        assert!(matches!(err, ExecutorError::Pool(PoolError::PoolClosed)));
        assert_eq!(executor.current_fingerprint().await, None);
        assert_eq!(connector.dial_count(), 1);
    }

    #[tokio::test]
    async fn test_shutdown_before_first_use() {
        let source = Arc::new(MemoryConfigSource::new().with_config(config(&["host1"])));
        let connector = FakeConnector::new();
        let executor = executor(source, connector.clone());
        executor.shutdown().await;

        let err = executor.query("SELECT * FROM users", &[]).await.unwrap_err();
        assert!(matches!(err, ExecutorError::Pool(PoolError::PoolClosed)));
        let err = executor.reload().await.unwrap_err();
        assert!(matches!(err, ExecutorError::Pool(PoolError::PoolClosed)));
        assert!(!executor.is_initialised());
        assert_eq!(connector.dial_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_query_returns_connection() {
        let source = Arc::new(MemoryConfigSource::new().with_config(config(&["host1"])));
        let connector = FakeConnector::new();
        connector.set_statement_latency(Duration::from_secs(2));
        let executor = executor(source, connector.clone());

        let cancelled = tokio::time::timeout(
            Duration::from_secs(1),
            executor.query("SELECT * FROM users", &[]),
        )
        .await;
        assert!(cancelled.is_err());
        assert_eq!(executor.host_stats().await[0].established, 1);

        connector.connections()[0].set_latency(Duration::ZERO);
        executor.query("SELECT * FROM users", &[]).await.unwrap();
        assert_eq!(connector.dial_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_queued_caller_moves_to_new_pool_on_swap() {
        let source = Arc::new(MemoryConfigSource::new().with_config(config(&["host1"])));
        let connector = FakeConnector::new();
        connector.set_statement_latency(Duration::from_secs(2));
        let executor = Arc::new(executor(source.clone(), connector.clone()));

        let in_flight = {
            let executor = executor.clone();
            tokio::spawn(async move { executor.query("SELECT * FROM users", &[]).await })
        };
        tokio::time::sleep(Duration::from_millis(100)).await;

        let queued = {
            let executor = executor.clone();
            tokio::spawn(async move {
                let started = tokio::time::Instant::now();
                let result = executor.query("SELECT * FROM users", &[]).await;
                (result, started.elapsed())
            })
        };
        tokio::time::sleep(Duration::from_millis(100)).await;

        source.set(config(&["host2"]));
        executor.reload().await.unwrap();

        let (result, waited) = queued.await.unwrap();
        let rows = result.unwrap();
        assert_eq!(rows[0]["host"], Some(CqlValue::Text("host2".to_string())));
        assert!(waited < Duration::from_secs(5));

        // The statement on the superseded pool lost its connection
        assert!(matches!(
            in_flight.await.unwrap(),
            Err(ExecutorError::Driver(DriverError::Closed))
        ));
    }

    #[tokio::test]
    async fn test_unreachable_host_surfaces_dial_failure() {
        let source = Arc::new(MemoryConfigSource::new().with_config(config(&["host1"])));
        let connector = FakeConnector::new();
        connector.set_unreachable("host1");
        let executor = executor(source, connector);

        let err = executor.query("SELECT * FROM users", &[]).await.unwrap_err();
        assert!(matches!(err, ExecutorError::Pool(PoolError::DialFailed { .. })));
        assert_eq!(executor.host_stats().await[0].unestablished, 1);
    }
}
