use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use tracing::{debug, info};

use crate::driver::Connector;
use crate::executor::{Executor, ExecutorSettings};
use crate::source::ConfigSource;

/// One [`Executor`] per keyspace, created on first use and shared after.
///
/// Build one at process start and hand it to whatever needs a keyspace;
/// entries live until [`shutdown_all`](Self::shutdown_all).
///
/// # Example
/// ```ignore
/// use cassandra_pool::{EnvConfigSource, ExecutorRegistry, ScyllaConnector};
/// use std::sync::Arc;
///
/// let registry = ExecutorRegistry::new(
///     Arc::new(EnvConfigSource::new()),
///     Arc::new(ScyllaConnector::new()),
/// );
/// let rows = registry.get("accounts").query("SELECT * FROM users", &[]).await?;
/// ```
pub struct ExecutorRegistry {
    source: Arc<dyn ConfigSource>,
    connector: Arc<dyn Connector>,
    settings: ExecutorSettings,
    executors: RwLock<HashMap<String, Arc<Executor>>>,
}

impl ExecutorRegistry {
    pub fn new(source: Arc<dyn ConfigSource>, connector: Arc<dyn Connector>) -> Self {
        Self::with_settings(source, connector, ExecutorSettings::default())
    }

    /// Registry whose executors all use `settings`
    pub fn with_settings(
        source: Arc<dyn ConfigSource>,
        connector: Arc<dyn Connector>,
        settings: ExecutorSettings,
    ) -> Self {
        Self {
            source,
            connector,
            settings,
            executors: RwLock::new(HashMap::new()),
        }
    }

    /// Executor for keyspace `name`, creating it on first request.
    ///
    /// Creation does no I/O; the executor loads its configuration on the
    /// first statement.
    pub fn get(&self, name: &str) -> Arc<Executor> {
        if let Some(executor) = self
            .executors
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
        {
            return executor.clone();
        }

        let mut executors = self.executors.write().unwrap_or_else(PoisonError::into_inner);
        // Another caller may have registered it while we waited for the lock
        executors
            .entry(name.to_string())
            .or_insert_with(|| {
                debug!(keyspace = %name, "Registering executor");
                Arc::new(Executor::with_settings(
                    name,
                    self.source.clone(),
                    self.connector.clone(),
                    self.settings.clone(),
                ))
            })
            .clone()
    }

    /// Names of every registered keyspace, sorted
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .executors
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.executors
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Shut down and forget every executor.
    pub async fn shutdown_all(&self) {
        let executors: Vec<Arc<Executor>> = self
            .executors
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .drain()
            .map(|(_, executor)| executor)
            .collect();

        for executor in &executors {
            executor.shutdown().await;
        }
        info!(count = executors.len(), "Shut down all executors");
    }
}
