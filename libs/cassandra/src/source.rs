//! Where executors load cluster configuration from.
//!
//! A source notifies subscribers on every configuration write, relevant or
//! not; executors compare fingerprints to filter the noise.

use core_config::ConfigError;
use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};
use tokio::sync::broadcast;
use tracing::debug;

use crate::config::ClusterConfig;

const CHANGE_CHANNEL_CAPACITY: usize = 16;

/// Loads per-keyspace configuration and announces changes.
#[cfg_attr(test, mockall::automock)]
pub trait ConfigSource: Send + Sync {
    /// Current configuration of keyspace `name`
    fn load(&self, name: &str) -> Result<ClusterConfig, ConfigError>;

    /// Receiver that gets a message after every configuration write
    fn subscribe(&self) -> broadcast::Receiver<()>;
}

/// Configuration held in memory, for tests and embedding applications.
pub struct MemoryConfigSource {
    configs: RwLock<HashMap<String, ClusterConfig>>,
    changes: broadcast::Sender<()>,
}

impl MemoryConfigSource {
    pub fn new() -> Self {
        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        Self {
            configs: RwLock::new(HashMap::new()),
            changes,
        }
    }

    /// Seed a configuration without notifying anyone
    pub fn with_config(self, config: ClusterConfig) -> Self {
        self.configs
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(config.name.clone(), config);
        self
    }

    /// Store `config` under its keyspace name and notify subscribers
    pub fn set(&self, config: ClusterConfig) {
        debug!(keyspace = %config.name, "Configuration written");
        self.configs
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(config.name.clone(), config);
        self.notify();
    }

    /// Drop the configuration of `name` and notify subscribers
    pub fn remove(&self, name: &str) -> Option<ClusterConfig> {
        let removed = self
            .configs
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(name);
        self.notify();
        removed
    }

    /// Notify subscribers without changing anything
    pub fn notify(&self) {
        // No receivers yet is fine
        let _ = self.changes.send(());
    }
}

impl Default for MemoryConfigSource {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigSource for MemoryConfigSource {
    fn load(&self, name: &str) -> Result<ClusterConfig, ConfigError> {
        self.configs
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
            .ok_or_else(|| ConfigError::NotFound(name.to_string()))
    }

    fn subscribe(&self) -> broadcast::Receiver<()> {
        self.changes.subscribe()
    }
}

/// Configuration read from `CASSANDRA_*` environment variables.
///
/// See [`ClusterConfig::from_env_for`] for the variables and per-keyspace
/// overrides. The environment has no change feed of its own, so the
/// application calls [`notify`](Self::notify) after changing it.
pub struct EnvConfigSource {
    changes: broadcast::Sender<()>,
}

impl EnvConfigSource {
    pub fn new() -> Self {
        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        Self { changes }
    }

    pub fn notify(&self) {
        let _ = self.changes.send(());
    }
}

impl Default for EnvConfigSource {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigSource for EnvConfigSource {
    fn load(&self, name: &str) -> Result<ClusterConfig, ConfigError> {
        ClusterConfig::from_env_for(name)
    }

    fn subscribe(&self) -> broadcast::Receiver<()> {
        self.changes.subscribe()
    }
}
