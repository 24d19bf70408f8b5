use core_config::{ConfigError, FromEnv, env_list, env_parse_or, env_required};
use std::collections::hash_map::DefaultHasher;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;
use std::time::Duration;

use crate::common::PoolError;

/// Read/write quorum policy requested per statement.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum ConsistencyLevel {
    Any,
    #[default]
    One,
    Two,
    Three,
    Quorum,
    All,
    LocalQuorum,
    EachQuorum,
    LocalOne,
}

impl ConsistencyLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConsistencyLevel::Any => "ANY",
            ConsistencyLevel::One => "ONE",
            ConsistencyLevel::Two => "TWO",
            ConsistencyLevel::Three => "THREE",
            ConsistencyLevel::Quorum => "QUORUM",
            ConsistencyLevel::All => "ALL",
            ConsistencyLevel::LocalQuorum => "LOCAL_QUORUM",
            ConsistencyLevel::EachQuorum => "EACH_QUORUM",
            ConsistencyLevel::LocalOne => "LOCAL_ONE",
        }
    }
}

impl fmt::Display for ConsistencyLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ConsistencyLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized: String = s
            .trim()
            .chars()
            .filter(|c| *c != '_' && *c != '-')
            .map(|c| c.to_ascii_uppercase())
            .collect();

        match normalized.as_str() {
            "ANY" => Ok(ConsistencyLevel::Any),
            "ONE" => Ok(ConsistencyLevel::One),
            "TWO" => Ok(ConsistencyLevel::Two),
            "THREE" => Ok(ConsistencyLevel::Three),
            "QUORUM" => Ok(ConsistencyLevel::Quorum),
            "ALL" => Ok(ConsistencyLevel::All),
            "LOCALQUORUM" => Ok(ConsistencyLevel::LocalQuorum),
            "EACHQUORUM" => Ok(ConsistencyLevel::EachQuorum),
            "LOCALONE" => Ok(ConsistencyLevel::LocalOne),
            _ => Err(format!("unknown consistency level '{}'", s)),
        }
    }
}

impl From<ConsistencyLevel> for scylla::statement::Consistency {
    fn from(level: ConsistencyLevel) -> Self {
        use scylla::statement::Consistency;

        match level {
            ConsistencyLevel::Any => Consistency::Any,
            ConsistencyLevel::One => Consistency::One,
            ConsistencyLevel::Two => Consistency::Two,
            ConsistencyLevel::Three => Consistency::Three,
            ConsistencyLevel::Quorum => Consistency::Quorum,
            ConsistencyLevel::All => Consistency::All,
            ConsistencyLevel::LocalQuorum => Consistency::LocalQuorum,
            ConsistencyLevel::EachQuorum => Consistency::EachQuorum,
            ConsistencyLevel::LocalOne => Consistency::LocalOne,
        }
    }
}

/// Cluster configuration for one keyspace.
///
/// Immutable once loaded: a configuration change produces a new value, and the
/// executor compares [`fingerprint`](Self::fingerprint)s to decide whether its
/// connection pool must be rebuilt.
///
/// # Example
///
/// ```ignore
/// use cassandra_pool::{ClusterConfig, ConsistencyLevel};
///
/// let config = ClusterConfig::new("accounts", vec!["10.0.0.1", "10.0.0.2"])
///     .with_consistency(ConsistencyLevel::LocalQuorum)
///     .with_connections_per_host(4)
///     .with_credentials("user", "pass");
/// ```
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct ClusterConfig {
    /// Keyspace this configuration belongs to
    pub name: String,

    /// Ordered host list (`host` or `host:port`)
    pub hosts: Vec<String>,

    /// Consistency applied to every statement
    pub consistency: ConsistencyLevel,

    /// Budget for dialing one connection
    pub connect_timeout: Duration,

    /// Budget for one statement on an established connection
    pub request_timeout: Duration,

    /// Maximum live connections per host
    pub connections_per_host: usize,

    /// Optional username for authentication
    pub username: Option<String>,

    /// Optional password for authentication
    pub password: Option<String>,

    /// Optional datacenter for DC-aware policies.
    ///
    /// Carried and fingerprinted but not applied by `ScyllaConnector`: its
    /// sessions are pinned to one node, so host choice belongs to the pool.
    pub local_datacenter: Option<String>,

    /// Enable SSL/TLS
    pub ssl_enabled: bool,
}

impl ClusterConfig {
    /// Port appended to hosts configured without one
    pub const DEFAULT_PORT: u16 = 9042;

    /// Create a configuration with defaults for everything but name and hosts
    pub fn new<S: Into<String>>(name: impl Into<String>, hosts: Vec<S>) -> Self {
        Self {
            name: name.into(),
            hosts: hosts.into_iter().map(|s| s.into()).collect(),
            consistency: ConsistencyLevel::One,
            connect_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(30),
            connections_per_host: 2,
            username: None,
            password: None,
            local_datacenter: None,
            ssl_enabled: false,
        }
    }

    pub fn with_consistency(mut self, consistency: ConsistencyLevel) -> Self {
        self.consistency = consistency;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_connections_per_host(mut self, count: usize) -> Self {
        self.connections_per_host = count;
        self
    }

    pub fn with_credentials(
        mut self,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        self.username = Some(username.into());
        self.password = Some(password.into());
        self
    }

    pub fn with_datacenter(mut self, datacenter: impl Into<String>) -> Self {
        self.local_datacenter = Some(datacenter.into());
        self
    }

    pub fn with_ssl(mut self, enabled: bool) -> Self {
        self.ssl_enabled = enabled;
        self
    }

    /// Content hash over every field.
    ///
    /// Equal configurations hash equally within a process; changing any field
    /// changes the hash.
    pub fn fingerprint(&self) -> u64 {
        let mut hasher = DefaultHasher::new();
        self.hash(&mut hasher);
        hasher.finish()
    }

    /// Dialable `host:port` address for a configured host
    pub fn address_of(host: &str) -> String {
        let has_port = match host.rsplit_once(':') {
            // Bracketed IPv6 with a port, or host:port
            Some((head, port)) => {
                port.parse::<u16>().is_ok() && (!head.contains(':') || head.ends_with(']'))
            }
            None => false,
        };

        if has_port {
            host.to_string()
        } else if host.contains(':') && !host.starts_with('[') {
            format!("[{}]:{}", host, Self::DEFAULT_PORT)
        } else {
            format!("{}:{}", host, Self::DEFAULT_PORT)
        }
    }

    /// Reject configurations that cannot back a pool
    pub fn validate(&self) -> Result<(), PoolError> {
        if self.name.trim().is_empty() {
            return Err(PoolError::InvalidConfig("keyspace name is empty".to_string()));
        }
        if self.hosts.is_empty() {
            return Err(PoolError::InvalidConfig(format!(
                "no hosts configured for keyspace '{}'",
                self.name
            )));
        }
        if self.connections_per_host == 0 {
            return Err(PoolError::InvalidConfig(format!(
                "connections_per_host must be at least 1 for keyspace '{}'",
                self.name
            )));
        }
        Ok(())
    }

    /// Load the configuration of keyspace `name` from environment variables.
    ///
    /// Every `CASSANDRA_<KEY>` variable can be overridden per keyspace with
    /// `CASSANDRA_<NAME>_<KEY>`, where `<NAME>` is the upper-cased keyspace
    /// name with non-alphanumerics replaced by `_`:
    /// - `CONTACT_POINTS` (required) - comma-separated hosts
    /// - `CONSISTENCY` (default: ONE)
    /// - `CONNECT_TIMEOUT_SECS` (default: 10)
    /// - `REQUEST_TIMEOUT_SECS` (default: 30)
    /// - `CONNECTIONS_PER_HOST` (default: 2)
    /// - `USERNAME`, `PASSWORD`, `DATACENTER` (optional)
    /// - `SSL_ENABLED` (default: false)
    pub fn from_env_for(name: &str) -> Result<Self, ConfigError> {
        let scoped = scoped_prefix(name);
        let key = |suffix: &str| -> String {
            let scoped_key = format!("{}{}", scoped, suffix);
            if std::env::var(&scoped_key).is_ok() {
                scoped_key
            } else {
                format!("CASSANDRA_{}", suffix)
            }
        };

        let hosts_key = key("CONTACT_POINTS");
        let hosts = env_list(&hosts_key).ok_or_else(|| ConfigError::MissingEnvVar(hosts_key.clone()))?;
        if hosts.is_empty() {
            return Err(ConfigError::ParseError {
                key: hosts_key,
                details: "No valid contact points provided".to_string(),
            });
        }

        let defaults = ClusterConfig::new(name, Vec::<String>::new());
        let connect_timeout_secs = env_parse_or(&key("CONNECT_TIMEOUT_SECS"), defaults.connect_timeout.as_secs())?;
        let request_timeout_secs = env_parse_or(&key("REQUEST_TIMEOUT_SECS"), defaults.request_timeout.as_secs())?;

        Ok(Self {
            name: name.to_string(),
            hosts,
            consistency: env_parse_or(&key("CONSISTENCY"), defaults.consistency)?,
            connect_timeout: Duration::from_secs(connect_timeout_secs),
            request_timeout: Duration::from_secs(request_timeout_secs),
            connections_per_host: env_parse_or(&key("CONNECTIONS_PER_HOST"), defaults.connections_per_host)?,
            username: std::env::var(key("USERNAME")).ok(),
            password: std::env::var(key("PASSWORD")).ok(),
            local_datacenter: std::env::var(key("DATACENTER")).ok(),
            ssl_enabled: env_parse_or(&key("SSL_ENABLED"), defaults.ssl_enabled)?,
        })
    }
}

fn scoped_prefix(name: &str) -> String {
    let upper: String = name
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_uppercase() } else { '_' })
        .collect();
    format!("CASSANDRA_{}_", upper)
}

/// Load ClusterConfig from environment variables
///
/// Requires `CASSANDRA_KEYSPACE`; every other key is read as in
/// [`ClusterConfig::from_env_for`].
impl FromEnv for ClusterConfig {
    fn from_env() -> Result<Self, ConfigError> {
        let keyspace = env_required("CASSANDRA_KEYSPACE")?;
        Self::from_env_for(&keyspace)
    }
}

impl fmt::Debug for ClusterConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClusterConfig")
            .field("name", &self.name)
            .field("hosts", &self.hosts)
            .field("consistency", &self.consistency)
            .field("connect_timeout", &self.connect_timeout)
            .field("request_timeout", &self.request_timeout)
            .field("connections_per_host", &self.connections_per_host)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("local_datacenter", &self.local_datacenter)
            .field("ssl_enabled", &self.ssl_enabled)
            .finish()
    }
}

impl fmt::Display for ClusterConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} hosts=[{}] consistency={} conns/host={} connect_timeout={:?}",
            self.name,
            self.hosts.join(","),
            self.consistency,
            self.connections_per_host,
            self.connect_timeout
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> ClusterConfig {
        ClusterConfig::new("accounts", vec!["10.0.0.1", "10.0.0.2"])
    }

    #[test]
    fn test_cluster_config_new_defaults() {
        let config = base();
        assert_eq!(config.hosts, vec!["10.0.0.1", "10.0.0.2"]);
        assert_eq!(config.consistency, ConsistencyLevel::One);
        assert_eq!(config.connections_per_host, 2);
        assert!(config.username.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_fingerprint_stable_for_identical_loads() {
        let a = base().with_consistency(ConsistencyLevel::Quorum);
        let b = base().with_consistency(ConsistencyLevel::Quorum);
        assert_eq!(a.fingerprint(), b.fingerprint());
    }

    #[test]
    fn test_fingerprint_changes_with_any_field() {
        let original = base().fingerprint();

        let variants = vec![
            ClusterConfig::new("accounts", vec!["10.0.0.1"]),
            ClusterConfig::new("accounts", vec!["10.0.0.2", "10.0.0.1"]),
            base().with_consistency(ConsistencyLevel::All),
            base().with_connect_timeout(Duration::from_secs(3)),
            base().with_request_timeout(Duration::from_secs(3)),
            base().with_connections_per_host(8),
            base().with_credentials("user", "pass"),
            base().with_datacenter("dc2"),
            base().with_ssl(true),
        ];

        for variant in variants {
            assert_ne!(variant.fingerprint(), original, "unchanged hash for {:?}", variant);
        }
    }

    #[test]
    fn test_validate_rejects_unusable_configs() {
        let no_hosts = ClusterConfig::new("accounts", Vec::<String>::new());
        assert!(matches!(no_hosts.validate(), Err(PoolError::InvalidConfig(_))));

        let no_slots = base().with_connections_per_host(0);
        assert!(matches!(no_slots.validate(), Err(PoolError::InvalidConfig(_))));

        let no_name = ClusterConfig::new(" ", vec!["10.0.0.1"]);
        assert!(no_name.validate().is_err());
    }

    #[test]
    fn test_address_of() {
        assert_eq!(ClusterConfig::address_of("10.0.0.1"), "10.0.0.1:9042");
        assert_eq!(ClusterConfig::address_of("10.0.0.1:19042"), "10.0.0.1:19042");
        assert_eq!(ClusterConfig::address_of("cass-1.internal"), "cass-1.internal:9042");
        assert_eq!(ClusterConfig::address_of("::1"), "[::1]:9042");
        assert_eq!(ClusterConfig::address_of("[::1]:9043"), "[::1]:9043");
    }

    #[test]
    fn test_consistency_parse() {
        assert_eq!("quorum".parse(), Ok(ConsistencyLevel::Quorum));
        assert_eq!("LOCAL_QUORUM".parse(), Ok(ConsistencyLevel::LocalQuorum));
        assert_eq!("local-one".parse(), Ok(ConsistencyLevel::LocalOne));
        assert!("sometimes".parse::<ConsistencyLevel>().is_err());
        assert_eq!(ConsistencyLevel::EachQuorum.to_string(), "EACH_QUORUM");
    }

    #[test]
    fn test_debug_redacts_password() {
        let config = base().with_credentials("user", "hunter2");
        let rendered = format!("{:?}", config);
        assert!(!rendered.contains("hunter2"));
        assert!(rendered.contains("<redacted>"));
    }

    #[test]
    fn test_cluster_config_from_env() {
        temp_env::with_vars(
            [
                ("CASSANDRA_KEYSPACE", Some("accounts")),
                ("CASSANDRA_CONTACT_POINTS", Some("10.0.0.1:9042, 10.0.0.2:9042")),
                ("CASSANDRA_CONSISTENCY", Some("local_quorum")),
                ("CASSANDRA_CONNECTIONS_PER_HOST", Some("4")),
                ("CASSANDRA_ACCOUNTS_CONTACT_POINTS", None),
            ],
            || {
                let config = ClusterConfig::from_env().unwrap();
                assert_eq!(config.name, "accounts");
                assert_eq!(config.hosts.len(), 2);
                assert_eq!(config.consistency, ConsistencyLevel::LocalQuorum);
                assert_eq!(config.connections_per_host, 4);
                assert_eq!(config.connect_timeout, Duration::from_secs(10));
            },
        );
    }

    #[test]
    fn test_cluster_config_scoped_override() {
        temp_env::with_vars(
            [
                ("CASSANDRA_CONTACT_POINTS", Some("10.0.0.1")),
                ("CASSANDRA_BILLING_EVENTS_CONTACT_POINTS", Some("10.9.9.9")),
                ("CASSANDRA_BILLING_EVENTS_CONSISTENCY", Some("ALL")),
            ],
            || {
                let config = ClusterConfig::from_env_for("billing-events").unwrap();
                assert_eq!(config.hosts, vec!["10.9.9.9"]);
                assert_eq!(config.consistency, ConsistencyLevel::All);
            },
        );
    }

    #[test]
    fn test_cluster_config_from_env_missing() {
        temp_env::with_vars(
            [
                ("CASSANDRA_CONTACT_POINTS", None::<&str>),
                ("CASSANDRA_ACCOUNTS_CONTACT_POINTS", None::<&str>),
            ],
            || {
                let err = ClusterConfig::from_env_for("accounts").unwrap_err();
                assert!(matches!(err, ConfigError::MissingEnvVar(_)));
            },
        );
    }

    #[test]
    fn test_cluster_config_from_env_bad_number() {
        temp_env::with_vars(
            [
                ("CASSANDRA_CONTACT_POINTS", Some("10.0.0.1")),
                ("CASSANDRA_CONNECTIONS_PER_HOST", Some("many")),
            ],
            || {
                let err = ClusterConfig::from_env_for("accounts").unwrap_err();
                assert!(matches!(err, ConfigError::ParseError { .. }));
            },
        );
    }
}
