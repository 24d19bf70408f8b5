//! Bounded per-host connection pool.
//!
//! A [`ConnectionPool`] is built from one [`ClusterConfig`] and never changes
//! its host set. Each host owns a [`ConnectionSlot`] sized to
//! `connections_per_host`; connections are dialed lazily the first time a
//! checkout finds free capacity instead of a ready connection.

use observability::{OperationTimer, PoolMetrics, operation};
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tracing::{debug, error, trace, warn};

use crate::common::{DriverError, PoolError, PoolResult};
use crate::config::ClusterConfig;
use crate::driver::{Connection, Connector};
use crate::selector::{HostResponse, HostSelector, SelectorSettings};
use crate::slot::{Acquired, ConnectionSlot, ReservedToken, SlotCounts};

/// Pool tuning that is not part of the cluster configuration.
#[derive(Debug, Clone)]
pub struct PoolSettings {
    /// How long a checkout waits for a connection or free capacity
    pub checkout_timeout: Duration,

    pub selector: SelectorSettings,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            checkout_timeout: Duration::from_secs(5),
            selector: SelectorSettings::default(),
        }
    }
}

impl PoolSettings {
    pub fn with_checkout_timeout(mut self, timeout: Duration) -> Self {
        self.checkout_timeout = timeout;
        self
    }

    pub fn with_selector(mut self, selector: SelectorSettings) -> Self {
        self.selector = selector;
        self
    }
}

/// A checked out connection, or the reason there is none.
///
/// Should be handed back through [`ConnectionPool::checkin`] so the host
/// selector learns the outcome. A handle dropped without a checkin, for
/// example by a cancelled caller, still returns its connection to the slot
/// it came from.
#[must_use = "a checkout must be paired with ConnectionPool::checkin"]
pub struct CheckoutHandle {
    connection: Option<Arc<dyn Connection>>,
    slot: Option<Arc<ConnectionSlot>>,
    response: HostResponse,
    failure: Option<PoolError>,
}

impl CheckoutHandle {
    pub fn host(&self) -> &str {
        self.response.host()
    }

    pub fn connection(&self) -> Option<&Arc<dyn Connection>> {
        self.connection.as_ref()
    }

    /// Why no connection was handed out
    pub fn failure(&self) -> Option<&PoolError> {
        self.failure.as_ref()
    }

    /// The connection, or the checkout failure as an error
    pub fn result(&self) -> PoolResult<Arc<dyn Connection>> {
        match (&self.connection, &self.failure) {
            (Some(conn), _) => Ok(conn.clone()),
            (None, Some(err)) => Err(err.clone()),
            (None, None) => Err(PoolError::NoConnectionAvailable {
                host: self.host().to_string(),
                waited: Duration::ZERO,
            }),
        }
    }
}

impl Drop for CheckoutHandle {
    fn drop(&mut self) {
        let (Some(conn), Some(slot)) = (self.connection.take(), self.slot.take()) else {
            return;
        };
        if slot.is_closed() {
            conn.close();
            return;
        }
        debug!(host = %self.response.host(), "Checkout dropped without checkin; returning connection");
        slot.put_established(conn);
    }
}

impl fmt::Debug for CheckoutHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CheckoutHandle")
            .field("host", &self.host())
            .field("connected", &self.connection.is_some())
            .field("failure", &self.failure)
            .finish()
    }
}

/// Per-host queue counts, for health reporting
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostStats {
    pub host: String,
    pub established: usize,
    pub unestablished: usize,
    pub capacity: usize,
}

struct Tracked {
    closed: bool,
    connections: Vec<Arc<dyn Connection>>,
}

pub struct ConnectionPool {
    config: Arc<ClusterConfig>,
    connector: Arc<dyn Connector>,
    settings: PoolSettings,
    selector: HostSelector,
    slots: HashMap<String, Arc<ConnectionSlot>>,
    closed: AtomicBool,
    tracked: Mutex<Tracked>,
}

impl ConnectionPool {
    /// Build a pool for `config`. No connection is dialed until the first
    /// checkout.
    pub fn new(
        config: Arc<ClusterConfig>,
        connector: Arc<dyn Connector>,
        settings: PoolSettings,
    ) -> PoolResult<Self> {
        config.validate()?;

        let mut hosts = Vec::with_capacity(config.hosts.len());
        let mut slots = HashMap::with_capacity(config.hosts.len());
        for host in &config.hosts {
            if slots.contains_key(host) {
                warn!(keyspace = %config.name, host = %host, "Ignoring duplicate host");
                continue;
            }
            slots.insert(host.clone(), Arc::new(ConnectionSlot::new(config.connections_per_host)));
            hosts.push(host.clone());
        }

        debug!(
            keyspace = %config.name,
            hosts = hosts.len(),
            connections_per_host = config.connections_per_host,
            "Built connection pool"
        );

        Ok(Self {
            selector: HostSelector::new(hosts, settings.selector.clone()),
            config,
            connector,
            settings,
            slots,
            closed: AtomicBool::new(false),
            tracked: Mutex::new(Tracked {
                closed: false,
                connections: Vec::new(),
            }),
        })
    }

    pub fn config(&self) -> &ClusterConfig {
        &self.config
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Check out a connection to the host the selector picks.
    ///
    /// Never fails hard: exhaustion, dial failures and a closed pool all
    /// produce a handle without a connection.
    pub async fn checkout(&self) -> CheckoutHandle {
        let keyspace = self.config.name.as_str();
        let timer = OperationTimer::start(keyspace, operation::CHECKOUT);
        let response = self.selector.pick();

        let outcome = self.acquire(response.host()).await;
        timer.finish(outcome.is_ok());

        match outcome {
            Ok(conn) => CheckoutHandle {
                connection: Some(conn),
                slot: self.slots.get(response.host()).cloned(),
                response,
                failure: None,
            },
            Err(err) => CheckoutHandle {
                connection: None,
                slot: None,
                response,
                failure: Some(err),
            },
        }
    }

    async fn acquire(&self, host: &str) -> PoolResult<Arc<dyn Connection>> {
        if self.is_closed() {
            return Err(PoolError::PoolClosed);
        }

        let keyspace = self.config.name.as_str();
        let slot = self.slot(host)?;

        let acquired = match slot.try_take_established() {
            Some(conn) => Acquired::Established(conn),
            None => match slot.acquire(self.settings.checkout_timeout).await {
                Some(acquired) => acquired,
                None if self.is_closed() => {
                    debug!(keyspace = %keyspace, host = %host, "Pool closed while waiting for a connection");
                    return Err(PoolError::PoolClosed);
                }
                None => {
                    warn!(
                        keyspace = %keyspace,
                        host = %host,
                        waited = ?self.settings.checkout_timeout,
                        "Timed out waiting for a connection"
                    );
                    PoolMetrics::record_checkout_timeout(keyspace, host);
                    return Err(PoolError::NoConnectionAvailable {
                        host: host.to_string(),
                        waited: self.settings.checkout_timeout,
                    });
                }
            },
        };

        match acquired {
            Acquired::Established(conn) if !conn.is_closed() => {
                trace!(keyspace = %keyspace, host = %host, "Reusing established connection");
                PoolMetrics::record_checkout_source(keyspace, true);
                Ok(conn)
            }
            Acquired::Established(stale) => {
                debug!(keyspace = %keyspace, host = %host, "Replacing closed connection");
                self.untrack(&stale);
                self.dial(slot.reserved(), host).await
            }
            Acquired::Token => self.dial(slot.reserved(), host).await,
        }
    }

    /// Dial a connection for capacity taken out of a slot.
    ///
    /// The capacity goes back as a token unless the dial succeeds on an
    /// open pool, including when this future is dropped mid-dial.
    async fn dial(&self, token: ReservedToken<'_>, host: &str) -> PoolResult<Arc<dyn Connection>> {
        let keyspace = self.config.name.as_str();
        let timer = OperationTimer::start(keyspace, operation::DIAL);
        let connect_timeout = self.config.connect_timeout;

        let dialed = tokio::time::timeout(connect_timeout, self.connector.dial(host, &self.config))
            .await
            .unwrap_or_else(|_| Err(DriverError::Timeout(connect_timeout)));

        let conn = match dialed {
            Ok(conn) => conn,
            Err(e) => {
                timer.finish(false);
                error!(keyspace = %keyspace, host = %host, error = %e, "Failed to dial connection");
                return Err(PoolError::DialFailed {
                    host: host.to_string(),
                    reason: e.to_string(),
                });
            }
        };
        timer.finish(true);

        let mut tracked = self.lock_tracked();
        if tracked.closed {
            drop(tracked);
            conn.close();
            return Err(PoolError::PoolClosed);
        }
        tracked.connections.push(conn.clone());
        let size = tracked.connections.len();
        drop(tracked);
        token.commit();

        debug!(keyspace = %keyspace, host = %host, size, "Dialed new connection");
        PoolMetrics::record_checkout_source(keyspace, false);
        PoolMetrics::set_connections(keyspace, size);
        Ok(conn)
    }

    /// Return a checkout and report its outcome to the host selector.
    ///
    /// `error` is the outcome of the operation run on the connection; a
    /// handle without a connection reports its own checkout failure. On a
    /// pool that was closed after the checkout the connection is closed and
    /// dropped and [`PoolError::PoolClosed`] is returned.
    pub fn checkin(&self, mut handle: CheckoutHandle, error: Option<&dyn fmt::Display>) -> PoolResult<()> {
        let timer = OperationTimer::start(&self.config.name, operation::CHECKIN);
        let connection = handle.connection.take();
        let host = handle.response.host();

        let outcome = error.or(handle.failure.as_ref().map(|e| e as &dyn fmt::Display));
        self.selector.report(&handle.response, outcome);

        let Some(conn) = connection else {
            timer.finish(true);
            return Ok(());
        };

        if self.is_closed() {
            debug!(
                keyspace = %self.config.name,
                host = %host,
                "Checkin against closed pool; discarding connection"
            );
            conn.close();
            timer.finish(false);
            return Err(PoolError::PoolClosed);
        }

        trace!(keyspace = %self.config.name, host = %host, "Checked in connection");
        self.slot(host)?.put_established(conn);
        timer.finish(true);
        Ok(())
    }

    /// Number of dialed connections not yet closed by [`close`](Self::close)
    pub fn size(&self) -> usize {
        self.lock_tracked().connections.len()
    }

    /// Close every tracked connection and wake every waiting checkout.
    ///
    /// Waiting checkouts fail with [`PoolError::PoolClosed`]; the queues are
    /// otherwise left as they are since a closed pool is discarded as a whole.
    pub fn close(&self) {
        let mut tracked = self.lock_tracked();
        tracked.closed = true;
        self.closed.store(true, Ordering::Release);
        let connections = std::mem::take(&mut tracked.connections);
        drop(tracked);

        for slot in self.slots.values() {
            slot.close();
        }

        for conn in &connections {
            conn.close();
        }

        if !connections.is_empty() {
            debug!(
                keyspace = %self.config.name,
                closed = connections.len(),
                "Closed connection pool"
            );
        }
    }

    pub fn host_stats(&self) -> Vec<HostStats> {
        self.selector
            .hosts()
            .iter()
            .filter_map(|host| {
                let slot = self.slots.get(host)?;
                let SlotCounts {
                    established,
                    unestablished,
                } = slot.counts();
                Some(HostStats {
                    host: host.clone(),
                    established,
                    unestablished,
                    capacity: slot.capacity(),
                })
            })
            .collect()
    }

    fn slot(&self, host: &str) -> PoolResult<&ConnectionSlot> {
        self.slots
            .get(host)
            .map(|slot| slot.as_ref())
            .ok_or_else(|| PoolError::InvalidConfig(format!("host '{}' is not part of this pool", host)))
    }

    fn untrack(&self, conn: &Arc<dyn Connection>) {
        let mut tracked = self.lock_tracked();
        tracked.connections.retain(|c| !Arc::ptr_eq(c, conn));
    }

    fn lock_tracked(&self) -> MutexGuard<'_, Tracked> {
        self.tracked.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl fmt::Debug for ConnectionPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionPool")
            .field("keyspace", &self.config.name)
            .field("hosts", &self.selector.hosts())
            .field("size", &self.size())
            .field("closed", &self.is_closed())
            .finish()
    }
}
