//! # Backend Connection Pool
//!
//! A per-backend pool of client engines with idle/active accounting,
//! bounded creation, idle expiry, release-time health checking, and a
//! waiter queue for callers that arrive while every connection is
//! checked out.
//!
//! ## Accounting invariant
//!
//! `idle_count + active_count == total_count <= max_connections` holds
//! before and after every checkout, release, and eviction step. A client
//! engine is either exclusively checked out to one caller or sits in
//! exactly one pool's idle list, never both.
//!
//! ## Checkout algorithm
//!
//! `get` scans the idle list newest-first (LIFO, to maximise cache
//! re-use), destroying entries idle past the expiry as it goes. If the
//! list is empty and the pool is below its bound, a slot is reserved by
//! provisionally incrementing `total_count` and the connection is built
//! with the lock released; the reservation is rolled back on failure.
//! Otherwise the caller parks on the pool's waiter queue until a release
//! frees a slot or the wait bound expires.
//!
//! Expensive work (connecting, destroying, the health probe) always runs
//! with the pool mutex dropped.

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;
use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::Notify;
use tracing::{debug, warn};

use crate::client::Client;
use crate::config::{ClientConfig, PoolConfig};
use crate::error::PoolError;
use crate::transport::TcpTransport;

/// Builds a connected, started client engine for a backend address.
///
/// The default [`TcpConnector`] dials TCP; tests and alternative
/// transports plug in their own implementation.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(
        &self,
        address: &str,
        client_config: &ClientConfig,
        connect_timeout: Duration,
    ) -> Result<Client>;
}

/// Connects backends over TCP (`host:port` or `tcp://host:port`).
pub struct TcpConnector;

#[async_trait]
impl Connector for TcpConnector {
    async fn connect(
        &self,
        address: &str,
        client_config: &ClientConfig,
        connect_timeout: Duration,
    ) -> Result<Client> {
        let transport = TcpTransport::connect_with_max_frame(
            address,
            connect_timeout,
            client_config.max_frame_size,
        )
        .await?;
        let client = Client::start(Arc::new(transport), client_config.clone()).await?;
        Ok(client)
    }
}

struct IdleConn {
    client: Client,
    idle_since: Instant,
}

#[derive(Default)]
struct PoolState {
    /// LIFO stack: push and pop at the tail, so the newest release is
    /// served next.
    idle: Vec<IdleConn>,
    active_count: usize,
    total_count: usize,
}

/// Connection pool for one backend address.
pub struct BackendPool {
    address: String,
    config: PoolConfig,
    client_config: ClientConfig,
    max_idle: usize,
    connector: Arc<dyn Connector>,
    state: Mutex<PoolState>,
    available: Notify,
}

enum Checkout {
    Got(Client),
    Evict(Client),
    Create,
    Wait,
}

impl BackendPool {
    /// Create a pool and pre-warm it with `min_connections` connections.
    ///
    /// Pre-warm failures are logged and tolerated; the pool comes up
    /// with fewer idle entries and creates the rest on demand.
    pub async fn new(
        address: String,
        config: PoolConfig,
        client_config: ClientConfig,
        connector: Arc<dyn Connector>,
    ) -> Arc<Self> {
        let max_idle = (config.max_connections / 2).max(1);
        let pool = Arc::new(Self {
            address,
            config,
            client_config,
            max_idle,
            connector,
            state: Mutex::new(PoolState::default()),
            available: Notify::new(),
        });
        pool.prewarm().await;
        pool
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    /// Snapshot of `(idle, active, total)` counters.
    pub fn counts(&self) -> (usize, usize, usize) {
        let state = self.state.lock();
        (state.idle.len(), state.active_count, state.total_count)
    }

    async fn prewarm(&self) {
        let target = self.config.min_connections.min(self.config.max_connections);
        for _ in 0..target {
            {
                let mut state = self.state.lock();
                if state.total_count >= self.config.max_connections {
                    break;
                }
                state.total_count += 1;
            }
            match self.connect_new().await {
                Ok(client) => {
                    debug!(
                        backend = %self.address,
                        engine = client.engine_id(),
                        "pre-warmed pool connection"
                    );
                    let mut state = self.state.lock();
                    state.idle.push(IdleConn {
                        client,
                        idle_since: Instant::now(),
                    });
                }
                Err(e) => {
                    self.state.lock().total_count -= 1;
                    warn!(
                        backend = %self.address,
                        "pre-warm connection failed, continuing with fewer idle entries: {e}"
                    );
                }
            }
        }
    }

    async fn connect_new(&self) -> Result<Client> {
        self.connector
            .connect(
                &self.address,
                &self.client_config,
                Duration::from_millis(self.config.connect_timeout_ms),
            )
            .await
    }

    /// Check a client engine out of the pool.
    ///
    /// Returns [`PoolError::Timeout`] if no connection frees up within
    /// `wait_timeout`, and [`PoolError::Unavailable`] if a fresh
    /// connection had to be created and the backend refused it.
    pub async fn get(&self, wait_timeout: Duration) -> Result<Client, PoolError> {
        let idle_timeout = Duration::from_millis(self.config.idle_timeout_ms);
        let deadline = tokio::time::Instant::now() + wait_timeout;

        loop {
            let next = {
                let mut state = self.state.lock();
                if let Some(entry) = state.idle.pop() {
                    if entry.idle_since.elapsed() > idle_timeout {
                        state.total_count -= 1;
                        Checkout::Evict(entry.client)
                    } else {
                        state.active_count += 1;
                        Checkout::Got(entry.client)
                    }
                } else if state.total_count < self.config.max_connections {
                    state.total_count += 1;
                    Checkout::Create
                } else {
                    Checkout::Wait
                }
            };

            match next {
                Checkout::Got(client) => {
                    debug!(
                        backend = %self.address,
                        engine = client.engine_id(),
                        "checked out idle connection"
                    );
                    return Ok(client);
                }
                Checkout::Evict(client) => {
                    debug!(
                        backend = %self.address,
                        engine = client.engine_id(),
                        "evicting expired idle connection"
                    );
                    client.close().await;
                    // Re-scan: more idle entries may remain.
                }
                Checkout::Create => match self.connect_new().await {
                    Ok(client) => {
                        self.state.lock().active_count += 1;
                        debug!(
                            backend = %self.address,
                            engine = client.engine_id(),
                            "created pool connection on demand"
                        );
                        return Ok(client);
                    }
                    Err(e) => {
                        self.state.lock().total_count -= 1;
                        // The reserved slot reopened; let a waiter retry.
                        self.available.notify_one();
                        return Err(PoolError::Unavailable(e.to_string()));
                    }
                },
                Checkout::Wait => {
                    let notified = self.available.notified();
                    tokio::pin!(notified);
                    if tokio::time::timeout_at(deadline, notified).await.is_err() {
                        return Err(PoolError::Timeout {
                            waited_ms: wait_timeout.as_millis() as u64,
                        });
                    }
                }
            }
        }
    }

    /// Return a checked-out client to the pool.
    ///
    /// When the pool is warm (other idle entries exist, or it is running
    /// at 80% or more of its bound) the connection's health is verified
    /// with a ping round-trip before it is parked; unhealthy or surplus
    /// connections are destroyed instead. Every path that frees a slot
    /// wakes one waiter.
    pub async fn release(&self, client: Client) {
        let needs_probe = {
            let state = self.state.lock();
            !state.idle.is_empty()
                || state.total_count * 10 >= self.config.max_connections * 8
        };

        // Health check runs with the pool mutex dropped.
        let healthy = if needs_probe {
            client.probe().await.is_ok()
        } else {
            true
        };

        let mut state = self.state.lock();
        if !healthy || state.idle.len() >= self.max_idle {
            state.active_count -= 1;
            state.total_count -= 1;
            drop(state);
            if !healthy {
                warn!(
                    backend = %self.address,
                    engine = client.engine_id(),
                    "destroying unhealthy connection on release"
                );
            } else {
                debug!(
                    backend = %self.address,
                    engine = client.engine_id(),
                    "destroying surplus idle connection on release"
                );
            }
            client.close().await;
            self.available.notify_one();
        } else {
            debug!(
                backend = %self.address,
                engine = client.engine_id(),
                "parking released connection"
            );
            state.idle.push(IdleConn {
                client,
                idle_since: Instant::now(),
            });
            state.active_count -= 1;
            drop(state);
            self.available.notify_one();
        }
    }

    /// Destroy every idle connection.
    ///
    /// Callers must have returned all active connections first; the pool
    /// manager only tears pools down during its own shutdown.
    pub async fn shutdown(&self) {
        let idle = {
            let mut state = self.state.lock();
            state.total_count -= state.idle.len();
            std::mem::take(&mut state.idle)
        };
        for entry in idle {
            entry.client.close().await;
        }
        debug!(backend = %self.address, "pool shut down");
    }
}
