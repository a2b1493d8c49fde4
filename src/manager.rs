//! Pool manager: lazily creates and owns one [`BackendPool`] per backend
//! address.
//!
//! The manager mutex only ever covers map lookups and inserts. Pool
//! construction pre-warms connections, which is I/O, so it runs with the
//! lock released; when two callers race to create the same pool, the
//! loser's freshly built pool is torn down and the winner's is shared.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::debug;

use crate::client::Client;
use crate::config::{BackendConfig, ClientConfig};
use crate::error::PoolError;
use crate::pool::{BackendPool, Connector, TcpConnector};

/// Owns the `address -> pool` map for all configured backends.
pub struct PoolManager {
    client_config: ClientConfig,
    connector: Arc<dyn Connector>,
    pools: Mutex<HashMap<String, Arc<BackendPool>>>,
}

impl PoolManager {
    /// Manager dialing backends over TCP.
    pub fn new(client_config: ClientConfig) -> Self {
        Self::with_connector(client_config, Arc::new(TcpConnector))
    }

    /// Manager with a custom connector (tests, non-TCP transports).
    pub fn with_connector(client_config: ClientConfig, connector: Arc<dyn Connector>) -> Self {
        Self {
            client_config,
            connector,
            pools: Mutex::new(HashMap::new()),
        }
    }

    /// Look up the pool for `backend`, creating and pre-warming it on
    /// first use.
    pub async fn get_or_create_pool(&self, backend: &BackendConfig) -> Arc<BackendPool> {
        if let Some(pool) = self.pools.lock().get(&backend.address) {
            return Arc::clone(pool);
        }

        // Pre-warm does I/O; build the pool with the map lock released.
        let fresh = BackendPool::new(
            backend.address.clone(),
            backend.pool.clone(),
            self.client_config.clone(),
            Arc::clone(&self.connector),
        )
        .await;

        let mut loser = None;
        let pool = {
            let mut pools = self.pools.lock();
            match pools.entry(backend.address.clone()) {
                Entry::Occupied(entry) => {
                    loser = Some(fresh);
                    Arc::clone(entry.get())
                }
                Entry::Vacant(slot) => Arc::clone(slot.insert(fresh)),
            }
        };
        if let Some(loser) = loser {
            debug!(backend = %backend.address, "lost pool creation race, discarding duplicate");
            loser.shutdown().await;
        }
        pool
    }

    /// Check a connection out of the backend's pool, waiting up to
    /// `wait_timeout` for one to free up.
    pub async fn get_connection(
        &self,
        backend: &BackendConfig,
        wait_timeout: Duration,
    ) -> Result<Client, PoolError> {
        self.get_or_create_pool(backend).await.get(wait_timeout).await
    }

    /// Return a connection to its backend's pool.
    ///
    /// If the backend has been reconfigured away in the meantime, the
    /// client is destroyed directly.
    pub async fn release_connection(&self, address: &str, client: Client) {
        let pool = self.pools.lock().get(address).map(Arc::clone);
        match pool {
            Some(pool) => pool.release(client).await,
            None => {
                debug!(backend = %address, "backend no longer pooled; closing connection");
                client.close().await;
            }
        }
    }

    /// Tear down every pool.
    pub async fn shutdown(&self) {
        let pools: Vec<Arc<BackendPool>> = {
            let mut map = self.pools.lock();
            map.drain().map(|(_, pool)| pool).collect()
        };
        for pool in pools {
            pool.shutdown().await;
        }
    }
}
