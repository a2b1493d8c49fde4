//! Gateway facade: parse an incoming request, route it to a backend,
//! forward it over a pooled connection, and hand back the response
//! bytes. Glue only; all semantics live in the router, the pools, and
//! the forwarder.

use std::sync::Arc;

use anyhow::Result;
use tracing::warn;

use crate::config::{BackendConfig, GatewayConfig};
use crate::envelope::{self, codes};
use crate::forward::{error_response, forward};
use crate::manager::PoolManager;
use crate::pool::Connector;
use crate::routing::Router;

/// A running gateway: routing table plus per-backend connection pools.
pub struct Gateway {
    backends: Vec<BackendConfig>,
    router: Router,
    manager: PoolManager,
}

impl Gateway {
    /// Build a gateway that dials backends over TCP.
    pub fn new(config: GatewayConfig) -> Result<Self> {
        let manager = PoolManager::new(config.client.clone());
        Self::with_manager(config, manager)
    }

    /// Build a gateway with a custom connector (tests, non-TCP
    /// transports).
    pub fn with_connector(config: GatewayConfig, connector: Arc<dyn Connector>) -> Result<Self> {
        let manager = PoolManager::with_connector(config.client.clone(), connector);
        Self::with_manager(config, manager)
    }

    fn with_manager(config: GatewayConfig, manager: PoolManager) -> Result<Self> {
        config.validate()?;
        let router = Router::new(&config.backends)?;
        Ok(Self {
            backends: config.backends,
            router,
            manager,
        })
    }

    /// Handle one raw request payload, returning the response payload.
    ///
    /// Unparseable requests yield a `-32700` response (with id 0, since
    /// no id could be recovered); requests no backend serves yield
    /// `-32601`.
    pub async fn handle(&self, raw: &[u8]) -> Vec<u8> {
        let request = match envelope::decode_request(raw) {
            Ok(request) => request,
            Err(e) => {
                warn!("rejecting unparseable request: {e}");
                return error_response(0, codes::PARSE_ERROR, "Failed to parse request");
            }
        };

        match self.router.route_request(&request) {
            Some(index) => forward(&self.manager, &self.backends[index], &request).await,
            None => {
                warn!(method = %request.method, id = request.id, "no backend serves request");
                error_response(
                    request.id,
                    codes::METHOD_NOT_FOUND,
                    &format!("No backend available for method '{}'", request.method),
                )
            }
        }
    }

    /// The pool manager backing this gateway.
    pub fn manager(&self) -> &PoolManager {
        &self.manager
    }

    /// Tear down every backend pool.
    pub async fn shutdown(&self) {
        self.manager.shutdown().await;
    }
}
