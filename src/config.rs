//! Configuration types for clients, pools, backends, and the gateway.
//!
//! All types deserialize with per-field defaults so embedders can supply
//! sparse TOML. The core owns no files itself; loading from disk is left
//! to the embedding front-end.

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};

use crate::defaults;
use crate::transport::tcp::parse_address;

/// Per-engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// How long a request waits for its response before failing locally.
    pub request_timeout_ms: u64,
    /// Largest accepted frame payload on this connection.
    pub max_frame_size: usize,
    /// Whether the engine writes the id-0 liveness probe at startup.
    pub initial_probe: bool,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            request_timeout_ms: defaults::REQUEST_TIMEOUT_MS,
            max_frame_size: defaults::MAX_FRAME_SIZE,
            initial_probe: true,
        }
    }
}

/// Per-backend pool bounds and timeouts.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Connections created eagerly when the pool comes up.
    pub min_connections: usize,
    /// Hard upper bound on connections, idle and active combined.
    pub max_connections: usize,
    /// Per-connection TCP connect timeout; also bounds how long a
    /// forwarded request waits for a pooled connection.
    pub connect_timeout_ms: u64,
    /// Idle connections older than this are destroyed on checkout scan.
    pub idle_timeout_ms: u64,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            min_connections: defaults::MIN_CONNECTIONS,
            max_connections: defaults::MAX_CONNECTIONS,
            connect_timeout_ms: defaults::CONNECT_TIMEOUT_MS,
            idle_timeout_ms: defaults::IDLE_TIMEOUT_MS,
        }
    }
}

/// One routed backend: where to connect and which requests it serves.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendConfig {
    pub name: String,
    /// `host:port` or `tcp://host:port`.
    pub address: String,
    #[serde(default)]
    pub pool: PoolConfig,
    /// Resource URI prefixes served by this backend, in match order.
    #[serde(default)]
    pub resource_prefixes: Vec<String>,
    /// Resource URI regexes served by this backend, in match order.
    #[serde(default)]
    pub resource_regexes: Vec<String>,
    /// Tool names served by this backend (exact match).
    #[serde(default)]
    pub tool_names: Vec<String>,
}

/// Top-level gateway configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default)]
    pub client: ClientConfig,
    #[serde(default)]
    pub backends: Vec<BackendConfig>,
}

impl GatewayConfig {
    /// Parse a configuration from TOML text.
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: Self = toml::from_str(text).context("failed to parse gateway config")?;
        config.validate()?;
        Ok(config)
    }

    /// Check bounds and addresses without touching the network.
    pub fn validate(&self) -> Result<()> {
        for backend in &self.backends {
            if backend.name.is_empty() {
                bail!("backend with address `{}` has no name", backend.address);
            }
            parse_address(&backend.address)
                .with_context(|| format!("backend `{}`", backend.name))?;
            if backend.pool.max_connections == 0 {
                bail!("backend `{}`: max_connections must be at least 1", backend.name);
            }
            if backend.pool.min_connections > backend.pool.max_connections {
                bail!(
                    "backend `{}`: min_connections {} exceeds max_connections {}",
                    backend.name,
                    backend.pool.min_connections,
                    backend.pool.max_connections
                );
            }
        }
        Ok(())
    }
}
