//! # MCP Gateway Runtime
//!
//! An asynchronous runtime for the client and gateway sides of the MCP
//! JSON-RPC 2.0 protocol, transported over length-prefixed byte streams.
//! This library provides the request/response correlation engine together
//! with its framing, transport, pooling, routing, and forwarding layers.
//!
//! ## Layering
//!
//! ```text
//! ┌──────────────┐   ┌──────────────┐   ┌──────────────┐
//! │   Gateway    │──▶│   Router /   │──▶│ PoolManager /│
//! │   (facade)   │   │  Forwarder   │   │ BackendPool  │
//! └──────────────┘   └──────────────┘   └──────┬───────┘
//!                                              │ checks out
//!                                       ┌──────▼───────┐
//!                                       │    Client    │  request ids,
//!                                       │   (engine)   │  pending table
//!                                       └──────┬───────┘
//!                                       ┌──────▼───────┐
//!                                       │  Transport   │  framed byte
//!                                       │ (TCP, stdio) │  streams
//!                                       └──────────────┘
//! ```
//!
//! A [`Client`] multiplexes concurrent requests over one connection and
//! correlates responses by id. A [`BackendPool`] keeps per-backend sets of
//! clients with idle eviction, health checking, and bounded waiting. The
//! [`Gateway`] parses incoming requests, routes them to a backend, and
//! forwards them over a pooled client.

pub mod client;
pub mod config;
pub mod envelope;
pub mod error;
pub mod forward;
pub mod framing;
pub mod gateway;
pub mod logging;
pub mod manager;
mod pending;
pub mod pool;
pub mod routing;
pub mod transport;

pub use client::Client;
pub use config::{BackendConfig, ClientConfig, GatewayConfig, PoolConfig};
pub use error::{ClientError, FrameError, PoolError, RouteError, TransportError};
pub use gateway::Gateway;
pub use manager::PoolManager;
pub use pool::{BackendPool, Connector, TcpConnector};
pub use routing::Router;
pub use transport::{MessageHandler, Transport, TransportFailure, TransportState};

/// The current version of the gateway runtime
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default configuration values
pub mod defaults {
    /// Maximum accepted frame payload size in bytes
    pub const MAX_FRAME_SIZE: usize = 1024 * 1024;

    /// Default per-request timeout
    pub const REQUEST_TIMEOUT_MS: u64 = 30_000;

    /// Default backend connect timeout
    pub const CONNECT_TIMEOUT_MS: u64 = 5_000;

    /// Default idle-connection expiry
    pub const IDLE_TIMEOUT_MS: u64 = 60_000;

    /// Default number of connections a pool is pre-warmed with
    pub const MIN_CONNECTIONS: usize = 1;

    /// Default upper bound on connections per backend pool
    pub const MAX_CONNECTIONS: usize = 5;

    /// Initial capacity of the pending-request table (power of two)
    pub const INITIAL_TABLE_CAPACITY: usize = 16;
}
