//! Error types for the framing, transport, client, pool, and routing layers.
//!
//! Each layer has its own `thiserror` enum so callers can match on the
//! failure class without string inspection. Heterogeneous construction
//! paths (connectors, configuration loading) aggregate through
//! `anyhow::Result` instead.

use std::io;

use thiserror::Error;

use crate::envelope::codes;

/// Failures of the length-prefixed framing codec.
#[derive(Debug, Error)]
pub enum FrameError {
    /// The peer closed the connection at a message boundary.
    #[error("connection closed by peer")]
    Closed,

    /// The stream ended in the middle of a frame.
    #[error("connection closed mid-frame after {read} of {expected} bytes")]
    Truncated { read: usize, expected: usize },

    /// The announced payload length exceeds the configured ceiling.
    /// The body is never read in this case.
    #[error("frame length {len} exceeds maximum {max}")]
    Oversize { len: usize, max: usize },

    /// The underlying stream reported an I/O error.
    #[error("frame I/O failed: {0}")]
    Io(#[from] io::Error),

    /// The abort flag was observed while reading or writing.
    #[error("frame I/O aborted")]
    Aborted,
}

/// Failures of a transport endpoint.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("failed to connect to {addr}: {source}")]
    Connect {
        addr: String,
        #[source]
        source: io::Error,
    },

    #[error("connect to {addr} timed out after {timeout_ms}ms")]
    ConnectTimeout { addr: String, timeout_ms: u64 },

    #[error("invalid transport address `{0}`")]
    InvalidAddress(String),

    /// `send`/`receive` called before `start`.
    #[error("transport not started")]
    NotStarted,

    /// `send`/`receive` called after `stop`.
    #[error("transport stopped")]
    Stopped,

    /// The transport suffered a fatal failure and cannot carry messages.
    #[error("transport failed: {0}")]
    Failed(String),

    /// Zero-length messages are rejected before they reach the codec.
    #[error("refusing to send an empty frame")]
    EmptyPayload,

    /// The operation timed out (pull-mode `receive`).
    #[error("transport operation timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    /// The transport does not offer this operation (e.g. pull-mode
    /// `receive` on a stream-socket transport).
    #[error("operation not supported by this transport")]
    Unsupported,

    #[error(transparent)]
    Frame(#[from] FrameError),
}

/// Outcome of a client request that did not produce a result.
///
/// Every `send_request` call resolves to exactly one of `Ok`,
/// [`ClientError::Protocol`], [`ClientError::Timeout`], or
/// [`ClientError::Transport`].
#[derive(Debug, Error)]
pub enum ClientError {
    /// The backend answered with a JSON-RPC error object.
    #[error("backend returned JSON-RPC error {code}: {message}")]
    Protocol { code: i32, message: String },

    /// No response arrived within the request timeout.
    #[error("request timed out after {elapsed_ms}ms")]
    Timeout { elapsed_ms: u64 },

    /// The connection failed before a response could be delivered.
    #[error("{0}")]
    Transport(String),
}

impl ClientError {
    /// The JSON-RPC error code observable by callers.
    ///
    /// Local timeouts and transport failures both map to `-32000`.
    pub fn code(&self) -> i32 {
        match self {
            ClientError::Protocol { code, .. } => *code,
            ClientError::Timeout { .. } | ClientError::Transport(_) => codes::TRANSPORT_ERROR,
        }
    }
}

/// Failures acquiring a connection from a backend pool.
#[derive(Debug, Error)]
pub enum PoolError {
    /// All connections were busy and none freed up within the wait bound.
    #[error("timed out waiting for a pooled connection after {waited_ms}ms")]
    Timeout { waited_ms: u64 },

    /// The pool could not create a connection to the backend.
    #[error("backend unavailable: {0}")]
    Unavailable(String),
}

/// Failures building a routing table.
#[derive(Debug, Error)]
pub enum RouteError {
    #[error("invalid resource regex `{pattern}` for backend `{backend}`: {source}")]
    InvalidRegex {
        backend: String,
        pattern: String,
        #[source]
        source: regex::Error,
    },
}
