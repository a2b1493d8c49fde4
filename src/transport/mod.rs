//! # Transport Abstraction
//!
//! A transport is a polymorphic byte-stream endpoint carrying framed
//! messages. Implementations own their reader task: once started, decoded
//! messages are pushed into a [`MessageHandler`] on the transport's own
//! task, and a fatal failure is reported through the same handler at most
//! once. The handler is a capability object; implementations never see
//! raw callback pointers or user data.
//!
//! ## Lifecycle
//!
//! ```text
//! Created ──start──▶ Started ──stop──▶ Stopping ──▶ Stopped
//! ```
//!
//! - `start` is idempotent: a second call on a Started transport is a
//!   no-op returning `Ok`.
//! - `send` fails in every state except Started.
//! - `stop` is idempotent; after it returns, no callback fires.
//! - A fatal reader error leaves the transport in Started with a failure
//!   latch set; subsequent sends fail and `stop` still cleans up.
//!
//! Sends are serialised internally (one logical message at a time) so
//! concurrent callers cannot interleave frames.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::defaults;
use crate::error::TransportError;

pub mod stdio;
pub mod tcp;

pub use stdio::StdioTransport;
pub use tcp::TcpTransport;

/// Lifecycle state of a transport instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportState {
    Created,
    Started,
    Stopping,
    Stopped,
}

/// Classification of a fatal transport failure, passed to
/// [`MessageHandler::on_error`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportFailure {
    /// The peer reset the connection.
    ConnectionReset,
    /// The peer closed the connection while the transport was running.
    ConnectionClosed,
    /// The byte stream violated the framing protocol (oversize or
    /// truncated frame).
    ProtocolViolation,
    /// Any other I/O failure.
    Io,
}

/// Receiver of transport events.
///
/// Both callbacks run on the transport's internal reader task and must
/// not block beyond short lock hold times.
pub trait MessageHandler: Send + Sync {
    /// Called for every decoded message. A returned buffer is framed and
    /// sent back on the same transport immediately.
    fn on_message(&self, payload: Vec<u8>) -> Option<Vec<u8>>;

    /// Called at most once per fatal transport failure.
    fn on_error(&self, failure: TransportFailure);
}

/// A uniform byte-stream endpoint carrying framed messages.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Start the internal reader task, delivering events to `handler`.
    async fn start(&self, handler: Arc<dyn MessageHandler>) -> Result<(), TransportError>;

    /// Stop the transport: unblock and join the reader, close the
    /// underlying stream. Idempotent.
    async fn stop(&self);

    /// Frame and write one logical message.
    async fn send(&self, payload: &[u8]) -> Result<(), TransportError>;

    /// Pull one message off the stream (stdio-like transports only).
    ///
    /// Stream-socket transports push through the handler instead and
    /// return [`TransportError::Unsupported`].
    async fn receive(&self, timeout: Duration) -> Result<Vec<u8>, TransportError> {
        let _ = timeout;
        Err(TransportError::Unsupported)
    }

    /// Current lifecycle state.
    fn state(&self) -> TransportState;

    /// Human-readable transport name for logs.
    fn name(&self) -> &'static str;

    /// Largest frame payload this transport will accept.
    fn max_frame_size(&self) -> usize {
        defaults::MAX_FRAME_SIZE
    }
}
