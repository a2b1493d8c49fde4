//! # Client Engine
//!
//! One client engine multiplexes concurrent outbound requests over a
//! single transport and correlates responses by id. Issuing a request
//! allocates a monotonically increasing id (starting at 1; id 0 is
//! reserved for the liveness probe), registers a waiter in the pending
//! table, frames and sends the envelope, then blocks on the waiter's
//! signal with a timeout.
//!
//! The transport's reader task drives the other side: every decoded
//! response is matched against the table and its outcome moved into the
//! entry before the waiter is signalled. The reader never removes
//! entries; the waiting side does, whether it was woken by a signal, a
//! timeout, or a transport failure. Responses for unknown ids, ids that
//! already received an outcome, and id 0 are dropped with a warning.
//!
//! On a fatal transport failure every Waiting entry is failed with a
//! transport error in one sweep, so no caller is ever left blocked.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::value::RawValue;
use serde_json::Value;
use tokio::sync::oneshot;
use tracing::{debug, warn};

use crate::config::ClientConfig;
use crate::envelope::{self, codes, METHOD_PING, PROBE_ID};
use crate::error::ClientError;
use crate::pending::{EntryState, PendingError, PendingTable};
use crate::transport::{MessageHandler, Transport, TransportFailure};

static NEXT_ENGINE_ID: AtomicU64 = AtomicU64::new(1);

struct ClientInner {
    engine_id: u64,
    config: ClientConfig,
    transport: Arc<dyn Transport>,
    next_id: AtomicU64,
    table: Arc<Mutex<PendingTable>>,
}

/// A JSON-RPC client engine bound to one transport.
///
/// Cloning is cheap and shares the underlying engine; requests from all
/// clones multiplex over the same connection.
#[derive(Clone)]
pub struct Client {
    inner: Arc<ClientInner>,
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("engine_id", &self.inner.engine_id)
            .finish()
    }
}

/// Demultiplexes transport events into the pending table.
struct Demux {
    engine_id: u64,
    table: Arc<Mutex<PendingTable>>,
}

impl MessageHandler for Demux {
    fn on_message(&self, payload: Vec<u8>) -> Option<Vec<u8>> {
        let response = match envelope::decode_response(&payload) {
            Ok(response) => response,
            Err(e) => {
                warn!(
                    engine = self.engine_id,
                    "dropping undecodable response frame: {e}"
                );
                return None;
            }
        };

        if response.id == PROBE_ID {
            debug!(engine = self.engine_id, "dropping liveness probe echo");
            return None;
        }

        let delivered = {
            let mut table = self.table.lock();
            if let Some(error) = response.error {
                table.fail(
                    response.id,
                    PendingError::Protocol {
                        code: error.code,
                        message: error.message,
                    },
                )
            } else if let Some(result) = response.result {
                table.complete(response.id, result)
            } else {
                warn!(
                    engine = self.engine_id,
                    id = response.id,
                    "response carries neither result nor error"
                );
                return None;
            }
        };

        if !delivered {
            warn!(
                engine = self.engine_id,
                id = response.id,
                "dropping response for unknown or already-settled request"
            );
        }
        None
    }

    fn on_error(&self, failure: TransportFailure) {
        let drained = self
            .table
            .lock()
            .drain_waiting(codes::TRANSPORT_ERROR, "Transport connection error");
        warn!(
            engine = self.engine_id,
            "transport failure {failure:?}: failed {drained} pending request(s)"
        );
    }
}

impl Client {
    /// Start an engine on `transport`: wire the response demultiplexer
    /// into it and, unless disabled, write the id-0 liveness probe to
    /// verify the send path.
    pub async fn start(
        transport: Arc<dyn Transport>,
        config: ClientConfig,
    ) -> Result<Self, ClientError> {
        let engine_id = NEXT_ENGINE_ID.fetch_add(1, Ordering::Relaxed);
        let table = Arc::new(Mutex::new(PendingTable::new()));

        let handler = Arc::new(Demux {
            engine_id,
            table: Arc::clone(&table),
        });
        transport
            .start(handler)
            .await
            .map_err(|e| ClientError::Transport(format!("failed to start transport: {e}")))?;

        let client = Self {
            inner: Arc::new(ClientInner {
                engine_id,
                config,
                transport,
                next_id: AtomicU64::new(1),
                table,
            }),
        };

        if client.inner.config.initial_probe {
            if let Err(e) = client.probe().await {
                client.inner.transport.stop().await;
                return Err(e);
            }
        }
        debug!(engine = engine_id, "client engine started");
        Ok(client)
    }

    /// Identifier of this engine, unique within the process. Used by the
    /// pool layers for log correlation.
    pub fn engine_id(&self) -> u64 {
        self.inner.engine_id
    }

    /// Number of requests currently tracked in the pending table.
    pub fn pending_count(&self) -> usize {
        self.inner.table.lock().len()
    }

    /// Issue a request with the configured timeout.
    pub async fn send_request(
        &self,
        method: &str,
        params: Option<Value>,
    ) -> Result<Box<RawValue>, ClientError> {
        let timeout = Duration::from_millis(self.inner.config.request_timeout_ms);
        self.send_request_timeout(method, params, timeout).await
    }

    /// Issue a request with an explicit timeout override.
    pub async fn send_request_timeout(
        &self,
        method: &str,
        params: Option<Value>,
        timeout: Duration,
    ) -> Result<Box<RawValue>, ClientError> {
        let id = self.inner.next_id.fetch_add(1, Ordering::SeqCst);
        self.issue(id, method, params.as_ref(), timeout).await
    }

    /// Issue a request under a caller-supplied id.
    ///
    /// Used by the gateway forwarder to preserve the requesting client's
    /// id end-to-end. Id 0 is reserved and rejected.
    pub async fn send_raw(
        &self,
        method: &str,
        params: Option<Value>,
        id: u64,
    ) -> Result<Box<RawValue>, ClientError> {
        if id == PROBE_ID {
            return Err(ClientError::Transport(
                "id 0 is reserved for the liveness probe".to_string(),
            ));
        }
        let timeout = Duration::from_millis(self.inner.config.request_timeout_ms);
        self.issue(id, method, params.as_ref(), timeout).await
    }

    /// Write the id-0 `"ping"` probe, verifying the send path.
    ///
    /// No waiter is installed: any echoed response is dropped by the
    /// demultiplexer. Used at engine startup and by the pool's
    /// release-time health check.
    pub async fn probe(&self) -> Result<(), ClientError> {
        let payload = envelope::encode_request(PROBE_ID, METHOD_PING, None)
            .map_err(|e| ClientError::Transport(format!("failed to encode probe: {e}")))?;
        self.inner
            .transport
            .send(&payload)
            .await
            .map_err(|e| ClientError::Transport(format!("probe write failed: {e}")))
    }

    /// Stop the transport and sweep the pending table.
    ///
    /// The sweep drops every remaining signal handle, so callers still
    /// blocked in `send_request` observe their channel closing and
    /// return a transport error; destruction never races a waiter into a
    /// hang.
    pub async fn close(&self) {
        self.inner.transport.stop().await;
        self.inner.table.lock().invalidate_all();
        debug!(engine = self.inner.engine_id, "client engine closed");
    }

    async fn issue(
        &self,
        id: u64,
        method: &str,
        params: Option<&Value>,
        timeout: Duration,
    ) -> Result<Box<RawValue>, ClientError> {
        let payload = envelope::encode_request(id, method, params)
            .map_err(|e| ClientError::Transport(format!("failed to encode request {id}: {e}")))?;

        let (signal, woken) = oneshot::channel();
        self.inner
            .table
            .lock()
            .insert(id, signal)
            .map_err(|e| ClientError::Transport(format!("failed to register request {id}: {e}")))?;

        if let Err(e) = self.inner.transport.send(&payload).await {
            self.inner.table.lock().remove(id);
            return Err(ClientError::Transport(format!(
                "failed to send request {id}: {e}"
            )));
        }

        match tokio::time::timeout(timeout, woken).await {
            // Signalled, or the signal handle was dropped by a sweep;
            // either way the entry state tells the truth.
            Ok(_) => self.conclude(id),
            Err(_) => {
                let mut table = self.inner.table.lock();
                if table.mark_timed_out(id) {
                    table.remove(id);
                    Err(ClientError::Timeout {
                        elapsed_ms: timeout.as_millis() as u64,
                    })
                } else {
                    // The reader settled the entry just as the timer
                    // fired; deliver the outcome rather than discard it.
                    drop(table);
                    self.conclude(id)
                }
            }
        }
    }

    /// Collect the outcome for `id` and remove its entry.
    fn conclude(&self, id: u64) -> Result<Box<RawValue>, ClientError> {
        let removed = self.inner.table.lock().remove(id);
        let entry = match removed {
            Some(entry) => entry,
            None => {
                return Err(ClientError::Transport(
                    "connection closed while waiting for response".to_string(),
                ))
            }
        };
        match entry.state {
            EntryState::Completed => entry.result.ok_or_else(|| {
                ClientError::Transport("completed entry carried no result".to_string())
            }),
            EntryState::Errored => Err(match entry.error {
                Some(PendingError::Protocol { code, message }) => {
                    ClientError::Protocol { code, message }
                }
                Some(PendingError::Transport { code, message }) => {
                    debug!(
                        engine = self.inner.engine_id,
                        id, code, "request failed by transport fan-out"
                    );
                    ClientError::Transport(message)
                }
                None => ClientError::Transport("errored entry carried no error".to_string()),
            }),
            _ => Err(ClientError::Transport(
                "connection closed while waiting for response".to_string(),
            )),
        }
    }
}
