//! TCP byte-stream transport.
//!
//! Push model only: a reader task owned by the transport decodes frames
//! and hands them to the [`MessageHandler`]. The socket is tuned for low
//! latency (`TCP_NODELAY`) at connect time.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

use super::{MessageHandler, Transport, TransportFailure, TransportState};
use crate::defaults;
use crate::error::{FrameError, TransportError};
use crate::framing::{read_frame, write_frame, AbortFlag};

/// Parse a backend address of the form `host:port` or `tcp://host:port`.
pub fn parse_address(address: &str) -> Result<(String, u16), TransportError> {
    let trimmed = address.strip_prefix("tcp://").unwrap_or(address);
    let (host, port) = trimmed
        .rsplit_once(':')
        .ok_or_else(|| TransportError::InvalidAddress(address.to_string()))?;
    if host.is_empty() {
        return Err(TransportError::InvalidAddress(address.to_string()));
    }
    let port = port
        .parse::<u16>()
        .map_err(|_| TransportError::InvalidAddress(address.to_string()))?;
    Ok((host.to_string(), port))
}

struct Inner {
    peer: String,
    max_frame_size: usize,
    state: Mutex<TransportState>,
    failed: AtomicBool,
    error_fired: AtomicBool,
    abort: AbortFlag,
    read_half: Mutex<Option<OwnedReadHalf>>,
    writer: tokio::sync::Mutex<Option<OwnedWriteHalf>>,
    reader_task: Mutex<Option<JoinHandle<()>>>,
}

/// TCP transport for framed messages.
pub struct TcpTransport {
    inner: Arc<Inner>,
}

impl TcpTransport {
    /// Connect to `address` (`host:port` or `tcp://host:port`) within
    /// `timeout`, applying low-latency socket options.
    pub async fn connect(address: &str, timeout: Duration) -> Result<Self, TransportError> {
        Self::connect_with_max_frame(address, timeout, defaults::MAX_FRAME_SIZE).await
    }

    /// Like [`connect`](Self::connect) with an explicit frame ceiling.
    pub async fn connect_with_max_frame(
        address: &str,
        timeout: Duration,
        max_frame_size: usize,
    ) -> Result<Self, TransportError> {
        let (host, port) = parse_address(address)?;
        let addr = format!("{host}:{port}");
        debug!("connecting TCP transport to {addr}");

        let stream = tokio::time::timeout(timeout, TcpStream::connect(&addr))
            .await
            .map_err(|_| TransportError::ConnectTimeout {
                addr: addr.clone(),
                timeout_ms: timeout.as_millis() as u64,
            })?
            .map_err(|e| TransportError::Connect {
                addr: addr.clone(),
                source: e,
            })?;

        let connect_err = |e: std::io::Error| TransportError::Connect {
            addr: addr.clone(),
            source: e,
        };

        // Configure socket options for low latency
        let std_stream = stream.into_std().map_err(connect_err)?;
        let socket = socket2::Socket::from(std_stream.try_clone().map_err(connect_err)?);
        socket.set_nodelay(true).map_err(connect_err)?;
        let stream = TcpStream::from_std(std_stream).map_err(connect_err)?;

        let (read_half, write_half) = stream.into_split();
        debug!("TCP transport connected to {addr}");

        Ok(Self {
            inner: Arc::new(Inner {
                peer: addr,
                max_frame_size,
                state: Mutex::new(TransportState::Created),
                failed: AtomicBool::new(false),
                error_fired: AtomicBool::new(false),
                abort: AbortFlag::new(),
                read_half: Mutex::new(Some(read_half)),
                writer: tokio::sync::Mutex::new(Some(write_half)),
                reader_task: Mutex::new(None),
            }),
        })
    }

    /// Peer address this transport is connected to.
    pub fn peer(&self) -> &str {
        &self.inner.peer
    }
}

async fn send_on(inner: &Inner, payload: &[u8]) -> Result<(), TransportError> {
    let mut guard = inner.writer.lock().await;
    let writer = guard.as_mut().ok_or(TransportError::Stopped)?;
    write_frame(writer, payload, Some(&inner.abort))
        .await
        .map_err(|e| {
            inner.failed.store(true, Ordering::Release);
            TransportError::Frame(e)
        })
}

/// Mark the transport failed and fire the error hook exactly once.
fn fire_error(inner: &Inner, handler: &Arc<dyn MessageHandler>, failure: TransportFailure) {
    inner.failed.store(true, Ordering::Release);
    if !inner.error_fired.swap(true, Ordering::AcqRel) {
        handler.on_error(failure);
    }
}

async fn reader_loop(
    inner: Arc<Inner>,
    mut read_half: OwnedReadHalf,
    handler: Arc<dyn MessageHandler>,
) {
    loop {
        match read_frame(&mut read_half, inner.max_frame_size, Some(&inner.abort)).await {
            Ok(payload) => {
                if let Some(reply) = handler.on_message(payload) {
                    if let Err(e) = send_on(&inner, &reply).await {
                        if inner.abort.is_aborted() {
                            debug!("dropping handler reply during shutdown of {}", inner.peer);
                        } else {
                            warn!("failed to send handler reply on {}: {e}", inner.peer);
                            fire_error(&inner, &handler, TransportFailure::Io);
                        }
                        break;
                    }
                }
            }
            Err(FrameError::Aborted) => {
                debug!("TCP reader for {} aborted during shutdown", inner.peer);
                break;
            }
            Err(FrameError::Closed) => {
                if inner.abort.is_aborted() {
                    debug!("TCP reader for {} observed close during shutdown", inner.peer);
                } else {
                    debug!("peer {} closed the connection", inner.peer);
                    fire_error(&inner, &handler, TransportFailure::ConnectionClosed);
                }
                break;
            }
            Err(e @ (FrameError::Oversize { .. } | FrameError::Truncated { .. })) => {
                error!("framing violation from {}: {e}", inner.peer);
                fire_error(&inner, &handler, TransportFailure::ProtocolViolation);
                break;
            }
            Err(FrameError::Io(e)) => {
                if inner.abort.is_aborted() {
                    debug!("TCP reader for {} stopping: {e}", inner.peer);
                } else {
                    error!("read failure on {}: {e}", inner.peer);
                    let failure = if e.kind() == std::io::ErrorKind::ConnectionReset {
                        TransportFailure::ConnectionReset
                    } else {
                        TransportFailure::Io
                    };
                    fire_error(&inner, &handler, failure);
                }
                break;
            }
        }
    }
    debug!("TCP reader for {} finished", inner.peer);
}

#[async_trait]
impl Transport for TcpTransport {
    async fn start(&self, handler: Arc<dyn MessageHandler>) -> Result<(), TransportError> {
        {
            let mut state = self.inner.state.lock();
            match *state {
                // Double-start is a no-op.
                TransportState::Started => return Ok(()),
                TransportState::Created => *state = TransportState::Started,
                TransportState::Stopping | TransportState::Stopped => {
                    return Err(TransportError::Stopped)
                }
            }
        }

        let read_half = self
            .inner
            .read_half
            .lock()
            .take()
            .ok_or_else(|| TransportError::Failed("reader already consumed".into()))?;

        let task = tokio::spawn(reader_loop(
            Arc::clone(&self.inner),
            read_half,
            handler,
        ));
        *self.inner.reader_task.lock() = Some(task);
        Ok(())
    }

    async fn stop(&self) {
        {
            let mut state = self.inner.state.lock();
            match *state {
                TransportState::Stopped => return,
                TransportState::Created => {
                    *state = TransportState::Stopped;
                    return;
                }
                _ => *state = TransportState::Stopping,
            }
        }

        self.inner.abort.trigger();
        {
            let mut guard = self.inner.writer.lock().await;
            if let Some(mut writer) = guard.take() {
                let _ = writer.shutdown().await;
            }
        }

        let task = self.inner.reader_task.lock().take();
        if let Some(task) = task {
            let _ = task.await;
        }

        *self.inner.state.lock() = TransportState::Stopped;
        debug!("TCP transport to {} stopped", self.inner.peer);
    }

    async fn send(&self, payload: &[u8]) -> Result<(), TransportError> {
        if *self.inner.state.lock() != TransportState::Started {
            return Err(TransportError::NotStarted);
        }
        if self.inner.failed.load(Ordering::Acquire) {
            return Err(TransportError::Failed(format!(
                "transport to {} already failed",
                self.inner.peer
            )));
        }
        if payload.is_empty() {
            return Err(TransportError::EmptyPayload);
        }
        send_on(&self.inner, payload).await
    }

    fn state(&self) -> TransportState {
        *self.inner.state.lock()
    }

    fn name(&self) -> &'static str {
        "tcp"
    }

    fn max_frame_size(&self) -> usize {
        self.inner.max_frame_size
    }
}
