//! Stdio-like transport over any byte-stream pair.
//!
//! Built for process stdio and pipes, where the embedder may prefer to
//! pull messages synchronously instead of running a reader task. The
//! transport therefore offers two modes:
//!
//! - **push**: [`Transport::start`] spawns a reader task that decodes
//!   frames and delivers them to the handler, like the TCP transport;
//! - **pull**: [`StdioTransport::start_pull`] marks the transport
//!   started without consuming the read side, and callers drain it with
//!   [`Transport::receive`].
//!
//! The two modes are exclusive: once a reader task owns the read half,
//! `receive` reports `Unsupported`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, Stdin, Stdout};
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

use super::{MessageHandler, Transport, TransportFailure, TransportState};
use crate::defaults;
use crate::error::{FrameError, TransportError};
use crate::framing::{read_frame, write_frame, AbortFlag};

struct Inner<R, W> {
    max_frame_size: usize,
    state: Mutex<TransportState>,
    failed: AtomicBool,
    error_fired: AtomicBool,
    abort: AbortFlag,
    reader: tokio::sync::Mutex<Option<R>>,
    writer: tokio::sync::Mutex<Option<W>>,
    reader_task: Mutex<Option<JoinHandle<()>>>,
}

/// Framed transport over an arbitrary reader/writer pair.
pub struct StdioTransport<R, W> {
    inner: Arc<Inner<R, W>>,
}

impl StdioTransport<Stdin, Stdout> {
    /// Transport over this process's own stdin/stdout.
    pub fn stdio() -> Self {
        Self::from_parts(tokio::io::stdin(), tokio::io::stdout())
    }
}

impl<R, W> StdioTransport<R, W>
where
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
{
    pub fn from_parts(reader: R, writer: W) -> Self {
        Self::with_max_frame(reader, writer, defaults::MAX_FRAME_SIZE)
    }

    pub fn with_max_frame(reader: R, writer: W, max_frame_size: usize) -> Self {
        Self {
            inner: Arc::new(Inner {
                max_frame_size,
                state: Mutex::new(TransportState::Created),
                failed: AtomicBool::new(false),
                error_fired: AtomicBool::new(false),
                abort: AbortFlag::new(),
                reader: tokio::sync::Mutex::new(Some(reader)),
                writer: tokio::sync::Mutex::new(Some(writer)),
                reader_task: Mutex::new(None),
            }),
        }
    }

    /// Mark the transport started in pull mode: no reader task is
    /// spawned and callers drain messages with `receive`.
    pub fn start_pull(&self) -> Result<(), TransportError> {
        let mut state = self.inner.state.lock();
        match *state {
            TransportState::Started => Ok(()),
            TransportState::Created => {
                *state = TransportState::Started;
                Ok(())
            }
            _ => Err(TransportError::Stopped),
        }
    }
}

async fn send_on<R, W>(inner: &Inner<R, W>, payload: &[u8]) -> Result<(), TransportError>
where
    W: AsyncWrite + Unpin + Send,
{
    let mut guard = inner.writer.lock().await;
    let writer = guard.as_mut().ok_or(TransportError::Stopped)?;
    write_frame(writer, payload, Some(&inner.abort))
        .await
        .map_err(|e| {
            inner.failed.store(true, Ordering::Release);
            TransportError::Frame(e)
        })
}

fn fire_error<R, W>(
    inner: &Inner<R, W>,
    handler: &Arc<dyn MessageHandler>,
    failure: TransportFailure,
) {
    inner.failed.store(true, Ordering::Release);
    if !inner.error_fired.swap(true, Ordering::AcqRel) {
        handler.on_error(failure);
    }
}

async fn reader_loop<R, W>(inner: Arc<Inner<R, W>>, mut reader: R, handler: Arc<dyn MessageHandler>)
where
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    loop {
        match read_frame(&mut reader, inner.max_frame_size, Some(&inner.abort)).await {
            Ok(payload) => {
                if let Some(reply) = handler.on_message(payload) {
                    if let Err(e) = send_on(&inner, &reply).await {
                        if inner.abort.is_aborted() {
                            debug!("dropping handler reply during stdio shutdown");
                        } else {
                            warn!("failed to send handler reply on stdio transport: {e}");
                            fire_error(&inner, &handler, TransportFailure::Io);
                        }
                        break;
                    }
                }
            }
            Err(FrameError::Aborted) => {
                debug!("stdio reader aborted during shutdown");
                break;
            }
            Err(FrameError::Closed) => {
                if inner.abort.is_aborted() {
                    debug!("stdio reader observed close during shutdown");
                } else {
                    debug!("stdio peer closed the stream");
                    fire_error(&inner, &handler, TransportFailure::ConnectionClosed);
                }
                break;
            }
            Err(e @ (FrameError::Oversize { .. } | FrameError::Truncated { .. })) => {
                error!("framing violation on stdio transport: {e}");
                fire_error(&inner, &handler, TransportFailure::ProtocolViolation);
                break;
            }
            Err(FrameError::Io(e)) => {
                if inner.abort.is_aborted() {
                    debug!("stdio reader stopping: {e}");
                } else {
                    error!("stdio read failure: {e}");
                    fire_error(&inner, &handler, TransportFailure::Io);
                }
                break;
            }
        }
    }
    debug!("stdio reader finished");
}

#[async_trait]
impl<R, W> Transport for StdioTransport<R, W>
where
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
{
    async fn start(&self, handler: Arc<dyn MessageHandler>) -> Result<(), TransportError> {
        {
            let mut state = self.inner.state.lock();
            match *state {
                TransportState::Started => return Ok(()),
                TransportState::Created => *state = TransportState::Started,
                TransportState::Stopping | TransportState::Stopped => {
                    return Err(TransportError::Stopped)
                }
            }
        }

        let reader = self
            .inner
            .reader
            .lock()
            .await
            .take()
            .ok_or_else(|| TransportError::Failed("reader already consumed".into()))?;

        let task = tokio::spawn(reader_loop(Arc::clone(&self.inner), reader, handler));
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
    }

    async fn send(&self, payload: &[u8]) -> Result<(), TransportError> {
        if *self.inner.state.lock() != TransportState::Started {
            return Err(TransportError::NotStarted);
        }
        if self.inner.failed.load(Ordering::Acquire) {
            return Err(TransportError::Failed("stdio transport already failed".into()));
        }
        if payload.is_empty() {
            return Err(TransportError::EmptyPayload);
        }
        send_on(&self.inner, payload).await
    }

    async fn receive(&self, timeout: Duration) -> Result<Vec<u8>, TransportError> {
        if *self.inner.state.lock() != TransportState::Started {
            return Err(TransportError::NotStarted);
        }
        let mut guard = self.inner.reader.lock().await;
        // The reader task owns the stream in push mode.
        let reader = guard.as_mut().ok_or(TransportError::Unsupported)?;

        match tokio::time::timeout(
            timeout,
            read_frame(reader, self.inner.max_frame_size, Some(&self.inner.abort)),
        )
        .await
        {
            Err(_) => Err(TransportError::Timeout {
                timeout_ms: timeout.as_millis() as u64,
            }),
            Ok(Ok(payload)) => Ok(payload),
            Ok(Err(e)) => Err(e.into()),
        }
    }

    fn state(&self) -> TransportState {
        *self.inner.state.lock()
    }

    fn name(&self) -> &'static str {
        "stdio"
    }

    fn max_frame_size(&self) -> usize {
        self.inner.max_frame_size
    }
}
