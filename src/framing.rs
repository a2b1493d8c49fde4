//! # Length-Prefixed Framing Codec
//!
//! Messages on every byte-stream transport are framed as a 4-byte unsigned
//! length in network byte order followed by exactly that many payload
//! bytes. There is no magic number and no version byte.
//!
//! The codec guarantees exactly-N-bytes semantics on both sides: short
//! reads and writes are retried until the frame is complete, the
//! connection fails, or the optional [`AbortFlag`] fires. Sends use
//! vectored I/O so the length prefix and the payload go to the socket as
//! one logical write.
//!
//! ## Error discrimination
//!
//! The receive side distinguishes a graceful peer close at a message
//! boundary ([`FrameError::Closed`]) from a stream that ends mid-frame
//! ([`FrameError::Truncated`]) and from plain I/O errors. An announced
//! length above the configured ceiling fails with [`FrameError::Oversize`]
//! before any payload byte is read.

use std::io::IoSlice;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::Notify;

use crate::error::FrameError;

/// Size of the frame length prefix in bytes.
pub const LENGTH_PREFIX_SIZE: usize = 4;

/// A clonable abort handle observed by framing I/O.
///
/// Triggering the flag promptly unblocks any `read_frame`/`write_frame`
/// call that was given a handle to it, returning [`FrameError::Aborted`].
/// Used by transports to implement soft shutdown without closing the
/// descriptor out from under a parked reader.
#[derive(Clone, Debug, Default)]
pub struct AbortFlag {
    inner: Arc<AbortInner>,
}

#[derive(Debug, Default)]
struct AbortInner {
    aborted: AtomicBool,
    notify: Notify,
}

impl AbortFlag {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark the flag aborted and wake every parked observer.
    pub fn trigger(&self) {
        self.inner.aborted.store(true, Ordering::Release);
        self.inner.notify.notify_waiters();
    }

    pub fn is_aborted(&self) -> bool {
        self.inner.aborted.load(Ordering::Acquire)
    }

    /// Resolve once the flag has been triggered.
    pub async fn wait(&self) {
        while !self.is_aborted() {
            let notified = self.inner.notify.notified();
            tokio::pin!(notified);
            // Register interest before the final flag check so a trigger
            // between check and park cannot be missed.
            notified.as_mut().enable();
            if self.is_aborted() {
                return;
            }
            notified.await;
        }
    }
}

/// Read bytes into `buf` until it is full or the stream ends.
///
/// Returns the number of bytes read; fewer than `buf.len()` means EOF.
async fn read_full<R>(
    stream: &mut R,
    buf: &mut [u8],
    abort: Option<&AbortFlag>,
) -> Result<usize, FrameError>
where
    R: AsyncRead + Unpin,
{
    let mut read = 0;
    while read < buf.len() {
        if let Some(flag) = abort {
            if flag.is_aborted() {
                return Err(FrameError::Aborted);
            }
        }
        let n = match abort {
            Some(flag) => tokio::select! {
                biased;
                _ = flag.wait() => return Err(FrameError::Aborted),
                res = stream.read(&mut buf[read..]) => res?,
            },
            None => stream.read(&mut buf[read..]).await?,
        };
        if n == 0 {
            break;
        }
        read += n;
    }
    Ok(read)
}

/// Receive one framed message, returning the owned payload buffer.
///
/// Reads exactly four header bytes, decodes the big-endian length,
/// rejects lengths above `max_size` without touching the body, then reads
/// exactly `length` payload bytes. A zero length is legal and yields an
/// empty buffer.
pub async fn read_frame<R>(
    stream: &mut R,
    max_size: usize,
    abort: Option<&AbortFlag>,
) -> Result<Vec<u8>, FrameError>
where
    R: AsyncRead + Unpin,
{
    let mut header = [0u8; LENGTH_PREFIX_SIZE];
    let n = read_full(stream, &mut header, abort).await?;
    if n == 0 {
        return Err(FrameError::Closed);
    }
    if n < LENGTH_PREFIX_SIZE {
        return Err(FrameError::Truncated {
            read: n,
            expected: LENGTH_PREFIX_SIZE,
        });
    }

    let len = u32::from_be_bytes(header) as usize;
    if len > max_size {
        return Err(FrameError::Oversize { len, max: max_size });
    }

    let mut payload = vec![0u8; len];
    let n = read_full(stream, &mut payload, abort).await?;
    if n < len {
        return Err(FrameError::Truncated {
            read: n,
            expected: len,
        });
    }
    Ok(payload)
}

/// Send one framed message: 4-byte big-endian length, then the payload.
///
/// The prefix and payload are submitted together with vectored writes;
/// partial writes are resumed until the whole frame is on the wire. The
/// codec itself accepts zero-length payloads (callers above the transport
/// layer reject them).
pub async fn write_frame<W>(
    stream: &mut W,
    payload: &[u8],
    abort: Option<&AbortFlag>,
) -> Result<(), FrameError>
where
    W: AsyncWrite + Unpin,
{
    if payload.len() > u32::MAX as usize {
        return Err(FrameError::Oversize {
            len: payload.len(),
            max: u32::MAX as usize,
        });
    }
    let header = (payload.len() as u32).to_be_bytes();
    let total = LENGTH_PREFIX_SIZE + payload.len();
    let mut written = 0;

    while written < total {
        if let Some(flag) = abort {
            if flag.is_aborted() {
                return Err(FrameError::Aborted);
            }
        }
        let n = {
            let bufs = if written < LENGTH_PREFIX_SIZE {
                [IoSlice::new(&header[written..]), IoSlice::new(payload)]
            } else {
                [
                    IoSlice::new(&payload[written - LENGTH_PREFIX_SIZE..]),
                    IoSlice::new(&[]),
                ]
            };
            match abort {
                Some(flag) => tokio::select! {
                    biased;
                    _ = flag.wait() => return Err(FrameError::Aborted),
                    res = stream.write_vectored(&bufs) => res?,
                },
                None => stream.write_vectored(&bufs).await?,
            }
        };
        if n == 0 {
            return Err(FrameError::Io(std::io::Error::new(
                std::io::ErrorKind::WriteZero,
                "stream refused frame bytes",
            )));
        }
        written += n;
    }

    stream.flush().await?;
    Ok(())
}
