//! Attach stream demultiplexer.
//!
//! When a container runs without a terminal the engine carries stdout and
//! stderr over one connection as a sequence of frames:
//!
//! ```text
//! +--------+-----------+----------------------+-----------------+
//! | stream | 0   0   0 | payload length (BE)  | payload ...     |
//! | 1 byte | 3 bytes   | 4 bytes              | length bytes    |
//! +--------+-----------+----------------------+-----------------+
//! ```
//!
//! Payloads are copied to the matching sink as they arrive, so memory use
//! is bounded by the copy buffer regardless of frame size.

use std::fmt;
use std::io;

use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::trace;

/// Size of a frame header in bytes.
pub const HEADER_LEN: usize = 8;

/// Largest engine error message read from a system-error frame.
const MAX_SYSTEM_ERROR_LEN: u64 = 64 * 1024;

/// How the attach stream is encoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StreamMode {
    /// Framed stdout/stderr.
    #[default]
    Multiplexed,
    /// Plain bytes, as produced for containers with a terminal.
    Raw,
}

impl StreamMode {
    /// Mode the engine uses for a container with or without a terminal.
    pub fn for_tty(tty: bool) -> Self {
        if tty {
            StreamMode::Raw
        } else {
            StreamMode::Multiplexed
        }
    }
}

/// Stream selector carried in a frame header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamKind {
    Stdin,
    Stdout,
    Stderr,
    /// Engine-side error message.
    System,
}

impl StreamKind {
    fn from_selector(selector: u8) -> Option<Self> {
        match selector {
            0 => Some(StreamKind::Stdin),
            1 => Some(StreamKind::Stdout),
            2 => Some(StreamKind::Stderr),
            3 => Some(StreamKind::System),
            _ => None,
        }
    }
}

impl fmt::Display for StreamKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            StreamKind::Stdin => "stdin",
            StreamKind::Stdout => "stdout",
            StreamKind::Stderr => "stderr",
            StreamKind::System => "system",
        };
        f.write_str(name)
    }
}

/// Errors produced while demultiplexing.
#[derive(Debug, Error)]
pub enum DemuxError {
    /// Frame header names a stream that does not exist.
    #[error("unrecognized stream selector {0} in frame header")]
    UnknownStream(u8),

    /// Stream ended part-way through a frame header.
    #[error("stream ended inside a frame header ({got} of 8 bytes)")]
    TruncatedHeader { got: usize },

    /// Stream ended part-way through a frame payload.
    #[error("stream ended inside a {expected}-byte {stream} frame after {got} bytes")]
    TruncatedPayload {
        stream: StreamKind,
        expected: u64,
        got: u64,
    },

    /// The engine sent an error message in-band.
    #[error("engine error: {0}")]
    Engine(String),

    /// Reading the attach stream failed.
    #[error("failed to read attach stream: {0}")]
    Read(#[source] io::Error),

    /// Writing to a caller sink failed.
    #[error("failed to write {stream} output: {source}")]
    Write {
        stream: StreamKind,
        #[source]
        source: io::Error,
    },
}

/// Byte and frame counts for one demultiplexing run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DemuxStats {
    pub frames: u64,
    pub stdout_bytes: u64,
    pub stderr_bytes: u64,
}

/// Copy `src` into `stdout` and `stderr` until the stream ends.
///
/// In [`StreamMode::Raw`] everything goes to `stdout` unchanged. In
/// [`StreamMode::Multiplexed`] frames are decoded and routed by selector;
/// stdin echo frames go to `stdout`. End of stream on a frame boundary is
/// a clean finish, anything else is a [`DemuxError`].
pub async fn demux<R>(
    src: &mut R,
    stdout: &mut (dyn AsyncWrite + Send + Unpin),
    stderr: &mut (dyn AsyncWrite + Send + Unpin),
    mode: StreamMode,
    buffer_size: usize,
) -> Result<DemuxStats, DemuxError>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let mut stats = DemuxStats::default();

    if mode == StreamMode::Raw {
        stats.stdout_bytes = copy_raw(src, stdout, buffer_size).await?;
        return Ok(stats);
    }

    let mut buf = vec![0u8; buffer_size.max(1)];
    let mut header = [0u8; HEADER_LEN];

    loop {
        if !read_header(src, &mut header).await? {
            return Ok(stats);
        }

        let kind =
            StreamKind::from_selector(header[0]).ok_or(DemuxError::UnknownStream(header[0]))?;
        let len = u64::from(u32::from_be_bytes([header[4], header[5], header[6], header[7]]));
        trace!(stream = %kind, len, "frame");

        let sink: &mut (dyn AsyncWrite + Send + Unpin) = match kind {
            StreamKind::Stdin | StreamKind::Stdout => &mut *stdout,
            StreamKind::Stderr => &mut *stderr,
            StreamKind::System => return Err(read_system_error(src, len).await?),
        };

        copy_frame(src, sink, kind, len, &mut buf).await?;

        stats.frames += 1;
        match kind {
            StreamKind::Stderr => stats.stderr_bytes += len,
            _ => stats.stdout_bytes += len,
        }
    }
}

/// Fill `header`. Returns `false` on a clean end of stream.
async fn read_header<R>(src: &mut R, header: &mut [u8; HEADER_LEN]) -> Result<bool, DemuxError>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let mut filled = 0;
    while filled < HEADER_LEN {
        let n = src
            .read(&mut header[filled..])
            .await
            .map_err(DemuxError::Read)?;
        if n == 0 {
            if filled == 0 {
                return Ok(false);
            }
            return Err(DemuxError::TruncatedHeader { got: filled });
        }
        filled += n;
    }
    Ok(true)
}

async fn copy_frame<R>(
    src: &mut R,
    sink: &mut (dyn AsyncWrite + Send + Unpin),
    stream: StreamKind,
    len: u64,
    buf: &mut [u8],
) -> Result<(), DemuxError>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let mut remaining = len;
    while remaining > 0 {
        let want = remaining.min(buf.len() as u64) as usize;
        let n = src.read(&mut buf[..want]).await.map_err(DemuxError::Read)?;
        if n == 0 {
            return Err(DemuxError::TruncatedPayload {
                stream,
                expected: len,
                got: len - remaining,
            });
        }
        sink.write_all(&buf[..n])
            .await
            .map_err(|source| DemuxError::Write { stream, source })?;
        remaining -= n as u64;
    }
    sink.flush()
        .await
        .map_err(|source| DemuxError::Write { stream, source })
}

async fn read_system_error<R>(src: &mut R, len: u64) -> Result<DemuxError, DemuxError>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let keep = len.min(MAX_SYSTEM_ERROR_LEN);
    let mut message = Vec::with_capacity(keep as usize);
    let got = (&mut *src)
        .take(keep)
        .read_to_end(&mut message)
        .await
        .map_err(DemuxError::Read)? as u64;
    if got < keep {
        return Err(DemuxError::TruncatedPayload {
            stream: StreamKind::System,
            expected: len,
            got,
        });
    }
    Ok(DemuxError::Engine(
        String::from_utf8_lossy(&message).trim_end().to_string(),
    ))
}

async fn copy_raw<R>(
    src: &mut R,
    stdout: &mut (dyn AsyncWrite + Send + Unpin),
    buffer_size: usize,
) -> Result<u64, DemuxError>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let mut buf = vec![0u8; buffer_size.max(1)];
    let mut total = 0u64;
    loop {
        let n = src.read(&mut buf).await.map_err(DemuxError::Read)?;
        if n == 0 {
            break;
        }
        stdout
            .write_all(&buf[..n])
            .await
            .map_err(|source| DemuxError::Write {
                stream: StreamKind::Stdout,
                source,
            })?;
        total += n as u64;
    }
    stdout.flush().await.map_err(|source| DemuxError::Write {
        stream: StreamKind::Stdout,
        source,
    })?;
    Ok(total)
}
