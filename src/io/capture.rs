//! In-memory output capture.

use std::io;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll};

use tokio::io::AsyncWrite;

/// A growable byte buffer that can be bound to several sinks at once.
///
/// Clones share the same storage, so one buffer can serve as both stdout
/// and stderr. Writes are appended in the order they arrive.
#[derive(Debug, Clone, Default)]
pub struct CaptureBuffer {
    inner: Arc<Mutex<Vec<u8>>>,
}

impl CaptureBuffer {
    /// Create an empty buffer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of everything written so far.
    pub fn contents(&self) -> Vec<u8> {
        self.lock().clone()
    }

    /// Number of bytes written so far.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Whether nothing has been written yet.
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Drain the buffer, leaving it empty.
    pub fn take(&self) -> Vec<u8> {
        std::mem::take(&mut *self.lock())
    }

    fn lock(&self) -> MutexGuard<'_, Vec<u8>> {
        // A panic while appending cannot leave the Vec in a broken state.
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl AsyncWrite for CaptureBuffer {
    fn poll_write(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        self.lock().extend_from_slice(buf);
        Poll::Ready(Ok(buf.len()))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncWriteExt;

    #[tokio::test]
    async fn test_clones_share_storage() {
        let buf = CaptureBuffer::new();
        let mut out = buf.clone();
        let mut err = buf.clone();

        out.write_all(b"out\n").await.unwrap();
        err.write_all(b"err\n").await.unwrap();
        out.write_all(b"more\n").await.unwrap();

        assert_eq!(buf.contents(), b"out\nerr\nmore\n");
        assert_eq!(buf.len(), 13);
    }

    #[tokio::test]
    async fn test_take_empties() {
        let mut buf = CaptureBuffer::new();
        buf.write_all(b"abc").await.unwrap();

        assert_eq!(buf.take(), b"abc");
        assert!(buf.is_empty());
    }
}
