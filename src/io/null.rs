//! Null stdio adapters.

use tokio::io::{AsyncRead, AsyncWrite};

/// Owned stdin source handed to an execution strategy.
pub type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;

/// Owned stdout/stderr sink handed to an execution strategy.
pub type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// A reader that is at end-of-input from the first read.
pub fn null_reader() -> BoxedReader {
    Box::new(tokio::io::empty())
}

/// A writer that accepts and drops every byte.
pub fn discard() -> BoxedWriter {
    Box::new(tokio::io::sink())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    #[tokio::test]
    async fn test_null_reader_is_empty() {
        let mut reader = null_reader();
        let mut buf = Vec::new();
        let n = reader.read_to_end(&mut buf).await.unwrap();
        assert_eq!(n, 0);
    }

    #[tokio::test]
    async fn test_discard_accepts_everything() {
        let mut writer = discard();
        writer.write_all(&[7u8; 100_000]).await.unwrap();
        writer.shutdown().await.unwrap();
    }
}
