use std::io;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

#[async_trait]
pub trait DataSource: Send {
    /// Returns up to `max` bytes. Fewer than `max` means end of input has
    /// been reached; an empty chunk is end of input.
    async fn read_chunk(&mut self, max: usize) -> io::Result<Vec<u8>>;
}

#[async_trait]
pub trait DataSink: Send {
    async fn append_chunk(&mut self, chunk: &[u8]) -> io::Result<()>;

    async fn flush(&mut self) -> io::Result<()>;
}

#[async_trait]
impl<R> DataSource for R
where
    R: AsyncRead + Unpin + Send,
{
    async fn read_chunk(&mut self, max: usize) -> io::Result<Vec<u8>> {
        let mut chunk = vec![0; max];
        let mut filled = 0;
        // A short read is only terminal at EOF, so keep reading until full.
        while filled < max {
            let n = self.read(&mut chunk[filled..]).await?;
            if n == 0 {
                break;
            }
            filled += n;
        }
        chunk.truncate(filled);
        Ok(chunk)
    }
}

#[async_trait]
impl<W> DataSink for W
where
    W: AsyncWrite + Unpin + Send,
{
    async fn append_chunk(&mut self, chunk: &[u8]) -> io::Result<()> {
        self.write_all(chunk).await
    }

    async fn flush(&mut self) -> io::Result<()> {
        AsyncWriteExt::flush(self).await
    }
}
