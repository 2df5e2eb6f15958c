//! Job log streaming.
//!
//! Every byte an executor produces is mirrored to process stdout (container
//! log collection) and into an in-memory buffer (the `output` attribute
//! reported to the API). When Redis streaming is enabled, complete lines are
//! additionally published to a Redis Stream the UI and CLI tail in realtime.

mod redis_sink;

pub use redis_sink::RedisSink;

use async_trait::async_trait;
use std::io::Write;
use thiserror::Error;

/// Result type alias for log sinks.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("failed to connect to Redis at {addr}: {source}")]
    Connect {
        addr: String,
        source: redis::RedisError,
    },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Destination for raw log bytes.
///
/// Sink failures past construction must not fail the job; implementations
/// swallow transport errors and report the full byte count.
#[async_trait]
pub trait LogSink: Send {
    async fn write(&mut self, chunk: &[u8]) -> Result<usize>;
    async fn close(&mut self) -> Result<()>;
}

/// Sink that only mirrors to stdout.
#[derive(Debug, Default)]
pub struct ConsoleSink;

#[async_trait]
impl LogSink for ConsoleSink {
    async fn write(&mut self, chunk: &[u8]) -> Result<usize> {
        let mut stdout = std::io::stdout().lock();
        stdout.write_all(chunk)?;
        let _ = stdout.flush();
        Ok(chunk.len())
    }

    async fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

/// The per-job log stream: one sink plus the in-memory capture buffer.
pub struct LogStream {
    sink: Box<dyn LogSink>,
    buffer: String,
}

impl LogStream {
    pub fn new(sink: Box<dyn LogSink>) -> Self {
        Self {
            sink,
            buffer: String::new(),
        }
    }

    /// Stream to stdout only.
    pub fn console() -> Self {
        Self::new(Box::new(ConsoleSink))
    }

    /// Write a chunk to the sink and the capture buffer.
    pub async fn write(&mut self, chunk: &[u8]) -> Result<usize> {
        self.buffer.push_str(&String::from_utf8_lossy(chunk));
        self.sink.write(chunk).await
    }

    /// Write a line, appending the newline framing.
    pub async fn write_line(&mut self, line: &str) -> Result<()> {
        self.write(line.as_bytes()).await?;
        self.write(b"\n").await?;
        Ok(())
    }

    /// Everything written so far.
    pub fn contents(&self) -> &str {
        &self.buffer
    }

    /// Flush trailing output and close the underlying sink.
    pub async fn close(&mut self) -> Result<()> {
        self.sink.close().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Sink capturing everything it is handed, for assertions.
    struct RecordingSink(Vec<u8>);

    #[async_trait]
    impl LogSink for RecordingSink {
        async fn write(&mut self, chunk: &[u8]) -> Result<usize> {
            self.0.extend_from_slice(chunk);
            Ok(chunk.len())
        }

        async fn close(&mut self) -> Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_stream_tees_into_buffer() {
        let mut stream = LogStream::new(Box::new(RecordingSink(Vec::new())));
        stream.write(b"Plan: 3 to add").await.unwrap();
        stream.write_line(", 0 to destroy.").await.unwrap();

        assert_eq!(stream.contents(), "Plan: 3 to add, 0 to destroy.\n");
    }

    #[tokio::test]
    async fn test_write_returns_full_count() {
        let mut stream = LogStream::console();
        let n = stream.write(b"hello\n").await.unwrap();
        assert_eq!(n, 6);
    }
}
