//! Line-buffered sinks over a shared step output.

use std::sync::Arc;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::Mutex;

/// Caller-owned destination for step output.
pub type Output = Arc<Mutex<dyn AsyncWrite + Send + Unpin>>;

/// Wrap a writer so it can be shared by several sinks.
pub fn shared<W>(writer: W) -> Output
where
    W: AsyncWrite + Send + Unpin + 'static,
{
    Arc::new(Mutex::new(writer))
}

/// Partial line size after which buffered bytes are written out anyway.
const MAX_PENDING_BYTES: usize = 64 * 1024;

/// Buffers bytes until a newline and writes complete lines to the output.
///
/// Each line is written while holding the output lock, so lines from two
/// sinks over the same output never interleave. A partial line longer than
/// 64 KiB is written out without waiting for its newline.
pub struct LineWriter {
    output: Output,
    buffer: Vec<u8>,
}

impl LineWriter {
    pub fn new(output: Output) -> Self {
        Self {
            output,
            buffer: Vec::new(),
        }
    }

    pub async fn write(&mut self, data: &[u8]) -> std::io::Result<()> {
        self.buffer.extend_from_slice(data);

        let mut end = self
            .buffer
            .iter()
            .rposition(|b| *b == b'\n')
            .map_or(0, |last_newline| last_newline + 1);
        if self.buffer.len() - end >= MAX_PENDING_BYTES {
            end = self.buffer.len();
        }
        if end == 0 {
            return Ok(());
        }

        let complete: Vec<u8> = self.buffer.drain(..end).collect();
        let mut output = self.output.lock().await;
        for line in complete.split_inclusive(|b| *b == b'\n') {
            output.write_all(line).await?;
        }
        output.flush().await
    }

    /// Write out any buffered partial line.
    pub async fn flush(&mut self) -> std::io::Result<()> {
        let mut output = self.output.lock().await;
        if !self.buffer.is_empty() {
            let rest = std::mem::take(&mut self.buffer);
            output.write_all(&rest).await?;
        }
        output.flush().await
    }

    pub fn pending(&self) -> usize {
        self.buffer.len()
    }
}
