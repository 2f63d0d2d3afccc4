use tokio::io::{AsyncWrite, AsyncWriteExt};

use quarry_types::{ArtifactChunk, EventEnvelope};

use crate::error::SinkError;
use crate::frame::{self, FileWriteFrame, RunResultFrame};

/// Serializes structured writes onto a single byte stream.
///
/// Calls take `&mut self`, so at most one write is outstanding per sink; a
/// call suspends only while the underlying stream applies backpressure. Each
/// write allocates exactly one payload buffer. Refusing writes after a
/// terminal event is the emitter's job, not this layer's.
pub struct FramedSink<W> {
    writer: W,
}

impl<W: AsyncWrite + Unpin> FramedSink<W> {
    pub fn new(writer: W) -> Self {
        FramedSink { writer }
    }

    pub async fn write_event(&mut self, envelope: &EventEnvelope) -> Result<(), SinkError> {
        let payload = frame::encode_event(envelope)?;
        self.write_payload(payload).await
    }

    pub async fn write_chunk(&mut self, chunk: &ArtifactChunk) -> Result<(), SinkError> {
        let payload = frame::encode_chunk(chunk)?;
        self.write_payload(payload).await
    }

    pub async fn write_file(&mut self, file: &FileWriteFrame) -> Result<(), SinkError> {
        let payload = frame::encode_file(file)?;
        self.write_payload(payload).await
    }

    pub async fn write_run_result(&mut self, result: &RunResultFrame) -> Result<(), SinkError> {
        let payload = frame::encode_run_result(result)?;
        self.write_payload(payload).await
    }

    /// Flushes buffered bytes and shuts the stream down.
    pub async fn shutdown(&mut self) -> Result<(), SinkError> {
        self.writer.flush().await?;
        self.writer.shutdown().await?;
        Ok(())
    }

    async fn write_payload(&mut self, payload: Vec<u8>) -> Result<(), SinkError> {
        let prefix = (payload.len() as u32).to_be_bytes();
        self.writer.write_all(&prefix).await?;
        self.writer.write_all(&payload).await?;
        self.writer.flush().await?;
        Ok(())
    }
}
