use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;

use quarry_store::StoreClient;
use quarry_types::{ArtifactChunk, EventEnvelope, PolicyStats};

use crate::error::PolicyError;
use crate::stats::StatsCell;
use crate::IngestPolicy;

/// Writes every record immediately as a batch of one. Storage backpressure
/// surfaces straight to the script, and the first write failure terminates
/// the run.
pub struct StrictPolicy {
    client: Arc<StoreClient>,
    stats: StatsCell,
    closed: AtomicBool,
}

impl StrictPolicy {
    pub fn new(client: Arc<StoreClient>) -> Self {
        StrictPolicy {
            client,
            stats: StatsCell::default(),
            closed: AtomicBool::new(false),
        }
    }

    fn ensure_open(&self) -> Result<(), PolicyError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(PolicyError::Closed);
        }
        Ok(())
    }
}

#[async_trait]
impl IngestPolicy for StrictPolicy {
    async fn ingest_event(&self, envelope: EventEnvelope) -> Result<(), PolicyError> {
        self.ensure_open()?;
        self.stats.with(|s| s.events_received += 1);
        match self.client.write_events(std::slice::from_ref(&envelope)).await {
            Ok(()) => {
                self.stats.with(|s| s.events_persisted += 1);
                Ok(())
            }
            Err(err) => {
                self.stats.with(|s| s.error_count += 1);
                Err(err.into())
            }
        }
    }

    async fn ingest_chunk(&self, chunk: ArtifactChunk) -> Result<(), PolicyError> {
        self.ensure_open()?;
        self.stats.with(|s| s.chunks_received += 1);
        match self.client.write_chunks(std::slice::from_ref(&chunk)).await {
            Ok(()) => {
                self.stats.with(|s| s.chunks_persisted += 1);
                Ok(())
            }
            Err(err) => {
                self.stats.with(|s| s.error_count += 1);
                Err(err.into())
            }
        }
    }

    async fn flush(&self) -> Result<(), PolicyError> {
        self.ensure_open()?;
        // nothing buffered; the flush still counts
        self.stats.with(|s| s.flush_count += 1);
        Ok(())
    }

    async fn close(&self) -> Result<(), PolicyError> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.stats.with(|s| s.flush_count += 1);
        self.client.close();
        Ok(())
    }

    fn stats(&self) -> PolicyStats {
        self.stats.snapshot()
    }
}
