use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use quarry_logger::{debug, warn};
use quarry_store::StoreClient;
use quarry_types::{ArtifactChunk, EventEnvelope, PolicyStats};

use crate::error::PolicyError;
use crate::stats::StatsCell;
use crate::{event_estimated_size, IngestPolicy, StreamingConfig};

#[derive(Default)]
struct StreamBuffers {
    events: Vec<EventEnvelope>,
    chunks: Vec<ArtifactChunk>,
    buffer_bytes: usize,
}

impl StreamBuffers {
    fn record_count(&self) -> usize {
        self.events.len() + self.chunks.len()
    }

    fn recompute_bytes(&mut self) {
        self.buffer_bytes = self
            .events
            .iter()
            .map(event_estimated_size)
            .sum::<usize>()
            + self
                .chunks
                .iter()
                .map(ArtifactChunk::estimated_size)
                .sum::<usize>();
    }
}

/// Unbounded buffering flushed by a count threshold, an interval timer, or
/// run termination. Never drops anything.
///
/// Two locks keep ingestion non-blocking during slow writes: `state` covers
/// the buffers and is only ever held briefly; `flush_mu` orders whole
/// flushes and is held across the storage I/O. A flush swaps the buffers
/// out under the state lock, writes outside it, and on failure prepends the
/// swapped-out data back in front of whatever arrived meanwhile.
pub struct StreamingPolicy {
    client: Arc<StoreClient>,
    config: StreamingConfig,
    stats: StatsCell,
    state: Mutex<StreamBuffers>,
    flush_mu: tokio::sync::Mutex<()>,
    closed: AtomicBool,
    cancel: CancellationToken,
    interval_task: Mutex<Option<JoinHandle<()>>>,
}

impl StreamingPolicy {
    /// Builds the policy and spawns its interval task when an interval is
    /// configured. Must be called within the runtime.
    pub fn spawn(config: StreamingConfig, client: Arc<StoreClient>) -> Arc<Self> {
        let policy = Arc::new(StreamingPolicy {
            client,
            config,
            stats: StatsCell::default(),
            state: Mutex::new(StreamBuffers::default()),
            flush_mu: tokio::sync::Mutex::new(()),
            closed: AtomicBool::new(false),
            cancel: CancellationToken::new(),
            interval_task: Mutex::new(None),
        });

        if let Some(period) = config.flush_interval {
            let weak = Arc::downgrade(&policy);
            let cancel = policy.cancel.clone();
            let task = tokio::spawn(async move {
                let mut ticker = tokio::time::interval(period);
                ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
                ticker.tick().await; // immediate first tick
                loop {
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = ticker.tick() => {}
                    }
                    let Some(policy) = weak.upgrade() else { break };
                    // interval errors are logged, never fatal; the buffers
                    // were restored and the next trigger retries
                    if let Err(err) = policy.flush().await {
                        warn!("streaming interval flush failed: {}", err);
                    }
                }
                debug!("streaming flush interval task exit");
            });
            *policy.interval_task.lock() = Some(task);
        }

        policy
    }

    fn ensure_open(&self) -> Result<(), PolicyError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(PolicyError::Closed);
        }
        Ok(())
    }

    fn sync_gauge(&self, buffers: &StreamBuffers) {
        self.stats
            .with(|s| s.buffer_bytes = buffers.buffer_bytes as u64);
    }

    async fn flush_inner(&self) -> Result<(), PolicyError> {
        let _order = self.flush_mu.lock().await;
        self.stats.with(|s| s.flush_count += 1);

        let (events, chunks) = {
            let mut buffers = self.state.lock();
            let events = std::mem::take(&mut buffers.events);
            let chunks = std::mem::take(&mut buffers.chunks);
            buffers.recompute_bytes();
            self.sync_gauge(&buffers);
            (events, chunks)
        };
        if events.is_empty() && chunks.is_empty() {
            return Ok(());
        }

        // chunks before events, so commit events inside the batch always
        // trail their persisted chunks
        let mut chunks_written = false;
        let result = async {
            if !chunks.is_empty() {
                self.client.write_chunks(&chunks).await?;
                self.stats
                    .with(|s| s.chunks_persisted += chunks.len() as u64);
            }
            chunks_written = true;
            if !events.is_empty() {
                self.client.write_events(&events).await?;
                self.stats
                    .with(|s| s.events_persisted += events.len() as u64);
            }
            Ok::<(), PolicyError>(())
        }
        .await;

        if let Err(err) = result {
            self.stats.with(|s| s.error_count += 1);
            let mut buffers = self.state.lock();
            // the swapped-out data is older than anything appended during
            // the write, so it goes back in front
            let newer_events = std::mem::replace(&mut buffers.events, events);
            buffers.events.extend(newer_events);
            if !chunks_written {
                let newer_chunks = std::mem::replace(&mut buffers.chunks, chunks);
                buffers.chunks.extend(newer_chunks);
            }
            buffers.recompute_bytes();
            self.sync_gauge(&buffers);
            return Err(err);
        }
        Ok(())
    }
}

#[async_trait]
impl IngestPolicy for StreamingPolicy {
    async fn ingest_event(&self, envelope: EventEnvelope) -> Result<(), PolicyError> {
        self.ensure_open()?;
        self.stats.with(|s| s.events_received += 1);

        let threshold_hit = {
            let mut buffers = self.state.lock();
            buffers.buffer_bytes += event_estimated_size(&envelope);
            buffers.events.push(envelope);
            self.sync_gauge(&buffers);
            self.config
                .flush_count
                .is_some_and(|count| buffers.record_count() >= count)
        };

        if threshold_hit {
            // count-triggered flush errors propagate to the caller
            self.flush_inner().await?;
        }
        Ok(())
    }

    async fn ingest_chunk(&self, chunk: ArtifactChunk) -> Result<(), PolicyError> {
        self.ensure_open()?;
        self.stats.with(|s| s.chunks_received += 1);

        let threshold_hit = {
            let mut buffers = self.state.lock();
            buffers.buffer_bytes += chunk.estimated_size();
            buffers.chunks.push(chunk);
            self.sync_gauge(&buffers);
            self.config
                .flush_count
                .is_some_and(|count| buffers.record_count() >= count)
        };

        if threshold_hit {
            self.flush_inner().await?;
        }
        Ok(())
    }

    async fn flush(&self) -> Result<(), PolicyError> {
        self.ensure_open()?;
        self.flush_inner().await
    }

    async fn close(&self) -> Result<(), PolicyError> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.cancel.cancel();
        let task = self.interval_task.lock().take();
        if let Some(task) = task {
            let _ = task.await;
        }
        let result = self.flush_inner().await;
        self.client.close();
        result
    }

    fn stats(&self) -> PolicyStats {
        self.stats.snapshot()
    }
}
