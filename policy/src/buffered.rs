use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use fail::fail_point;
use tokio::sync::Mutex;

use quarry_store::StoreClient;
use quarry_types::{ArtifactChunk, EventEnvelope, EventType, PolicyStats};

use crate::error::PolicyError;
use crate::stats::StatsCell;
use crate::{event_estimated_size, BufferedConfig, FlushMode, IngestPolicy};

#[derive(Default)]
struct BufferedState {
    primary: Vec<EventEnvelope>,
    /// Events arriving after a partial two-phase flush.
    secondary: Vec<EventEnvelope>,
    /// Artifact commits pulled out of the event buffers at flush time; they
    /// must trail the chunk write.
    deferred_commits: Vec<EventEnvelope>,
    chunks: Vec<ArtifactChunk>,
    buffer_bytes: usize,
    /// Primary events are already persisted by a partial two-phase flush.
    events_flushed: bool,
}

impl BufferedState {
    fn event_count(&self) -> usize {
        self.primary.len() + self.secondary.len() + self.deferred_commits.len()
    }

    // Full rescan after any clear or eviction, so the estimate cannot drift.
    fn recompute_bytes(&mut self) {
        self.buffer_bytes = self
            .primary
            .iter()
            .chain(self.secondary.iter())
            .chain(self.deferred_commits.iter())
            .map(event_estimated_size)
            .sum::<usize>()
            + self
                .chunks
                .iter()
                .map(ArtifactChunk::estimated_size)
                .sum::<usize>();
    }
}

/// Bounded in-memory buffering with droppable eviction and three flush
/// modes. One async mutex serializes every operation including the flush
/// I/O, so there is never more than one write in flight per policy.
pub struct BufferedPolicy {
    client: Arc<StoreClient>,
    config: BufferedConfig,
    stats: StatsCell,
    state: Mutex<BufferedState>,
    closed: AtomicBool,
}

impl BufferedPolicy {
    pub fn new(config: BufferedConfig, client: Arc<StoreClient>) -> Self {
        BufferedPolicy {
            client,
            config,
            stats: StatsCell::default(),
            state: Mutex::new(BufferedState::default()),
            closed: AtomicBool::new(false),
        }
    }

    fn ensure_open(&self) -> Result<(), PolicyError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(PolicyError::Closed);
        }
        Ok(())
    }

    fn fits(&self, state: &BufferedState, add_events: usize, add_bytes: usize) -> bool {
        if self.config.max_events > 0 && state.event_count() + add_events > self.config.max_events
        {
            return false;
        }
        if self.config.max_bytes > 0 && state.buffer_bytes + add_bytes > self.config.max_bytes {
            return false;
        }
        true
    }

    fn sync_gauge(&self, state: &BufferedState) {
        self.stats
            .with(|s| s.buffer_bytes = state.buffer_bytes as u64);
    }

    /// Evicts droppable events, oldest first, until the incoming record fits
    /// or no droppable event remains. After a partial two-phase flush the
    /// primary buffer is already persisted and is left alone.
    fn evict_droppable(&self, state: &mut BufferedState, add_events: usize, add_bytes: usize) {
        loop {
            if self.fits(state, add_events, add_bytes) {
                return;
            }
            let evicted = if !state.events_flushed {
                remove_first_droppable(&mut state.primary)
                    .or_else(|| remove_first_droppable(&mut state.secondary))
            } else {
                remove_first_droppable(&mut state.secondary)
            };
            match evicted {
                Some(event) => {
                    self.stats.with(|s| s.record_drop(event.event_type.as_str()));
                    state.recompute_bytes();
                    self.sync_gauge(state);
                }
                None => return,
            }
        }
    }

    async fn flush_locked(&self, state: &mut BufferedState) -> Result<(), PolicyError> {
        self.stats.with(|s| s.flush_count += 1);
        fail_point!("policy-flush", |_| {
            self.stats.with(|s| s.error_count += 1);
            Err(PolicyError::Store(quarry_store::StoreError::Write(
                "injected flush failure".to_owned(),
            )))
        });
        let result = match self.config.flush_mode {
            FlushMode::AtLeastOnce => self.flush_at_least_once(state).await,
            FlushMode::ChunksFirst => self.flush_chunks_first(state).await,
            FlushMode::TwoPhase => self.flush_two_phase(state).await,
        };
        state.recompute_bytes();
        self.sync_gauge(state);
        if result.is_err() {
            self.stats.with(|s| s.error_count += 1);
        }
        result
    }

    /// Chunks then events; a failure anywhere keeps every buffer intact, so
    /// the retry may duplicate records.
    async fn flush_at_least_once(&self, state: &mut BufferedState) -> Result<(), PolicyError> {
        if !state.chunks.is_empty() {
            self.client.write_chunks(&state.chunks).await?;
            self.stats
                .with(|s| s.chunks_persisted += state.chunks.len() as u64);
        }
        if !state.primary.is_empty() {
            self.client.write_events(&state.primary).await?;
            self.stats
                .with(|s| s.events_persisted += state.primary.len() as u64);
        }
        state.chunks.clear();
        state.primary.clear();
        Ok(())
    }

    /// Chunks first; once they are down they are cleared, so an event
    /// failure can only duplicate events.
    async fn flush_chunks_first(&self, state: &mut BufferedState) -> Result<(), PolicyError> {
        if !state.chunks.is_empty() {
            self.client.write_chunks(&state.chunks).await?;
            self.stats
                .with(|s| s.chunks_persisted += state.chunks.len() as u64);
            state.chunks.clear();
            state.recompute_bytes();
        }
        if !state.primary.is_empty() {
            self.client.write_events(&state.primary).await?;
            self.stats
                .with(|s| s.events_persisted += state.primary.len() as u64);
            state.primary.clear();
        }
        Ok(())
    }

    /// Primary events, then secondary events, then chunks, then the commit
    /// events deferred behind their chunks. `events_flushed` survives a
    /// chunk failure so the retried flush never rewrites the primary batch;
    /// only full success clears all buffers and resets the flag.
    async fn flush_two_phase(&self, state: &mut BufferedState) -> Result<(), PolicyError> {
        defer_commits(&mut state.primary, &mut state.deferred_commits);
        defer_commits(&mut state.secondary, &mut state.deferred_commits);

        if !state.events_flushed && !state.primary.is_empty() {
            self.client.write_events(&state.primary).await?;
            self.stats
                .with(|s| s.events_persisted += state.primary.len() as u64);
            state.events_flushed = true;
        }

        if !state.secondary.is_empty() {
            self.client.write_events(&state.secondary).await?;
            self.stats
                .with(|s| s.events_persisted += state.secondary.len() as u64);
            state.secondary.clear();
            state.recompute_bytes();
        }

        if !state.chunks.is_empty() {
            self.client.write_chunks(&state.chunks).await?;
            self.stats
                .with(|s| s.chunks_persisted += state.chunks.len() as u64);
            state.chunks.clear();
            state.recompute_bytes();
        }

        if !state.deferred_commits.is_empty() {
            self.client.write_events(&state.deferred_commits).await?;
            self.stats
                .with(|s| s.events_persisted += state.deferred_commits.len() as u64);
            state.deferred_commits.clear();
        }

        state.primary.clear();
        state.events_flushed = false;
        Ok(())
    }
}

fn remove_first_droppable(buffer: &mut Vec<EventEnvelope>) -> Option<EventEnvelope> {
    let index = buffer
        .iter()
        .position(|event| event.event_type.is_droppable())?;
    Some(buffer.remove(index))
}

fn defer_commits(buffer: &mut Vec<EventEnvelope>, deferred: &mut Vec<EventEnvelope>) {
    let mut rest = Vec::with_capacity(buffer.len());
    for event in buffer.drain(..) {
        if event.event_type == EventType::Artifact {
            deferred.push(event);
        } else {
            rest.push(event);
        }
    }
    *buffer = rest;
}

#[async_trait]
impl IngestPolicy for BufferedPolicy {
    async fn ingest_event(&self, envelope: EventEnvelope) -> Result<(), PolicyError> {
        self.ensure_open()?;
        self.stats.with(|s| s.events_received += 1);

        let estimate = event_estimated_size(&envelope);
        let mut state = self.state.lock().await;

        if !self.fits(&state, 1, estimate) {
            if envelope.event_type.is_droppable() {
                self.stats
                    .with(|s| s.record_drop(envelope.event_type.as_str()));
                return Ok(());
            }
            self.evict_droppable(&mut state, 1, estimate);
            if !self.fits(&state, 1, estimate) {
                // non-droppable records are never silently lost: drain the
                // buffers and try once more
                self.flush_locked(&mut state).await?;
                if !self.fits(&state, 1, estimate) {
                    self.stats.with(|s| s.error_count += 1);
                    return Err(PolicyError::BufferFull {
                        reason: format!(
                            "{} event of ~{estimate} bytes exceeds the configured buffer \
                             (max_events {}, max_bytes {})",
                            envelope.event_type, self.config.max_events, self.config.max_bytes
                        ),
                    });
                }
            }
        }

        let target = if self.config.flush_mode == FlushMode::TwoPhase && state.events_flushed {
            &mut state.secondary
        } else {
            &mut state.primary
        };
        target.push(envelope);
        state.buffer_bytes += estimate;
        self.sync_gauge(&state);
        Ok(())
    }

    async fn ingest_chunk(&self, chunk: ArtifactChunk) -> Result<(), PolicyError> {
        self.ensure_open()?;
        self.stats.with(|s| s.chunks_received += 1);

        if self.config.max_bytes == 0 {
            self.stats.with(|s| s.error_count += 1);
            return Err(PolicyError::BufferFull {
                reason: "buffering artifact chunks requires --buffer-bytes > 0".to_owned(),
            });
        }

        let estimate = chunk.estimated_size();
        let mut state = self.state.lock().await;

        if !self.fits(&state, 0, estimate) {
            self.flush_locked(&mut state).await?;
            if !self.fits(&state, 0, estimate) {
                self.stats.with(|s| s.error_count += 1);
                return Err(PolicyError::BufferFull {
                    reason: format!(
                        "chunk of ~{estimate} bytes exceeds the configured buffer \
                         (max_bytes {})",
                        self.config.max_bytes
                    ),
                });
            }
        }

        state.chunks.push(chunk);
        state.buffer_bytes += estimate;
        self.sync_gauge(&state);
        Ok(())
    }

    async fn flush(&self) -> Result<(), PolicyError> {
        self.ensure_open()?;
        let mut state = self.state.lock().await;
        self.flush_locked(&mut state).await
    }

    async fn close(&self) -> Result<(), PolicyError> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        let mut state = self.state.lock().await;
        let result = self.flush_locked(&mut state).await;
        self.client.close();
        result
    }

    fn stats(&self) -> PolicyStats {
        self.stats.snapshot()
    }
}
