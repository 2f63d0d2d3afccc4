//! Per-run ingestion policies.
//!
//! A policy decides what happens between a decoded frame and the storage
//! client: written synchronously (strict), buffered with bounded memory and
//! droppable eviction (buffered), or buffered without bounds and flushed on
//! count/interval triggers (streaming).
//!
//! Droppability is identical across policies: `log`, `enqueue` and
//! `rotate_proxy` events may be discarded under pressure, everything else —
//! and every artifact chunk — must be persisted or fail the run.

mod buffered;
mod error;
mod stats;
mod streaming;
mod strict;

#[cfg(test)]
mod tests;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use quarry_store::StoreClient;
use quarry_types::{ArtifactChunk, EventEnvelope, PolicyStats};

pub use buffered::BufferedPolicy;
pub use error::PolicyError;
pub use streaming::StreamingPolicy;
pub use strict::StrictPolicy;

/// Estimated in-memory footprint of a buffered event: a fixed base plus a
/// factor per payload entry. Exactness is not required, only monotone
/// correctness.
pub(crate) fn event_estimated_size(envelope: &EventEnvelope) -> usize {
    256 + 64 * envelope.payload.len()
}

/// Common contract of all ingestion policies.
#[async_trait]
pub trait IngestPolicy: Send + Sync {
    /// Ingests one event. Non-droppable events are either durably buffered,
    /// written, or refused with an error; droppable events may be discarded.
    async fn ingest_event(&self, envelope: EventEnvelope) -> Result<(), PolicyError>;

    /// Ingests one artifact chunk. Chunks are never dropped.
    async fn ingest_chunk(&self, chunk: ArtifactChunk) -> Result<(), PolicyError>;

    /// Writes buffered records to storage.
    async fn flush(&self) -> Result<(), PolicyError>;

    /// Terminal flush, storage-client close and background-task release.
    /// Idempotent; the second call is a no-op.
    async fn close(&self) -> Result<(), PolicyError>;

    /// Deep-copy snapshot of the counters, taken under the same lock that
    /// serializes their mutation.
    fn stats(&self) -> PolicyStats;
}

/// How the buffered policy orders its flush stages and which buffers a
/// failed stage preserves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushMode {
    /// Chunks, then events; nothing is cleared on failure. Retries may
    /// duplicate records. The safest default.
    AtLeastOnce,
    /// Chunks first; a chunk failure preserves everything, an event failure
    /// preserves only events. Retries may duplicate events but not chunks.
    ChunksFirst,
    /// Events in two phases with commits deferred behind chunks; a retried
    /// flush never rewrites already-written primary events.
    TwoPhase,
}

impl std::str::FromStr for FlushMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "at_least_once" => Ok(FlushMode::AtLeastOnce),
            "chunks_first" => Ok(FlushMode::ChunksFirst),
            "two_phase" => Ok(FlushMode::TwoPhase),
            other => Err(format!(
                "unknown flush mode {other:?}; valid modes are \"at_least_once\", \
                 \"chunks_first\" and \"two_phase\", e.g. --flush-mode at_least_once"
            )),
        }
    }
}

/// Buffered policy knobs. At least one of `max_events`, `max_bytes` must be
/// positive; buffering chunks additionally requires `max_bytes > 0`.
#[derive(Debug, Clone, Copy)]
pub struct BufferedConfig {
    pub max_events: usize,
    pub max_bytes: usize,
    pub flush_mode: FlushMode,
}

impl BufferedConfig {
    pub fn validate(&self) -> Result<(), PolicyError> {
        if self.max_events == 0 && self.max_bytes == 0 {
            return Err(PolicyError::Config(
                "buffered policy requires at least one positive bound; \
                 pass --buffer-events <n> and/or --buffer-bytes <n>"
                    .to_owned(),
            ));
        }
        Ok(())
    }
}

/// Streaming policy knobs. At least one trigger must be configured.
#[derive(Debug, Clone, Copy)]
pub struct StreamingConfig {
    pub flush_count: Option<usize>,
    pub flush_interval: Option<Duration>,
}

impl StreamingConfig {
    pub fn validate(&self) -> Result<(), PolicyError> {
        let count_ok = self.flush_count.is_some_and(|n| n > 0);
        let interval_ok = self.flush_interval.is_some_and(|d| !d.is_zero());
        if !count_ok && !interval_ok {
            return Err(PolicyError::Config(
                "streaming policy requires a positive flush trigger; \
                 pass --flush-count <n> and/or --flush-interval <seconds>"
                    .to_owned(),
            ));
        }
        Ok(())
    }
}

/// Which policy a run uses, with its knobs.
#[derive(Debug, Clone, Copy)]
pub enum PolicyConfig {
    Strict,
    Buffered(BufferedConfig),
    Streaming(StreamingConfig),
}

/// Builds the configured policy over a per-run storage client.
///
/// Must be called from within the runtime: the streaming policy spawns its
/// interval task at construction.
pub fn build_policy(
    config: PolicyConfig,
    client: Arc<StoreClient>,
) -> Result<Arc<dyn IngestPolicy>, PolicyError> {
    match config {
        PolicyConfig::Strict => Ok(Arc::new(StrictPolicy::new(client))),
        PolicyConfig::Buffered(buffered) => {
            buffered.validate()?;
            Ok(Arc::new(BufferedPolicy::new(buffered, client)))
        }
        PolicyConfig::Streaming(streaming) => {
            streaming.validate()?;
            Ok(StreamingPolicy::spawn(streaming, client))
        }
    }
}
