use base64::Engine as _;
use serde::{Deserialize, Serialize};

use quarry_types::{ArtifactChunk, EventEnvelope, EventType, PolicyStats};

use crate::error::StoreError;

pub(crate) const KIND_EVENT: &str = "event";
pub(crate) const KIND_COMMIT: &str = "commit";
pub(crate) const KIND_CHUNK: &str = "chunk";

#[derive(Serialize)]
struct StoredEvent<'a> {
    record_kind: &'static str,
    #[serde(flatten)]
    envelope: &'a EventEnvelope,
}

#[derive(Serialize)]
struct StoredChunk<'a> {
    record_kind: &'static str,
    artifact_id: &'a str,
    seq: u64,
    is_last: bool,
    /// Byte offset of this chunk within the artifact, cumulative over all
    /// previously persisted chunks.
    offset: u64,
    length: u64,
    data_base64: String,
}

/// One metrics record per run, keyed to the run's partition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsRecord {
    pub record_kind: String,
    pub run_id: String,
    pub attempt: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_run_id: Option<String>,
    pub outcome: String,
    pub started_at_ms: u64,
    /// Start plus measured duration, never a second wall-clock read, so the
    /// record can't disagree with the `day` partition chosen at start.
    pub completed_at_ms: u64,
    pub stats: PolicyStats,
    pub malformed_frames: u64,
}

impl MetricsRecord {
    pub fn new(
        run_id: impl Into<String>,
        attempt: u32,
        outcome: impl Into<String>,
        started_at_ms: u64,
        duration_ms: u64,
        stats: PolicyStats,
    ) -> Self {
        MetricsRecord {
            record_kind: "metrics".to_owned(),
            run_id: run_id.into(),
            attempt,
            job_id: None,
            parent_run_id: None,
            outcome: outcome.into(),
            started_at_ms,
            completed_at_ms: started_at_ms + duration_ms,
            stats,
            malformed_frames: 0,
        }
    }
}

/// Serializes an event into its NDJSON line. Artifact commits carry
/// `record_kind: "commit"` so they can share the artifact partition with
/// chunk records.
pub(crate) fn event_line(envelope: &EventEnvelope) -> Result<String, StoreError> {
    let record_kind = if envelope.event_type == EventType::Artifact {
        KIND_COMMIT
    } else {
        KIND_EVENT
    };
    let mut line = serde_json::to_string(&StoredEvent {
        record_kind,
        envelope,
    })?;
    line.push('\n');
    Ok(line)
}

pub(crate) fn chunk_line(chunk: &ArtifactChunk, offset: u64) -> Result<String, StoreError> {
    let mut line = serde_json::to_string(&StoredChunk {
        record_kind: KIND_CHUNK,
        artifact_id: &chunk.artifact_id,
        seq: chunk.seq,
        is_last: chunk.is_last,
        offset,
        length: chunk.data.len() as u64,
        data_base64: base64::engine::general_purpose::STANDARD.encode(&chunk.data),
    })?;
    line.push('\n');
    Ok(line)
}

pub(crate) fn metrics_line(record: &MetricsRecord) -> Result<String, StoreError> {
    let mut line = serde_json::to_string(record)?;
    line.push('\n');
    Ok(line)
}
