use serde::{Deserialize, Serialize};

/// Binary data for a single artifact, streamed as an ordered chunk sequence.
///
/// Exactly one chunk per artifact carries `is_last = true` and it is the
/// final chunk. Chunks are never droppable and must be persisted before the
/// commit event for the same `artifact_id`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactChunk {
    pub artifact_id: String,
    /// Monotonic per-artifact sequence number starting at 1.
    pub seq: u64,
    pub is_last: bool,
    #[serde(with = "serde_bytes")]
    pub data: Vec<u8>,
}

impl ArtifactChunk {
    /// Rough in-memory footprint used for buffer accounting.
    pub fn estimated_size(&self) -> usize {
        self.data.len() + self.artifact_id.len() + 64
    }
}
