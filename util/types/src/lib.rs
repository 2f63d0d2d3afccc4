//! Core data model shared across the quarry crates.

mod chunk;
mod envelope;
mod outcome;
mod proxy;
mod run;
mod stats;
mod work;

pub use chunk::ArtifactChunk;
pub use envelope::{EventEnvelope, EventType, JsonMap};
pub use outcome::{Outcome, OutcomeStatus};
pub use proxy::ProxySpec;
pub use run::{RunBootstrap, RunMeta};
pub use stats::PolicyStats;
pub use work::WorkItem;

/// Version of the orchestrator/executor IPC contract. Pinned at build time;
/// both sides refuse to talk across a mismatch.
pub const CONTRACT_VERSION: &str = "quarry/1";

/// Hard cap on a whole wire frame, length prefix included.
pub const MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

/// Hard cap on a frame payload (frame minus the 4-byte length prefix).
pub const MAX_FRAME_PAYLOAD: usize = MAX_FRAME_SIZE - 4;

/// Hard cap on a single artifact chunk's data.
pub const MAX_CHUNK_BYTES: usize = 8 * 1024 * 1024;

/// Hard cap on a sidecar file's data.
pub const MAX_FILE_BYTES: usize = 8 * 1024 * 1024;

/// Returns an error string when `name` is not usable as a flat sidecar file
/// name. Rejects empty names, path separators and parent-dir traversal.
pub fn validate_filename(name: &str) -> Result<(), String> {
    if name.is_empty() {
        return Err("filename must not be empty".to_owned());
    }
    if name.contains('/') || name.contains('\\') {
        return Err(format!(
            "filename {name:?} must not contain path separators"
        ));
    }
    if name.contains("..") {
        return Err(format!("filename {name:?} must not contain '..'"));
    }
    Ok(())
}
