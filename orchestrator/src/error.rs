use thiserror::Error;

use quarry_policy::PolicyError;
use quarry_protocol::CodecError;
use quarry_store::StoreError;

/// First failure latched while driving a run. The reconciler maps it onto
/// the run outcome.
#[derive(Error, Debug)]
pub enum RunFailure {
    /// An event carried a contract version other than the pinned one.
    #[error("contract version mismatch: executor sent {got:?}, orchestrator pins {pinned:?}")]
    VersionMismatch { got: String, pinned: String },

    /// A gap in the per-run event sequence.
    #[error("event seq gap: expected {expected}, got {got}")]
    SeqGap { expected: u64, got: u64 },

    /// A repeated or rewound per-run event sequence number.
    #[error("event seq duplicate: expected {expected}, got {got}")]
    SeqDuplicate { expected: u64, got: u64 },

    /// A broken per-artifact chunk sequence.
    #[error("chunk seq for artifact {artifact_id:?}: expected {expected}, got {got}")]
    ChunkSeq {
        artifact_id: String,
        expected: u64,
        got: u64,
    },

    /// A frame arrived where the protocol forbids it.
    #[error("protocol violation: {0}")]
    Protocol(String),

    /// The stream itself broke: oversized length prefix, truncation or a
    /// read error.
    #[error("frame stream failed: {0}")]
    Stream(#[from] CodecError),

    /// The ingestion policy refused or failed a record.
    #[error("policy failure: {0}")]
    Policy(#[from] PolicyError),

    /// A direct storage write (sidecar file) failed.
    #[error("storage failure: {0}")]
    Storage(#[from] StoreError),

    /// The executor child could not be spawned or fed.
    #[error("executor process failure: {0}")]
    Process(String),

    /// The run was cancelled from outside.
    #[error("run cancelled before completion")]
    Cancelled,
}
