use thiserror::Error;

use quarry_store::StoreError;

/// Ingestion policy failures. Any of these terminates the run as a policy
/// failure unless the flush mode permits a buffered retry.
#[derive(Error, Debug)]
pub enum PolicyError {
    /// A non-droppable record could not be admitted: eviction freed too
    /// little and the inline flush did not help (or itself failed first).
    #[error("ingestion buffer is full: {reason}")]
    BufferFull { reason: String },

    /// The storage client refused or failed the write.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// The policy was closed.
    #[error("policy is closed")]
    Closed,

    /// Invalid policy configuration.
    #[error("invalid policy configuration: {0}")]
    Config(String),
}
