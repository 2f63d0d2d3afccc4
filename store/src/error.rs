use thiserror::Error;

/// Storage client failures.
#[derive(Error, Debug)]
pub enum StoreError {
    /// The underlying backend write failed. Client state is left unchanged,
    /// so a retry recomputes the same offsets.
    #[error("storage write failed: {0}")]
    Write(String),

    /// An artifact commit event arrived before any chunk for its
    /// `artifact_id` was persisted by this client.
    #[error("artifact commit for {artifact_id:?} arrived before its chunks were persisted")]
    CommitWithoutChunks { artifact_id: String },

    /// An artifact commit event carries no `artifact_id` payload field.
    #[error("artifact commit event {event_id} has no artifact_id in its payload")]
    MissingArtifactId { event_id: String },

    /// Record serialization failed.
    #[error("record serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),

    /// The client was closed.
    #[error("storage client is closed")]
    Closed,

    /// Sidecar file name or size violates the flat-files contract.
    #[error("invalid sidecar file {name:?}: {reason}")]
    InvalidFile { name: String, reason: String },

    /// Invalid backend or partition configuration.
    #[error("invalid storage configuration: {0}")]
    Config(String),
}

impl From<opendal::Error> for StoreError {
    fn from(err: opendal::Error) -> Self {
        StoreError::Write(err.to_string())
    }
}
