use thiserror::Error;

/// Frame encode/decode failures.
///
/// Decoding distinguishes fatal errors (the length prefix itself is violated,
/// so frame boundaries can no longer be trusted) from recoverable ones
/// (payload is malformed but the stream is still correctly framed).
#[derive(Error, Debug)]
pub enum CodecError {
    /// Length prefix exceeds the frame limit. Fatal.
    #[error("frame length {length} exceeds the {max} byte limit")]
    Oversized { length: usize, max: usize },

    /// Stream ended in the middle of a frame. Fatal.
    #[error("stream ended inside a frame, {needed} more bytes expected")]
    Truncated { needed: usize },

    /// Underlying read failed. Fatal.
    #[error("frame read failed: {0}")]
    Io(#[from] std::io::Error),

    /// The payload's `type` key is missing or unrecognized. Recoverable.
    #[error("unknown frame type tag {tag:?}")]
    UnknownTag { tag: String },

    /// The payload does not match the schema of its frame kind. Recoverable.
    #[error("malformed {kind} frame: {source}")]
    InvalidPayload {
        kind: &'static str,
        #[source]
        source: rmp_serde::decode::Error,
    },

    /// Chunk or file data exceeds the per-record limit. Recoverable.
    #[error("{kind} data is {got} bytes, limit {max}")]
    DataTooLarge {
        kind: &'static str,
        got: usize,
        max: usize,
    },

    /// Sidecar filename escapes the flat files namespace. Recoverable.
    #[error("invalid sidecar filename: {reason}")]
    InvalidFilename { reason: String },

    /// Frame serialization failed.
    #[error("frame encode failed: {0}")]
    Encode(#[from] rmp_serde::encode::Error),
}

impl CodecError {
    /// Whether the stream must be abandoned after this error.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            CodecError::Oversized { .. } | CodecError::Truncated { .. } | CodecError::Io(_)
        )
    }
}

/// Framed sink failures.
#[derive(Error, Debug)]
pub enum SinkError {
    /// The stream ended, closed, or errored before the write completed.
    #[error("stream closed before the write completed: {reason}")]
    StreamClosed { reason: String },

    /// The frame could not be serialized.
    #[error("frame encode failed: {0}")]
    Encode(#[from] CodecError),
}

impl From<std::io::Error> for SinkError {
    fn from(err: std::io::Error) -> Self {
        SinkError::StreamClosed {
            reason: err.to_string(),
        }
    }
}
