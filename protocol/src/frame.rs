use serde::{Deserialize, Serialize};

use quarry_types::{
    validate_filename, ArtifactChunk, EventEnvelope, Outcome, OutcomeStatus, ProxySpec,
    MAX_CHUNK_BYTES, MAX_FILE_BYTES,
};

use crate::error::CodecError;

const TAG_ARTIFACT_CHUNK: &str = "artifact_chunk";
const TAG_RUN_RESULT: &str = "run_result";
const TAG_FILE_WRITE: &str = "file_write";

/// One decoded IPC frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    /// A structured event; participates in the per-run `seq` sequence.
    Event(EventEnvelope),
    /// Binary artifact data; sequenced per artifact, not per run.
    Chunk(ArtifactChunk),
    /// Control frame emitted once after the terminal event.
    RunResult(RunResultFrame),
    /// Sidecar file write; bypasses event sequencing and policy buffering.
    FileWrite(FileWriteFrame),
}

/// Outcome carried by the run-result control frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunResultOutcome {
    pub status: OutcomeStatus,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stack: Option<String>,
}

impl From<&Outcome> for RunResultOutcome {
    fn from(outcome: &Outcome) -> Self {
        RunResultOutcome {
            status: outcome.status,
            message: outcome.message.clone(),
            error_type: None,
            stack: None,
        }
    }
}

/// The run-result control frame. `proxy_used` must already be redacted by
/// the sender; redaction is a sender-side obligation enforced by the
/// executor harness and checked again by the orchestrator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunResultFrame {
    pub outcome: RunResultOutcome,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proxy_used: Option<ProxySpec>,
}

/// Sidecar file content, written outside the event sequence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileWriteFrame {
    pub filename: String,
    pub content_type: String,
    #[serde(with = "serde_bytes")]
    pub data: Vec<u8>,
}

// Explicit wire shapes carry the `type` tag; the borrowed fields keep
// encoding allocation-free up to the one output buffer.

#[derive(Serialize)]
struct ChunkWire<'a> {
    #[serde(rename = "type")]
    tag: &'static str,
    artifact_id: &'a str,
    seq: u64,
    is_last: bool,
    #[serde(with = "serde_bytes")]
    data: &'a [u8],
}

#[derive(Serialize)]
struct RunResultWire<'a> {
    #[serde(rename = "type")]
    tag: &'static str,
    outcome: &'a RunResultOutcome,
    #[serde(skip_serializing_if = "Option::is_none")]
    proxy_used: Option<&'a ProxySpec>,
}

#[derive(Serialize)]
struct FileWriteWire<'a> {
    #[serde(rename = "type")]
    tag: &'static str,
    filename: &'a str,
    content_type: &'a str,
    #[serde(with = "serde_bytes")]
    data: &'a [u8],
}

#[derive(Deserialize)]
struct TypeProbe {
    #[serde(rename = "type")]
    tag: String,
}

/// Serializes an event payload (without the length prefix).
pub(crate) fn encode_event(envelope: &EventEnvelope) -> Result<Vec<u8>, CodecError> {
    Ok(rmp_serde::to_vec_named(envelope)?)
}

pub(crate) fn encode_chunk(chunk: &ArtifactChunk) -> Result<Vec<u8>, CodecError> {
    check_data_len("chunk", chunk.data.len(), MAX_CHUNK_BYTES)?;
    Ok(rmp_serde::to_vec_named(&ChunkWire {
        tag: TAG_ARTIFACT_CHUNK,
        artifact_id: &chunk.artifact_id,
        seq: chunk.seq,
        is_last: chunk.is_last,
        data: &chunk.data,
    })?)
}

pub(crate) fn encode_run_result(result: &RunResultFrame) -> Result<Vec<u8>, CodecError> {
    Ok(rmp_serde::to_vec_named(&RunResultWire {
        tag: TAG_RUN_RESULT,
        outcome: &result.outcome,
        proxy_used: result.proxy_used.as_ref(),
    })?)
}

pub(crate) fn encode_file(file: &FileWriteFrame) -> Result<Vec<u8>, CodecError> {
    check_data_len("file", file.data.len(), MAX_FILE_BYTES)?;
    validate_filename(&file.filename).map_err(|reason| CodecError::InvalidFilename { reason })?;
    Ok(rmp_serde::to_vec_named(&FileWriteWire {
        tag: TAG_FILE_WRITE,
        filename: &file.filename,
        content_type: &file.content_type,
        data: &file.data,
    })?)
}

impl Frame {
    /// Serializes the frame payload (without the length prefix) as a
    /// self-describing MessagePack map.
    pub fn encode_payload(&self) -> Result<Vec<u8>, CodecError> {
        match self {
            Frame::Event(envelope) => encode_event(envelope),
            Frame::Chunk(chunk) => encode_chunk(chunk),
            Frame::RunResult(result) => encode_run_result(result),
            Frame::FileWrite(file) => encode_file(file),
        }
    }

    /// Decodes a frame payload. The `type` key of the payload map selects
    /// the frame kind; every remaining key must fit that kind's schema.
    pub fn decode_payload(payload: &[u8]) -> Result<Frame, CodecError> {
        let probe: TypeProbe =
            rmp_serde::from_slice(payload).map_err(|source| CodecError::InvalidPayload {
                kind: "untyped",
                source,
            })?;

        match probe.tag.as_str() {
            TAG_ARTIFACT_CHUNK => {
                let chunk: ArtifactChunk = rmp_serde::from_slice(payload).map_err(|source| {
                    CodecError::InvalidPayload {
                        kind: "artifact_chunk",
                        source,
                    }
                })?;
                check_data_len("chunk", chunk.data.len(), MAX_CHUNK_BYTES)?;
                if chunk.seq < 1 {
                    return Err(CodecError::InvalidPayload {
                        kind: "artifact_chunk",
                        source: invalid_value_error("chunk seq must start at 1"),
                    });
                }
                Ok(Frame::Chunk(chunk))
            }
            TAG_RUN_RESULT => {
                let result: RunResultFrame = rmp_serde::from_slice(payload).map_err(|source| {
                    CodecError::InvalidPayload {
                        kind: "run_result",
                        source,
                    }
                })?;
                Ok(Frame::RunResult(result))
            }
            TAG_FILE_WRITE => {
                let file: FileWriteFrame = rmp_serde::from_slice(payload).map_err(|source| {
                    CodecError::InvalidPayload {
                        kind: "file_write",
                        source,
                    }
                })?;
                check_data_len("file", file.data.len(), MAX_FILE_BYTES)?;
                validate_filename(&file.filename)
                    .map_err(|reason| CodecError::InvalidFilename { reason })?;
                Ok(Frame::FileWrite(file))
            }
            tag if is_event_tag(tag) => {
                let envelope: EventEnvelope =
                    rmp_serde::from_slice(payload).map_err(|source| CodecError::InvalidPayload {
                        kind: "event",
                        source,
                    })?;
                Ok(Frame::Event(envelope))
            }
            _ => Err(CodecError::UnknownTag { tag: probe.tag }),
        }
    }
}

fn is_event_tag(tag: &str) -> bool {
    matches!(
        tag,
        "item"
            | "artifact"
            | "checkpoint"
            | "enqueue"
            | "rotate_proxy"
            | "log"
            | "run_error"
            | "run_complete"
    )
}

fn check_data_len(kind: &'static str, got: usize, max: usize) -> Result<(), CodecError> {
    if got > max {
        return Err(CodecError::DataTooLarge { kind, got, max });
    }
    Ok(())
}

fn invalid_value_error(msg: &str) -> rmp_serde::decode::Error {
    use serde::de::Error as _;
    rmp_serde::decode::Error::custom(msg)
}
