use serde::{Deserialize, Serialize};
use std::fmt;

/// Opaque structured payload: a JSON object with string keys.
pub type JsonMap = serde_json::Map<String, serde_json::Value>;

/// Kind of a structured event emitted by a script.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    /// An extracted record.
    Item,
    /// Commit of an artifact previously streamed as chunks.
    Artifact,
    /// Script-defined progress marker.
    Checkpoint,
    /// Suggestion to schedule a child run.
    Enqueue,
    /// Request to rotate the upstream proxy.
    RotateProxy,
    /// Free-form log line.
    Log,
    /// Terminal event: the script failed.
    RunError,
    /// Terminal event: the script finished.
    RunComplete,
}

impl EventType {
    /// Whether a policy may discard this event under memory pressure.
    pub fn is_droppable(self) -> bool {
        matches!(self, EventType::Log | EventType::Enqueue | EventType::RotateProxy)
    }

    /// Whether this event ends the run's event sequence.
    pub fn is_terminal(self) -> bool {
        matches!(self, EventType::RunError | EventType::RunComplete)
    }

    /// The snake_case name used on the wire and in partition paths.
    pub fn as_str(self) -> &'static str {
        match self {
            EventType::Item => "item",
            EventType::Artifact => "artifact",
            EventType::Checkpoint => "checkpoint",
            EventType::Enqueue => "enqueue",
            EventType::RotateProxy => "rotate_proxy",
            EventType::Log => "log",
            EventType::RunError => "run_error",
            EventType::RunComplete => "run_complete",
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single structured message from the script.
///
/// Within one run, `seq` values are strictly increasing and contiguous from
/// 1, and exactly one terminal event ends the sequence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventEnvelope {
    /// IPC contract version pinned at build time.
    pub contract_version: String,
    /// Globally unique message id, assigned by the emitter.
    pub event_id: String,
    /// Run identity.
    pub run_id: String,
    /// Attempt number, `>= 1`.
    pub attempt: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_run_id: Option<String>,
    /// Event kind.
    #[serde(rename = "type")]
    pub event_type: EventType,
    /// RFC3339 UTC timestamp.
    pub ts: String,
    /// Monotonic per-run sequence number starting at 1.
    pub seq: u64,
    /// Opaque structured payload.
    #[serde(default)]
    pub payload: JsonMap,
}

impl EventEnvelope {
    /// The `artifact_id` payload field, present on artifact commit events.
    pub fn payload_artifact_id(&self) -> Option<&str> {
        self.payload.get("artifact_id").and_then(|v| v.as_str())
    }
}
