use serde::{Deserialize, Serialize};

use crate::JsonMap;

/// A child-run proposal produced by an `enqueue` event and consumed by the
/// fan-out workers. Depth of the root run is 0.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkItem {
    pub parent_run_id: String,
    pub depth: u32,
    /// Script target the child should run.
    pub target: String,
    /// Job payload handed to the child.
    #[serde(default)]
    pub params: JsonMap,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
}
