use serde::{Deserialize, Serialize};
use std::fmt;

use crate::JsonMap;

/// Terminal status of a run. Exactly one per run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeStatus {
    Success,
    ScriptError,
    ExecutorCrash,
    PolicyFailure,
    VersionMismatch,
}

impl fmt::Display for OutcomeStatus {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            OutcomeStatus::Success => "success",
            OutcomeStatus::ScriptError => "script_error",
            OutcomeStatus::ExecutorCrash => "executor_crash",
            OutcomeStatus::PolicyFailure => "policy_failure",
            OutcomeStatus::VersionMismatch => "version_mismatch",
        };
        f.write_str(name)
    }
}

/// Terminal status plus a human message and an optional structured summary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Outcome {
    pub status: OutcomeStatus,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<JsonMap>,
}

impl Outcome {
    pub fn new(status: OutcomeStatus, message: impl Into<String>) -> Self {
        Outcome {
            status,
            message: message.into(),
            summary: None,
        }
    }

    pub fn with_summary(mut self, summary: JsonMap) -> Self {
        self.summary = Some(summary);
        self
    }

    pub fn is_success(&self) -> bool {
        self.status == OutcomeStatus::Success
    }
}
