use serde::{Deserialize, Serialize};

use crate::{JsonMap, ProxySpec};

/// Immutable descriptor of one run. Created before process spawn, destroyed
/// with the run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunMeta {
    pub run_id: String,
    pub attempt: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_run_id: Option<String>,
}

impl RunMeta {
    /// Checks the structural invariants of the descriptor.
    pub fn validate(&self) -> Result<(), String> {
        if self.run_id.is_empty() {
            return Err("run_id must not be empty".to_owned());
        }
        if self.attempt < 1 {
            return Err(format!("attempt must be >= 1, got {}", self.attempt));
        }
        if self.attempt > 1 && self.parent_run_id.is_none() {
            return Err(format!(
                "parent_run_id is required when attempt > 1 (attempt = {})",
                self.attempt
            ));
        }
        Ok(())
    }
}

/// The JSON object the orchestrator writes to the child's stdin before
/// closing it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunBootstrap {
    pub contract_version: String,
    pub run_id: String,
    pub attempt: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_run_id: Option<String>,
    /// Job payload; must be a top-level JSON object.
    pub job: JsonMap,
    /// Proxy with credentials, when the run uses one. Never echoed back.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proxy: Option<ProxySpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub browser_ws_endpoint: Option<String>,
}

impl RunBootstrap {
    pub fn meta(&self) -> RunMeta {
        RunMeta {
            run_id: self.run_id.clone(),
            attempt: self.attempt,
            job_id: self.job_id.clone(),
            parent_run_id: self.parent_run_id.clone(),
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.contract_version.is_empty() {
            return Err("contract_version must not be empty".to_owned());
        }
        self.meta().validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta(attempt: u32, parent: Option<&str>) -> RunMeta {
        RunMeta {
            run_id: "run-1".to_owned(),
            attempt,
            job_id: None,
            parent_run_id: parent.map(str::to_owned),
        }
    }

    #[test]
    fn retry_requires_parent() {
        assert!(meta(1, None).validate().is_ok());
        assert!(meta(2, None).validate().is_err());
        assert!(meta(2, Some("run-0")).validate().is_ok());
    }

    #[test]
    fn zero_attempt_rejected() {
        assert!(meta(0, None).validate().is_err());
    }
}
