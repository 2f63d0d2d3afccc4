use quarry_protocol::RunResultFrame;
use quarry_types::{EventType, JsonMap, Outcome, OutcomeStatus};

use crate::error::RunFailure;

/// Maps the latched failure, terminal event and process exit code onto the
/// one outcome of the run.
pub(crate) fn reconcile(
    failure: Option<&RunFailure>,
    terminal: Option<EventType>,
    terminal_summary: Option<&JsonMap>,
    run_result: Option<&RunResultFrame>,
    exit_code: Option<i32>,
) -> Outcome {
    if let Some(failure) = failure {
        let status = match failure {
            RunFailure::VersionMismatch { .. } => OutcomeStatus::VersionMismatch,
            RunFailure::Policy(_) | RunFailure::Storage(_) => OutcomeStatus::PolicyFailure,
            _ => OutcomeStatus::ExecutorCrash,
        };
        return Outcome::new(status, failure.to_string());
    }

    let message = |fallback: &str| -> String {
        run_result
            .map(|result| result.outcome.message.clone())
            .unwrap_or_else(|| fallback.to_owned())
    };

    let mut outcome = match (terminal, exit_code) {
        (Some(EventType::RunComplete), Some(0)) => {
            Outcome::new(OutcomeStatus::Success, message("run complete"))
        }
        // the terminal event is authoritative when the process exits cleanly
        (Some(EventType::RunError), Some(0)) | (Some(EventType::RunError), Some(1)) => {
            Outcome::new(OutcomeStatus::ScriptError, message("script error"))
        }
        (Some(EventType::RunComplete), Some(code)) => Outcome::new(
            OutcomeStatus::ExecutorCrash,
            format!("run_complete was emitted but the executor exited with code {code}"),
        ),
        (None, Some(0)) => Outcome::new(
            OutcomeStatus::ExecutorCrash,
            "premature exit: the executor exited 0 without a terminal event".to_owned(),
        ),
        (_, Some(code)) => Outcome::new(
            OutcomeStatus::ExecutorCrash,
            format!("executor exited with code {code}"),
        ),
        (_, None) => Outcome::new(
            OutcomeStatus::ExecutorCrash,
            "executor was killed by a signal".to_owned(),
        ),
    };

    if outcome.status == OutcomeStatus::Success {
        outcome.summary = terminal_summary.cloned();
    }
    outcome
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_rows() {
        let cases = [
            (Some(EventType::RunComplete), Some(0), OutcomeStatus::Success),
            (Some(EventType::RunError), Some(1), OutcomeStatus::ScriptError),
            (Some(EventType::RunError), Some(0), OutcomeStatus::ScriptError),
            (Some(EventType::RunError), Some(2), OutcomeStatus::ExecutorCrash),
            (None, Some(2), OutcomeStatus::ExecutorCrash),
            (None, Some(0), OutcomeStatus::ExecutorCrash),
            (Some(EventType::RunComplete), Some(3), OutcomeStatus::ExecutorCrash),
            (None, None, OutcomeStatus::ExecutorCrash),
        ];
        for (terminal, exit_code, expected) in cases {
            let outcome = reconcile(None, terminal, None, None, exit_code);
            assert_eq!(outcome.status, expected, "{terminal:?} x {exit_code:?}");
        }
    }

    #[test]
    fn failures_take_precedence_over_exit_codes() {
        let failure = RunFailure::Policy(quarry_policy::PolicyError::BufferFull {
            reason: "x".to_owned(),
        });
        let outcome = reconcile(
            Some(&failure),
            Some(EventType::RunComplete),
            None,
            None,
            Some(0),
        );
        assert_eq!(outcome.status, OutcomeStatus::PolicyFailure);

        let mismatch = RunFailure::VersionMismatch {
            got: "quarry/0".to_owned(),
            pinned: "quarry/1".to_owned(),
        };
        let outcome = reconcile(Some(&mismatch), None, None, None, Some(0));
        assert_eq!(outcome.status, OutcomeStatus::VersionMismatch);
    }

    #[test]
    fn success_carries_the_terminal_summary() {
        let mut summary = JsonMap::new();
        summary.insert("count".to_owned(), serde_json::json!(2));
        let outcome = reconcile(
            None,
            Some(EventType::RunComplete),
            Some(&summary),
            None,
            Some(0),
        );
        assert_eq!(outcome.summary.expect("summary")["count"], 2);
    }
}
