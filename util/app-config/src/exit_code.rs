use quarry_types::OutcomeStatus;

/// Process exit status of the `quarry` binary.
///
/// 0 success, 1 script error, 2 executor crash or configuration error,
/// 3 policy failure or contract version mismatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitCode {
    Success,
    ScriptError,
    Failure,
    Config,
    Policy,
}

impl ExitCode {
    pub fn code(self) -> i32 {
        match self {
            ExitCode::Success => 0,
            ExitCode::ScriptError => 1,
            ExitCode::Failure | ExitCode::Config => 2,
            ExitCode::Policy => 3,
        }
    }
}

impl From<ExitCode> for i32 {
    fn from(exit_code: ExitCode) -> i32 {
        exit_code.code()
    }
}

impl From<OutcomeStatus> for ExitCode {
    fn from(status: OutcomeStatus) -> ExitCode {
        match status {
            OutcomeStatus::Success => ExitCode::Success,
            OutcomeStatus::ScriptError => ExitCode::ScriptError,
            OutcomeStatus::ExecutorCrash => ExitCode::Failure,
            OutcomeStatus::PolicyFailure | OutcomeStatus::VersionMismatch => ExitCode::Policy,
        }
    }
}

impl From<clap::Error> for ExitCode {
    fn from(err: clap::Error) -> ExitCode {
        let _ = err.print();
        ExitCode::Config
    }
}
