use quarry_app_config::ExitCode;

const QUARRY_LOG_ENV: &str = "QUARRY_LOG";

/// Holds the logging backend for the process lifetime.
///
/// Records always go to stderr: the executor's stdout carries IPC frames
/// and must stay clean.
pub struct SetupGuard {
    _private: (),
}

impl SetupGuard {
    pub fn init() -> Result<SetupGuard, ExitCode> {
        env_logger::Builder::from_env(env_logger::Env::new().filter_or(QUARRY_LOG_ENV, "info"))
            .target(env_logger::Target::Stderr)
            .try_init()
            .map_err(|err| {
                eprintln!("Config Error: logger init failed: {err}");
                ExitCode::Config
            })?;
        Ok(SetupGuard { _private: () })
    }
}
