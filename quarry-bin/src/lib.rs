//! Quarry executable wiring.
//!
//! This crate exists to keep the root binary thin: argument parsing, logger
//! setup, runtime construction and subcommand dispatch live here.

mod setup_guard;
mod subcommand;

use std::time::Duration;

use quarry_app_config::cli::{basic_app, CMD_EXEC, CMD_RUN};
use quarry_app_config::{ExecArgs, ExitCode, RunArgs};
use quarry_build_info::Version;
use quarry_runtime::new_global_runtime;
use setup_guard::SetupGuard;

const RUNTIME_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(1);

/// The executable main entry.
///
/// Returns `Ok` when the process exits normally; otherwise the [`ExitCode`]
/// becomes the process exit status.
pub fn run_app(version: Version) -> Result<(), ExitCode> {
    let long = version.long();
    let short = version.short();
    let matches = basic_app()
        .version(short)
        .long_version(long)
        .get_matches();

    let _guard = SetupGuard::init()?;

    let (handle, runtime) = new_global_runtime();
    let ret = match matches.subcommand() {
        Some((CMD_RUN, sub_matches)) => {
            quarry_stop_handler::register_ctrlc_handler();
            let args = RunArgs::from_matches(sub_matches)?;
            subcommand::run(args, handle)
        }
        Some((CMD_EXEC, sub_matches)) => {
            let args = ExecArgs::from_matches(sub_matches)?;
            subcommand::exec(args, handle)
        }
        _ => unreachable!("clap requires a known subcommand"),
    };
    runtime.shutdown_timeout(RUNTIME_SHUTDOWN_TIMEOUT);
    ret
}
