use quarry_app_config::{ExecArgs, ExitCode};
use quarry_runtime::Handle;

/// Executor harness entry. Spawned by `quarry run`; reads the bootstrap
/// from stdin and writes frames on stdout.
///
/// The child-process contract has its own exit codes (0 success, 1 script
/// error, 2 crash, 3 config/version), distinct from the `run` subcommand's
/// mapping, so the process exits directly with the harness code. The sink
/// was flushed and shut down by the harness before it returned.
pub fn exec(args: ExecArgs, handle: Handle) -> Result<(), ExitCode> {
    let code = handle.block_on(quarry_executor::run_executor(&args.script));
    std::process::exit(code);
}
