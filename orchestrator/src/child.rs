use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::process::{Child, ChildStderr, ChildStdout, Command};

use quarry_logger::{debug, warn};
use quarry_types::RunBootstrap;

use crate::error::RunFailure;

/// How the executor child is invoked.
#[derive(Debug, Clone)]
pub struct ExecutorCommand {
    pub program: PathBuf,
    pub args: Vec<String>,
}

/// Spawns the executor with piped stdio, writes the bootstrap JSON to its
/// stdin and closes the pipe.
pub(crate) async fn spawn_executor(
    command: &ExecutorCommand,
    bootstrap: &RunBootstrap,
) -> Result<(Child, ChildStdout, ChildStderr), RunFailure> {
    let mut child = Command::new(&command.program)
        .args(&command.args)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|err| {
            RunFailure::Process(format!(
                "failed to spawn executor {:?}: {err}",
                command.program
            ))
        })?;

    let mut stdin = child
        .stdin
        .take()
        .ok_or_else(|| RunFailure::Process("executor stdin pipe missing".to_owned()))?;
    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| RunFailure::Process("executor stdout pipe missing".to_owned()))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| RunFailure::Process("executor stderr pipe missing".to_owned()))?;

    let payload = serde_json::to_vec(bootstrap)
        .map_err(|err| RunFailure::Process(format!("bootstrap serialization failed: {err}")))?;
    stdin
        .write_all(&payload)
        .await
        .map_err(|err| RunFailure::Process(format!("writing bootstrap to stdin failed: {err}")))?;
    stdin
        .shutdown()
        .await
        .map_err(|err| RunFailure::Process(format!("closing executor stdin failed: {err}")))?;
    drop(stdin);

    debug!(
        "spawned executor {:?} for run {}",
        command.program, bootstrap.run_id
    );
    Ok((child, stdout, stderr))
}

/// Asks the child to terminate, escalating to a forced kill after the grace
/// period. The caller still owns the final `wait`.
pub(crate) async fn terminate(child: &mut Child, grace: Duration) {
    #[cfg(unix)]
    {
        if let Some(pid) = child.id() {
            let pid = nix::unistd::Pid::from_raw(pid as i32);
            if let Err(err) = nix::sys::signal::kill(pid, nix::sys::signal::Signal::SIGTERM) {
                debug!("SIGTERM to executor failed: {err}");
            }
        }
    }

    let deadline = tokio::time::Instant::now() + grace;
    loop {
        match child.try_wait() {
            Ok(Some(_)) => return,
            Ok(None) => {}
            Err(err) => {
                warn!("try_wait on executor failed: {err}");
                break;
            }
        }
        if tokio::time::Instant::now() >= deadline {
            break;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    if let Err(err) = child.start_kill() {
        debug!("kill on executor failed (may have exited): {err}");
    }
}
