//! Executor harness.
//!
//! Runs inside the child process the orchestrator spawns. It reads the run
//! bootstrap from stdin, loads the user script, drives the lifecycle hooks,
//! serializes every emit through one FIFO writer onto stdout, enforces
//! "no events after terminal", and exits with a code the orchestrator
//! reconciles against the frames it saw.

mod browser;
mod emit;
mod error;
mod harness;
mod rhai_loader;
mod script;
#[cfg(unix)]
mod stdout_guard;

#[cfg(test)]
mod tests;

use std::path::Path;
use std::sync::Arc;

use tokio::io::AsyncReadExt;

use quarry_logger::error;
use quarry_types::{RunBootstrap, CONTRACT_VERSION};

pub use browser::{BrowserDriver, BrowserError, BrowserSession, NullDriver};
pub use emit::{EmitHandle, EmitStatus, StorageHandle};
pub use error::{EmitError, ScriptError, ScriptLoadError};
pub use harness::run_lifecycle;
pub use rhai_loader::RhaiLoader;
pub use script::{PrepareAction, Script, ScriptContext, ScriptLoader};

/// Process exit codes of the executor.
pub const EXIT_SUCCESS: i32 = 0;
pub const EXIT_SCRIPT_ERROR: i32 = 1;
pub const EXIT_CRASH: i32 = 2;
pub const EXIT_CONFIG: i32 = 3;

/// Full executor entry: bootstrap from stdin, stdout guard, rhai loader,
/// null browser driver. Returns the process exit code.
pub async fn run_executor(script_path: &Path) -> i32 {
    let bootstrap = match read_bootstrap().await {
        Ok(bootstrap) => bootstrap,
        Err(message) => {
            error!("invalid run bootstrap: {message}");
            eprintln!("quarry-executor: invalid run bootstrap: {message}");
            return EXIT_CONFIG;
        }
    };

    let loader = RhaiLoader::new();
    let script = match loader.load(script_path) {
        Ok(script) => script,
        Err(err) => {
            eprintln!("quarry-executor: script load failed: {err}");
            return EXIT_CRASH;
        }
    };

    #[cfg(unix)]
    {
        let sink = match stdout_guard::install() {
            Ok(sink) => sink,
            Err(err) => {
                eprintln!("quarry-executor: stdout guard install failed: {err}");
                return EXIT_CRASH;
            }
        };
        run_lifecycle(bootstrap, sink, script, Arc::new(NullDriver)).await
    }
    #[cfg(not(unix))]
    {
        run_lifecycle(bootstrap, tokio::io::stdout(), script, Arc::new(NullDriver)).await
    }
}

async fn read_bootstrap() -> Result<RunBootstrap, String> {
    let mut raw = Vec::new();
    tokio::io::stdin()
        .read_to_end(&mut raw)
        .await
        .map_err(|err| format!("reading stdin failed: {err}"))?;
    let bootstrap: RunBootstrap = serde_json::from_slice(&raw).map_err(|err| {
        format!("bootstrap must be a single top-level JSON object: {err}")
    })?;
    bootstrap.validate()?;
    if bootstrap.contract_version != CONTRACT_VERSION {
        return Err(format!(
            "contract version mismatch: orchestrator sent {:?}, this executor pins {:?}",
            bootstrap.contract_version, CONTRACT_VERSION
        ));
    }
    Ok(bootstrap)
}
