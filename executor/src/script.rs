use std::path::Path;

use async_trait::async_trait;

use quarry_types::{JsonMap, RunMeta};

use crate::browser::BrowserSession;
use crate::emit::{EmitHandle, StorageHandle};
use crate::error::{ScriptError, ScriptLoadError};

/// What `prepare` decided about the run.
#[derive(Debug, Clone)]
pub enum PrepareAction {
    /// Do not run; the harness emits `run_complete` with a skipped summary.
    Skip { reason: Option<String> },
    /// Run, optionally with an overridden job payload.
    Continue { job: Option<JsonMap> },
}

/// Everything a running script can touch.
pub struct ScriptContext {
    pub job: JsonMap,
    pub run: RunMeta,
    pub emit: EmitHandle,
    pub storage: StorageHandle,
    pub browser: BrowserSession,
}

/// A loaded user script with its lifecycle hooks. Only `run` is mandatory.
#[async_trait]
pub trait Script: Send + Sync + std::fmt::Debug {
    async fn prepare(&self, _job: &JsonMap, _run: &RunMeta) -> Result<PrepareAction, ScriptError> {
        Ok(PrepareAction::Continue { job: None })
    }

    async fn before_run(&self, _ctx: &ScriptContext) -> Result<(), ScriptError> {
        Ok(())
    }

    async fn run(&self, ctx: &ScriptContext) -> Result<(), ScriptError>;

    async fn after_run(&self, _ctx: &ScriptContext) -> Result<(), ScriptError> {
        Ok(())
    }

    /// Best effort; called when the script or a hook failed.
    async fn on_error(&self, _ctx: &ScriptContext, _error: &ScriptError) {}

    /// Best effort; called right before the harness settles the terminal
    /// event.
    async fn before_terminal(&self, _ctx: &ScriptContext) {}

    /// Always called, even after failures.
    async fn cleanup(&self, _ctx: &ScriptContext) {}
}

/// Resolves a filesystem path into a runnable script. Load failures are
/// crash outcomes, never script errors.
pub trait ScriptLoader: Send + Sync {
    fn load(&self, path: &Path) -> Result<Box<dyn Script>, ScriptLoadError>;
}
