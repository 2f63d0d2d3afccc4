use std::sync::Arc;

use tokio::io::AsyncWrite;

use quarry_logger::{debug, warn};
use quarry_protocol::{RunResultFrame, RunResultOutcome};
use quarry_types::{EventType, JsonMap, OutcomeStatus, RunBootstrap};

use crate::browser::BrowserDriver;
use crate::emit::{start_emit, StorageHandle};
use crate::error::ScriptError;
use crate::script::{PrepareAction, Script, ScriptContext};
use crate::{EXIT_CRASH, EXIT_SCRIPT_ERROR, EXIT_SUCCESS};

/// Drives the loaded script through its lifecycle over the given sink
/// stream and returns the process exit code.
///
/// Hook order: `prepare`, `before_run`, `run`, `after_run`; `on_error` after
/// any failure; `before_terminal` before the harness settles the terminal
/// event; `cleanup` always. If the script emitted no terminal event itself,
/// the harness emits `run_error` (when something threw) or `run_complete`.
pub async fn run_lifecycle<W>(
    bootstrap: RunBootstrap,
    sink: W,
    script: Box<dyn Script>,
    driver: Arc<dyn BrowserDriver>,
) -> i32
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    let meta = bootstrap.meta();
    let proxy = bootstrap.proxy.clone();
    let (emit, writer) = start_emit(sink, meta.clone());

    let browser = match &bootstrap.browser_ws_endpoint {
        Some(endpoint) => driver.connect(endpoint, proxy.as_ref()).await,
        None => driver.launch(proxy.as_ref()).await,
    };
    let browser = match browser {
        Ok(session) => session,
        Err(err) => {
            eprintln!("quarry-executor: {err}");
            let _ = emit.shutdown().await;
            let _ = writer.await;
            return EXIT_CRASH;
        }
    };

    // prepare may skip the run or swap the job payload; anything else it
    // returns is a crash
    let mut job = bootstrap.job.clone();
    match script.prepare(&job, &meta).await {
        Ok(PrepareAction::Continue { job: override_job }) => {
            if let Some(override_job) = override_job {
                job = override_job;
            }
        }
        Ok(PrepareAction::Skip { reason }) => {
            let mut summary = JsonMap::new();
            summary.insert("skipped".to_owned(), serde_json::json!(true));
            if let Some(reason) = &reason {
                summary.insert("reason".to_owned(), serde_json::json!(reason));
            }
            let exit = match emit.run_complete(Some(summary)).await {
                Ok(()) => EXIT_SUCCESS,
                Err(err) => {
                    eprintln!("quarry-executor: skip emit failed: {err}");
                    EXIT_CRASH
                }
            };
            let ctx = ScriptContext {
                job,
                run: meta.clone(),
                emit: emit.clone(),
                storage: StorageHandle::new(emit.clone()),
                browser,
            };
            script.cleanup(&ctx).await;
            finish(&emit, exit, None, proxy.as_ref()).await;
            let _ = writer.await;
            ctx.browser.close().await;
            return exit;
        }
        Err(err) => {
            eprintln!("quarry-executor: prepare failed: {err}");
            let _ = emit.shutdown().await;
            let _ = writer.await;
            browser.close().await;
            return EXIT_CRASH;
        }
    }

    let ctx = ScriptContext {
        job,
        run: meta.clone(),
        emit: emit.clone(),
        storage: StorageHandle::new(emit.clone()),
        browser,
    };

    let mut script_err: Option<ScriptError> = None;
    if let Err(err) = script.before_run(&ctx).await {
        script_err = Some(err);
    }
    if script_err.is_none() {
        if let Err(err) = script.run(&ctx).await {
            script_err = Some(err);
        }
    }
    if script_err.is_none() {
        if let Err(err) = script.after_run(&ctx).await {
            script_err = Some(err);
        }
    }

    if let Some(err) = &script_err {
        debug!("script failed: {err}");
        script.on_error(&ctx, err).await;
    }
    script.before_terminal(&ctx).await;

    // settle the terminal event if the script did not emit one itself
    let status = emit.status().await.unwrap_or_default();
    if status.terminal.is_none() && status.sink_failed.is_none() {
        let result = match &script_err {
            Some(err) => emit.run_error(&err.message, err.error_type.as_deref()).await,
            None => emit.run_complete(None).await,
        };
        if let Err(err) = result {
            warn!("terminal emit failed: {err}");
        }
    }

    script.cleanup(&ctx).await;

    let status = emit.status().await.unwrap_or_default();
    let exit = if status.sink_failed.is_some() {
        EXIT_CRASH
    } else {
        match status.terminal {
            Some(EventType::RunComplete) => EXIT_SUCCESS,
            Some(_) => EXIT_SCRIPT_ERROR,
            None => EXIT_CRASH,
        }
    };

    finish(&emit, exit, script_err.as_ref(), proxy.as_ref()).await;
    let _ = writer.await;
    ctx.browser.close().await;
    exit
}

/// Writes the run-result control frame (proxy redacted) and drains the
/// sink. Skipped when the sink already failed.
async fn finish(
    emit: &crate::emit::EmitHandle,
    exit: i32,
    script_err: Option<&ScriptError>,
    proxy: Option<&quarry_types::ProxySpec>,
) {
    let status = emit.status().await.unwrap_or_default();
    if status.sink_failed.is_none() && status.terminal.is_some() {
        let outcome = match exit {
            EXIT_SUCCESS => RunResultOutcome {
                status: OutcomeStatus::Success,
                message: "run complete".to_owned(),
                error_type: None,
                stack: None,
            },
            EXIT_SCRIPT_ERROR => RunResultOutcome {
                status: OutcomeStatus::ScriptError,
                message: script_err
                    .map(|err| err.message.clone())
                    .unwrap_or_else(|| "script error".to_owned()),
                error_type: script_err.and_then(|err| err.error_type.clone()),
                stack: script_err.and_then(|err| err.stack.clone()),
            },
            _ => RunResultOutcome {
                status: OutcomeStatus::ExecutorCrash,
                message: "executor crash".to_owned(),
                error_type: None,
                stack: None,
            },
        };
        let frame = RunResultFrame {
            outcome,
            proxy_used: proxy.map(|p| p.redacted()),
        };
        if let Err(err) = emit.run_result(frame).await {
            warn!("run_result frame failed: {err}");
        }
    }
    if let Err(err) = emit.shutdown().await {
        debug!("sink shutdown failed: {err}");
    }
}
