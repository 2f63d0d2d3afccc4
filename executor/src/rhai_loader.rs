//! Hosts user scripts written in rhai.
//!
//! A script file defines a mandatory `run(ctx)` function and optional
//! lifecycle hooks (`prepare`, `before_run`, `after_run`, `on_error`,
//! `before_terminal`, `cleanup`). The emit API is registered as global
//! functions closing over the run's emit chain:
//!
//! ```rhai
//! fn run(ctx) {
//!     emit_item(#{ title: ctx.job.url });
//!     let id = emit_artifact("page.bin", "application/octet-stream", blob(4, 0x58));
//!     emit_run_complete(#{ count: 1 });
//! }
//! ```

use std::path::Path;
use std::sync::Arc;

use rhai::{Dynamic, Engine, EvalAltResult, Scope, AST};

use async_trait::async_trait;
use quarry_logger::debug;
use quarry_types::{JsonMap, RunMeta};

use crate::emit::{EmitHandle, StorageHandle};
use crate::error::{ScriptError, ScriptLoadError};
use crate::script::{PrepareAction, Script, ScriptContext, ScriptLoader};

/// Loads `.rhai` script files.
#[derive(Default)]
pub struct RhaiLoader;

impl RhaiLoader {
    pub fn new() -> Self {
        RhaiLoader
    }
}

impl ScriptLoader for RhaiLoader {
    fn load(&self, path: &Path) -> Result<Box<dyn Script>, ScriptLoadError> {
        let display = path.display().to_string();
        let source = std::fs::read_to_string(path).map_err(|source| ScriptLoadError::Io {
            path: display.clone(),
            source,
        })?;

        let engine = Engine::new();
        let ast = engine
            .compile(&source)
            .map_err(|err| ScriptLoadError::Compile {
                path: display.clone(),
                message: err.to_string(),
            })?;

        if !ast.iter_functions().any(|f| f.name == "run") {
            return Err(ScriptLoadError::MissingEntrypoint { path: display });
        }

        Ok(Box::new(RhaiScript {
            ast: Arc::new(ast),
            path: display,
        }))
    }
}

#[derive(Debug)]
struct RhaiScript {
    ast: Arc<AST>,
    path: String,
}

impl RhaiScript {
    /// Calls a script function on a blocking thread. `Ok(None)` means the
    /// function is not defined.
    async fn call_hook(
        &self,
        engine: Arc<Engine>,
        name: &'static str,
        args: Vec<Dynamic>,
    ) -> Result<Option<Dynamic>, ScriptError> {
        let ast = Arc::clone(&self.ast);
        let path = self.path.clone();
        let joined = tokio::task::spawn_blocking(move || {
            let mut scope = Scope::new();
            engine.call_fn::<Dynamic>(&mut scope, &ast, name, args)
        })
        .await;

        match joined {
            Err(join_err) => Err(ScriptError::new(format!(
                "script hook {name} panicked: {join_err}"
            ))
            .with_type("panic")),
            Ok(Ok(value)) => Ok(Some(value)),
            Ok(Err(err)) => match *err {
                // "name (arg types)" — match the function name exactly so a
                // missing helper inside the hook still surfaces as an error
                EvalAltResult::ErrorFunctionNotFound(ref signature, _)
                    if signature.split(' ').next() == Some(name) =>
                {
                    Ok(None)
                }
                ref other => Err(ScriptError::new(other.to_string())
                    .with_type("rhai_runtime")
                    .with_stack(format!("{path}: {:?}", other.position()))),
            },
        }
    }

    fn ctx_dynamic(ctx: &ScriptContext) -> Result<Dynamic, ScriptError> {
        let mut view = serde_json::Map::new();
        view.insert("job".to_owned(), serde_json::Value::Object(ctx.job.clone()));
        view.insert("run_id".to_owned(), serde_json::json!(ctx.run.run_id));
        view.insert("attempt".to_owned(), serde_json::json!(ctx.run.attempt));
        if let Some(job_id) = &ctx.run.job_id {
            view.insert("job_id".to_owned(), serde_json::json!(job_id));
        }
        if let Some(parent) = &ctx.run.parent_run_id {
            view.insert("parent_run_id".to_owned(), serde_json::json!(parent));
        }
        if let Some(endpoint) = ctx.browser.ws_endpoint() {
            view.insert("browser_ws_endpoint".to_owned(), serde_json::json!(endpoint));
        }
        rhai::serde::to_dynamic(serde_json::Value::Object(view))
            .map_err(|err| ScriptError::new(format!("context conversion failed: {err}")))
    }
}

#[async_trait]
impl Script for RhaiScript {
    async fn prepare(&self, job: &JsonMap, run: &RunMeta) -> Result<PrepareAction, ScriptError> {
        let engine = Arc::new(Engine::new());
        let job_arg = rhai::serde::to_dynamic(serde_json::Value::Object(job.clone()))
            .map_err(|err| ScriptError::new(format!("job conversion failed: {err}")))?;
        let run_arg = rhai::serde::to_dynamic(run)
            .map_err(|err| ScriptError::new(format!("run conversion failed: {err}")))?;

        match self.call_hook(engine, "prepare", vec![job_arg, run_arg]).await? {
            None => Ok(PrepareAction::Continue { job: None }),
            Some(value) => parse_prepare_action(value),
        }
    }

    async fn before_run(&self, ctx: &ScriptContext) -> Result<(), ScriptError> {
        let engine = Arc::new(api_engine(ctx));
        self.call_hook(engine, "before_run", vec![Self::ctx_dynamic(ctx)?])
            .await
            .map(|_| ())
    }

    async fn run(&self, ctx: &ScriptContext) -> Result<(), ScriptError> {
        let engine = Arc::new(api_engine(ctx));
        self.call_hook(engine, "run", vec![Self::ctx_dynamic(ctx)?])
            .await?
            .ok_or_else(|| ScriptError::new(format!("{} defines no run function", self.path)))?;
        Ok(())
    }

    async fn after_run(&self, ctx: &ScriptContext) -> Result<(), ScriptError> {
        let engine = Arc::new(api_engine(ctx));
        self.call_hook(engine, "after_run", vec![Self::ctx_dynamic(ctx)?])
            .await
            .map(|_| ())
    }

    async fn on_error(&self, ctx: &ScriptContext, error: &ScriptError) {
        let Ok(ctx_arg) = Self::ctx_dynamic(ctx) else {
            return;
        };
        let mut error_view = serde_json::Map::new();
        error_view.insert("message".to_owned(), serde_json::json!(error.message));
        if let Some(error_type) = &error.error_type {
            error_view.insert("error_type".to_owned(), serde_json::json!(error_type));
        }
        let Ok(error_arg) = rhai::serde::to_dynamic(serde_json::Value::Object(error_view)) else {
            return;
        };
        let engine = Arc::new(api_engine(ctx));
        if let Err(err) = self
            .call_hook(engine, "on_error", vec![ctx_arg, error_arg])
            .await
        {
            debug!("on_error hook failed: {err}");
        }
    }

    async fn before_terminal(&self, ctx: &ScriptContext) {
        let Ok(ctx_arg) = Self::ctx_dynamic(ctx) else {
            return;
        };
        let engine = Arc::new(api_engine(ctx));
        if let Err(err) = self.call_hook(engine, "before_terminal", vec![ctx_arg]).await {
            debug!("before_terminal hook failed: {err}");
        }
    }

    async fn cleanup(&self, ctx: &ScriptContext) {
        let Ok(ctx_arg) = Self::ctx_dynamic(ctx) else {
            return;
        };
        let engine = Arc::new(api_engine(ctx));
        if let Err(err) = self.call_hook(engine, "cleanup", vec![ctx_arg]).await {
            debug!("cleanup hook failed: {err}");
        }
    }
}

fn parse_prepare_action(value: Dynamic) -> Result<PrepareAction, ScriptError> {
    let invalid = || {
        ScriptError::new(
            "prepare must return #{ action: \"skip\", reason? } or \
             #{ action: \"continue\", job? }",
        )
        .with_type("invalid_prepare_result")
    };

    let json: serde_json::Value = rhai::serde::from_dynamic(&value).map_err(|_| invalid())?;
    let map = json.as_object().ok_or_else(invalid)?;
    match map.get("action").and_then(|v| v.as_str()) {
        Some("skip") => Ok(PrepareAction::Skip {
            reason: map
                .get("reason")
                .and_then(|v| v.as_str())
                .map(str::to_owned),
        }),
        Some("continue") => {
            let job = match map.get("job") {
                None | Some(serde_json::Value::Null) => None,
                Some(serde_json::Value::Object(job)) => Some(job.clone()),
                Some(_) => return Err(invalid()),
            };
            Ok(PrepareAction::Continue { job })
        }
        _ => Err(invalid()),
    }
}

/// Engine with the emit API registered over this run's emit chain. The
/// script executes on a blocking thread; each API call blocks on the async
/// emit future through the runtime handle.
fn api_engine(ctx: &ScriptContext) -> Engine {
    let mut engine = Engine::new();
    let handle = tokio::runtime::Handle::current();

    let register_map_emit = |engine: &mut Engine,
                             name: &str,
                             emit: EmitHandle,
                             handle: tokio::runtime::Handle,
                             kind: MapEmitKind| {
        engine.register_fn(name, move |payload: rhai::Map| -> RhaiUnit {
            let payload = json_map_from_rhai(payload)?;
            let result = match kind {
                MapEmitKind::Item => handle.block_on(emit.item(payload)),
                MapEmitKind::Checkpoint => handle.block_on(emit.checkpoint(payload)),
                MapEmitKind::Enqueue => handle.block_on(emit.enqueue(payload)),
                MapEmitKind::RotateProxy => handle.block_on(emit.rotate_proxy(payload)),
                MapEmitKind::RunComplete => handle.block_on(emit.run_complete(Some(payload))),
            };
            result.map_err(into_rhai_error)
        });
    };

    register_map_emit(&mut engine, "emit_item", ctx.emit.clone(), handle.clone(), MapEmitKind::Item);
    register_map_emit(
        &mut engine,
        "emit_checkpoint",
        ctx.emit.clone(),
        handle.clone(),
        MapEmitKind::Checkpoint,
    );
    register_map_emit(
        &mut engine,
        "emit_enqueue",
        ctx.emit.clone(),
        handle.clone(),
        MapEmitKind::Enqueue,
    );
    register_map_emit(
        &mut engine,
        "emit_rotate_proxy",
        ctx.emit.clone(),
        handle.clone(),
        MapEmitKind::RotateProxy,
    );
    register_map_emit(
        &mut engine,
        "emit_run_complete",
        ctx.emit.clone(),
        handle.clone(),
        MapEmitKind::RunComplete,
    );

    {
        let emit = ctx.emit.clone();
        let handle = handle.clone();
        engine.register_fn("emit_run_complete", move || -> RhaiUnit {
            handle.block_on(emit.run_complete(None)).map_err(into_rhai_error)
        });
    }
    {
        let emit = ctx.emit.clone();
        let handle = handle.clone();
        engine.register_fn("emit_run_error", move |message: String| -> RhaiUnit {
            handle
                .block_on(emit.run_error(&message, Some("script_raised")))
                .map_err(into_rhai_error)
        });
    }
    {
        let emit = ctx.emit.clone();
        let handle = handle.clone();
        engine.register_fn(
            "emit_log",
            move |level: String, message: String| -> RhaiUnit {
                handle
                    .block_on(emit.log(&level, &message))
                    .map_err(into_rhai_error)
            },
        );
    }
    {
        let emit = ctx.emit.clone();
        let handle = handle.clone();
        engine.register_fn(
            "emit_artifact",
            move |name: String, content_type: String, data: rhai::Blob| -> Result<String, Box<EvalAltResult>> {
                handle
                    .block_on(emit.artifact(&name, &content_type, data))
                    .map_err(into_rhai_error)
            },
        );
    }
    {
        let storage = StorageHandle::new(ctx.emit.clone());
        let handle = handle.clone();
        engine.register_fn(
            "storage_put",
            move |name: String, content_type: String, data: rhai::Blob| -> RhaiUnit {
                handle
                    .block_on(storage.put(&name, &content_type, data))
                    .map_err(into_rhai_error)
            },
        );
    }

    engine
}

type RhaiUnit = Result<(), Box<EvalAltResult>>;

#[derive(Clone, Copy)]
enum MapEmitKind {
    Item,
    Checkpoint,
    Enqueue,
    RotateProxy,
    RunComplete,
}

fn json_map_from_rhai(map: rhai::Map) -> Result<JsonMap, Box<EvalAltResult>> {
    let value: serde_json::Value = rhai::serde::from_dynamic(&Dynamic::from_map(map))
        .map_err(|err| -> Box<EvalAltResult> { err.to_string().into() })?;
    match value {
        serde_json::Value::Object(map) => Ok(map),
        _ => Err("payload must be a map".into()),
    }
}

fn into_rhai_error(err: crate::error::EmitError) -> Box<EvalAltResult> {
    err.to_string().into()
}
