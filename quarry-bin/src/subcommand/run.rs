use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use quarry_app_config::{ExitCode, RunArgs};
use quarry_fanout::{ChildRunner, FanoutOperator, ManagedBrowser};
use quarry_logger::{info, warn};
use quarry_orchestrator::{EnqueueObserver, ExecutorCommand, Orchestrator, RunConfig};
use quarry_policy::{build_policy, PolicyConfig};
use quarry_runtime::Handle;
use quarry_store::{build_operator, PartitionSpec, StoreClient};
use quarry_types::{Outcome, OutcomeStatus, RunMeta, WorkItem};

pub fn run(args: RunArgs, handle: Handle) -> Result<(), ExitCode> {
    handle.block_on(run_async(args))
}

async fn run_async(args: RunArgs) -> Result<(), ExitCode> {
    let cancel = quarry_stop_handler::new_child_token();
    let started_ms = quarry_systemtime::unix_time_as_millis();

    let op = build_operator(&args.backend).map_err(|err| {
        eprintln!("Config Error: {err}");
        ExitCode::Config
    })?;

    let executor = executor_command(&args.executor, &args.script).map_err(|err| {
        eprintln!("Config Error: {err}");
        ExitCode::Config
    })?;

    let partition = PartitionSpec::new(
        args.dataset.clone(),
        args.source.clone(),
        args.category.clone(),
        args.meta.run_id.clone(),
        started_ms,
    )
    .map_err(|err| {
        eprintln!("Config Error: {err}");
        ExitCode::Config
    })?;
    let client = Arc::new(StoreClient::new(op.clone(), partition));
    let policy = build_policy(args.policy, Arc::clone(&client)).map_err(|err| {
        eprintln!("Config Error: {err}");
        ExitCode::Config
    })?;

    let browser = ManagedBrowser::new(args.browser_ws_endpoint.clone());

    let mut config = RunConfig::new(args.meta.clone(), args.job.clone(), executor.clone());
    config.proxy = args.proxy.clone();
    config.browser_ws_endpoint = browser.ws_endpoint().map(str::to_owned);

    let outcome = if args.fanout.max_depth > 0 {
        let operator = FanoutOperator::new(args.fanout).map_err(|err| {
            eprintln!("Config Error: {err}");
            ExitCode::Config
        })?;
        let runner: Arc<dyn ChildRunner> = Arc::new(ChildRunFactory {
            op: op.clone(),
            dataset: args.dataset.clone(),
            source: args.source.clone(),
            category: args.category.clone(),
            policy: args.policy,
            executor,
            browser_ws_endpoint: browser.ws_endpoint().map(str::to_owned),
        });
        let workers = tokio::spawn(Arc::clone(&operator).execute(runner, cancel.clone()));

        let observer: Arc<dyn EnqueueObserver> = operator.clone();
        let orchestrator = Orchestrator::new(config, policy, client, Some(observer));
        let report = orchestrator.run(cancel.child_token()).await;

        operator.root_finished();
        let children = workers.await.unwrap_or_default();
        summarize_children(children.iter().map(|report| &report.outcome));

        report.outcome
    } else {
        let orchestrator = Orchestrator::new(config, policy, client, None);
        orchestrator.run(cancel.child_token()).await.outcome
    };

    browser.close();

    // the aggregate exit code follows the root outcome only
    match ExitCode::from(outcome.status) {
        ExitCode::Success => Ok(()),
        exit_code => {
            eprintln!("run failed ({}): {}", outcome.status, outcome.message);
            Err(exit_code)
        }
    }
}

fn executor_command(
    executor: &Option<PathBuf>,
    script: &std::path::Path,
) -> Result<ExecutorCommand, String> {
    let script = script.display().to_string();
    match executor {
        // a standalone executor binary implements the stdin/stdout contract
        // directly and receives the script path as its only flag
        Some(program) => Ok(ExecutorCommand {
            program: program.clone(),
            args: vec!["--script".to_owned(), script],
        }),
        None => {
            let program = std::env::current_exe()
                .map_err(|err| format!("cannot locate the quarry binary: {err}"))?;
            Ok(ExecutorCommand {
                program,
                args: vec!["exec".to_owned(), "--script".to_owned(), script],
            })
        }
    }
}

fn summarize_children<'a>(outcomes: impl Iterator<Item = &'a Outcome>) {
    let mut counts: BTreeMap<OutcomeStatus, usize> = BTreeMap::new();
    let mut total = 0;
    for outcome in outcomes {
        *counts.entry(outcome.status).or_insert(0) += 1;
        total += 1;
    }
    if total == 0 {
        info!("fan-out produced no child runs");
        return;
    }
    let summary: Vec<String> = counts
        .iter()
        .map(|(status, count)| format!("{status}: {count}"))
        .collect();
    info!("{total} child runs finished ({})", summary.join(", "));
}

/// Builds a fresh storage client, policy and orchestrator per admitted
/// child item. Only the storage operator and browser endpoint are shared.
struct ChildRunFactory {
    op: opendal::Operator,
    dataset: String,
    source: String,
    category: String,
    policy: PolicyConfig,
    executor: ExecutorCommand,
    browser_ws_endpoint: Option<String>,
}

#[async_trait]
impl ChildRunner for ChildRunFactory {
    async fn run(
        &self,
        item: WorkItem,
        observer: Arc<dyn EnqueueObserver>,
        cancel: CancellationToken,
    ) -> Outcome {
        let started_ms = quarry_systemtime::unix_time_as_millis();
        let run_id = child_run_id(&item.parent_run_id);
        let meta = RunMeta {
            run_id: run_id.clone(),
            attempt: 1,
            job_id: None,
            parent_run_id: Some(item.parent_run_id.clone()),
        };

        let partition = match PartitionSpec::new(
            self.dataset.clone(),
            item.source.clone().unwrap_or_else(|| self.source.clone()),
            item.category
                .clone()
                .unwrap_or_else(|| self.category.clone()),
            run_id.clone(),
            started_ms,
        ) {
            Ok(partition) => partition,
            Err(err) => {
                warn!("child {run_id}: invalid partition: {err}");
                return Outcome::new(OutcomeStatus::PolicyFailure, err.to_string());
            }
        };
        let client = Arc::new(StoreClient::new(self.op.clone(), partition));
        let policy = match build_policy(self.policy, Arc::clone(&client)) {
            Ok(policy) => policy,
            Err(err) => {
                warn!("child {run_id}: policy construction failed: {err}");
                return Outcome::new(OutcomeStatus::PolicyFailure, err.to_string());
            }
        };

        let executor = match child_executor(&self.executor, &item.target) {
            Ok(executor) => executor,
            Err(err) => {
                warn!("child {run_id}: {err}");
                return Outcome::new(OutcomeStatus::ExecutorCrash, err);
            }
        };

        let mut config = RunConfig::new(meta, item.params.clone(), executor);
        config.depth = item.depth;
        config.browser_ws_endpoint = self.browser_ws_endpoint.clone();

        let orchestrator = Orchestrator::new(config, policy, client, Some(observer));
        orchestrator.run(cancel).await.outcome
    }
}

/// Rewrites the executor invocation to point at the child's target script.
fn child_executor(template: &ExecutorCommand, target: &str) -> Result<ExecutorCommand, String> {
    if target.is_empty() {
        return Err("enqueue item has an empty target script".to_owned());
    }
    let mut command = template.clone();
    let Some(script_arg) = command
        .args
        .iter()
        .position(|arg| arg == "--script")
        .and_then(|flag| (flag + 1 < command.args.len()).then_some(flag + 1))
    else {
        return Err("executor command template carries no --script flag".to_owned());
    };
    command.args[script_arg] = target.to_owned();
    Ok(command)
}

fn child_run_id(parent: &str) -> String {
    let bytes: [u8; 6] = rand::random();
    format!("{parent}.{}", faster_hex::hex_string(&bytes))
}
