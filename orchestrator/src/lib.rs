//! Drives a single run.
//!
//! The orchestrator spawns the executor child with piped stdio, writes the
//! bootstrap JSON, then concurrently decodes stdout frames, drains stderr
//! and waits for exit. Decoded frames are validated (contract version,
//! contiguous event seq, per-artifact chunk seq, terminal uniqueness) and
//! handed to the ingestion policy; the terminal event, the run-result frame
//! and the process exit code are reconciled into the run's one outcome.

mod child;
mod error;
mod reconcile;
mod router;


use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::ChildStderr;
use tokio_util::sync::CancellationToken;

use quarry_logger::{debug, info, warn};
use quarry_policy::IngestPolicy;
use quarry_protocol::FramedReader;
use quarry_store::{MetricsRecord, StoreClient};
use quarry_types::{
    JsonMap, Outcome, PolicyStats, ProxySpec, RunBootstrap, RunMeta, WorkItem, CONTRACT_VERSION,
};

pub use child::ExecutorCommand;
pub use error::RunFailure;

use error::RunFailure as Failure;
use reconcile::reconcile;
use router::FrameRouter;

const STDERR_TAIL_BYTES: usize = 64 * 1024;

/// Receives child-run proposals carried by `enqueue` events, before they are
/// ingested as ordinary droppable events. The fan-out operator implements
/// this; admission decisions stay on its side.
pub trait EnqueueObserver: Send + Sync {
    fn on_enqueue(&self, item: WorkItem);
}

/// Static configuration of one run.
#[derive(Debug, Clone)]
pub struct RunConfig {
    pub meta: RunMeta,
    pub job: JsonMap,
    pub executor: ExecutorCommand,
    pub proxy: Option<ProxySpec>,
    pub browser_ws_endpoint: Option<String>,
    /// Fan-out depth of this run; the root run is 0.
    pub depth: u32,
    /// How long a signalled child may linger before the forced kill.
    pub grace_period: Duration,
}

impl RunConfig {
    pub fn new(meta: RunMeta, job: JsonMap, executor: ExecutorCommand) -> Self {
        RunConfig {
            meta,
            job,
            executor,
            proxy: None,
            browser_ws_endpoint: None,
            depth: 0,
            grace_period: Duration::from_secs(5),
        }
    }
}

/// Everything the caller learns about a finished run.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub outcome: Outcome,
    pub stats: PolicyStats,
    pub exit_code: Option<i32>,
    pub malformed_frames: u64,
    pub stderr_tail: String,
    pub started_at_ms: u64,
    pub duration_ms: u64,
}

/// One orchestrator instance drives exactly one run and is consumed by it.
pub struct Orchestrator {
    config: RunConfig,
    policy: Arc<dyn IngestPolicy>,
    client: Arc<StoreClient>,
    observer: Option<Arc<dyn EnqueueObserver>>,
}

impl Orchestrator {
    pub fn new(
        config: RunConfig,
        policy: Arc<dyn IngestPolicy>,
        client: Arc<StoreClient>,
        observer: Option<Arc<dyn EnqueueObserver>>,
    ) -> Self {
        Orchestrator {
            config,
            policy,
            client,
            observer,
        }
    }

    /// Runs to completion. Cancelling the token terminates the child
    /// (signal, then forced kill after the grace period) and reconciles
    /// whatever was observed so far.
    pub async fn run(self, cancel: CancellationToken) -> RunReport {
        let started_at_ms = quarry_systemtime::unix_time_as_millis();
        let started = Instant::now();

        let bootstrap = RunBootstrap {
            contract_version: CONTRACT_VERSION.to_owned(),
            run_id: self.config.meta.run_id.clone(),
            attempt: self.config.meta.attempt,
            job_id: self.config.meta.job_id.clone(),
            parent_run_id: self.config.meta.parent_run_id.clone(),
            job: self.config.job.clone(),
            proxy: self.config.proxy.clone(),
            browser_ws_endpoint: self.config.browser_ws_endpoint.clone(),
        };

        let mut router = FrameRouter::new(
            self.config.meta.clone(),
            self.config.depth,
            Arc::clone(&self.policy),
            Arc::clone(&self.client),
            self.observer.clone(),
        );

        let mut failure: Option<Failure> = None;
        let mut exit_code: Option<i32> = None;
        let mut malformed_frames = 0;
        let mut stderr_tail = String::new();

        match child::spawn_executor(&self.config.executor, &bootstrap).await {
            Err(err) => failure = Some(err),
            Ok((mut child, stdout, stderr)) => {
                let stderr_task = tokio::spawn(drain_stderr(stderr));
                let mut reader = FramedReader::new(stdout);

                loop {
                    tokio::select! {
                        _ = cancel.cancelled() => {
                            failure.get_or_insert(Failure::Cancelled);
                            child::terminate(&mut child, self.config.grace_period).await;
                            break;
                        }
                        next = reader.next_frame() => match next {
                            Ok(Some(frame)) => {
                                if let Err(err) = router.route(frame).await {
                                    warn!("run {} aborted: {err}", self.config.meta.run_id);
                                    failure.get_or_insert(err);
                                    child::terminate(&mut child, self.config.grace_period).await;
                                    break;
                                }
                            }
                            Ok(None) => break,
                            Err(err) if !err.is_fatal() => {
                                warn!(
                                    "run {}: dropped malformed frame: {err}",
                                    self.config.meta.run_id
                                );
                            }
                            Err(err) => {
                                failure.get_or_insert(Failure::Stream(err));
                                child::terminate(&mut child, self.config.grace_period).await;
                                break;
                            }
                        }
                    }
                }
                malformed_frames = reader.malformed_frames();

                exit_code = tokio::select! {
                    status = child.wait() => status.ok().and_then(|s| s.code()),
                    _ = tokio::time::sleep(self.config.grace_period) => {
                        warn!(
                            "run {}: executor lingered after stream end, killing",
                            self.config.meta.run_id
                        );
                        let _ = child.start_kill();
                        child.wait().await.ok().and_then(|s| s.code())
                    }
                };
                stderr_tail = stderr_task.await.unwrap_or_default();
            }
        }

        // terminal flush; a failure here still fails the run
        if let Err(err) = self.policy.close().await {
            warn!(
                "run {}: policy close failed: {err}",
                self.config.meta.run_id
            );
            failure.get_or_insert(Failure::Policy(err));
        }

        let outcome = reconcile(
            failure.as_ref(),
            router.terminal(),
            router.terminal_summary(),
            router.run_result(),
            exit_code,
        );
        let stats = self.policy.stats();
        let duration_ms = started.elapsed().as_millis() as u64;

        self.client.close();
        let mut metrics = MetricsRecord::new(
            self.config.meta.run_id.clone(),
            self.config.meta.attempt,
            outcome.status.to_string(),
            started_at_ms,
            duration_ms,
            stats.clone(),
        );
        metrics.job_id = self.config.meta.job_id.clone();
        metrics.parent_run_id = self.config.meta.parent_run_id.clone();
        metrics.malformed_frames = malformed_frames;
        if let Err(err) = self.client.write_metrics(&metrics).await {
            warn!(
                "run {}: metrics record write failed: {err}",
                self.config.meta.run_id
            );
        }

        info!(
            "run {} finished: {} ({} events persisted, {} dropped)",
            self.config.meta.run_id, outcome.status, stats.events_persisted, stats.events_dropped
        );

        RunReport {
            outcome,
            stats,
            exit_code,
            malformed_frames,
            stderr_tail,
            started_at_ms,
            duration_ms,
        }
    }
}

/// Collects the trailing 64 KiB of the child's stderr for diagnostics.
async fn drain_stderr(stderr: ChildStderr) -> String {
    let mut lines = BufReader::new(stderr).lines();
    let mut tail: std::collections::VecDeque<String> = std::collections::VecDeque::new();
    let mut total = 0usize;
    while let Ok(Some(line)) = lines.next_line().await {
        debug!(target: "executor-stderr", "{line}");
        total += line.len() + 1;
        tail.push_back(line);
        while total > STDERR_TAIL_BYTES {
            if let Some(dropped) = tail.pop_front() {
                total -= dropped.len() + 1;
            } else {
                break;
            }
        }
    }
    let mut joined = String::with_capacity(total);
    for line in tail {
        joined.push_str(&line);
        joined.push('\n');
    }
    joined
}
