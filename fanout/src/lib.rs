//! Bounded-depth, bounded-count, bounded-parallel scheduler for child runs.
//!
//! Every `enqueue` event observed by an orchestrator proposes a child run.
//! The operator admits or silently rejects each proposal under one lock
//! (depth bound first, then the total admission budget), queues admitted
//! items, and drains the queue with a fixed-size worker pool. It never
//! produces new items once the root run has finished and the queue is
//! empty; the completion predicate (root done, queue empty, nobody in
//! flight) is evaluated atomically with the worker bookkeeping.

mod browser;
mod error;

#[cfg(test)]
mod tests;

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

use quarry_logger::{debug, info};
use quarry_orchestrator::EnqueueObserver;
use quarry_types::{Outcome, WorkItem};

pub use browser::ManagedBrowser;
pub use error::FanoutError;

/// Fan-out bounds.
#[derive(Debug, Clone, Copy)]
pub struct FanoutConfig {
    /// Maximum depth a child may have; the root run is depth 0.
    pub max_depth: u32,
    /// Total admission budget across the whole fan-out, root excluded.
    /// Required whenever `max_depth > 0`.
    pub max_runs: Option<u64>,
    /// Worker pool size.
    pub parallel: usize,
}

impl FanoutConfig {
    pub fn validate(&self) -> Result<(), FanoutError> {
        if self.max_depth > 0 && self.max_runs.is_none() {
            return Err(FanoutError::Config(format!(
                "--max-runs is required when --depth > 0 (depth = {}); \
                 e.g. --depth {} --max-runs 100",
                self.max_depth, self.max_depth
            )));
        }
        if self.parallel < 1 {
            return Err(FanoutError::Config(
                "--parallel must be >= 1, e.g. --parallel 4".to_owned(),
            ));
        }
        Ok(())
    }
}

/// Executes one admitted child item: a fresh storage client, policy and
/// orchestrator per call, with the shared browser endpoint.
#[async_trait]
pub trait ChildRunner: Send + Sync {
    async fn run(
        &self,
        item: WorkItem,
        observer: Arc<dyn EnqueueObserver>,
        cancel: CancellationToken,
    ) -> Outcome;
}

/// Result of one child run.
#[derive(Debug, Clone)]
pub struct ChildReport {
    pub item: WorkItem,
    pub outcome: Outcome,
}

struct OperatorState {
    queue: VecDeque<WorkItem>,
    admitted: u64,
    rejected: u64,
    in_flight: usize,
    root_done: bool,
}

enum Next {
    Item(WorkItem),
    Done,
    Wait,
}

/// The scheduler. Doubles as the [`EnqueueObserver`] handed to every
/// orchestrator in the fan-out.
pub struct FanoutOperator {
    config: FanoutConfig,
    state: Mutex<OperatorState>,
    wake: Notify,
    results: Mutex<Vec<ChildReport>>,
}

impl FanoutOperator {
    pub fn new(config: FanoutConfig) -> Result<Arc<Self>, FanoutError> {
        config.validate()?;
        Ok(Arc::new(FanoutOperator {
            config,
            state: Mutex::new(OperatorState {
                queue: VecDeque::new(),
                admitted: 0,
                rejected: 0,
                in_flight: 0,
                root_done: false,
            }),
            wake: Notify::new(),
            results: Mutex::new(Vec::new()),
        }))
    }

    /// Total items admitted so far (root excluded).
    pub fn admitted(&self) -> u64 {
        self.state.lock().admitted
    }

    /// Total proposals silently rejected.
    pub fn rejected(&self) -> u64 {
        self.state.lock().rejected
    }

    /// Marks the root run as finished; workers drain the queue and stop.
    pub fn root_finished(&self) {
        self.state.lock().root_done = true;
        self.wake.notify_waiters();
    }

    fn admit(&self, item: WorkItem) {
        let mut state = self.state.lock();
        if item.depth > self.config.max_depth {
            state.rejected += 1;
            debug!(
                "rejecting child of {} at depth {} (max {})",
                item.parent_run_id, item.depth, self.config.max_depth
            );
            return;
        }
        if state.admitted >= self.config.max_runs.unwrap_or(0) {
            state.rejected += 1;
            debug!(
                "rejecting child of {}: admission budget {} exhausted",
                item.parent_run_id,
                self.config.max_runs.unwrap_or(0)
            );
            return;
        }
        state.admitted += 1;
        state.queue.push_back(item);
        drop(state);
        self.wake.notify_waiters();
    }

    /// Runs the worker pool until the root is done, the queue is empty and
    /// no child is in flight. Returns every child report, admission order
    /// not guaranteed.
    pub async fn execute(
        self: Arc<Self>,
        runner: Arc<dyn ChildRunner>,
        cancel: CancellationToken,
    ) -> Vec<ChildReport> {
        let mut workers = Vec::with_capacity(self.config.parallel);
        for index in 0..self.config.parallel {
            let operator = Arc::clone(&self);
            let runner = Arc::clone(&runner);
            let cancel = cancel.clone();
            workers.push(tokio::spawn(operator.worker_loop(index, runner, cancel)));
        }
        for worker in workers {
            let _ = worker.await;
        }

        let state = self.state.lock();
        info!(
            "fan-out finished: {} admitted, {} rejected",
            state.admitted, state.rejected
        );
        drop(state);
        std::mem::take(&mut *self.results.lock())
    }

    async fn worker_loop(
        self: Arc<Self>,
        index: usize,
        runner: Arc<dyn ChildRunner>,
        cancel: CancellationToken,
    ) {
        loop {
            if cancel.is_cancelled() {
                debug!("fan-out worker {index} stopping on cancel");
                return;
            }
            let next = {
                let mut state = self.state.lock();
                if let Some(item) = state.queue.pop_front() {
                    state.in_flight += 1;
                    Next::Item(item)
                } else if state.root_done && state.in_flight == 0 {
                    Next::Done
                } else {
                    Next::Wait
                }
            };
            match next {
                Next::Item(item) => {
                    debug!(
                        "fan-out worker {index} running child of {} at depth {}",
                        item.parent_run_id, item.depth
                    );
                    let observer: Arc<dyn EnqueueObserver> = self.clone();
                    let outcome = runner
                        .run(item.clone(), observer, cancel.child_token())
                        .await;
                    self.results.lock().push(ChildReport { item, outcome });
                    self.state.lock().in_flight -= 1;
                    self.wake.notify_waiters();
                }
                Next::Done => {
                    self.wake.notify_waiters();
                    return;
                }
                Next::Wait => {
                    tokio::select! {
                        _ = self.wake.notified() => {}
                        _ = tokio::time::sleep(Duration::from_millis(100)) => {}
                        _ = cancel.cancelled() => {}
                    }
                }
            }
        }
    }
}

impl EnqueueObserver for FanoutOperator {
    fn on_enqueue(&self, item: WorkItem) {
        self.admit(item);
    }
}
