use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use quarry_orchestrator::EnqueueObserver;
use quarry_types::{JsonMap, Outcome, OutcomeStatus, WorkItem};

use crate::{ChildRunner, FanoutConfig, FanoutError, FanoutOperator};

fn item(parent: &str, depth: u32, target: &str) -> WorkItem {
    WorkItem {
        parent_run_id: parent.to_owned(),
        depth,
        target: target.to_owned(),
        params: JsonMap::new(),
        source: None,
        category: None,
    }
}

/// Runner that tracks peak concurrency and optionally enqueues children of
/// its own through the observer, like a script suggesting grandchildren.
struct TrackingRunner {
    current: AtomicUsize,
    peak: AtomicUsize,
    grandchildren_per_run: usize,
    fail_targets: Vec<String>,
}

impl TrackingRunner {
    fn new(grandchildren_per_run: usize) -> Arc<Self> {
        Arc::new(TrackingRunner {
            current: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
            grandchildren_per_run,
            fail_targets: Vec::new(),
        })
    }

    fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ChildRunner for TrackingRunner {
    async fn run(
        &self,
        item: WorkItem,
        observer: Arc<dyn EnqueueObserver>,
        _cancel: CancellationToken,
    ) -> Outcome {
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);

        tokio::time::sleep(Duration::from_millis(20)).await;
        for index in 0..self.grandchildren_per_run {
            observer.on_enqueue(WorkItem {
                parent_run_id: format!("child-of-{}", item.parent_run_id),
                depth: item.depth + 1,
                target: format!("{}-grandchild-{index}", item.target),
                params: JsonMap::new(),
                source: None,
                category: None,
            });
        }

        self.current.fetch_sub(1, Ordering::SeqCst);
        if self.fail_targets.contains(&item.target) {
            Outcome::new(OutcomeStatus::ScriptError, "boom")
        } else {
            Outcome::new(OutcomeStatus::Success, "ok")
        }
    }
}

#[test]
fn validation_requires_max_runs_with_depth() {
    let err = FanoutConfig {
        max_depth: 2,
        max_runs: None,
        parallel: 1,
    }
    .validate()
    .expect_err("max_runs required");
    assert!(matches!(err, FanoutError::Config(_)));

    FanoutConfig {
        max_depth: 0,
        max_runs: None,
        parallel: 1,
    }
    .validate()
    .expect("depth 0 needs no budget");

    let err = FanoutConfig {
        max_depth: 0,
        max_runs: None,
        parallel: 0,
    }
    .validate()
    .expect_err("parallel must be positive");
    assert!(matches!(err, FanoutError::Config(_)));
}

#[tokio::test(flavor = "multi_thread")]
async fn bounds_hold_under_fanout_pressure() {
    // root enqueues 5 children at depth 1, each child proposes 2 more at
    // depth 2; budget 3, parallelism 2
    let operator = FanoutOperator::new(FanoutConfig {
        max_depth: 2,
        max_runs: Some(3),
        parallel: 2,
    })
    .expect("operator");
    let runner = TrackingRunner::new(2);

    let workers = tokio::spawn(
        Arc::clone(&operator).execute(runner.clone(), CancellationToken::new()),
    );

    for index in 0..5 {
        operator.on_enqueue(item("root", 1, &format!("child-{index}")));
    }
    operator.root_finished();

    let reports = workers.await.expect("workers");
    assert_eq!(reports.len(), 3, "budget admits exactly three children");
    assert_eq!(operator.admitted(), 3);
    assert!(operator.rejected() >= 2, "excess proposals were rejected");
    assert!(runner.peak() <= 2, "never more than two in flight");
    assert!(
        reports.iter().all(|r| r.item.depth <= 2),
        "depth bound holds"
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn depth_bound_rejects_grandchildren() {
    let operator = FanoutOperator::new(FanoutConfig {
        max_depth: 1,
        max_runs: Some(100),
        parallel: 2,
    })
    .expect("operator");
    let runner = TrackingRunner::new(2);

    let workers = tokio::spawn(
        Arc::clone(&operator).execute(runner.clone(), CancellationToken::new()),
    );

    operator.on_enqueue(item("root", 1, "child"));
    operator.root_finished();

    let reports = workers.await.expect("workers");
    assert_eq!(reports.len(), 1, "grandchildren at depth 2 were rejected");
    assert_eq!(operator.rejected(), 2);
}

#[tokio::test(flavor = "multi_thread")]
async fn empty_fanout_returns_once_root_is_done() {
    let operator = FanoutOperator::new(FanoutConfig {
        max_depth: 0,
        max_runs: None,
        parallel: 1,
    })
    .expect("operator");
    let runner = TrackingRunner::new(0);

    let workers = tokio::spawn(
        Arc::clone(&operator).execute(runner, CancellationToken::new()),
    );
    operator.root_finished();

    let reports = tokio::time::timeout(Duration::from_secs(5), workers)
        .await
        .expect("terminates promptly")
        .expect("workers");
    assert!(reports.is_empty());
}

#[tokio::test(flavor = "multi_thread")]
async fn child_failures_do_not_cancel_siblings() {
    let operator = FanoutOperator::new(FanoutConfig {
        max_depth: 1,
        max_runs: Some(3),
        parallel: 1,
    })
    .expect("operator");
    let runner = Arc::new(TrackingRunner {
        current: AtomicUsize::new(0),
        peak: AtomicUsize::new(0),
        grandchildren_per_run: 0,
        fail_targets: vec!["child-1".to_owned()],
    });

    let workers = tokio::spawn(
        Arc::clone(&operator).execute(runner, CancellationToken::new()),
    );
    for index in 0..3 {
        operator.on_enqueue(item("root", 1, &format!("child-{index}")));
    }
    operator.root_finished();

    let reports = workers.await.expect("workers");
    assert_eq!(reports.len(), 3, "siblings of the failed child still ran");
    let failures = reports
        .iter()
        .filter(|r| r.outcome.status == OutcomeStatus::ScriptError)
        .count();
    assert_eq!(failures, 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn cancellation_stops_dispatching() {
    let operator = FanoutOperator::new(FanoutConfig {
        max_depth: 1,
        max_runs: Some(100),
        parallel: 1,
    })
    .expect("operator");
    let runner = TrackingRunner::new(0);
    let cancel = CancellationToken::new();

    let workers = tokio::spawn(Arc::clone(&operator).execute(runner, cancel.clone()));

    cancel.cancel();
    for index in 0..4 {
        operator.on_enqueue(item("root", 1, &format!("child-{index}")));
    }
    operator.root_finished();

    let reports = tokio::time::timeout(Duration::from_secs(5), workers)
        .await
        .expect("terminates promptly")
        .expect("workers");
    assert!(
        reports.len() < 4,
        "cancellation must stop dispatching queued items"
    );
}
