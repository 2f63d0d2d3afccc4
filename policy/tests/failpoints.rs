//! Failure-injection coverage for the flush-mode retry semantics.

use std::sync::Arc;

use tempfile::TempDir;

use quarry_policy::{
    BufferedConfig, BufferedPolicy, FlushMode, IngestPolicy, StreamingConfig, StreamingPolicy,
};
use quarry_store::{build_operator, BackendConfig, BackendKind, PartitionSpec, StoreClient};
use quarry_types::{ArtifactChunk, EventEnvelope, EventType, CONTRACT_VERSION};

fn fs_client(tmp: &TempDir) -> Arc<StoreClient> {
    let config = BackendConfig {
        kind: BackendKind::Fs,
        path: tmp.path().display().to_string(),
        region: None,
        endpoint: None,
        s3_path_style: true,
    };
    let op = build_operator(&config).expect("fs operator");
    let partition = PartitionSpec::new("ds", "src", "default", "run-1", 0).expect("partition");
    Arc::new(StoreClient::new(op, partition))
}

fn event(seq: u64, event_type: EventType) -> EventEnvelope {
    EventEnvelope {
        contract_version: CONTRACT_VERSION.to_owned(),
        event_id: format!("evt-{seq}"),
        run_id: "run-1".to_owned(),
        attempt: 1,
        job_id: None,
        parent_run_id: None,
        event_type,
        ts: "1970-01-01T00:00:00Z".to_owned(),
        seq,
        payload: serde_json::Map::new(),
    }
}

fn commit_event(seq: u64, artifact_id: &str) -> EventEnvelope {
    let mut envelope = event(seq, EventType::Artifact);
    envelope
        .payload
        .insert("artifact_id".to_owned(), serde_json::json!(artifact_id));
    envelope
}

fn chunk(seq: u64, is_last: bool, len: usize) -> ArtifactChunk {
    ArtifactChunk {
        artifact_id: "art-1".to_owned(),
        seq,
        is_last,
        data: vec![b'X'; len],
    }
}

fn read_partition(tmp: &TempDir, event_type: &str) -> Vec<serde_json::Value> {
    let dir = tmp.path().join(format!(
        "datasets/ds/partitions/source=src/category=default/day=1970-01-01/run_id=run-1/event_type={event_type}"
    ));
    let Ok(entries) = std::fs::read_dir(&dir) else {
        return Vec::new();
    };
    let mut parts: Vec<_> = entries.map(|e| e.expect("entry").path()).collect();
    parts.sort();
    parts
        .iter()
        .flat_map(|path| {
            std::fs::read_to_string(path)
                .expect("part")
                .lines()
                .map(|line| serde_json::from_str(line).expect("line"))
                .collect::<Vec<_>>()
        })
        .collect()
}

#[tokio::test]
async fn two_phase_retry_rewrites_neither_events_nor_commit() {
    let scenario = fail::FailScenario::setup();
    let tmp = TempDir::new().expect("tempdir");
    let policy = BufferedPolicy::new(
        BufferedConfig {
            max_events: 100,
            max_bytes: 1 << 20,
            flush_mode: FlushMode::TwoPhase,
        },
        fs_client(&tmp),
    );

    policy
        .ingest_event(event(1, EventType::Item))
        .await
        .expect("e1");
    policy
        .ingest_chunk(chunk(1, true, 10))
        .await
        .expect("chunk");
    policy
        .ingest_event(commit_event(2, "art-1"))
        .await
        .expect("commit");
    policy
        .ingest_event(event(3, EventType::Item))
        .await
        .expect("e2");

    // the event stage succeeds, the chunk stage fails once
    fail::cfg("store-write", "1*off->1*return->off").expect("failpoint");
    policy.flush().await.expect_err("chunk stage fails");

    fail::remove("store-write");
    policy.flush().await.expect("retry succeeds");
    policy.close().await.expect("close");

    // the primary events were written exactly once
    let items = read_partition(&tmp, "item");
    assert_eq!(items.len(), 2);
    assert_eq!(items[0]["seq"], 1);
    assert_eq!(items[1]["seq"], 3);

    // the commit trails its chunk and also appears exactly once
    let records = read_partition(&tmp, "artifact");
    assert_eq!(records.len(), 2);
    assert_eq!(records[0]["record_kind"], "chunk");
    assert_eq!(records[1]["record_kind"], "commit");

    scenario.teardown();
}

#[tokio::test]
async fn two_phase_events_after_partial_flush_use_the_secondary_buffer() {
    let scenario = fail::FailScenario::setup();
    let tmp = TempDir::new().expect("tempdir");
    let policy = BufferedPolicy::new(
        BufferedConfig {
            max_events: 100,
            max_bytes: 1 << 20,
            flush_mode: FlushMode::TwoPhase,
        },
        fs_client(&tmp),
    );

    policy
        .ingest_event(event(1, EventType::Item))
        .await
        .expect("e1");
    policy
        .ingest_chunk(chunk(1, true, 10))
        .await
        .expect("chunk");

    fail::cfg("store-write", "1*off->1*return->off").expect("failpoint");
    policy.flush().await.expect_err("chunk stage fails");
    fail::remove("store-write");

    // arrives after the partial flush, must not resurrect the primary batch
    policy
        .ingest_event(event(2, EventType::Item))
        .await
        .expect("late event");
    policy.flush().await.expect("retry succeeds");
    policy.close().await.expect("close");

    let items = read_partition(&tmp, "item");
    assert_eq!(items.len(), 2);
    assert_eq!(items[0]["seq"], 1);
    assert_eq!(items[1]["seq"], 2);

    scenario.teardown();
}

#[tokio::test]
async fn at_least_once_failure_preserves_all_buffers() {
    let scenario = fail::FailScenario::setup();
    let tmp = TempDir::new().expect("tempdir");
    let policy = BufferedPolicy::new(
        BufferedConfig {
            max_events: 100,
            max_bytes: 1 << 20,
            flush_mode: FlushMode::AtLeastOnce,
        },
        fs_client(&tmp),
    );

    policy
        .ingest_chunk(chunk(1, true, 10))
        .await
        .expect("chunk");
    policy
        .ingest_event(event(1, EventType::Item))
        .await
        .expect("item");

    fail::cfg("store-write", "return").expect("failpoint");
    policy.flush().await.expect_err("flush fails");
    assert!(policy.stats().buffer_bytes > 0, "buffers were kept");

    fail::remove("store-write");
    policy.flush().await.expect("retry writes everything");

    assert_eq!(read_partition(&tmp, "item").len(), 1);
    assert_eq!(read_partition(&tmp, "artifact").len(), 1);

    scenario.teardown();
}

#[tokio::test]
async fn chunks_first_event_failure_does_not_rewrite_chunks() {
    let scenario = fail::FailScenario::setup();
    let tmp = TempDir::new().expect("tempdir");
    let policy = BufferedPolicy::new(
        BufferedConfig {
            max_events: 100,
            max_bytes: 1 << 20,
            flush_mode: FlushMode::ChunksFirst,
        },
        fs_client(&tmp),
    );

    policy
        .ingest_chunk(chunk(1, true, 10))
        .await
        .expect("chunk");
    policy
        .ingest_event(event(1, EventType::Item))
        .await
        .expect("item");

    // chunks succeed, events fail once
    fail::cfg("store-write", "1*off->1*return->off").expect("failpoint");
    policy.flush().await.expect_err("event stage fails");

    fail::remove("store-write");
    policy.flush().await.expect("retry writes events only");

    let chunks: Vec<_> = read_partition(&tmp, "artifact");
    assert_eq!(chunks.len(), 1, "chunk written exactly once");
    assert_eq!(read_partition(&tmp, "item").len(), 1);

    scenario.teardown();
}

#[tokio::test]
async fn streaming_failure_restores_swapped_buffers_in_order() {
    let scenario = fail::FailScenario::setup();
    let tmp = TempDir::new().expect("tempdir");
    let policy = StreamingPolicy::spawn(
        StreamingConfig {
            flush_count: Some(1000),
            flush_interval: None,
        },
        fs_client(&tmp),
    );

    policy
        .ingest_event(event(1, EventType::Item))
        .await
        .expect("e1");
    policy
        .ingest_event(event(2, EventType::Item))
        .await
        .expect("e2");

    fail::cfg("store-write", "return").expect("failpoint");
    policy.flush().await.expect_err("flush fails");

    policy
        .ingest_event(event(3, EventType::Item))
        .await
        .expect("e3 appended after the restore");

    fail::remove("store-write");
    policy.close().await.expect("terminal flush");

    let items = read_partition(&tmp, "item");
    let seqs: Vec<u64> = items
        .iter()
        .map(|r| r["seq"].as_u64().expect("seq"))
        .collect();
    assert_eq!(seqs, vec![1, 2, 3], "restored data precedes later arrivals");

    scenario.teardown();
}

#[tokio::test]
async fn inline_flush_failure_propagates_to_the_ingest_caller() {
    let scenario = fail::FailScenario::setup();
    let tmp = TempDir::new().expect("tempdir");
    let policy = BufferedPolicy::new(
        BufferedConfig {
            max_events: 1,
            max_bytes: 0,
            flush_mode: FlushMode::AtLeastOnce,
        },
        fs_client(&tmp),
    );

    policy
        .ingest_event(event(1, EventType::Item))
        .await
        .expect("fills the buffer");

    fail::cfg("policy-flush", "return").expect("failpoint");
    let err = policy
        .ingest_event(event(2, EventType::Item))
        .await
        .expect_err("inline flush failure surfaces");
    assert!(matches!(err, quarry_policy::PolicyError::Store(_)));

    scenario.teardown();
}
