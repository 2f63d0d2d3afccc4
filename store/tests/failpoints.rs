//! Failure-injection coverage for the offset bookkeeping: a failed backend
//! write must leave the client state untouched so a retry recomputes the
//! same offsets.

use tempfile::TempDir;

use quarry_store::{build_operator, BackendConfig, BackendKind, PartitionSpec, StoreClient};
use quarry_types::{ArtifactChunk, EventEnvelope, EventType, CONTRACT_VERSION};

fn fs_client(tmp: &TempDir) -> StoreClient {
    let config = BackendConfig {
        kind: BackendKind::Fs,
        path: tmp.path().display().to_string(),
        region: None,
        endpoint: None,
        s3_path_style: true,
    };
    let op = build_operator(&config).expect("fs operator");
    let partition = PartitionSpec::new("ds", "shop", "default", "run-1", 0).expect("partition");
    StoreClient::new(op, partition)
}

fn chunk(seq: u64, is_last: bool, len: usize) -> ArtifactChunk {
    ArtifactChunk {
        artifact_id: "art-1".to_owned(),
        seq,
        is_last,
        data: vec![0u8; len],
    }
}

fn commit_event(seq: u64) -> EventEnvelope {
    let mut payload = serde_json::Map::new();
    payload.insert("artifact_id".to_owned(), serde_json::json!("art-1"));
    EventEnvelope {
        contract_version: CONTRACT_VERSION.to_owned(),
        event_id: format!("evt-{seq}"),
        run_id: "run-1".to_owned(),
        attempt: 1,
        job_id: None,
        parent_run_id: None,
        event_type: EventType::Artifact,
        ts: "1970-01-01T00:00:00Z".to_owned(),
        seq,
        payload,
    }
}

#[tokio::test]
async fn failed_chunk_write_preserves_offsets() {
    let scenario = fail::FailScenario::setup();
    let tmp = TempDir::new().expect("tempdir");
    let client = fs_client(&tmp);

    client
        .write_chunks(&[chunk(1, false, 100)])
        .await
        .expect("first batch persists");

    fail::cfg("store-write", "return").expect("enable failpoint");
    client
        .write_chunks(&[chunk(2, true, 50)])
        .await
        .expect_err("injected failure");

    // the failed batch must not have advanced the offset map; the retry
    // recomputes offset 100 for chunk 2
    fail::remove("store-write");
    client
        .write_chunks(&[chunk(2, true, 50)])
        .await
        .expect("retry persists");
    client
        .write_events(&[commit_event(1)])
        .await
        .expect("commit after chunks");

    let dir = tmp.path().join(
        "datasets/ds/partitions/source=shop/category=default/day=1970-01-01/run_id=run-1/event_type=artifact",
    );
    let mut parts: Vec<_> = std::fs::read_dir(dir)
        .expect("artifact partition")
        .map(|entry| entry.expect("entry").path())
        .collect();
    parts.sort();
    let records: Vec<serde_json::Value> = parts
        .iter()
        .flat_map(|path| {
            std::fs::read_to_string(path)
                .expect("part")
                .lines()
                .map(|line| serde_json::from_str(line).expect("line"))
                .collect::<Vec<_>>()
        })
        .collect();

    let offsets: Vec<(u64, u64)> = records
        .iter()
        .filter(|r| r["record_kind"] == "chunk")
        .map(|r| {
            (
                r["seq"].as_u64().expect("seq"),
                r["offset"].as_u64().expect("offset"),
            )
        })
        .collect();
    assert_eq!(offsets, vec![(1, 0), (2, 100)]);

    scenario.teardown();
}

#[tokio::test]
async fn failed_event_write_keeps_chunks_seen() {
    let scenario = fail::FailScenario::setup();
    let tmp = TempDir::new().expect("tempdir");
    let client = fs_client(&tmp);

    client
        .write_chunks(&[chunk(1, true, 10)])
        .await
        .expect("chunks persist");

    fail::cfg("store-write", "return").expect("enable failpoint");
    client
        .write_events(&[commit_event(1)])
        .await
        .expect_err("injected failure");

    // chunks-seen survives the failed commit write, so the retry is accepted
    fail::remove("store-write");
    client
        .write_events(&[commit_event(1)])
        .await
        .expect("retry accepted");

    scenario.teardown();
}
