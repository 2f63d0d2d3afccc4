
use std::sync::Arc;

use tempfile::TempDir;

use quarry_store::{build_operator, BackendConfig, BackendKind, PartitionSpec, StoreClient};
use quarry_types::{ArtifactChunk, EventEnvelope, EventType, CONTRACT_VERSION};

pub(crate) fn fs_client(tmp: &TempDir) -> Arc<StoreClient> {
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

pub(crate) fn event(seq: u64, event_type: EventType) -> EventEnvelope {
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

pub(crate) fn commit_event(seq: u64, artifact_id: &str) -> EventEnvelope {
    let mut envelope = event(seq, EventType::Artifact);
    envelope
        .payload
        .insert("artifact_id".to_owned(), serde_json::json!(artifact_id));
    envelope
}

pub(crate) fn chunk(artifact_id: &str, seq: u64, is_last: bool, len: usize) -> ArtifactChunk {
    ArtifactChunk {
        artifact_id: artifact_id.to_owned(),
        seq,
        is_last,
        data: vec![b'X'; len],
    }
}

/// All records of one event-type partition, parts in write order.
pub(crate) fn read_partition(tmp: &TempDir, event_type: &str) -> Vec<serde_json::Value> {
    let dir = tmp.path().join(format!(
        "datasets/ds/partitions/source=src/category=default/day=1970-01-01/run_id=run-1/event_type={event_type}"
    ));
    let Ok(entries) = std::fs::read_dir(&dir) else {
        return Vec::new();
    };
    let mut parts: Vec<_> = entries.map(|e| e.expect("dir entry").path()).collect();
    parts.sort();
    parts
        .iter()
        .flat_map(|path| {
            std::fs::read_to_string(path)
                .expect("part content")
                .lines()
                .map(|line| serde_json::from_str(line).expect("ndjson line"))
                .collect::<Vec<_>>()
        })
        .collect()
}
