use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};

use fail::fail_point;
use opendal::Operator;
use parking_lot::Mutex;

use quarry_logger::debug;
use quarry_types::{
    validate_filename, ArtifactChunk, EventEnvelope, EventType, MAX_FILE_BYTES,
};

use crate::error::StoreError;
use crate::partition::PartitionSpec;
use crate::record::{chunk_line, event_line, metrics_line, MetricsRecord};

const METRICS_EVENT_TYPE: &str = "metrics";

#[derive(Default)]
struct ClientState {
    /// Cumulative persisted byte count per artifact. Entries exist only
    /// between the first successful chunk write and the commit write.
    offsets: HashMap<String, u64>,
    /// Artifacts with at least one successfully persisted chunk.
    chunks_seen: HashSet<String>,
    /// Next part number per partition directory.
    part_counters: HashMap<String, u64>,
}

/// Per-run storage client. One instance per run; no state crosses runs.
///
/// All mutating methods take `&self`; the in-memory artifact state sits
/// behind a mutex that is never held across backend I/O: offsets are
/// computed into local copies first and merged back only after the write
/// succeeded, so a failed write leaves the client exactly as it was.
pub struct StoreClient {
    op: Operator,
    partition: PartitionSpec,
    state: Mutex<ClientState>,
    closed: AtomicBool,
}

impl StoreClient {
    pub fn new(op: Operator, partition: PartitionSpec) -> Self {
        StoreClient {
            op,
            partition,
            state: Mutex::new(ClientState::default()),
            closed: AtomicBool::new(false),
        }
    }

    pub fn partition(&self) -> &PartitionSpec {
        &self.partition
    }

    /// Writes a batch of events, one NDJSON part object per touched
    /// partition, preserving batch order.
    ///
    /// Every artifact commit in the batch must name an `artifact_id` whose
    /// chunks this client already persisted; otherwise the whole batch is
    /// refused before anything is written.
    pub async fn write_events(&self, batch: &[EventEnvelope]) -> Result<(), StoreError> {
        self.ensure_open()?;
        if batch.is_empty() {
            return Ok(());
        }

        let mut commits: Vec<String> = Vec::new();
        {
            let state = self.state.lock();
            for envelope in batch {
                if envelope.event_type != EventType::Artifact {
                    continue;
                }
                let artifact_id = envelope.payload_artifact_id().ok_or_else(|| {
                    StoreError::MissingArtifactId {
                        event_id: envelope.event_id.clone(),
                    }
                })?;
                if !state.chunks_seen.contains(artifact_id) {
                    return Err(StoreError::CommitWithoutChunks {
                        artifact_id: artifact_id.to_owned(),
                    });
                }
                commits.push(artifact_id.to_owned());
            }
        }

        // Group lines per event-type partition, first appearance order.
        let mut parts: Vec<(String, String)> = Vec::new();
        for envelope in batch {
            let dir = self.partition.event_dir(envelope.event_type.as_str());
            let line = event_line(envelope)?;
            match parts.iter_mut().find(|(d, _)| *d == dir) {
                Some((_, content)) => content.push_str(&line),
                None => parts.push((dir, line)),
            }
        }

        for (dir, content) in parts {
            let path = self.next_part_path(&dir);
            self.write_object(&path, content.into_bytes()).await?;
        }

        if !commits.is_empty() {
            let mut state = self.state.lock();
            for artifact_id in &commits {
                state.offsets.remove(artifact_id);
                state.chunks_seen.remove(artifact_id);
            }
        }
        Ok(())
    }

    /// Writes a batch of chunk records into the artifact partition, each
    /// carrying its cumulative offset.
    pub async fn write_chunks(&self, batch: &[ArtifactChunk]) -> Result<(), StoreError> {
        self.ensure_open()?;
        if batch.is_empty() {
            return Ok(());
        }

        // Offsets are advanced on local copies; the shared map only learns
        // about them after the backend write succeeded.
        let mut local_offsets: HashMap<String, u64> = {
            let state = self.state.lock();
            batch
                .iter()
                .map(|chunk| {
                    let offset = state.offsets.get(&chunk.artifact_id).copied().unwrap_or(0);
                    (chunk.artifact_id.clone(), offset)
                })
                .collect()
        };

        let mut content = String::new();
        for chunk in batch {
            let offset = local_offsets
                .get_mut(&chunk.artifact_id)
                .expect("offset entry for every chunk in the batch");
            content.push_str(&chunk_line(chunk, *offset)?);
            *offset += chunk.data.len() as u64;
        }

        let dir = self.partition.event_dir(EventType::Artifact.as_str());
        let path = self.next_part_path(&dir);
        self.write_object(&path, content.into_bytes()).await?;

        let mut state = self.state.lock();
        for (artifact_id, offset) in local_offsets {
            state.chunks_seen.insert(artifact_id.clone());
            state.offsets.insert(artifact_id, offset);
        }
        Ok(())
    }

    /// Writes the single metrics record for this run. One call per run.
    ///
    /// Deliberately not gated on `close()`: the record summarizes the run
    /// after the policy has closed this client.
    pub async fn write_metrics(&self, record: &MetricsRecord) -> Result<(), StoreError> {
        let dir = self.partition.event_dir(METRICS_EVENT_TYPE);
        let path = self.next_part_path(&dir);
        self.write_object(&path, metrics_line(record)?.into_bytes())
            .await
    }

    /// Writes one sidecar file under the run's `files/` key.
    pub async fn put_file(
        &self,
        name: &str,
        content_type: &str,
        data: Vec<u8>,
    ) -> Result<(), StoreError> {
        self.ensure_open()?;
        validate_filename(name).map_err(|reason| StoreError::InvalidFile {
            name: name.to_owned(),
            reason,
        })?;
        if data.len() > MAX_FILE_BYTES {
            return Err(StoreError::InvalidFile {
                name: name.to_owned(),
                reason: format!("{} bytes exceeds the {MAX_FILE_BYTES} byte limit", data.len()),
            });
        }

        let path = self.partition.file_path(name);
        fail_point!("store-write", |_| Err(StoreError::Write(
            "injected write failure".to_owned()
        )));
        if self.op.info().full_capability().write_with_content_type {
            self.op
                .write_with(&path, data)
                .content_type(content_type)
                .await?;
        } else {
            self.op.write(&path, data).await?;
        }
        Ok(())
    }

    /// Closes the client. Idempotent; a second call is a no-op.
    pub fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            debug!(
                "storage client for run {} closed",
                self.partition.run_id
            );
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn ensure_open(&self) -> Result<(), StoreError> {
        if self.is_closed() {
            return Err(StoreError::Closed);
        }
        Ok(())
    }

    fn next_part_path(&self, dir: &str) -> String {
        let mut state = self.state.lock();
        let counter = state.part_counters.entry(dir.to_owned()).or_insert(0);
        let path = format!("{dir}part-{:06}.ndjson", *counter);
        *counter += 1;
        path
    }

    async fn write_object(&self, path: &str, bytes: Vec<u8>) -> Result<(), StoreError> {
        fail_point!("store-write", |_| Err(StoreError::Write(
            "injected write failure".to_owned()
        )));
        self.op.write(path, bytes).await?;
        Ok(())
    }
}
