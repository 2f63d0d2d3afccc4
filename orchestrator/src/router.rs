use std::collections::HashMap;
use std::sync::Arc;

use quarry_logger::warn;
use quarry_policy::IngestPolicy;
use quarry_protocol::{Frame, RunResultFrame};
use quarry_store::StoreClient;
use quarry_types::{
    EventEnvelope, EventType, JsonMap, RunMeta, WorkItem, CONTRACT_VERSION,
};

use crate::error::RunFailure;
use crate::EnqueueObserver;

struct ArtifactProgress {
    next_seq: u64,
    finished: bool,
}

/// Routes decoded frames: validates sequencing and versioning, latches the
/// terminal state, offers enqueue events to the observer and hands records
/// to the policy.
pub(crate) struct FrameRouter {
    meta: RunMeta,
    depth: u32,
    policy: Arc<dyn IngestPolicy>,
    client: Arc<StoreClient>,
    observer: Option<Arc<dyn EnqueueObserver>>,
    next_seq: u64,
    artifacts: HashMap<String, ArtifactProgress>,
    terminal: Option<EventType>,
    terminal_summary: Option<JsonMap>,
    run_result: Option<RunResultFrame>,
}

impl FrameRouter {
    pub(crate) fn new(
        meta: RunMeta,
        depth: u32,
        policy: Arc<dyn IngestPolicy>,
        client: Arc<StoreClient>,
        observer: Option<Arc<dyn EnqueueObserver>>,
    ) -> Self {
        FrameRouter {
            meta,
            depth,
            policy,
            client,
            observer,
            next_seq: 1,
            artifacts: HashMap::new(),
            terminal: None,
            terminal_summary: None,
            run_result: None,
        }
    }

    pub(crate) fn terminal(&self) -> Option<EventType> {
        self.terminal
    }

    pub(crate) fn terminal_summary(&self) -> Option<&JsonMap> {
        self.terminal_summary.as_ref()
    }

    pub(crate) fn run_result(&self) -> Option<&RunResultFrame> {
        self.run_result.as_ref()
    }

    pub(crate) async fn route(&mut self, frame: Frame) -> Result<(), RunFailure> {
        match frame {
            Frame::Event(envelope) => self.route_event(envelope).await,
            Frame::Chunk(chunk) => self.route_chunk(chunk).await,
            Frame::FileWrite(file) => {
                if self.run_result.is_some() {
                    return Err(RunFailure::Protocol(
                        "file_write frame after run_result".to_owned(),
                    ));
                }
                self.client
                    .put_file(&file.filename, &file.content_type, file.data)
                    .await?;
                Ok(())
            }
            Frame::RunResult(result) => {
                if self.terminal.is_none() {
                    return Err(RunFailure::Protocol(
                        "run_result frame before any terminal event".to_owned(),
                    ));
                }
                if self.run_result.is_some() {
                    return Err(RunFailure::Protocol(
                        "second run_result frame".to_owned(),
                    ));
                }
                if result
                    .proxy_used
                    .as_ref()
                    .is_some_and(|proxy| proxy.has_credentials())
                {
                    return Err(RunFailure::Protocol(
                        "run_result leaked proxy credentials".to_owned(),
                    ));
                }
                self.run_result = Some(result);
                Ok(())
            }
        }
    }

    async fn route_event(&mut self, envelope: EventEnvelope) -> Result<(), RunFailure> {
        if self.run_result.is_some() {
            return Err(RunFailure::Protocol("event after run_result".to_owned()));
        }
        if envelope.contract_version != CONTRACT_VERSION {
            return Err(RunFailure::VersionMismatch {
                got: envelope.contract_version.clone(),
                pinned: CONTRACT_VERSION.to_owned(),
            });
        }
        if let Some(terminal) = self.terminal {
            return Err(RunFailure::Protocol(format!(
                "{} event after terminal {terminal}",
                envelope.event_type
            )));
        }
        if envelope.run_id != self.meta.run_id {
            return Err(RunFailure::Protocol(format!(
                "event for run {:?} on the stream of run {:?}",
                envelope.run_id, self.meta.run_id
            )));
        }
        if envelope.seq != self.next_seq {
            if envelope.seq < self.next_seq {
                return Err(RunFailure::SeqDuplicate {
                    expected: self.next_seq,
                    got: envelope.seq,
                });
            }
            return Err(RunFailure::SeqGap {
                expected: self.next_seq,
                got: envelope.seq,
            });
        }
        self.next_seq += 1;

        if envelope.event_type == EventType::Enqueue {
            self.offer_enqueue(&envelope);
        }
        if envelope.event_type.is_terminal() {
            self.terminal = Some(envelope.event_type);
            self.terminal_summary = envelope
                .payload
                .get("summary")
                .and_then(|value| value.as_object())
                .cloned();
        }

        self.policy.ingest_event(envelope).await?;
        Ok(())
    }

    async fn route_chunk(&mut self, chunk: quarry_types::ArtifactChunk) -> Result<(), RunFailure> {
        if self.run_result.is_some() {
            return Err(RunFailure::Protocol("chunk after run_result".to_owned()));
        }
        if let Some(terminal) = self.terminal {
            return Err(RunFailure::Protocol(format!(
                "chunk for artifact {:?} after terminal {terminal}",
                chunk.artifact_id
            )));
        }

        let progress = self
            .artifacts
            .entry(chunk.artifact_id.clone())
            .or_insert(ArtifactProgress {
                next_seq: 1,
                finished: false,
            });
        if progress.finished {
            return Err(RunFailure::Protocol(format!(
                "chunk after is_last for artifact {:?}",
                chunk.artifact_id
            )));
        }
        if chunk.seq != progress.next_seq {
            return Err(RunFailure::ChunkSeq {
                artifact_id: chunk.artifact_id.clone(),
                expected: progress.next_seq,
                got: chunk.seq,
            });
        }
        progress.next_seq += 1;
        progress.finished = chunk.is_last;

        self.policy.ingest_chunk(chunk).await?;
        Ok(())
    }

    /// Offers an enqueue event to the fan-out observer before it is treated
    /// as a normal droppable event. A payload that does not describe a work
    /// item is logged and skipped; it must not fail the run.
    fn offer_enqueue(&self, envelope: &EventEnvelope) {
        let Some(observer) = &self.observer else {
            return;
        };
        let Some(target) = envelope.payload.get("target").and_then(|v| v.as_str()) else {
            warn!(
                "enqueue event {} has no string target; ignored",
                envelope.event_id
            );
            return;
        };
        let params = envelope
            .payload
            .get("params")
            .and_then(|value| value.as_object())
            .cloned()
            .unwrap_or_default();
        let item = WorkItem {
            parent_run_id: self.meta.run_id.clone(),
            depth: self.depth + 1,
            target: target.to_owned(),
            params,
            source: envelope
                .payload
                .get("source")
                .and_then(|v| v.as_str())
                .map(str::to_owned),
            category: envelope
                .payload
                .get("category")
                .and_then(|v| v.as_str())
                .map(str::to_owned),
        };
        observer.on_enqueue(item);
    }
}
