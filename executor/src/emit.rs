use tokio::io::AsyncWrite;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use quarry_protocol::{FileWriteFrame, FramedSink, RunResultFrame, SinkError};
use quarry_types::{
    validate_filename, ArtifactChunk, EventEnvelope, EventType, JsonMap, RunMeta,
    CONTRACT_VERSION, MAX_CHUNK_BYTES, MAX_FILE_BYTES,
};

use crate::error::EmitError;

const EMIT_QUEUE_DEPTH: usize = 64;

/// What the writer task knows about the run's emit state.
#[derive(Debug, Clone, Default)]
pub struct EmitStatus {
    pub terminal: Option<EventType>,
    pub sink_failed: Option<String>,
    pub last_seq: u64,
}

enum EmitRequest {
    Event {
        event_type: EventType,
        payload: JsonMap,
        reply: oneshot::Sender<Result<(), EmitError>>,
    },
    Artifact {
        name: String,
        content_type: String,
        data: Vec<u8>,
        reply: oneshot::Sender<Result<String, EmitError>>,
    },
    File {
        filename: String,
        content_type: String,
        data: Vec<u8>,
        reply: oneshot::Sender<Result<(), EmitError>>,
    },
    RunResult {
        frame: RunResultFrame,
        reply: oneshot::Sender<Result<(), EmitError>>,
    },
    Status {
        reply: oneshot::Sender<EmitStatus>,
    },
    Shutdown {
        reply: oneshot::Sender<Result<(), EmitError>>,
    },
}

/// Clonable handle to the run's single emit chain.
///
/// Every call is appended to one FIFO queue consumed by a single writer
/// task, so emits from concurrent callers are serialized, sequence numbers
/// are assigned in emit order, and the terminal latch is checked in the
/// same serialized step that performs the write.
#[derive(Clone)]
pub struct EmitHandle {
    tx: mpsc::Sender<EmitRequest>,
}

impl EmitHandle {
    pub async fn emit_event(
        &self,
        event_type: EventType,
        payload: JsonMap,
    ) -> Result<(), EmitError> {
        let (reply, rx) = oneshot::channel();
        self.send(EmitRequest::Event {
            event_type,
            payload,
            reply,
        })
        .await?;
        rx.await.map_err(|_| EmitError::ChannelClosed)?
    }

    pub async fn item(&self, payload: JsonMap) -> Result<(), EmitError> {
        self.emit_event(EventType::Item, payload).await
    }

    pub async fn checkpoint(&self, payload: JsonMap) -> Result<(), EmitError> {
        self.emit_event(EventType::Checkpoint, payload).await
    }

    pub async fn log(&self, level: &str, message: &str) -> Result<(), EmitError> {
        let mut payload = JsonMap::new();
        payload.insert("level".to_owned(), serde_json::json!(level));
        payload.insert("message".to_owned(), serde_json::json!(message));
        self.emit_event(EventType::Log, payload).await
    }

    pub async fn enqueue(&self, payload: JsonMap) -> Result<(), EmitError> {
        self.emit_event(EventType::Enqueue, payload).await
    }

    pub async fn rotate_proxy(&self, payload: JsonMap) -> Result<(), EmitError> {
        self.emit_event(EventType::RotateProxy, payload).await
    }

    pub async fn run_complete(&self, summary: Option<JsonMap>) -> Result<(), EmitError> {
        let mut payload = JsonMap::new();
        if let Some(summary) = summary {
            payload.insert("summary".to_owned(), serde_json::Value::Object(summary));
        }
        self.emit_event(EventType::RunComplete, payload).await
    }

    pub async fn run_error(
        &self,
        message: &str,
        error_type: Option<&str>,
    ) -> Result<(), EmitError> {
        let mut payload = JsonMap::new();
        payload.insert("message".to_owned(), serde_json::json!(message));
        if let Some(error_type) = error_type {
            payload.insert("error_type".to_owned(), serde_json::json!(error_type));
        }
        self.emit_event(EventType::RunError, payload).await
    }

    /// Streams the data as chunk frames and then emits the commit event.
    /// Returns the generated artifact id.
    pub async fn artifact(
        &self,
        name: &str,
        content_type: &str,
        data: Vec<u8>,
    ) -> Result<String, EmitError> {
        let (reply, rx) = oneshot::channel();
        self.send(EmitRequest::Artifact {
            name: name.to_owned(),
            content_type: content_type.to_owned(),
            data,
            reply,
        })
        .await?;
        rx.await.map_err(|_| EmitError::ChannelClosed)?
    }

    /// Writes a sidecar file frame, outside the event sequence.
    pub async fn put_file(
        &self,
        filename: &str,
        content_type: &str,
        data: Vec<u8>,
    ) -> Result<(), EmitError> {
        validate_filename(filename).map_err(EmitError::Invalid)?;
        if data.len() > MAX_FILE_BYTES {
            return Err(EmitError::Invalid(format!(
                "file {filename:?} is {} bytes, limit {MAX_FILE_BYTES}",
                data.len()
            )));
        }
        let (reply, rx) = oneshot::channel();
        self.send(EmitRequest::File {
            filename: filename.to_owned(),
            content_type: content_type.to_owned(),
            data,
            reply,
        })
        .await?;
        rx.await.map_err(|_| EmitError::ChannelClosed)?
    }

    /// Writes the run-result control frame. Allowed only after the terminal
    /// event; the writer redacts nothing here, the caller already must.
    pub(crate) async fn run_result(&self, frame: RunResultFrame) -> Result<(), EmitError> {
        let (reply, rx) = oneshot::channel();
        self.send(EmitRequest::RunResult { frame, reply }).await?;
        rx.await.map_err(|_| EmitError::ChannelClosed)?
    }

    pub async fn status(&self) -> Result<EmitStatus, EmitError> {
        let (reply, rx) = oneshot::channel();
        self.send(EmitRequest::Status { reply }).await?;
        rx.await.map_err(|_| EmitError::ChannelClosed)
    }

    /// Flushes and shuts the sink down; the writer task exits afterwards.
    pub(crate) async fn shutdown(&self) -> Result<(), EmitError> {
        let (reply, rx) = oneshot::channel();
        self.send(EmitRequest::Shutdown { reply }).await?;
        rx.await.map_err(|_| EmitError::ChannelClosed)?
    }

    async fn send(&self, request: EmitRequest) -> Result<(), EmitError> {
        self.tx
            .send(request)
            .await
            .map_err(|_| EmitError::ChannelClosed)
    }
}

/// Spawns the writer task over the given stream.
pub fn start_emit<W>(writer: W, meta: RunMeta) -> (EmitHandle, JoinHandle<()>)
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (tx, rx) = mpsc::channel(EMIT_QUEUE_DEPTH);
    let task = tokio::spawn(writer_loop(FramedSink::new(writer), meta, rx));
    (EmitHandle { tx }, task)
}

struct WriterState {
    meta: RunMeta,
    seq: u64,
    terminal: Option<EventType>,
    sink_failed: Option<String>,
}

impl WriterState {
    fn gate(&self) -> Result<(), EmitError> {
        if let Some(cause) = &self.sink_failed {
            return Err(EmitError::SinkFailed {
                cause: cause.clone(),
            });
        }
        if self.terminal.is_some() {
            return Err(EmitError::TerminalEvent);
        }
        Ok(())
    }

    fn next_envelope(&mut self, event_type: EventType, payload: JsonMap) -> EventEnvelope {
        self.seq += 1;
        EventEnvelope {
            contract_version: CONTRACT_VERSION.to_owned(),
            event_id: random_id("evt"),
            run_id: self.meta.run_id.clone(),
            attempt: self.meta.attempt,
            job_id: self.meta.job_id.clone(),
            parent_run_id: self.meta.parent_run_id.clone(),
            event_type,
            ts: quarry_systemtime::rfc3339_from_millis(quarry_systemtime::unix_time_as_millis()),
            seq: self.seq,
            payload,
        }
    }

    fn record_sink_error(&mut self, err: &SinkError) -> EmitError {
        let cause = err.to_string();
        self.sink_failed = Some(cause.clone());
        EmitError::SinkFailed { cause }
    }
}

async fn writer_loop<W>(
    mut sink: FramedSink<W>,
    meta: RunMeta,
    mut rx: mpsc::Receiver<EmitRequest>,
) where
    W: AsyncWrite + Unpin + Send + 'static,
{
    let mut state = WriterState {
        meta,
        seq: 0,
        terminal: None,
        sink_failed: None,
    };

    while let Some(request) = rx.recv().await {
        match request {
            EmitRequest::Event {
                event_type,
                payload,
                reply,
            } => {
                let result = write_event(&mut sink, &mut state, event_type, payload).await;
                let _ = reply.send(result);
            }
            EmitRequest::Artifact {
                name,
                content_type,
                data,
                reply,
            } => {
                let result = write_artifact(&mut sink, &mut state, name, content_type, data).await;
                let _ = reply.send(result);
            }
            EmitRequest::File {
                filename,
                content_type,
                data,
                reply,
            } => {
                let result = match state.gate() {
                    Err(err) => Err(err),
                    Ok(()) => sink
                        .write_file(&FileWriteFrame {
                            filename,
                            content_type,
                            data,
                        })
                        .await
                        .map_err(|err| state.record_sink_error(&err)),
                };
                let _ = reply.send(result);
            }
            EmitRequest::RunResult { frame, reply } => {
                let result = if let Some(cause) = &state.sink_failed {
                    Err(EmitError::SinkFailed {
                        cause: cause.clone(),
                    })
                } else {
                    sink.write_run_result(&frame)
                        .await
                        .map_err(|err| state.record_sink_error(&err))
                };
                let _ = reply.send(result);
            }
            EmitRequest::Status { reply } => {
                let _ = reply.send(EmitStatus {
                    terminal: state.terminal,
                    sink_failed: state.sink_failed.clone(),
                    last_seq: state.seq,
                });
            }
            EmitRequest::Shutdown { reply } => {
                let result = sink
                    .shutdown()
                    .await
                    .map_err(|err| state.record_sink_error(&err));
                let _ = reply.send(result);
                break;
            }
        }
    }
}

async fn write_event<W>(
    sink: &mut FramedSink<W>,
    state: &mut WriterState,
    event_type: EventType,
    payload: JsonMap,
) -> Result<(), EmitError>
where
    W: AsyncWrite + Unpin + Send,
{
    state.gate()?;
    let envelope = state.next_envelope(event_type, payload);
    match sink.write_event(&envelope).await {
        Ok(()) => {
            // first terminal latches in the same serialized step as its write
            if event_type.is_terminal() {
                state.terminal = Some(event_type);
            }
            Ok(())
        }
        Err(err) => Err(state.record_sink_error(&err)),
    }
}

async fn write_artifact<W>(
    sink: &mut FramedSink<W>,
    state: &mut WriterState,
    name: String,
    content_type: String,
    data: Vec<u8>,
) -> Result<String, EmitError>
where
    W: AsyncWrite + Unpin + Send,
{
    state.gate()?;
    let artifact_id = random_id("art");
    let size_bytes = data.len();

    // every chunk goes down before the commit event
    for chunk in split_chunks(&artifact_id, data, MAX_CHUNK_BYTES) {
        sink.write_chunk(&chunk)
            .await
            .map_err(|err| state.record_sink_error(&err))?;
    }

    let mut payload = JsonMap::new();
    payload.insert("artifact_id".to_owned(), serde_json::json!(artifact_id));
    payload.insert("name".to_owned(), serde_json::json!(name));
    payload.insert("content_type".to_owned(), serde_json::json!(content_type));
    payload.insert("size_bytes".to_owned(), serde_json::json!(size_bytes));
    let envelope = state.next_envelope(EventType::Artifact, payload);
    sink.write_event(&envelope)
        .await
        .map_err(|err| state.record_sink_error(&err))?;
    Ok(artifact_id)
}

/// Splits artifact data into chunk frames; even empty data yields one final
/// chunk so the commit always has chunks to point at.
pub(crate) fn split_chunks(artifact_id: &str, data: Vec<u8>, chunk_size: usize) -> Vec<ArtifactChunk> {
    if data.is_empty() {
        return vec![ArtifactChunk {
            artifact_id: artifact_id.to_owned(),
            seq: 1,
            is_last: true,
            data,
        }];
    }
    let mut chunks = Vec::with_capacity(data.len().div_ceil(chunk_size));
    let mut rest = data.as_slice();
    let mut seq = 1;
    while !rest.is_empty() {
        let take = rest.len().min(chunk_size);
        let (head, tail) = rest.split_at(take);
        chunks.push(ArtifactChunk {
            artifact_id: artifact_id.to_owned(),
            seq,
            is_last: tail.is_empty(),
            data: head.to_vec(),
        });
        rest = tail;
        seq += 1;
    }
    chunks
}

/// Storage facade handed to scripts; file puts travel the same FIFO chain
/// as events, so ordering and terminal rules hold for them too.
#[derive(Clone)]
pub struct StorageHandle {
    emit: EmitHandle,
}

impl StorageHandle {
    pub fn new(emit: EmitHandle) -> Self {
        StorageHandle { emit }
    }

    pub async fn put(
        &self,
        filename: &str,
        content_type: &str,
        data: Vec<u8>,
    ) -> Result<(), EmitError> {
        self.emit.put_file(filename, content_type, data).await
    }
}

fn random_id(prefix: &str) -> String {
    let bytes: [u8; 12] = rand::random();
    format!("{prefix}-{}", faster_hex::hex_string(&bytes))
}
