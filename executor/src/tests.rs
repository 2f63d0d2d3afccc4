use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::io::AsyncReadExt;

use quarry_protocol::{Frame, FramedReader};
use quarry_types::{EventType, JsonMap, OutcomeStatus, RunBootstrap, RunMeta, CONTRACT_VERSION};

use crate::emit::{split_chunks, start_emit};
use crate::harness::run_lifecycle;
use crate::script::{PrepareAction, Script, ScriptContext, ScriptLoader};
use crate::{EmitError, NullDriver, RhaiLoader, ScriptError, EXIT_SCRIPT_ERROR, EXIT_SUCCESS};

fn meta() -> RunMeta {
    RunMeta {
        run_id: "run-1".to_owned(),
        attempt: 1,
        job_id: None,
        parent_run_id: None,
    }
}

fn bootstrap() -> RunBootstrap {
    let mut job = JsonMap::new();
    job.insert("url".to_owned(), serde_json::json!("https://example.com"));
    RunBootstrap {
        contract_version: CONTRACT_VERSION.to_owned(),
        run_id: "run-1".to_owned(),
        attempt: 1,
        job_id: None,
        parent_run_id: None,
        job,
        proxy: None,
        browser_ws_endpoint: None,
    }
}

async fn decode_all(bytes: Vec<u8>) -> Vec<Frame> {
    let mut reader = FramedReader::new(std::io::Cursor::new(bytes));
    let mut frames = Vec::new();
    while let Some(frame) = reader.next_frame().await.expect("decode") {
        frames.push(frame);
    }
    frames
}

mod chunk_splitting {
    use super::*;

    #[test]
    fn empty_data_still_yields_a_final_chunk() {
        let chunks = split_chunks("art-1", Vec::new(), 4);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].seq, 1);
        assert!(chunks[0].is_last);
        assert!(chunks[0].data.is_empty());
    }

    #[test]
    fn data_is_split_with_monotonic_seq() {
        let chunks = split_chunks("art-1", vec![0u8; 10], 4);
        let shapes: Vec<(u64, usize, bool)> = chunks
            .iter()
            .map(|c| (c.seq, c.data.len(), c.is_last))
            .collect();
        assert_eq!(shapes, vec![(1, 4, false), (2, 4, false), (3, 2, true)]);
    }

    #[test]
    fn exact_multiple_has_no_empty_tail() {
        let chunks = split_chunks("art-1", vec![0u8; 8], 4);
        assert_eq!(chunks.len(), 2);
        assert!(chunks[1].is_last);
        assert_eq!(chunks[1].data.len(), 4);
    }
}

mod emit_chain {
    use super::*;

    #[tokio::test]
    async fn seq_is_assigned_in_emit_order() {
        let (client, mut server) = tokio::io::duplex(1 << 20);
        let (emit, writer) = start_emit(client, meta());

        emit.item(JsonMap::new()).await.expect("item");
        emit.log("info", "hello").await.expect("log");
        emit.run_complete(None).await.expect("terminal");
        emit.shutdown().await.expect("shutdown");
        writer.await.expect("writer");

        let mut bytes = Vec::new();
        server.read_to_end(&mut bytes).await.expect("read");
        let frames = decode_all(bytes).await;

        let seqs: Vec<u64> = frames
            .iter()
            .filter_map(|frame| match frame {
                Frame::Event(envelope) => Some(envelope.seq),
                _ => None,
            })
            .collect();
        assert_eq!(seqs, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn emits_after_terminal_are_refused() {
        let (client, _server) = tokio::io::duplex(1 << 20);
        let (emit, _writer) = start_emit(client, meta());

        emit.run_complete(None).await.expect("terminal");
        let err = emit.item(JsonMap::new()).await.expect_err("refused");
        assert!(matches!(err, EmitError::TerminalEvent));

        let status = emit.status().await.expect("status");
        assert_eq!(status.terminal, Some(EventType::RunComplete));
    }

    #[tokio::test]
    async fn artifact_chunks_precede_their_commit() {
        let (client, mut server) = tokio::io::duplex(1 << 20);
        let (emit, writer) = start_emit(client, meta());

        let artifact_id = emit
            .artifact("a.bin", "application/octet-stream", vec![b'X'; 10])
            .await
            .expect("artifact");
        emit.run_complete(None).await.expect("terminal");
        emit.shutdown().await.expect("shutdown");
        writer.await.expect("writer");

        let mut bytes = Vec::new();
        server.read_to_end(&mut bytes).await.expect("read");
        let frames = decode_all(bytes).await;

        match &frames[0] {
            Frame::Chunk(chunk) => {
                assert_eq!(chunk.artifact_id, artifact_id);
                assert_eq!(chunk.seq, 1);
                assert!(chunk.is_last);
                assert_eq!(chunk.data, vec![b'X'; 10]);
            }
            other => panic!("expected chunk first, got {other:?}"),
        }
        match &frames[1] {
            Frame::Event(envelope) => {
                assert_eq!(envelope.event_type, EventType::Artifact);
                assert_eq!(envelope.payload["artifact_id"], artifact_id.as_str());
                assert_eq!(envelope.payload["size_bytes"], 10);
            }
            other => panic!("expected commit event, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn sink_failure_is_latched_with_its_cause() {
        let (client, server) = tokio::io::duplex(64);
        let (emit, _writer) = start_emit(client, meta());
        drop(server);

        let err = emit.item(JsonMap::new()).await.expect_err("broken pipe");
        let EmitError::SinkFailed { cause } = &err else {
            panic!("expected SinkFailed, got {err:?}");
        };
        let first_cause = cause.clone();

        // every later emit is refused with the original cause
        let err = emit.log("info", "x").await.expect_err("still refused");
        assert!(matches!(err, EmitError::SinkFailed { cause } if cause == first_cause));
    }

    #[tokio::test]
    async fn file_puts_validate_names_client_side() {
        let (client, _server) = tokio::io::duplex(1 << 20);
        let (emit, _writer) = start_emit(client, meta());

        let err = emit
            .put_file("../escape", "text/plain", vec![])
            .await
            .expect_err("rejected");
        assert!(matches!(err, EmitError::Invalid(_)));
    }
}

mod lifecycle {
    use super::*;

    #[derive(Default, Debug)]
    struct TestScript {
        fail_run: bool,
        emit_own_terminal: bool,
        skip: bool,
        calls: Arc<Mutex<Vec<&'static str>>>,
    }

    impl TestScript {
        fn record(&self, call: &'static str) {
            self.calls.lock().expect("calls").push(call);
        }
    }

    #[async_trait]
    impl Script for TestScript {
        async fn prepare(
            &self,
            _job: &JsonMap,
            _run: &RunMeta,
        ) -> Result<PrepareAction, ScriptError> {
            self.record("prepare");
            if self.skip {
                return Ok(PrepareAction::Skip {
                    reason: Some("nothing to do".to_owned()),
                });
            }
            Ok(PrepareAction::Continue { job: None })
        }

        async fn before_run(&self, _ctx: &ScriptContext) -> Result<(), ScriptError> {
            self.record("before_run");
            Ok(())
        }

        async fn run(&self, ctx: &ScriptContext) -> Result<(), ScriptError> {
            self.record("run");
            let mut payload = JsonMap::new();
            payload.insert("n".to_owned(), serde_json::json!(1));
            ctx.emit.item(payload).await.map_err(|err| ScriptError::new(err.to_string()))?;
            if self.emit_own_terminal {
                let mut summary = JsonMap::new();
                summary.insert("count".to_owned(), serde_json::json!(1));
                ctx.emit
                    .run_complete(Some(summary))
                    .await
                    .map_err(|err| ScriptError::new(err.to_string()))?;
            }
            if self.fail_run {
                return Err(ScriptError::new("boom").with_type("test_failure"));
            }
            Ok(())
        }

        async fn after_run(&self, _ctx: &ScriptContext) -> Result<(), ScriptError> {
            self.record("after_run");
            Ok(())
        }

        async fn on_error(&self, _ctx: &ScriptContext, _error: &ScriptError) {
            self.record("on_error");
        }

        async fn before_terminal(&self, _ctx: &ScriptContext) {
            self.record("before_terminal");
        }

        async fn cleanup(&self, _ctx: &ScriptContext) {
            self.record("cleanup");
        }
    }

    async fn run_harness(script: TestScript) -> (i32, Vec<Frame>, Arc<Mutex<Vec<&'static str>>>) {
        let calls = Arc::clone(&script.calls);
        let (client, mut server) = tokio::io::duplex(1 << 20);
        let exit = run_lifecycle(bootstrap(), client, Box::new(script), Arc::new(NullDriver)).await;
        let mut bytes = Vec::new();
        server.read_to_end(&mut bytes).await.expect("read");
        (exit, decode_all(bytes).await, calls)
    }

    #[tokio::test]
    async fn happy_path_settles_run_complete() {
        let (exit, frames, calls) = run_harness(TestScript::default()).await;
        assert_eq!(exit, EXIT_SUCCESS);

        let kinds: Vec<&str> = frames
            .iter()
            .map(|frame| match frame {
                Frame::Event(e) => e.event_type.as_str(),
                Frame::RunResult(_) => "run_result",
                Frame::Chunk(_) => "chunk",
                Frame::FileWrite(_) => "file_write",
            })
            .collect();
        assert_eq!(kinds, vec!["item", "run_complete", "run_result"]);

        let order = calls.lock().expect("calls").clone();
        assert_eq!(
            order,
            vec!["prepare", "before_run", "run", "after_run", "before_terminal", "cleanup"]
        );
    }

    #[tokio::test]
    async fn script_failure_settles_run_error() {
        let (exit, frames, calls) = run_harness(TestScript {
            fail_run: true,
            ..Default::default()
        })
        .await;
        assert_eq!(exit, EXIT_SCRIPT_ERROR);

        let terminal = frames
            .iter()
            .find_map(|frame| match frame {
                Frame::Event(e) if e.event_type.is_terminal() => Some(e.clone()),
                _ => None,
            })
            .expect("terminal event");
        assert_eq!(terminal.event_type, EventType::RunError);
        assert_eq!(terminal.payload["message"], "boom");

        match frames.last().expect("frames") {
            Frame::RunResult(result) => {
                assert_eq!(result.outcome.status, OutcomeStatus::ScriptError);
                assert_eq!(result.outcome.message, "boom");
            }
            other => panic!("expected run_result last, got {other:?}"),
        }

        let order = calls.lock().expect("calls").clone();
        assert!(order.contains(&"on_error"));
        assert!(order.contains(&"cleanup"));
        // after_run is skipped once the script failed
        assert!(!order.contains(&"after_run"));
    }

    #[tokio::test]
    async fn script_terminal_is_not_duplicated() {
        let (exit, frames, _calls) = run_harness(TestScript {
            emit_own_terminal: true,
            ..Default::default()
        })
        .await;
        assert_eq!(exit, EXIT_SUCCESS);

        let terminals = frames
            .iter()
            .filter(|frame| {
                matches!(frame, Frame::Event(e) if e.event_type.is_terminal())
            })
            .count();
        assert_eq!(terminals, 1);
    }

    #[tokio::test]
    async fn prepare_skip_completes_without_running() {
        let (exit, frames, calls) = run_harness(TestScript {
            skip: true,
            ..Default::default()
        })
        .await;
        assert_eq!(exit, EXIT_SUCCESS);

        let terminal = frames
            .iter()
            .find_map(|frame| match frame {
                Frame::Event(e) if e.event_type.is_terminal() => Some(e.clone()),
                _ => None,
            })
            .expect("terminal event");
        assert_eq!(terminal.event_type, EventType::RunComplete);
        let summary = terminal.payload["summary"].as_object().expect("summary");
        assert_eq!(summary["skipped"], true);
        assert_eq!(summary["reason"], "nothing to do");

        let order = calls.lock().expect("calls").clone();
        assert!(!order.contains(&"run"));
        assert!(order.contains(&"cleanup"));
    }
}

mod rhai_scripts {
    use super::*;

    fn write_script(tmp: &tempfile::TempDir, source: &str) -> std::path::PathBuf {
        let path = tmp.path().join("script.rhai");
        std::fs::write(&path, source).expect("write script");
        path
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn full_script_roundtrip() {
        let tmp = tempfile::TempDir::new().expect("tempdir");
        let path = write_script(
            &tmp,
            r#"
fn run(ctx) {
    emit_item(#{ n: 1, url: ctx.job.url });
    emit_log("info", "fetched");
    emit_artifact("page.bin", "application/octet-stream", blob(10, 0x58));
    emit_run_complete(#{ count: 1 });
}
"#,
        );

        let script = RhaiLoader::new().load(&path).expect("load");
        let (client, mut server) = tokio::io::duplex(1 << 20);
        let exit = run_lifecycle(bootstrap(), client, script, Arc::new(NullDriver)).await;
        assert_eq!(exit, EXIT_SUCCESS);

        let mut bytes = Vec::new();
        server.read_to_end(&mut bytes).await.expect("read");
        let frames = decode_all(bytes).await;

        let kinds: Vec<&str> = frames
            .iter()
            .map(|frame| match frame {
                Frame::Event(e) => e.event_type.as_str(),
                Frame::RunResult(_) => "run_result",
                Frame::Chunk(_) => "chunk",
                Frame::FileWrite(_) => "file_write",
            })
            .collect();
        assert_eq!(
            kinds,
            vec!["item", "log", "chunk", "artifact", "run_complete", "run_result"]
        );

        match &frames[0] {
            Frame::Event(envelope) => {
                assert_eq!(envelope.payload["n"], 1);
                assert_eq!(envelope.payload["url"], "https://example.com");
            }
            other => panic!("expected item, got {other:?}"),
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn throwing_script_is_a_script_error() {
        let tmp = tempfile::TempDir::new().expect("tempdir");
        let path = write_script(&tmp, r#"fn run(ctx) { throw "nope"; }"#);

        let script = RhaiLoader::new().load(&path).expect("load");
        let (client, mut server) = tokio::io::duplex(1 << 20);
        let exit = run_lifecycle(bootstrap(), client, script, Arc::new(NullDriver)).await;
        assert_eq!(exit, EXIT_SCRIPT_ERROR);

        let mut bytes = Vec::new();
        server.read_to_end(&mut bytes).await.expect("read");
        let frames = decode_all(bytes).await;
        assert!(frames.iter().any(|frame| {
            matches!(frame, Frame::Event(e) if e.event_type == EventType::RunError)
        }));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn prepare_skip_from_script() {
        let tmp = tempfile::TempDir::new().expect("tempdir");
        let path = write_script(
            &tmp,
            r#"
fn prepare(job, run) {
    #{ action: "skip", reason: "already harvested" }
}
fn run(ctx) { emit_item(#{}); }
"#,
        );

        let script = RhaiLoader::new().load(&path).expect("load");
        let (client, mut server) = tokio::io::duplex(1 << 20);
        let exit = run_lifecycle(bootstrap(), client, script, Arc::new(NullDriver)).await;
        assert_eq!(exit, EXIT_SUCCESS);

        let mut bytes = Vec::new();
        server.read_to_end(&mut bytes).await.expect("read");
        let frames = decode_all(bytes).await;
        let terminal = frames
            .iter()
            .find_map(|frame| match frame {
                Frame::Event(e) if e.event_type.is_terminal() => Some(e.clone()),
                _ => None,
            })
            .expect("terminal");
        assert_eq!(terminal.payload["summary"]["skipped"], true);
    }

    #[test]
    fn load_rejects_missing_entrypoint() {
        let tmp = tempfile::TempDir::new().expect("tempdir");
        let path = write_script(&tmp, r#"fn helper() { 1 }"#);
        let err = RhaiLoader::new().load(&path).expect_err("no run fn");
        assert!(matches!(err, crate::ScriptLoadError::MissingEntrypoint { .. }));
    }

    #[test]
    fn load_rejects_syntax_errors() {
        let tmp = tempfile::TempDir::new().expect("tempdir");
        let path = write_script(&tmp, r#"fn run(ctx) { let = ; }"#);
        let err = RhaiLoader::new().load(&path).expect_err("syntax error");
        assert!(matches!(err, crate::ScriptLoadError::Compile { .. }));
    }

    #[test]
    fn load_rejects_missing_files() {
        let err = RhaiLoader::new()
            .load(std::path::Path::new("/nonexistent/script.rhai"))
            .expect_err("io error");
        assert!(matches!(err, crate::ScriptLoadError::Io { .. }));
    }
}
