//! Integration tests for the process-backed runtime over an in-memory stream.
//!
//! A fake evaluator task speaks the NDJSON evaluator protocol on the far end
//! of a `tokio::io::duplex` pipe, so the full request/notification routing is
//! exercised without spawning a process.

use std::sync::Arc;

use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use interactive_agent::compiler::process::ProcessRuntime;
use interactive_agent::compiler::{
    BoxFuture, Compiler, EvaluationRuntime, EvaluationSink, ExecutionOutcome, Submission,
};
use interactive_agent::engine::EvaluationContextManager;
use interactive_agent::models::cell::{CodeCellId, EvaluationStatus};
use interactive_agent::models::context::{ContextConfiguration, EvaluationContextId};
use interactive_agent::models::event::CodeCellEvent;
use interactive_agent::{AppError, Result};

use super::test_helpers::{accepted, events_until_finished, TEST_ABORT_GRACE};

// ── Fake evaluator ────────────────────────────────────────────────────────────

fn reply(id: &Value, result: Value) -> Value {
    json!({ "id": id, "result": result })
}

async fn fake_evaluator(stream: DuplexStream) {
    let (read, mut write) = tokio::io::split(stream);
    let mut lines = BufReader::new(read).lines();
    let mut waiting: Option<Value> = None;

    while let Ok(Some(line)) = lines.next_line().await {
        let msg: Value = serde_json::from_str(&line).expect("agent sends valid json");
        let id = msg["id"].clone();
        let params = &msg["params"];
        let method = msg["method"].as_str().unwrap_or_default();

        let replies: Vec<Value> = match method {
            "initialize" => {
                if params["configuration"]["targetRuntime"] == "unsupported" {
                    vec![json!({ "id": id, "error": { "message": "unsupported runtime" } })]
                } else {
                    vec![reply(&id, json!({}))]
                }
            }
            "submission/check" => {
                let source = params["source"].as_str().unwrap_or_default();
                vec![reply(&id, json!({ "complete": !source.trim_end().ends_with('{') }))]
            }
            "submission/analyze" => {
                let source = params["source"].as_str().unwrap_or_default();
                if source.contains("analysis-error") {
                    vec![json!({ "id": id, "error": { "message": "analysis exploded" } })]
                } else if source.contains("undefined") {
                    vec![reply(
                        &id,
                        json!({ "diagnostics": [{
                            "id": "CS0103",
                            "message": "The name 'undefined' does not exist",
                            "severity": "Error",
                            "span": {
                                "path": "",
                                "hasMappedPath": false,
                                "span": {
                                    "start": { "line": 0, "character": 4 },
                                    "end": { "line": 0, "character": 13 }
                                }
                            }
                        }] }),
                    )]
                } else {
                    vec![reply(&id, json!({ "diagnostics": [] }))]
                }
            }
            "submission/execute" => {
                let cell = params["codeCellId"].clone();
                match params["source"].as_str().unwrap_or_default() {
                    "exit" => return,
                    "wait" => {
                        waiting = Some(id);
                        Vec::new()
                    }
                    "throw" => vec![reply(
                        &id,
                        json!({ "status": "exception", "exception": { "message": "boom" } }),
                    )],
                    _ => vec![
                        json!({ "method": "cell/output", "params": {
                            "codeCellId": cell, "fileDescriptor": 1, "value": "hello\n" } }),
                        json!({ "method": "cell/result", "params": {
                            "codeCellId": cell, "resultHandling": "Replace",
                            "type": "int", "valueRepresentations": [42] } }),
                        json!({ "method": "cell/output", "params": {
                            "codeCellId": "someone-else",
                            "fileDescriptor": 1,
                            "value": "stray\n" } }),
                        reply(&id, json!({ "status": "success" })),
                    ],
                }
            }
            "execution/abort" => waiting
                .take()
                .map(|id| vec![reply(&id, json!({ "status": "interrupted" }))])
                .unwrap_or_default(),
            _ => Vec::new(),
        };

        for message in replies {
            let mut line = serde_json::to_string(&message).expect("serialize");
            line.push('\n');
            if write.write_all(line.as_bytes()).await.is_err() {
                return;
            }
        }
    }
}

fn connect(context_id: u64) -> Arc<ProcessRuntime> {
    let (agent_side, evaluator_side) = tokio::io::duplex(64 * 1024);
    tokio::spawn(fake_evaluator(evaluator_side));
    let (read, write) = tokio::io::split(agent_side);
    ProcessRuntime::connect(EvaluationContextId::new(context_id), read, write, None)
}

fn submission(cell: &str, source: &str) -> Submission {
    Submission {
        code_cell_id: CodeCellId::from(cell),
        source: source.into(),
    }
}

/// Compiler wiring each context to its own fake evaluator.
struct DuplexCompiler;

impl Compiler for DuplexCompiler {
    fn initialize(
        &self,
        context_id: EvaluationContextId,
        configuration: ContextConfiguration,
    ) -> BoxFuture<'_, Result<Arc<dyn EvaluationRuntime>>> {
        Box::pin(async move {
            let runtime = connect(context_id.get());
            runtime
                .initialize(&configuration)
                .await
                .map_err(|e| AppError::ContextCreation(e.to_string()))?;
            Ok(runtime as Arc<dyn EvaluationRuntime>)
        })
    }
}

// ── Request routing ───────────────────────────────────────────────────────────

#[tokio::test]
async fn completeness_check_round_trips() {
    let runtime = connect(1);

    assert!(runtime
        .is_submission_complete("let x = 1;".into())
        .await
        .expect("check"));
    assert!(!runtime
        .is_submission_complete("fn f() {".into())
        .await
        .expect("check"));
}

#[tokio::test]
async fn analysis_positions_become_one_based() {
    let runtime = connect(1);

    let diagnostics = runtime
        .analyze(submission("c1", "var undefined"))
        .await
        .expect("analyze");

    assert_eq!(diagnostics.len(), 1);
    let start = diagnostics[0].span.span.start();
    assert_eq!((start.line(), start.column()), (1, 5));
    let end = diagnostics[0].span.span.end();
    assert_eq!((end.line(), end.column()), (1, 14));
    assert!(diagnostics[0].is_error());
}

#[tokio::test]
async fn evaluator_error_response_is_a_compiler_error() {
    let runtime = connect(1);

    let err = runtime
        .analyze(submission("c1", "analysis-error"))
        .await
        .expect_err("error response must fail");
    match err {
        AppError::Compiler(msg) => assert!(msg.contains("analysis exploded"), "message: {msg}"),
        other => panic!("expected Compiler error, got {other:?}"),
    }
}

#[tokio::test]
async fn initialize_rejection_is_reported() {
    let runtime = connect(1);
    let configuration = ContextConfiguration {
        target_runtime: Some("unsupported".into()),
        ..ContextConfiguration::default()
    };

    let err = runtime
        .initialize(&configuration)
        .await
        .expect_err("initialize must fail");
    assert!(matches!(err, AppError::Compiler(_)), "got {err:?}");
}

// ── Execution ─────────────────────────────────────────────────────────────────

#[tokio::test]
async fn execute_routes_cell_notifications_to_the_sink() {
    let runtime = connect(1);
    let (tx, mut rx) = mpsc::unbounded_channel();
    let cell = CodeCellId::from("c1");

    let outcome = runtime
        .execute(
            submission("c1", "print"),
            EvaluationSink::new(cell.clone(), tx),
            CancellationToken::new(),
        )
        .await;
    assert_eq!(outcome, ExecutionOutcome::Completed);

    let first = rx.try_recv().expect("output event");
    match &first {
        CodeCellEvent::CapturedOutputSegment {
            value,
            file_descriptor,
            ..
        } => {
            assert_eq!(*file_descriptor, 1);
            assert_eq!(value, "hello\n");
        }
        other => panic!("expected output, got {other:?}"),
    }
    match rx.try_recv().expect("result event") {
        CodeCellEvent::Result {
            code_cell_id,
            type_name,
            value_representations,
            ..
        } => {
            assert_eq!(code_cell_id, cell);
            assert_eq!(type_name.as_deref(), Some("int"));
            assert_eq!(value_representations, Some(vec![json!(42)]));
        }
        other => panic!("expected result, got {other:?}"),
    }
    assert!(rx.try_recv().is_err(), "output for other cells is dropped");
}

#[tokio::test]
async fn execute_reports_exceptions() {
    let runtime = connect(1);
    let (tx, _rx) = mpsc::unbounded_channel();

    let outcome = runtime
        .execute(
            submission("c1", "throw"),
            EvaluationSink::new(CodeCellId::from("c1"), tx),
            CancellationToken::new(),
        )
        .await;
    assert_eq!(
        outcome,
        ExecutionOutcome::Exception(json!({ "message": "boom" }))
    );
}

#[tokio::test]
async fn cancellation_forwards_abort_to_the_evaluator() {
    let runtime = connect(1);
    let (tx, _rx) = mpsc::unbounded_channel();
    let cancel = CancellationToken::new();

    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        trigger.cancel();
    });

    let outcome = tokio::time::timeout(
        std::time::Duration::from_secs(5),
        runtime.execute(
            submission("c1", "wait"),
            EvaluationSink::new(CodeCellId::from("c1"), tx),
            cancel,
        ),
    )
    .await
    .expect("evaluator acknowledges the abort");
    assert_eq!(outcome, ExecutionOutcome::Interrupted);
}

#[tokio::test]
async fn evaluator_exit_fails_pending_and_later_requests() {
    let runtime = connect(1);
    let (tx, _rx) = mpsc::unbounded_channel();

    let outcome = runtime
        .execute(
            submission("c1", "exit"),
            EvaluationSink::new(CodeCellId::from("c1"), tx),
            CancellationToken::new(),
        )
        .await;
    assert!(
        matches!(outcome, ExecutionOutcome::Disconnected(_)),
        "got {outcome:?}"
    );

    let err = runtime
        .is_submission_complete("1".into())
        .await
        .expect_err("closed stream must fail");
    assert!(matches!(err, AppError::Disconnected(_)), "got {err:?}");
}

#[tokio::test]
async fn shutdown_closes_the_runtime() {
    let runtime = connect(1);
    runtime.shutdown().await;

    let err = runtime
        .is_submission_complete("1".into())
        .await
        .expect_err("shut down runtime must fail");
    assert!(matches!(err, AppError::Disconnected(_)), "got {err:?}");
}

// ── Through the engine ────────────────────────────────────────────────────────

#[tokio::test]
async fn engine_over_process_runtime_streams_events() {
    let manager = EvaluationContextManager::new(Arc::new(DuplexCompiler), TEST_ABORT_GRACE);
    let mut sub = manager.subscribe().await;
    let ctx = manager
        .create_context(ContextConfiguration::default())
        .await
        .expect("create");

    let ok = accepted(manager.submit(ctx, "print".into(), None).await.expect("submit ok"));
    let bad = accepted(
        manager
            .submit(ctx, "var undefined".into(), None)
            .await
            .expect("submit bad"),
    );
    let gone = accepted(manager.submit(ctx, "exit".into(), None).await.expect("submit exit"));

    let events = events_until_finished(&mut sub, 3).await;
    let status_of = |cell: &CodeCellId| {
        events
            .iter()
            .find_map(|e| match e {
                CodeCellEvent::EvaluationFinished {
                    code_cell_id,
                    status,
                    ..
                } if code_cell_id == cell => Some(*status),
                _ => None,
            })
            .expect("finished event")
    };

    assert_eq!(status_of(&ok), EvaluationStatus::Success);
    assert_eq!(status_of(&bad), EvaluationStatus::ErrorDiagnostic);
    assert_eq!(status_of(&gone), EvaluationStatus::Disconnected);
    assert!(events.iter().any(|e| matches!(
        e,
        CodeCellEvent::CapturedOutputSegment { code_cell_id, .. } if code_cell_id == &ok
    )));

    manager.destroy_context(ctx).await;
}

#[tokio::test]
async fn rejected_initialization_fails_context_creation() {
    let manager = EvaluationContextManager::new(Arc::new(DuplexCompiler), TEST_ABORT_GRACE);
    let configuration = ContextConfiguration {
        target_runtime: Some("unsupported".into()),
        ..ContextConfiguration::default()
    };

    let err = manager
        .create_context(configuration)
        .await
        .expect_err("creation must fail");
    assert!(matches!(err, AppError::ContextCreation(_)), "got {err:?}");
}
