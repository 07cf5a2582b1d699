//! Integration tests for per-context serialization and cross-context concurrency.

use std::sync::atomic::Ordering;

use interactive_agent::models::cell::EvaluationStatus;
use interactive_agent::models::context::ContextConfiguration;
use interactive_agent::models::event::CodeCellEvent;

use super::test_helpers::{
    accepted, events_for, events_until_finished, position_of, test_manager, ScriptedCompiler,
};

/// Cells of one context never overlap, run in submission order, and each
/// cell's terminal event precedes the next cell's start event.
#[tokio::test]
async fn cells_in_one_context_run_one_at_a_time_in_order() {
    let compiler = ScriptedCompiler::shared();
    let manager = test_manager(&compiler);
    let mut sub = manager.subscribe().await;
    let ctx = manager
        .create_context(ContextConfiguration::default())
        .await
        .expect("create");

    let mut cells = Vec::new();
    for i in 0..3 {
        let source = format!("print cell {i}\nsleep 50\nvalue {i}");
        cells.push(accepted(
            manager.submit(ctx, source, None).await.expect("submit"),
        ));
    }

    let events = events_until_finished(&mut sub, 3).await;
    let runtime = compiler.runtime(ctx);

    assert_eq!(runtime.max_active.load(Ordering::SeqCst), 1, "no overlapping executions");
    let expected_log: Vec<String> = cells
        .iter()
        .flat_map(|c| [format!("start {c}"), format!("end {c}")])
        .collect();
    assert_eq!(runtime.log(), expected_log);

    for pair in cells.windows(2) {
        let finished_prev = position_of(&events, |e| {
            e.is_finished() && e.code_cell_id() == &pair[0]
        });
        let started_next = position_of(&events, |e| {
            matches!(e, CodeCellEvent::EvaluationStarted { .. }) && e.code_cell_id() == &pair[1]
        });
        assert!(
            finished_prev < started_next,
            "cell {} must finish before {} starts",
            pair[0],
            pair[1]
        );
    }

    for cell in &cells {
        let per_cell = events_for(&events, cell);
        assert!(matches!(per_cell[0], CodeCellEvent::EvaluationStarted { .. }));
        assert!(per_cell.last().expect("last").is_finished());
        assert_eq!(
            per_cell.iter().filter(|e| e.is_finished()).count(),
            1,
            "exactly one terminal event per cell"
        );
    }
}

/// Submissions issued concurrently from several tasks are all serialized.
#[tokio::test]
async fn concurrent_submitters_are_serialized() {
    let compiler = ScriptedCompiler::shared();
    let manager = std::sync::Arc::new(test_manager(&compiler));
    let mut sub = manager.subscribe().await;
    let ctx = manager
        .create_context(ContextConfiguration::default())
        .await
        .expect("create");

    let mut handles = Vec::new();
    for i in 0..8 {
        let manager = std::sync::Arc::clone(&manager);
        handles.push(tokio::spawn(async move {
            manager
                .submit(ctx, format!("sleep 10\nvalue {i}"), None)
                .await
                .expect("submit")
        }));
    }
    for handle in handles {
        accepted(handle.await.expect("join"));
    }

    let events = events_until_finished(&mut sub, 8).await;
    assert_eq!(compiler.runtime(ctx).max_active.load(Ordering::SeqCst), 1);

    let history = manager.context_history(ctx).await.expect("history");
    assert_eq!(history.len(), 8);
    let finished_order: Vec<_> = events
        .iter()
        .filter(|e| e.is_finished())
        .map(|e| e.code_cell_id().clone())
        .collect();
    let history_order: Vec<_> = history.iter().map(|r| r.id.clone()).collect();
    assert_eq!(finished_order, history_order, "cells finish in queue order");
    assert!(history
        .iter()
        .all(|r| r.status() == Some(EvaluationStatus::Success)));
}

/// Two contexts evaluate independently: the second starts while the first runs.
#[tokio::test]
async fn separate_contexts_run_concurrently() {
    let compiler = ScriptedCompiler::shared();
    let manager = test_manager(&compiler);
    let mut sub = manager.subscribe().await;
    let a = manager
        .create_context(ContextConfiguration::default())
        .await
        .expect("create a");
    let b = manager
        .create_context(ContextConfiguration::default())
        .await
        .expect("create b");

    let cell_a = accepted(manager.submit(a, "sleep 300".into(), None).await.expect("submit a"));
    let cell_b = accepted(manager.submit(b, "sleep 300".into(), None).await.expect("submit b"));

    let events = events_until_finished(&mut sub, 2).await;
    let started_b = position_of(&events, |e| {
        matches!(e, CodeCellEvent::EvaluationStarted { .. }) && e.code_cell_id() == &cell_b
    });
    let finished_a = position_of(&events, |e| e.is_finished() && e.code_cell_id() == &cell_a);
    assert!(started_b < finished_a, "context b must not wait for context a");
}
