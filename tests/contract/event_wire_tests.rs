//! Contract tests for the JSON shape of cell events and diagnostics.
//!
//! Clients key on the `$type` discriminator and on camelCase field names, and
//! expect 0-based `{line, character}` positions. These tests pin that shape.

use serde_json::json;

use interactive_agent::models::cell::{CodeCellId, EvaluationStatus};
use interactive_agent::models::diagnostic::{Diagnostic, DiagnosticSeverity};
use interactive_agent::models::event::{CodeCellEvent, ResultHandling};
use interactive_agent::models::position::{FileLinePositionSpan, Position, Span};

fn cell() -> CodeCellId {
    CodeCellId::from("c-1")
}

#[test]
fn started_event_shape() {
    let event = CodeCellEvent::EvaluationStarted { code_cell_id: cell() };
    assert_eq!(
        serde_json::to_value(&event).expect("serialize"),
        json!({ "$type": "CodeCellEvaluationStartedEvent", "codeCellId": "c-1" })
    );
}

#[test]
fn result_event_shape() {
    let event = CodeCellEvent::Result {
        code_cell_id: cell(),
        result_handling: ResultHandling::Append,
        type_name: Some("System.Int32".into()),
        value_representations: Some(vec![json!(3)]),
    };
    assert_eq!(
        serde_json::to_value(&event).expect("serialize"),
        json!({
            "$type": "CodeCellResultEvent",
            "codeCellId": "c-1",
            "resultHandling": "Append",
            "type": "System.Int32",
            "valueRepresentations": [3]
        })
    );
}

#[test]
fn captured_output_event_shape() {
    let event = CodeCellEvent::CapturedOutputSegment {
        code_cell_id: cell(),
        file_descriptor: 2,
        value: "warning\n".into(),
    };
    assert_eq!(
        serde_json::to_value(&event).expect("serialize"),
        json!({
            "$type": "CapturedOutputSegment",
            "codeCellId": "c-1",
            "fileDescriptor": 2,
            "value": "warning\n"
        })
    );
}

#[test]
fn finished_event_shape_with_zero_based_positions() {
    let span = Span::new(Position::new(3, 5), Position::new(3, 9)).expect("ordered span");
    let event = CodeCellEvent::finished(
        cell(),
        EvaluationStatus::ErrorDiagnostic,
        vec![Diagnostic {
            id: "CS0103".into(),
            message: "The name 'x' does not exist".into(),
            severity: DiagnosticSeverity::Error,
            span: FileLinePositionSpan::in_buffer(span),
        }],
    );

    assert_eq!(
        serde_json::to_value(&event).expect("serialize"),
        json!({
            "$type": "CodeCellEvaluationFinishedEvent",
            "codeCellId": "c-1",
            "status": "ErrorDiagnostic",
            "shouldStartNewCell": false,
            "diagnostics": [{
                "id": "CS0103",
                "message": "The name 'x' does not exist",
                "severity": "Error",
                "span": {
                    "path": "",
                    "hasMappedPath": false,
                    "span": {
                        "start": { "line": 2, "character": 4 },
                        "end": { "line": 2, "character": 8 }
                    }
                }
            }]
        })
    );
}

#[test]
fn events_deserialize_from_wire_form() {
    let raw = json!({
        "$type": "CodeCellResultEvent",
        "codeCellId": "c-9",
        "resultHandling": "Replace",
        "type": null,
        "valueRepresentations": null
    });
    let event: CodeCellEvent = serde_json::from_value(raw).expect("deserialize");
    assert_eq!(
        event,
        CodeCellEvent::Result {
            code_cell_id: CodeCellId::from("c-9"),
            result_handling: ResultHandling::Replace,
            type_name: None,
            value_representations: None,
        }
    );
}

#[test]
fn unknown_discriminator_is_rejected() {
    let raw = json!({ "$type": "CodeCellExplodedEvent", "codeCellId": "c-1" });
    assert!(serde_json::from_value::<CodeCellEvent>(raw).is_err());
}

#[test]
fn status_names_are_stable() {
    let names: Vec<String> = [
        EvaluationStatus::Success,
        EvaluationStatus::Disconnected,
        EvaluationStatus::Interrupted,
        EvaluationStatus::ErrorDiagnostic,
        EvaluationStatus::EvaluationException,
    ]
    .iter()
    .map(|s| serde_json::to_value(s).expect("serialize").as_str().expect("string").to_owned())
    .collect();
    assert_eq!(
        names,
        [
            "Success",
            "Disconnected",
            "Interrupted",
            "ErrorDiagnostic",
            "EvaluationException"
        ]
    );
}
