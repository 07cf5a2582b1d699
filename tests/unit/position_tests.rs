//! Unit tests for position and span value types.

use interactive_agent::models::position::{FileLinePositionSpan, Position, Span};

#[test]
fn zero_coordinates_clamp_to_one() {
    let pos = Position::new(0, 0);
    assert_eq!((pos.line(), pos.column()), (1, 1));
}

#[test]
fn zero_based_conversion_adds_one() {
    let pos = Position::from_zero_based(4, 0);
    assert_eq!(pos, Position::new(5, 1));
}

#[test]
fn ordering_is_line_then_column() {
    assert!(Position::new(1, 80) < Position::new(2, 1));
    assert!(Position::new(3, 2) < Position::new(3, 7));
    assert_eq!(
        Position::new(2, 2).cmp(&Position::new(2, 2)),
        std::cmp::Ordering::Equal
    );
}

#[test]
fn inverted_span_is_rejected() {
    assert!(Span::new(Position::new(2, 1), Position::new(1, 9)).is_none());
    assert!(Span::new(Position::new(1, 5), Position::new(1, 4)).is_none());
}

#[test]
fn zero_width_span_is_allowed() {
    let pos = Position::new(7, 3);
    let span = Span::new(pos, pos).expect("start == end");
    assert_eq!(span, Span::at(pos));
    assert_eq!(span.start(), span.end());
}

#[test]
fn display_is_line_colon_column() {
    assert_eq!(Position::new(12, 4).to_string(), "12:4");
}

#[test]
fn inverted_span_fails_to_deserialize() {
    let raw = r#"{"start":{"line":3,"character":0},"end":{"line":1,"character":0}}"#;
    let err = serde_json::from_str::<Span>(raw).expect_err("inverted span must not parse");
    assert!(err.to_string().contains("precedes"), "error: {err}");
}

#[test]
fn buffer_span_has_empty_unmapped_path() {
    let span = FileLinePositionSpan::in_buffer(Span::at(Position::new(1, 1)));
    assert!(span.path.is_empty());
    assert!(!span.has_mapped_path);
}
