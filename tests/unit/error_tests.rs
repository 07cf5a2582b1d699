//! Unit tests for `AppError` display format.

use interactive_agent::AppError;

#[test]
fn display_prefixes_the_error_kind() {
    let cases = [
        (AppError::Config("bad".into()), "config: bad"),
        (AppError::UnknownContext("id 3".into()), "unknown context: id 3"),
        (AppError::ContextCreation("no sdk".into()), "context creation: no sdk"),
        (AppError::Compiler("crashed".into()), "compiler: crashed"),
        (AppError::Disconnected("eof".into()), "disconnected: eof"),
        (AppError::Protocol("line too long".into()), "protocol: line too long"),
        (AppError::InvalidRequest("no method".into()), "invalid request: no method"),
        (AppError::Ipc("bind".into()), "ipc: bind"),
        (AppError::Io("broken pipe".into()), "io: broken pipe"),
        (AppError::Internal("panic".into()), "internal: panic"),
    ];

    for (err, expected) in cases {
        assert_eq!(err.to_string(), expected);
    }
}

#[test]
fn message_has_no_trailing_period() {
    let s = AppError::Disconnected("evaluator stream closed".into()).to_string();
    assert!(!s.ends_with('.'), "error message must not end with a period: {s}");
}

#[test]
fn io_error_converts_to_io_variant() {
    let io = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "pipe gone");
    let err = AppError::from(io);
    assert!(matches!(err, AppError::Io(ref m) if m.contains("pipe gone")));
}

#[test]
fn toml_error_converts_to_config_variant() {
    let toml_err = toml::from_str::<toml::Value>("= nope").expect_err("invalid toml");
    let err = AppError::from(toml_err);
    assert!(err.to_string().starts_with("config: invalid config"));
}

#[test]
fn implements_std_error() {
    fn assert_error<E: std::error::Error>(_: &E) {}
    assert_error(&AppError::Internal("x".into()));
}
