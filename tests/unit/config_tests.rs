use std::time::Duration;

use interactive_agent::config::{GlobalConfig, TransportKind};
use interactive_agent::AppError;

const MINIMAL: &str = r#"
[evaluator]
command = "csi-evaluator"
"#;

fn full_toml(working_dir: &str) -> String {
    format!(
        r#"
ipc_name = "eval-agent"
transport = "ipc"

[evaluator]
command = "dotnet"
args = ["evaluator.dll", "--quiet"]
startup_timeout_seconds = 10
working_dir = '{working_dir}'

[evaluation]
abort_grace_ms = 750
"#
    )
}

fn config_error(raw: &str) -> String {
    match GlobalConfig::from_toml_str(raw) {
        Err(AppError::Config(msg)) => msg,
        other => panic!("expected config error, got {other:?}"),
    }
}

#[test]
fn minimal_config_uses_defaults() {
    let config = GlobalConfig::from_toml_str(MINIMAL).expect("config parses");

    assert_eq!(config.ipc_name, "interactive-agent");
    assert_eq!(config.transport, TransportKind::Stdio);
    assert_eq!(config.evaluator.command, "csi-evaluator");
    assert!(config.evaluator.args.is_empty());
    assert_eq!(config.evaluator.startup_timeout_seconds, 30);
    assert!(config.evaluator.working_dir.is_none());
    assert_eq!(config.abort_grace(), Duration::from_millis(2000));
}

#[test]
fn full_config_parses_and_canonicalizes_working_dir() {
    let temp = tempfile::tempdir().expect("tempdir");
    let raw = full_toml(temp.path().to_str().expect("utf8 path"));

    let config = GlobalConfig::from_toml_str(&raw).expect("config parses");

    assert_eq!(config.ipc_name, "eval-agent");
    assert_eq!(config.transport, TransportKind::Ipc);
    assert_eq!(config.abort_grace(), Duration::from_millis(750));

    let spawn = config.spawn_config();
    assert_eq!(spawn.command, "dotnet");
    assert_eq!(spawn.args, ["evaluator.dll", "--quiet"]);
    assert_eq!(spawn.startup_timeout, Duration::from_secs(10));
    let expected = temp.path().canonicalize().expect("canonical tempdir");
    assert_eq!(spawn.working_dir.as_deref(), Some(expected.as_path()));
}

#[test]
fn missing_evaluator_section_is_rejected() {
    let msg = config_error("ipc_name = \"x\"\n");
    assert!(msg.contains("invalid config"), "{msg}");
}

#[test]
fn empty_command_is_rejected() {
    let msg = config_error("[evaluator]\ncommand = \"  \"\n");
    assert!(msg.contains("evaluator.command"), "{msg}");
}

#[test]
fn empty_ipc_name_is_rejected() {
    let msg = config_error("ipc_name = \"\"\n[evaluator]\ncommand = \"e\"\n");
    assert!(msg.contains("ipc_name"), "{msg}");
}

#[test]
fn zero_timeouts_are_rejected() {
    let msg = config_error("[evaluator]\ncommand = \"e\"\nstartup_timeout_seconds = 0\n");
    assert!(msg.contains("startup_timeout_seconds"), "{msg}");

    let msg = config_error("[evaluator]\ncommand = \"e\"\n[evaluation]\nabort_grace_ms = 0\n");
    assert!(msg.contains("abort_grace_ms"), "{msg}");
}

#[test]
fn nonexistent_working_dir_is_rejected() {
    let temp = tempfile::tempdir().expect("tempdir");
    let missing = temp.path().join("does-not-exist");
    let raw = format!(
        "[evaluator]\ncommand = \"e\"\nworking_dir = '{}'\n",
        missing.to_str().expect("utf8 path")
    );
    let msg = config_error(&raw);
    assert!(msg.contains("working_dir"), "{msg}");
}

#[test]
fn unknown_transport_is_rejected() {
    let msg = config_error("transport = \"carrier-pigeon\"\n[evaluator]\ncommand = \"e\"\n");
    assert!(msg.contains("invalid config"), "{msg}");
}

#[test]
fn load_from_missing_path_reports_read_failure() {
    let temp = tempfile::tempdir().expect("tempdir");
    match GlobalConfig::load_from_path(temp.path().join("absent.toml")) {
        Err(AppError::Config(msg)) => assert!(msg.contains("failed to read config"), "{msg}"),
        other => panic!("expected config error, got {other:?}"),
    }
}
