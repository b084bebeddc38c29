// Test module - relaxed lint rules
#![allow(clippy::indexing_slicing)]
#![allow(clippy::panic)]
#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]
#![allow(missing_docs)]

//! Tests for the `run` command against the mock central system.

use std::process::{Command, Output};

use ocpp_churn::model::{ErrorInfo, RunConfig, RunReport, RunStatus};
use ocpp_churn_fixtures::{write_config, MockCentralSystem};

fn ocpp_churn_bin() -> Command {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_ocpp-churn"));
    for key in ["WS_HOST", "WS_PORT", "WS_PROTOCOL", "WS_PATH", "RUST_LOG"] {
        cmd.env_remove(key);
    }
    cmd
}

async fn output_of(mut cmd: Command) -> Output {
    tokio::task::spawn_blocking(move || cmd.output().expect("failed to run command"))
        .await
        .unwrap()
}

fn fast_config(csms: &MockCentralSystem) -> RunConfig {
    csms.config()
        .sessions(2)
        .reconnects(2, 2)
        .disconnect_delay_ms(50, 50)
        .inter_cycle_sleep_ms(10, 10)
        .build()
}

#[tokio::test(flavor = "multi_thread")]
async fn run_with_config_file_prints_report() {
    let csms = MockCentralSystem::start().await.unwrap();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("run.json");
    write_config(&path, &fast_config(&csms));

    let mut cmd = ocpp_churn_bin();
    cmd.args(["run", "--json", "--config"]).arg(&path);
    let output = output_of(cmd).await;

    assert!(
        output.status.success(),
        "stderr: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    let report: RunReport = serde_json::from_slice(&output.stdout).expect("stdout is a report");
    assert_eq!(report.status, RunStatus::Completed);
    assert_eq!(report.metrics.reconnect_count, 4);
    assert_eq!(report.sessions.len(), 2);
    assert_eq!(csms.stats().boot_notifications, 4);
}

#[tokio::test(flavor = "multi_thread")]
async fn yaml_config_and_flags_combine() {
    let csms = MockCentralSystem::start().await.unwrap();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("run.yaml");
    let yaml = serde_yml::to_string(&fast_config(&csms)).unwrap();
    std::fs::write(&path, yaml).unwrap();

    let mut cmd = ocpp_churn_bin();
    cmd.args(["run", "--json", "--sessions", "1", "--reconnects", "3", "--config"])
        .arg(&path);
    let output = output_of(cmd).await;

    assert!(output.status.success());
    let report: RunReport = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(report.config.sessions, 1);
    assert_eq!(report.metrics.reconnect_count, 3);
}

#[tokio::test(flavor = "multi_thread")]
async fn environment_sets_target_and_flags_win() {
    let csms = MockCentralSystem::start().await.unwrap();

    let mut cmd = ocpp_churn_bin();
    cmd.env("WS_HOST", "127.0.0.1")
        .env("WS_PORT", "1")
        .env("WS_PROTOCOL", "ws")
        .args(["run", "--json", "--reconnects", "1"])
        .args(["--disconnect-delay-min-ms", "20", "--disconnect-delay-max-ms", "20"])
        .args(["--port", &csms.port().to_string()]);
    let output = output_of(cmd).await;

    assert!(output.status.success());
    let report: RunReport = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(report.config.transport_host, "127.0.0.1");
    assert_eq!(report.config.transport_port, csms.port());
    assert_eq!(csms.stats().connections, 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn unreachable_server_exits_with_transport_code() {
    let port = {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port()
    };

    let mut cmd = ocpp_churn_bin();
    cmd.args(["run", "--json", "--host", "127.0.0.1", "--reconnects", "1"])
        .args(["--port", &port.to_string()]);
    let output = output_of(cmd).await;

    assert_eq!(output.status.code(), Some(3));
    let report: RunReport = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(report.metrics.connect_count, 0);
    assert_eq!(report.metrics.failed_connect_count, 1);
}

#[test]
fn inverted_range_is_a_config_error() {
    let output = ocpp_churn_bin()
        .args(["run", "--json", "--reconnects-min", "5", "--reconnects-max", "1"])
        .output()
        .expect("failed to run command");

    assert_eq!(output.status.code(), Some(2));
    let err: ErrorInfo = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(err.code, "E_CONFIG");
}

#[test]
fn invalid_env_port_is_a_config_error() {
    let output = ocpp_churn_bin()
        .env("WS_PORT", "eighty")
        .args(["run", "--json"])
        .output()
        .expect("failed to run command");

    assert_eq!(output.status.code(), Some(2));
    let err: ErrorInfo = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(err.code, "E_CONFIG");
}

#[test]
fn missing_config_file_is_an_io_error() {
    let dir = tempfile::tempdir().unwrap();
    let output = ocpp_churn_bin()
        .args(["run", "--json", "--config"])
        .arg(dir.path().join("missing.json"))
        .output()
        .expect("failed to run command");

    assert_eq!(output.status.code(), Some(10));
    let err: ErrorInfo = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(err.code, "E_IO");
}

#[test]
fn malformed_config_file_is_a_protocol_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("broken.json");
    std::fs::write(&path, "{ not json").unwrap();
    let output = ocpp_churn_bin()
        .args(["run", "--json", "--config"])
        .arg(&path)
        .output()
        .expect("failed to run command");

    assert_eq!(output.status.code(), Some(9));
}

#[test]
fn human_errors_go_to_stderr() {
    let output = ocpp_churn_bin()
        .args(["run", "--scheme", "http"])
        .output()
        .expect("failed to run command");

    assert_eq!(output.status.code(), Some(2));
    assert!(output.stdout.is_empty());
    assert!(String::from_utf8_lossy(&output.stderr).contains("E_CONFIG"));
}

#[test]
fn run_help_lists_overrides() {
    let output = ocpp_churn_bin()
        .args(["run", "--help"])
        .output()
        .expect("failed to run command");

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    for flag in ["--config", "--sessions", "--keepalive-ms", "--verbose", "--seed"] {
        assert!(stdout.contains(flag), "help should mention {flag}");
    }
}
