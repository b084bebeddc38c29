//! Tests for the offline `respond` command.
// Test module - relaxed lint rules
#![allow(clippy::expect_used)]

use std::io::Write;
use std::process::{Command, Stdio};

fn respond(subtype: &str, input: &str) -> (bool, Vec<String>) {
    let mut child = Command::new(env!("CARGO_BIN_EXE_ocpp-churn"))
        .args(["respond", "--subtype", subtype])
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .expect("failed to spawn");
    child
        .stdin
        .take()
        .expect("stdin is piped")
        .write_all(input.as_bytes())
        .expect("failed to write stdin");
    let output = child.wait_with_output().expect("failed to wait");
    let lines = String::from_utf8_lossy(&output.stdout)
        .lines()
        .map(str::to_string)
        .collect();
    (output.status.success(), lines)
}

#[test]
fn unknown_action_gets_not_implemented() {
    let (ok, lines) = respond("ocpp1.6", "[2,\"abc\",\"Foo\",{}]\n");
    assert!(ok);
    assert_eq!(
        lines,
        vec![r#"[4,"abc","NotImplemented","Action Foo not implemented",{}]"#.to_string()]
    );
}

#[test]
fn known_actions_are_answered_in_order() {
    let input = concat!(
        r#"[2,"r1","Reset",{"type":"Immediate"}]"#,
        "\n",
        r#"[3,"x",{}]"#,
        "\n",
        r#"[2,"u1","UnlockConnector",{"evseId":1,"connectorId":1}]"#,
        "\n",
    );
    let (ok, lines) = respond("ocpp2.0.1", input);
    assert!(ok);
    assert_eq!(
        lines,
        vec![
            r#"[3,"r1",{"status":"Accepted"}]"#.to_string(),
            r#"[3,"u1",{"status":"Accepted"}]"#.to_string(),
        ]
    );
}

#[test]
fn undecodable_lines_are_skipped() {
    let (ok, lines) = respond("ocpp2.1", "garbage\n[9,\"x\"]\n[2,\"h\",\"ClearCache\",{}]\n");
    assert!(ok);
    assert_eq!(lines, vec![r#"[3,"h",{"status":"Accepted"}]"#.to_string()]);
}

#[test]
fn unknown_subtype_is_rejected() {
    let output = Command::new(env!("CARGO_BIN_EXE_ocpp-churn"))
        .args(["respond", "--subtype", "ocpp3"])
        .output()
        .expect("failed to execute");
    assert!(!output.status.success());
}
