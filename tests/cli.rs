//! Tests for the command-line binary

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

fn desk_cmd(data_dir: &TempDir) -> Command {
    let mut cmd = Command::cargo_bin("support-desk").unwrap();
    cmd.arg("--data-dir").arg(data_dir.path()).arg("--no-color");
    cmd
}

#[test]
fn test_status_on_empty_data_dir() {
    let temp_dir = TempDir::new().unwrap();

    desk_cmd(&temp_dir)
        .arg("status")
        .assert()
        .success()
        .stdout(predicate::str::contains("Last issued ticket: 0"))
        .stdout(predicate::str::contains("No active tickets"));
}

#[test]
fn test_status_json() {
    let temp_dir = TempDir::new().unwrap();

    let output = desk_cmd(&temp_dir)
        .args(["status", "--json"])
        .output()
        .unwrap();
    assert!(output.status.success());

    let value: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(value["last_issued"], 0);
    assert_eq!(value["tickets"].as_array().unwrap().len(), 0);
}

#[test]
fn test_serve_creates_ticket_from_stdin() {
    let temp_dir = TempDir::new().unwrap();
    let input = concat!(
        r#"{"type":"action","event_id":"67e55044-10b1-426f-9247-bb680e5fe0c8","#,
        r#""actor":100,"action":"create"}"#,
        "\n",
    );

    desk_cmd(&temp_dir)
        .arg("serve")
        .write_stdin(input)
        .assert()
        .success()
        .stdout(predicate::str::contains(r#""kind":"defer""#))
        .stdout(predicate::str::contains("Ticket created! Check <#"));

    desk_cmd(&temp_dir)
        .arg("log")
        .assert()
        .success()
        .stdout(predicate::str::contains("insert"))
        .stdout(predicate::str::contains("ticket-1"));
}

#[test]
fn test_serve_reports_malformed_lines() {
    let temp_dir = TempDir::new().unwrap();

    desk_cmd(&temp_dir)
        .arg("serve")
        .write_stdin("not json\n")
        .assert()
        .success()
        .stdout(predicate::str::contains(r#""type":"error""#));
}

#[test]
fn test_log_on_empty_data_dir() {
    let temp_dir = TempDir::new().unwrap();

    desk_cmd(&temp_dir)
        .arg("log")
        .assert()
        .success()
        .stdout(predicate::str::contains("The ticket log is empty"));
}
