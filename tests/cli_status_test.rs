//! Integration tests for `ponder status` and the list commands.

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

fn ponder_in(dir: &TempDir) -> Command {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_ponder"));
    cmd.current_dir(dir.path());
    cmd
}

/// Initialize ponder and commit one feature with two tasks through the
/// MCP tool surface, the way a planner would.
fn init_with_tasks() -> TempDir {
    let temp = TempDir::new().unwrap();
    ponder_in(&temp).arg("init").assert().success();

    let requests = concat!(
        r#"{"jsonrpc":"2.0","id":1,"method":"tools/call","params":{"name":"create_feature","arguments":{"name":"auth","description":"authentication","specification":"spec"}}}"#,
        "\n",
        r#"{"jsonrpc":"2.0","id":2,"method":"tools/call","params":{"name":"create_task","arguments":{"feature_name":"auth","name":"hash","description":"d","specification":"s","priority":7}}}"#,
        "\n",
        r#"{"jsonrpc":"2.0","id":3,"method":"tools/call","params":{"name":"create_task","arguments":{"feature_name":"auth","name":"login","description":"d","specification":"s","priority":9}}}"#,
        "\n",
        r#"{"jsonrpc":"2.0","id":4,"method":"tools/call","params":{"name":"commit_staged_changes","arguments":{}}}"#,
        "\n",
    );
    ponder_in(&temp)
        .arg("mcp")
        .write_stdin(requests)
        .assert()
        .success()
        .stdout(predicate::str::contains("committed successfully"));

    temp
}

#[test]
fn test_status_counts() {
    let temp = init_with_tasks();

    ponder_in(&temp)
        .arg("status")
        .assert()
        .success()
        .stdout(predicate::str::contains("Features:        2"))
        .stdout(predicate::str::contains("Total Tasks:     2"))
        .stdout(predicate::str::contains("Available Tasks: 2"))
        .stdout(predicate::str::contains("Pending:     2"));
}

#[test]
fn test_db_status_aliases_status() {
    let temp = init_with_tasks();

    ponder_in(&temp)
        .args(["db", "status"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Ponder Project Status"));
}

#[test]
fn test_list_tasks_ordering_and_filters() {
    let temp = init_with_tasks();

    // Higher priority first.
    let output = ponder_in(&temp).arg("list-tasks").assert().success();
    let stdout = String::from_utf8(output.get_output().stdout.clone()).unwrap();
    let login_pos = stdout.find("login").unwrap();
    let hash_pos = stdout.find("hash").unwrap();
    assert!(login_pos < hash_pos);

    ponder_in(&temp)
        .args(["list-tasks", "--feature", "auth"])
        .assert()
        .success()
        .stdout(predicate::str::contains("login"));

    ponder_in(&temp)
        .args(["list-tasks", "--status", "completed"])
        .assert()
        .success()
        .stdout(predicate::str::contains("login").not());

    ponder_in(&temp)
        .args(["list-tasks", "--status", "bogus"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("invalid status"));
}

#[test]
fn test_snapshot_written_on_commit() {
    let temp = init_with_tasks();

    // The MCP session exports a snapshot after every committed write.
    let snapshot = temp.path().join(".ponder/snapshot.jsonl");
    assert!(snapshot.exists());
    let content = std::fs::read_to_string(snapshot).unwrap();
    assert!(content.contains("\"record_type\":\"meta\""));
    assert!(content.contains("\"name\":\"login\""));
}
