//! Integration tests for the MCP server over stdio.

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

fn ponder_in(dir: &TempDir) -> Command {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_ponder"));
    cmd.current_dir(dir.path());
    cmd
}

fn init_ponder() -> TempDir {
    let temp = TempDir::new().unwrap();
    ponder_in(&temp).arg("init").assert().success();
    temp
}

#[test]
fn test_initialize_handshake() {
    let temp = init_ponder();

    ponder_in(&temp)
        .arg("mcp")
        .write_stdin(r#"{"jsonrpc":"2.0","id":1,"method":"initialize","params":{}}"#)
        .assert()
        .success()
        .stdout(predicate::str::contains("\"protocolVersion\""))
        .stdout(predicate::str::contains("\"name\":\"ponder\""));
}

#[test]
fn test_tools_list_contains_tool_catalog() {
    let temp = init_ponder();

    ponder_in(&temp)
        .arg("mcp")
        .write_stdin(r#"{"jsonrpc":"2.0","id":1,"method":"tools/list"}"#)
        .assert()
        .success()
        .stdout(predicate::str::contains("create_feature"))
        .stdout(predicate::str::contains("commit_staged_changes"))
        .stdout(predicate::str::contains("report_task_blocked"))
        .stdout(predicate::str::contains("inputSchema"));
}

#[test]
fn test_tool_error_is_not_protocol_error() {
    let temp = init_ponder();

    // Missing required arguments: the response is a successful JSON-RPC
    // result carrying an isError tool payload.
    ponder_in(&temp)
        .arg("mcp")
        .write_stdin(
            r#"{"jsonrpc":"2.0","id":7,"method":"tools/call","params":{"name":"create_feature","arguments":{}}}"#,
        )
        .assert()
        .success()
        .stdout(predicate::str::contains("\"isError\":true"))
        .stdout(predicate::str::contains("Missing required argument"));
}

#[test]
fn test_unknown_method_returns_protocol_error() {
    let temp = init_ponder();

    ponder_in(&temp)
        .arg("mcp")
        .write_stdin(r#"{"jsonrpc":"2.0","id":9,"method":"no/such"}"#)
        .assert()
        .success()
        .stdout(predicate::str::contains("-32601"));
}

#[test]
fn test_get_graph_json_via_mcp() {
    let temp = init_ponder();

    let requests = concat!(
        r#"{"jsonrpc":"2.0","id":1,"method":"tools/call","params":{"name":"create_feature","arguments":{"name":"auth","description":"d","specification":"s"}}}"#,
        "\n",
        r#"{"jsonrpc":"2.0","id":2,"method":"tools/call","params":{"name":"create_task","arguments":{"feature_name":"auth","name":"login","description":"d","specification":"s"}}}"#,
        "\n",
        r#"{"jsonrpc":"2.0","id":3,"method":"tools/call","params":{"name":"commit_staged_changes","arguments":{}}}"#,
        "\n",
        r#"{"jsonrpc":"2.0","id":4,"method":"tools/call","params":{"name":"get_graph_json","arguments":{}}}"#,
        "\n",
    );

    ponder_in(&temp)
        .arg("mcp")
        .write_stdin(requests)
        .assert()
        .success()
        .stdout(predicate::str::contains("nodes"))
        .stdout(predicate::str::contains("login"));
}
