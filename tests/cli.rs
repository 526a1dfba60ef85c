//! End-to-end tests driving the `chunksync` binary against a temporary database.

use assert_cmd::Command;
use serde_json::Value;
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

struct Workspace {
    dir: TempDir,
}

impl Workspace {
    fn new() -> Self {
        Self {
            dir: TempDir::new().unwrap(),
        }
    }

    fn db(&self) -> PathBuf {
        self.dir.path().join("data").join("chunksync.db")
    }

    fn cmd(&self) -> Command {
        let mut cmd = Command::cargo_bin("chunksync").unwrap();
        cmd.env("HOME", self.dir.path())
            .env("CHUNKSYNC_DB", self.db())
            .env("CHUNKSYNC_USER", "tester")
            .env_remove("ZEP_API_KEY")
            .env_remove("RUST_LOG")
            .args(["--json", "--quiet"]);
        cmd
    }

    fn write_chunks(&self, lines: &[&str]) -> PathBuf {
        let path = self.dir.path().join("chunks.jsonl");
        fs::write(&path, lines.join("\n")).unwrap();
        path
    }
}

fn json_stdout(output: &std::process::Output) -> Value {
    serde_json::from_slice(&output.stdout).unwrap()
}

fn ingest(ws: &Workspace, file: &Path) -> Value {
    let output = ws.cmd().arg("ingest").arg(file).args(["--title", "Handbook"]).assert().success();
    json_stdout(output.get_output())
}

#[test]
fn test_init_creates_database_once() {
    let ws = Workspace::new();
    let output = ws.cmd().arg("init").assert().success();
    let json = json_stdout(output.get_output());
    assert_eq!(json["created"], true);
    assert!(ws.db().exists());

    ws.cmd().arg("init").assert().failure().code(4);
    ws.cmd().args(["init", "--force"]).assert().success();
}

#[test]
fn test_commands_require_init() {
    let ws = Workspace::new();
    let output = ws.cmd().args(["status", "doc1"]).assert().failure().code(2);
    let err: Value = serde_json::from_slice(&output.get_output().stderr).unwrap();
    assert_eq!(err["error"]["code"], "NOT_INITIALIZED");
}

#[test]
fn test_ingest_then_status() {
    let ws = Workspace::new();
    ws.cmd().arg("init").assert().success();
    let file = ws.write_chunks(&[
        r#"{"id":"doc1-0","documentId":"doc1","content":"Receiving inbound pallets.","chunkIndex":0}"#,
        r#"{"id":"doc1-1","documentId":"doc1","content":"Recording damaged goods.","chunkIndex":1}"#,
    ]);

    let summary = ingest(&ws, &file);
    assert_eq!(summary["stats"]["inserted"], 2);
    assert_eq!(summary["documents"][0], "doc1");

    let again = ingest(&ws, &file);
    assert_eq!(again["stats"]["unchanged"], 2);

    let output = ws.cmd().args(["status", "doc1"]).assert().success();
    let status = json_stdout(output.get_output());
    assert_eq!(status["totalChunks"], 2);
    assert_eq!(status["pendingChunks"], 2);
    assert_eq!(status["syncedChunks"], 0);

    ws.cmd().args(["status", "missing"]).assert().failure().code(3);
}

#[test]
fn test_invalid_jsonl_is_rejected() {
    let ws = Workspace::new();
    ws.cmd().arg("init").assert().success();
    let file = ws.write_chunks(&[r#"{"id":"doc1-0""#]);
    ws.cmd().arg("ingest").arg(&file).assert().failure().code(4);
}

#[test]
fn test_checkpoint_list_empty() {
    let ws = Workspace::new();
    ws.cmd().arg("init").assert().success();

    let output = ws.cmd().args(["checkpoint", "list"]).assert().success();
    let list = json_stdout(output.get_output());
    assert_eq!(list["count"], 0);

    ws.cmd().args(["checkpoint", "show", "cp_missing"]).assert().failure().code(3);
}

#[test]
fn test_sync_requires_graph_credentials() {
    let ws = Workspace::new();
    ws.cmd().arg("init").assert().success();
    let output = ws.cmd().args(["sync", "doc1"]).assert().failure().code(7);
    let err: Value = serde_json::from_slice(&output.get_output().stderr).unwrap();
    assert_eq!(err["error"]["code"], "CONFIG_ERROR");
}

#[test]
fn test_health_reports_unconfigured_graph() {
    let ws = Workspace::new();
    ws.cmd().arg("init").assert().success();
    let output = ws.cmd().arg("health").assert().success();
    let health = json_stdout(output.get_output());
    assert_eq!(health["graphConfigured"], false);
    assert_eq!(health["healthy"], false);
    assert_eq!(health["circuitBreaker"]["state"], "CLOSED");
}
