//! Black-box tests of the `psync` binary.

use assert_cmd::Command;
use serde_json::Value;
use tempfile::TempDir;

fn psync(dir: &TempDir) -> Command {
    let mut cmd = Command::cargo_bin("psync").unwrap();
    cmd.current_dir(dir.path())
        .env("PSYNC_DB", dir.path().join("psync.db"))
        .env_remove("DATABASE_URL")
        .env_remove("PROTHEUS_BASE_URL")
        .env_remove("PROTHEUS_USERNAME")
        .env_remove("PROTHEUS_PASSWORD")
        .env_remove("RUST_LOG");
    cmd
}

fn stdout_json(output: &std::process::Output) -> Value {
    serde_json::from_slice(&output.stdout).unwrap()
}

#[test]
fn version_reports_name_and_schema() {
    let dir = TempDir::new().unwrap();
    let output = psync(&dir).args(["version", "--json"]).output().unwrap();

    assert!(output.status.success());
    let json = stdout_json(&output);
    assert_eq!(json["name"], "psync");
    assert_eq!(json["schema_version"], 1);
}

#[test]
fn empty_database_has_no_runs() {
    let dir = TempDir::new().unwrap();
    let output = psync(&dir).args(["runs", "--json"]).output().unwrap();

    assert!(output.status.success());
    assert_eq!(stdout_json(&output)["count"], 0);
    assert!(dir.path().join("psync.db").exists());
}

#[test]
fn tables_lists_pullable_tables() {
    let dir = TempDir::new().unwrap();
    let output = psync(&dir).args(["tables", "--json"]).output().unwrap();

    assert!(output.status.success());
    let tables = stdout_json(&output)["tables"].as_array().unwrap().clone();
    assert!(tables.contains(&Value::from("SA1")));
    assert!(tables.contains(&Value::from("SF2")));
}

#[test]
fn sync_without_remote_config_fails_with_config_code() {
    let dir = TempDir::new().unwrap();
    let output = psync(&dir).args(["pull", "SA1", "--json"]).output().unwrap();

    assert_eq!(output.status.code(), Some(7));
    let err: Value = serde_json::from_slice(&output.stderr).unwrap();
    assert_eq!(err["error"]["code"], "CONFIG_ERROR");
}

#[test]
fn invalid_request_fails_validation_before_config() {
    let dir = TempDir::new().unwrap();
    let output = psync(&dir).args(["pull", "XX1", "--json"]).output().unwrap();

    assert_eq!(output.status.code(), Some(4));
    let err: Value = serde_json::from_slice(&output.stderr).unwrap();
    assert_eq!(err["error"]["code"], "VALIDATION_ERROR");

    let output = psync(&dir)
        .args(["orders", "20260201", "20260101", "--json"])
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(4));
}

#[test]
fn unknown_run_is_not_found() {
    let dir = TempDir::new().unwrap();
    let output = psync(&dir).args(["run", "missing", "--json"]).output().unwrap();

    assert_eq!(output.status.code(), Some(3));
}

#[test]
fn missing_mapping_is_not_found() {
    let dir = TempDir::new().unwrap();
    let output = psync(&dir)
        .args(["mapping", "get", "customer", "TESTE-001", "--json"])
        .output()
        .unwrap();

    assert_eq!(output.status.code(), Some(3));
}

#[test]
fn mapping_reset_requires_confirmation() {
    let dir = TempDir::new().unwrap();
    psync(&dir)
        .args(["mapping", "reset", "customer"])
        .assert()
        .code(4);

    let output = psync(&dir)
        .args(["mapping", "reset", "customer", "--yes", "--json"])
        .output()
        .unwrap();
    assert!(output.status.success());
    assert_eq!(stdout_json(&output)["removed"], 0);
}

#[test]
fn sweep_on_fresh_database_removes_nothing() {
    let dir = TempDir::new().unwrap();
    let output = psync(&dir).args(["sweep", "--json"]).output().unwrap();

    assert!(output.status.success());
    assert_eq!(stdout_json(&output)["removed"], 0);
}
