mod common;

use common::TestWorkspace;
use predicates::prelude::*;

#[test]
fn init_creates_memory_dir_and_config() {
    let ws = TestWorkspace::new();
    ws.cmd()
        .arg("init")
        .assert()
        .success()
        .stdout(predicate::str::contains("initialized"));

    assert!(ws.path().join(".memory/config.json").exists());
    assert!(ws.path().join(".memory/index.sqlite").exists());

    let config = ws.read_file(".memory/config.json");
    let parsed: serde_json::Value = serde_json::from_str(&config).unwrap();
    assert_eq!(parsed["recencyBoostDays"], 30.0);
}

#[test]
fn init_is_idempotent_and_keeps_config() {
    let ws = TestWorkspace::new();
    ws.cmd().arg("init").assert().success();
    ws.write_file(".memory/config.json", r#"{"owner": "dana"}"#);
    ws.cmd()
        .arg("init")
        .assert()
        .success()
        .stdout(predicate::str::contains("kept existing"));
    assert_eq!(ws.read_file(".memory/config.json"), r#"{"owner": "dana"}"#);
}

#[test]
fn status_reports_empty_store() {
    let ws = TestWorkspace::new();
    ws.cmd().arg("init").assert().success();
    ws.cmd()
        .arg("status")
        .assert()
        .success()
        .stdout(predicate::str::contains("0 file(s)"));
}
