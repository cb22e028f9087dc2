mod common;

use common::TestWorkspace;
use predicates::prelude::*;

#[test]
fn remember_writes_header_and_line() {
    let ws = TestWorkspace::new();
    ws.cmd()
        .args([
            "remember",
            "Creatine 5g daily",
            "--tag",
            "confirmed",
            "--date",
            "2026-02-20",
        ])
        .assert()
        .success()
        .stdout(predicate::str::contains("memory/2026-02-20.md"));

    let content = ws.read_file("memory/2026-02-20.md");
    assert!(content.starts_with("# Session Log — 2026-02-20\n\n"));
    assert!(content.contains("- [confirmed] Creatine 5g daily\n"));
}

#[test]
fn remembered_line_is_immediately_searchable() {
    let ws = TestWorkspace::new();
    ws.cmd()
        .args(["remember", "switched espresso grinder to 18g dose", "--date", "2026-02-21"])
        .assert()
        .success();

    ws.cmd()
        .args(["search", "espresso grinder"])
        .assert()
        .success()
        .stdout(predicate::str::contains("memory/2026-02-21.md"));
}

#[test]
fn remember_rejects_bad_tag() {
    let ws = TestWorkspace::new();
    ws.cmd()
        .args(["remember", "some content", "--tag", "gossip"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("invalid tag"));
}

#[test]
fn remember_rejects_empty_content() {
    let ws = TestWorkspace::new();
    ws.cmd()
        .args(["remember", "   "])
        .assert()
        .failure()
        .stderr(predicate::str::contains("empty"));
}

#[test]
fn appends_accumulate_in_one_file() {
    let ws = TestWorkspace::new();
    ws.cmd()
        .args(["remember", "first distinct line", "--date", "2026-02-22"])
        .assert()
        .success();
    ws.cmd()
        .args(["remember", "second distinct line", "--tag", "pref", "--date", "2026-02-22"])
        .assert()
        .success();

    let content = ws.read_file("memory/2026-02-22.md");
    assert_eq!(content.matches("# Session Log").count(), 1);
    assert!(content.contains("- [fact] first distinct line\n"));
    assert!(content.contains("- [pref] second distinct line\n"));
}
