use std::path::Path;

use assert_cmd::Command;
use tempfile::TempDir;

/// A temporary workspace directory for CLI tests.
pub struct TestWorkspace {
    pub dir: TempDir,
}

impl TestWorkspace {
    pub fn new() -> Self {
        Self {
            dir: TempDir::new().expect("failed to create temp dir"),
        }
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Write a file relative to the workspace root, creating parent dirs.
    pub fn write_file(&self, relative_path: &str, content: &str) {
        let full = self.dir.path().join(relative_path);
        if let Some(parent) = full.parent() {
            std::fs::create_dir_all(parent).expect("failed to create parent dirs");
        }
        std::fs::write(&full, content).expect("failed to write file");
    }

    pub fn read_file(&self, relative_path: &str) -> String {
        std::fs::read_to_string(self.dir.path().join(relative_path)).expect("failed to read file")
    }

    /// An `engram` command pointed at this workspace.
    pub fn cmd(&self) -> Command {
        let mut cmd = Command::cargo_bin("engram").expect("binary builds");
        cmd.current_dir(self.dir.path())
            .arg("--workspace")
            .arg(self.dir.path());
        cmd
    }

    /// Seed a small markdown workspace and index it.
    pub fn seed_and_index(&self) {
        self.write_file(
            "MEMORY.md",
            "# Infrastructure\nRedis cache TTL reduced to 120s as of Feb 16\n\n## Preferences\n- [pref] dark roast only, no sugar\n",
        );
        self.write_file(
            "memory/2026-02-20.md",
            "# Session Log — 2026-02-20\n\n- [confirmed] Creatine 5g daily morning protocol\n",
        );
        self.cmd().arg("index").assert().success();
    }
}
