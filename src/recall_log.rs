//! Append-only JSONL log of context retrievals at `.memory/recall-log.jsonl`.
//! Best-effort: logging failures never affect the retrieval result.

use serde::{Deserialize, Serialize};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;

use crate::config::WorkspaceConfig;

/// Rotation trips past this many lines…
const ROTATE_THRESHOLD: usize = 10_000;
/// …and keeps this many of the newest.
const ROTATE_KEEP: usize = 5_000;

const QUERY_TRUNCATE: usize = 200;
const PREVIEW_TRUNCATE: usize = 80;

/// One retrieval, as logged.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecallEvent {
    /// RFC3339 timestamp
    pub timestamp: String,
    /// Query, truncated to 200 chars
    pub query: String,
    pub terms: Vec<String>,
    pub returned: usize,
    pub dropped: usize,
    pub excluded: usize,
    pub token_estimate: usize,
    pub chunks: Vec<RecallEventChunk>,
    pub duration_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecallEventChunk {
    pub path: String,
    pub score: f64,
    pub chunk_type: String,
    /// First 80 chars of content
    pub preview: String,
}

/// Truncate on a char boundary.
pub fn truncate_chars(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        text.to_string()
    } else {
        text.chars().take(max).collect()
    }
}

impl RecallEvent {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        query: &str,
        terms: Vec<String>,
        returned: usize,
        dropped: usize,
        excluded: usize,
        token_estimate: usize,
        chunks: Vec<RecallEventChunk>,
        duration_ms: u64,
    ) -> Self {
        Self {
            timestamp: chrono::Utc::now().to_rfc3339(),
            query: truncate_chars(query, QUERY_TRUNCATE),
            terms,
            returned,
            dropped,
            excluded,
            token_estimate,
            chunks,
            duration_ms,
        }
    }

    pub fn chunk_entry(path: &str, score: f64, chunk_type: &str, content: &str) -> RecallEventChunk {
        RecallEventChunk {
            path: path.to_string(),
            score,
            chunk_type: chunk_type.to_string(),
            preview: truncate_chars(content, PREVIEW_TRUNCATE),
        }
    }
}

/// Append an event; silently ignores I/O errors. Rotates opportunistically
/// when the file has grown past the threshold.
pub fn emit(workspace: &Path, event: &RecallEvent) {
    let path = WorkspaceConfig::recall_log_path(workspace);
    if let Some(parent) = path.parent() {
        let _ = std::fs::create_dir_all(parent);
    }

    let Ok(line) = serde_json::to_string(event) else {
        return;
    };
    let Ok(mut file) = OpenOptions::new().create(true).append(true).open(&path) else {
        return;
    };
    let _ = writeln!(file, "{line}");
    drop(file);

    rotate_if_needed(&path);
}

fn rotate_if_needed(path: &Path) {
    let Ok(content) = std::fs::read_to_string(path) else {
        return;
    };
    let lines: Vec<&str> = content.lines().collect();
    if lines.len() <= ROTATE_THRESHOLD {
        return;
    }
    let keep = &lines[lines.len() - ROTATE_KEEP..];
    let mut rotated = keep.join("\n");
    rotated.push('\n');
    let _ = std::fs::write(path, rotated);
}

/// Read all logged events (newest last), skipping unparseable lines.
pub fn read_all(workspace: &Path) -> Vec<RecallEvent> {
    let path = WorkspaceConfig::recall_log_path(workspace);
    let Ok(content) = std::fs::read_to_string(&path) else {
        return Vec::new();
    };
    content
        .lines()
        .filter(|l| !l.trim().is_empty())
        .filter_map(|l| serde_json::from_str(l).ok())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn event(query: &str) -> RecallEvent {
        RecallEvent::new(query, vec!["redis".to_string()], 1, 0, 0, 120, vec![], 5)
    }

    #[test]
    fn test_emit_and_read() {
        let dir = TempDir::new().unwrap();
        emit(dir.path(), &event("what about redis"));
        let events = read_all(dir.path());
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].query, "what about redis");
        assert_eq!(events[0].terms, vec!["redis"]);
    }

    #[test]
    fn test_query_truncated() {
        let dir = TempDir::new().unwrap();
        let long = "x".repeat(500);
        emit(dir.path(), &event(&long));
        let events = read_all(dir.path());
        assert_eq!(events[0].query.chars().count(), 200);
    }

    #[test]
    fn test_preview_truncated() {
        let long = "y".repeat(200);
        let entry = RecallEvent::chunk_entry("a.md", 0.5, "fact", &long);
        assert_eq!(entry.preview.chars().count(), 80);
    }

    #[test]
    fn test_rotation_keeps_newest() {
        let dir = TempDir::new().unwrap();
        let path = WorkspaceConfig::recall_log_path(dir.path());
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();

        // Seed a file just over the threshold, then emit one more.
        let seeded: String = (0..10_100)
            .map(|i| format!("{{\"n\":{i}}}\n"))
            .collect();
        std::fs::write(&path, seeded).unwrap();
        emit(dir.path(), &event("trigger rotation"));

        let content = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 5_000);
        // Newest line survived the rotation.
        assert!(lines.last().unwrap().contains("trigger rotation"));
    }

    #[test]
    fn test_read_skips_garbage_lines() {
        let dir = TempDir::new().unwrap();
        emit(dir.path(), &event("good"));
        let path = WorkspaceConfig::recall_log_path(dir.path());
        let mut content = std::fs::read_to_string(&path).unwrap();
        content.push_str("not json at all\n");
        std::fs::write(&path, content).unwrap();
        emit(dir.path(), &event("also good"));
        assert_eq!(read_all(dir.path()).len(), 2);
    }

    #[test]
    fn test_missing_file_reads_empty() {
        let dir = TempDir::new().unwrap();
        assert!(read_all(dir.path()).is_empty());
    }
}
