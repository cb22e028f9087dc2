//! Append one structured line to today's daily log. Validation fails loud;
//! duplicate content within a day is silently skipped; header creation is
//! atomic so concurrent first writes cannot double it.

use std::collections::{HashMap, HashSet};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, OnceLock};

use chrono::{Local, NaiveDate};
use sha2::{Digest, Sha256};

/// Tags accepted on a remembered line.
const VALID_TAGS: &[&str] = &[
    "fact",
    "decision",
    "pref",
    "opinion",
    "confirmed",
    "inferred",
    "action_item",
];

#[derive(Debug, thiserror::Error)]
pub enum RememberError {
    #[error("invalid tag '{0}': expected one of fact, decision, pref, opinion, confirmed, inferred, action_item")]
    InvalidTag(String),
    #[error("nothing to remember: content is empty after sanitization")]
    EmptyContent,
    #[error("invalid date '{0}': expected YYYY-MM-DD")]
    InvalidDate(String),
    #[error("failed to write log: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone)]
pub struct RememberOutcome {
    pub file_path: PathBuf,
    /// Relative path suitable for indexing.
    pub rel_path: String,
    /// The header was written by this call.
    pub created: bool,
    /// Duplicate of something already remembered today; nothing written.
    pub skipped: bool,
    /// The exact line appended, when one was.
    pub line: Option<String>,
}

/// Process-wide per-day dedup of sanitized content hashes.
fn seen_today() -> &'static Mutex<HashMap<String, HashSet<String>>> {
    static SEEN: OnceLock<Mutex<HashMap<String, HashSet<String>>>> = OnceLock::new();
    SEEN.get_or_init(|| Mutex::new(HashMap::new()))
}

fn short_hash(content: &str) -> String {
    let digest = Sha256::digest(content.as_bytes());
    hex::encode(&digest[..8])
}

/// Collapse CR/LF runs to single spaces and trim.
fn sanitize(content: &str) -> String {
    content
        .replace(['\r', '\n'], " ")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Append `- [tag] content` to `memory/<date>.md`, creating the file with
/// its session header when needed.
pub fn remember(
    workspace: &Path,
    content: &str,
    tag: Option<&str>,
    date: Option<&str>,
) -> Result<RememberOutcome, RememberError> {
    let tag = tag.unwrap_or("fact").to_lowercase();
    if !VALID_TAGS.contains(&tag.as_str()) {
        return Err(RememberError::InvalidTag(tag));
    }

    let sanitized = sanitize(content);
    if sanitized.is_empty() {
        return Err(RememberError::EmptyContent);
    }

    let date = match date {
        Some(raw) => NaiveDate::parse_from_str(raw, "%Y-%m-%d")
            .map_err(|_| RememberError::InvalidDate(raw.to_string()))?,
        None => Local::now().date_naive(),
    };
    let date_str = date.format("%Y-%m-%d").to_string();
    let rel_path = format!("memory/{date_str}.md");
    let file_path = workspace.join(&rel_path);

    // Same content, same day: skip without touching the file.
    let hash = short_hash(&sanitized);
    {
        let mut seen = seen_today().lock().expect("remember dedup poisoned");
        let day = seen.entry(date_str.clone()).or_default();
        if !day.insert(hash) {
            return Ok(RememberOutcome {
                file_path,
                rel_path,
                created: false,
                skipped: true,
                line: None,
            });
        }
    }

    if let Some(parent) = file_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    // Exclusive create decides who writes the header.
    let created = match std::fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(&file_path)
    {
        Ok(mut file) => {
            write!(file, "# Session Log — {date_str}\n\n")?;
            true
        }
        Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => false,
        Err(e) => return Err(e.into()),
    };

    let line = format!("- [{tag}] {sanitized}\n");
    let mut file = std::fs::OpenOptions::new()
        .append(true)
        .open(&file_path)?;
    file.write_all(line.as_bytes())?;

    Ok(RememberOutcome {
        file_path,
        rel_path,
        created,
        skipped: false,
        line: Some(line),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    // The dedup map is process-global; tests use distinct content/dates.

    #[test]
    fn test_first_write_creates_header() {
        let ws = TempDir::new().unwrap();
        let outcome = remember(
            ws.path(),
            "Creatine 5g daily",
            Some("confirmed"),
            Some("2026-02-20"),
        )
        .unwrap();
        assert!(outcome.created);
        assert!(!outcome.skipped);

        let content = std::fs::read_to_string(ws.path().join("memory/2026-02-20.md")).unwrap();
        assert!(content.starts_with("# Session Log — 2026-02-20\n\n"));
        assert!(content.contains("- [confirmed] Creatine 5g daily\n"));
    }

    #[test]
    fn test_duplicate_same_day_skipped() {
        let ws = TempDir::new().unwrap();
        let first = remember(
            ws.path(),
            "dedup target content",
            Some("confirmed"),
            Some("2026-02-21"),
        )
        .unwrap();
        assert!(!first.skipped);

        let second = remember(
            ws.path(),
            "dedup target content",
            Some("confirmed"),
            Some("2026-02-21"),
        )
        .unwrap();
        assert!(second.skipped);
        assert!(second.line.is_none());

        let content = std::fs::read_to_string(ws.path().join("memory/2026-02-21.md")).unwrap();
        assert_eq!(content.matches("dedup target content").count(), 1);
        assert_eq!(content.matches("# Session Log").count(), 1);
    }

    #[test]
    fn test_append_to_existing_file() {
        let ws = TempDir::new().unwrap();
        remember(ws.path(), "first entry line", None, Some("2026-02-22")).unwrap();
        let second = remember(ws.path(), "second entry line", Some("pref"), Some("2026-02-22")).unwrap();
        assert!(!second.created);

        let content = std::fs::read_to_string(ws.path().join("memory/2026-02-22.md")).unwrap();
        assert_eq!(content.matches("# Session Log").count(), 1);
        assert!(content.contains("- [fact] first entry line\n"));
        assert!(content.contains("- [pref] second entry line\n"));
    }

    #[test]
    fn test_invalid_tag_and_empty_content() {
        let ws = TempDir::new().unwrap();
        assert!(matches!(
            remember(ws.path(), "content", Some("gossip"), Some("2026-02-23")),
            Err(RememberError::InvalidTag(_))
        ));
        assert!(matches!(
            remember(ws.path(), "  \r\n  ", None, Some("2026-02-23")),
            Err(RememberError::EmptyContent)
        ));
        assert!(matches!(
            remember(ws.path(), "content", None, Some("Feb 23")),
            Err(RememberError::InvalidDate(_))
        ));
    }

    #[test]
    fn test_newlines_collapsed() {
        let ws = TempDir::new().unwrap();
        let outcome = remember(
            ws.path(),
            "line one\r\nline two\n\nline three",
            None,
            Some("2026-02-24"),
        )
        .unwrap();
        assert_eq!(
            outcome.line.as_deref(),
            Some("- [fact] line one line two line three\n")
        );
    }
}
