//! Turn transcript (.txt) and CSV sources into tagged markdown under
//! `ingest/`, tracked by a manifest so unchanged sources are skipped and
//! outputs of deleted sources are removed. The indexer consumes the
//! generated markdown like any other file.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use anyhow::{Context, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::config::IngestConfig;

const MANIFEST_FILE: &str = ".sync-manifest.json";

fn speaker_line_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^([A-Za-z][A-Za-z .'-]{0,40}):\s+(\S.*)$").unwrap())
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct Manifest {
    #[serde(default)]
    sources: HashMap<String, ManifestEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ManifestEntry {
    mtime_ms: i64,
    output: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct IngestReport {
    pub generated: usize,
    pub skipped: usize,
    pub removed: usize,
    pub errors: Vec<String>,
}

fn manifest_path(workspace: &Path) -> PathBuf {
    workspace.join("ingest").join(MANIFEST_FILE)
}

fn load_manifest(workspace: &Path) -> Manifest {
    let path = manifest_path(workspace);
    std::fs::read_to_string(&path)
        .ok()
        .and_then(|content| serde_json::from_str(&content).ok())
        .unwrap_or_default()
}

fn save_manifest(workspace: &Path, manifest: &Manifest) -> Result<()> {
    let path = manifest_path(workspace);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(&path, serde_json::to_string_pretty(manifest)?)?;
    Ok(())
}

/// Sync sources from the configured directory into `ingest/*.md`.
pub fn sync_ingest(workspace: &Path, config: &IngestConfig, force: bool) -> Result<IngestReport> {
    let source_dir = workspace.join(&config.source_dir);
    let mut manifest = load_manifest(workspace);
    let mut report = IngestReport::default();

    let mut present: Vec<(String, PathBuf, i64)> = Vec::new();
    if source_dir.is_dir() {
        for entry in std::fs::read_dir(&source_dir)? {
            let entry = entry?;
            let path = entry.path();
            let ext = path
                .extension()
                .and_then(|e| e.to_str())
                .map(str::to_lowercase);
            if !matches!(ext.as_deref(), Some("txt" | "csv")) {
                continue;
            }
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            let mtime = entry
                .metadata()
                .ok()
                .and_then(|m| m.modified().ok())
                .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
                .map(|d| d.as_millis() as i64)
                .unwrap_or(0);
            present.push((name.to_string(), path.clone(), mtime));
        }
    }
    present.sort();

    for (name, path, mtime) in &present {
        if !force {
            if let Some(entry) = manifest.sources.get(name) {
                if entry.mtime_ms == *mtime {
                    report.skipped += 1;
                    continue;
                }
            }
        }
        match generate_markdown(path, config) {
            Ok(markdown) => {
                let stem = path
                    .file_stem()
                    .and_then(|s| s.to_str())
                    .unwrap_or("source");
                let output_rel = format!("ingest/{stem}.md");
                let output = workspace.join(&output_rel);
                if let Some(parent) = output.parent() {
                    std::fs::create_dir_all(parent)?;
                }
                std::fs::write(&output, markdown)
                    .with_context(|| format!("Failed to write {}", output.display()))?;
                manifest.sources.insert(
                    name.clone(),
                    ManifestEntry {
                        mtime_ms: *mtime,
                        output: output_rel,
                    },
                );
                report.generated += 1;
            }
            Err(e) => {
                tracing::warn!("failed to ingest {name}: {e:#}");
                report.errors.push(format!("{name}: {e:#}"));
            }
        }
    }

    // Sources that disappeared take their outputs with them.
    let present_names: std::collections::HashSet<&str> =
        present.iter().map(|(n, _, _)| n.as_str()).collect();
    let gone: Vec<String> = manifest
        .sources
        .keys()
        .filter(|k| !present_names.contains(k.as_str()))
        .cloned()
        .collect();
    for name in gone {
        if let Some(entry) = manifest.sources.remove(&name) {
            let _ = std::fs::remove_file(workspace.join(&entry.output));
            report.removed += 1;
        }
    }

    save_manifest(workspace, &manifest)?;
    Ok(report)
}

fn generate_markdown(source: &Path, config: &IngestConfig) -> Result<String> {
    let stem = source
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("source");
    let ext = source
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_lowercase);
    match ext.as_deref() {
        Some("csv") => generate_from_csv(source, stem, config),
        _ => generate_from_transcript(source, stem),
    }
}

/// `Speaker: text` lines become tagged bullets with the speaker as a bold
/// entity; everything else becomes a plain bullet.
fn generate_from_transcript(source: &Path, stem: &str) -> Result<String> {
    let text = std::fs::read_to_string(source)
        .with_context(|| format!("Failed to read {}", source.display()))?;
    let mut out = format!("# Transcript — {stem}\n\n");
    for line in text.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        if let Some(caps) = speaker_line_re().captures(trimmed) {
            out.push_str(&format!("- [fact] **{}**: {}\n", caps[1].trim(), &caps[2]));
        } else {
            out.push_str(&format!("- {trimmed}\n"));
        }
    }
    Ok(out)
}

/// Each CSV row becomes a tagged bullet of `header: value` pairs; the
/// configured entity column leads the line as a bold entity.
fn generate_from_csv(source: &Path, stem: &str, config: &IngestConfig) -> Result<String> {
    let mut reader = csv::Reader::from_path(source)
        .with_context(|| format!("Failed to read {}", source.display()))?;
    let headers = reader.headers()?.clone();
    let entity_idx = config
        .entity_column
        .as_deref()
        .and_then(|col| headers.iter().position(|h| h.eq_ignore_ascii_case(col)));

    let mut out = format!("# Import — {stem}\n\n");
    for record in reader.records() {
        let record = record?;
        let mut parts = Vec::new();
        for (i, value) in record.iter().enumerate() {
            if value.trim().is_empty() || Some(i) == entity_idx {
                continue;
            }
            let header = headers.get(i).unwrap_or("");
            parts.push(format!("{header}: {}", value.trim()));
        }
        let body = parts.join("; ");
        match entity_idx.and_then(|i| record.get(i)).filter(|v| !v.trim().is_empty()) {
            Some(entity) => {
                out.push_str(&format!("- [fact] **{}** — {body}\n", entity.trim()));
            }
            None => out.push_str(&format!("- [fact] {body}\n")),
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn config() -> IngestConfig {
        IngestConfig {
            source_dir: "sources".into(),
            auto_sync: false,
            entity_column: Some("name".into()),
        }
    }

    fn write(ws: &TempDir, rel: &str, content: &str) {
        let full = ws.path().join(rel);
        std::fs::create_dir_all(full.parent().unwrap()).unwrap();
        std::fs::write(full, content).unwrap();
    }

    #[test]
    fn test_transcript_to_markdown() {
        let ws = TempDir::new().unwrap();
        write(
            &ws,
            "sources/standup.txt",
            "Sam: shipping the cache fix today\nnoise line without speaker\nDana: reviewing the PR\n",
        );

        let report = sync_ingest(ws.path(), &config(), false).unwrap();
        assert_eq!(report.generated, 1);

        let md = std::fs::read_to_string(ws.path().join("ingest/standup.md")).unwrap();
        assert!(md.starts_with("# Transcript — standup\n"));
        assert!(md.contains("- [fact] **Sam**: shipping the cache fix today\n"));
        assert!(md.contains("- [fact] **Dana**: reviewing the PR\n"));
        assert!(md.contains("- noise line without speaker\n"));
    }

    #[test]
    fn test_csv_to_markdown_with_entity_column() {
        let ws = TempDir::new().unwrap();
        write(
            &ws,
            "sources/contacts.csv",
            "name,role,city\nSam Altman,founder,SF\nDana,engineer,Berlin\n",
        );

        sync_ingest(ws.path(), &config(), false).unwrap();
        let md = std::fs::read_to_string(ws.path().join("ingest/contacts.md")).unwrap();
        assert!(md.starts_with("# Import — contacts\n"));
        assert!(md.contains("- [fact] **Sam Altman** — role: founder; city: SF\n"));
        assert!(md.contains("- [fact] **Dana** — role: engineer; city: Berlin\n"));
    }

    #[test]
    fn test_manifest_skips_unchanged() {
        let ws = TempDir::new().unwrap();
        write(&ws, "sources/a.txt", "Sam: hello there friends\n");

        let r1 = sync_ingest(ws.path(), &config(), false).unwrap();
        assert_eq!(r1.generated, 1);
        let r2 = sync_ingest(ws.path(), &config(), false).unwrap();
        assert_eq!(r2.generated, 0);
        assert_eq!(r2.skipped, 1);

        let r3 = sync_ingest(ws.path(), &config(), true).unwrap();
        assert_eq!(r3.generated, 1);
    }

    #[test]
    fn test_removed_source_removes_output() {
        let ws = TempDir::new().unwrap();
        write(&ws, "sources/a.txt", "Sam: short lived content\n");
        sync_ingest(ws.path(), &config(), false).unwrap();
        assert!(ws.path().join("ingest/a.md").exists());

        std::fs::remove_file(ws.path().join("sources/a.txt")).unwrap();
        let report = sync_ingest(ws.path(), &config(), false).unwrap();
        assert_eq!(report.removed, 1);
        assert!(!ws.path().join("ingest/a.md").exists());
    }

    #[test]
    fn test_missing_source_dir_is_empty_report() {
        let ws = TempDir::new().unwrap();
        let report = sync_ingest(ws.path(), &config(), false).unwrap();
        assert_eq!(report.generated + report.skipped + report.removed, 0);
    }
}
