pub mod chunker;
pub mod embedder;

use std::collections::BTreeSet;
use std::path::Path;

use anyhow::{Context, Result};
use walkdir::WalkDir;

use crate::config::{glob_matches, WorkspaceConfig};
use crate::storage::Store;
use crate::types::{FileError, IndexReport, NewChunk};

/// Structural top-level files indexed whenever present.
const TOP_LEVEL_FILES: &[&str] = &[
    "MEMORY.md",
    "USER.md",
    "SOUL.md",
    "STATE.md",
    "TOOLS.md",
    "VOICE.md",
    "IDENTITY.md",
];

/// Directories whose markdown is always indexed.
const DEFAULT_DIRS: &[&str] = &["memory", "ingest"];

/// Discover the set of files to index, as workspace-relative paths with
/// forward slashes, deduplicated and sorted.
pub fn discover_files(workspace: &Path, config: &WorkspaceConfig) -> Vec<String> {
    let mut found: BTreeSet<String> = BTreeSet::new();

    for name in TOP_LEVEL_FILES {
        if workspace.join(name).is_file() {
            found.insert((*name).to_string());
        }
    }

    for dir in DEFAULT_DIRS {
        let root = workspace.join(dir);
        if !root.is_dir() {
            continue;
        }
        for entry in WalkDir::new(&root).into_iter().filter_map(|e| e.ok()) {
            if entry.file_type().is_file()
                && entry.path().extension().is_some_and(|e| e == "md")
            {
                if let Some(rel) = relative_path(workspace, entry.path()) {
                    found.insert(rel);
                }
            }
        }
    }

    for include in &config.include {
        if workspace.join(include).is_file() {
            found.insert(include.replace('\\', "/"));
        }
    }

    if !config.include_globs.is_empty() {
        for entry in WalkDir::new(workspace)
            .into_iter()
            .filter_entry(|e| !is_hidden(e))
            .filter_map(|e| e.ok())
        {
            if !entry.file_type().is_file() {
                continue;
            }
            let Some(rel) = relative_path(workspace, entry.path()) else {
                continue;
            };
            if config.include_globs.iter().any(|g| glob_matches(g, &rel)) {
                found.insert(rel);
            }
        }
    }

    found.into_iter().collect()
}

fn is_hidden(entry: &walkdir::DirEntry) -> bool {
    entry
        .file_name()
        .to_str()
        .is_some_and(|s| s.starts_with('.') && s.len() > 1)
}

fn relative_path(workspace: &Path, path: &Path) -> Option<String> {
    path.strip_prefix(workspace)
        .ok()
        .map(|p| p.to_string_lossy().replace('\\', "/"))
}

/// Index every discovered file, then drop chunks for files that no longer
/// exist. Unchanged files (same mtime) are skipped unless `force`.
pub fn index_workspace(
    workspace: &Path,
    store: &mut Store,
    config: &WorkspaceConfig,
    force: bool,
) -> Result<IndexReport> {
    let mut report = IndexReport::default();
    let discovered = discover_files(workspace, config);

    for rel in &discovered {
        match index_file(workspace, store, config, rel, force) {
            Ok(true) => report.indexed += 1,
            Ok(false) => report.skipped += 1,
            Err(e) => {
                tracing::warn!("failed to index {rel}: {e:#}");
                report.errors.push(FileError {
                    file_path: rel.clone(),
                    error: format!("{e:#}"),
                });
            }
        }
    }

    // Orphan cleanup: anything in the store no longer discovered.
    let known: BTreeSet<String> = discovered.into_iter().collect();
    for stored in store.get_all_file_paths()? {
        if !known.contains(&stored) {
            store.delete_file_chunks(&stored)?;
            report.cleaned += 1;
        }
    }

    Ok(report)
}

/// Index one file (used by `remember` after an append). Returns false when
/// the file was up to date and skipped.
pub fn index_single_file(
    workspace: &Path,
    store: &mut Store,
    config: &WorkspaceConfig,
    rel: &str,
) -> Result<bool> {
    index_file(workspace, store, config, rel, false)
}

fn index_file(
    workspace: &Path,
    store: &mut Store,
    config: &WorkspaceConfig,
    rel: &str,
    force: bool,
) -> Result<bool> {
    let full = workspace.join(rel);
    let meta = std::fs::metadata(&full)
        .with_context(|| format!("Failed to stat {}", full.display()))?;
    let mtime_ms = mtime_millis(&meta);

    if !force {
        if let Some(existing) = store.get_file_meta(rel)? {
            if existing.mtime_ms == mtime_ms {
                return Ok(false);
            }
        }
    }

    let text = std::fs::read_to_string(&full)
        .with_context(|| format!("Failed to read {}", full.display()))?;

    let chunks = chunk_file(&text, rel, config);
    let created_at_hint = chunker::extract_date_from_path(rel);
    store.insert_chunks(rel, mtime_ms, &chunks, created_at_hint)?;
    tracing::debug!("indexed {rel}: {} chunks", chunks.len());
    Ok(true)
}

/// Chunk a file's text: file-type defaults as the baseline, inline tags on top.
pub fn chunk_file(text: &str, rel: &str, config: &WorkspaceConfig) -> Vec<NewChunk> {
    let mut chunks = chunker::chunk_markdown(text);
    if let Some((ty, conf)) = config.type_default_for(rel) {
        for chunk in &mut chunks {
            chunk.chunk_type = ty;
            chunk.confidence = conf;
        }
    }
    let facts = chunker::extract_tagged_facts(text);
    chunker::upgrade_chunks_with_facts(&mut chunks, &facts);
    chunks
}

fn mtime_millis(meta: &std::fs::Metadata) -> i64 {
    meta.modified()
        .ok()
        .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}
