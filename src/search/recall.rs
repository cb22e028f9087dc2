use std::path::Path;

use anyhow::Result;
use chrono::Local;

use crate::config::{matches_any_pattern, WorkspaceConfig};
use crate::scoring::{self, RECALL};
use crate::search::preprocess::{self, AliasMap};
use crate::storage::{SearchOptions, Store};
use crate::types::{Chunk, ChunkType, RankedChunk};

/// Options for the precision search surface.
#[derive(Debug, Clone)]
pub struct RecallOptions {
    pub limit: usize,
    /// Absolute `YYYY-MM-DD` or relative `Nd|Nw|Nm|Ny`.
    pub since: Option<String>,
    pub chunk_type: Option<ChunkType>,
    pub min_confidence: Option<f64>,
    pub include_stale: bool,
    /// Attach ±N adjacent chunks from the same file to each hit.
    pub context: usize,
}

impl Default for RecallOptions {
    fn default() -> Self {
        Self {
            limit: 10,
            since: None,
            chunk_type: None,
            min_confidence: None,
            include_stale: false,
            context: 0,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RecallResult {
    pub chunk: Chunk,
    pub score: f64,
    pub context: Vec<Chunk>,
}

/// Ranked precision search: sanitized implicit-AND first, alias-expanded OR
/// as the fallback. A malformed query yields an empty result, never an error.
pub fn recall(
    workspace: &Path,
    store: &mut Store,
    config: &WorkspaceConfig,
    query: &str,
    opts: &RecallOptions,
) -> Result<Vec<RecallResult>> {
    let aliases = AliasMap::load(workspace);
    let now = Local::now();
    let since = opts
        .since
        .as_deref()
        .and_then(|s| preprocess::parse_since(s, now));

    let Some(and_query) = preprocess::sanitize_fts_query(query) else {
        return Ok(vec![]);
    };

    let search_opts = SearchOptions {
        limit: opts.limit * 3,
        include_stale: opts.include_stale,
        since,
        until: None,
        chunk_type: opts.chunk_type,
        min_confidence: opts.min_confidence,
        skip_tracking: false,
    };

    let mut rows = store.search(&and_query, &search_opts).unwrap_or_default();
    if rows.is_empty() {
        let terms = preprocess::content_terms(query);
        if let Some(or_query) = preprocess::build_or_query(&terms, &aliases) {
            rows = store.search(&or_query, &search_opts).unwrap_or_default();
        }
    }

    let mut candidates: Vec<RankedChunk> = rows
        .into_iter()
        .filter(|r| !matches_any_pattern(&config.exclude_from_recall, &r.chunk.file_path))
        .filter(|r| !matches_any_pattern(&config.always_exclude, &r.chunk.file_path))
        .map(|r| RankedChunk::new(r.chunk, r.rank))
        .collect();

    scoring::normalize_fts_scores(&mut candidates);
    let now_ms = now.timestamp_millis();
    for c in &mut candidates {
        if let Some(weight) = config.weight_override_for(&c.chunk.file_path) {
            c.chunk.file_weight = weight;
        }
        c.score = scoring::score(c, now_ms, &RECALL);
    }
    candidates.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
    candidates.truncate(opts.limit);

    let mut results = Vec::with_capacity(candidates.len());
    for c in candidates {
        let context = if opts.context > 0 {
            store
                .get_adjacent_chunks(
                    &c.chunk.file_path,
                    c.chunk.line_start,
                    c.chunk.line_end,
                    opts.context,
                )
                .unwrap_or_default()
        } else {
            vec![]
        };
        results.push(RecallResult {
            chunk: c.chunk,
            score: c.score,
            context,
        });
    }
    Ok(results)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::NewChunk;
    use tempfile::TempDir;

    fn chunk(content: &str, line: u32) -> NewChunk {
        NewChunk {
            heading: Some("Notes".to_string()),
            content: content.to_string(),
            line_start: line,
            line_end: line + 2,
            entities: vec![],
            chunk_type: ChunkType::Fact,
            confidence: 1.0,
        }
    }

    fn setup() -> (TempDir, Store, WorkspaceConfig) {
        let dir = TempDir::new().unwrap();
        let mut store = Store::open(dir.path()).unwrap();
        store
            .insert_chunks(
                "memory/notes.md",
                1000,
                &[
                    chunk("the deploy went out friday evening", 1),
                    chunk("cache invalidation is hard", 10),
                ],
                None,
            )
            .unwrap();
        store
            .insert_chunks(
                "transcripts/call.md",
                1000,
                &[chunk("deploy discussed on the call", 1)],
                None,
            )
            .unwrap();
        (dir, store, WorkspaceConfig::default())
    }

    #[test]
    fn test_and_query_hit() {
        let (dir, mut store, config) = setup();
        let results = recall(
            dir.path(),
            &mut store,
            &config,
            "deploy friday",
            &RecallOptions::default(),
        )
        .unwrap();
        assert_eq!(results.len(), 1);
        assert!(results[0].chunk.content.contains("went out friday"));
        assert!(results[0].score > 0.0);
    }

    #[test]
    fn test_or_fallback_via_alias() {
        let (dir, mut store, config) = setup();
        // "ship" appears nowhere; its alias root "deploy" does. The AND
        // query fails and the OR expansion of "deploy" matches both files.
        let results = recall(
            dir.path(),
            &mut store,
            &config,
            "deploy nonexistentterm",
            &RecallOptions::default(),
        )
        .unwrap();
        assert_eq!(results.len(), 2);
    }

    #[test]
    fn test_exclusion_patterns() {
        let (dir, mut store, mut config) = setup();
        config.exclude_from_recall.push("transcripts/".to_string());
        let results = recall(
            dir.path(),
            &mut store,
            &config,
            "deploy",
            &RecallOptions::default(),
        )
        .unwrap();
        assert_eq!(results.len(), 1);
        assert!(!results[0].chunk.file_path.starts_with("transcripts/"));
    }

    #[test]
    fn test_garbage_query_is_empty_not_error() {
        let (dir, mut store, config) = setup();
        let results = recall(
            dir.path(),
            &mut store,
            &config,
            "the of and is",
            &RecallOptions::default(),
        )
        .unwrap();
        assert!(results.is_empty());
    }

    #[test]
    fn test_context_attachment() {
        let (dir, mut store, config) = setup();
        let opts = RecallOptions {
            context: 1,
            ..Default::default()
        };
        let results = recall(dir.path(), &mut store, &config, "invalidation", &opts).unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].context.len(), 1);
        assert!(results[0].context[0].content.contains("deploy went out"));
    }

    #[test]
    fn test_limit() {
        let (dir, mut store, config) = setup();
        let opts = RecallOptions {
            limit: 1,
            ..Default::default()
        };
        let results = recall(dir.path(), &mut store, &config, "deploy", &opts).unwrap();
        assert_eq!(results.len(), 1);
    }
}
