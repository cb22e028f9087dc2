//! Context assembly: turn a raw user message into a token-budgeted,
//! provenance-annotated context block.
//!
//! The pipeline: strip the transport envelope, detect intent, resolve
//! temporal phrasing, run a precision (AND) and a recall (OR) query, rescue
//! semantically-close chunks when an embedding is available, expand through
//! entity co-occurrence, inject priority files for action intent, penalize
//! rule boilerplate, score, budget, and format.

use std::collections::{HashMap, HashSet};
use std::path::Path;

use anyhow::Result;
use chrono::{Duration, Local};
use serde::Serialize;

use crate::config::{matches_any_pattern, WorkspaceConfig};
use crate::entities::{self, EntityCache};
use crate::recall_log::{self, RecallEvent};
use crate::scoring::{self, CIL, CIL_SEMANTIC};
use crate::search::intent::{self, Intent, ACTION_SYNTHETIC_TERMS};
use crate::search::preprocess::{self, AliasMap};
use crate::search::semantic::{cosine_similarity, EmbeddingService};
use crate::storage::{SearchOptions, Store};
use crate::temporal::{self, TemporalResolution};
use crate::types::{ChunkType, RankedChunk};

/// Cosine floor for admitting a chunk via semantic rescue.
const RESCUE_SIMILARITY_FLOOR: f64 = 0.25;
/// Rescued chunks get partial FTS credit so they cannot outrank real hits.
const RESCUE_FTS_CREDIT: f64 = 0.3;

/// Priority files guaranteed a seat for action-intent queries:
/// (path substring, max chunks, score floor).
const PRIORITY_FILES: &[(&str, usize, f64)] =
    &[("memory/open-loops.md", 3, 0.55), ("self-review", 2, 0.50)];

const HEADER_TOKEN_OVERHEAD: usize = 30;
const PER_CHUNK_TOKEN_OVERHEAD: usize = 25;
const CHARS_PER_TOKEN: f64 = 3.5;

#[derive(Debug, Clone)]
pub struct ContextOptions {
    pub max_tokens: usize,
    pub max_chunks: usize,
    pub min_score: f64,
    pub min_confidence: Option<f64>,
    /// Up to the last 3 entries contribute search terms.
    pub conversation: Vec<String>,
    pub flag_contradictions: bool,
    /// Try to embed the query for semantic scoring and rescue.
    pub use_semantic: bool,
}

impl Default for ContextOptions {
    fn default() -> Self {
        Self {
            max_tokens: 1500,
            max_chunks: 6,
            min_score: 0.25,
            min_confidence: None,
            conversation: vec![],
            flag_contradictions: true,
            use_semantic: false,
        }
    }
}

/// One retrieved chunk, shaped for presentation.
#[derive(Debug, Clone, Serialize)]
pub struct ContextChunk {
    pub id: i64,
    pub content: String,
    pub file_path: String,
    pub line_start: u32,
    pub line_end: u32,
    pub heading: Option<String>,
    pub confidence: f64,
    pub chunk_type: ChunkType,
    pub entities: Vec<String>,
    pub created_at: i64,
    pub score: f64,
    pub truncated: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct ContextResult {
    pub text: String,
    pub chunks: Vec<ContextChunk>,
    pub token_estimate: usize,
}

pub fn estimate_tokens(text: &str) -> usize {
    (text.chars().count() as f64 / CHARS_PER_TOKEN).ceil() as usize
}

/// Assemble relevant context for a user message.
#[allow(clippy::too_many_arguments)]
pub async fn get_relevant_context(
    workspace: &Path,
    store: &mut Store,
    config: &WorkspaceConfig,
    embeddings: &EmbeddingService,
    entity_cache: &EntityCache,
    message: &str,
    opts: &ContextOptions,
) -> Result<ContextResult> {
    let started = std::time::Instant::now();
    let now = Local::now();
    let now_ms = now.timestamp_millis();

    // Pre-processing: envelope, intent, temporal.
    let cleaned = intent::strip_envelope(message);
    let query_intent = intent::detect_intent(&cleaned);
    let temporal = temporal::resolve_temporal_query(&cleaned, now);

    let mut max_chunks = opts.max_chunks;
    let mut min_score = opts.min_score;
    if let Some(i) = query_intent {
        if let Some(m) = i.max_chunks() {
            max_chunks = max_chunks.max(m);
        }
        if let Some(s) = i.min_score() {
            min_score = min_score.min(s);
        }
    }
    if !temporal.date_terms.is_empty() {
        min_score = min_score.min(0.05);
        max_chunks = max_chunks.max(8);
    }

    // Term extraction: stripped query + proper nouns + recent conversation
    // + date terms + action synthetics.
    let mut terms: Vec<String> = preprocess::content_terms(&temporal.stripped_query);
    terms.extend(preprocess::capitalized_spans(&cleaned));
    for prior in opts.conversation.iter().rev().take(3) {
        terms.extend(preprocess::content_terms(prior));
    }
    terms.extend(temporal.date_terms.iter().cloned());
    if query_intent == Some(Intent::Action) {
        terms.extend(ACTION_SYNTHETIC_TERMS.iter().map(|s| (*s).to_string()));
    }
    let terms = dedup_preserving_order(terms);

    // Entities known to the index, matched against message + conversation.
    let known_entities = entity_cache.get(store)?;
    let haystack = {
        let mut h = cleaned.to_lowercase();
        for prior in &opts.conversation {
            h.push(' ');
            h.push_str(&prior.to_lowercase());
        }
        h
    };
    let matched_entities: HashSet<String> = known_entities
        .iter()
        .filter(|e| haystack.contains(e.as_str()))
        .cloned()
        .collect();
    let matched_entities = entities::expand_with_cooccurrence(store, &matched_entities, 2)?;

    // Attribution lifts the recall-only exclusions.
    let is_attribution = temporal::attribution_entity(&cleaned, &known_entities).is_some();
    let exclusions: Vec<String> = if is_attribution {
        config.always_exclude.clone()
    } else {
        config
            .exclude_from_recall
            .iter()
            .chain(config.always_exclude.iter())
            .cloned()
            .collect()
    };

    // Dual query.
    let fetch_limit = max_chunks * 5;
    let base_opts = SearchOptions {
        limit: fetch_limit,
        include_stale: false,
        since: temporal.since,
        until: temporal.until,
        chunk_type: None,
        min_confidence: opts.min_confidence,
        skip_tracking: false,
    };
    let aliases = AliasMap::load(workspace);

    let mut candidates: HashMap<i64, RankedChunk> = HashMap::new();
    let mut excluded_count = 0usize;
    let admit = |candidates: &mut HashMap<i64, RankedChunk>,
                     rows: Vec<crate::types::ScoredChunk>,
                     and_match: bool,
                     excluded: &mut usize| {
        for row in rows {
            let crate::types::ScoredChunk { chunk, rank } = row;
            if matches_any_pattern(&exclusions, &chunk.file_path) {
                *excluded += 1;
                continue;
            }
            let id = chunk.id;
            let entry = candidates
                .entry(id)
                .or_insert_with(|| RankedChunk::new(chunk, rank));
            if and_match {
                entry.and_match = true;
            }
            if rank < entry.rank {
                entry.rank = rank;
            }
        }
    };

    if let Some(and_query) = preprocess::sanitize_fts_query(&temporal.stripped_query) {
        let rows = store.search(&and_query, &base_opts).unwrap_or_default();
        admit(&mut candidates, rows, true, &mut excluded_count);
    }

    if !temporal.date_terms.is_empty() {
        let date_query = temporal
            .date_terms
            .iter()
            .map(|d| format!("\"{d}\""))
            .collect::<Vec<_>>()
            .join(" OR ");
        let rows = store.search(&date_query, &base_opts).unwrap_or_default();
        admit(&mut candidates, rows, false, &mut excluded_count);
    }

    let or_query = preprocess::build_or_query(&terms, &aliases);
    if let Some(or_query) = &or_query {
        let rows = store.search(or_query, &base_opts).unwrap_or_default();
        admit(&mut candidates, rows, false, &mut excluded_count);
    }

    // Forward rescue: a future window would hide chunks written recently
    // about the future; re-run against a 14-day-recent window instead.
    if temporal.forward_looking && temporal.since.is_some_and(|s| s > now_ms) {
        let recent_opts = SearchOptions {
            since: Some(now_ms - Duration::days(14).num_milliseconds()),
            until: None,
            ..base_opts.clone()
        };
        if let Some(or_query) = &or_query {
            let rows = store.search(or_query, &recent_opts).unwrap_or_default();
            admit(&mut candidates, rows, false, &mut excluded_count);
        }
        if let Some(fwd_query) = preprocess::build_or_query(&temporal.forward_terms, &aliases) {
            let rows = store.search(&fwd_query, &recent_opts).unwrap_or_default();
            admit(&mut candidates, rows, false, &mut excluded_count);
        }
    }

    let mut candidates: Vec<RankedChunk> = candidates.into_values().collect();

    // Precision hits win ties: a more negative rank is a better rank.
    for c in &mut candidates {
        if c.and_match {
            c.rank *= 1.3;
        }
    }
    scoring::normalize_fts_scores(&mut candidates);

    // Semantic scoring and rescue, only with a query embedding in hand.
    let query_embedding = if opts.use_semantic {
        embeddings.embed(&cleaned).await
    } else {
        None
    };
    if let Some(query_vec) = &query_embedding {
        for c in &mut candidates {
            if let Some(stored) = &c.chunk.embedding {
                c.semantic_sim = Some(cosine_similarity(query_vec, stored) as f64);
            }
        }

        let candidate_ids: HashSet<i64> = candidates.iter().map(|c| c.chunk.id).collect();
        let mut rescued: Vec<(i64, f64)> = store
            .embedded_vectors()?
            .into_iter()
            .filter(|(id, _)| !candidate_ids.contains(id))
            .map(|(id, vec)| (id, cosine_similarity(query_vec, &vec) as f64))
            .filter(|(_, sim)| *sim >= RESCUE_SIMILARITY_FLOOR)
            .collect();
        rescued.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        rescued.truncate(max_chunks);

        for (id, sim) in rescued {
            let Some(chunk) = store.get_chunk(id)? else {
                continue;
            };
            if matches_any_pattern(&exclusions, &chunk.file_path) {
                excluded_count += 1;
                continue;
            }
            if let Some(floor) = opts.min_confidence {
                if chunk.confidence < floor {
                    continue;
                }
            }
            if let Some(since) = temporal.since {
                if chunk.created_at < since {
                    continue;
                }
            }
            if let Some(until) = temporal.until {
                if chunk.created_at >= until {
                    continue;
                }
            }
            let mut ranked = RankedChunk::new(chunk, 0.0);
            ranked.semantic_sim = Some(sim);
            ranked.normalized_fts = sim * RESCUE_FTS_CREDIT;
            candidates.push(ranked);
        }
    }

    // Entity tags and config file-weight overrides.
    for c in &mut candidates {
        c.entity_match = c
            .chunk
            .entities
            .iter()
            .filter_map(|e| entities::normalize_label(e))
            .any(|e| matched_entities.contains(&e));
        if let Some(weight) = config.weight_override_for(&c.chunk.file_path) {
            c.chunk.file_weight = weight;
        }
    }

    // Composite score.
    let half_life = temporal
        .recency_boost
        .unwrap_or(config.recency_boost_days);
    let profile = if query_embedding.is_some() {
        CIL_SEMANTIC.with_half_life(half_life)
    } else {
        CIL.with_half_life(half_life)
    };
    for c in &mut candidates {
        c.score = scoring::score(c, now_ms, &profile);
    }

    apply_temporal_boosts(&mut candidates, &temporal);

    if let Some(i) = query_intent {
        for c in &mut candidates {
            c.score *= 1.0 + i.type_boost(c.chunk.chunk_type);
        }
    }

    // Priority-file injection for action intent.
    if query_intent == Some(Intent::Action) {
        for (pattern, take, floor) in PRIORITY_FILES {
            let mut injected = 0usize;
            for chunk in store.get_chunks_by_file(pattern)? {
                if injected >= *take {
                    break;
                }
                if chunk.stale || matches_any_pattern(&exclusions, &chunk.file_path) {
                    continue;
                }
                if let Some(conf_floor) = opts.min_confidence {
                    if chunk.confidence < conf_floor {
                        continue;
                    }
                }
                injected += 1;
                if let Some(existing) = candidates.iter_mut().find(|c| c.chunk.id == chunk.id) {
                    existing.score = existing.score.max(*floor);
                    existing.injected = true;
                } else {
                    let mut ranked = RankedChunk::new(chunk, 0.0);
                    ranked.score = *floor;
                    ranked.injected = true;
                    candidates.push(ranked);
                }
            }
        }
    }

    // Rule penalty, unless the user is asking about rules.
    if !intent::asks_about_rules(&cleaned) && query_intent != Some(Intent::Reasoning) {
        for c in &mut candidates {
            let mut text = c.chunk.content.to_lowercase();
            if let Some(h) = &c.chunk.heading {
                text.push(' ');
                text.push_str(&h.to_lowercase());
            }
            let rule_conf = intent::rule_confidence(&text);
            if rule_conf > 0.0 {
                c.score *= 1.0 - 0.4 * rule_conf;
            }
        }
    }

    // Finalize: sort, floor, cap.
    candidates.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
    let scored_total = candidates.len();
    candidates.retain(|c| c.score >= min_score);
    candidates.truncate(max_chunks);
    let dropped = scored_total - candidates.len();

    // Token budgeting, then formatting with a re-check loop.
    let mut chunks = budget_chunks(&candidates, opts.max_tokens);
    let mut text = render(&chunks, now_ms);
    while estimate_tokens(&text) > opts.max_tokens && chunks.len() > 1 {
        chunks.pop();
        text = render(&chunks, now_ms);
    }

    // Contradiction annotation.
    if opts.flag_contradictions && chunks.len() >= 2 {
        let ids: Vec<i64> = chunks.iter().map(|c| c.id).collect();
        let conflicts = store.contradictions_for_chunks(&ids)?;
        if !conflicts.is_empty() {
            text.push_str("\n⚠ Potential contradictions detected:\n");
            for conflict in conflicts {
                let old = store.get_chunk(conflict.chunk_id_old)?;
                let new = store.get_chunk(conflict.chunk_id_new)?;
                let preview = |c: Option<crate::types::Chunk>| {
                    c.map(|c| recall_log::truncate_chars(&flatten(&c.content), 80))
                        .unwrap_or_else(|| "(pruned)".to_string())
                };
                text.push_str(&format!(
                    "- \"{}…\" vs \"{}…\" ({})\n",
                    preview(old),
                    preview(new),
                    conflict.reason
                ));
            }
        }
    }

    let token_estimate = estimate_tokens(&text);

    // Best-effort logging; never disturbs the result.
    let event = RecallEvent::new(
        message,
        terms,
        chunks.len(),
        dropped,
        excluded_count,
        token_estimate,
        chunks
            .iter()
            .map(|c| {
                RecallEvent::chunk_entry(&c.file_path, c.score, c.chunk_type.as_str(), &c.content)
            })
            .collect(),
        started.elapsed().as_millis() as u64,
    );
    recall_log::emit(workspace, &event);

    Ok(ContextResult {
        text,
        chunks,
        token_estimate,
    })
}

fn dedup_preserving_order(terms: Vec<String>) -> Vec<String> {
    let mut seen = HashSet::new();
    terms
        .into_iter()
        .filter(|t| seen.insert(t.clone()))
        .collect()
}

/// Post-score multipliers for date-anchored queries: exact date in the
/// path ×1.8, path date inside the window ×1.3, exact date on
/// `created_at` ×1.5.
fn apply_temporal_boosts(candidates: &mut [RankedChunk], temporal: &TemporalResolution) {
    if temporal.date_terms.is_empty() && temporal.since.is_none() {
        return;
    }
    for c in candidates {
        let path = &c.chunk.file_path;
        if temporal.date_terms.iter().any(|d| path.contains(d)) {
            c.score *= 1.8;
        } else if let (Some(since), Some(path_date)) = (
            temporal.since,
            crate::index::chunker::extract_date_from_path(path),
        ) {
            let in_window =
                path_date >= since && temporal.until.is_none_or(|u| path_date < u);
            if in_window {
                c.score *= 1.3;
            }
        }
        if !temporal.date_terms.is_empty() {
            let created = chrono::DateTime::from_timestamp_millis(c.chunk.created_at)
                .map(|dt| {
                    dt.with_timezone(&Local)
                        .date_naive()
                        .format("%Y-%m-%d")
                        .to_string()
                })
                .unwrap_or_default();
            if temporal.date_terms.contains(&created) {
                c.score *= 1.5;
            }
        }
    }
}

fn flatten(content: &str) -> String {
    content.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Greedy token budgeting. When the next chunk would overflow, try to
/// truncate it at a sentence/newline boundary keeping at least half the
/// available content budget, then stop either way.
fn budget_chunks(candidates: &[RankedChunk], max_tokens: usize) -> Vec<ContextChunk> {
    let mut used = HEADER_TOKEN_OVERHEAD;
    let mut out = Vec::new();

    for c in candidates {
        let content = flatten(&c.chunk.content);
        let content_tokens = estimate_tokens(&content);
        let cost = PER_CHUNK_TOKEN_OVERHEAD + content_tokens;

        if used + cost <= max_tokens {
            used += cost;
            out.push(shape(c, content, false));
            continue;
        }

        let available = max_tokens
            .saturating_sub(used)
            .saturating_sub(PER_CHUNK_TOKEN_OVERHEAD);
        if available > 0 {
            if let Some(truncated) = truncate_at_boundary(&content, available) {
                out.push(shape(c, truncated, true));
            }
        }
        break;
    }
    out
}

/// Cut `content` down to roughly `budget_tokens`, preferring the last
/// sentence or line boundary that keeps at least half of the budget.
fn truncate_at_boundary(content: &str, budget_tokens: usize) -> Option<String> {
    let allowed_chars = (budget_tokens as f64 * CHARS_PER_TOKEN).floor() as usize;
    if allowed_chars < 8 || allowed_chars >= content.chars().count() {
        return None;
    }
    let slice: String = content.chars().take(allowed_chars).collect();
    let boundary = slice
        .rfind(". ")
        .map(|i| i + 1)
        .or_else(|| slice.rfind('\n'));
    let cut = match boundary {
        Some(b) if b >= allowed_chars / 2 => slice[..b].trim_end().to_string(),
        _ => slice.trim_end().to_string(),
    };
    if cut.is_empty() {
        None
    } else {
        Some(cut)
    }
}

fn shape(c: &RankedChunk, content: String, truncated: bool) -> ContextChunk {
    ContextChunk {
        id: c.chunk.id,
        content,
        file_path: c.chunk.file_path.clone(),
        line_start: c.chunk.line_start,
        line_end: c.chunk.line_end,
        heading: c.chunk.heading.clone(),
        confidence: c.chunk.confidence,
        chunk_type: c.chunk.chunk_type,
        entities: c.chunk.entities.clone(),
        created_at: c.chunk.created_at,
        score: c.score,
        truncated,
    }
}

fn age_label(created_at: i64, now_ms: i64) -> String {
    let days = ((now_ms - created_at) as f64 / 86_400_000.0).floor().max(0.0) as i64;
    match days {
        0 => "today".to_string(),
        1 => "yesterday".to_string(),
        2..=6 => format!("{days}d ago"),
        7..=29 => format!("{}w ago", days / 7),
        _ => format!("{}mo ago", days / 30),
    }
}

fn confidence_flag(confidence: f64) -> Option<&'static str> {
    if confidence >= 0.9 {
        None
    } else if confidence >= 0.6 {
        Some("⚠low-conf")
    } else {
        Some("⚠⚠very-low-conf")
    }
}

fn render(chunks: &[ContextChunk], now_ms: i64) -> String {
    let mut text = String::from(
        "## Recalled Context\nStructured memories retrieved by relevance. Source citations included.\n\n",
    );
    for c in chunks {
        text.push_str("- ");
        text.push_str(&c.content);
        if c.truncated {
            text.push_str(" [truncated]");
        }
        text.push('\n');
        text.push_str(&format!("  ↳ {}:{}", c.file_path, c.line_start));
        if c.chunk_type != ChunkType::Raw {
            text.push_str(&format!(" [{}]", c.chunk_type));
        }
        if let Some(flag) = confidence_flag(c.confidence) {
            text.push(' ');
            text.push_str(flag);
        }
        text.push_str(&format!(" ({})\n", age_label(c.created_at, now_ms)));
    }
    text
}
