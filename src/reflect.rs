//! The maintenance cycle: decay confidence, reinforce accessed chunks,
//! mark stale rows, detect contradictions, prune to the archive, and
//! rebuild the entity index. Passes run in a fixed order, each in its own
//! transaction; `dry_run` produces the same report with no writes.

use std::collections::{HashMap, HashSet};
use std::sync::OnceLock;

use anyhow::Result;
use regex::Regex;
use serde::Serialize;

use crate::config::ReflectConfig;
use crate::entities::{self, EntityIndexReport};
use crate::index::chunker::extract_date_from_path;
use crate::search::preprocess;
use crate::storage::Store;
use crate::types::{Chunk, ChunkType};

const MS_PER_DAY: f64 = 86_400_000.0;

/// Headings too generic to signal that two chunks describe the same thing.
const GENERIC_HEADINGS: &[&str] = &[
    "overview", "setup", "installation", "usage", "dependencies", "requirements",
    "getting started", "introduction", "summary", "notes", "context", "references",
    "links", "resources", "todo", "changelog", "configuration", "config",
    "what was done", "what i learned", "open questions", "files changed",
];

/// Headings shared by ≥ this many distinct files are template headings.
const TEMPLATE_FILE_THRESHOLD: usize = 3;
/// Heading groups larger than this are skipped outright.
const GROUP_SIZE_CAP: usize = 50;
/// Token distance for the negation-proximity requirement.
const PROXIMITY_WINDOW: usize = 8;

fn negation_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"(?i)\b(?:not|no\s+longer|stopped|quit|switched\s+from|dropped|removed|cancelled|never|don'?t|doesn'?t|didn'?t|won'?t|can'?t)\b",
        )
        .unwrap()
    })
}

/// Single-token forms of the negation markers, for proximity checks.
const NEGATION_TOKENS: &[&str] = &[
    "not", "never", "stopped", "quit", "dropped", "removed", "cancelled", "longer",
    "switched", "dont", "doesnt", "didnt", "wont", "cant",
];

#[derive(Debug, Clone, Default, Serialize)]
pub struct ReflectReport {
    pub dry_run: bool,
    pub decayed: usize,
    pub reinforced: usize,
    pub marked_stale: usize,
    pub contradictions_found: usize,
    pub pruned: usize,
    pub entities: EntityIndexReport,
}

/// Run the full cycle: decay → reinforce → stale → contradictions → prune
/// → entity rebuild.
pub fn run_reflect_cycle(
    store: &mut Store,
    config: &ReflectConfig,
    dry_run: bool,
) -> Result<ReflectReport> {
    let now = crate::storage::sqlite::now_ms();
    let mut report = ReflectReport {
        dry_run,
        ..Default::default()
    };

    // Pass 1: decay. `confirmed` is immune; `outdated` decays double.
    let chunks = store.all_chunks()?;
    let mut decay_updates = Vec::new();
    for chunk in &chunks {
        if chunk.chunk_type == ChunkType::Confirmed || chunk.confidence <= 0.0 {
            continue;
        }
        let reference = chunk.last_accessed.unwrap_or(chunk.created_at);
        let days = ((now - reference) as f64 / MS_PER_DAY).max(0.0);
        let type_rate = if chunk.chunk_type == ChunkType::Outdated {
            2.0
        } else {
            1.0
        };
        let rate = type_rate * config.decay_rate;
        let delta = (days / config.half_life_days) * rate * 0.5;
        let decayed = round3((chunk.confidence - delta).max(0.0));
        if decayed < chunk.confidence {
            decay_updates.push((chunk.id, decayed));
        }
    }
    report.decayed = decay_updates.len();
    if !dry_run {
        store.apply_confidence_updates(&decay_updates)?;
    }

    // Pass 2: reinforce. Access lifts confidence to a floor; idempotent.
    let chunks = if dry_run {
        apply_pending(chunks, &decay_updates)
    } else {
        store.all_chunks()?
    };
    let mut reinforce_updates = Vec::new();
    for chunk in &chunks {
        if chunk.access_count <= 0 {
            continue;
        }
        let floor = (chunk.access_count as f64 * 0.02).min(0.5);
        if chunk.confidence < floor {
            reinforce_updates.push((chunk.id, round3(floor)));
        }
    }
    report.reinforced = reinforce_updates.len();
    if !dry_run {
        store.apply_confidence_updates(&reinforce_updates)?;
    }

    // Pass 3: mark stale.
    let chunks = if dry_run {
        apply_pending(chunks, &reinforce_updates)
    } else {
        store.all_chunks()?
    };
    let mut stale_ids = Vec::new();
    for chunk in &chunks {
        if chunk.stale {
            continue;
        }
        let age_days = ((now - chunk.created_at) as f64 / MS_PER_DAY).max(0.0);
        if (chunk.confidence < 0.3 && age_days > 90.0)
            || (chunk.confidence < 0.1 && age_days > 30.0)
        {
            stale_ids.push(chunk.id);
        }
    }
    report.marked_stale = stale_ids.len();
    if !dry_run {
        store.mark_stale(&stale_ids)?;
    }

    // Pass 4: contradictions.
    let stale_set: HashSet<i64> = stale_ids.iter().copied().collect();
    let live: Vec<&Chunk> = chunks
        .iter()
        .filter(|c| !c.stale && !stale_set.contains(&c.id))
        .collect();
    let found = detect_contradictions(store, &live, config)?;
    report.contradictions_found = found.len();
    if !dry_run {
        store.record_contradictions(&found)?;
    }

    // Pass 5: prune stale, low-value chunks to the archive.
    let mut prunes = Vec::new();
    for chunk in &chunks {
        let is_stale = chunk.stale || stale_set.contains(&chunk.id);
        if !is_stale {
            continue;
        }
        let age_days = ((now - chunk.created_at) as f64 / MS_PER_DAY).max(0.0);
        if chunk.confidence < 0.1 && age_days > 180.0 {
            prunes.push((chunk.id, "stale: low confidence, aged out".to_string()));
        } else if chunk.access_count == 0 && chunk.confidence < 0.05 {
            prunes.push((chunk.id, "stale: never accessed, negligible confidence".to_string()));
        }
    }
    report.pruned = prunes.len();
    if !dry_run {
        store.prune_chunks(&prunes)?;
    }

    // Pass 6: entity index rebuild.
    report.entities = entities::build_entity_index(store, dry_run)?;

    Ok(report)
}

/// For dry runs, overlay uncommitted confidence updates on the in-memory
/// chunk list so later passes see what a real run would have seen.
fn apply_pending(mut chunks: Vec<Chunk>, updates: &[(i64, f64)]) -> Vec<Chunk> {
    let map: HashMap<i64, f64> = updates.iter().copied().collect();
    for chunk in &mut chunks {
        if let Some(conf) = map.get(&chunk.id) {
            chunk.confidence = *conf;
        }
    }
    chunks
}

fn round3(x: f64) -> f64 {
    (x * 1000.0).round() / 1000.0
}

/// Tokens eligible for the shared-term comparison: lowercased, longer than
/// two characters, stop words removed.
fn term_set(content: &str) -> HashSet<String> {
    preprocess::content_terms(content)
        .into_iter()
        .filter(|t| t.len() > 2)
        .collect()
}

fn detect_contradictions(
    store: &Store,
    live: &[&Chunk],
    config: &ReflectConfig,
) -> Result<Vec<(i64, i64, String)>> {
    // Group by normalized, non-generic heading.
    let generic: HashSet<&str> = GENERIC_HEADINGS.iter().copied().collect();
    let mut groups: HashMap<String, Vec<&Chunk>> = HashMap::new();
    for chunk in live {
        let Some(heading) = &chunk.heading else {
            continue;
        };
        let normalized = heading.trim().to_lowercase();
        if normalized.is_empty() || generic.contains(normalized.as_str()) {
            continue;
        }
        groups.entry(normalized).or_default().push(chunk);
    }

    let mut found = Vec::new();
    let mut keys: Vec<&String> = groups.keys().collect();
    keys.sort();
    for key in keys {
        let group = &groups[key];
        let distinct_files: HashSet<&str> =
            group.iter().map(|c| c.file_path.as_str()).collect();
        // Headings repeated across many files are templates, and huge
        // groups are skipped outright rather than sampled.
        if distinct_files.len() >= TEMPLATE_FILE_THRESHOLD || group.len() > GROUP_SIZE_CAP {
            continue;
        }

        for (i, a) in group.iter().enumerate() {
            for b in group.iter().skip(i + 1) {
                if a.file_path == b.file_path {
                    continue;
                }
                let (old, new) = if a.id < b.id { (*a, *b) } else { (*b, *a) };
                if store.contradiction_exists(old.id, new.id)? {
                    continue;
                }
                if let Some(reason) = contradiction_reason(old, new, config) {
                    found.push((old.id, new.id, reason));
                }
            }
        }
    }
    Ok(found)
}

/// Decide whether an (old, new) pair contradicts; returns the recorded
/// reason when it does.
fn contradiction_reason(old: &Chunk, new: &Chunk, config: &ReflectConfig) -> Option<String> {
    let old_terms = term_set(&old.content);
    let new_terms = term_set(&new.content);
    let shared: Vec<&String> = old_terms.intersection(&new_terms).collect();
    if shared.len() < config.contradiction_min_shared_terms {
        return None;
    }
    // Near-duplicates share almost everything; nothing to flag.
    let smaller = old_terms.len().min(new_terms.len());
    if smaller > 0 && (shared.len() as f64) > 0.8 * smaller as f64 {
        return None;
    }

    let old_negated = negation_re().is_match(&old.content);
    let new_negated = negation_re().is_match(&new.content);
    if !old_negated && !new_negated {
        return None;
    }

    // A dated newer entry that introduces the negation reads as an update,
    // not a conflict.
    if config.contradiction_temporal_awareness {
        let both_dated = extract_date_from_path(&old.file_path).is_some()
            && extract_date_from_path(&new.file_path).is_some();
        if both_dated && new_negated && !old_negated {
            return None;
        }
    }

    let shared_set: HashSet<&str> = shared.iter().map(|s| s.as_str()).collect();
    if config.contradiction_require_proximity
        && !negation_near_shared(&old.content, &shared_set)
        && !negation_near_shared(&new.content, &shared_set)
    {
        return None;
    }

    let mut shared_sorted: Vec<&str> = shared_set.iter().copied().collect();
    shared_sorted.sort_unstable();
    Some(format!(
        "Shared terms: {}; negation detected",
        shared_sorted.join(", ")
    ))
}

/// Does a negation token sit within the window of any shared term?
fn negation_near_shared(content: &str, shared: &HashSet<&str>) -> bool {
    let tokens: Vec<String> = content
        .split(|c: char| !c.is_alphanumeric() && c != '\'')
        .filter(|t| !t.is_empty())
        .map(|t| t.replace('\'', "").to_lowercase())
        .collect();
    let negation_positions: Vec<usize> = tokens
        .iter()
        .enumerate()
        .filter(|(_, t)| NEGATION_TOKENS.contains(&t.as_str()))
        .map(|(i, _)| i)
        .collect();
    if negation_positions.is_empty() {
        return false;
    }
    tokens.iter().enumerate().any(|(i, t)| {
        shared.contains(t.as_str())
            && negation_positions
                .iter()
                .any(|n| n.abs_diff(i) <= PROXIMITY_WINDOW)
    })
}

/// How to settle a detected contradiction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    KeepNewer,
    KeepOlder,
    KeepBoth,
    Dismiss,
}

impl Resolution {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "keep-newer" => Some(Self::KeepNewer),
            "keep-older" => Some(Self::KeepOlder),
            "keep-both" => Some(Self::KeepBoth),
            "dismiss" => Some(Self::Dismiss),
            _ => None,
        }
    }
}

/// Settle a contradiction: the loser (if any) is demoted to `outdated` at
/// confidence 0.3, and the record is marked resolved.
pub fn resolve_contradiction(store: &mut Store, id: i64, action: Resolution) -> Result<bool> {
    let Some(record) = store.get_contradiction(id)? else {
        return Ok(false);
    };
    match action {
        Resolution::KeepNewer => store.demote_chunk(record.chunk_id_old)?,
        Resolution::KeepOlder => store.demote_chunk(record.chunk_id_new)?,
        Resolution::KeepBoth | Resolution::Dismiss => {}
    }
    store.mark_contradiction_resolved(id)?;
    Ok(true)
}
