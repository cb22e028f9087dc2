//! Query preprocessing shared by the recall and context pipelines.
//!
//! Conversational prompts embed well semantically but produce noisy FTS
//! matches. This module extracts focused terms, builds sanitized MATCH
//! expressions, and expands terms through the alias map. The stop-word set
//! here is the single source of truth: sanitization, term extraction, and
//! contradiction tokenization all go through it so FTS and ranking stay
//! consistent.

use std::collections::HashMap;
use std::path::Path;
use std::sync::OnceLock;

use chrono::{DateTime, Duration, Local, NaiveDate};
use regex::Regex;

use crate::config::WorkspaceConfig;

/// English closed-class words (~120) removed from keyword queries. Kept
/// lean so meaningful technical terms survive.
pub const STOP_WORDS: &[&str] = &[
    // Articles and determiners
    "a", "an", "the", "this", "that", "these", "those", "some", "any", "all", "every", "each",
    // Pronouns
    "i", "me", "my", "we", "us", "our", "you", "your", "he", "him", "his", "she", "her", "it",
    "its", "they", "them", "their", "who", "what", "which",
    // Prepositions
    "in", "on", "at", "to", "for", "of", "with", "from", "by", "as", "into", "over", "under",
    "through", "before", "after", "about",
    // Conjunctions
    "and", "or", "but", "so", "if", "then", "than", "because", "while", "when", "where",
    "why", "how",
    // Auxiliaries and common verbs
    "is", "am", "are", "was", "were", "be", "been", "being", "do", "does", "did", "have",
    "has", "had", "can", "could", "would", "should", "will", "shall", "may", "might", "must",
    "get",
    // Conversational fillers
    "please", "help", "just", "also", "very", "really", "more", "most", "other", "another",
    "much", "many", "here", "there", "now", "not", "no", "yes", "only", "too", "out",
    // Agent/chat context verbs
    "ask", "check", "look", "see", "show", "tell", "explain", "make", "let", "know", "think",
    "try", "use", "need", "want", "like",
];

fn stop_word_set() -> &'static std::collections::HashSet<&'static str> {
    static SET: OnceLock<std::collections::HashSet<&'static str>> = OnceLock::new();
    SET.get_or_init(|| STOP_WORDS.iter().copied().collect())
}

pub fn is_stop_word(word: &str) -> bool {
    stop_word_set().contains(word)
}

fn fts_operator_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)\b(?:AND|OR|NOT|NEAR)\b").unwrap())
}

fn word_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[A-Za-z0-9_][A-Za-z0-9_'-]*").unwrap())
}

fn capitalized_span_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\b[A-Z][a-z]+(?:\s+[A-Z][a-z]+)*\b").unwrap())
}

/// Lowercased content tokens: length ≥ 2, stop words removed, possessive
/// `'s` stripped so "how's"/"redis's" filter and match like their roots.
/// The shared tokenizer for sanitization, term extraction, and
/// contradiction scans.
pub fn content_terms(text: &str) -> Vec<String> {
    let cleaned = fts_operator_re().replace_all(text, " ");
    word_re()
        .find_iter(&cleaned)
        .map(|m| m.as_str().trim_matches('\'').to_lowercase())
        .map(|w| match w.strip_suffix("'s") {
            Some(root) => root.to_string(),
            None => w,
        })
        .filter(|w| w.len() >= 2 && !is_stop_word(w))
        .collect()
}

/// Sanitize a raw query into an implicit-AND FTS expression: each
/// surviving term double-quoted, joined by spaces. `None` when nothing
/// survives.
pub fn sanitize_fts_query(raw: &str) -> Option<String> {
    let mut terms = content_terms(raw);
    terms.dedup();
    if terms.is_empty() {
        return None;
    }
    Some(
        terms
            .iter()
            .map(|t| format!("\"{t}\""))
            .collect::<Vec<_>>()
            .join(" "),
    )
}

/// Build an OR expression over quoted terms, alias-expanded.
pub fn build_or_query(terms: &[String], aliases: &AliasMap) -> Option<String> {
    let mut seen = std::collections::HashSet::new();
    let mut quoted = Vec::new();
    for term in terms {
        for expanded in aliases.expand(term) {
            if seen.insert(expanded.clone()) {
                quoted.push(format!("\"{expanded}\""));
            }
        }
    }
    if quoted.is_empty() {
        None
    } else {
        Some(quoted.join(" OR "))
    }
}

/// `Capitalized` proper-noun spans from the original message, lowercased.
/// Stop words inside a span (usually sentence-initial capitals) fall away.
pub fn capitalized_spans(text: &str) -> Vec<String> {
    capitalized_span_re()
        .find_iter(text)
        .filter_map(|m| {
            let kept: Vec<&str> = m
                .as_str()
                .split_whitespace()
                .filter(|w| w.len() >= 2 && !is_stop_word(&w.to_lowercase()))
                .collect();
            if kept.is_empty() {
                None
            } else {
                Some(kept.join(" ").to_lowercase())
            }
        })
        .collect()
}

/// Parse a `since` argument: absolute `YYYY-MM-DD`, or relative
/// `Nd`/`Nw`/`Nm`/`Ny` back from `now`. Returns epoch ms.
pub fn parse_since(raw: &str, now: DateTime<Local>) -> Option<i64> {
    let trimmed = raw.trim();
    if let Ok(date) = NaiveDate::parse_from_str(trimmed, "%Y-%m-%d") {
        return Some(crate::temporal::date_to_ms_local(date));
    }
    let unit = trimmed.chars().last()?;
    let num = &trimmed[..trimmed.len() - unit.len_utf8()];
    let n: i64 = num.parse().ok()?;
    if n <= 0 {
        return None;
    }
    let days = match unit {
        'd' => n,
        'w' => n * 7,
        'm' => n * 30,
        'y' => n * 365,
        _ => return None,
    };
    Some((now - Duration::days(days)).timestamp_millis())
}

/// Query-term aliases used for OR-expansion only. Workspace overrides in
/// `.memory/aliases.json` replace the default list per top-level key.
#[derive(Debug, Clone)]
pub struct AliasMap {
    map: HashMap<String, Vec<String>>,
}

impl AliasMap {
    pub fn defaults() -> Self {
        let mut map = HashMap::new();
        let defaults: &[(&str, &[&str])] = &[
            ("deploy", &["ship", "release", "push", "publish"]),
            ("bug", &["fix", "issue", "error", "defect"]),
            ("api", &["endpoint", "route", "rest"]),
            ("crypto", &["defi", "token", "chain", "wallet", "web3"]),
            ("db", &["database", "sql", "sqlite", "postgres"]),
            ("auth", &["login", "oauth", "token", "session"]),
            ("meeting", &["call", "sync", "standup", "discussion"]),
            ("config", &["settings", "setup", "configuration"]),
            ("test", &["testing", "spec", "coverage"]),
            ("doc", &["docs", "documentation", "readme"]),
            ("perf", &["performance", "latency", "speed"]),
            ("money", &["cost", "price", "budget", "payment"]),
        ];
        for (key, vals) in defaults {
            map.insert(
                (*key).to_string(),
                vals.iter().map(|s| (*s).to_string()).collect(),
            );
        }
        Self { map }
    }

    /// Defaults merged with the workspace override file, when present and
    /// parseable. A malformed file is logged and ignored.
    pub fn load(workspace: &Path) -> Self {
        let mut aliases = Self::defaults();
        let path = WorkspaceConfig::aliases_path(workspace);
        let Ok(content) = std::fs::read_to_string(&path) else {
            return aliases;
        };
        match serde_json::from_str::<HashMap<String, Vec<String>>>(&content) {
            Ok(overrides) => {
                for (k, v) in overrides {
                    aliases.map.insert(k.to_lowercase(), v);
                }
            }
            Err(e) => {
                tracing::warn!("failed to parse {}: {e}; using default aliases", path.display());
            }
        }
        aliases
    }

    /// A term plus its aliases, the term first.
    pub fn expand(&self, term: &str) -> Vec<String> {
        let mut out = vec![term.to_lowercase()];
        if let Some(extra) = self.map.get(&term.to_lowercase()) {
            out.extend(extra.iter().map(|s| s.to_lowercase()));
        }
        out
    }
}
