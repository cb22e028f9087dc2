use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::types::ChunkType;

/// Workspace configuration, loaded from `.memory/config.json` and
/// deep-merged over defaults. Unknown keys are ignored.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct WorkspaceConfig {
    /// Label for tool descriptions ("Dana's workspace memory").
    pub owner: Option<String>,
    /// Explicit relative paths to index, in addition to the defaults.
    pub include: Vec<String>,
    /// Glob patterns to index: `dir/*.ext`, `dir/*/sub/*.ext`, `dir/**/*.ext`.
    pub include_globs: Vec<String>,
    /// Pattern → chunk type label; baseline type/confidence for matching files.
    pub file_type_defaults: HashMap<String, String>,
    /// Pattern → file weight override, applied at scoring time.
    pub file_weights: HashMap<String, f64>,
    /// Files hidden from context assembly unless the query is an attribution query.
    pub exclude_from_recall: Vec<String>,
    /// Files never returned, even for attribution queries.
    pub always_exclude: Vec<String>,
    /// Recency half-life for context scoring, in days.
    pub recency_boost_days: f64,
    pub reflect: ReflectConfig,
    pub ingest: IngestConfig,
}

impl Default for WorkspaceConfig {
    fn default() -> Self {
        Self {
            owner: None,
            include: vec![],
            include_globs: vec![],
            file_type_defaults: HashMap::new(),
            file_weights: HashMap::new(),
            exclude_from_recall: vec![],
            always_exclude: vec![],
            recency_boost_days: 30.0,
            reflect: ReflectConfig::default(),
            ingest: IngestConfig::default(),
        }
    }
}

/// Tuning for the reflect maintenance cycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ReflectConfig {
    pub decay_rate: f64,
    pub half_life_days: f64,
    pub contradiction_min_shared_terms: usize,
    pub contradiction_temporal_awareness: bool,
    pub contradiction_require_proximity: bool,
}

impl Default for ReflectConfig {
    fn default() -> Self {
        Self {
            decay_rate: 1.0,
            half_life_days: 365.0,
            contradiction_min_shared_terms: 3,
            contradiction_temporal_awareness: true,
            contradiction_require_proximity: true,
        }
    }
}

/// Tuning for transcript/CSV ingest.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct IngestConfig {
    /// Directory scanned for transcript/CSV sources, relative to the workspace.
    pub source_dir: String,
    /// Run ingest sync automatically before a workspace index.
    pub auto_sync: bool,
    /// CSV column whose value is promoted to an `@entity` token.
    pub entity_column: Option<String>,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            source_dir: "sources".into(),
            auto_sync: false,
            entity_column: None,
        }
    }
}

impl WorkspaceConfig {
    /// Load the workspace config, deep-merging the on-disk JSON over
    /// defaults. A missing file yields pure defaults; a malformed file is
    /// logged once and also yields defaults.
    pub fn load(workspace: &Path) -> Self {
        let path = Self::config_path(workspace);
        let content = match std::fs::read_to_string(&path) {
            Ok(c) => c,
            Err(_) => return Self::default(),
        };
        match serde_json::from_str::<Value>(&content) {
            Ok(overlay) => {
                let mut base =
                    serde_json::to_value(Self::default()).unwrap_or(Value::Null);
                deep_merge(&mut base, overlay);
                serde_json::from_value(base).unwrap_or_else(|e| {
                    tracing::warn!("config {} has invalid fields: {e}; using defaults", path.display());
                    Self::default()
                })
            }
            Err(e) => {
                tracing::warn!("failed to parse {}: {e}; using defaults", path.display());
                Self::default()
            }
        }
    }

    pub fn memory_dir(workspace: &Path) -> PathBuf {
        workspace.join(".memory")
    }

    pub fn config_path(workspace: &Path) -> PathBuf {
        Self::memory_dir(workspace).join("config.json")
    }

    pub fn db_path(workspace: &Path) -> PathBuf {
        Self::memory_dir(workspace).join("index.sqlite")
    }

    pub fn aliases_path(workspace: &Path) -> PathBuf {
        Self::memory_dir(workspace).join("aliases.json")
    }

    pub fn recall_log_path(workspace: &Path) -> PathBuf {
        Self::memory_dir(workspace).join("recall-log.jsonl")
    }

    /// Baseline type/confidence for chunks of this file, per `fileTypeDefaults`.
    pub fn type_default_for(&self, path: &str) -> Option<(ChunkType, f64)> {
        let label = resolve_pattern_map(&self.file_type_defaults, path)?;
        let ty = ChunkType::from_label(label)?;
        Some((ty, ty.default_confidence()))
    }

    /// Config-time file weight override for this path, if any.
    pub fn weight_override_for(&self, path: &str) -> Option<f64> {
        resolve_pattern_map(&self.file_weights, path).copied()
    }
}

/// Recursively overlay `overlay` onto `base`. Objects merge key-by-key;
/// every other value type replaces wholesale.
pub fn deep_merge(base: &mut Value, overlay: Value) {
    match (base, overlay) {
        (Value::Object(base_map), Value::Object(overlay_map)) => {
            for (k, v) in overlay_map {
                match base_map.get_mut(&k) {
                    Some(slot) => deep_merge(slot, v),
                    None => {
                        base_map.insert(k, v);
                    }
                }
            }
        }
        (slot, v) => *slot = v,
    }
}

/// Resolve a pattern-keyed map against a path. Precedence: exact full path,
/// then exact basename, then globs with longest-pattern-wins.
pub fn resolve_pattern_map<'a, T>(map: &'a HashMap<String, T>, path: &str) -> Option<&'a T> {
    if let Some(v) = map.get(path) {
        return Some(v);
    }
    let basename = basename_of(path);
    if let Some(v) = map.get(basename) {
        return Some(v);
    }
    let mut best: Option<(&str, &T)> = None;
    for (pattern, v) in map {
        if !is_glob(pattern) {
            continue;
        }
        if glob_matches(pattern, path) {
            match best {
                Some((bp, _)) if bp.len() >= pattern.len() => {}
                _ => best = Some((pattern, v)),
            }
        }
    }
    best.map(|(_, v)| v)
}

/// True if the path matches any pattern in the list. Glob patterns match the
/// full relative path; plain patterns match by equality, basename, or
/// substring so `transcripts/` style entries behave as directory filters.
pub fn matches_any_pattern(patterns: &[String], path: &str) -> bool {
    patterns.iter().any(|p| {
        if is_glob(p) {
            glob_matches(p, path)
        } else {
            path == p || basename_of(path) == p || path.contains(p.as_str())
        }
    })
}

fn is_glob(pattern: &str) -> bool {
    pattern.contains('*')
}

fn basename_of(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

/// Match a glob pattern against a `/`-separated relative path.
/// `*` spans within one segment; `**` spans zero or more whole segments.
pub fn glob_matches(pattern: &str, path: &str) -> bool {
    glob_segments(
        &pattern.split('/').collect::<Vec<_>>(),
        &path.split('/').collect::<Vec<_>>(),
    )
}

fn glob_segments(pattern: &[&str], path: &[&str]) -> bool {
    match pattern.first() {
        None => path.is_empty(),
        Some(&"**") => {
            // Zero or more segments.
            (0..=path.len()).any(|skip| glob_segments(&pattern[1..], &path[skip..]))
        }
        Some(seg) => match path.first() {
            Some(part) if segment_matches(seg, part) => glob_segments(&pattern[1..], &path[1..]),
            _ => false,
        },
    }
}

fn segment_matches(pattern: &str, segment: &str) -> bool {
    // Non-recursive wildcard match within one path segment.
    let p: Vec<char> = pattern.chars().collect();
    let s: Vec<char> = segment.chars().collect();
    let (mut pi, mut si) = (0usize, 0usize);
    let (mut star, mut star_si) = (None::<usize>, 0usize);
    while si < s.len() {
        if pi < p.len() && (p[pi] == s[si]) {
            pi += 1;
            si += 1;
        } else if pi < p.len() && p[pi] == '*' {
            star = Some(pi);
            star_si = si;
            pi += 1;
        } else if let Some(sp) = star {
            pi = sp + 1;
            star_si += 1;
            si = star_si;
        } else {
            return false;
        }
    }
    while pi < p.len() && p[pi] == '*' {
        pi += 1;
    }
    pi == p.len()
}

/// Baseline file weight recorded at insert time. Structural top-level files
/// rank up; review/transcript noise ranks down. Config `fileWeights` can
/// override this at scoring time.
pub fn baseline_file_weight(path: &str) -> f64 {
    let basename = basename_of(path);
    match basename {
        "MEMORY.md" => return 1.5,
        "SOUL.md" | "USER.md" => return 1.4,
        "IDENTITY.md" => return 1.3,
        "STATE.md" | "VOICE.md" => return 1.2,
        "TOOLS.md" => return 1.1,
        _ => {}
    }
    if path.contains("self-review") {
        return 0.8;
    }
    if path.contains("transcripts/") || path.contains("archive/") {
        return 0.6;
    }
    if path.starts_with("ingest/") || path.contains("/ingest/") {
        return 0.8;
    }
    1.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_glob_single_segment() {
        assert!(glob_matches("memory/*.md", "memory/2026-02-20.md"));
        assert!(!glob_matches("memory/*.md", "memory/sub/2026-02-20.md"));
    }

    #[test]
    fn test_glob_mid_wildcard() {
        assert!(glob_matches("projects/*/notes/*.md", "projects/alpha/notes/plan.md"));
        assert!(!glob_matches("projects/*/notes/*.md", "projects/alpha/beta/notes/plan.md"));
    }

    #[test]
    fn test_glob_double_star() {
        assert!(glob_matches("docs/**/*.md", "docs/a.md"));
        assert!(glob_matches("docs/**/*.md", "docs/x/y/z.md"));
        assert!(!glob_matches("docs/**/*.md", "notes/a.md"));
    }

    #[test]
    fn test_resolve_precedence_exact_over_basename_over_glob() {
        let mut map = HashMap::new();
        map.insert("memory/log.md".to_string(), "exact".to_string());
        map.insert("log.md".to_string(), "basename".to_string());
        map.insert("memory/*.md".to_string(), "glob".to_string());

        assert_eq!(
            resolve_pattern_map(&map, "memory/log.md"),
            Some(&"exact".to_string())
        );
        assert_eq!(
            resolve_pattern_map(&map, "other/log.md"),
            Some(&"basename".to_string())
        );
        assert_eq!(
            resolve_pattern_map(&map, "memory/notes.md"),
            Some(&"glob".to_string())
        );
    }

    #[test]
    fn test_resolve_longest_glob_wins() {
        let mut map = HashMap::new();
        map.insert("ingest/*.md".to_string(), 1u8);
        map.insert("ingest/meeting-*.md".to_string(), 2u8);
        assert_eq!(resolve_pattern_map(&map, "ingest/meeting-feb.md"), Some(&2));
        assert_eq!(resolve_pattern_map(&map, "ingest/other.md"), Some(&1));
    }

    #[test]
    fn test_type_defaults_label_table() {
        let mut cfg = WorkspaceConfig::default();
        cfg.file_type_defaults
            .insert("ingest/*.md".to_string(), "inferred".to_string());
        cfg.file_type_defaults
            .insert("MEMORY.md".to_string(), "confirmed".to_string());
        assert_eq!(
            cfg.type_default_for("ingest/call.md"),
            Some((ChunkType::Inferred, 0.7))
        );
        assert_eq!(
            cfg.type_default_for("MEMORY.md"),
            Some((ChunkType::Confirmed, 1.0))
        );
        assert_eq!(cfg.type_default_for("notes.md"), None);
    }

    #[test]
    fn test_unknown_label_resolves_to_none() {
        let mut cfg = WorkspaceConfig::default();
        cfg.file_type_defaults
            .insert("*.md".to_string(), "gossip".to_string());
        assert_eq!(cfg.type_default_for("a.md"), None);
    }

    #[test]
    fn test_deep_merge_nested() {
        let mut base = serde_json::json!({
            "reflect": {"decayRate": 1.0, "halfLifeDays": 365.0},
            "include": ["a.md"]
        });
        deep_merge(
            &mut base,
            serde_json::json!({"reflect": {"decayRate": 2.0}, "include": ["b.md"]}),
        );
        assert_eq!(base["reflect"]["decayRate"], 2.0);
        assert_eq!(base["reflect"]["halfLifeDays"], 365.0);
        assert_eq!(base["include"], serde_json::json!(["b.md"]));
    }

    #[test]
    fn test_load_missing_and_malformed(){
        let dir = tempfile::TempDir::new().unwrap();
        let cfg = WorkspaceConfig::load(dir.path());
        assert_eq!(cfg.reflect.half_life_days, 365.0);

        std::fs::create_dir_all(dir.path().join(".memory")).unwrap();
        std::fs::write(dir.path().join(".memory/config.json"), "{not json").unwrap();
        let cfg = WorkspaceConfig::load(dir.path());
        assert_eq!(cfg.recency_boost_days, 30.0);
    }

    #[test]
    fn test_load_partial_overlay() {
        let dir = tempfile::TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join(".memory")).unwrap();
        std::fs::write(
            dir.path().join(".memory/config.json"),
            r#"{"owner": "dana", "reflect": {"decayRate": 0.5}}"#,
        )
        .unwrap();
        let cfg = WorkspaceConfig::load(dir.path());
        assert_eq!(cfg.owner.as_deref(), Some("dana"));
        assert_eq!(cfg.reflect.decay_rate, 0.5);
        assert_eq!(cfg.reflect.half_life_days, 365.0);
    }

    #[test]
    fn test_baseline_weights() {
        assert_eq!(baseline_file_weight("MEMORY.md"), 1.5);
        assert_eq!(baseline_file_weight("deep/nested/USER.md"), 1.4);
        assert_eq!(baseline_file_weight("memory/self-review-2026.md"), 0.8);
        assert_eq!(baseline_file_weight("ingest/call.md"), 0.8);
        assert_eq!(baseline_file_weight("transcripts/feb.md"), 0.6);
        assert_eq!(baseline_file_weight("memory/2026-02-20.md"), 1.0);
    }

    #[test]
    fn test_exclusion_matcher() {
        let patterns = vec!["ingest/".to_string(), "*.csv".to_string(), "journal.md".to_string()];
        assert!(matches_any_pattern(&patterns, "ingest/call.md"));
        assert!(matches_any_pattern(&patterns, "data.csv"));
        assert!(matches_any_pattern(&patterns, "private/journal.md"));
        assert!(!matches_any_pattern(&patterns, "memory/2026-02-20.md"));
    }
}
