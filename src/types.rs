use serde::{Deserialize, Serialize};

/// A line-addressed block of markdown text; the atomic unit of indexing
/// and retrieval.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chunk {
    pub id: i64,
    pub file_path: String,
    pub heading: Option<String>,
    pub content: String,
    pub line_start: u32,
    pub line_end: u32,
    pub entities: Vec<String>,
    pub chunk_type: ChunkType,
    pub confidence: f64,
    /// Epoch milliseconds. Prefers a date embedded in the file path over mtime.
    pub created_at: i64,
    pub indexed_at: i64,
    pub file_weight: f64,
    pub access_count: i64,
    pub last_accessed: Option<i64>,
    pub stale: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
}

/// A chunk as produced by the markdown chunker, before it has an id.
#[derive(Debug, Clone)]
pub struct NewChunk {
    pub heading: Option<String>,
    pub content: String,
    pub line_start: u32,
    pub line_end: u32,
    pub entities: Vec<String>,
    pub chunk_type: ChunkType,
    pub confidence: f64,
}

/// Classification of what a chunk asserts. Confidence defaults derive from
/// the variant; they are recorded per-row so Reflect can decay them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChunkType {
    Raw,
    Fact,
    Decision,
    Preference,
    Confirmed,
    Opinion,
    Inferred,
    Outdated,
    ActionItem,
}

impl ChunkType {
    /// Baseline confidence assigned at index time.
    pub fn default_confidence(self) -> f64 {
        match self {
            ChunkType::Raw => 1.0,
            ChunkType::Fact => 1.0,
            ChunkType::Decision => 1.0,
            ChunkType::Preference => 1.0,
            ChunkType::Confirmed => 1.0,
            ChunkType::Opinion => 0.8,
            ChunkType::Inferred => 0.7,
            ChunkType::Outdated => 0.3,
            ChunkType::ActionItem => 0.85,
        }
    }

    /// Scoring bonus, before normalization into the type component.
    pub fn bonus(self) -> f64 {
        match self {
            ChunkType::Confirmed => 0.15,
            ChunkType::Decision => 0.12,
            ChunkType::Preference => 0.10,
            ChunkType::ActionItem => 0.10,
            ChunkType::Fact => 0.08,
            ChunkType::Opinion => 0.04,
            ChunkType::Inferred => 0.0,
            ChunkType::Raw => 0.0,
            ChunkType::Outdated => -0.15,
        }
    }

    /// Parse an inline tag or config label. Accepts the short form `pref`
    /// and the uncertain form `outdated?`.
    pub fn from_label(label: &str) -> Option<Self> {
        match label.trim().to_lowercase().as_str() {
            "raw" => Some(ChunkType::Raw),
            "fact" => Some(ChunkType::Fact),
            "decision" => Some(ChunkType::Decision),
            "pref" | "preference" => Some(ChunkType::Preference),
            "confirmed" => Some(ChunkType::Confirmed),
            "opinion" => Some(ChunkType::Opinion),
            "inferred" => Some(ChunkType::Inferred),
            "outdated" | "outdated?" => Some(ChunkType::Outdated),
            "action_item" | "action-item" => Some(ChunkType::ActionItem),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ChunkType::Raw => "raw",
            ChunkType::Fact => "fact",
            ChunkType::Decision => "decision",
            ChunkType::Preference => "preference",
            ChunkType::Confirmed => "confirmed",
            ChunkType::Opinion => "opinion",
            ChunkType::Inferred => "inferred",
            ChunkType::Outdated => "outdated",
            ChunkType::ActionItem => "action_item",
        }
    }
}

impl std::fmt::Display for ChunkType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Metadata about an indexed file. Exists iff at least one chunk does.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileMeta {
    pub file_path: String,
    pub mtime_ms: i64,
    pub chunk_count: i64,
    pub indexed_at: i64,
}

/// A chunk returned from an FTS search together with its raw rank
/// (more negative = stronger match).
#[derive(Debug, Clone)]
pub struct ScoredChunk {
    pub chunk: Chunk,
    pub rank: f64,
}

/// A retrieval candidate flowing through the ranking pipeline: the persisted
/// chunk plus the transient enrichment the scorer consumes.
#[derive(Debug, Clone)]
pub struct RankedChunk {
    pub chunk: Chunk,
    /// Raw FTS rank (negative). Synthetic candidates use 0.0.
    pub rank: f64,
    /// FTS rank normalized into [0.3, 1.0] across the candidate set.
    pub normalized_fts: f64,
    /// Survived the precision (implicit-AND) query.
    pub and_match: bool,
    /// Cosine similarity to the query embedding, when one was supplied.
    pub semantic_sim: Option<f64>,
    /// Overlaps the matched-entity set for this query.
    pub entity_match: bool,
    /// Placed by priority-file injection rather than search.
    pub injected: bool,
    /// Composite score after the full pipeline.
    pub score: f64,
}

impl RankedChunk {
    pub fn new(chunk: Chunk, rank: f64) -> Self {
        Self {
            chunk,
            rank,
            normalized_fts: 0.0,
            and_match: false,
            semantic_sim: None,
            entity_match: false,
            injected: false,
            score: 0.0,
        }
    }
}

/// A detected pair of chunks where the newer one likely supersedes the older.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Contradiction {
    pub id: i64,
    pub chunk_id_old: i64,
    pub chunk_id_new: i64,
    pub reason: String,
    pub resolved: bool,
    pub created_at: i64,
}

/// Snapshot of a pruned chunk, restorable to a fresh row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArchivedChunk {
    pub id: i64,
    pub file_path: String,
    pub heading: Option<String>,
    pub content: String,
    pub line_start: u32,
    pub line_end: u32,
    pub entities: Vec<String>,
    pub chunk_type: ChunkType,
    pub confidence: f64,
    pub created_at: i64,
    pub file_weight: f64,
    pub access_count: i64,
    pub archived_at: i64,
    pub archive_reason: String,
}

/// One row of the entity index.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntityRecord {
    pub entity: String,
    pub chunk_ids: Vec<i64>,
    pub co_entities: std::collections::HashMap<String, u32>,
    pub mention_count: u32,
    pub last_seen: i64,
}

/// Statistics about the store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreStats {
    pub total_files: u64,
    pub total_chunks: u64,
    pub stale_chunks: u64,
    pub embedded_chunks: u64,
    pub archived_chunks: u64,
    pub open_contradictions: u64,
    pub chunks_by_type: Vec<TypeCount>,
    pub last_indexed: Option<i64>,
    pub db_size_bytes: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TypeCount {
    pub chunk_type: ChunkType,
    pub count: u64,
}

/// Outcome of a workspace index run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct IndexReport {
    pub indexed: usize,
    pub skipped: usize,
    pub cleaned: usize,
    pub errors: Vec<FileError>,
}

#[derive(Debug, Clone, Serialize)]
pub struct FileError {
    pub file_path: String,
    pub error: String,
}
