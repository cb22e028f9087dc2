use std::sync::OnceLock;

use chrono::NaiveDate;
use regex::Regex;

use crate::temporal::date_to_ms_local;
use crate::types::{ChunkType, NewChunk};

/// Chunks larger than this get re-split at paragraph boundaries.
const MAX_CHUNK_CHARS: usize = 2000;
/// Chunks whose non-heading content is shorter than this are dropped.
const MIN_CONTENT_CHARS: usize = 5;

fn heading_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^(#{1,4})\s+(.*)$").unwrap())
}

fn tagged_line_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"(?i)^\s*(?:[-*]\s+)?\[(fact|decision|pref|preference|confirmed|inferred|opinion|action_item|outdated\??)\]\s*(\S.*)$",
        )
        .unwrap()
    })
}

fn bullet_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\s*[-*]\s+\S").unwrap())
}

fn entity_token_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"@[A-Za-z0-9_][A-Za-z0-9_-]*").unwrap())
}

fn bold_span_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\*\*([^*\n]+)\*\*").unwrap())
}

fn path_date_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(\d{4})-(\d{2})-(\d{2})").unwrap())
}

/// An inline `[type] text` annotation found in a source file.
#[derive(Debug, Clone)]
pub struct TaggedFact {
    pub line: u32,
    pub chunk_type: ChunkType,
    pub confidence: f64,
}

/// Split markdown into chunks at heading levels 1–4.
///
/// Line numbers are 1-based closed intervals. Chunks with under five
/// characters of non-heading content are dropped; oversized chunks are
/// re-split at paragraph boundaries, each piece keeping the heading.
pub fn chunk_markdown(text: &str) -> Vec<NewChunk> {
    let lines: Vec<&str> = text.lines().collect();
    let mut raw: Vec<(Option<String>, usize, usize)> = Vec::new(); // (heading, start, end) 0-based
    let mut current_start = 0usize;
    let mut current_heading: Option<String> = None;
    let mut started = false;

    for (i, line) in lines.iter().enumerate() {
        if let Some(caps) = heading_re().captures(line) {
            if started && i > current_start {
                raw.push((current_heading.clone(), current_start, i - 1));
            }
            current_heading = Some(caps[2].trim().to_string());
            current_start = i;
            started = true;
        } else if !started && !line.trim().is_empty() {
            // Preamble before any heading.
            current_start = i;
            started = true;
        }
    }
    if started && current_start < lines.len() {
        raw.push((current_heading, current_start, lines.len() - 1));
    }

    let mut chunks = Vec::new();
    for (heading, start, end) in raw {
        let body: Vec<&str> = lines[start..=end].to_vec();
        let non_heading: String = body
            .iter()
            .filter(|l| !heading_re().is_match(l))
            .copied()
            .collect::<Vec<_>>()
            .join("\n");
        if non_heading.trim().len() < MIN_CONTENT_CHARS {
            continue;
        }

        let content = body.join("\n").trim_end().to_string();
        if content.len() <= MAX_CHUNK_CHARS {
            chunks.push(make_chunk(heading.clone(), &content, start, end));
        } else {
            chunks.extend(split_oversized(heading, &lines, start, end));
        }
    }
    chunks
}

fn make_chunk(heading: Option<String>, content: &str, start0: usize, end0: usize) -> NewChunk {
    NewChunk {
        entities: extract_entities(content),
        heading,
        content: content.to_string(),
        line_start: (start0 + 1) as u32,
        line_end: (end0 + 1) as u32,
        chunk_type: ChunkType::Raw,
        confidence: ChunkType::Raw.default_confidence(),
    }
}

/// Re-split an oversized chunk at blank-line runs. The last piece's
/// `line_end` equals the original chunk's.
fn split_oversized(
    heading: Option<String>,
    lines: &[&str],
    start0: usize,
    end0: usize,
) -> Vec<NewChunk> {
    // Paragraphs: (start, end) 0-based absolute line ranges.
    let mut paragraphs: Vec<(usize, usize)> = Vec::new();
    let mut para_start: Option<usize> = None;
    for i in start0..=end0 {
        if lines[i].trim().is_empty() {
            if let Some(ps) = para_start.take() {
                paragraphs.push((ps, i - 1));
            }
        } else if para_start.is_none() {
            para_start = Some(i);
        }
    }
    if let Some(ps) = para_start {
        paragraphs.push((ps, end0));
    }

    let mut pieces = Vec::new();
    let mut acc: Vec<(usize, usize)> = Vec::new();
    let mut acc_len = 0usize;
    for (ps, pe) in paragraphs {
        let para_len: usize = lines[ps..=pe].iter().map(|l| l.len() + 1).sum();
        if !acc.is_empty() && acc_len + para_len > MAX_CHUNK_CHARS {
            pieces.push(std::mem::take(&mut acc));
            acc_len = 0;
        }
        acc.push((ps, pe));
        acc_len += para_len;
    }
    if !acc.is_empty() {
        pieces.push(acc);
    }

    let count = pieces.len();
    pieces
        .into_iter()
        .enumerate()
        .map(|(idx, group)| {
            let gs = group.first().map_or(start0, |g| g.0);
            let mut ge = group.last().map_or(end0, |g| g.1);
            if idx + 1 == count {
                ge = end0;
            }
            let content: String = group
                .iter()
                .map(|&(a, b)| lines[a..=b].join("\n"))
                .collect::<Vec<_>>()
                .join("\n\n");
            make_chunk(heading.clone(), &content, gs, ge)
        })
        .collect()
}

/// Entities are `@word` tokens (kept with the `@`) plus the text of
/// `**…**` bold spans, first-seen order, deduplicated.
pub fn extract_entities(text: &str) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    let mut out = Vec::new();
    for m in entity_token_re().find_iter(text) {
        let label = m.as_str().to_string();
        if seen.insert(label.to_lowercase()) {
            out.push(label);
        }
    }
    for caps in bold_span_re().captures_iter(text) {
        let label = caps[1].trim().to_string();
        if !label.is_empty() && seen.insert(label.to_lowercase()) {
            out.push(label);
        }
    }
    out
}

/// First `YYYY-MM-DD` substring in the path as a local-midnight timestamp
/// (epoch ms). Dated log files use this over the file mtime.
pub fn extract_date_from_path(path: &str) -> Option<i64> {
    let caps = path_date_re().captures(path)?;
    let date = NaiveDate::from_ymd_opt(
        caps[1].parse().ok()?,
        caps[2].parse().ok()?,
        caps[3].parse().ok()?,
    )?;
    Some(date_to_ms_local(date))
}

/// Heading substrings under which untagged bullets are still classified.
const CLASSIFYING_HEADINGS: &[(&str, ChunkType)] = &[
    ("decision", ChunkType::Decision),
    ("fact", ChunkType::Fact),
    ("preference", ChunkType::Preference),
    ("learned", ChunkType::Fact),
    ("open question", ChunkType::ActionItem),
    ("todo", ChunkType::ActionItem),
    ("pending", ChunkType::ActionItem),
];

/// Confidence for bullets classified by their section heading alone.
const HEADING_CLASSIFIED_CONFIDENCE: f64 = 0.9;

/// Scan a file for inline `[type] text` lines, plus untagged bullets under
/// classifying headings. Line numbers are 1-based.
pub fn extract_tagged_facts(text: &str) -> Vec<TaggedFact> {
    let mut facts = Vec::new();
    let mut section_type: Option<ChunkType> = None;

    for (i, line) in text.lines().enumerate() {
        let line_no = (i + 1) as u32;
        if let Some(caps) = heading_re().captures(line) {
            let lowered = caps[2].to_lowercase();
            section_type = CLASSIFYING_HEADINGS
                .iter()
                .find(|(needle, _)| lowered.contains(needle))
                .map(|&(_, ty)| ty);
            continue;
        }
        if let Some(caps) = tagged_line_re().captures(line) {
            if let Some(ty) = ChunkType::from_label(&caps[1]) {
                facts.push(TaggedFact {
                    line: line_no,
                    chunk_type: ty,
                    confidence: ty.default_confidence(),
                });
            }
        } else if let Some(ty) = section_type {
            if bullet_re().is_match(line) {
                facts.push(TaggedFact {
                    line: line_no,
                    chunk_type: ty,
                    confidence: HEADING_CLASSIFIED_CONFIDENCE,
                });
            }
        }
    }
    facts
}

/// Overwrite each chunk's type/confidence with the highest-confidence
/// tagged fact inside its line span. Inline tags beat file defaults.
pub fn upgrade_chunks_with_facts(chunks: &mut [NewChunk], facts: &[TaggedFact]) {
    for chunk in chunks {
        let best = facts
            .iter()
            .filter(|f| f.line >= chunk.line_start && f.line <= chunk.line_end)
            .max_by(|a, b| {
                a.confidence
                    .partial_cmp(&b.confidence)
                    .unwrap_or(std::cmp::Ordering::Equal)
            });
        if let Some(fact) = best {
            chunk.chunk_type = fact.chunk_type;
            chunk.confidence = fact.confidence;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chunks_split_at_headings() {
        let text = "# Alpha\nfirst section body\n\n## Beta\nsecond section body\n";
        let chunks = chunk_markdown(text);
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].heading.as_deref(), Some("Alpha"));
        assert_eq!(chunks[0].line_start, 1);
        assert_eq!(chunks[0].line_end, 3);
        assert_eq!(chunks[1].heading.as_deref(), Some("Beta"));
        assert_eq!(chunks[1].line_start, 4);
        assert_eq!(chunks[1].line_end, 5);
    }

    #[test]
    fn test_preamble_without_heading() {
        let text = "just some preamble text\nwith two lines\n";
        let chunks = chunk_markdown(text);
        assert_eq!(chunks.len(), 1);
        assert!(chunks[0].heading.is_none());
        assert_eq!(chunks[0].line_start, 1);
    }

    #[test]
    fn test_level_five_heading_does_not_split() {
        let text = "# Top\nbody line here\n##### Deep\nmore body\n";
        let chunks = chunk_markdown(text);
        assert_eq!(chunks.len(), 1);
        assert!(chunks[0].content.contains("##### Deep"));
    }

    #[test]
    fn test_tiny_chunks_dropped() {
        let text = "# Empty\nok\n\n# Real\nthis one has enough content\n";
        let chunks = chunk_markdown(text);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].heading.as_deref(), Some("Real"));
    }

    #[test]
    fn test_oversize_split_preserves_heading_and_final_line() {
        let para = "x".repeat(700);
        let text = format!("# Big\n{para}\n\n{para}\n\n{para}\n\n{para}\n");
        let chunks = chunk_markdown(&text);
        assert!(chunks.len() >= 2);
        for c in &chunks {
            assert_eq!(c.heading.as_deref(), Some("Big"));
            assert!(c.content.len() <= 2000);
        }
        // Last piece closes the original interval.
        assert_eq!(chunks.last().unwrap().line_end, 8);
        assert_eq!(chunks[0].line_start, 1);
    }

    #[test]
    fn test_extract_entities() {
        let ents = extract_entities("Talked to @sam about **Redis cache** and @sam again, plus **redis cache**.");
        assert_eq!(ents, vec!["@sam", "Redis cache"]);
    }

    #[test]
    fn test_extract_date_from_path() {
        use chrono::TimeZone;
        assert!(extract_date_from_path("memory/2026-02-20.md").is_some());
        assert!(extract_date_from_path("notes/no-date.md").is_none());
        let ms = extract_date_from_path("a/2026-02-20-extra.md").unwrap();
        let back = chrono::Local.timestamp_millis_opt(ms).unwrap().date_naive();
        assert_eq!(back, NaiveDate::from_ymd_opt(2026, 2, 20).unwrap());
    }

    #[test]
    fn test_tagged_facts() {
        let text = "# Log\n- [confirmed] Creatine 5g daily\n- [pref] dark roast only\nplain line\n";
        let facts = extract_tagged_facts(text);
        assert_eq!(facts.len(), 2);
        assert_eq!(facts[0].line, 2);
        assert_eq!(facts[0].chunk_type, ChunkType::Confirmed);
        assert_eq!(facts[0].confidence, 1.0);
        assert_eq!(facts[1].chunk_type, ChunkType::Preference);
    }

    #[test]
    fn test_outdated_question_tag() {
        let facts = extract_tagged_facts("- [outdated?] TTL is 300s\n");
        assert_eq!(facts.len(), 1);
        assert_eq!(facts[0].chunk_type, ChunkType::Outdated);
        assert_eq!(facts[0].confidence, 0.3);
    }

    #[test]
    fn test_heading_classified_bullets() {
        let text = "## Decisions\n- move to SQLite WAL mode\n\n## Notes\n- nothing implied here\n";
        let facts = extract_tagged_facts(text);
        assert_eq!(facts.len(), 1);
        assert_eq!(facts[0].line, 2);
        assert_eq!(facts[0].chunk_type, ChunkType::Decision);
        assert_eq!(facts[0].confidence, 0.9);
    }

    #[test]
    fn test_upgrade_takes_highest_confidence() {
        let text = "# Mixed\n- [inferred] maybe true\n- [confirmed] definitely true\n";
        let mut chunks = chunk_markdown(text);
        let facts = extract_tagged_facts(text);
        upgrade_chunks_with_facts(&mut chunks, &facts);
        assert_eq!(chunks[0].chunk_type, ChunkType::Confirmed);
        assert_eq!(chunks[0].confidence, 1.0);
    }

    #[test]
    fn test_upgrade_overrides_file_default() {
        let text = "# Section\n- [fact] tagged inside\n";
        let mut chunks = chunk_markdown(text);
        chunks[0].chunk_type = ChunkType::Inferred;
        chunks[0].confidence = 0.7;
        upgrade_chunks_with_facts(&mut chunks, &extract_tagged_facts(text));
        assert_eq!(chunks[0].chunk_type, ChunkType::Fact);
        assert_eq!(chunks[0].confidence, 1.0);
    }
}
