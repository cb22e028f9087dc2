use crate::types::RankedChunk;

/// A weight profile for the composite scorer. Component weights sum to 1.
#[derive(Debug, Clone, Copy)]
pub struct ScoreProfile {
    pub fts: f64,
    pub recency: f64,
    pub chunk_type: f64,
    pub file_weight: f64,
    pub entity: f64,
    pub semantic: f64,
    /// Recency half-life in days.
    pub half_life_days: f64,
    /// Exponent applied to confidence in the final multiply.
    pub confidence_exp: f64,
}

impl ScoreProfile {
    pub fn with_half_life(mut self, days: f64) -> Self {
        self.half_life_days = days;
        self
    }
}

/// Precision search: trusts FTS, long memory.
pub const RECALL: ScoreProfile = ScoreProfile {
    fts: 0.50,
    recency: 0.25,
    chunk_type: 0.10,
    file_weight: 0.10,
    entity: 0.05,
    semantic: 0.0,
    half_life_days: 90.0,
    confidence_exp: 1.0,
};

/// Context assembly: recency-heavy, punishes low confidence harder.
pub const CIL: ScoreProfile = ScoreProfile {
    fts: 0.35,
    recency: 0.30,
    chunk_type: 0.15,
    file_weight: 0.10,
    entity: 0.10,
    semantic: 0.0,
    half_life_days: 14.0,
    confidence_exp: 1.5,
};

/// Context assembly with a query embedding available.
pub const CIL_SEMANTIC: ScoreProfile = ScoreProfile {
    fts: 0.20,
    recency: 0.20,
    chunk_type: 0.10,
    file_weight: 0.10,
    entity: 0.10,
    semantic: 0.30,
    half_life_days: 14.0,
    confidence_exp: 1.5,
};

const MS_PER_DAY: f64 = 86_400_000.0;

/// Composite score for one ranked candidate.
///
/// When the profile carries semantic weight but this candidate has no
/// similarity, the semantic weight folds into the FTS component so
/// unembedded chunks are not structurally penalized.
pub fn score(candidate: &RankedChunk, now_ms: i64, profile: &ScoreProfile) -> f64 {
    let chunk = &candidate.chunk;
    let days = ((now_ms - chunk.created_at) as f64 / MS_PER_DAY).max(0.0);
    let recency = (-(std::f64::consts::LN_2) * days / profile.half_life_days).exp();
    let type_component = (chunk.chunk_type.bonus() + 0.15) / 0.30;
    let file_component = chunk.file_weight / 1.5;
    let entity_component = if candidate.entity_match { 1.0 } else { 0.0 };
    let sem = candidate.semantic_sim.unwrap_or(0.0);
    let n_fts = candidate.normalized_fts;

    let base = if profile.semantic > 0.0 && sem > 0.0 {
        profile.fts * n_fts
            + profile.semantic * sem
            + profile.recency * recency
            + profile.chunk_type * type_component
            + profile.file_weight * file_component
            + profile.entity * entity_component
    } else {
        (profile.fts + profile.semantic) * n_fts
            + profile.recency * recency
            + profile.chunk_type * type_component
            + profile.file_weight * file_component
            + profile.entity * entity_component
    };

    base * chunk.confidence.max(0.0).powf(profile.confidence_exp)
}

/// Map raw FTS ranks (negative; more negative = stronger) into [0.3, 1.0]:
/// best rank becomes 1.0, worst 0.3, linear in between. A single row gets
/// 1.0; a flat set gets 0.3.
pub fn normalize_fts_scores(candidates: &mut [RankedChunk]) {
    match candidates.len() {
        0 => return,
        1 => {
            candidates[0].normalized_fts = 1.0;
            return;
        }
        _ => {}
    }
    let best = candidates.iter().map(|c| c.rank).fold(f64::INFINITY, f64::min);
    let worst = candidates
        .iter()
        .map(|c| c.rank)
        .fold(f64::NEG_INFINITY, f64::max);
    let span = worst - best;
    for c in candidates {
        c.normalized_fts = if span.abs() < f64::EPSILON {
            0.3
        } else {
            0.3 + 0.7 * (worst - c.rank) / span
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Chunk, ChunkType};

    fn candidate(chunk_type: ChunkType, confidence: f64, created_at: i64) -> RankedChunk {
        RankedChunk::new(
            Chunk {
                id: 1,
                file_path: "a.md".into(),
                heading: None,
                content: "body".into(),
                line_start: 1,
                line_end: 1,
                entities: vec![],
                chunk_type,
                confidence,
                created_at,
                indexed_at: created_at,
                file_weight: 1.0,
                access_count: 0,
                last_accessed: None,
                stale: false,
                embedding: None,
            },
            -1.0,
        )
    }

    const NOW: i64 = 1_700_000_000_000;

    #[test]
    fn test_profiles_sum_to_one() {
        for p in [RECALL, CIL, CIL_SEMANTIC] {
            let sum = p.fts + p.recency + p.chunk_type + p.file_weight + p.entity + p.semantic;
            assert!((sum - 1.0).abs() < 1e-9);
        }
    }

    #[test]
    fn test_recency_half_life() {
        let mut fresh = candidate(ChunkType::Raw, 1.0, NOW);
        let mut old = candidate(ChunkType::Raw, 1.0, NOW - 90 * 86_400_000);
        fresh.normalized_fts = 1.0;
        old.normalized_fts = 1.0;
        let s_fresh = score(&fresh, NOW, &RECALL);
        let s_old = score(&old, NOW, &RECALL);
        // 90 days at a 90-day half-life: the recency component halves.
        assert!(s_fresh > s_old);
        let diff = s_fresh - s_old;
        assert!((diff - RECALL.recency * 0.5).abs() < 0.01);
    }

    #[test]
    fn test_confidence_exponent() {
        let mut a = candidate(ChunkType::Raw, 0.5, NOW);
        let mut b = candidate(ChunkType::Raw, 0.5, NOW);
        a.normalized_fts = 1.0;
        b.normalized_fts = 1.0;
        let linear = score(&a, NOW, &RECALL);
        let steep = score(&b, NOW, &CIL);
        // CIL squashes half-confidence more than RECALL does, relative to
        // the same candidate at full confidence.
        let mut a_full = candidate(ChunkType::Raw, 1.0, NOW);
        let mut b_full = candidate(ChunkType::Raw, 1.0, NOW);
        a_full.normalized_fts = 1.0;
        b_full.normalized_fts = 1.0;
        let ratio_recall = linear / score(&a_full, NOW, &RECALL);
        let ratio_cil = steep / score(&b_full, NOW, &CIL);
        assert!((ratio_recall - 0.5).abs() < 1e-9);
        assert!((ratio_cil - 0.5f64.powf(1.5)).abs() < 1e-9);
    }

    #[test]
    fn test_semantic_folds_into_fts_when_absent() {
        let mut c = candidate(ChunkType::Raw, 1.0, NOW);
        c.normalized_fts = 0.8;
        let without_sem = score(&c, NOW, &CIL_SEMANTIC);
        c.semantic_sim = Some(0.8);
        let with_sem = score(&c, NOW, &CIL_SEMANTIC);
        // Equal sim and fts: same outcome whether weight folds or splits.
        assert!((without_sem - with_sem).abs() < 1e-9);

        c.semantic_sim = Some(0.2);
        let weak_sem = score(&c, NOW, &CIL_SEMANTIC);
        assert!(weak_sem < without_sem);
    }

    #[test]
    fn test_type_bonus_ordering() {
        let mut confirmed = candidate(ChunkType::Confirmed, 1.0, NOW);
        let mut outdated = candidate(ChunkType::Outdated, 1.0, NOW);
        confirmed.normalized_fts = 0.5;
        outdated.normalized_fts = 0.5;
        assert!(score(&confirmed, NOW, &CIL) > score(&outdated, NOW, &CIL));
    }

    #[test]
    fn test_entity_match_bonus() {
        let mut plain = candidate(ChunkType::Raw, 1.0, NOW);
        let mut matched = candidate(ChunkType::Raw, 1.0, NOW);
        plain.normalized_fts = 0.5;
        matched.normalized_fts = 0.5;
        matched.entity_match = true;
        let delta = score(&matched, NOW, &CIL) - score(&plain, NOW, &CIL);
        assert!((delta - CIL.entity).abs() < 1e-9);
    }

    #[test]
    fn test_normalize_single_row() {
        let mut rows = vec![candidate(ChunkType::Raw, 1.0, NOW)];
        normalize_fts_scores(&mut rows);
        assert_eq!(rows[0].normalized_fts, 1.0);
    }

    #[test]
    fn test_normalize_flat_set() {
        let mut rows = vec![
            candidate(ChunkType::Raw, 1.0, NOW),
            candidate(ChunkType::Raw, 1.0, NOW),
        ];
        rows[0].rank = -2.0;
        rows[1].rank = -2.0;
        normalize_fts_scores(&mut rows);
        assert_eq!(rows[0].normalized_fts, 0.3);
        assert_eq!(rows[1].normalized_fts, 0.3);
    }

    #[test]
    fn test_normalize_linear_spread() {
        let mut rows = vec![
            candidate(ChunkType::Raw, 1.0, NOW),
            candidate(ChunkType::Raw, 1.0, NOW),
            candidate(ChunkType::Raw, 1.0, NOW),
        ];
        rows[0].rank = -6.0; // best
        rows[1].rank = -4.0;
        rows[2].rank = -2.0; // worst
        normalize_fts_scores(&mut rows);
        assert!((rows[0].normalized_fts - 1.0).abs() < 1e-9);
        assert!((rows[1].normalized_fts - 0.65).abs() < 1e-9);
        assert!((rows[2].normalized_fts - 0.3).abs() < 1e-9);
    }
}
