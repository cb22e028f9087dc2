use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex, OnceLock};
use std::time::{Duration, Instant};

use anyhow::Result;
use serde::Serialize;

use crate::storage::Store;
use crate::types::EntityRecord;

/// Entity labels are compared lowercased with any leading `@` stripped.
pub fn normalize_label(label: &str) -> Option<String> {
    let normalized = label.trim().trim_start_matches('@').to_lowercase();
    if normalized.len() < 2 {
        None
    } else {
        Some(normalized)
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct EntityIndexReport {
    pub entities: usize,
    pub links: usize,
}

/// Rebuild the entity index from non-stale chunks: chunk-id sets, newest
/// `created_at` per entity, and pairwise co-occurrence counts. The table
/// is replaced atomically; `dry_run` reports without writing.
pub fn build_entity_index(store: &mut Store, dry_run: bool) -> Result<EntityIndexReport> {
    // BTreeMap keeps the rebuilt table ordering stable across runs.
    let mut by_entity: BTreeMap<String, EntityRecord> = BTreeMap::new();

    for (chunk_id, labels, created_at) in store.entity_rows()? {
        let normalized: Vec<String> = {
            let mut seen = HashSet::new();
            labels
                .iter()
                .filter_map(|l| normalize_label(l))
                .filter(|l| seen.insert(l.clone()))
                .collect()
        };
        for label in &normalized {
            let rec = by_entity.entry(label.clone()).or_insert_with(|| EntityRecord {
                entity: label.clone(),
                chunk_ids: vec![],
                co_entities: HashMap::new(),
                mention_count: 0,
                last_seen: created_at,
            });
            rec.chunk_ids.push(chunk_id);
            rec.mention_count += 1;
            rec.last_seen = rec.last_seen.max(created_at);
            for other in &normalized {
                if other != label {
                    *rec.co_entities.entry(other.clone()).or_insert(0) += 1;
                }
            }
        }
    }

    let records: Vec<EntityRecord> = by_entity.into_values().collect();
    let report = EntityIndexReport {
        entities: records.len(),
        links: records.iter().map(|r| r.co_entities.len()).sum::<usize>() / 2,
    };
    if !dry_run {
        store.replace_entity_index(&records)?;
    }
    Ok(report)
}

/// Co-occurring entities for a name, strongest first.
pub fn get_related_entities(store: &Store, name: &str) -> Result<Vec<(String, u32)>> {
    let Some(normalized) = normalize_label(name) else {
        return Ok(vec![]);
    };
    let Some(record) = store.get_entity(&normalized)? else {
        return Ok(vec![]);
    };
    let mut related: Vec<(String, u32)> = record.co_entities.into_iter().collect();
    related.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    Ok(related)
}

/// One-hop expansion through the co-occurrence graph: every entity that
/// co-occurred at least `co_threshold` times with a member of the set.
pub fn expand_with_cooccurrence(
    store: &Store,
    matched: &HashSet<String>,
    co_threshold: u32,
) -> Result<HashSet<String>> {
    let mut expanded = matched.clone();
    for name in matched {
        if let Some(record) = store.get_entity(name)? {
            for (other, count) in record.co_entities {
                if count >= co_threshold {
                    expanded.insert(other);
                }
            }
        }
    }
    Ok(expanded)
}

/// Process-wide cache of known entity labels, rebuilt at most once per TTL
/// (60 s) by scanning the store. Invalidation is explicit.
pub struct EntityCache {
    ttl: Duration,
    inner: Mutex<Option<(Instant, Arc<Vec<String>>)>>,
}

impl EntityCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            inner: Mutex::new(None),
        }
    }

    /// The shared process-wide instance.
    pub fn global() -> &'static EntityCache {
        static CACHE: OnceLock<EntityCache> = OnceLock::new();
        CACHE.get_or_init(|| EntityCache::new(Duration::from_secs(60)))
    }

    /// Known entity labels, from cache when fresh.
    pub fn get(&self, store: &Store) -> Result<Arc<Vec<String>>> {
        let mut guard = self.inner.lock().expect("entity cache poisoned");
        if let Some((built_at, labels)) = guard.as_ref() {
            if built_at.elapsed() < self.ttl {
                return Ok(Arc::clone(labels));
            }
        }
        let mut labels: HashSet<String> = HashSet::new();
        for (_, raw_labels, _) in store.entity_rows()? {
            for l in &raw_labels {
                if let Some(n) = normalize_label(l) {
                    labels.insert(n);
                }
            }
        }
        let mut sorted: Vec<String> = labels.into_iter().collect();
        sorted.sort();
        let arc = Arc::new(sorted);
        *guard = Some((Instant::now(), Arc::clone(&arc)));
        Ok(arc)
    }

    pub fn invalidate(&self) {
        *self.inner.lock().expect("entity cache poisoned") = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ChunkType, NewChunk};
    use tempfile::TempDir;

    fn chunk(content: &str, entities: &[&str]) -> NewChunk {
        NewChunk {
            heading: None,
            content: content.to_string(),
            line_start: 1,
            line_end: 2,
            entities: entities.iter().map(|s| (*s).to_string()).collect(),
            chunk_type: ChunkType::Raw,
            confidence: 1.0,
        }
    }

    fn seeded_store() -> (TempDir, Store) {
        let dir = TempDir::new().unwrap();
        let mut store = Store::open(dir.path()).unwrap();
        store
            .insert_chunks(
                "a.md",
                1,
                &[
                    chunk("sam and redis twice", &["@sam", "Redis"]),
                    chunk("sam and redis again", &["@sam", "redis"]),
                    chunk("sam alone this time", &["@Sam"]),
                ],
                Some(100),
            )
            .unwrap();
        store
            .insert_chunks("b.md", 1, &[chunk("postgres only", &["postgres"])], Some(200))
            .unwrap();
        (dir, store)
    }

    #[test]
    fn test_build_entity_index() {
        let (_dir, mut store) = seeded_store();
        let report = build_entity_index(&mut store, false).unwrap();
        assert_eq!(report.entities, 3);

        let sam = store.get_entity("sam").unwrap().unwrap();
        assert_eq!(sam.mention_count, 3);
        assert_eq!(sam.chunk_ids.len(), 3);
        assert_eq!(sam.co_entities.get("redis"), Some(&2));
        assert_eq!(sam.last_seen, 100);

        let pg = store.get_entity("postgres").unwrap().unwrap();
        assert_eq!(pg.mention_count, 1);
        assert!(pg.co_entities.is_empty());
    }

    #[test]
    fn test_dry_run_writes_nothing() {
        let (_dir, mut store) = seeded_store();
        let report = build_entity_index(&mut store, true).unwrap();
        assert_eq!(report.entities, 3);
        assert!(store.get_entity("sam").unwrap().is_none());
    }

    #[test]
    fn test_related_sorted_desc() {
        let (_dir, mut store) = seeded_store();
        build_entity_index(&mut store, false).unwrap();
        let related = get_related_entities(&store, "@Sam").unwrap();
        assert_eq!(related[0], ("redis".to_string(), 2));
    }

    #[test]
    fn test_cooccurrence_expansion_threshold() {
        let (_dir, mut store) = seeded_store();
        build_entity_index(&mut store, false).unwrap();

        let matched: HashSet<String> = ["sam".to_string()].into_iter().collect();
        let expanded = expand_with_cooccurrence(&store, &matched, 2).unwrap();
        assert!(expanded.contains("redis"));
        assert!(!expanded.contains("postgres"));

        let expanded = expand_with_cooccurrence(&store, &matched, 3).unwrap();
        assert!(!expanded.contains("redis"));
    }

    #[test]
    fn test_cache_ttl_and_invalidate() {
        let (_dir, mut store) = seeded_store();
        let cache = EntityCache::new(Duration::from_secs(600));
        let labels = cache.get(&store).unwrap();
        assert!(labels.contains(&"sam".to_string()));
        assert!(labels.contains(&"redis".to_string()));

        // New chunk is invisible until invalidation.
        store
            .insert_chunks("c.md", 1, &[chunk("kafka topic notes", &["@kafka"])], None)
            .unwrap();
        let cached = cache.get(&store).unwrap();
        assert!(!cached.contains(&"kafka".to_string()));

        cache.invalidate();
        let fresh = cache.get(&store).unwrap();
        assert!(fresh.contains(&"kafka".to_string()));
    }

    #[test]
    fn test_normalize_label() {
        assert_eq!(normalize_label("@Sam"), Some("sam".to_string()));
        assert_eq!(normalize_label("Redis Cache"), Some("redis cache".to_string()));
        assert_eq!(normalize_label("@x"), None);
    }
}
