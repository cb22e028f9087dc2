//! Optional semantic layer. The embedding model is a process-global,
//! lazily-loaded handle; every caller degrades gracefully when the model
//! files are not installed.

use std::sync::OnceLock;

use anyhow::Result;
use serde::Serialize;

use crate::index::embedder::{Embedder, DEFAULT_MODEL, EMBEDDING_DIM};
use crate::storage::Store;

const EMBED_BATCH_SIZE: usize = 50;

enum ModelState {
    Unloaded,
    Unavailable,
    Loaded(Box<Embedder>),
}

/// Lazy process-global embedding model handle.
pub struct EmbeddingService {
    model_name: String,
    state: tokio::sync::Mutex<ModelState>,
}

impl EmbeddingService {
    pub fn new(model_name: &str) -> Self {
        Self {
            model_name: model_name.to_string(),
            state: tokio::sync::Mutex::new(ModelState::Unloaded),
        }
    }

    /// The shared process-wide instance.
    pub fn global() -> &'static EmbeddingService {
        static SERVICE: OnceLock<EmbeddingService> = OnceLock::new();
        SERVICE.get_or_init(|| EmbeddingService::new(DEFAULT_MODEL))
    }

    /// True when the model files are installed (without forcing a load).
    pub fn is_available(&self) -> bool {
        Embedder::is_installed(&self.model_name)
    }

    /// Try to load the model now. Returns availability; never errors.
    pub async fn warmup(&self) -> bool {
        let mut state = self.state.lock().await;
        self.ensure_loaded(&mut state)
    }

    fn ensure_loaded(&self, state: &mut ModelState) -> bool {
        match state {
            ModelState::Loaded(_) => true,
            ModelState::Unavailable => false,
            ModelState::Unloaded => match Embedder::load(&self.model_name) {
                Ok(embedder) => {
                    *state = ModelState::Loaded(Box::new(embedder));
                    true
                }
                Err(e) => {
                    tracing::debug!("embedding model unavailable: {e:#}");
                    *state = ModelState::Unavailable;
                    false
                }
            },
        }
    }

    /// Embed one text; `None` when the model is unavailable.
    pub async fn embed(&self, text: &str) -> Option<Vec<f32>> {
        let mut state = self.state.lock().await;
        if !self.ensure_loaded(&mut state) {
            return None;
        }
        let ModelState::Loaded(embedder) = &mut *state else {
            return None;
        };
        match embedder.embed(text) {
            Ok(v) => Some(v),
            Err(e) => {
                tracing::warn!("embedding failed: {e:#}");
                None
            }
        }
    }

    /// Embed every non-stale chunk still missing a vector, in batches,
    /// writing vectors back to the store. `on_progress` sees the running
    /// total after each batch.
    pub async fn embed_all(
        &self,
        store: &mut Store,
        mut on_progress: impl FnMut(usize),
    ) -> Result<EmbedAllReport> {
        let mut state = self.state.lock().await;
        if !self.ensure_loaded(&mut state) {
            return Ok(EmbedAllReport {
                available: false,
                embedded: 0,
            });
        }
        let ModelState::Loaded(embedder) = &mut *state else {
            unreachable!("ensure_loaded returned true");
        };

        let mut embedded = 0usize;
        loop {
            let batch = store.chunks_missing_embedding(EMBED_BATCH_SIZE)?;
            if batch.is_empty() {
                break;
            }
            let texts: Vec<&str> = batch.iter().map(|(_, content)| content.as_str()).collect();
            let vectors = embedder.embed_batch(&texts)?;
            for ((id, _), vector) in batch.iter().zip(vectors) {
                store.store_embedding(*id, &vector)?;
                embedded += 1;
            }
            on_progress(embedded);
        }
        Ok(EmbedAllReport {
            available: true,
            embedded,
        })
    }

    /// Linear scan over all embedded chunks by cosine similarity.
    pub async fn semantic_search(
        &self,
        store: &Store,
        query: &str,
        limit: usize,
    ) -> Result<Vec<(i64, f32)>> {
        let Some(query_vec) = self.embed(query).await else {
            return Ok(vec![]);
        };
        let mut scored: Vec<(i64, f32)> = store
            .embedded_vectors()?
            .into_iter()
            .map(|(id, vec)| (id, cosine_similarity(&query_vec, &vec)))
            .collect();
        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(limit);
        Ok(scored)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct EmbedAllReport {
    pub available: bool,
    pub embedded: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct EmbeddingStatus {
    pub available: bool,
    pub model: String,
    pub dimensions: usize,
    pub embedded_chunks: u64,
    pub pending_chunks: u64,
    pub total_chunks: u64,
}

/// Status snapshot for the CLI and tool surfaces.
pub fn embedding_status(service: &EmbeddingService, store: &Store) -> Result<EmbeddingStatus> {
    let stats = store.get_stats()?;
    let pending = stats
        .total_chunks
        .saturating_sub(stats.stale_chunks)
        .saturating_sub(stats.embedded_chunks);
    Ok(EmbeddingStatus {
        available: service.is_available(),
        model: DEFAULT_MODEL.to_string(),
        dimensions: EMBEDDING_DIM,
        embedded_chunks: stats.embedded_chunks,
        pending_chunks: pending,
        total_chunks: stats.total_chunks,
    })
}

/// Cosine similarity; 0.0 on empty or mismatched inputs. Vectors are
/// L2-normalized at embed time but the norm product is still applied.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.is_empty() || a.len() != b.len() {
        return 0.0;
    }
    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for (x, y) in a.iter().zip(b) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a.sqrt() * norm_b.sqrt())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cosine_identical() {
        let v = vec![0.6f32, 0.8];
        assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_orthogonal() {
        assert!((cosine_similarity(&[1.0, 0.0], &[0.0, 1.0])).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_degenerate_inputs() {
        assert_eq!(cosine_similarity(&[], &[]), 0.0);
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 2.0]), 0.0);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 1.0]), 0.0);
    }

    #[tokio::test]
    async fn test_missing_model_degrades() {
        let service = EmbeddingService::new("no-such-model");
        assert!(!service.is_available());
        assert!(!service.warmup().await);
        assert!(service.embed("anything").await.is_none());

        let dir = tempfile::TempDir::new().unwrap();
        let mut store = Store::open(dir.path()).unwrap();
        let report = service.embed_all(&mut store, |_| {}).await.unwrap();
        assert!(!report.available);
        assert_eq!(report.embedded, 0);
    }
}
