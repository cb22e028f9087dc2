use anyhow::Result;
use ndarray::Array2;
use ort::session::Session;
use ort::value::Tensor;
use std::path::{Path, PathBuf};
use tokenizers::Tokenizer;

/// Dimensionality of every stored vector.
pub const EMBEDDING_DIM: usize = 384;

/// Default model: small, fast, 384-dim output.
pub const DEFAULT_MODEL: &str = "all-MiniLM-L6-v2";

const MAX_SEQ_LEN: usize = 256;

/// Generates 384-dim mean-pooled, L2-normalized embeddings with ONNX runtime.
pub struct Embedder {
    session: Session,
    tokenizer: Tokenizer,
}

impl Embedder {
    /// The directory where model files are expected:
    /// `<cache>/models/<model>/` containing `onnx/model.onnx` and `tokenizer.json`.
    pub fn model_dir(model_name: &str) -> Result<PathBuf> {
        let dirs = directories::ProjectDirs::from("dev", "engram", "engram")
            .ok_or_else(|| anyhow::anyhow!("Failed to determine user cache directory"))?;
        Ok(dirs.cache_dir().join("models").join(model_name))
    }

    /// True when the model files are present on disk.
    pub fn is_installed(model_name: &str) -> bool {
        Self::model_dir(model_name)
            .map(|dir| dir.join("onnx/model.onnx").exists() && dir.join("tokenizer.json").exists())
            .unwrap_or(false)
    }

    /// Load the embedding model from its cache directory.
    pub fn load(model_name: &str) -> Result<Self> {
        Self::load_from(&Self::model_dir(model_name)?)
    }

    /// Load from an explicit directory containing `onnx/model.onnx` and
    /// `tokenizer.json`.
    pub fn load_from(model_dir: &Path) -> Result<Self> {
        let model_path = model_dir.join("onnx/model.onnx");
        let tokenizer_path = model_dir.join("tokenizer.json");
        if !model_path.exists() || !tokenizer_path.exists() {
            anyhow::bail!(
                "Embedding model not found under {}. Semantic features stay disabled until it is installed.",
                model_dir.display()
            );
        }

        let session = Session::builder()
            .map_err(|e| anyhow::anyhow!("Failed to create ONNX session builder: {e}"))?
            .with_intra_threads(4)
            .map_err(|e| anyhow::anyhow!("Failed to set thread count: {e}"))?
            .commit_from_file(&model_path)
            .map_err(|e| {
                anyhow::anyhow!("Failed to load ONNX model from {}: {e}", model_path.display())
            })?;

        let tokenizer = Tokenizer::from_file(&tokenizer_path)
            .map_err(|e| anyhow::anyhow!("Failed to load tokenizer: {e}"))?;

        Ok(Self { session, tokenizer })
    }

    /// Embed a batch of texts; one vector per input, in order.
    pub fn embed_batch(&mut self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(vec![]);
        }

        let encodings = self
            .tokenizer
            .encode_batch(texts.to_vec(), true)
            .map_err(|e| anyhow::anyhow!("Tokenization failed: {e}"))?;

        let batch = encodings.len();
        let seq = encodings
            .iter()
            .map(|e| e.get_ids().len())
            .max()
            .unwrap_or(0)
            .min(MAX_SEQ_LEN);

        // Zero-padded (batch, seq) grids for the three model inputs, plus
        // a per-row mask kept for pooling after inference.
        let mut ids = Array2::<i64>::zeros((batch, seq));
        let mut mask = Array2::<i64>::zeros((batch, seq));
        let mut type_ids = Array2::<i64>::zeros((batch, seq));
        let mut attended: Vec<Vec<bool>> = Vec::with_capacity(batch);
        for (row, enc) in encodings.iter().enumerate() {
            let tokens = enc
                .get_ids()
                .iter()
                .zip(enc.get_attention_mask())
                .zip(enc.get_type_ids())
                .take(seq);
            let mut row_mask = vec![false; seq];
            for (col, ((&id, &m), &t)) in tokens.enumerate() {
                ids[[row, col]] = id as i64;
                mask[[row, col]] = m as i64;
                type_ids[[row, col]] = t as i64;
                row_mask[col] = m == 1;
            }
            attended.push(row_mask);
        }

        let outputs = self
            .session
            .run(ort::inputs![
                "input_ids" => int_tensor(ids, "input_ids")?,
                "attention_mask" => int_tensor(mask, "attention_mask")?,
                "token_type_ids" => int_tensor(type_ids, "token_type_ids")?,
            ])
            .map_err(|e| anyhow::anyhow!("ONNX inference failed: {e}"))?;

        let (shape, data) = outputs["last_hidden_state"]
            .try_extract_tensor::<f32>()
            .map_err(|e| anyhow::anyhow!("Failed to extract output tensor: {e}"))?;
        let dims: Vec<usize> = shape.iter().map(|&d| d as usize).collect();
        let (out_seq, hidden) = (dims[1], dims[2]);

        Ok((0..batch)
            .map(|row| mean_pool(data, &attended[row], row, out_seq, hidden))
            .collect())
    }

    /// Embed a single text.
    pub fn embed(&mut self, text: &str) -> Result<Vec<f32>> {
        let mut batch = self.embed_batch(&[text])?;
        batch
            .pop()
            .ok_or_else(|| anyhow::anyhow!("Embedding produced no output"))
    }
}

fn int_tensor(grid: Array2<i64>, name: &str) -> Result<Tensor<i64>> {
    Tensor::from_array(grid).map_err(|e| anyhow::anyhow!("Failed to create {name} tensor: {e}"))
}

/// Average one sequence's attended token vectors, then L2-normalize.
/// MiniLM's head is exactly `EMBEDDING_DIM` wide; the min guards against a
/// swapped-in model with a different head.
fn mean_pool(data: &[f32], attended: &[bool], row: usize, out_seq: usize, hidden: usize) -> Vec<f32> {
    let dim = hidden.min(EMBEDDING_DIM);
    let mut pooled = vec![0.0f32; dim];
    let mut count = 0.0f32;
    for (col, keep) in attended.iter().enumerate().take(out_seq) {
        if !keep {
            continue;
        }
        let token = &data[(row * out_seq + col) * hidden..][..dim];
        for (acc, v) in pooled.iter_mut().zip(token) {
            *acc += v;
        }
        count += 1.0;
    }
    if count > 0.0 {
        for v in &mut pooled {
            *v /= count;
        }
    }
    let norm = pooled.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > 0.0 {
        for v in &mut pooled {
            *v /= norm;
        }
    }
    pooled
}
