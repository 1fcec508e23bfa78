//! Pluggable AI capabilities (§1 "LLM summarizer" and "the embedding model"
//! are explicitly out of scope / pluggable). `Summarizer` and `Embedder` are
//! trait objects so a real hosted model can be swapped in without touching
//! the reconciler; the reference implementations here are enough to
//! exercise the two-phase protocol end to end.

use async_trait::async_trait;
use candle_core::{DType, Device};
use fastembed::Qwen3TextEmbedding;
use std::sync::{Arc, Mutex};
use tracing::info;

use crate::error::{AppError, AppResult};

/// Embedding dimension for the reference embedder (Qwen3-Embedding-0.6B's
/// `hidden_size`), matching the `D` referenced in §3's `EmbeddingCacheEntry`.
pub const EMBEDDING_DIM: usize = 1024;

const QWEN3_REPO_ID: &str = "Qwen/Qwen3-Embedding-0.6B";
const QWEN3_MAX_LENGTH: usize = 8192;

/// Batched summarization: exactly one summary per input `(hash, code)` pair,
/// in order, or an error. §4.9 step 2 validates the returned length itself.
#[async_trait]
pub trait Summarizer: Send + Sync {
    async fn summarize_batch(&self, chunks: &[(&str, &str)]) -> AppResult<Vec<String>>;
}

/// Batched embedding: exactly one vector of `dimension()` floats per input
/// text, in order.
#[async_trait]
pub trait Embedder: Send + Sync {
    fn dimension(&self) -> usize;
    async fn embed_batch(&self, texts: &[String]) -> AppResult<Vec<Vec<f32>>>;
}

/// A deterministic stand-in for a hosted LLM summarizer: the first
/// non-blank trimmed line of the chunk, truncated to a bounded length. Good
/// enough to populate the cache and exercise phase-2's length-validation
/// contract; a production deployment swaps this for a real model behind the
/// same trait.
pub struct HeuristicSummarizer {
    max_len: usize,
}

impl HeuristicSummarizer {
    pub fn new() -> Self {
        HeuristicSummarizer { max_len: 160 }
    }

    fn summarize_one(code: &str, max_len: usize) -> String {
        let first_line = code
            .lines()
            .map(str::trim)
            .find(|l| !l.is_empty())
            .unwrap_or("(empty chunk)");
        if first_line.chars().count() > max_len {
            let truncated: String = first_line.chars().take(max_len).collect();
            format!("{truncated}…")
        } else {
            first_line.to_string()
        }
    }
}

impl Default for HeuristicSummarizer {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Summarizer for HeuristicSummarizer {
    async fn summarize_batch(&self, chunks: &[(&str, &str)]) -> AppResult<Vec<String>> {
        Ok(chunks
            .iter()
            .map(|(_, code)| Self::summarize_one(code, self.max_len))
            .collect())
    }
}

/// On-device embedder backed by candle, matching the reference model the
/// teacher loads for its own semantic search (`Qwen3TextEmbedding`, CPU,
/// F32, last-token pooling). Lazily initialized behind a `Mutex` the same
/// way the teacher's `EmbeddingManager::ensure_model` is — loading the model
/// eagerly would slow every `serve` startup even when no indexing happens.
/// Inference runs on a blocking thread so the phase-2 timeout can actually
/// race it, rather than blocking the async reactor.
pub struct LocalEmbedder {
    model: Arc<Mutex<Option<Qwen3TextEmbedding>>>,
}

impl LocalEmbedder {
    pub fn new() -> Self {
        LocalEmbedder {
            model: Arc::new(Mutex::new(None)),
        }
    }

    fn ensure_and_embed(
        model_cell: &Mutex<Option<Qwen3TextEmbedding>>,
        texts: &[String],
    ) -> AppResult<Vec<Vec<f32>>> {
        let mut guard = model_cell
            .lock()
            .map_err(|_| AppError::Internal(anyhow::anyhow!("embedding model lock poisoned")))?;
        if guard.is_none() {
            info!(
                repo = QWEN3_REPO_ID,
                dim = EMBEDDING_DIM,
                "initializing embedding model"
            );
            let device = Device::Cpu;
            let model =
                Qwen3TextEmbedding::from_hf(QWEN3_REPO_ID, &device, DType::F32, QWEN3_MAX_LENGTH)
                    .map_err(|e| {
                        AppError::Internal(anyhow::anyhow!("embedding model init failed: {e}"))
                    })?;
            let actual_dim = model.config().hidden_size;
            if actual_dim != EMBEDDING_DIM {
                return Err(AppError::Internal(anyhow::anyhow!(
                    "embedding model dimension mismatch: expected {EMBEDDING_DIM}, got {actual_dim}"
                )));
            }
            *guard = Some(model);
        }
        guard
            .as_ref()
            .unwrap()
            .embed(texts)
            .map_err(|e| AppError::Internal(anyhow::anyhow!("embedding failed: {e}")))
    }
}

impl Default for LocalEmbedder {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Embedder for LocalEmbedder {
    fn dimension(&self) -> usize {
        EMBEDDING_DIM
    }

    async fn embed_batch(&self, texts: &[String]) -> AppResult<Vec<Vec<f32>>> {
        let model_cell = self.model.clone();
        let owned: Vec<String> = texts.to_vec();
        tokio::task::spawn_blocking(move || Self::ensure_and_embed(&model_cell, &owned))
            .await
            .map_err(|e| AppError::Internal(anyhow::anyhow!("embedding task panicked: {e}")))?
    }
}

/// True if every component is exactly zero — §4.9 step 4 / §4.10's
/// zero-vector policy, shared by the reconciler and the vector store.
pub fn is_zero_vector(v: &[f32]) -> bool {
    v.iter().all(|x| *x == 0.0)
}
