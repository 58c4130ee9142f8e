//! Embedding service trait and implementations.
//!
//! - `OnnxEmbeddingService` runs a sentence-transformer ONNX export (e.g.
//!   all-MiniLM-L6-v2) through ort, tokenizing with the HuggingFace
//!   tokenizers crate.
//! - `HashEmbedding` derives deterministic unit vectors from the BLAKE3
//!   extendable output of the text. Used in tests and when no model directory is configured.
//!
//! Index-time and query-time embedding must go through the same service
//! instance, so callers share one `Arc<dyn DynEmbeddingService>`.

use std::future::Future;
use std::path::Path;
use std::pin::Pin;
use std::sync::{Arc, Mutex};

use chatty_core::error::ChattyError;
use ort::session::Session;
use ort::value::TensorRef;
use tokenizers::Tokenizer;
use tracing::info;

/// Service for generating text embeddings.
pub trait EmbeddingService: Send + Sync {
    /// Generate an embedding vector for the given text.
    fn embed(&self, text: &str) -> impl Future<Output = Result<Vec<f32>, ChattyError>> + Send;

    /// Dimensionality of the vectors produced by this service.
    fn dimensions(&self) -> usize;

    /// Identifier of the model (and version) behind the vectors.
    fn model_id(&self) -> &str;
}

/// Future returned by [`DynEmbeddingService::embed_boxed`].
pub type EmbedFuture<'a> = Pin<Box<dyn Future<Output = Result<Vec<f32>, ChattyError>> + Send + 'a>>;

/// Object-safe version of [`EmbeddingService`].
///
/// Every `EmbeddingService` implements it through the blanket impl below.
pub trait DynEmbeddingService: Send + Sync {
    fn embed_boxed<'a>(&'a self, text: &'a str) -> EmbedFuture<'a>;

    fn dimensions(&self) -> usize;

    fn model_id(&self) -> &str;
}

impl<T: EmbeddingService> DynEmbeddingService for T {
    fn embed_boxed<'a>(&'a self, text: &'a str) -> EmbedFuture<'a> {
        Box::pin(self.embed(text))
    }

    fn dimensions(&self) -> usize {
        EmbeddingService::dimensions(self)
    }

    fn model_id(&self) -> &str {
        EmbeddingService::model_id(self)
    }
}

// ---------------------------------------------------------------------------
// OnnxEmbeddingService
// ---------------------------------------------------------------------------

/// ONNX Runtime-backed sentence-transformer.
///
/// The model directory must contain `model.onnx` and `tokenizer.json`. The
/// model takes `input_ids`, `attention_mask` and `token_type_ids` (i64) and
/// yields token embeddings, which are mean-pooled under the attention mask
/// and L2-normalised.
#[derive(Clone)]
pub struct OnnxEmbeddingService {
    session: Arc<Mutex<Session>>,
    tokenizer: Arc<Tokenizer>,
    dimensions: usize,
    model_id: String,
}

impl std::fmt::Debug for OnnxEmbeddingService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OnnxEmbeddingService")
            .field("model_id", &self.model_id)
            .field("dimensions", &self.dimensions)
            .finish()
    }
}

impl OnnxEmbeddingService {
    /// Load a model directory, labelling its vectors with `model_id`.
    pub fn from_directory(model_dir: &Path, model_id: &str) -> Result<Self, ChattyError> {
        Self::from_files(
            &model_dir.join("model.onnx"),
            &model_dir.join("tokenizer.json"),
            model_id,
        )
    }

    pub fn from_files(
        model_path: &Path,
        tokenizer_path: &Path,
        model_id: &str,
    ) -> Result<Self, ChattyError> {
        if !model_path.exists() {
            return Err(ChattyError::Embedding(format!(
                "ONNX model not found at {}",
                model_path.display()
            )));
        }
        if !tokenizer_path.exists() {
            return Err(ChattyError::Embedding(format!(
                "Tokenizer not found at {}",
                tokenizer_path.display()
            )));
        }

        let session = Session::builder()
            .map_err(|e| ChattyError::Embedding(format!("ONNX session builder: {}", e)))?
            .with_intra_threads(1)
            .map_err(|e| ChattyError::Embedding(format!("ONNX set threads: {}", e)))?
            .commit_from_file(model_path)
            .map_err(|e| ChattyError::Embedding(format!("ONNX load model: {}", e)))?;

        // Output is [batch, seq_len, hidden_dim]; dynamic axes report -1.
        let dimensions = session
            .outputs()
            .first()
            .and_then(|out| out.dtype().tensor_shape())
            .and_then(|shape| shape.last().copied())
            .filter(|d| *d > 0)
            .map(|d| d as usize)
            .unwrap_or(384);

        let tokenizer = Tokenizer::from_file(tokenizer_path)
            .map_err(|e| ChattyError::Embedding(format!("Failed to load tokenizer: {}", e)))?;

        info!(
            model = %model_path.display(),
            model_id,
            dimensions,
            "Loaded ONNX embedding model"
        );

        Ok(Self {
            session: Arc::new(Mutex::new(session)),
            tokenizer: Arc::new(tokenizer),
            dimensions,
            model_id: model_id.to_string(),
        })
    }

    fn embed_sync(&self, text: &str) -> Result<Vec<f32>, ChattyError> {
        if text.trim().is_empty() {
            return Err(ChattyError::Embedding("Cannot embed empty text".to_string()));
        }

        let encoding = self
            .tokenizer
            .encode(text, true)
            .map_err(|e| ChattyError::Embedding(format!("Tokenization failed: {}", e)))?;

        let input_ids: Vec<i64> = encoding.get_ids().iter().map(|&id| id as i64).collect();
        let attention_mask: Vec<i64> = encoding
            .get_attention_mask()
            .iter()
            .map(|&m| m as i64)
            .collect();
        let token_type_ids: Vec<i64> = encoding.get_type_ids().iter().map(|&t| t as i64).collect();

        let seq_len = input_ids.len();
        let ids_array = to_batch(input_ids, seq_len, "input_ids")?;
        let mask_array = to_batch(attention_mask.clone(), seq_len, "attention_mask")?;
        let type_array = to_batch(token_type_ids, seq_len, "token_type_ids")?;

        let ids_ref = TensorRef::from_array_view(&ids_array)
            .map_err(|e| ChattyError::Embedding(format!("TensorRef input_ids: {}", e)))?;
        let mask_ref = TensorRef::from_array_view(&mask_array)
            .map_err(|e| ChattyError::Embedding(format!("TensorRef attention_mask: {}", e)))?;
        let type_ref = TensorRef::from_array_view(&type_array)
            .map_err(|e| ChattyError::Embedding(format!("TensorRef token_type_ids: {}", e)))?;

        let mut session = self
            .session
            .lock()
            .map_err(|e| ChattyError::Embedding(format!("Session lock poisoned: {}", e)))?;
        let outputs = session
            .run(ort::inputs![ids_ref, mask_ref, type_ref])
            .map_err(|e| ChattyError::Embedding(format!("ONNX inference failed: {}", e)))?;

        let (shape, data) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| ChattyError::Embedding(format!("Extract embeddings: {}", e)))?;

        let hidden_dim = match shape.iter().copied().collect::<Vec<i64>>().as_slice() {
            [_, .., last] if *last > 0 => *last as usize,
            other => {
                return Err(ChattyError::Embedding(format!(
                    "Unexpected output shape: {:?}",
                    other
                )))
            }
        };

        let mut pooled = mean_pool(data, &attention_mask, hidden_dim);
        l2_normalize(&mut pooled);
        Ok(pooled)
    }
}

impl EmbeddingService for OnnxEmbeddingService {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, ChattyError> {
        // CPU-bound inference runs on the blocking pool.
        let service = self.clone();
        let text = text.to_string();
        tokio::task::spawn_blocking(move || service.embed_sync(&text))
            .await
            .map_err(|e| ChattyError::Embedding(format!("Embedding task panicked: {}", e)))?
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn model_id(&self) -> &str {
        &self.model_id
    }
}

fn to_batch(
    values: Vec<i64>,
    seq_len: usize,
    name: &str,
) -> Result<ndarray::Array2<i64>, ChattyError> {
    ndarray::Array2::from_shape_vec((1, seq_len), values)
        .map_err(|e| ChattyError::Embedding(format!("{} array: {}", name, e)))
}

/// Average the token rows whose attention mask is set.
///
/// `data` is the flattened `[seq_len, hidden_dim]` token matrix of one input.
pub fn mean_pool(data: &[f32], attention_mask: &[i64], hidden_dim: usize) -> Vec<f32> {
    let mut pooled = vec![0.0f32; hidden_dim];
    let mut count = 0.0f32;

    for (tok_idx, &mask) in attention_mask.iter().enumerate() {
        if mask <= 0 {
            continue;
        }
        let offset = tok_idx * hidden_dim;
        let Some(row) = data.get(offset..offset + hidden_dim) else {
            break;
        };
        for (acc, v) in pooled.iter_mut().zip(row) {
            *acc += v;
        }
        count += 1.0;
    }

    if count > 0.0 {
        for v in &mut pooled {
            *v /= count;
        }
    }
    pooled
}

/// Scale to unit length in place. Zero vectors are left untouched.
pub fn l2_normalize(vector: &mut [f32]) {
    let norm: f32 = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > 0.0 {
        for v in vector.iter_mut() {
            *v /= norm;
        }
    }
}

// ---------------------------------------------------------------------------
// HashEmbedding
// ---------------------------------------------------------------------------

/// Deterministic hash-derived embeddings.
///
/// Identical inputs always map to identical unit vectors; unrelated inputs
/// land close to orthogonal. There is no semantic similarity.
#[derive(Debug, Clone)]
pub struct HashEmbedding {
    dimensions: usize,
    model_id: String,
}

impl HashEmbedding {
    pub fn new(dimensions: usize) -> Self {
        Self {
            dimensions,
            model_id: format!("blake3-{}", dimensions),
        }
    }

    fn hash_to_vector(&self, text: &str) -> Vec<f32> {
        // Four output bytes per component, fixed across builds and platforms.
        let mut bytes = vec![0u8; self.dimensions * 4];
        blake3::Hasher::new()
            .update(text.as_bytes())
            .finalize_xof()
            .fill(&mut bytes);

        let mut result: Vec<f32> = bytes
            .chunks_exact(4)
            .map(|chunk| {
                let h = u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
                (((h as f64) / (u32::MAX as f64)) * 2.0 - 1.0) as f32
            })
            .collect();
        l2_normalize(&mut result);
        result
    }
}

impl Default for HashEmbedding {
    fn default() -> Self {
        Self::new(384)
    }
}

impl EmbeddingService for HashEmbedding {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, ChattyError> {
        if text.trim().is_empty() {
            return Err(ChattyError::Embedding("Cannot embed empty text".to_string()));
        }
        Ok(self.hash_to_vector(text))
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn model_id(&self) -> &str {
        &self.model_id
    }
}
