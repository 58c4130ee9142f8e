//! In-memory vector index with brute-force cosine similarity search.
//!
//! Search is O(n) per query. The index records the dimension of the first
//! vector it receives and rejects any other dimension afterwards.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use tracing::{info, warn};

use chatty_core::error::ChattyError;
use chatty_storage::PassageRepository;

use crate::store::{ScoredText, VectorStore};

#[derive(Debug, Clone)]
struct VectorEntry {
    embedding: Vec<f32>,
    text: String,
}

#[derive(Debug, Default)]
struct IndexState {
    entries: HashMap<String, VectorEntry>,
    dimension: Option<usize>,
}

/// Thread-safe in-memory vector index. Clones share the same entries.
#[derive(Debug, Clone, Default)]
pub struct VectorIndex {
    state: Arc<RwLock<IndexState>>,
}

impl VectorIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a vector with its passage text, overwriting any entry with
    /// the same ID.
    pub fn insert(&self, id: &str, embedding: Vec<f32>, text: &str) -> Result<(), ChattyError> {
        if embedding.is_empty() {
            return Err(ChattyError::Index("Cannot index an empty vector".to_string()));
        }

        let mut state = self
            .state
            .write()
            .map_err(|e| ChattyError::Index(format!("Lock poisoned: {}", e)))?;

        match state.dimension {
            Some(dim) if dim != embedding.len() => {
                return Err(ChattyError::Index(format!(
                    "Dimension mismatch: index holds {}-d vectors, got {}",
                    dim,
                    embedding.len()
                )));
            }
            Some(_) => {}
            None => state.dimension = Some(embedding.len()),
        }

        state.entries.insert(
            id.to_string(),
            VectorEntry {
                embedding,
                text: text.to_string(),
            },
        );
        Ok(())
    }

    /// The k nearest entries by cosine similarity, sorted by descending score.
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<ScoredText>, ChattyError> {
        let state = self
            .state
            .read()
            .map_err(|e| ChattyError::Index(format!("Lock poisoned: {}", e)))?;

        if let Some(dim) = state.dimension {
            if dim != query.len() {
                return Err(ChattyError::Index(format!(
                    "Query dimension {} does not match index dimension {}",
                    query.len(),
                    dim
                )));
            }
        }

        let mut scored: Vec<ScoredText> = state
            .entries
            .iter()
            .map(|(id, entry)| ScoredText {
                id: id.clone(),
                text: entry.text.clone(),
                score: cosine_similarity(query, &entry.embedding),
            })
            .collect();

        // Ties broken by ID so equal scores come back in a stable order.
        scored.sort_by(|a, b| b.score.total_cmp(&a.score).then_with(|| a.id.cmp(&b.id)));
        scored.truncate(k);

        Ok(scored)
    }

    /// Remove the entry under `id`, if any.
    pub fn remove(&self, id: &str) -> Result<(), ChattyError> {
        let mut state = self
            .state
            .write()
            .map_err(|e| ChattyError::Index(format!("Lock poisoned: {}", e)))?;
        state.entries.remove(id);
        Ok(())
    }

    /// Drop every entry and forget the recorded dimension.
    pub fn clear(&self) -> Result<(), ChattyError> {
        let mut state = self
            .state
            .write()
            .map_err(|e| ChattyError::Index(format!("Lock poisoned: {}", e)))?;
        state.entries.clear();
        state.dimension = None;
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.state.read().map(|s| s.entries.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Dimension of the stored vectors, `None` until the first insert.
    pub fn dimension(&self) -> Option<usize> {
        self.state.read().ok().and_then(|s| s.dimension)
    }

    /// Load persisted passages embedded by `model_id` into the index.
    ///
    /// Passages from any other model are skipped. Returns the number loaded.
    pub fn hydrate(&self, repo: &PassageRepository, model_id: &str) -> Result<usize, ChattyError> {
        let passages = repo.load_all()?;
        let mut loaded = 0;
        let mut skipped = 0;

        for passage in passages {
            if passage.model_id != model_id {
                skipped += 1;
                continue;
            }
            self.insert(&passage.id, passage.embedding, &passage.text)?;
            loaded += 1;
        }

        if skipped > 0 {
            warn!(
                skipped,
                model_id, "Skipped passages embedded by a different model"
            );
        }
        info!(loaded, model_id, "Vector index hydrated from storage");
        Ok(loaded)
    }
}

#[async_trait]
impl VectorStore for VectorIndex {
    async fn upsert(&self, id: &str, vector: Vec<f32>, text: &str) -> Result<(), ChattyError> {
        self.insert(id, vector, text)
    }

    async fn query(&self, vector: &[f32], k: usize) -> Result<Vec<ScoredText>, ChattyError> {
        self.search(vector, k)
    }

    async fn remove(&self, id: &str) -> Result<(), ChattyError> {
        VectorIndex::remove(self, id)
    }

    async fn len(&self) -> Result<usize, ChattyError> {
        Ok(VectorIndex::len(self))
    }

    async fn clear(&self) -> Result<(), ChattyError> {
        VectorIndex::clear(self)
    }
}

/// Cosine similarity between two vectors; 0.0 for mismatched lengths, a
/// zero-magnitude side, or non-finite components.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    if a.len() != b.len() {
        return 0.0;
    }

    let dot: f64 = a
        .iter()
        .zip(b.iter())
        .map(|(x, y)| (*x as f64) * (*y as f64))
        .sum();

    let mag_a: f64 = a.iter().map(|x| (*x as f64).powi(2)).sum::<f64>().sqrt();
    let mag_b: f64 = b.iter().map(|x| (*x as f64).powi(2)).sum::<f64>().sqrt();

    if mag_a == 0.0 || mag_b == 0.0 {
        return 0.0;
    }

    let similarity = dot / (mag_a * mag_b);
    if similarity.is_finite() {
        similarity
    } else {
        0.0
    }
}
