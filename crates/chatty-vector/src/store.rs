//! Async seam over the vector similarity index.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use chatty_core::error::ChattyError;

/// A stored passage matched by a similarity query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredText {
    pub id: String,
    pub text: String,
    /// Cosine similarity to the query vector.
    pub score: f64,
}

/// Vector index holding passage text next to each vector.
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Insert or overwrite the entry under `id`.
    async fn upsert(&self, id: &str, vector: Vec<f32>, text: &str) -> Result<(), ChattyError>;

    /// The `k` nearest entries by cosine similarity, best first.
    async fn query(&self, vector: &[f32], k: usize) -> Result<Vec<ScoredText>, ChattyError>;

    /// Drop the entry under `id`. Unknown IDs are not an error.
    async fn remove(&self, id: &str) -> Result<(), ChattyError>;

    async fn len(&self) -> Result<usize, ChattyError>;

    async fn is_empty(&self) -> Result<bool, ChattyError> {
        Ok(self.len().await? == 0)
    }

    /// Drop every entry.
    async fn clear(&self) -> Result<(), ChattyError>;
}
