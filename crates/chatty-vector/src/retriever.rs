//! Query-side retrieval: embed the question, ask the vector store for the
//! nearest passages, and rank them.

use std::sync::Arc;

use tracing::{debug, warn};

use chatty_core::error::ChattyError;
use chatty_core::types::RetrievedPassage;

use crate::embedding::DynEmbeddingService;
use crate::store::VectorStore;

/// Top-K passage retrieval over a [`VectorStore`].
#[derive(Clone)]
pub struct Retriever {
    store: Arc<dyn VectorStore>,
    embedder: Arc<dyn DynEmbeddingService>,
}

impl Retriever {
    pub fn new(store: Arc<dyn VectorStore>, embedder: Arc<dyn DynEmbeddingService>) -> Self {
        Self { store, embedder }
    }

    /// Retrieve up to `k` passages, best first. Never fails: any error is
    /// logged and produces an empty result.
    pub async fn retrieve(&self, query: &str, k: usize) -> Vec<RetrievedPassage> {
        match self.try_retrieve(query, k).await {
            Ok(passages) => passages,
            Err(e) => {
                warn!(error = %e, "Retrieval failed, continuing without context");
                Vec::new()
            }
        }
    }

    /// Retrieve up to `k` passages, surfacing embedding and store errors.
    ///
    /// A `k` of zero is treated as one. A blank query yields no passages.
    pub async fn try_retrieve(
        &self,
        query: &str,
        k: usize,
    ) -> Result<Vec<RetrievedPassage>, ChattyError> {
        if query.trim().is_empty() {
            debug!("Blank retrieval query");
            return Ok(Vec::new());
        }
        let k = k.max(1);

        let vector = self.embedder.embed_boxed(query).await?;
        let hits = self.store.query(&vector, k).await?;

        let passages: Vec<RetrievedPassage> = hits
            .into_iter()
            .take(k)
            .enumerate()
            .map(|(i, hit)| RetrievedPassage {
                text: hit.text,
                rank: i + 1,
                score: hit.score,
            })
            .collect();

        debug!(k, passages = passages.len(), "Retrieved passages");
        Ok(passages)
    }
}

impl std::fmt::Debug for Retriever {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Retriever")
            .field("model_id", &self.embedder.model_id())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::{EmbeddingService, HashEmbedding};
    use crate::index::VectorIndex;
    use crate::store::ScoredText;
    use async_trait::async_trait;

    struct UnreachableStore;

    #[async_trait]
    impl VectorStore for UnreachableStore {
        async fn upsert(&self, _: &str, _: Vec<f32>, _: &str) -> Result<(), ChattyError> {
            Err(ChattyError::Index("connection refused".to_string()))
        }

        async fn query(&self, _: &[f32], _: usize) -> Result<Vec<ScoredText>, ChattyError> {
            Err(ChattyError::Index("connection refused".to_string()))
        }

        async fn remove(&self, _: &str) -> Result<(), ChattyError> {
            Err(ChattyError::Index("connection refused".to_string()))
        }

        async fn len(&self) -> Result<usize, ChattyError> {
            Err(ChattyError::Index("connection refused".to_string()))
        }

        async fn clear(&self) -> Result<(), ChattyError> {
            Err(ChattyError::Index("connection refused".to_string()))
        }
    }

    async fn populated(texts: &[&str]) -> Retriever {
        let embedder = HashEmbedding::default();
        let index = VectorIndex::new();
        for (i, text) in texts.iter().enumerate() {
            let v = embedder.embed(text).await.unwrap();
            index.insert(&format!("p{}", i), v, text).unwrap();
        }
        Retriever::new(Arc::new(index), Arc::new(embedder))
    }

    #[tokio::test]
    async fn test_retrieve_exact_match_ranked_first() {
        let retriever = populated(&["Paris is in France", "Rust has ownership", "Tea is hot"]).await;
        let passages = retriever.retrieve("Rust has ownership", 3).await;

        assert_eq!(passages.len(), 3);
        assert_eq!(passages[0].text, "Rust has ownership");
        assert!((passages[0].score - 1.0).abs() < 1e-6);
        let ranks: Vec<usize> = passages.iter().map(|p| p.rank).collect();
        assert_eq!(ranks, vec![1, 2, 3]);
        assert!(passages.windows(2).all(|w| w[0].score >= w[1].score));
    }

    #[tokio::test]
    async fn test_retrieve_limits_to_k() {
        let retriever = populated(&["a", "b", "c", "d"]).await;
        assert_eq!(retriever.retrieve("a", 2).await.len(), 2);
    }

    #[tokio::test]
    async fn test_retrieve_k_zero_clamped_to_one() {
        let retriever = populated(&["a", "b"]).await;
        assert_eq!(retriever.retrieve("a", 0).await.len(), 1);
    }

    #[tokio::test]
    async fn test_retrieve_empty_index() {
        let retriever = populated(&[]).await;
        assert!(retriever.retrieve("anything", 5).await.is_empty());
    }

    #[tokio::test]
    async fn test_retrieve_blank_query() {
        let retriever = populated(&["a"]).await;
        assert!(retriever.retrieve("   ", 5).await.is_empty());
        assert!(retriever.try_retrieve("", 5).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unreachable_store_degrades_to_empty() {
        let retriever = Retriever::new(Arc::new(UnreachableStore), Arc::new(HashEmbedding::default()));
        assert!(retriever.retrieve("question", 5).await.is_empty());
    }

    #[tokio::test]
    async fn test_try_retrieve_surfaces_store_error() {
        let retriever = Retriever::new(Arc::new(UnreachableStore), Arc::new(HashEmbedding::default()));
        let err = retriever.try_retrieve("question", 5).await.unwrap_err();
        assert!(matches!(err, ChattyError::Index(_)));
    }

    #[tokio::test]
    async fn test_dimension_mismatch_degrades() {
        let index = VectorIndex::new();
        index.insert("p", vec![1.0; 4], "four dims").unwrap();
        let retriever = Retriever::new(Arc::new(index), Arc::new(HashEmbedding::new(8)));
        assert!(retriever.retrieve("query", 3).await.is_empty());
        assert!(retriever.try_retrieve("query", 3).await.is_err());
    }
}
