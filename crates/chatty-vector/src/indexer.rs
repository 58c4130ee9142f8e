//! Passage indexing: embed, deduplicate, and store passages so that the
//! retriever can find them later.

use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use chatty_core::error::ChattyError;
use chatty_storage::{PassageRepository, StoredPassage};

use crate::embedding::DynEmbeddingService;
use crate::store::VectorStore;

/// Default cosine similarity above which a passage counts as a duplicate.
pub const DEFAULT_DEDUP_THRESHOLD: f64 = 0.95;

/// Result of indexing one passage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum IndexOutcome {
    Stored { id: String },
    Skipped { reason: String },
    /// Too close to an already indexed passage.
    Deduplicated { similarity: f64 },
}

/// Writes passages into a [`VectorStore`] using the same embedding service
/// the retriever queries with.
pub struct DocumentIndexer {
    store: Arc<dyn VectorStore>,
    embedder: Arc<dyn DynEmbeddingService>,
    passages: Option<PassageRepository>,
    dedup_threshold: Option<f64>,
}

impl DocumentIndexer {
    pub fn new(store: Arc<dyn VectorStore>, embedder: Arc<dyn DynEmbeddingService>) -> Self {
        Self {
            store,
            embedder,
            passages: None,
            dedup_threshold: Some(DEFAULT_DEDUP_THRESHOLD),
        }
    }

    /// Also persist every stored passage so the index can be hydrated later.
    pub fn with_repository(mut self, passages: PassageRepository) -> Self {
        self.passages = Some(passages);
        self
    }

    /// Set the duplicate threshold; `None` disables deduplication.
    pub fn with_dedup_threshold(mut self, threshold: Option<f64>) -> Self {
        self.dedup_threshold = threshold;
        self
    }

    /// Index a single passage.
    pub async fn index_passage(&self, text: &str) -> Result<IndexOutcome, ChattyError> {
        let text = text.trim();
        if text.is_empty() {
            return Ok(IndexOutcome::Skipped {
                reason: "Empty passage".to_string(),
            });
        }

        let embedding = self.embedder.embed_boxed(text).await?;

        if let Some(threshold) = self.dedup_threshold {
            if let Some(top) = self.store.query(&embedding, 1).await?.first() {
                if top.score >= threshold {
                    debug!(
                        similarity = top.score,
                        threshold,
                        existing = %top.id,
                        "Passage deduplicated"
                    );
                    return Ok(IndexOutcome::Deduplicated {
                        similarity: top.score,
                    });
                }
            }
        }

        let id = Uuid::new_v4().to_string();

        // The index accepts first so a rejected vector never reaches SQLite.
        self.store.upsert(&id, embedding.clone(), text).await?;

        if let Some(repo) = &self.passages {
            let repo = repo.clone();
            let passage = StoredPassage {
                id: id.clone(),
                text: text.to_string(),
                embedding,
                model_id: self.embedder.model_id().to_string(),
                created_at: Utc::now(),
            };
            let saved = tokio::task::spawn_blocking(move || repo.save(&passage))
                .await
                .map_err(|e| ChattyError::Storage(format!("Passage save task panicked: {}", e)))
                .and_then(|result| result);
            if let Err(e) = saved {
                if let Err(rollback) = self.store.remove(&id).await {
                    warn!(id = %id, error = %rollback, "Failed to roll back unsaved passage");
                }
                return Err(e);
            }
        }

        debug!(id = %id, chars = text.len(), "Passage indexed");
        Ok(IndexOutcome::Stored { id })
    }

    /// Split a document into paragraphs on blank lines and index each one.
    pub async fn index_document(&self, document: &str) -> Result<Vec<IndexOutcome>, ChattyError> {
        let paragraphs = split_paragraphs(document);
        let mut outcomes = Vec::with_capacity(paragraphs.len());
        for paragraph in &paragraphs {
            outcomes.push(self.index_passage(paragraph).await?);
        }

        let stored = outcomes
            .iter()
            .filter(|o| matches!(o, IndexOutcome::Stored { .. }))
            .count();
        info!(
            paragraphs = paragraphs.len(),
            stored, "Document indexed"
        );
        Ok(outcomes)
    }
}

/// Paragraphs of `document`: runs of non-blank lines separated by one or more
/// blank lines, each joined back with `\n`.
pub fn split_paragraphs(document: &str) -> Vec<String> {
    let mut paragraphs = Vec::new();
    let mut current: Vec<&str> = Vec::new();

    for line in document.lines() {
        if line.trim().is_empty() {
            if !current.is_empty() {
                paragraphs.push(current.join("\n"));
                current.clear();
            }
        } else {
            current.push(line.trim_end());
        }
    }
    if !current.is_empty() {
        paragraphs.push(current.join("\n"));
    }
    paragraphs
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::{EmbeddingService, HashEmbedding};
    use crate::index::VectorIndex;
    use chatty_storage::Database;

    fn make_indexer() -> (DocumentIndexer, VectorIndex) {
        let index = VectorIndex::new();
        let indexer = DocumentIndexer::new(Arc::new(index.clone()), Arc::new(HashEmbedding::default()));
        (indexer, index)
    }

    #[tokio::test]
    async fn test_index_passage_stores() {
        let (indexer, index) = make_indexer();
        let outcome = indexer.index_passage("Rust guarantees memory safety.").await.unwrap();
        assert!(matches!(outcome, IndexOutcome::Stored { .. }));
        assert_eq!(index.len(), 1);
    }

    #[tokio::test]
    async fn test_index_passage_skips_blank() {
        let (indexer, index) = make_indexer();
        let outcome = indexer.index_passage("  \n\t ").await.unwrap();
        assert!(matches!(outcome, IndexOutcome::Skipped { .. }));
        assert!(index.is_empty());
    }

    #[tokio::test]
    async fn test_index_passage_deduplicates() {
        let (indexer, index) = make_indexer();
        indexer.index_passage("Same passage").await.unwrap();
        let second = indexer.index_passage("Same passage").await.unwrap();
        match second {
            IndexOutcome::Deduplicated { similarity } => assert!(similarity > 0.99),
            other => panic!("expected dedup, got {:?}", other),
        }
        assert_eq!(index.len(), 1);
    }

    #[tokio::test]
    async fn test_dedup_disabled_keeps_duplicates() {
        let (indexer, index) = make_indexer();
        let indexer = indexer.with_dedup_threshold(None);
        indexer.index_passage("Same passage").await.unwrap();
        indexer.index_passage("Same passage").await.unwrap();
        assert_eq!(index.len(), 2);
    }

    #[tokio::test]
    async fn test_low_threshold_dedups_everything() {
        let (indexer, _index) = make_indexer();
        let indexer = indexer.with_dedup_threshold(Some(-1.0));
        indexer.index_passage("alpha").await.unwrap();
        let second = indexer.index_passage("beta").await.unwrap();
        assert!(matches!(second, IndexOutcome::Deduplicated { .. }));
    }

    #[tokio::test]
    async fn test_index_document_splits_paragraphs() {
        let (indexer, index) = make_indexer();
        let doc = "First paragraph\nstill first.\n\n\nSecond paragraph.\n   \nThird.";
        let outcomes = indexer.index_document(doc).await.unwrap();
        assert_eq!(outcomes.len(), 3);
        assert_eq!(index.len(), 3);

        let query = HashEmbedding::default()
            .embed("First paragraph\nstill first.")
            .await
            .unwrap();
        let hits = index.search(&query, 1).unwrap();
        assert_eq!(hits[0].text, "First paragraph\nstill first.");
    }

    #[tokio::test]
    async fn test_dual_write_to_repository() {
        let db = Arc::new(Database::in_memory().unwrap());
        let repo = PassageRepository::new(db);
        let (indexer, _index) = make_indexer();
        let indexer = indexer.with_repository(repo.clone());

        let outcome = indexer.index_passage("persist me").await.unwrap();
        let IndexOutcome::Stored { id } = outcome else {
            panic!("expected stored outcome");
        };

        let stored = repo.load_all().unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].id, id);
        assert_eq!(stored[0].model_id, "blake3-384");
        assert_eq!(stored[0].embedding.len(), 384);

        // A fresh index rebuilt from storage finds the same passage.
        let rebuilt = VectorIndex::new();
        assert_eq!(rebuilt.hydrate(&repo, "blake3-384").unwrap(), 1);
    }

    #[tokio::test]
    async fn test_rejected_vector_is_not_persisted() {
        let db = Arc::new(Database::in_memory().unwrap());
        let repo = PassageRepository::new(db);
        let index = VectorIndex::new();
        index.insert("seed", vec![1.0, 0.0, 0.0, 0.0], "seed").unwrap();

        let indexer = DocumentIndexer::new(Arc::new(index.clone()), Arc::new(HashEmbedding::default()))
            .with_repository(repo.clone())
            .with_dedup_threshold(None);

        assert!(indexer.index_passage("384 dimensions").await.is_err());
        assert_eq!(repo.count().unwrap(), 0);
        assert_eq!(index.len(), 1);
    }

    #[tokio::test]
    async fn test_failed_save_rolls_back_index_entry() {
        let db = Arc::new(Database::in_memory().unwrap());
        db.with_conn(|conn| {
            conn.execute_batch("DROP TABLE passages")
                .map_err(|e| ChattyError::Storage(e.to_string()))
        })
        .unwrap();

        let (indexer, index) = make_indexer();
        let indexer = indexer.with_repository(PassageRepository::new(db));

        let err = indexer.index_passage("never saved").await.unwrap_err();
        assert!(matches!(err, ChattyError::Storage(_)));
        assert!(index.is_empty());
    }

    #[test]
    fn test_split_paragraphs() {
        assert_eq!(split_paragraphs("a\nb\n\nc"), vec!["a\nb", "c"]);
        assert_eq!(split_paragraphs("\n\n  \n"), Vec::<String>::new());
        assert_eq!(split_paragraphs("single"), vec!["single"]);
    }
}
