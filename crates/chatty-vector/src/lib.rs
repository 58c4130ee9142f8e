//! Chatty vector crate - embeddings, the in-memory similarity index,
//! top-K retrieval, and passage indexing.
//!
//! Retrieval and indexing share one embedding service so that queries and
//! stored passages live in the same vector space.

pub mod embedding;
pub mod index;
pub mod indexer;
pub mod retriever;
pub mod store;

pub use embedding::{DynEmbeddingService, EmbeddingService, HashEmbedding, OnnxEmbeddingService};
pub use index::VectorIndex;
pub use indexer::{DocumentIndexer, IndexOutcome, DEFAULT_DEDUP_THRESHOLD};
pub use retriever::Retriever;
pub use store::{ScoredText, VectorStore};
