//! Chatty storage crate - SQLite persistence for conversations and passages.
//!
//! Provides a WAL-mode SQLite database with migrations, repositories for
//! turns and indexed passages, and the async `TurnStore` seam used by
//! conversation memory.

pub mod db;
pub mod migrations;
pub mod repository;
pub mod store;

pub use db::Database;
pub use repository::{ConversationRepository, PassageRepository, StoredPassage};
pub use store::TurnStore;
