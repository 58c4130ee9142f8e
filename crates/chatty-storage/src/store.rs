//! Async seam over durable turn storage.
//!
//! Callers on the request path hold an `Arc<dyn TurnStore>`. The SQLite
//! implementation runs its blocking rusqlite work on the blocking pool.

use async_trait::async_trait;

use chatty_core::error::ChattyError;
use chatty_core::types::{ConversationRecord, Role, Turn};

use crate::repository::ConversationRepository;

/// Durable, per-conversation turn storage.
#[async_trait]
pub trait TurnStore: Send + Sync {
    /// Append one turn, creating the conversation on first write. Atomic per call.
    async fn append_turn(
        &self,
        conversation_id: &str,
        role: Role,
        content: &str,
    ) -> Result<Turn, ChattyError>;

    /// All turns in insertion order; empty for an unknown conversation.
    async fn load_turns(&self, conversation_id: &str) -> Result<Vec<Turn>, ChattyError>;

    async fn find_conversation(
        &self,
        conversation_id: &str,
    ) -> Result<Option<ConversationRecord>, ChattyError>;
}

#[async_trait]
impl TurnStore for ConversationRepository {
    async fn append_turn(
        &self,
        conversation_id: &str,
        role: Role,
        content: &str,
    ) -> Result<Turn, ChattyError> {
        let repo = self.clone();
        let conversation_id = conversation_id.to_string();
        let content = content.to_string();
        run_blocking(move || repo.append(&conversation_id, role, &content)).await
    }

    async fn load_turns(&self, conversation_id: &str) -> Result<Vec<Turn>, ChattyError> {
        let repo = self.clone();
        let conversation_id = conversation_id.to_string();
        run_blocking(move || repo.load_turns_blocking(&conversation_id)).await
    }

    async fn find_conversation(
        &self,
        conversation_id: &str,
    ) -> Result<Option<ConversationRecord>, ChattyError> {
        let repo = self.clone();
        let conversation_id = conversation_id.to_string();
        run_blocking(move || repo.find_conversation_blocking(&conversation_id)).await
    }
}

async fn run_blocking<F, T>(f: F) -> Result<T, ChattyError>
where
    F: FnOnce() -> Result<T, ChattyError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| ChattyError::Storage(format!("Storage task panicked: {}", e)))?
}
