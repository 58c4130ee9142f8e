//! Conversation memory: durable turn storage plus history formatting.

use std::sync::Arc;

use tracing::debug;

use chatty_core::error::ChattyError;
use chatty_core::types::{ConversationRecord, Role, Turn};
use chatty_storage::TurnStore;

/// Renders turns as the plain-text history block of a prompt.
#[derive(Debug, Clone, Copy, Default)]
pub struct HistoryFormatter;

impl HistoryFormatter {
    /// One `"<role>: <content>"` line per turn, oldest first, joined with
    /// newlines. Empty input gives an empty string.
    pub fn format(&self, turns: &[Turn]) -> String {
        turns
            .iter()
            .map(Turn::render)
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Reads and appends the turns of a conversation.
///
/// History is never truncated; long conversations produce long prompts.
#[derive(Clone)]
pub struct ConversationMemory {
    store: Arc<dyn TurnStore>,
    formatter: HistoryFormatter,
}

impl ConversationMemory {
    pub fn new(store: Arc<dyn TurnStore>) -> Self {
        Self {
            store,
            formatter: HistoryFormatter,
        }
    }

    /// Formatted history of every turn. Unknown conversations give "".
    pub async fn load(&self, conversation_id: &str) -> Result<String, ChattyError> {
        let turns = self.store.load_turns(conversation_id).await?;
        Ok(self.formatter.format(&turns))
    }

    /// Formatted history of the turns stored before `seq`.
    pub async fn history_before(
        &self,
        conversation_id: &str,
        seq: i64,
    ) -> Result<String, ChattyError> {
        let turns = self.store.load_turns(conversation_id).await?;
        let earlier: Vec<Turn> = turns.into_iter().filter(|t| t.seq < seq).collect();
        debug!(conversation_id, seq, turns = earlier.len(), "History loaded");
        Ok(self.formatter.format(&earlier))
    }

    /// Append one turn, creating the conversation on first write.
    pub async fn append(
        &self,
        conversation_id: &str,
        role: Role,
        content: &str,
    ) -> Result<Turn, ChattyError> {
        self.store.append_turn(conversation_id, role, content).await
    }

    pub async fn turns(&self, conversation_id: &str) -> Result<Vec<Turn>, ChattyError> {
        self.store.load_turns(conversation_id).await
    }

    pub async fn conversation(
        &self,
        conversation_id: &str,
    ) -> Result<Option<ConversationRecord>, ChattyError> {
        self.store.find_conversation(conversation_id).await
    }
}

impl std::fmt::Debug for ConversationMemory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConversationMemory").finish()
    }
}
