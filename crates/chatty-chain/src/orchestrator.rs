//! Chain orchestrator: the per-request sequence of persist, gather context,
//! prompt, generate and persist again.
//!
//! Failure policy:
//! - Validation and user-turn persistence failures end the request before
//!   anything else runs.
//! - Context gathering degrades. Retrieval failure gives an empty context
//!   (unless the strict policy is set), history failure gives an empty
//!   history plus a warning.
//! - Generation failure is terminal and leaves the user turn without an
//!   assistant reply.
//! - Failing to store the assistant turn still returns the answer, with a
//!   warning.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use chatty_core::types::{new_conversation_id, ConversationId, RetrievalPolicy, RetrievedPassage, Role};
use chatty_vector::Retriever;

use crate::error::{ChainError, GenerationError};
use crate::generation::GenerationClient;
use crate::memory::ConversationMemory;
use crate::prompt::{join_passages, PromptAssembler};
use crate::types::{ChainConfig, ChainResponse, ChainWarning};

/// Answers questions within a conversation using retrieved context.
pub struct ChainOrchestrator {
    memory: ConversationMemory,
    retriever: Retriever,
    assembler: PromptAssembler,
    generator: Arc<dyn GenerationClient>,
    config: ChainConfig,
}

impl ChainOrchestrator {
    pub fn new(
        memory: ConversationMemory,
        retriever: Retriever,
        assembler: PromptAssembler,
        generator: Arc<dyn GenerationClient>,
        config: ChainConfig,
    ) -> Self {
        Self {
            memory,
            retriever,
            assembler,
            generator,
            config,
        }
    }

    /// Fresh conversation identifier for callers that have none.
    pub fn start_conversation(&self) -> ConversationId {
        new_conversation_id()
    }

    pub fn memory(&self) -> &ConversationMemory {
        &self.memory
    }

    pub fn config(&self) -> &ChainConfig {
        &self.config
    }

    /// Answer `question` in `conversation_id`.
    pub async fn handle(
        &self,
        conversation_id: &str,
        question: &str,
    ) -> Result<ChainResponse, ChainError> {
        self.run(conversation_id, question, None).await
    }

    /// Like [`handle`](Self::handle), but the generation step must finish
    /// within `deadline`. Expiry counts as a generation failure.
    pub async fn handle_within(
        &self,
        conversation_id: &str,
        question: &str,
        deadline: Duration,
    ) -> Result<ChainResponse, ChainError> {
        self.run(conversation_id, question, Some(deadline)).await
    }

    async fn run(
        &self,
        conversation_id: &str,
        question: &str,
        deadline: Option<Duration>,
    ) -> Result<ChainResponse, ChainError> {
        if conversation_id.trim().is_empty() {
            return Err(ChainError::InvalidConversationId);
        }
        if question.trim().is_empty() {
            return Err(ChainError::EmptyQuestion);
        }

        let user_turn = self
            .memory
            .append(conversation_id, Role::User, question)
            .await
            .map_err(|e| {
                warn!(conversation_id, error = %e, "Failed to persist user turn");
                ChainError::Persistence(e)
            })?;

        let mut warnings = Vec::new();

        let (passages, history) = tokio::join!(
            self.gather_passages(question),
            self.memory.history_before(conversation_id, user_turn.seq),
        );
        let passages = passages?;
        let history = match history {
            Ok(history) => history,
            Err(e) => {
                warn!(conversation_id, error = %e, "History unavailable, continuing without it");
                warnings.push(ChainWarning::HistoryUnavailable {
                    reason: e.to_string(),
                });
                String::new()
            }
        };

        let context = if passages.is_empty() {
            self.config.no_context_placeholder.clone()
        } else {
            join_passages(&passages)
        };

        let prompt = self.assembler.assemble(&context, &history, question);
        debug!(
            conversation_id,
            passages = passages.len(),
            prompt_chars = prompt.len(),
            "Prompt assembled"
        );

        let answer = self.generate(&prompt, deadline).await.map_err(|e| {
            warn!(conversation_id, model = self.generator.model(), error = %e, "Generation failed");
            ChainError::Generation(e)
        })?;

        if let Err(e) = self
            .memory
            .append(conversation_id, Role::Assistant, &answer)
            .await
        {
            warn!(conversation_id, error = %e, "Answer generated but assistant turn not persisted");
            warnings.push(ChainWarning::AssistantTurnNotPersisted {
                reason: e.to_string(),
            });
        }

        info!(
            conversation_id,
            passages = passages.len(),
            warnings = warnings.len(),
            "Exchange completed"
        );

        Ok(ChainResponse {
            answer,
            conversation_id: conversation_id.to_string(),
            sources: self.config.return_sources.then_some(passages),
            warnings,
        })
    }

    async fn gather_passages(&self, question: &str) -> Result<Vec<RetrievedPassage>, ChainError> {
        match self.config.retrieval_policy {
            RetrievalPolicy::Degrade => Ok(self.retriever.retrieve(question, self.config.top_k).await),
            RetrievalPolicy::Strict => self
                .retriever
                .try_retrieve(question, self.config.top_k)
                .await
                .map_err(ChainError::Retrieval),
        }
    }

    async fn generate(
        &self,
        prompt: &str,
        deadline: Option<Duration>,
    ) -> Result<String, GenerationError> {
        match deadline {
            None => self.generator.generate(prompt).await,
            Some(limit) => tokio::time::timeout(limit, self.generator.generate(prompt))
                .await
                .map_err(|_| GenerationError::DeadlineExceeded(limit))?,
        }
    }
}

impl std::fmt::Debug for ChainOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChainOrchestrator")
            .field("retriever", &self.retriever)
            .field("assembler", &self.assembler)
            .field("model", &self.generator.model())
            .field("config", &self.config)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generation::ScriptedGeneration;
    use chatty_storage::{ConversationRepository, Database};
    use chatty_vector::{HashEmbedding, VectorIndex};

    fn make_orchestrator(script: Arc<ScriptedGeneration>) -> ChainOrchestrator {
        let db = Arc::new(Database::in_memory().unwrap());
        let memory = ConversationMemory::new(Arc::new(ConversationRepository::new(db)));
        let retriever = Retriever::new(Arc::new(VectorIndex::new()), Arc::new(HashEmbedding::default()));
        ChainOrchestrator::new(
            memory,
            retriever,
            PromptAssembler::default(),
            script,
            ChainConfig::default(),
        )
    }

    #[tokio::test]
    async fn test_blank_question_rejected_before_persisting() {
        let script = Arc::new(ScriptedGeneration::with_replies(["unused"]));
        let chain = make_orchestrator(Arc::clone(&script));

        let err = chain.handle("c1", "   ").await.unwrap_err();
        assert!(matches!(err, ChainError::EmptyQuestion));
        assert!(chain.memory().conversation("c1").await.unwrap().is_none());
        assert_eq!(script.call_count(), 0);
    }

    #[tokio::test]
    async fn test_blank_conversation_id_rejected() {
        let script = Arc::new(ScriptedGeneration::with_replies(["unused"]));
        let chain = make_orchestrator(Arc::clone(&script));

        let err = chain.handle("", "What is 2+2?").await.unwrap_err();
        assert!(matches!(err, ChainError::InvalidConversationId));
        assert_eq!(script.call_count(), 0);
    }

    #[tokio::test]
    async fn test_empty_index_uses_placeholder_context() {
        let script = Arc::new(ScriptedGeneration::with_replies(["4"]));
        let chain = make_orchestrator(Arc::clone(&script));

        let response = chain.handle("c1", "What is 2+2?").await.unwrap();
        assert_eq!(response.answer, "4");
        assert_eq!(response.conversation_id, "c1");
        assert!(response.sources.is_none());
        assert!(response.is_consistent());

        let expected = PromptAssembler::default().assemble(
            "No additional context available.",
            "",
            "What is 2+2?",
        );
        assert_eq!(script.prompts(), vec![expected]);
    }

    #[tokio::test]
    async fn test_deadline_expiry_is_generation_failure() {
        let script = Arc::new(
            ScriptedGeneration::with_replies(["too late"]).with_delay(Duration::from_secs(60)),
        );
        let chain = make_orchestrator(Arc::clone(&script));

        tokio::time::pause();
        let err = chain
            .handle_within("c1", "slow question", Duration::from_millis(50))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ChainError::Generation(GenerationError::DeadlineExceeded(_))
        ));
        let turns = chain.memory().turns("c1").await.unwrap();
        assert_eq!(turns.len(), 1);
        assert_eq!(turns[0].role, Role::User);
    }

    #[test]
    fn test_start_conversation_unique() {
        let chain = make_orchestrator(Arc::new(ScriptedGeneration::new()));
        assert_ne!(chain.start_conversation(), chain.start_conversation());
    }
}
