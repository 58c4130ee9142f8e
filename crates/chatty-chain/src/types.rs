//! Request-level types for the conversational chain.

use std::fmt;

use serde::{Deserialize, Serialize};

use chatty_core::config::ChattyConfig;
use chatty_core::types::{ConversationId, RetrievalPolicy, RetrievedPassage};

/// Per-engine chain settings, fixed at construction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChainConfig {
    /// Passages retrieved per question.
    pub top_k: usize,
    pub retrieval_policy: RetrievalPolicy,
    /// Attach the retrieved passages to each response.
    pub return_sources: bool,
    /// Context text used when no passage was retrieved.
    pub no_context_placeholder: String,
}

impl Default for ChainConfig {
    fn default() -> Self {
        Self {
            top_k: 5,
            retrieval_policy: RetrievalPolicy::Degrade,
            return_sources: false,
            no_context_placeholder: "No additional context available.".to_string(),
        }
    }
}

impl ChainConfig {
    pub fn from_config(config: &ChattyConfig) -> Self {
        Self {
            top_k: config.retrieval.top_k,
            retrieval_policy: config.retrieval.policy,
            return_sources: config.prompt.return_sources,
            no_context_placeholder: config.retrieval.no_context_placeholder.clone(),
        }
    }
}

/// Non-fatal problem encountered while answering. The answer is valid but
/// stored state may not reflect the full exchange.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ChainWarning {
    /// The answer was generated but could not be stored.
    AssistantTurnNotPersisted { reason: String },
    /// Prior turns could not be read; the prompt used an empty history.
    HistoryUnavailable { reason: String },
}

impl fmt::Display for ChainWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChainWarning::AssistantTurnNotPersisted { reason } => {
                write!(f, "assistant turn not persisted: {}", reason)
            }
            ChainWarning::HistoryUnavailable { reason } => {
                write!(f, "history unavailable: {}", reason)
            }
        }
    }
}

/// Successful outcome of one request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChainResponse {
    pub answer: String,
    pub conversation_id: ConversationId,
    /// Passages used as context, present when sources were requested.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sources: Option<Vec<RetrievedPassage>>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<ChainWarning>,
}

impl ChainResponse {
    /// True when the exchange is fully stored, i.e. no warning was raised.
    pub fn is_consistent(&self) -> bool {
        self.warnings.is_empty()
    }
}
