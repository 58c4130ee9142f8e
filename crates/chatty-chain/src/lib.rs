//! Conversational retrieval-augmented chain for Chatty.
//!
//! Combines conversation memory, passage retrieval, prompt assembly and a
//! generative model into one question-answering call per request.

pub mod error;
pub mod generation;
pub mod memory;
pub mod orchestrator;
pub mod prompt;
pub mod types;

pub use error::{ChainError, GenerationError};
pub use generation::{GenerationClient, OpenAiCompatibleClient, ScriptedGeneration};
pub use memory::{ConversationMemory, HistoryFormatter};
pub use orchestrator::ChainOrchestrator;
pub use prompt::{join_passages, PromptAssembler, DEFAULT_ASSISTANT_NAME};
pub use types::{ChainConfig, ChainResponse, ChainWarning};
