//! Error types for the conversational chain.

use std::time::Duration;

use chatty_core::error::ChattyError;

/// Failure of a single call to the generative model. Never retried.
#[derive(Debug, thiserror::Error)]
pub enum GenerationError {
    #[error("transport error: {0}")]
    Transport(#[source] reqwest::Error),
    #[error("model endpoint returned status {status}: {body}")]
    Status { status: u16, body: String },
    #[error("invalid model response: {0}")]
    InvalidResponse(String),
    #[error("API key missing: environment variable {0} is not set")]
    MissingApiKey(String),
    #[error("generation did not finish within {0:?}")]
    DeadlineExceeded(Duration),
}

impl From<reqwest::Error> for GenerationError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            GenerationError::InvalidResponse(err.to_string())
        } else {
            GenerationError::Transport(err)
        }
    }
}

/// Terminal failure of one request. No answer is produced.
#[derive(Debug, thiserror::Error)]
pub enum ChainError {
    #[error("question cannot be empty")]
    EmptyQuestion,
    #[error("conversation id cannot be empty")]
    InvalidConversationId,
    /// The user turn could not be stored; nothing else ran.
    #[error("failed to persist user turn: {0}")]
    Persistence(#[source] ChattyError),
    /// Retrieval failed under the strict policy. The user turn is stored.
    #[error("retrieval failed: {0}")]
    Retrieval(#[source] ChattyError),
    /// The model call failed. The user turn is stored, no assistant turn is.
    #[error("generation failed: {0}")]
    Generation(#[from] GenerationError),
}

impl ChainError {
    /// Whether the caller is left without an answer.
    pub fn is_answerless(&self) -> bool {
        match self {
            ChainError::EmptyQuestion
            | ChainError::InvalidConversationId
            | ChainError::Persistence(_)
            | ChainError::Retrieval(_)
            | ChainError::Generation(_) => true,
        }
    }

    /// Whether the user turn of this request was stored before failing.
    pub fn user_turn_persisted(&self) -> bool {
        matches!(self, ChainError::Retrieval(_) | ChainError::Generation(_))
    }
}
