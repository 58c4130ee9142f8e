use thiserror::Error;

/// Top-level error type shared by the Chatty crates.
///
/// Subsystem crates either return this directly or define their own error
/// enum that wraps it, so the `?` operator works across crate boundaries.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ChattyError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Embedding error: {0}")]
    Embedding(String),

    #[error("Index error: {0}")]
    Index(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<toml::de::Error> for ChattyError {
    fn from(err: toml::de::Error) -> Self {
        ChattyError::Config(err.to_string())
    }
}

impl From<toml::ser::Error> for ChattyError {
    fn from(err: toml::ser::Error) -> Self {
        ChattyError::Config(err.to_string())
    }
}

impl From<serde_json::Error> for ChattyError {
    fn from(err: serde_json::Error) -> Self {
        ChattyError::Serialization(err.to_string())
    }
}

/// A specialized `Result` type for Chatty operations.
pub type Result<T> = std::result::Result<T, ChattyError>;
