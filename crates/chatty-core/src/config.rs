use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{ChattyError, Result};
use crate::types::RetrievalPolicy;

/// Top-level configuration for the Chatty engine.
///
/// Loaded from `~/.chatty/config.toml` by default. Every section falls back
/// to its defaults when omitted.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChattyConfig {
    #[serde(default)]
    pub general: GeneralConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub generation: GenerationConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub prompt: PromptConfig,
}

impl ChattyConfig {
    /// Read and validate a TOML config file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: ChattyConfig = toml::from_str(&content)?;
        config.validate()?;
        info!(path = %path.display(), "Configuration loaded");
        Ok(config)
    }

    /// Like [`load`](Self::load), but any failure yields the defaults.
    pub fn load_or_default(path: &Path) -> Self {
        match Self::load(path) {
            Ok(config) => config,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Config unusable, falling back to defaults");
                Self::default()
            }
        }
    }

    /// Write the configuration as pretty TOML, creating parent directories.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        info!(path = %path.display(), "Configuration saved");
        Ok(())
    }

    /// Reject values the engine cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.retrieval.top_k == 0 {
            return Err(ChattyError::Config(
                "retrieval.top_k must be at least 1".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.retrieval.dedup_threshold) {
            return Err(ChattyError::Config(format!(
                "retrieval.dedup_threshold must be within 0.0..=1.0, got {}",
                self.retrieval.dedup_threshold
            )));
        }
        if !(0.0..=2.0).contains(&self.generation.temperature) {
            return Err(ChattyError::Config(format!(
                "generation.temperature must be within 0.0..=2.0, got {}",
                self.generation.temperature
            )));
        }
        if self.generation.max_tokens == 0 {
            return Err(ChattyError::Config(
                "generation.max_tokens must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Absolute path of the SQLite database file (`~` expanded).
    pub fn database_path(&self) -> PathBuf {
        expand_home(&self.general.data_dir).join(&self.storage.database_file)
    }
}

/// Expand a leading `~/` to the user's home directory.
pub fn expand_home(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/").or_else(|| path.strip_prefix("~\\")) {
        #[cfg(target_os = "windows")]
        let home = std::env::var("USERPROFILE").unwrap_or_else(|_| ".".to_string());
        #[cfg(not(target_os = "windows"))]
        let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
        PathBuf::from(home).join(rest)
    } else {
        PathBuf::from(path)
    }
}

/// Where Chatty keeps its data and how loudly it logs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Data directory for the SQLite database.
    pub data_dir: String,
    /// Fallback `EnvFilter` directive when `RUST_LOG` is unset.
    pub log_level: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            data_dir: "~/.chatty/data".to_string(),
            log_level: "info".to_string(),
        }
    }
}

/// Retrieval and embedding configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalConfig {
    /// Number of passages retrieved per question.
    pub top_k: usize,
    /// Behaviour when the index is unreachable.
    pub policy: RetrievalPolicy,
    /// Embedding model name. Must match the model used to populate the index.
    pub embedding_model: String,
    /// Embedding dimension.
    pub embedding_dim: usize,
    /// Directory holding `model.onnx` and `tokenizer.json`. When unset the
    /// deterministic hash embedding is used.
    pub model_dir: Option<String>,
    /// Cosine similarity above which an indexed passage counts as a duplicate.
    pub dedup_threshold: f64,
    /// Context text used when no passage was retrieved.
    pub no_context_placeholder: String,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: 5,
            policy: RetrievalPolicy::Degrade,
            embedding_model: "all-MiniLM-L6-v2".to_string(),
            embedding_dim: 384,
            model_dir: None,
            dedup_threshold: 0.95,
            no_context_placeholder: "No additional context available.".to_string(),
        }
    }
}

/// Generative model configuration. Sampling parameters are fixed for the
/// lifetime of the engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationConfig {
    /// Base URL of an OpenAI-compatible API.
    pub base_url: String,
    /// Model identifier.
    pub model: String,
    pub temperature: f64,
    pub max_tokens: u32,
    /// Environment variable holding the API key.
    pub api_key_env: String,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.groq.com/openai/v1".to_string(),
            model: "llama-3.3-70b-versatile".to_string(),
            temperature: 0.7,
            max_tokens: 4096,
            api_key_env: "GROQ_API_KEY".to_string(),
        }
    }
}

/// Persistent storage configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Database file name inside `general.data_dir`.
    pub database_file: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database_file: "chatty.db".to_string(),
        }
    }
}

/// Prompt and response shaping.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PromptConfig {
    /// Name the assistant introduces itself with.
    pub assistant_name: String,
    /// Attach the retrieved passages to every response.
    pub return_sources: bool,
}

impl Default for PromptConfig {
    fn default() -> Self {
        Self {
            assistant_name: "Chatty".to_string(),
            return_sources: false,
        }
    }
}
