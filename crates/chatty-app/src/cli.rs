//! Command-line interface for the `chatty` binary.
//!
//! Priority resolution: CLI args > env vars > config file > defaults.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Chatty - ask questions over your indexed documents, one conversation at a time.
#[derive(Parser, Debug)]
#[command(name = "chatty", version, about)]
pub struct CliArgs {
    /// Path to the configuration file.
    #[arg(short = 'c', long = "config", global = true)]
    pub config: Option<PathBuf>,

    /// Data directory holding the SQLite database.
    #[arg(short = 'd', long = "data-dir", global = true)]
    pub data_dir: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short = 'l', long = "log-level", global = true)]
    pub log_level: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Ask a question, optionally continuing an existing conversation.
    Ask {
        /// Conversation to continue. A new one is started when omitted.
        #[arg(long = "conversation")]
        conversation: Option<String>,

        /// Give up on the model after this many seconds.
        #[arg(long = "deadline-secs")]
        deadline_secs: Option<u64>,

        /// Print the passages used as context.
        #[arg(long = "sources")]
        sources: bool,

        /// Emit the full response as JSON.
        #[arg(long = "json")]
        json: bool,

        /// The question.
        question: String,
    },

    /// Print the stored history of a conversation.
    History {
        /// Conversation ID.
        id: String,
    },

    /// Split text files into paragraphs and add them to the passage index.
    Index {
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },

    /// Print the effective configuration as TOML.
    Config,
}

impl CliArgs {
    /// Resolve the configuration file path.
    ///
    /// Priority: --config flag > CHATTY_CONFIG env var > ~/.chatty/config.toml.
    pub fn resolve_config_path(&self) -> PathBuf {
        if let Some(ref p) = self.config {
            return p.clone();
        }
        if let Ok(p) = std::env::var("CHATTY_CONFIG") {
            return PathBuf::from(p);
        }
        default_config_path()
    }

    /// Data directory override, if given on the command line.
    pub fn resolve_data_dir(&self) -> Option<String> {
        self.data_dir
            .as_ref()
            .map(|p| p.to_string_lossy().to_string())
    }

    /// Log level override, if given on the command line.
    pub fn resolve_log_level(&self) -> Option<String> {
        self.log_level.clone()
    }
}

fn default_config_path() -> PathBuf {
    #[cfg(target_os = "windows")]
    if let Ok(home) = std::env::var("USERPROFILE") {
        return PathBuf::from(home).join(".chatty").join("config.toml");
    }
    #[cfg(not(target_os = "windows"))]
    if let Ok(home) = std::env::var("HOME") {
        return PathBuf::from(home).join(".chatty").join("config.toml");
    }
    PathBuf::from("config.toml")
}
