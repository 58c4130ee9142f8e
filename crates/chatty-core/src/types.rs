//! Domain types shared across the Chatty crates.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ChattyError;

/// Opaque conversation identifier, generated by the caller.
pub type ConversationId = String;

/// Generate a fresh conversation identifier (UUID v4).
pub fn new_conversation_id() -> ConversationId {
    Uuid::new_v4().to_string()
}

/// Author of a turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = ChattyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(Role::User),
            "assistant" => Ok(Role::Assistant),
            other => Err(ChattyError::Serialization(format!("unknown role: {}", other))),
        }
    }
}

/// One persisted message of a conversation.
///
/// `seq` is assigned by the store on insert and is the insertion-order key:
/// turns of one conversation always read back sorted by `seq`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Turn {
    pub seq: i64,
    pub role: Role,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

impl Turn {
    /// Render as `"<role>: <content>"`.
    pub fn render(&self) -> String {
        format!("{}: {}", self.role, self.content)
    }
}

/// Durable conversation record (without its turns).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationRecord {
    pub id: ConversationId,
    pub created_at: DateTime<Utc>,
    /// Last-modified marker, bumped on every appended turn.
    pub updated_at: DateTime<Utc>,
    pub turn_count: u64,
}

/// A passage returned by retrieval for a single request. Never persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievedPassage {
    pub text: String,
    /// 1-based relevance rank, best match first.
    pub rank: usize,
    /// Cosine similarity reported by the index.
    pub score: f64,
}

/// What the orchestrator does when retrieval fails.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RetrievalPolicy {
    /// Continue with an empty context block.
    #[default]
    Degrade,
    /// Fail the request.
    Strict,
}

impl fmt::Display for RetrievalPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RetrievalPolicy::Degrade => f.write_str("degrade"),
            RetrievalPolicy::Strict => f.write_str("strict"),
        }
    }
}
