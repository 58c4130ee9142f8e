//! Repository implementations for SQLite-backed persistence.
//!
//! `ConversationRepository` owns conversations and their turns,
//! `PassageRepository` keeps indexed passages with their embeddings.

use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};
use rusqlite::OptionalExtension;
use tracing::debug;

use chatty_core::error::ChattyError;
use chatty_core::types::{ConversationRecord, Role, Turn};

use crate::db::Database;

/// Repository for conversations and their turns.
#[derive(Debug, Clone)]
pub struct ConversationRepository {
    db: Arc<Database>,
}

impl ConversationRepository {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Append one turn, creating the conversation on first write.
    ///
    /// The conversation upsert and the turn insert share one transaction,
    /// so a failed call leaves no partial state behind.
    pub fn append(
        &self,
        conversation_id: &str,
        role: Role,
        content: &str,
    ) -> Result<Turn, ChattyError> {
        let millis = Utc::now().timestamp_millis();

        self.db.with_conn(|conn| {
            let tx = conn
                .unchecked_transaction()
                .map_err(|e| ChattyError::Storage(format!("Failed to begin transaction: {}", e)))?;

            tx.execute(
                "INSERT INTO conversations (id, created_at, updated_at)
                 VALUES (?1, ?2, ?2)
                 ON CONFLICT(id) DO UPDATE SET updated_at = excluded.updated_at",
                rusqlite::params![conversation_id, millis],
            )
            .map_err(|e| ChattyError::Storage(format!("Failed to upsert conversation: {}", e)))?;

            tx.execute(
                "INSERT INTO turns (conversation_id, role, content, timestamp)
                 VALUES (?1, ?2, ?3, ?4)",
                rusqlite::params![conversation_id, role.as_str(), content, millis],
            )
            .map_err(|e| ChattyError::Storage(format!("Failed to insert turn: {}", e)))?;

            let seq = tx.last_insert_rowid();

            tx.commit()
                .map_err(|e| ChattyError::Storage(format!("Failed to commit turn: {}", e)))?;

            debug!(conversation_id, seq, role = %role, "Turn appended");

            Ok(Turn {
                seq,
                role,
                content: content.to_string(),
                timestamp: millis_to_datetime(millis),
            })
        })
    }

    /// All turns of a conversation in insertion order. Unknown IDs yield an
    /// empty list.
    pub fn load_turns_blocking(&self, conversation_id: &str) -> Result<Vec<Turn>, ChattyError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT seq, role, content, timestamp
                     FROM turns
                     WHERE conversation_id = ?1
                     ORDER BY seq ASC",
                )
                .map_err(|e| ChattyError::Storage(e.to_string()))?;

            let rows = stmt
                .query_map(rusqlite::params![conversation_id], |row| {
                    Ok(row_to_turn(row))
                })
                .map_err(|e| ChattyError::Storage(e.to_string()))?;

            let mut turns = Vec::new();
            for row in rows {
                let turn = row.map_err(|e| ChattyError::Storage(e.to_string()))??;
                turns.push(turn);
            }
            Ok(turns)
        })
    }

    /// Look up the conversation record, `None` if it was never written.
    pub fn find_conversation_blocking(
        &self,
        conversation_id: &str,
    ) -> Result<Option<ConversationRecord>, ChattyError> {
        self.db.with_conn(|conn| {
            let result = conn
                .query_row(
                    "SELECT c.id, c.created_at, c.updated_at,
                            (SELECT COUNT(*) FROM turns t WHERE t.conversation_id = c.id)
                     FROM conversations c
                     WHERE c.id = ?1",
                    rusqlite::params![conversation_id],
                    |row| {
                        let id: String = row.get(0)?;
                        let created_at: i64 = row.get(1)?;
                        let updated_at: i64 = row.get(2)?;
                        let turn_count: i64 = row.get(3)?;
                        Ok(ConversationRecord {
                            id,
                            created_at: millis_to_datetime(created_at),
                            updated_at: millis_to_datetime(updated_at),
                            turn_count: turn_count as u64,
                        })
                    },
                )
                .optional()
                .map_err(|e| ChattyError::Storage(e.to_string()))?;
            Ok(result)
        })
    }

    /// Number of stored conversations.
    pub fn count(&self) -> Result<u64, ChattyError> {
        self.db.with_conn(|conn| {
            let count: i64 = conn
                .query_row("SELECT COUNT(*) FROM conversations", [], |row| row.get(0))
                .map_err(|e| ChattyError::Storage(e.to_string()))?;
            Ok(count as u64)
        })
    }
}

/// A passage persisted alongside its embedding.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredPassage {
    pub id: String,
    pub text: String,
    pub embedding: Vec<f32>,
    pub model_id: String,
    pub created_at: DateTime<Utc>,
}

/// Repository for indexed passages.
#[derive(Debug, Clone)]
pub struct PassageRepository {
    db: Arc<Database>,
}

impl PassageRepository {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Insert or replace a passage.
    pub fn save(&self, passage: &StoredPassage) -> Result<(), ChattyError> {
        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT OR REPLACE INTO passages (id, text, embedding, dimensions, model_id, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                rusqlite::params![
                    passage.id,
                    passage.text,
                    encode_embedding(&passage.embedding),
                    passage.embedding.len() as i64,
                    passage.model_id,
                    passage.created_at.timestamp_millis(),
                ],
            )
            .map_err(|e| ChattyError::Storage(format!("Failed to save passage: {}", e)))?;
            Ok(())
        })
    }

    /// Every stored passage, oldest first.
    pub fn load_all(&self) -> Result<Vec<StoredPassage>, ChattyError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT id, text, embedding, dimensions, model_id, created_at
                     FROM passages
                     ORDER BY created_at ASC, id ASC",
                )
                .map_err(|e| ChattyError::Storage(e.to_string()))?;

            let rows = stmt
                .query_map([], |row| Ok(row_to_passage(row)))
                .map_err(|e| ChattyError::Storage(e.to_string()))?;

            let mut passages = Vec::new();
            for row in rows {
                let passage = row.map_err(|e| ChattyError::Storage(e.to_string()))??;
                passages.push(passage);
            }
            Ok(passages)
        })
    }

    pub fn count(&self) -> Result<u64, ChattyError> {
        self.db.with_conn(|conn| {
            let count: i64 = conn
                .query_row("SELECT COUNT(*) FROM passages", [], |row| row.get(0))
                .map_err(|e| ChattyError::Storage(e.to_string()))?;
            Ok(count as u64)
        })
    }
}

// ============================================================================
// Row conversion helpers.
// ============================================================================

fn row_to_turn(row: &rusqlite::Row<'_>) -> Result<Turn, ChattyError> {
    let seq: i64 = row
        .get(0)
        .map_err(|e| ChattyError::Storage(e.to_string()))?;
    let role_str: String = row
        .get(1)
        .map_err(|e| ChattyError::Storage(e.to_string()))?;
    let content: String = row
        .get(2)
        .map_err(|e| ChattyError::Storage(e.to_string()))?;
    let timestamp: i64 = row
        .get(3)
        .map_err(|e| ChattyError::Storage(e.to_string()))?;

    Ok(Turn {
        seq,
        role: role_str.parse::<Role>()?,
        content,
        timestamp: millis_to_datetime(timestamp),
    })
}

fn row_to_passage(row: &rusqlite::Row<'_>) -> Result<StoredPassage, ChattyError> {
    let id: String = row
        .get(0)
        .map_err(|e| ChattyError::Storage(e.to_string()))?;
    let text: String = row
        .get(1)
        .map_err(|e| ChattyError::Storage(e.to_string()))?;
    let blob: Vec<u8> = row
        .get(2)
        .map_err(|e| ChattyError::Storage(e.to_string()))?;
    let dimensions: i64 = row
        .get(3)
        .map_err(|e| ChattyError::Storage(e.to_string()))?;
    let model_id: String = row
        .get(4)
        .map_err(|e| ChattyError::Storage(e.to_string()))?;
    let created_at: i64 = row
        .get(5)
        .map_err(|e| ChattyError::Storage(e.to_string()))?;

    let embedding = decode_embedding(&blob)?;
    if embedding.len() as i64 != dimensions {
        return Err(ChattyError::Storage(format!(
            "Passage {} has {} stored dimensions but a {}-value embedding",
            id,
            dimensions,
            embedding.len()
        )));
    }

    Ok(StoredPassage {
        id,
        text,
        embedding,
        model_id,
        created_at: millis_to_datetime(created_at),
    })
}

fn millis_to_datetime(millis: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(millis).single().unwrap_or_default()
}

/// Little-endian f32 encoding used for the `embedding` BLOB column.
fn encode_embedding(embedding: &[f32]) -> Vec<u8> {
    embedding.iter().flat_map(|v| v.to_le_bytes()).collect()
}

fn decode_embedding(blob: &[u8]) -> Result<Vec<f32>, ChattyError> {
    if blob.len() % 4 != 0 {
        return Err(ChattyError::Storage(format!(
            "Embedding blob length {} is not a multiple of 4",
            blob.len()
        )));
    }
    Ok(blob
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect())
}
