//! Database schema migrations.
//!
//! v1 creates conversations and turns, v2 adds the passages table used to
//! re-hydrate the in-memory vector index.

use rusqlite::Connection;
use tracing::info;

use chatty_core::error::ChattyError;

/// Run all pending database migrations.
pub fn run_migrations(conn: &Connection) -> Result<(), ChattyError> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            version     INTEGER PRIMARY KEY NOT NULL,
            name        TEXT NOT NULL,
            applied_at  INTEGER NOT NULL DEFAULT (strftime('%s', 'now'))
        );",
    )
    .map_err(|e| ChattyError::Storage(format!("Failed to create migrations table: {}", e)))?;

    let current_version = current_version(conn)?;

    if current_version < 1 {
        apply_v1(conn)?;
        info!("Applied migration v1: conversations");
    }
    if current_version < 2 {
        apply_v2(conn)?;
        info!("Applied migration v2: passages");
    }

    Ok(())
}

/// Highest applied schema version, 0 for a fresh database.
pub fn current_version(conn: &Connection) -> Result<i64, ChattyError> {
    conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_migrations",
        [],
        |row| row.get(0),
    )
    .map_err(|e| ChattyError::Storage(format!("Failed to query migration version: {}", e)))
}

fn apply_v1(conn: &Connection) -> Result<(), ChattyError> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS conversations (
            id          TEXT PRIMARY KEY NOT NULL,
            created_at  INTEGER NOT NULL,
            updated_at  INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS turns (
            seq             INTEGER PRIMARY KEY AUTOINCREMENT,
            conversation_id TEXT NOT NULL REFERENCES conversations(id),
            role            TEXT NOT NULL CHECK (role IN ('user', 'assistant')),
            content         TEXT NOT NULL,
            timestamp       INTEGER NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_turns_conversation
            ON turns (conversation_id, seq);

        INSERT OR IGNORE INTO schema_migrations (version, name)
            VALUES (1, 'conversations');
        ",
    )
    .map_err(|e| ChattyError::Storage(format!("Migration v1 failed: {}", e)))
}

fn apply_v2(conn: &Connection) -> Result<(), ChattyError> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS passages (
            id          TEXT PRIMARY KEY NOT NULL,
            text        TEXT NOT NULL,
            embedding   BLOB NOT NULL,
            dimensions  INTEGER NOT NULL,
            model_id    TEXT NOT NULL,
            created_at  INTEGER NOT NULL
        );

        INSERT OR IGNORE INTO schema_migrations (version, name)
            VALUES (2, 'passages');
        ",
    )
    .map_err(|e| ChattyError::Storage(format!("Migration v2 failed: {}", e)))
}
