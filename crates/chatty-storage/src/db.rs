//! Database connection management.
//!
//! A single rusqlite Connection behind a Mutex, opened in WAL mode with
//! foreign keys enforced. Migrations run on open.

use std::path::Path;
use std::sync::Mutex;

use rusqlite::Connection;
use tracing::info;

use chatty_core::error::ChattyError;

use crate::migrations;

const FILE_PRAGMAS: &str = "PRAGMA journal_mode = WAL;
     PRAGMA synchronous = NORMAL;
     PRAGMA foreign_keys = ON;
     PRAGMA busy_timeout = 5000;";

/// Thread-safe SQLite database wrapper.
pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    /// Open (or create) a database at the given path and apply pending
    /// migrations. The parent directory is created if missing.
    pub fn new(path: &Path) -> Result<Self, ChattyError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)
            .map_err(|e| ChattyError::Storage(format!("Failed to open database: {}", e)))?;

        conn.execute_batch(FILE_PRAGMAS)
            .map_err(|e| ChattyError::Storage(format!("Failed to set pragmas: {}", e)))?;

        info!(path = %path.display(), "Database opened");

        Self::from_connection(conn)
    }

    /// Open an in-memory database (for testing).
    pub fn in_memory() -> Result<Self, ChattyError> {
        let conn = Connection::open_in_memory()
            .map_err(|e| ChattyError::Storage(format!("Failed to open in-memory db: {}", e)))?;

        conn.execute_batch("PRAGMA foreign_keys = ON;")
            .map_err(|e| ChattyError::Storage(format!("Failed to set pragmas: {}", e)))?;

        Self::from_connection(conn)
    }

    fn from_connection(conn: Connection) -> Result<Self, ChattyError> {
        let db = Self {
            conn: Mutex::new(conn),
        };
        db.with_conn(migrations::run_migrations)?;
        Ok(db)
    }

    /// Run a closure against the underlying connection. The mutex is held
    /// for the duration of the closure.
    pub fn with_conn<F, T>(&self, f: F) -> Result<T, ChattyError>
    where
        F: FnOnce(&Connection) -> Result<T, ChattyError>,
    {
        let conn = self
            .conn
            .lock()
            .map_err(|e| ChattyError::Storage(format!("Database lock poisoned: {}", e)))?;
        f(&conn)
    }
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database").finish()
    }
}
