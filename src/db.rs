//! Database module for storyloom
//!
//! Provides persistence for session snapshots.

mod schema;

pub use schema::*;

use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("Serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("Invalid snapshot for {session_id}: {reason}")]
    InvalidSnapshot { session_id: String, reason: String },
    #[error("Database connection lock poisoned")]
    Poisoned,
    #[error("Storage task failed: {0}")]
    Task(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Thread-safe database handle
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    /// Open or create database at the given path
    pub fn open<P: AsRef<Path>>(path: P) -> StoreResult<Self> {
        let conn = Connection::open(path)?;
        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        db.run_migrations()?;
        Ok(db)
    }

    /// Open an in-memory database (for testing)
    #[allow(dead_code)] // Used in tests
    pub fn open_in_memory() -> StoreResult<Self> {
        let conn = Connection::open_in_memory()?;
        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        db.run_migrations()?;
        Ok(db)
    }

    fn conn(&self) -> StoreResult<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| StoreError::Poisoned)
    }

    fn run_migrations(&self) -> StoreResult<()> {
        self.conn()?.execute_batch(SCHEMA)?;
        Ok(())
    }

    // ==================== Snapshot Operations ====================

    /// Insert or replace the snapshot for a session
    pub fn save_snapshot(&self, session_id: &str, snapshot: &SessionSnapshot) -> StoreResult<()> {
        snapshot.ensure_owned_by(session_id)?;
        let json = serde_json::to_string(snapshot)?;
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO session_snapshots (session_id, schema_version, snapshot, saved_at)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(session_id) DO UPDATE SET
                schema_version = excluded.schema_version,
                snapshot = excluded.snapshot,
                saved_at = excluded.saved_at",
            params![
                session_id,
                snapshot.schema_version,
                json,
                Utc::now().to_rfc3339()
            ],
        )?;
        Ok(())
    }

    /// Load the latest snapshot for a session, if any
    pub fn load_snapshot(&self, session_id: &str) -> StoreResult<Option<SessionSnapshot>> {
        let json: Option<String> = self
            .conn()?
            .query_row(
                "SELECT snapshot FROM session_snapshots WHERE session_id = ?1",
                params![session_id],
                |row| row.get(0),
            )
            .optional()?;

        json.map(|json| SessionSnapshot::from_stored(session_id, &json))
            .transpose()
    }

    /// Ids of every session with a stored snapshot, most recent first
    #[allow(dead_code)] // Used in tests
    pub fn list_snapshots(&self) -> StoreResult<Vec<String>> {
        let conn = self.conn()?;
        let mut stmt =
            conn.prepare("SELECT session_id FROM session_snapshots ORDER BY saved_at DESC")?;
        let ids = stmt
            .query_map([], |row| row.get(0))?
            .collect::<Result<Vec<String>, _>>()?;
        Ok(ids)
    }

    /// Store raw snapshot text without validation
    #[cfg(test)]
    pub fn save_raw(&self, session_id: &str, schema_version: u32, json: &str) -> StoreResult<()> {
        self.conn()?.execute(
            "INSERT OR REPLACE INTO session_snapshots (session_id, schema_version, snapshot, saved_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![session_id, schema_version, json, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }
}
