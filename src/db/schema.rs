//! Database schema and snapshot types

use super::StoreError;
use crate::state_machine::state::{ActionRecord, Mode, Player, Session};
use crate::world::World;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// SQL schema for initialization
pub const SCHEMA: &str = r"
CREATE TABLE IF NOT EXISTS session_snapshots (
    session_id TEXT PRIMARY KEY,
    schema_version INTEGER NOT NULL,
    snapshot TEXT NOT NULL,
    saved_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_session_snapshots_saved ON session_snapshots(saved_at DESC);
";

/// Current snapshot layout. Bump when a field changes meaning; new optional
/// fields can be added with `#[serde(default)]` without a bump.
pub const SNAPSHOT_SCHEMA_VERSION: u32 = 1;

/// Persisted form of a session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub schema_version: u32,
    pub session_id: String,
    pub mode: Mode,
    pub player: Player,
    pub inventory: Vec<String>,
    pub location: String,
    pub world: World,
    #[serde(default)]
    pub history: VecDeque<ActionRecord>,
    #[serde(default)]
    pub sequence: u64,
    pub saved_at: DateTime<Utc>,
}

impl SessionSnapshot {
    pub fn capture(session: &Session) -> Self {
        Self {
            schema_version: SNAPSHOT_SCHEMA_VERSION,
            session_id: session.id.clone(),
            mode: session.mode.clone(),
            player: session.player.clone(),
            inventory: session.inventory.clone(),
            location: session.location.clone(),
            world: session.world.clone(),
            history: session.history.clone(),
            sequence: session.sequence,
            saved_at: Utc::now(),
        }
    }

    pub fn into_session(self) -> Session {
        Session {
            id: self.session_id,
            mode: self.mode,
            player: self.player,
            inventory: self.inventory,
            location: self.location,
            world: self.world,
            history: self.history,
            sequence: self.sequence,
        }
    }

    /// Parse and validate stored JSON. Anything unusable is reported as a
    /// reason string for `StoreError::InvalidSnapshot`.
    pub fn from_json(json: &str) -> Result<Self, String> {
        let value: serde_json::Value =
            serde_json::from_str(json).map_err(|e| format!("not valid JSON: {e}"))?;

        let version = value
            .get("schema_version")
            .and_then(serde_json::Value::as_u64)
            .ok_or_else(|| "missing schema_version".to_string())?;
        if version != u64::from(SNAPSHOT_SCHEMA_VERSION) {
            return Err(format!("unsupported schema_version {version}"));
        }

        let snapshot: Self =
            serde_json::from_value(value).map_err(|e| format!("malformed snapshot: {e}"))?;

        if snapshot.world.room(&snapshot.location).is_none() {
            return Err(format!("location {} is not in the world", snapshot.location));
        }
        if snapshot.player.health > snapshot.player.max_health {
            return Err("player health exceeds max health".to_string());
        }

        Ok(snapshot)
    }

    /// Parse JSON stored under `session_id`. The snapshot must belong to
    /// that id.
    pub fn from_stored(session_id: &str, json: &str) -> Result<Self, StoreError> {
        let snapshot = Self::from_json(json).map_err(|reason| StoreError::InvalidSnapshot {
            session_id: session_id.to_string(),
            reason,
        })?;
        snapshot.ensure_owned_by(session_id)?;
        Ok(snapshot)
    }

    /// Fails with `InvalidSnapshot` unless this snapshot is for `session_id`
    pub fn ensure_owned_by(&self, session_id: &str) -> Result<(), StoreError> {
        if self.session_id == session_id {
            return Ok(());
        }
        Err(StoreError::InvalidSnapshot {
            session_id: session_id.to_string(),
            reason: format!("snapshot belongs to session {}", self.session_id),
        })
    }
}
