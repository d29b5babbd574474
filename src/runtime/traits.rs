//! Trait abstractions for runtime I/O
//!
//! These traits enable testing the executor with mock implementations.

use crate::db::{Database, SessionSnapshot, StoreError};
use crate::llm::{GenerationError, NarrativeRequest, NarrativeResponse, NarrativeService};
use async_trait::async_trait;
use std::sync::Arc;

/// Client for narration requests
#[async_trait]
pub trait NarrativeClient: Send + Sync {
    /// Run one generation call. Deadlines and retries are the caller's job.
    async fn narrate(&self, request: &NarrativeRequest) -> Result<NarrativeResponse, GenerationError>;

    /// Get the model ID
    fn model_id(&self) -> &str;
}

/// Persistence for session snapshots
#[async_trait]
pub trait SnapshotStore: Send + Sync {
    /// Store under `session_id`; a snapshot for another id is `InvalidSnapshot`
    async fn save(&self, session_id: &str, snapshot: &SessionSnapshot) -> Result<(), StoreError>;

    /// `Ok(None)` when nothing was saved. Unusable data, or a snapshot that
    /// belongs to another id, is `InvalidSnapshot`.
    async fn load(&self, session_id: &str) -> Result<Option<SessionSnapshot>, StoreError>;
}

// ============================================================================
// Arc implementations for trait objects
// ============================================================================

#[async_trait]
impl<T: NarrativeClient + ?Sized> NarrativeClient for Arc<T> {
    async fn narrate(&self, request: &NarrativeRequest) -> Result<NarrativeResponse, GenerationError> {
        (**self).narrate(request).await
    }

    fn model_id(&self) -> &str {
        (**self).model_id()
    }
}

#[async_trait]
impl<T: SnapshotStore + ?Sized> SnapshotStore for Arc<T> {
    async fn save(&self, session_id: &str, snapshot: &SessionSnapshot) -> Result<(), StoreError> {
        (**self).save(session_id, snapshot).await
    }

    async fn load(&self, session_id: &str) -> Result<Option<SessionSnapshot>, StoreError> {
        (**self).load(session_id).await
    }
}

// ============================================================================
// Production Adapters
// ============================================================================

/// Adapter to use Database as `SnapshotStore`
#[derive(Clone)]
pub struct DatabaseSnapshotStore {
    db: Database,
}

impl DatabaseSnapshotStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }
}

#[async_trait]
impl SnapshotStore for DatabaseSnapshotStore {
    async fn save(&self, session_id: &str, snapshot: &SessionSnapshot) -> Result<(), StoreError> {
        let db = self.db.clone();
        let session_id = session_id.to_string();
        let snapshot = snapshot.clone();
        tokio::task::spawn_blocking(move || db.save_snapshot(&session_id, &snapshot))
            .await
            .map_err(|e| StoreError::Task(e.to_string()))?
    }

    async fn load(&self, session_id: &str) -> Result<Option<SessionSnapshot>, StoreError> {
        let db = self.db.clone();
        let session_id = session_id.to_string();
        tokio::task::spawn_blocking(move || db.load_snapshot(&session_id))
            .await
            .map_err(|e| StoreError::Task(e.to_string()))?
    }
}

/// Adapter to use a `NarrativeService` as `NarrativeClient`
pub struct ServiceNarrativeClient {
    service: Arc<dyn NarrativeService>,
}

impl ServiceNarrativeClient {
    pub fn new(service: Arc<dyn NarrativeService>) -> Self {
        Self { service }
    }
}

#[async_trait]
impl NarrativeClient for ServiceNarrativeClient {
    async fn narrate(&self, request: &NarrativeRequest) -> Result<NarrativeResponse, GenerationError> {
        self.service.generate(request).await
    }

    fn model_id(&self) -> &str {
        self.service.model_id()
    }
}
