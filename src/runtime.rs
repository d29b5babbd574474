//! Runtime for live sessions
//!
//! The registry maps session ids to running session actors and is the only
//! structure shared across sessions.

mod executor;
pub mod traits;

#[cfg(test)]
pub mod testing;

pub use executor::SessionRuntime;
pub use traits::*;

use crate::config::{GenerationConfig, SessionConfig};
use crate::db::StoreError;
use crate::llm::{GenerationError, NarrativeResponse};
use crate::prompt::opening_request;
use crate::state_machine::combat::DiceResolver;
use crate::state_machine::{ObservableState, Session, SessionContext, StrikeResolver};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{broadcast, mpsc, oneshot, Mutex, OwnedMutexGuard, RwLock};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Type alias for production registry with concrete implementations
pub type ProductionRegistry = SessionRegistry<ServiceNarrativeClient, DatabaseSnapshotStore>;

/// Builds the damage source for each new session actor
pub type ResolverFactory = Arc<dyn Fn() -> Box<dyn StrikeResolver> + Send + Sync>;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Session not found: {0}")]
    SessionNotFound(String),
    #[error("Session runtime closed: {0}")]
    Closed(String),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Messages handled by a session actor
#[derive(Debug)]
pub enum RuntimeEvent {
    Submit {
        raw: String,
    },
    NarrationComplete {
        ticket: u64,
        attempt: u32,
        result: Result<NarrativeResponse, GenerationError>,
    },
    RetryTimeout {
        ticket: u64,
        attempt: u32,
    },
    Snapshot {
        reply: oneshot::Sender<Session>,
    },
    /// Save a final snapshot and stop
    Retire {
        reply: oneshot::Sender<()>,
    },
}

/// Ordered events sent to observers of one session
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionEvent {
    CommandRejected {
        sequence: u64,
        reason: String,
        code: String,
    },
    StateChanged {
        sequence: u64,
        #[serde(flatten)]
        state: ObservableState,
        narrative: String,
    },
    GenerationFailed {
        sequence: u64,
        fallback_text: String,
    },
}

impl SessionEvent {
    pub fn name(&self) -> &'static str {
        match self {
            SessionEvent::CommandRejected { .. } => "command_rejected",
            SessionEvent::StateChanged { .. } => "state_changed",
            SessionEvent::GenerationFailed { .. } => "generation_failed",
        }
    }

    pub fn sequence(&self) -> u64 {
        match self {
            SessionEvent::CommandRejected { sequence, .. }
            | SessionEvent::StateChanged { sequence, .. }
            | SessionEvent::GenerationFailed { sequence, .. } => *sequence,
        }
    }
}

/// Handle to interact with a running session
#[derive(Clone)]
pub struct SessionHandle {
    pub session_id: String,
    pub event_tx: mpsc::Sender<RuntimeEvent>,
    pub broadcast_tx: broadcast::Sender<SessionEvent>,
    /// Milliseconds since the registry epoch of the last submit
    last_activity: Arc<AtomicU64>,
}

/// Manager for all session runtimes
pub struct SessionRegistry<C, S>
where
    C: NarrativeClient + 'static,
    S: SnapshotStore + 'static,
{
    client: Arc<C>,
    store: Arc<S>,
    generation: GenerationConfig,
    session: SessionConfig,
    resolver_factory: ResolverFactory,
    sessions: RwLock<HashMap<String, SessionHandle>>,
    /// Per-id locks held while a session is being created or retired
    lifecycle: Mutex<HashMap<String, Arc<Mutex<()>>>>,
    epoch: Instant,
}

impl<C, S> SessionRegistry<C, S>
where
    C: NarrativeClient + 'static,
    S: SnapshotStore + 'static,
{
    pub fn new(client: C, store: S, generation: GenerationConfig, session: SessionConfig) -> Self {
        Self {
            client: Arc::new(client),
            store: Arc::new(store),
            generation,
            session,
            resolver_factory: Arc::new(|| Box::new(DiceResolver::new()) as Box<dyn StrikeResolver>),
            sessions: RwLock::new(HashMap::new()),
            lifecycle: Mutex::new(HashMap::new()),
            epoch: Instant::now(),
        }
    }

    /// Replace the damage source used by sessions created from now on
    pub fn with_resolver_factory(mut self, factory: ResolverFactory) -> Self {
        self.resolver_factory = factory;
        self
    }

    /// Start a new session with a fresh id
    pub async fn create(&self) -> Result<SessionHandle, SessionError> {
        let id = uuid::Uuid::new_v4().to_string();
        self.get_or_create(&id).await
    }

    /// Get the live session, or restore/start it
    pub async fn get_or_create(&self, session_id: &str) -> Result<SessionHandle, SessionError> {
        if let Some(handle) = self.sessions.read().await.get(session_id) {
            return Ok(handle.clone());
        }

        // Waits out a concurrent create or an eviction that is still saving
        let guard = self.lock_lifecycle(session_id).await;
        let result = self.create_locked(session_id).await;
        self.unlock_lifecycle(session_id, guard).await;
        result
    }

    async fn create_locked(&self, session_id: &str) -> Result<SessionHandle, SessionError> {
        if let Some(handle) = self.sessions.read().await.get(session_id) {
            return Ok(handle.clone());
        }

        // Built outside the map lock; generation can take a while
        let session = self.restore_or_start(session_id).await?;

        let handle = self.spawn_runtime(session);
        let mut sessions = self.sessions.write().await;
        sessions.insert(session_id.to_string(), handle.clone());
        tracing::info!(session_id = %session_id, active = sessions.len(), "Session started");
        Ok(handle)
    }

    async fn lock_lifecycle(&self, session_id: &str) -> OwnedMutexGuard<()> {
        let lock = self
            .lifecycle
            .lock()
            .await
            .entry(session_id.to_string())
            .or_default()
            .clone();
        lock.lock_owned().await
    }

    async fn unlock_lifecycle(&self, session_id: &str, guard: OwnedMutexGuard<()>) {
        let mut locks = self.lifecycle.lock().await;
        drop(guard);
        // Clones are only taken under `locks`, so a count of one means nobody is waiting
        if locks
            .get(session_id)
            .is_some_and(|lock| Arc::strong_count(lock) == 1)
        {
            locks.remove(session_id);
        }
    }

    fn spawn_runtime(&self, session: Session) -> SessionHandle {
        let session_id = session.id.clone();
        let context = SessionContext::new(&session_id, self.session.history_limit)
            .with_checkpoint_interval(self.session.checkpoint_interval);

        let (event_tx, event_rx) = mpsc::channel(32);
        let (broadcast_tx, _) = broadcast::channel(128);

        let runtime = SessionRuntime::new(
            context,
            session,
            self.client.clone(),
            self.store.clone(),
            self.generation.clone(),
            (self.resolver_factory)(),
            event_rx,
            &event_tx,
            broadcast_tx.clone(),
        );

        let id = session_id.clone();
        tokio::spawn(async move {
            runtime.run().await;
            tracing::info!(session_id = %id, "Session runtime finished");
        });

        SessionHandle {
            session_id,
            event_tx,
            broadcast_tx,
            last_activity: Arc::new(AtomicU64::new(self.now_ms())),
        }
    }

    async fn restore_or_start(&self, session_id: &str) -> Result<Session, SessionError> {
        match self.store.load(session_id).await {
            Ok(Some(snapshot)) => {
                tracing::info!(session_id = %session_id, "Restored session from snapshot");
                return Ok(snapshot.into_session());
            }
            Ok(None) => {}
            Err(StoreError::InvalidSnapshot { reason, .. }) => {
                tracing::error!(
                    session_id = %session_id,
                    reason = %reason,
                    data_loss = true,
                    "Discarding invalid snapshot, starting a fresh session"
                );
            }
            Err(e) => return Err(e.into()),
        }

        Ok(self.start_fresh(session_id).await)
    }

    /// Fresh session with its opening room narrated once
    async fn start_fresh(&self, session_id: &str) -> Session {
        let mut session = Session::new(session_id);
        let request = opening_request(&session, &self.generation);

        let text = match tokio::time::timeout(self.generation.timeout, self.client.narrate(&request))
            .await
        {
            Ok(Ok(response)) => Some(response.text),
            Ok(Err(e)) => {
                tracing::warn!(session_id = %session_id, error = %e, "Opening narration failed, using static text");
                None
            }
            Err(_) => {
                tracing::warn!(session_id = %session_id, "Opening narration timed out, using static text");
                None
            }
        };

        if let Some(room) = session.current_room_mut() {
            room.description = Some(text.unwrap_or_else(|| room.fallback_description.clone()));
        }
        session
    }

    async fn handle(&self, session_id: &str) -> Result<SessionHandle, SessionError> {
        self.sessions
            .read()
            .await
            .get(session_id)
            .cloned()
            .ok_or_else(|| SessionError::SessionNotFound(session_id.to_string()))
    }

    /// Queue a command. Never creates a session.
    pub async fn submit(&self, session_id: &str, raw: &str) -> Result<(), SessionError> {
        let handle = self.handle(session_id).await?;
        handle.last_activity.store(self.now_ms(), Ordering::Relaxed);
        handle
            .event_tx
            .send(RuntimeEvent::Submit {
                raw: raw.to_string(),
            })
            .await
            .map_err(|_| SessionError::Closed(session_id.to_string()))
    }

    /// Subscribe to session events
    pub async fn subscribe(
        &self,
        session_id: &str,
    ) -> Result<broadcast::Receiver<SessionEvent>, SessionError> {
        Ok(self.handle(session_id).await?.broadcast_tx.subscribe())
    }

    /// Copy of the session as the actor currently holds it
    pub async fn snapshot(&self, session_id: &str) -> Result<Session, SessionError> {
        let handle = self.handle(session_id).await?;
        let (reply, rx) = oneshot::channel();
        handle
            .event_tx
            .send(RuntimeEvent::Snapshot { reply })
            .await
            .map_err(|_| SessionError::Closed(session_id.to_string()))?;
        rx.await
            .map_err(|_| SessionError::Closed(session_id.to_string()))
    }

    pub async fn observe(&self, session_id: &str) -> Result<ObservableState, SessionError> {
        Ok(self.snapshot(session_id).await?.observable())
    }

    /// Sorted ids of live sessions
    pub async fn list_active(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.sessions.read().await.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Remove a session and retire its actor once it has saved. Recreating
    /// the id waits until the final snapshot is stored.
    pub async fn evict(&self, session_id: &str) -> Result<(), SessionError> {
        let guard = self.lock_lifecycle(session_id).await;
        let removed = self.sessions.write().await.remove(session_id);
        let found = removed.is_some();
        if let Some(handle) = removed {
            retire(handle).await;
            tracing::info!(session_id = %session_id, "Session evicted");
        }
        self.unlock_lifecycle(session_id, guard).await;

        if found {
            Ok(())
        } else {
            Err(SessionError::SessionNotFound(session_id.to_string()))
        }
    }

    /// Evict every session idle longer than the configured timeout
    pub async fn sweep_idle(&self) -> Vec<String> {
        let now = self.now_ms();
        let limit = u64::try_from(self.session.idle_timeout.as_millis()).unwrap_or(u64::MAX);

        let idle: Vec<String> = self
            .sessions
            .read()
            .await
            .values()
            .filter(|handle| {
                now.saturating_sub(handle.last_activity.load(Ordering::Relaxed)) >= limit
            })
            .map(|handle| handle.session_id.clone())
            .collect();

        let mut evicted = Vec::with_capacity(idle.len());
        for session_id in idle {
            if self.evict(&session_id).await.is_ok() {
                evicted.push(session_id);
            }
        }
        if !evicted.is_empty() {
            tracing::info!(count = evicted.len(), "Evicted idle sessions");
        }
        evicted
    }

    /// Run `sweep_idle` every `interval` until the token is cancelled
    pub fn spawn_idle_sweeper(self: &Arc<Self>, interval: Duration) -> CancellationToken {
        let token = CancellationToken::new();
        let cancel = token.clone();
        let registry = Arc::clone(self);

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    () = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        registry.sweep_idle().await;
                    }
                }
            }
            tracing::info!("Idle sweeper stopped");
        });

        token
    }

    /// Retire every session, saving each one
    pub async fn shutdown(&self) {
        let handles: Vec<SessionHandle> = self.sessions.write().await.drain().map(|(_, h)| h).collect();
        let count = handles.len();
        for handle in handles {
            retire(handle).await;
        }
        tracing::info!(count, "Registry shut down");
    }

    fn now_ms(&self) -> u64 {
        u64::try_from(self.epoch.elapsed().as_millis()).unwrap_or(u64::MAX)
    }
}

async fn retire(handle: SessionHandle) {
    let (reply, rx) = oneshot::channel();
    if handle
        .event_tx
        .send(RuntimeEvent::Retire { reply })
        .await
        .is_ok()
    {
        let _ = rx.await;
    }
}
