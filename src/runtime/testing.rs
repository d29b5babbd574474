//! Mock implementations for testing
//!
//! These mocks enable integration testing without real I/O.

use super::traits::*;
use super::{RuntimeEvent, SessionEvent, SessionRegistry, SessionRuntime};
use crate::config::{GenerationConfig, RetryPolicy, SessionConfig};
use crate::db::{SessionSnapshot, StoreError};
use crate::llm::{GenerationError, NarrativeRequest, NarrativeResponse};
use crate::state_machine::combat::FixedResolver;
use crate::state_machine::{Session, SessionContext, StrikeResolver};
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, oneshot, Notify};

// ============================================================================
// Mock Narrative Client
// ============================================================================

struct Scripted {
    result: Result<NarrativeResponse, GenerationError>,
    delay: Duration,
}

/// Mock client that returns queued results, optionally after a delay
pub struct MockNarrativeClient {
    script: Mutex<VecDeque<Scripted>>,
    /// Record of all requests made
    pub requests: Mutex<Vec<NarrativeRequest>>,
    calls: AtomicUsize,
    /// Notified when a request starts (for test synchronization)
    pub request_started: Arc<Notify>,
}

impl MockNarrativeClient {
    pub fn new() -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            requests: Mutex::new(Vec::new()),
            calls: AtomicUsize::new(0),
            request_started: Arc::new(Notify::new()),
        }
    }

    /// Queue a successful narration
    pub fn queue_text(&self, text: &str) {
        self.queue_delayed(Ok(NarrativeResponse::new(text)), Duration::ZERO);
    }

    /// Queue an error result
    pub fn queue_error(&self, error: GenerationError) {
        self.queue_delayed(Err(error), Duration::ZERO);
    }

    pub fn queue_delayed(&self, result: Result<NarrativeResponse, GenerationError>, delay: Duration) {
        self.script
            .lock()
            .unwrap()
            .push_back(Scripted { result, delay });
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn recorded_requests(&self) -> Vec<NarrativeRequest> {
        self.requests.lock().unwrap().clone()
    }
}

impl Default for MockNarrativeClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl NarrativeClient for MockNarrativeClient {
    async fn narrate(&self, request: &NarrativeRequest) -> Result<NarrativeResponse, GenerationError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().unwrap().push(request.clone());
        let next = self.script.lock().unwrap().pop_front();
        self.request_started.notify_waiters();

        match next {
            Some(Scripted { result, delay }) => {
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                result
            }
            None => Err(GenerationError::network("No mock response queued")),
        }
    }

    fn model_id(&self) -> &str {
        "mock-narrator"
    }
}

// ============================================================================
// In-Memory Snapshot Store
// ============================================================================

/// Snapshot store keeping raw JSON, so tests can plant bad data
#[derive(Default)]
pub struct InMemorySnapshotStore {
    snapshots: Mutex<HashMap<String, String>>,
    saves: AtomicUsize,
}

impl InMemorySnapshotStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_raw(&self, session_id: &str, json: &str) {
        self.snapshots
            .lock()
            .unwrap()
            .insert(session_id.to_string(), json.to_string());
    }

    /// Parsed snapshot as last saved
    pub fn stored(&self, session_id: &str) -> Option<SessionSnapshot> {
        let json = self.snapshots.lock().unwrap().get(session_id).cloned()?;
        SessionSnapshot::from_json(&json).ok()
    }

    pub fn save_count(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SnapshotStore for InMemorySnapshotStore {
    async fn save(&self, session_id: &str, snapshot: &SessionSnapshot) -> Result<(), StoreError> {
        snapshot.ensure_owned_by(session_id)?;
        let json = serde_json::to_string(snapshot)?;
        self.insert_raw(session_id, &json);
        self.saves.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn load(&self, session_id: &str) -> Result<Option<SessionSnapshot>, StoreError> {
        let json = self.snapshots.lock().unwrap().get(session_id).cloned();
        json.map(|json| SessionSnapshot::from_stored(session_id, &json))
            .transpose()
    }
}

// ============================================================================
// Helpers
// ============================================================================

/// Retries fast enough for tests
pub fn fast_generation() -> GenerationConfig {
    GenerationConfig {
        timeout: Duration::from_millis(200),
        retry: RetryPolicy {
            max_retries: 2,
            base_delay: Duration::from_millis(5),
        },
        ..GenerationConfig::default()
    }
}

/// Registry over mocks with fixed combat damage
pub fn registry_with(
    client: Arc<MockNarrativeClient>,
    store: Arc<InMemorySnapshotStore>,
) -> SessionRegistry<Arc<MockNarrativeClient>, Arc<InMemorySnapshotStore>> {
    SessionRegistry::new(client, store, fast_generation(), SessionConfig::default())
        .with_resolver_factory(Arc::new(|| Box::new(FixedResolver(3)) as Box<dyn StrikeResolver>))
}

// ============================================================================
// Test Runtime Builder
// ============================================================================

/// Helper for driving one session actor directly
pub struct TestRuntime {
    pub client: Arc<MockNarrativeClient>,
    pub store: Arc<InMemorySnapshotStore>,
    pub event_tx: mpsc::Sender<RuntimeEvent>,
    pub broadcast_rx: broadcast::Receiver<SessionEvent>,
    _runtime_handle: tokio::task::JoinHandle<()>,
}

impl TestRuntime {
    pub fn builder() -> TestRuntimeBuilder {
        TestRuntimeBuilder::new()
    }
}

pub struct TestRuntimeBuilder {
    session: Session,
    client: Arc<MockNarrativeClient>,
    store: Arc<InMemorySnapshotStore>,
    generation: GenerationConfig,
    history_limit: usize,
    checkpoint_interval: u32,
    damage: u32,
}

impl TestRuntimeBuilder {
    pub fn new() -> Self {
        Self {
            session: Session::new("test-session"),
            client: Arc::new(MockNarrativeClient::new()),
            store: Arc::new(InMemorySnapshotStore::new()),
            generation: fast_generation(),
            history_limit: 20,
            checkpoint_interval: 0,
            damage: 3,
        }
    }

    pub fn session(mut self, session: Session) -> Self {
        self.session = session;
        self
    }

    pub fn client(mut self, client: Arc<MockNarrativeClient>) -> Self {
        self.client = client;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.generation.timeout = timeout;
        self
    }

    pub fn history_limit(mut self, limit: usize) -> Self {
        self.history_limit = limit;
        self
    }

    pub fn checkpoint_interval(mut self, interval: u32) -> Self {
        self.checkpoint_interval = interval;
        self
    }

    pub fn damage(mut self, damage: u32) -> Self {
        self.damage = damage;
        self
    }

    pub fn build(self) -> TestRuntime {
        let context = SessionContext::new(&self.session.id, self.history_limit)
            .with_checkpoint_interval(self.checkpoint_interval);
        let (event_tx, event_rx) = mpsc::channel(32);
        let (broadcast_tx, broadcast_rx) = broadcast::channel(128);

        let runtime = SessionRuntime::new(
            context,
            self.session,
            self.client.clone(),
            self.store.clone(),
            self.generation,
            Box::new(FixedResolver(self.damage)),
            event_rx,
            &event_tx,
            broadcast_tx,
        );

        let handle = tokio::spawn(async move {
            runtime.run().await;
        });

        TestRuntime {
            client: self.client,
            store: self.store,
            event_tx,
            broadcast_rx,
            _runtime_handle: handle,
        }
    }
}

impl Default for TestRuntimeBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl TestRuntime {
    pub async fn submit(&self, text: &str) {
        self.event_tx
            .send(RuntimeEvent::Submit {
                raw: text.to_string(),
            })
            .await
            .expect("Failed to submit command");
    }

    /// Next event, or `None` if nothing arrives within `timeout`
    pub async fn next_event(&mut self, timeout: Duration) -> Option<SessionEvent> {
        tokio::time::timeout(timeout, self.broadcast_rx.recv())
            .await
            .ok()
            .and_then(Result::ok)
    }

    /// Collect exactly `n` events, panicking if they do not arrive in time
    pub async fn events(&mut self, n: usize) -> Vec<SessionEvent> {
        let mut events = Vec::with_capacity(n);
        for i in 0..n {
            let event = self
                .next_event(Duration::from_secs(2))
                .await
                .unwrap_or_else(|| panic!("Expected {n} events, got {i}"));
            events.push(event);
        }
        events
    }

    pub async fn session(&self) -> Session {
        let (reply, rx) = oneshot::channel();
        self.event_tx
            .send(RuntimeEvent::Snapshot { reply })
            .await
            .expect("Failed to request snapshot");
        rx.await.expect("Runtime dropped snapshot reply")
    }

    pub async fn retire(&self) {
        let (reply, rx) = oneshot::channel();
        self.event_tx
            .send(RuntimeEvent::Retire { reply })
            .await
            .expect("Failed to retire");
        rx.await.expect("Runtime dropped retire reply");
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state_machine::combat::CombatPhase;
    use crate::state_machine::state::ActionOutcome;
    use crate::parser::parse;
    use crate::state_machine::{plan, Mode, ModeKind, Plan};

    fn in_courtyard() -> Session {
        let mut session = Session::new("test-session");
        session.location = "courtyard".to_string();
        session.world.room_mut("courtyard").unwrap().description = Some("Weeds.".to_string());
        session
    }

    fn narrative(event: &SessionEvent) -> &str {
        match event {
            SessionEvent::StateChanged { narrative, .. } => narrative,
            other => panic!("Expected StateChanged, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_mock_client_returns_queued_then_errors() {
        let mock = MockNarrativeClient::new();
        mock.queue_text("Hello");
        let request = crate::prompt::opening_request(&Session::new("m"), &GenerationConfig::default());

        assert_eq!(mock.narrate(&request).await.unwrap().text, "Hello");
        assert!(mock.narrate(&request).await.is_err());
        assert_eq!(mock.call_count(), 2);
        assert_eq!(mock.recorded_requests().len(), 2);
    }

    #[test]
    fn test_client_seam_reports_model_id() {
        let client: Arc<dyn NarrativeClient> = Arc::new(MockNarrativeClient::new());
        assert_eq!(client.model_id(), "mock-narrator");
    }

    #[tokio::test]
    async fn test_immediate_command_emits_state_changed() {
        let mut rt = TestRuntime::builder().build();
        rt.submit("take torch").await;

        let events = rt.events(1).await;
        match &events[0] {
            SessionEvent::StateChanged {
                sequence,
                state,
                narrative,
            } => {
                assert_eq!(*sequence, 1);
                assert_eq!(state.inventory, vec!["torch"]);
                assert_eq!(narrative, "You take the torch.");
            }
            other => panic!("Expected StateChanged, got {other:?}"),
        }
        assert_eq!(rt.client.call_count(), 0);
    }

    #[tokio::test]
    async fn test_narrated_look_describes_room() {
        let mut rt = TestRuntime::builder().build();
        rt.client.queue_text("Ivy chokes the gatehouse.");
        rt.submit("look").await;

        let events = rt.events(1).await;
        assert_eq!(narrative(&events[0]), "Ivy chokes the gatehouse.");

        let session = rt.session().await;
        assert_eq!(
            session.current_room().unwrap().description.as_deref(),
            Some("Ivy chokes the gatehouse.")
        );
        assert_eq!(session.history.back().unwrap().outcome, ActionOutcome::Narrated);

        // Second look reuses the stored description
        rt.submit("look").await;
        rt.events(1).await;
        assert_eq!(rt.client.call_count(), 1);
    }

    #[tokio::test]
    async fn test_attack_while_inventory_open_is_rejected_without_generation() {
        let mut rt = TestRuntime::builder().build();
        rt.submit("inventory").await;
        rt.submit("attack").await;

        let events = rt.events(2).await;
        match &events[1] {
            SessionEvent::CommandRejected { code, reason, .. } => {
                assert_eq!(code, "illegal_command_for_mode");
                assert!(reason.contains("attack"));
            }
            other => panic!("Expected CommandRejected, got {other:?}"),
        }
        assert_eq!(rt.client.call_count(), 0);
        let session = rt.session().await;
        assert_eq!(session.mode, Mode::InventoryOpen);
        assert_eq!(session.history.len(), 1);
    }

    #[tokio::test]
    async fn test_unknown_command_lists_vocabulary() {
        let mut rt = TestRuntime::builder().build();
        rt.submit("dance wildly").await;

        match &rt.events(1).await[0] {
            SessionEvent::CommandRejected { code, reason, .. } => {
                assert_eq!(code, "unknown_command");
                assert!(reason.contains("look, move, take, attack, inventory, help"));
            }
            other => panic!("Expected CommandRejected, got {other:?}"),
        }
        let session = rt.session().await;
        assert!(session.history.is_empty());
        assert_eq!(session.sequence, 1);
        assert_eq!(session.location, "gatehouse");
    }

    #[tokio::test]
    async fn test_three_failures_emit_one_generation_failed() {
        let mut rt = TestRuntime::builder().build();
        for _ in 0..3 {
            rt.client.queue_error(GenerationError::server_error("503"));
        }
        let before = rt.session().await;
        rt.submit("move north").await;

        let events = rt.events(1).await;
        assert!(matches!(events[0], SessionEvent::GenerationFailed { .. }));
        assert!(rt.next_event(Duration::from_millis(100)).await.is_none());
        assert_eq!(rt.client.call_count(), 3);

        let after = rt.session().await;
        assert_eq!(after.location, before.location);
        assert_eq!(after.inventory, before.inventory);
        assert_eq!(after.mode, before.mode);
        assert_eq!(after.world, before.world);
        assert_eq!(after.history.len(), 1);
        assert_eq!(after.history[0].outcome, ActionOutcome::GenerationFailed);
    }

    #[tokio::test]
    async fn test_retry_recovers_after_transient_failure() {
        let mut rt = TestRuntime::builder().build();
        rt.client.queue_error(GenerationError::rate_limit("slow down"));
        rt.client.queue_text("A courtyard, finally.");
        rt.submit("move north").await;

        let events = rt.events(1).await;
        assert_eq!(narrative(&events[0]), "A courtyard, finally.");
        assert_eq!(rt.client.call_count(), 2);
        assert_eq!(rt.session().await.location, "courtyard");
    }

    #[tokio::test]
    async fn test_non_retryable_error_fails_immediately() {
        let mut rt = TestRuntime::builder().build();
        rt.client.queue_error(GenerationError::auth("bad key"));
        rt.submit("look").await;

        assert!(matches!(
            rt.events(1).await[0],
            SessionEvent::GenerationFailed { .. }
        ));
        assert_eq!(rt.client.call_count(), 1);
    }

    #[tokio::test]
    async fn test_timeout_counts_as_failure() {
        let client = Arc::new(MockNarrativeClient::new());
        for _ in 0..3 {
            client.queue_delayed(Ok(NarrativeResponse::new("late")), Duration::from_millis(200));
        }
        let mut rt = TestRuntime::builder()
            .client(client)
            .timeout(Duration::from_millis(20))
            .build();
        rt.submit("look").await;

        match &rt.events(1).await[0] {
            SessionEvent::GenerationFailed { fallback_text, .. } => {
                assert!(fallback_text.contains("fog"));
            }
            other => panic!("Expected GenerationFailed, got {other:?}"),
        }
        // The slot is free again
        rt.submit("take torch").await;
        assert!(matches!(
            rt.events(1).await[0],
            SessionEvent::StateChanged { .. }
        ));
    }

    #[tokio::test]
    async fn test_help_falls_back_to_command_reference() {
        let mut rt = TestRuntime::builder().build();
        rt.client.queue_error(GenerationError::invalid_request("nope"));
        rt.submit("help").await;

        match &rt.events(1).await[0] {
            SessionEvent::GenerationFailed { fallback_text, .. } => {
                assert!(fallback_text.contains("Available commands"));
            }
            other => panic!("Expected GenerationFailed, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_commands_queue_behind_slow_generation() {
        let client = Arc::new(MockNarrativeClient::new());
        client.queue_delayed(
            Ok(NarrativeResponse::new("The courtyard at last.")),
            Duration::from_millis(100),
        );
        let mut rt = TestRuntime::builder().client(client).build();

        rt.submit("move north").await;
        rt.submit("take rusty key").await;
        rt.submit("inventory").await;

        let events = rt.events(3).await;
        let sequences: Vec<u64> = events.iter().map(SessionEvent::sequence).collect();
        assert_eq!(sequences, vec![1, 2, 3]);
        assert_eq!(narrative(&events[0]), "The courtyard at last.");
        // The key only exists in the courtyard, so the move applied first
        assert_eq!(narrative(&events[1]), "You take the rusty key.");
        assert!(narrative(&events[2]).contains("rusty key"));
        assert_eq!(rt.client.call_count(), 1);
    }

    #[tokio::test]
    async fn test_queue_pauses_at_next_generation() {
        let client = Arc::new(MockNarrativeClient::new());
        client.queue_delayed(Ok(NarrativeResponse::new("First.")), Duration::from_millis(60));
        client.queue_delayed(Ok(NarrativeResponse::new("Second.")), Duration::from_millis(10));
        let mut rt = TestRuntime::builder().client(client).build();

        rt.submit("look").await;
        rt.submit("move north").await;
        rt.submit("take rusty key").await;

        let events = rt.events(3).await;
        assert_eq!(narrative(&events[0]), "First.");
        assert_eq!(narrative(&events[1]), "Second.");
        assert_eq!(narrative(&events[2]), "You take the rusty key.");
        assert_eq!(rt.client.call_count(), 2);
    }

    #[tokio::test]
    async fn test_combat_lifecycle() {
        let mut rt = TestRuntime::builder()
            .session(in_courtyard())
            .damage(5)
            .build();
        rt.client.queue_text("The hound bares its teeth.");

        rt.submit("attack").await;
        rt.events(1).await;
        let session = rt.session().await;
        let combat = session.mode.combat().unwrap();
        assert_eq!(combat.phase, CombatPhase::PlayerTurn);

        // Movement is illegal mid-fight
        rt.submit("move south").await;
        assert!(matches!(
            rt.events(1).await[0],
            SessionEvent::CommandRejected { .. }
        ));

        // Hound has 12 health: 5, 5, then 5 more finishes it
        for _ in 0..3 {
            rt.submit("attack").await;
        }
        let events = rt.events(3).await;
        assert!(narrative(&events[2]).contains("Your foe falls"));

        let session = rt.session().await;
        assert_eq!(session.mode, Mode::Exploring);
        assert!(session.mode.combat().is_none());
        assert!(session.current_room().unwrap().hostile.is_none());
        assert_eq!(session.player.health, 20);
        // Only the opening of the fight was narrated
        assert_eq!(rt.client.call_count(), 1);
    }

    #[tokio::test]
    async fn test_failed_combat_start_keeps_exploring() {
        let mut rt = TestRuntime::builder().session(in_courtyard()).build();
        for _ in 0..3 {
            rt.client.queue_error(GenerationError::network("reset"));
        }
        rt.submit("attack").await;

        assert!(matches!(
            rt.events(1).await[0],
            SessionEvent::GenerationFailed { .. }
        ));
        assert_eq!(rt.session().await.mode.kind(), ModeKind::Exploring);
    }

    #[tokio::test]
    async fn test_checkpoint_every_n_commands() {
        let mut rt = TestRuntime::builder().checkpoint_interval(2).build();
        rt.submit("take torch").await;
        rt.submit("inventory").await;
        rt.submit("inventory").await;
        rt.events(3).await;
        // Sync with the actor before checking the store
        rt.session().await;

        assert_eq!(rt.store.save_count(), 1);
        let saved = rt.store.stored("test-session").unwrap();
        assert_eq!(saved.inventory, vec!["torch"]);
        assert_eq!(saved.mode, Mode::InventoryOpen);
    }

    #[tokio::test]
    async fn test_retire_discards_in_flight_result() {
        let client = Arc::new(MockNarrativeClient::new());
        client.queue_delayed(Ok(NarrativeResponse::new("Too late.")), Duration::from_millis(100));
        let started = client.request_started.clone();
        let mut rt = TestRuntime::builder().client(client).build();

        let notified = started.notified();
        rt.submit("move north").await;
        notified.await;
        rt.retire().await;

        assert!(rt.next_event(Duration::from_millis(200)).await.is_none());
        let saved = rt.store.stored("test-session").unwrap();
        assert_eq!(saved.location, "gatehouse");
        assert!(saved.history.is_empty());
    }

    #[tokio::test]
    async fn test_history_is_bounded_by_limit() {
        let mut rt = TestRuntime::builder().history_limit(3).build();
        for _ in 0..6 {
            rt.submit("inventory").await;
        }
        rt.events(6).await;
        assert_eq!(rt.session().await.history.len(), 3);
    }

    #[tokio::test]
    async fn test_narration_request_carries_bounded_context() {
        let mut rt = TestRuntime::builder().build();
        for _ in 0..7 {
            rt.submit("inventory").await;
        }
        rt.client.queue_text("Light falls.");
        rt.submit("inventory").await; // close the pack
        rt.submit("look").await;
        rt.events(9).await;

        let requests = rt.client.recorded_requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].context.recent_actions.len(), 5);
        assert_eq!(requests[0].context.room, "Ruined Gatehouse");
    }

    #[tokio::test]
    async fn test_concurrent_submits_match_a_serial_order() {
        let registry = Arc::new(registry_with(
            Arc::new(MockNarrativeClient::new()),
            Arc::new(InMemorySnapshotStore::new()),
        ));
        let handle = registry.get_or_create("shared").await.unwrap();
        let mut rx = handle.broadcast_tx.subscribe();

        let mut tasks = Vec::new();
        for input in ["take torch", "inventory", "move east", "take rope"] {
            let registry = registry.clone();
            tasks.push(tokio::spawn(async move {
                registry.submit("shared", input).await.unwrap();
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }

        let mut events = Vec::new();
        for _ in 0..4 {
            events.push(
                tokio::time::timeout(Duration::from_secs(2), rx.recv())
                    .await
                    .unwrap()
                    .unwrap(),
            );
        }
        let sequences: Vec<u64> = events.iter().map(SessionEvent::sequence).collect();
        assert_eq!(sequences, vec![1, 2, 3, 4]);

        // Replay the accepted order serially; narrated commands all failed
        let session = registry.snapshot("shared").await.unwrap();
        let order: Vec<String> = session.history.iter().map(|r| r.command.clone()).collect();
        assert_eq!(order.len(), 4);

        let mut expected = Session::new("shared");
        if let Some(room) = expected.current_room_mut() {
            room.description = Some(room.fallback_description.clone());
        }
        for input in &order {
            let command = parse(input);
            if let Ok(Plan::Immediate { session: next, .. }) =
                plan(&expected, &command, &mut FixedResolver(3))
            {
                expected = next;
            }
        }
        assert_eq!(session.inventory, expected.inventory);
        assert_eq!(session.location, expected.location);
        assert_eq!(session.mode, expected.mode);
    }
}
