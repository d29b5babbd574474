//! Session runtime executor
//!
//! One actor per live session. It owns the `Session`, so every mutation
//! happens on this task and commands are applied strictly in arrival order.
//! Generation calls run in spawned tasks and report back through the event
//! channel.

use super::traits::{NarrativeClient, SnapshotStore};
use super::{RuntimeEvent, SessionEvent};

use crate::config::GenerationConfig;
use crate::db::SessionSnapshot;
use crate::llm::{GenerationError, NarrativeRequest, NarrativeResponse};
use crate::parser::parse;
use crate::prompt::narrative_request;
use crate::state_machine::transition::{fallback_text, CommandError};
use crate::state_machine::state::{ActionOutcome, ActionRecord};
use crate::state_machine::{
    apply_narration, plan, PendingChange, Plan, Session, SessionContext, StrikeResolver,
};
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};

/// Longest history summary kept per action
const SUMMARY_CHARS: usize = 120;

/// The single outstanding generation for a session
struct InFlight {
    ticket: u64,
    attempt: u32,
    raw: String,
    change: PendingChange,
    request: NarrativeRequest,
}

/// Generic session runtime that can work with any client and store
pub struct SessionRuntime<C, S>
where
    C: NarrativeClient + 'static,
    S: SnapshotStore + 'static,
{
    context: SessionContext,
    session: Session,
    client: Arc<C>,
    store: Arc<S>,
    generation: GenerationConfig,
    resolver: Box<dyn StrikeResolver>,
    event_rx: mpsc::Receiver<RuntimeEvent>,
    /// Weak so the actor stops once every handle and in-flight task is gone
    event_tx: mpsc::WeakSender<RuntimeEvent>,
    broadcast_tx: broadcast::Sender<SessionEvent>,
    /// Commands accepted while a generation is outstanding
    queue: VecDeque<String>,
    in_flight: Option<InFlight>,
    next_ticket: u64,
    completed_since_checkpoint: u32,
}

impl<C, S> SessionRuntime<C, S>
where
    C: NarrativeClient + 'static,
    S: SnapshotStore + 'static,
{
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        context: SessionContext,
        session: Session,
        client: Arc<C>,
        store: Arc<S>,
        generation: GenerationConfig,
        resolver: Box<dyn StrikeResolver>,
        event_rx: mpsc::Receiver<RuntimeEvent>,
        event_tx: &mpsc::Sender<RuntimeEvent>,
        broadcast_tx: broadcast::Sender<SessionEvent>,
    ) -> Self {
        Self {
            context,
            session,
            client,
            store,
            generation,
            resolver,
            event_rx,
            event_tx: event_tx.downgrade(),
            broadcast_tx,
            queue: VecDeque::new(),
            in_flight: None,
            next_ticket: 0,
            completed_since_checkpoint: 0,
        }
    }

    pub async fn run(mut self) {
        tracing::info!(session_id = %self.context.session_id, "Starting session runtime");

        while let Some(event) = self.event_rx.recv().await {
            match event {
                RuntimeEvent::Submit { raw } => self.handle_submit(raw).await,
                RuntimeEvent::NarrationComplete {
                    ticket,
                    attempt,
                    result,
                } => self.handle_narration(ticket, attempt, result).await,
                RuntimeEvent::RetryTimeout { ticket, attempt } => {
                    self.handle_retry(ticket, attempt);
                }
                RuntimeEvent::Snapshot { reply } => {
                    let _ = reply.send(self.session.clone());
                }
                RuntimeEvent::Retire { reply } => {
                    self.retire().await;
                    let _ = reply.send(());
                    break;
                }
            }
        }

        tracing::info!(session_id = %self.context.session_id, "Session runtime stopped");
    }

    async fn handle_submit(&mut self, raw: String) {
        if self.in_flight.is_some() {
            tracing::debug!(
                session_id = %self.context.session_id,
                queued = self.queue.len() + 1,
                "Generation outstanding, queueing command"
            );
            self.queue.push_back(raw);
            return;
        }
        self.start_command(raw).await;
        self.drain_queue().await;
    }

    /// Run queued commands until one of them starts a generation
    async fn drain_queue(&mut self) {
        while self.in_flight.is_none() {
            let Some(raw) = self.queue.pop_front() else {
                break;
            };
            self.start_command(raw).await;
        }
    }

    async fn start_command(&mut self, raw: String) {
        let command = parse(&raw);

        match plan(&self.session, &command, self.resolver.as_mut()) {
            Ok(Plan::Immediate { session, narrative }) => {
                self.session = session;
                self.record(&raw, ActionOutcome::Applied, &narrative);
                self.emit_state_changed(narrative);
                self.complete_command().await;
            }

            Ok(Plan::Narrate(change)) => {
                let request = narrative_request(&self.session, &change, &self.generation);
                self.next_ticket += 1;
                let in_flight = InFlight {
                    ticket: self.next_ticket,
                    attempt: 1,
                    raw,
                    change,
                    request,
                };
                tracing::info!(
                    session_id = %self.context.session_id,
                    ticket = in_flight.ticket,
                    change = in_flight.change.label(),
                    model = %self.client.model_id(),
                    "Requesting narration"
                );
                self.spawn_attempt(&in_flight);
                self.in_flight = Some(in_flight);
            }

            Err(CommandError::Rejected(rejection)) => {
                let reason = rejection.to_string();
                tracing::debug!(
                    session_id = %self.context.session_id,
                    code = rejection.code(),
                    "Command rejected"
                );
                let sequence = self.session.next_sequence();
                let _ = self.broadcast_tx.send(SessionEvent::CommandRejected {
                    sequence,
                    reason,
                    code: rejection.code().to_string(),
                });
                self.complete_command().await;
            }

            Err(CommandError::Transition(e)) => {
                tracing::error!(
                    session_id = %self.context.session_id,
                    error = %e,
                    "Command hit an invalid transition"
                );
                let sequence = self.session.next_sequence();
                let _ = self.broadcast_tx.send(SessionEvent::CommandRejected {
                    sequence,
                    reason: "Something about that doesn't work right now.".to_string(),
                    code: "invalid_transition".to_string(),
                });
                self.complete_command().await;
            }
        }
    }

    /// Spawn one generation attempt with a hard deadline
    fn spawn_attempt(&self, in_flight: &InFlight) {
        let Some(event_tx) = self.event_tx.upgrade() else {
            return;
        };
        let client = self.client.clone();
        let request = in_flight.request.clone();
        let deadline = self.generation.timeout;
        let ticket = in_flight.ticket;
        let attempt = in_flight.attempt;
        let session_id = self.context.session_id.clone();

        tokio::spawn(async move {
            tracing::debug!(session_id = %session_id, ticket, attempt, "Generation attempt (background)");
            let result = match tokio::time::timeout(deadline, client.narrate(&request)).await {
                Ok(result) => result,
                Err(_) => Err(GenerationError::timeout(format!(
                    "No narration within {}ms",
                    deadline.as_millis()
                ))),
            };
            let _ = event_tx
                .send(RuntimeEvent::NarrationComplete {
                    ticket,
                    attempt,
                    result,
                })
                .await;
        });
    }

    async fn handle_narration(
        &mut self,
        ticket: u64,
        attempt: u32,
        result: Result<NarrativeResponse, GenerationError>,
    ) {
        let current = self
            .in_flight
            .as_ref()
            .is_some_and(|f| f.ticket == ticket && f.attempt == attempt);
        if !current {
            tracing::debug!(
                session_id = %self.context.session_id,
                ticket,
                attempt,
                "Ignoring stale narration result"
            );
            return;
        }

        match result {
            Ok(response) => {
                let Some(in_flight) = self.in_flight.take() else {
                    return;
                };
                match apply_narration(&self.session, &in_flight.change, &response.text) {
                    Ok(next) => {
                        self.session = next;
                        self.record(&in_flight.raw, ActionOutcome::Narrated, &response.text);
                        self.emit_state_changed(response.text);
                    }
                    Err(e) => {
                        tracing::error!(
                            session_id = %self.context.session_id,
                            error = %e,
                            "Narration arrived for a change that no longer applies"
                        );
                        self.fail(&in_flight);
                    }
                }
            }

            Err(error) => {
                let max_attempts = self.generation.retry.max_attempts();
                if error.kind.is_retryable() && attempt < max_attempts {
                    let next_attempt = attempt + 1;
                    let delay = self.generation.retry.delay_before(next_attempt);
                    tracing::warn!(
                        session_id = %self.context.session_id,
                        ticket,
                        attempt,
                        next_attempt,
                        delay_ms = %delay.as_millis(),
                        error = %error,
                        "Generation failed, scheduling retry"
                    );
                    if let Some(event_tx) = self.event_tx.upgrade() {
                        tokio::spawn(async move {
                            tokio::time::sleep(delay).await;
                            let _ = event_tx
                                .send(RuntimeEvent::RetryTimeout {
                                    ticket,
                                    attempt: next_attempt,
                                })
                                .await;
                        });
                    }
                    return;
                }

                tracing::error!(
                    session_id = %self.context.session_id,
                    ticket,
                    attempt,
                    kind = %error.kind,
                    error = %error,
                    "Generation failed, giving up"
                );
                let Some(in_flight) = self.in_flight.take() else {
                    return;
                };
                self.fail(&in_flight);
            }
        }

        self.complete_command().await;
        self.drain_queue().await;
    }

    fn handle_retry(&mut self, ticket: u64, attempt: u32) {
        let Some(in_flight) = self.in_flight.as_mut().filter(|f| f.ticket == ticket) else {
            return;
        };
        in_flight.attempt = attempt;
        tracing::info!(session_id = %self.context.session_id, ticket, attempt, "Retrying generation");
        let Some(in_flight) = self.in_flight.as_ref() else {
            return;
        };
        self.spawn_attempt(in_flight);
    }

    /// Final failure: only the history changes
    fn fail(&mut self, in_flight: &InFlight) {
        let fallback = fallback_text(&in_flight.change, self.session.mode.kind());
        self.record(&in_flight.raw, ActionOutcome::GenerationFailed, &fallback);
        let sequence = self.session.next_sequence();
        let _ = self.broadcast_tx.send(SessionEvent::GenerationFailed {
            sequence,
            fallback_text: fallback,
        });
    }

    fn record(&mut self, raw: &str, outcome: ActionOutcome, text: &str) {
        let summary: String = text.chars().take(SUMMARY_CHARS).collect();
        self.session.record(
            ActionRecord::new(raw, outcome, summary),
            self.context.history_limit,
        );
    }

    fn emit_state_changed(&mut self, narrative: String) {
        let sequence = self.session.next_sequence();
        let _ = self.broadcast_tx.send(SessionEvent::StateChanged {
            sequence,
            state: self.session.observable(),
            narrative,
        });
    }

    async fn complete_command(&mut self) {
        let interval = self.context.checkpoint_interval;
        if interval == 0 {
            return;
        }
        self.completed_since_checkpoint += 1;
        if self.completed_since_checkpoint >= interval {
            self.completed_since_checkpoint = 0;
            self.save_snapshot("checkpoint").await;
        }
    }

    async fn retire(&mut self) {
        if let Some(in_flight) = self.in_flight.take() {
            tracing::info!(
                session_id = %self.context.session_id,
                ticket = in_flight.ticket,
                "Retiring with generation outstanding, result will be discarded"
            );
        }
        if !self.queue.is_empty() {
            tracing::warn!(
                session_id = %self.context.session_id,
                dropped = self.queue.len(),
                "Retiring with queued commands"
            );
        }
        self.save_snapshot("retire").await;
    }

    async fn save_snapshot(&self, reason: &'static str) {
        let snapshot = SessionSnapshot::capture(&self.session);
        match self.store.save(&self.context.session_id, &snapshot).await {
            Ok(()) => {
                tracing::debug!(session_id = %self.context.session_id, reason, "Saved snapshot");
            }
            Err(e) => {
                tracing::error!(
                    session_id = %self.context.session_id,
                    reason,
                    error = %e,
                    "Failed to save snapshot"
                );
            }
        }
    }
}
