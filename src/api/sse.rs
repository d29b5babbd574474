//! Server-Sent Events support

use crate::runtime::SessionEvent;
use crate::state_machine::ObservableState;
use axum::response::sse::{Event, KeepAlive, Sse};
use futures::stream::Stream;
use serde_json::json;
use std::convert::Infallible;
use std::time::Duration;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::StreamExt;

/// Convert broadcast stream to SSE stream, starting with the current state
pub fn sse_stream(
    session_id: String,
    state: ObservableState,
    broadcast_rx: tokio::sync::broadcast::Receiver<SessionEvent>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let init = futures::stream::once(async move {
        let data = json!({
            "type": "init",
            "session_id": session_id,
            "state": state,
        });
        Ok(Event::default().event("init").data(data.to_string()))
    });

    let broadcasts = BroadcastStream::new(broadcast_rx).filter_map(|result| match result {
        Ok(event) => Some(Ok(session_event_to_axum(&event))),
        Err(e) => {
            tracing::warn!(error = %e, "SSE client lagged, skipping events");
            None
        }
    });

    Sse::new(init.chain(broadcasts)).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("ping"),
    )
}

fn session_event_to_axum(event: &SessionEvent) -> Event {
    let data = serde_json::to_string(event).unwrap_or_else(|e| {
        json!({ "type": "error", "message": format!("Failed to encode event: {e}") }).to_string()
    });
    Event::default()
        .event(event.name())
        .id(event.sequence().to_string())
        .data(data)
}
