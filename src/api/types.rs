//! API request and response types

use crate::state_machine::ObservableState;
use serde::{Deserialize, Serialize};

/// Request to start or resume a session
#[derive(Debug, Default, Deserialize)]
pub struct CreateSessionRequest {
    /// Resume this id (restoring its snapshot) instead of minting one
    #[serde(default)]
    pub session_id: Option<String>,
}

/// Request to submit a command
#[derive(Debug, Deserialize)]
pub struct CommandRequest {
    pub text: String,
}

/// Response with a session's current state
#[derive(Debug, Serialize)]
pub struct SessionResponse {
    pub session_id: String,
    pub state: ObservableState,
}

/// Response with the live session ids
#[derive(Debug, Serialize)]
pub struct SessionListResponse {
    pub sessions: Vec<String>,
}

/// Response for command submission
#[derive(Debug, Serialize)]
pub struct CommandResponse {
    pub queued: bool,
}

/// Response for lifecycle actions
#[derive(Debug, Serialize)]
pub struct SuccessResponse {
    pub success: bool,
}

/// Error response
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

impl ErrorResponse {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            error: message.into(),
        }
    }
}
