//! Request and response types for narrative generation

use serde::{Deserialize, Serialize};

/// Bounded view of a session handed to the backend alongside the prompt
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NarrativeContext {
    pub mode: String,
    pub room: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub room_description: Option<String>,
    pub exits: Vec<String>,
    pub items: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hostile: Option<String>,
    pub inventory: Vec<String>,
    pub health: u32,
    pub max_health: u32,
    /// Most recent actions, oldest first
    pub recent_actions: Vec<String>,
}

/// A single generation call
#[derive(Debug, Clone)]
pub struct NarrativeRequest {
    pub prompt: String,
    pub context: NarrativeContext,
    pub temperature: f32,
    pub max_tokens: u32,
}

/// Generated narration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NarrativeResponse {
    pub text: String,
    pub done: bool,
}

impl NarrativeResponse {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            done: true,
        }
    }
}
