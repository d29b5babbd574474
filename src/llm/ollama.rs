//! Ollama-style `/api/generate` backend

use super::types::{NarrativeContext, NarrativeRequest, NarrativeResponse};
use super::{GenerationError, NarrativeService};
use crate::config::GenerationConfig;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

/// HTTP client for a generate endpoint taking `{model, prompt, ...}` and
/// answering `{response, done}`
pub struct OllamaService {
    client: Client,
    endpoint: String,
    model: String,
}

impl OllamaService {
    pub fn new(config: &GenerationConfig) -> Result<Self, GenerationError> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| GenerationError::invalid_request(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            endpoint: format!("{}/api/generate", config.base_url.trim_end_matches('/')),
            model: config.model.clone(),
        })
    }

    fn translate_request<'a>(&'a self, request: &'a NarrativeRequest) -> GenerateRequest<'a> {
        GenerateRequest {
            model: &self.model,
            prompt: &request.prompt,
            context: &request.context,
            temperature: request.temperature,
            max_tokens: request.max_tokens,
            stream: false,
        }
    }

    fn classify_error(status: reqwest::StatusCode, body: &str) -> GenerationError {
        match status.as_u16() {
            401 | 403 => GenerationError::auth(format!("Authentication failed: {body}")),
            429 => GenerationError::rate_limit(format!("Rate limited: {body}")),
            400..=499 => GenerationError::invalid_request(format!("Invalid request ({status}): {body}")),
            500..=599 => GenerationError::server_error(format!("Server error ({status}): {body}")),
            _ => GenerationError::malformed(format!("Unexpected HTTP {status}: {body}")),
        }
    }

    fn normalize_response(body: &str) -> Result<NarrativeResponse, GenerationError> {
        let parsed: GenerateResponse = serde_json::from_str(body)
            .map_err(|e| GenerationError::malformed(format!("Failed to parse response: {e}")))?;

        let text = parsed.response.trim();
        if text.is_empty() {
            return Err(GenerationError::malformed("Backend returned empty narration"));
        }

        Ok(NarrativeResponse {
            text: text.to_string(),
            done: parsed.done,
        })
    }
}

#[async_trait]
impl NarrativeService for OllamaService {
    async fn generate(&self, request: &NarrativeRequest) -> Result<NarrativeResponse, GenerationError> {
        let body = self.translate_request(request);

        let response = self
            .client
            .post(&self.endpoint)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    GenerationError::timeout(format!("Request timeout: {e}"))
                } else if e.is_connect() {
                    GenerationError::network(format!("Connection failed: {e}"))
                } else {
                    GenerationError::network(format!("Request failed: {e}"))
                }
            })?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| GenerationError::network(format!("Failed to read response: {e}")))?;

        if !status.is_success() {
            return Err(Self::classify_error(status, &text));
        }

        Self::normalize_response(&text)
    }

    fn model_id(&self) -> &str {
        &self.model
    }
}

// ============================================================================
// Wire types
// ============================================================================

#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    context: &'a NarrativeContext,
    temperature: f32,
    max_tokens: u32,
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    response: String,
    #[serde(default)]
    done: bool,
}
