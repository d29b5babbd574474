//! Narrative generation backend abstraction
//!
//! Provides a common interface for text-generation services.

mod error;
mod ollama;
mod types;

pub use error::{GenerationError, GenerationErrorKind};
pub use ollama::OllamaService;
pub use types::*;

use async_trait::async_trait;
use std::sync::Arc;

/// Common interface for generation backends
#[async_trait]
pub trait NarrativeService: Send + Sync {
    /// Generate narration for one request
    async fn generate(&self, request: &NarrativeRequest) -> Result<NarrativeResponse, GenerationError>;

    /// Get the model ID
    fn model_id(&self) -> &str;
}

/// Logging wrapper for generation services
pub struct LoggingService {
    inner: Arc<dyn NarrativeService>,
    model_id: String,
}

impl LoggingService {
    pub fn new(inner: Arc<dyn NarrativeService>) -> Self {
        let model_id = inner.model_id().to_string();
        Self { inner, model_id }
    }
}

#[async_trait]
impl NarrativeService for LoggingService {
    async fn generate(&self, request: &NarrativeRequest) -> Result<NarrativeResponse, GenerationError> {
        let start = std::time::Instant::now();
        let result = self.inner.generate(request).await;
        let duration = start.elapsed();

        match &result {
            Ok(response) => {
                tracing::info!(
                    model = %self.model_id,
                    duration_ms = %duration.as_millis(),
                    chars = response.text.len(),
                    "Generation completed"
                );
            }
            Err(e) => {
                tracing::error!(
                    model = %self.model_id,
                    duration_ms = %duration.as_millis(),
                    error = %e.message,
                    kind = %e.kind,
                    retryable = e.kind.is_retryable(),
                    "Generation failed"
                );
            }
        }

        result
    }

    fn model_id(&self) -> &str {
        &self.model_id
    }
}
