//! Engine configuration
//!
//! Read once from the environment in `main` and passed down explicitly.

use std::time::Duration;

/// Connection and retry settings for the generation backend
#[derive(Debug, Clone)]
pub struct GenerationConfig {
    /// Base endpoint, e.g. `http://localhost:11434`
    pub base_url: String,
    pub model: String,
    /// Hard deadline for one call
    pub timeout: Duration,
    pub retry: RetryPolicy,
    pub temperature: f32,
    pub max_tokens: u32,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:11434".to_string(),
            model: "llama3".to_string(),
            timeout: Duration::from_secs(10),
            retry: RetryPolicy::default(),
            temperature: 0.8,
            max_tokens: 300,
        }
    }
}

/// Exponential backoff between generation attempts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the initial attempt
    pub max_retries: u32,
    /// Delay before the first retry; each later retry waits 4x longer
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            base_delay: Duration::from_millis(200),
        }
    }
}

impl RetryPolicy {
    const FACTOR: u32 = 4;

    /// Total attempts including the first
    pub fn max_attempts(&self) -> u32 {
        self.max_retries + 1
    }

    /// Delay before `attempt` (2 = first retry). Attempt 1 has no delay.
    pub fn delay_before(&self, attempt: u32) -> Duration {
        if attempt <= 1 {
            return Duration::ZERO;
        }
        let exponent = attempt - 2;
        self.base_delay
            .saturating_mul(Self::FACTOR.saturating_pow(exponent))
    }
}

/// Lifecycle settings for sessions
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Sessions with no command for this long are evicted
    pub idle_timeout: Duration,
    /// Length of the bounded action history
    pub history_limit: usize,
    /// Save a snapshot every N completed commands; 0 disables
    pub checkpoint_interval: u32,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            idle_timeout: Duration::from_secs(30 * 60),
            history_limit: 20,
            checkpoint_interval: 10,
        }
    }
}

/// Everything the binary needs
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub port: u16,
    pub db_path: String,
    pub generation: GenerationConfig,
    pub session: SessionConfig,
}

impl EngineConfig {
    pub fn from_env() -> Self {
        let generation_defaults = GenerationConfig::default();
        let session_defaults = SessionConfig::default();

        let db_path = std::env::var("STORYLOOM_DB_PATH").unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            format!("{home}/.storyloom/storyloom.db")
        });

        Self {
            port: env_parse("STORYLOOM_PORT").unwrap_or(8000),
            db_path,
            generation: GenerationConfig {
                base_url: std::env::var("GENERATION_BASE_URL")
                    .unwrap_or(generation_defaults.base_url),
                model: std::env::var("GENERATION_MODEL").unwrap_or(generation_defaults.model),
                timeout: env_parse("GENERATION_TIMEOUT_MS")
                    .map_or(generation_defaults.timeout, Duration::from_millis),
                retry: RetryPolicy {
                    max_retries: env_parse("GENERATION_MAX_RETRIES")
                        .unwrap_or(generation_defaults.retry.max_retries),
                    base_delay: env_parse("GENERATION_BACKOFF_MS")
                        .map_or(generation_defaults.retry.base_delay, Duration::from_millis),
                },
                temperature: env_parse("GENERATION_TEMPERATURE")
                    .unwrap_or(generation_defaults.temperature),
                max_tokens: env_parse("GENERATION_MAX_TOKENS")
                    .unwrap_or(generation_defaults.max_tokens),
            },
            session: SessionConfig {
                idle_timeout: env_parse("SESSION_IDLE_TIMEOUT_SECS")
                    .map_or(session_defaults.idle_timeout, Duration::from_secs),
                history_limit: env_parse("SESSION_HISTORY_LIMIT")
                    .unwrap_or(session_defaults.history_limit),
                checkpoint_interval: env_parse("SESSION_CHECKPOINT_INTERVAL")
                    .unwrap_or(session_defaults.checkpoint_interval),
            },
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.parse().ok())
}
