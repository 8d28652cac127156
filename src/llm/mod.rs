//! AI text-analysis collaborator
//!
//! The trend analyzer and the content-quality factor of the scorer talk to a
//! text generator through [`TextGenerator`]. The production implementation
//! is an Ollama client; tests plug in scripted generators.
//!
//! All calls must go through the retry executor, so the client itself does
//! not retry. It only classifies failures into [`LlmError`] variants that the
//! executor understands.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tokio::time::Instant;

use crate::error::{ErrorCategory, PolycastErrorTrait};

/// Errors returned by a text generator
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("request timed out: {0}")]
    Timeout(String),

    #[error("rate limited: {0}")]
    RateLimited(String),

    #[error("service unavailable: {0}")]
    Unavailable(String),

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("invalid response: {0}")]
    InvalidResponse(String),

    #[error("request failed: {0}")]
    Request(String),
}

impl PolycastErrorTrait for LlmError {
    fn category(&self) -> ErrorCategory {
        match self {
            Self::Timeout(_) | Self::RateLimited(_) | Self::Unavailable(_) => {
                ErrorCategory::Transient
            }
            Self::Unauthorized(_) => ErrorCategory::Permanent,
            Self::InvalidResponse(_) => ErrorCategory::Assessment,
            Self::Request(_) => ErrorCategory::Other,
        }
    }

    fn code(&self) -> &'static str {
        match self {
            Self::Timeout(_) => "timeout",
            Self::RateLimited(_) => "rate_limited",
            Self::Unavailable(_) => "unavailable",
            Self::Unauthorized(_) => "unauthorized",
            Self::InvalidResponse(_) => "invalid_response",
            Self::Request(_) => "request",
        }
    }
}

impl From<reqwest::Error> for LlmError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            Self::Timeout(e.to_string())
        } else if e.is_connect() {
            Self::Unavailable(e.to_string())
        } else if e.is_decode() {
            Self::InvalidResponse(e.to_string())
        } else {
            Self::Request(e.to_string())
        }
    }
}

/// Classify a non-success HTTP status
fn status_error(status: StatusCode, body: &str) -> LlmError {
    let snippet: String = body.chars().take(200).collect();
    let detail = format!("{status} - {snippet}");
    match status {
        StatusCode::TOO_MANY_REQUESTS => LlmError::RateLimited(detail),
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => LlmError::Unauthorized(detail),
        StatusCode::REQUEST_TIMEOUT | StatusCode::GATEWAY_TIMEOUT => LlmError::Timeout(detail),
        s if s.is_server_error() => LlmError::Unavailable(detail),
        _ => LlmError::Request(detail),
    }
}

/// Something that turns a prompt into text
#[async_trait]
pub trait TextGenerator: Send + Sync {
    /// Name used for breaker keys and logs
    fn name(&self) -> &str;

    /// Complete a prompt
    async fn complete(&self, prompt: &str) -> Result<String, LlmError>;
}

/// Configuration for the Ollama client
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    /// Disable to run every factor on heuristics
    pub enabled: bool,

    /// Ollama endpoint URL (default: http://localhost:11434)
    pub endpoint: String,

    /// Model name to use
    pub model: String,

    /// Request timeout in seconds
    pub timeout_secs: u64,

    /// Maximum tokens to generate
    pub max_tokens: u32,

    /// Temperature for generation (0.0 - 1.0)
    pub temperature: f32,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            endpoint: "http://localhost:11434".to_string(),
            model: "qwen2.5:7b".to_string(),
            timeout_secs: 60,
            max_tokens: 1024,
            temperature: 0.1,
        }
    }
}

impl LlmConfig {
    /// Create config from environment variables
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            enabled: std::env::var("POLYCAST_LLM_ENABLED")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.enabled),
            endpoint: std::env::var("OLLAMA_ENDPOINT").unwrap_or(defaults.endpoint),
            model: std::env::var("OLLAMA_MODEL").unwrap_or(defaults.model),
            timeout_secs: std::env::var("OLLAMA_TIMEOUT")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.timeout_secs),
            max_tokens: std::env::var("OLLAMA_MAX_TOKENS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.max_tokens),
            temperature: std::env::var("OLLAMA_TEMPERATURE")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.temperature),
        }
    }
}

/// Ollama generate request
#[derive(Debug, Serialize)]
struct OllamaRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
    options: OllamaOptions,
}

/// Ollama generation options
#[derive(Debug, Serialize)]
struct OllamaOptions {
    temperature: f32,
    num_predict: u32,
}

/// Ollama generate response
#[derive(Debug, Deserialize)]
struct OllamaResponse {
    response: String,
}

/// Ollama-backed text generator
pub struct OllamaClient {
    client: Client,
    config: LlmConfig,
}

impl OllamaClient {
    /// Create a new client with custom config
    pub fn with_config(config: LlmConfig) -> Result<Self, LlmError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| LlmError::Request(format!("failed to create HTTP client: {e}")))?;

        Ok(Self { client, config })
    }

    pub fn config(&self) -> &LlmConfig {
        &self.config
    }

    /// Check if Ollama answers at all
    pub async fn is_available(&self) -> bool {
        let url = format!("{}/api/tags", self.config.endpoint);
        matches!(self.client.get(&url).send().await, Ok(r) if r.status().is_success())
    }
}

#[async_trait]
impl TextGenerator for OllamaClient {
    fn name(&self) -> &str {
        "ollama"
    }

    async fn complete(&self, prompt: &str) -> Result<String, LlmError> {
        let url = format!("{}/api/generate", self.config.endpoint);

        let request = OllamaRequest {
            model: &self.config.model,
            prompt,
            stream: false,
            options: OllamaOptions {
                temperature: self.config.temperature,
                num_predict: self.config.max_tokens,
            },
        };

        let response = self.client.post(&url).json(&request).send().await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(status_error(status, &body));
        }

        let parsed: OllamaResponse = response
            .json()
            .await
            .map_err(|e| LlmError::InvalidResponse(e.to_string()))?;

        if parsed.response.trim().is_empty() {
            return Err(LlmError::InvalidResponse("empty completion".to_string()));
        }

        Ok(parsed.response)
    }
}

/// Switch that recovery actions flip to force heuristic scoring for a while
#[derive(Debug, Default)]
pub struct AiAvailability {
    forced_until: RwLock<Option<Instant>>,
}

impl AiAvailability {
    pub fn new() -> Self {
        Self::default()
    }

    /// Force fallback paths for the given duration
    pub async fn force_fallback(&self, duration: Duration) {
        let until = Instant::now() + duration;
        let mut forced = self.forced_until.write().await;
        // never shorten an existing window
        if forced.map_or(true, |current| current < until) {
            *forced = Some(until);
        }
        tracing::warn!(
            duration_secs = duration.as_secs(),
            "AI collaborator forced into fallback mode"
        );
    }

    pub async fn is_fallback_forced(&self) -> bool {
        matches!(*self.forced_until.read().await, Some(until) if Instant::now() < until)
    }

    pub async fn clear(&self) {
        *self.forced_until.write().await = None;
    }
}

/// Extract a JSON object or array from an LLM completion
///
/// Accepts fenced code blocks (```json or bare ```), or the outermost
/// `{...}` / `[...]` span of the raw text.
pub fn extract_json(text: &str) -> Option<&str> {
    if let Some(start) = text.find("```json") {
        let body = &text[start + 7..];
        if let Some(end) = body.find("```") {
            return Some(body[..end].trim());
        }
    }

    if let Some(start) = text.find("```") {
        let after = &text[start + 3..];
        let content_start = after.find('\n').map_or(0, |i| i + 1);
        if let Some(end) = after[content_start..].find("```") {
            return Some(after[content_start..content_start + end].trim());
        }
    }

    let object = text.find('{').zip(text.rfind('}'));
    let array = text.find('[').zip(text.rfind(']'));

    let span = match (object, array) {
        (Some(o), Some(a)) => Some(if a.0 < o.0 { a } else { o }),
        (o, a) => o.or(a),
    };

    match span {
        Some((start, end)) if end > start => Some(&text[start..=end]),
        _ => None,
    }
}
