use std::time::Duration;

use async_trait::async_trait;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use thiserror::Error;
use tokio::time::sleep;
use tracing::warn;

use crate::config::RetryPolicy;

const DEFAULT_MODEL: &str = "gpt-4o-mini";
const DEFAULT_API_ENDPOINT: &str = "https://api.openai.com/v1";
const DEFAULT_TIMEOUT_MS: u64 = 60_000;

#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub api_key: Option<String>,
    pub model: String,
    pub api_endpoint: String,
    pub timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct GenerateOptions {
    /// Overrides the configured model when set.
    pub model: Option<String>,
    pub temperature: f64,
    pub timeout_ms: Option<u64>,
}

impl Default for GenerateOptions {
    fn default() -> Self {
        Self {
            model: None,
            temperature: 0.7,
            timeout_ms: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChatResponse {
    pub model: Option<String>,
    pub choices: Vec<ChatChoice>,
    pub usage: Option<Usage>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChatChoice {
    pub message: ChatMessage,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Usage {
    pub prompt_tokens: Option<i64>,
    pub completion_tokens: Option<i64>,
    pub total_tokens: Option<i64>,
}

#[derive(Debug, Clone)]
pub struct Completion {
    pub content: String,
    pub usage: Option<Usage>,
}

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("LLM not configured: {0}")]
    NotConfigured(&'static str),
    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("rate limited: {body}")]
    RateLimited { body: String },
    #[error("request timed out")]
    Timeout,
    #[error("HTTP {status}: {body}")]
    ServerError { status: u16, body: String },
    #[error("HTTP {status}: {body}")]
    HttpStatus { status: u16, body: String },
    #[error("JSON decode failed: {0}")]
    Json(#[from] serde_json::Error),
    #[error("empty response")]
    EmptyChoices,
    #[error("retries exhausted after {attempts} attempts")]
    RetryExhausted {
        attempts: u32,
        #[source]
        last: Box<LlmError>,
    },
}

impl LlmError {
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::RateLimited { .. } | Self::Timeout | Self::ServerError { .. } | Self::Transport(_)
        )
    }
}

/// Seam for the text-generation collaborator so hosts and tests can swap the
/// backend without touching the engine.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    async fn generate(
        &self,
        system: &str,
        user: &str,
        options: &GenerateOptions,
    ) -> Result<Completion, LlmError>;
}

/// Structured-JSON variant: prompts for a JSON document and deserializes it,
/// tolerating markdown code fences around the payload.
pub async fn generate_structured<T: DeserializeOwned>(
    generator: &dyn TextGenerator,
    system: &str,
    user: &str,
    options: &GenerateOptions,
) -> Result<T, LlmError> {
    let completion = generator.generate(system, user, options).await?;
    parse_structured(&completion.content)
}

pub fn parse_structured<T: DeserializeOwned>(content: &str) -> Result<T, LlmError> {
    let trimmed = strip_code_fences(content);
    serde_json::from_str(trimmed).map_err(LlmError::Json)
}

fn strip_code_fences(content: &str) -> &str {
    let trimmed = content.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let rest = rest.strip_prefix("json").unwrap_or(rest);
    rest.trim_start_matches(['\r', '\n'])
        .strip_suffix("```")
        .unwrap_or(rest)
        .trim()
}

/// OpenAI-compatible chat client with bounded exponential backoff for the
/// retryable failure classes (rate limit, timeout, transient server error).
#[derive(Clone)]
pub struct LlmProvider {
    config: LlmConfig,
    retry: RetryPolicy,
    client: reqwest::Client,
}

impl LlmProvider {
    pub fn new(config: LlmConfig, retry: RetryPolicy) -> Self {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            config,
            retry,
            client,
        }
    }

    pub fn from_env(retry: RetryPolicy) -> Self {
        let api_key = env_string("LLM_API_KEY");
        let model = env_string("LLM_MODEL").unwrap_or_else(|| DEFAULT_MODEL.to_string());
        let api_endpoint = normalize_endpoint(
            env_string("LLM_API_ENDPOINT").unwrap_or_else(|| DEFAULT_API_ENDPOINT.to_string()),
        );
        let timeout = Duration::from_millis(env_u64("LLM_TIMEOUT").unwrap_or(DEFAULT_TIMEOUT_MS));

        Self::new(
            LlmConfig {
                api_key,
                model,
                api_endpoint,
                timeout,
            },
            retry,
        )
    }

    pub fn is_available(&self) -> bool {
        self.config
            .api_key
            .as_deref()
            .is_some_and(|v| !v.trim().is_empty())
            && !self.config.model.trim().is_empty()
            && !self.config.api_endpoint.trim().is_empty()
    }

    async fn chat_once(
        &self,
        messages: &[ChatMessage],
        options: &GenerateOptions,
    ) -> Result<Completion, LlmError> {
        let api_key = self
            .config
            .api_key
            .as_deref()
            .filter(|v| !v.trim().is_empty())
            .ok_or(LlmError::NotConfigured("LLM_API_KEY"))?;

        let url = format!(
            "{}/chat/completions",
            self.config.api_endpoint.trim_end_matches('/')
        );
        let model = options.model.as_deref().unwrap_or(&self.config.model);
        let payload = serde_json::json!({
            "model": model,
            "messages": messages,
            "temperature": options.temperature,
            "stream": false
        });

        let mut request = self.client.post(&url).bearer_auth(api_key).json(&payload);
        if let Some(timeout_ms) = options.timeout_ms {
            request = request.timeout(Duration::from_millis(timeout_ms));
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                LlmError::Timeout
            } else {
                LlmError::Transport(e)
            }
        })?;

        let status = response.status();
        if status.is_success() {
            let parsed: ChatResponse = serde_json::from_slice(&response.bytes().await?)?;
            let content = parsed
                .choices
                .first()
                .map(|c| c.message.content.clone())
                .ok_or(LlmError::EmptyChoices)?;
            return Ok(Completion {
                content,
                usage: parsed.usage,
            });
        }

        let body = response.text().await.unwrap_or_default();
        Err(classify_status(status.as_u16(), body))
    }

    fn backoff_for(&self, attempt: u32) -> Duration {
        let ms = self
            .retry
            .base_backoff_ms
            .saturating_mul(1u64 << attempt.min(16))
            .min(self.retry.max_backoff_ms);
        Duration::from_millis(ms)
    }
}

#[async_trait]
impl TextGenerator for LlmProvider {
    async fn generate(
        &self,
        system: &str,
        user: &str,
        options: &GenerateOptions,
    ) -> Result<Completion, LlmError> {
        let messages = [
            ChatMessage {
                role: "system".into(),
                content: system.into(),
            },
            ChatMessage {
                role: "user".into(),
                content: user.into(),
            },
        ];

        let max_attempts = self.retry.max_attempts.max(1);
        let mut last_error: Option<LlmError> = None;

        for attempt in 0..max_attempts {
            match self.chat_once(&messages, options).await {
                Ok(completion) => return Ok(completion),
                Err(err) if err.is_retryable() && attempt + 1 < max_attempts => {
                    let backoff = self.backoff_for(attempt);
                    warn!(attempt, error = %err, "LLM request failed, retrying");
                    sleep(backoff).await;
                    last_error = Some(err);
                }
                Err(err) if err.is_retryable() => {
                    return Err(LlmError::RetryExhausted {
                        attempts: max_attempts,
                        last: Box::new(err),
                    });
                }
                Err(err) => return Err(err),
            }
        }

        Err(LlmError::RetryExhausted {
            attempts: max_attempts,
            last: Box::new(last_error.unwrap_or(LlmError::EmptyChoices)),
        })
    }
}

fn classify_status(status: u16, body: String) -> LlmError {
    match status {
        429 => LlmError::RateLimited { body },
        408 => LlmError::Timeout,
        500..=599 => LlmError::ServerError { status, body },
        _ => LlmError::HttpStatus { status, body },
    }
}

fn env_string(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn env_u64(key: &str) -> Option<u64> {
    env_string(key)?.parse().ok()
}

fn normalize_endpoint(endpoint: String) -> String {
    let trimmed = endpoint.trim().trim_end_matches('/');
    if trimmed.ends_with("/v1") || trimmed.contains("/v1/") {
        trimmed.to_string()
    } else {
        format!("{trimmed}/v1")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_classes() {
        assert!(classify_status(429, String::new()).is_retryable());
        assert!(classify_status(408, String::new()).is_retryable());
        assert!(classify_status(503, String::new()).is_retryable());
        assert!(!classify_status(400, String::new()).is_retryable());
        assert!(!classify_status(401, String::new()).is_retryable());
    }

    #[test]
    fn endpoint_normalization_appends_v1_once() {
        assert_eq!(
            normalize_endpoint("https://api.example.com".into()),
            "https://api.example.com/v1"
        );
        assert_eq!(
            normalize_endpoint("https://api.example.com/v1/".into()),
            "https://api.example.com/v1"
        );
    }

    #[test]
    fn parse_structured_tolerates_code_fences() {
        #[derive(Deserialize)]
        struct Out {
            value: i32,
        }
        let plain: Out = parse_structured("{\"value\": 3}").unwrap();
        assert_eq!(plain.value, 3);
        let fenced: Out = parse_structured("```json\n{\"value\": 7}\n```").unwrap();
        assert_eq!(fenced.value, 7);
    }

    #[test]
    fn backoff_is_capped() {
        let provider = LlmProvider::new(
            LlmConfig {
                api_key: Some("k".into()),
                model: "m".into(),
                api_endpoint: "https://api.example.com/v1".into(),
                timeout: Duration::from_secs(5),
            },
            RetryPolicy {
                max_attempts: 5,
                base_backoff_ms: 200,
                max_backoff_ms: 1_000,
            },
        );
        assert_eq!(provider.backoff_for(0), Duration::from_millis(200));
        assert_eq!(provider.backoff_for(1), Duration::from_millis(400));
        assert_eq!(provider.backoff_for(10), Duration::from_millis(1_000));
    }
}
