//! HTTP chat-completions client
//!
//! Every prompt is offered to the configured models in order. A model is
//! skipped when the provider reports it missing, overloaded or rate limited
//! past the retry allowance; any other failure ends the call.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::RETRY_AFTER;
use reqwest::{Client as HttpClient, StatusCode};
use tracing::{debug, info, warn};

use crate::config::LlmConfig;
use crate::error::{Error, Result};

use super::types::{Completion, Prompt, ReplyFormat, WireRequest, WireResponse};

/// Rate-limit retries against one model before falling back
const RATE_LIMIT_RETRIES: u32 = 3;

const FIRST_BACKOFF: Duration = Duration::from_secs(1);
const MAX_BACKOFF: Duration = Duration::from_secs(30);

/// Provider messages that mean "try another model"
const MODEL_FAILURE_HINTS: [&str; 6] = [
    "model not found",
    "unavailable",
    "not available",
    "no available provider",
    "overloaded",
    "capacity",
];

/// Anything that can answer a [`Prompt`].
///
/// The extractor and the research search hold an `Arc<dyn ChatCompleter>`,
/// so tests script replies without a network.
#[async_trait]
pub trait ChatCompleter: Send + Sync {
    async fn complete(&self, prompt: Prompt) -> Result<Completion>;
}

/// Client for an OpenAI-compatible `/chat/completions` endpoint
#[derive(Clone)]
pub struct LlmClient {
    http: HttpClient,
    endpoint: String,
    api_key: String,
    models: Vec<String>,
    temperature: f32,
    max_tokens: usize,
}

impl std::fmt::Debug for LlmClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LlmClient")
            .field("endpoint", &self.endpoint)
            .field("models", &self.models)
            .finish_non_exhaustive()
    }
}

impl LlmClient {
    pub fn new(config: LlmConfig, api_key: impl Into<String>) -> Result<Self> {
        let api_key = api_key.into();
        if api_key.trim().is_empty() {
            return Err(Error::LLMError("API key is required".to_string()));
        }

        let http = HttpClient::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        let mut models = vec![config.default_model];
        for model in config.fallback_models {
            if !models.contains(&model) {
                models.push(model);
            }
        }

        Ok(Self {
            http,
            endpoint: format!("{}/chat/completions", config.base_url.trim_end_matches('/')),
            api_key,
            models,
            temperature: config.temperature,
            max_tokens: config.max_tokens,
        })
    }

    /// Models in the order they are tried
    pub fn models(&self) -> &[String] {
        &self.models
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// One model, retrying while the provider asks us to slow down
    async fn ask_model(&self, model: &str, prompt: &Prompt) -> Result<Completion> {
        let mut retries = 0;
        loop {
            match self.post_once(model, prompt).await {
                Err(Error::RateLimited(secs)) if retries < RATE_LIMIT_RETRIES => {
                    retries += 1;
                    let wait = backoff(retries, secs);
                    warn!(
                        model,
                        retry = retries,
                        wait_ms = wait.as_millis() as u64,
                        "Rate limited by provider"
                    );
                    tokio::time::sleep(wait).await;
                }
                outcome => return outcome,
            }
        }
    }

    async fn post_once(&self, model: &str, prompt: &Prompt) -> Result<Completion> {
        let body = WireRequest::new(model, prompt, self.temperature, self.max_tokens);
        debug!(
            model,
            json_mode = prompt.format == ReplyFormat::JsonObject,
            prompt_chars = prompt.user.len(),
            "Posting chat completion"
        );

        let response = self
            .http
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .header("X-Title", "graphfactory")
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let retry_after = response
                .headers()
                .get(RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.trim().parse::<u64>().ok());
            let text = response.text().await.unwrap_or_default();
            return Err(status_error(status, retry_after, &text));
        }

        let wire: WireResponse = response
            .json()
            .await
            .map_err(|e| Error::LLMError(format!("Unreadable completion from {model}: {e}")))?;

        wire.into_completion(model)
            .ok_or_else(|| Error::LLMError(format!("{model} returned no choices")))
    }
}

#[async_trait]
impl ChatCompleter for LlmClient {
    async fn complete(&self, prompt: Prompt) -> Result<Completion> {
        let mut last_failure = None;

        for model in &self.models {
            match self.ask_model(model, &prompt).await {
                Ok(completion) => {
                    if completion.truncated {
                        warn!(model = %completion.model, "Completion stopped at the token limit");
                    }
                    info!(model = %completion.model, tokens = completion.tokens, "Completion received");
                    return Ok(completion);
                }
                Err(e) if moves_to_next_model(&e) => {
                    warn!(model = %model, error = %e, "Model failed, falling back");
                    last_failure = Some(e);
                }
                Err(e) => return Err(e),
            }
        }

        Err(last_failure
            .unwrap_or_else(|| Error::NoSuitableModel("no models configured".to_string())))
    }
}

/// Map a non-success HTTP status to a crate error
fn status_error(status: StatusCode, retry_after: Option<u64>, body: &str) -> Error {
    match status.as_u16() {
        401 | 403 => Error::LLMError(
            "Provider rejected the API key. Set GRAPHFACTORY_API_KEY or OPENROUTER_API_KEY."
                .to_string(),
        ),
        402 => Error::LLMError("Provider account has insufficient credits".to_string()),
        404 => Error::LLMError(format!("Model not found: {body}")),
        429 => Error::RateLimited(retry_after.or_else(|| retry_after_in_body(body)).unwrap_or(60)),
        500..=599 => Error::LLMError(format!("Provider unavailable ({status}): {body}")),
        _ => Error::LLMError(format!("Provider returned {status}: {body}")),
    }
}

fn moves_to_next_model(err: &Error) -> bool {
    match err {
        Error::RateLimited(_) => true,
        Error::LLMError(msg) => {
            let msg = msg.to_lowercase();
            MODEL_FAILURE_HINTS.iter().any(|hint| msg.contains(hint))
        }
        _ => false,
    }
}

/// Doubling delay per retry, at least what the provider asked for, capped
fn backoff(retry: u32, suggested_secs: u64) -> Duration {
    let doubled = FIRST_BACKOFF.saturating_mul(1u32 << retry.saturating_sub(1).min(16));
    doubled.max(Duration::from_secs(suggested_secs)).min(MAX_BACKOFF)
}

/// OpenRouter puts `retry_after` either at the top level or under `error`
fn retry_after_in_body(body: &str) -> Option<u64> {
    let json: serde_json::Value = serde_json::from_str(body).ok()?;
    json.get("retry_after")
        .or_else(|| json.pointer("/error/retry_after"))
        .and_then(|v| v.as_u64())
}
