//! OpenAI-compatible chat completions adapter.

use std::error::Error as _;
use std::time::Duration;

use async_trait::async_trait;
use domain::{
    ChatMessage, Completion, CompletionRequest, HiveError, LlmProvider, ModelName, ProviderName,
    Usage,
};
use reqwest::header::{HeaderMap, RETRY_AFTER};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, warn};

use crate::config::ProviderConfig;

/// Longest provider error body kept in an error message.
const MAX_ERROR_BODY: usize = 512;

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
    #[serde(default)]
    usage: Option<ChatUsage>,
    #[serde(default)]
    model: Option<String>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatResponseMessage,
}

#[derive(Deserialize)]
struct ChatResponseMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Deserialize)]
struct ChatUsage {
    prompt_tokens: i64,
    completion_tokens: i64,
}

/// [`LlmProvider`] for any server speaking the OpenAI chat completions API.
///
/// Performs exactly one HTTP call per [`complete`](LlmProvider::complete);
/// retries are the engine's job.
#[derive(Debug)]
pub struct OpenAiCompatibleProvider {
    client: Client,
    config: ProviderConfig,
}

impl OpenAiCompatibleProvider {
    pub fn new(config: ProviderConfig) -> Result<Self, HiveError> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| HiveError::configuration(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { client, config })
    }

    pub fn config(&self) -> &ProviderConfig {
        &self.config
    }

    pub fn default_model(&self) -> &ModelName {
        &self.config.default_model
    }
}

#[async_trait]
impl LlmProvider for OpenAiCompatibleProvider {
    fn name(&self) -> &ProviderName {
        &self.config.name
    }

    #[instrument(skip(self, request), fields(provider = %self.config.name, model = %request.model))]
    async fn complete(&self, request: &CompletionRequest) -> Result<Completion, HiveError> {
        let body = ChatRequest {
            model: request.model.as_str(),
            messages: &request.messages,
            temperature: request.temperature,
            max_tokens: request.max_tokens,
        };

        debug!(messages = request.messages.len(), "Sending chat completion");
        let response = self
            .client
            .post(self.config.completions_url())
            .bearer_auth(&self.config.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| transport_error(&self.config.name, &e))?;

        let status = response.status();
        let headers = response.headers().clone();
        let text = response
            .text()
            .await
            .map_err(|e| transport_error(&self.config.name, &e))?;

        if !status.is_success() {
            let error = status_error(&self.config.name, status, &headers, &text);
            warn!(status = status.as_u16(), "Provider returned an error status");
            return Err(error);
        }

        decode_completion(&self.config.name, &request.model, &text)
    }
}

/// Maps a failed send or body read.
fn transport_error(provider: &ProviderName, error: &reqwest::Error) -> HiveError {
    if error.is_timeout() {
        return HiveError::Timeout {
            operation: "chat completion".to_string(),
        };
    }
    HiveError::Api {
        provider: provider.clone(),
        status: error.status().map(|s| s.as_u16()),
        message: error_chain(error),
        retry_after: None,
    }
}

/// The error and all of its sources, so transport signatures such as
/// "connection reset" stay visible to retry classification.
fn error_chain(error: &reqwest::Error) -> String {
    let mut message = error.to_string();
    let mut source = error.source();
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}

/// Maps a non-success response.
fn status_error(
    provider: &ProviderName,
    status: StatusCode,
    headers: &HeaderMap,
    body: &str,
) -> HiveError {
    HiveError::Api {
        provider: provider.clone(),
        status: Some(status.as_u16()),
        message: error_message(status, body),
        retry_after: retry_after(headers),
    }
}

/// Prefers the OpenAI `{"error": {"message": ...}}` shape, else the raw body.
fn error_message(status: StatusCode, body: &str) -> String {
    let structured = serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| v["error"]["message"].as_str().map(str::to_string));
    let message = structured.unwrap_or_else(|| body.trim().to_string());
    if message.is_empty() {
        return status
            .canonical_reason()
            .unwrap_or("empty error response")
            .to_string();
    }
    truncate(message, MAX_ERROR_BODY)
}

fn truncate(mut text: String, max: usize) -> String {
    if text.len() > max {
        let mut end = max;
        while !text.is_char_boundary(end) {
            end -= 1;
        }
        text.truncate(end);
        text.push_str("...");
    }
    text
}

/// `Retry-After` in delta-seconds form. HTTP-date values are ignored.
fn retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<f64>()
        .ok()
        .filter(|secs| secs.is_finite() && *secs >= 0.0)
        .map(Duration::from_secs_f64)
}

fn decode_completion(
    provider: &ProviderName,
    requested: &ModelName,
    body: &str,
) -> Result<Completion, HiveError> {
    let invalid = |message: String| HiveError::Api {
        provider: provider.clone(),
        status: None,
        message,
        retry_after: None,
    };
    let response: ChatResponse = serde_json::from_str(body)
        .map_err(|e| invalid(format!("invalid completion response: {e}")))?;
    let choice = response
        .choices
        .into_iter()
        .next()
        .ok_or_else(|| invalid("completion response contained no choices".to_string()))?;

    let usage = match response.usage {
        Some(u) => Usage::new(u.prompt_tokens, u.completion_tokens),
        None => {
            warn!("Completion response carried no usage; recording zero tokens");
            Usage::default()
        }
    };
    let model = response
        .model
        .and_then(ModelName::new)
        .unwrap_or_else(|| requested.clone());

    Ok(Completion {
        content: choice.message.content.unwrap_or_default(),
        model,
        usage,
        cached: false,
    })
}
