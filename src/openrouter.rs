//! OpenRouter (OpenAI-compatible) chat completion client.

use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::config::LlmConfig;
use crate::error::PipelineError;

const SERVICE: &str = "LLM service";

/// Chat completion client. Cheap to clone; the inner `reqwest::Client` is
/// reference counted.
#[derive(Clone)]
pub struct OpenRouterClient {
    client: Client,
    api_key: String,
    config: LlmConfig,
}

impl OpenRouterClient {
    pub fn new(client: Client, config: LlmConfig, api_key: impl Into<String>) -> Self {
        Self {
            client,
            api_key: api_key.into(),
            config,
        }
    }

    pub fn model(&self) -> &str {
        &self.config.model
    }

    /// Send a chat completion request and return the first choice's text.
    ///
    /// Transport failures map to `Network`, an unparseable body to
    /// `ResponseFormat`, and anything the provider itself reports (non-2xx
    /// status, an `error` object, an empty completion) to `ServiceReported`.
    pub async fn chat(&self, messages: Vec<Message>) -> Result<String, PipelineError> {
        let request = ChatCompletionRequest {
            model: self.config.model.clone(),
            messages,
            max_tokens: Some(self.config.max_tokens),
        };

        debug!("Sending request to OpenRouter: model={}", request.model);

        let mut builder = self
            .client
            .post(&self.config.endpoint)
            .bearer_auth(&self.api_key)
            .json(&request);
        if let Some(secs) = self.config.timeout_secs {
            builder = builder.timeout(Duration::from_secs(secs));
        }

        let response = builder
            .send()
            .await
            .map_err(|e| PipelineError::network(SERVICE, e))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| PipelineError::network(SERVICE, e))?;

        if !status.is_success() {
            warn!("OpenRouter API error ({})", status);
            let detail = provider_error_message(&body).unwrap_or(body);
            return Err(PipelineError::ServiceReported(format!(
                "LLM service error ({}): {}",
                status, detail
            )));
        }

        let response: ChatCompletionResponse = serde_json::from_str(&body)
            .map_err(|_| PipelineError::response_format(SERVICE, body.clone()))?;

        if let Some(error) = response.error {
            return Err(PipelineError::ServiceReported(error.message));
        }

        if let Some(usage) = &response.usage {
            info!(
                "OpenRouter response: {} tokens (prompt: {}, completion: {})",
                usage.total_tokens, usage.prompt_tokens, usage.completion_tokens
            );
        }

        let content = response
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .unwrap_or_default();

        if content.trim().is_empty() {
            return Err(PipelineError::ServiceReported(
                "the model returned an empty response".to_string(),
            ));
        }

        Ok(content)
    }
}

fn provider_error_message(body: &str) -> Option<String> {
    serde_json::from_str::<ChatCompletionResponse>(body)
        .ok()
        .and_then(|r| r.error)
        .map(|e| e.message)
}

// ============================================================================
// Request/Response types
// ============================================================================

#[derive(Debug, Serialize)]
struct ChatCompletionRequest {
    model: String,
    messages: Vec<Message>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    #[serde(default)]
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Option<Usage>,
    #[serde(default)]
    error: Option<ProviderError>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Usage {
    prompt_tokens: u32,
    completion_tokens: u32,
    total_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct ProviderError {
    message: String,
}

// ============================================================================
// Message types
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

/// Only user turns are sent: every correction is a fresh conversation.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
}

impl Message {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }
}
