use futures::future::BoxFuture;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use flowloom_core::config::ModelConfig;
use flowloom_core::error::{FlowError, Result};
use flowloom_core::traits::LlmClient;
use flowloom_core::types::ChatMessage;

const OPENAI_API_URL: &str = "https://api.openai.com/v1/chat/completions";

/// OpenAI-compatible client. Works with OpenAI, Ollama, vLLM, Groq, OpenRouter, etc.
pub struct OpenAiClient {
    http: Client,
}

impl OpenAiClient {
    pub fn new() -> Self {
        Self {
            http: Client::new(),
        }
    }
}

impl Default for OpenAiClient {
    fn default() -> Self {
        Self::new()
    }
}

// Request types
#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<OaiMessage>,
    max_tokens: u32,
    temperature: f32,
}

#[derive(Serialize, Debug, PartialEq)]
pub(crate) struct OaiMessage {
    role: String,
    content: String,
}

// Response types
#[derive(Deserialize, Debug)]
pub(crate) struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize, Debug)]
struct ChatChoice {
    message: ChoiceMessage,
}

#[derive(Deserialize, Debug)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

pub(crate) fn convert_messages(messages: Vec<ChatMessage>) -> Vec<OaiMessage> {
    messages
        .into_iter()
        .map(|m| OaiMessage {
            role: m.role.as_str().to_string(),
            content: m.content,
        })
        .collect()
}

/// Extract the first choice's text; an empty choice list yields an empty string.
pub(crate) fn extract_text(response: ChatResponse) -> String {
    response
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.message.content)
        .unwrap_or_default()
}

/// Send a chat completion request and decode the response body.
pub(crate) async fn send_chat(request: reqwest::RequestBuilder) -> Result<String> {
    let response = request
        .send()
        .await
        .map_err(|e| FlowError::LlmRequest(e.to_string()))?;

    if !response.status().is_success() {
        let status = response.status();
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| "unknown".to_string());
        return Err(FlowError::LlmRequest(format!("HTTP {}: {}", status, body)));
    }

    let parsed: ChatResponse = response
        .json()
        .await
        .map_err(|e| FlowError::LlmParse(e.to_string()))?;
    Ok(extract_text(parsed))
}

impl LlmClient for OpenAiClient {
    fn name(&self) -> &str {
        "openai"
    }

    fn complete(
        &self,
        config: &ModelConfig,
        messages: Vec<ChatMessage>,
    ) -> BoxFuture<'_, Result<String>> {
        let config = config.clone();

        Box::pin(async move {
            let url = config.base_url.as_deref().unwrap_or(OPENAI_API_URL);
            let body = ChatRequest {
                model: &config.model_id,
                messages: convert_messages(messages),
                max_tokens: config.max_tokens,
                temperature: config.temperature,
            };

            debug!(model = %config.model_id, url = %url, "Sending chat completion");

            let mut request = self
                .http
                .post(url)
                .header("content-type", "application/json")
                .json(&body);
            if let Some(key) = config.api_key.as_deref() {
                request = request.bearer_auth(key);
            }

            send_chat(request).await
        })
    }
}
