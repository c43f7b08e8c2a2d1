use futures::future::BoxFuture;

use crate::config::ModelConfig;
use crate::error::Result;
use crate::types::ChatMessage;

/// LLM client. One chat completion per call.
pub trait LlmClient: Send + Sync + 'static {
    /// Provider name, used in trace lines.
    fn name(&self) -> &str;

    /// Send a chat request and return the assistant's text.
    fn complete(
        &self,
        config: &ModelConfig,
        messages: Vec<ChatMessage>,
    ) -> BoxFuture<'_, Result<String>>;
}
