use std::sync::Arc;

use futures::future::BoxFuture;
use serde_json::{Map, Value};
use tracing::debug;

use flowloom_core::config::ModelConfig;
use flowloom_core::error::{FlowError, Result};
use flowloom_core::traits::LlmClient;
use flowloom_core::types::{value_to_text, ChatMessage};

use super::first_truthy;
use crate::context::ExecutionContext;
use crate::graph::Node;
use crate::registry::{NodeExecutor, NodeOutput};

/// One chat completion.
///
/// The user message is the `input` handle, else the `prompt` handle, else the
/// run input. `systemMessage`, `temperature`, `modelName` and `maxTokens` in the
/// node config override the configured model.
pub struct LlmNode {
    client: Arc<dyn LlmClient>,
    model: ModelConfig,
}

impl LlmNode {
    pub fn new(client: Arc<dyn LlmClient>, model: ModelConfig) -> Self {
        Self { client, model }
    }

    fn model_for(&self, node: &Node) -> ModelConfig {
        let mut model = self.model.clone();
        if let Some(name) = node.config_str("modelName") {
            model.model_id = name.to_string();
        }
        if let Some(t) = node.config_f64("temperature") {
            model.temperature = t as f32;
        }
        if let Some(max) = node.config_u64("maxTokens") {
            model.max_tokens = max as u32;
        }
        model
    }
}

pub(crate) fn build_messages(system: &str, user: &str) -> Vec<ChatMessage> {
    let mut messages = Vec::with_capacity(2);
    if !system.is_empty() {
        messages.push(ChatMessage::system(system));
    }
    messages.push(ChatMessage::user(user));
    messages
}

impl NodeExecutor for LlmNode {
    fn kind(&self) -> &str {
        "llm"
    }

    fn aliases(&self) -> &'static [&'static str] {
        &["chatOpenAI", "azureChatOpenAI", "openAI"]
    }

    fn execute<'a>(
        &'a self,
        node: &'a Node,
        inputs: Map<String, Value>,
        ctx: &'a mut ExecutionContext,
    ) -> BoxFuture<'a, Result<NodeOutput>> {
        Box::pin(async move {
            let model = self.model_for(node);
            let system = node.config_str("systemMessage").unwrap_or("");
            let user = value_to_text(first_truthy(&inputs, &["input", "prompt"]).unwrap_or(&ctx.input));

            ctx.log(format!(
                "[LLM] {}: calling {} ({})",
                node.display_name(),
                self.client.name(),
                model.model_id
            ));
            debug!(node_id = %node.id, provider = %self.client.name(), model = %model.model_id, "LLM request");

            let text = self
                .client
                .complete(&model, build_messages(system, &user))
                .await
                .map_err(|e| FlowError::NodeExecution {
                    node: node.id.clone(),
                    message: e.to_string(),
                })?;

            ctx.log(format!("[LLM] {}: response received", node.display_name()));
            Ok(NodeOutput::new(text))
        })
    }
}
