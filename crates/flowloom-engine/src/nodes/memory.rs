use futures::future::BoxFuture;
use serde_json::{Map, Value};

use flowloom_core::error::{FlowError, Result};
use flowloom_core::types::{value_to_text, ChatMessage};

use super::{first_truthy, is_truthy};
use crate::context::ExecutionContext;
use crate::graph::Node;
use crate::registry::{NodeExecutor, NodeOutput};

fn default_window() -> u64 { 10 }

/// Windowed conversation history kept in run memory.
///
/// Keeps the last `2 * windowSize` entries under `memory_<session>`.
pub struct MemoryNode;

impl NodeExecutor for MemoryNode {
    fn kind(&self) -> &str {
        "memory"
    }

    fn execute<'a>(
        &'a self,
        node: &'a Node,
        inputs: Map<String, Value>,
        ctx: &'a mut ExecutionContext,
    ) -> BoxFuture<'a, Result<NodeOutput>> {
        Box::pin(async move {
            let session = node
                .config_str("sessionId")
                .map(str::to_string)
                .unwrap_or_else(|| ctx.session_id.to_string());
            let key = format!("memory_{}", session);

            let mut history = match ctx.memory.get(&key) {
                Some(Value::Array(items)) => items.clone(),
                _ => Vec::new(),
            };

            let input = inputs.get("input").cloned().unwrap_or(Value::Null);
            if is_truthy(&input) {
                history.push(serde_json::to_value(ChatMessage::user(value_to_text(&input)))?);

                let window = node.config_u64("windowSize").unwrap_or_else(default_window) as usize;
                let keep = window * 2;
                if history.len() > keep {
                    history.drain(..history.len() - keep);
                }
                ctx.memory.insert(key, Value::Array(history.clone()));
            }

            ctx.log(format!("[Memory] {}: {} entries", node.display_name(), history.len()));
            Ok(NodeOutput::new(serde_json::json!({
                "history": history,
                "input": input,
            })))
        })
    }
}

fn variable_name(node: &Node) -> Result<&str> {
    node.config_str("name").ok_or_else(|| FlowError::NodeConfig {
        node: node.id.clone(),
        message: "missing 'name'".into(),
    })
}

/// Stores `config.value` (or the `input` handle) under `config.name` in run memory.
pub struct SetVariableNode;

impl NodeExecutor for SetVariableNode {
    fn kind(&self) -> &str {
        "setVariable"
    }

    fn execute<'a>(
        &'a self,
        node: &'a Node,
        inputs: Map<String, Value>,
        ctx: &'a mut ExecutionContext,
    ) -> BoxFuture<'a, Result<NodeOutput>> {
        Box::pin(async move {
            let name = variable_name(node)?;
            let value = node
                .config
                .get("value")
                .or_else(|| first_truthy(&inputs, &["input"]))
                .cloned()
                .unwrap_or(Value::Null);
            ctx.memory.insert(name.to_string(), value.clone());
            ctx.log(format!("[SetVariable] {}: {} set", node.display_name(), name));
            Ok(NodeOutput::new(value))
        })
    }
}

/// Reads `config.name` from run memory, falling back to `config.default`.
pub struct GetVariableNode;

impl NodeExecutor for GetVariableNode {
    fn kind(&self) -> &str {
        "getVariable"
    }

    fn execute<'a>(
        &'a self,
        node: &'a Node,
        _inputs: Map<String, Value>,
        ctx: &'a mut ExecutionContext,
    ) -> BoxFuture<'a, Result<NodeOutput>> {
        Box::pin(async move {
            let name = variable_name(node)?;
            let value = ctx
                .memory
                .get(name)
                .or_else(|| node.config.get("default"))
                .cloned()
                .unwrap_or(Value::Null);
            ctx.log(format!("[GetVariable] {}: {} read", node.display_name(), name));
            Ok(NodeOutput::new(value))
        })
    }
}
