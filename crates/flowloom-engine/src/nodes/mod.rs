//! Built-in node executors.

pub mod code;
pub mod document;
pub mod http;
pub mod io;
pub mod llm;
pub mod logic;
pub mod memory;
pub mod prompt;
pub mod retrieval;
pub mod review;

use std::sync::Arc;

use serde_json::{Map, Value};

use flowloom_core::config::AppConfig;
use flowloom_core::traits::LlmClient;

use crate::context::ExecutionContext;
use crate::graph::DEFAULT_HANDLE;
use crate::registry::NodeRegistry;

/// Register every built-in kind on `registry`.
pub fn register_builtins(registry: &mut NodeRegistry, llm: Arc<dyn LlmClient>, config: &AppConfig) {
    // ── Flow boundaries ─────────────────────────────────────
    registry.register(io::StartNode);
    registry.register(io::EndNode);
    registry.register(io::PassthroughNode);

    // ── Language model ──────────────────────────────────────
    registry.register(prompt::PromptTemplateNode);
    registry.register(llm::LlmNode::new(llm, config.model.clone()));

    // ── State ───────────────────────────────────────────────
    registry.register(memory::MemoryNode);
    registry.register(memory::SetVariableNode);
    registry.register(memory::GetVariableNode);
    registry.register(retrieval::VectorStoreNode);

    // ── Control ─────────────────────────────────────────────
    registry.register(review::HumanReviewNode);
    registry.register(logic::ConditionNode);
    registry.register(logic::ForEachNode);
    registry.register(logic::TransformNode);

    // ── External ────────────────────────────────────────────
    registry.register(http::ToolNode::new(config.tools.http_timeout_secs));
    registry.register(document::DocumentLoaderNode::new(config.tools.document_max_length));
    registry.register(code::CodeNode::new(config.tools.code_timeout_secs));
}

/// Loose truthiness: null, false, zero and empty strings are false.
pub(crate) fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

/// First truthy value among the given handles.
pub(crate) fn first_truthy<'a>(inputs: &'a Map<String, Value>, handles: &[&str]) -> Option<&'a Value> {
    handles
        .iter()
        .filter_map(|h| inputs.get(*h))
        .find(|v| is_truthy(v))
}

/// The `input` handle if it carries anything, else the run input.
pub(crate) fn input_or_run<'a>(inputs: &'a Map<String, Value>, ctx: &'a ExecutionContext) -> &'a Value {
    first_truthy(inputs, &[DEFAULT_HANDLE]).unwrap_or(&ctx.input)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_truthiness() {
        assert!(!is_truthy(&json!(null)));
        assert!(!is_truthy(&json!("")));
        assert!(!is_truthy(&json!(0)));
        assert!(is_truthy(&json!("0")));
        assert!(is_truthy(&json!([])));
        assert!(is_truthy(&json!({})));
    }

    #[test]
    fn test_first_truthy_skips_empty_handles() {
        let mut inputs = Map::new();
        inputs.insert("input".into(), json!(""));
        inputs.insert("prompt".into(), json!("ask"));
        assert_eq!(first_truthy(&inputs, &["input", "prompt"]), Some(&json!("ask")));
    }
}
