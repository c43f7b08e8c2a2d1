use std::sync::OnceLock;

use futures::future::BoxFuture;
use regex::Regex;
use serde_json::{json, Map, Value};

use flowloom_core::error::{FlowError, Result};
use flowloom_core::types::value_to_text;

use super::{first_truthy, is_truthy};
use crate::context::ExecutionContext;
use crate::graph::Node;
use crate::registry::{NodeExecutor, NodeOutput};

/// Evaluates `config.condition` against the `input` handle and emits
/// `{result, value}`.
pub struct ConditionNode;

fn includes_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r#"includes\(\s*['"](.+)['"]\s*\)"#).expect("static includes() pattern")
    })
}

/// Supported forms: `== "value"` (text equality), `includes("value")`
/// (substring), anything else tests the input's truthiness.
pub fn evaluate_condition(condition: &str, input: &Value) -> bool {
    if let Some((_, right)) = condition.split_once("==") {
        let expected = right.trim().trim_matches(|c| c == '"' || c == '\'');
        return value_to_text(input) == expected;
    }
    if condition.contains("includes") {
        return includes_pattern()
            .captures(condition)
            .and_then(|caps| caps.get(1))
            .is_some_and(|needle| value_to_text(input).contains(needle.as_str()));
    }
    is_truthy(input)
}

impl NodeExecutor for ConditionNode {
    fn kind(&self) -> &str {
        "condition"
    }

    fn aliases(&self) -> &'static [&'static str] {
        &["ifElse"]
    }

    fn execute<'a>(
        &'a self,
        node: &'a Node,
        mut inputs: Map<String, Value>,
        ctx: &'a mut ExecutionContext,
    ) -> BoxFuture<'a, Result<NodeOutput>> {
        Box::pin(async move {
            let input = inputs.remove("input").unwrap_or(Value::Null);
            let condition = node.config_str("condition").unwrap_or("true");
            let result = evaluate_condition(condition, &input);
            ctx.log(format!("[Condition] {}: {}", node.display_name(), result));
            Ok(NodeOutput::new(json!({ "result": result, "value": input })))
        })
    }
}

/// Normalizes the `array` (or `input`) handle into `{items, complete}`.
pub struct ForEachNode;

impl NodeExecutor for ForEachNode {
    fn kind(&self) -> &str {
        "forEach"
    }

    fn execute<'a>(
        &'a self,
        node: &'a Node,
        inputs: Map<String, Value>,
        ctx: &'a mut ExecutionContext,
    ) -> BoxFuture<'a, Result<NodeOutput>> {
        Box::pin(async move {
            let items = match first_truthy(&inputs, &["array", "input"]) {
                Some(Value::Array(items)) => items.clone(),
                Some(other) => {
                    ctx.log(format!("[ForEach] {}: input is not an array", node.display_name()));
                    vec![other.clone()]
                }
                None => Vec::new(),
            };
            ctx.log(format!("[ForEach] {}: {} items", node.display_name(), items.len()));
            Ok(NodeOutput::new(json!({ "items": items, "complete": true })))
        })
    }
}

/// Reshapes JSON: `mode` is `parse`, `stringify` or `pointer` (with
/// `config.pointer`). Without a mode, strings are parsed when they hold JSON
/// and anything else is pretty-printed.
pub struct TransformNode;

fn transform(node: &Node, input: Value) -> Result<Value> {
    let config_err = |message: String| FlowError::NodeConfig {
        node: node.id.clone(),
        message,
    };

    match node.config_str("mode") {
        Some("parse") => {
            let text = value_to_text(&input);
            serde_json::from_str(&text).map_err(|e| FlowError::NodeExecution {
                node: node.id.clone(),
                message: format!("input is not valid JSON: {}", e),
            })
        }
        Some("stringify") => Ok(Value::String(input.to_string())),
        Some("pointer") => {
            let pointer = node
                .config_str("pointer")
                .ok_or_else(|| config_err("pointer mode needs 'pointer'".into()))?;
            Ok(input.pointer(pointer).cloned().unwrap_or(Value::Null))
        }
        Some(other) => Err(config_err(format!("unknown mode '{}'", other))),
        None => Ok(match input {
            Value::String(s) => serde_json::from_str(&s).unwrap_or(Value::String(s)),
            other => Value::String(serde_json::to_string_pretty(&other)?),
        }),
    }
}

impl NodeExecutor for TransformNode {
    fn kind(&self) -> &str {
        "transform"
    }

    fn execute<'a>(
        &'a self,
        node: &'a Node,
        mut inputs: Map<String, Value>,
        ctx: &'a mut ExecutionContext,
    ) -> BoxFuture<'a, Result<NodeOutput>> {
        Box::pin(async move {
            let input = inputs.remove("input").unwrap_or(Value::Null);
            let output = transform(node, input)?;
            ctx.log(format!(
                "[Transform] {}: {}",
                node.display_name(),
                node.config_str("mode").unwrap_or("auto")
            ));
            Ok(NodeOutput::new(output))
        })
    }
}
