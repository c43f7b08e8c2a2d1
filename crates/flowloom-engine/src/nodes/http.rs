use std::time::Duration;

use futures::future::BoxFuture;
use reqwest::Method;
use serde_json::{json, Map, Value};
use tracing::debug;

use flowloom_core::error::{FlowError, Result};

use crate::context::ExecutionContext;
use crate::graph::Node;
use crate::registry::{NodeExecutor, NodeOutput};

/// Calls an HTTP API with the `input` handle as the JSON body.
///
/// `toolType = "api"` (the default) with `apiEndpoint` set performs the call;
/// any other configuration returns a mock `{message, input}` record.
pub struct ToolNode {
    http: reqwest::Client,
    timeout_secs: u64,
}

impl ToolNode {
    pub fn new(timeout_secs: u64) -> Self {
        Self {
            http: reqwest::Client::new(),
            timeout_secs,
        }
    }
}

fn http_err(node: &Node, message: impl std::fmt::Display) -> FlowError {
    FlowError::NodeExecution {
        node: node.id.clone(),
        message: FlowError::Http(message.to_string()).to_string(),
    }
}

impl NodeExecutor for ToolNode {
    fn kind(&self) -> &str {
        "tool"
    }

    fn aliases(&self) -> &'static [&'static str] {
        &["httpRequest"]
    }

    fn timeout_secs(&self) -> u64 {
        self.timeout_secs + 5
    }

    fn execute<'a>(
        &'a self,
        node: &'a Node,
        mut inputs: Map<String, Value>,
        ctx: &'a mut ExecutionContext,
    ) -> BoxFuture<'a, Result<NodeOutput>> {
        Box::pin(async move {
            let input = inputs.remove("input").unwrap_or(Value::Null);
            let tool_type = node.config_str("toolType").unwrap_or("api");
            ctx.log(format!("[Tool] {}: {}", node.display_name(), tool_type));

            let endpoint = match (tool_type, node.config_str("apiEndpoint")) {
                ("api", Some(endpoint)) => endpoint,
                _ => {
                    return Ok(NodeOutput::new(json!({
                        "message": "Tool executed (mock)",
                        "input": input,
                    })))
                }
            };

            let method_name = node.config_str("method").unwrap_or("POST").to_uppercase();
            let method = Method::from_bytes(method_name.as_bytes()).map_err(|_| FlowError::NodeConfig {
                node: node.id.clone(),
                message: format!("invalid HTTP method '{}'", method_name),
            })?;

            debug!(node_id = %node.id, method = %method, url = %endpoint, "Tool HTTP call");

            let mut request = self
                .http
                .request(method.clone(), endpoint)
                .timeout(Duration::from_secs(self.timeout_secs));
            if method != Method::GET {
                request = request.json(&input);
            }

            let response = request.send().await.map_err(|e| {
                ctx.log(format!("[Tool] {}: API call failed", node.display_name()));
                http_err(node, e)
            })?;

            let status = response.status();
            let body = response.text().await.map_err(|e| http_err(node, e))?;
            if !status.is_success() {
                return Err(http_err(node, format!("HTTP {}: {}", status, body)));
            }

            let output = serde_json::from_str(&body).unwrap_or(Value::String(body));
            Ok(NodeOutput::new(output))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flowloom_core::types::SessionId;

    #[tokio::test]
    async fn test_mock_without_endpoint() {
        let node = ToolNode::new(5);
        let mut inputs = Map::new();
        inputs.insert("input".into(), json!({"q": 1}));
        let mut ctx = ExecutionContext::new(SessionId::from_str("s"), Value::Null);
        let out = node
            .execute(&Node::new("t", "tool"), inputs, &mut ctx)
            .await
            .unwrap();
        assert_eq!(out.value["message"], "Tool executed (mock)");
        assert_eq!(out.value["input"], json!({"q": 1}));
    }

    #[tokio::test]
    async fn test_invalid_method() {
        let node = ToolNode::new(5);
        let cfg = Node::new("t", "httpRequest")
            .with_config("apiEndpoint", "http://127.0.0.1:9/")
            .with_config("method", "NOT A METHOD");
        let mut ctx = ExecutionContext::new(SessionId::from_str("s"), Value::Null);
        let err = node.execute(&cfg, Map::new(), &mut ctx).await.unwrap_err();
        assert!(matches!(err, FlowError::NodeConfig { .. }));
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_fails_node() {
        let node = ToolNode::new(2);
        let cfg = Node::new("t", "tool").with_config("apiEndpoint", "http://127.0.0.1:9/");
        let mut ctx = ExecutionContext::new(SessionId::from_str("s"), Value::Null);
        let err = node.execute(&cfg, Map::new(), &mut ctx).await.unwrap_err();
        assert!(matches!(err, FlowError::NodeExecution { ref node, .. } if node == "t"));
        assert!(ctx.logs.iter().any(|l| l.contains("API call failed")));
    }
}
