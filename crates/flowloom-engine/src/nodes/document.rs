use futures::future::BoxFuture;
use serde_json::{json, Map, Value};

use flowloom_core::error::{FlowError, Result};
use flowloom_core::types::truncate_chars;

use crate::context::ExecutionContext;
use crate::graph::Node;
use crate::registry::{NodeExecutor, NodeOutput};

/// Reads a UTF-8 text file named by `config.path` or the `input` handle.
pub struct DocumentLoaderNode {
    max_length: usize,
}

impl DocumentLoaderNode {
    pub fn new(max_length: usize) -> Self {
        Self { max_length }
    }
}

impl NodeExecutor for DocumentLoaderNode {
    fn kind(&self) -> &str {
        "documentLoader"
    }

    fn execute<'a>(
        &'a self,
        node: &'a Node,
        inputs: Map<String, Value>,
        ctx: &'a mut ExecutionContext,
    ) -> BoxFuture<'a, Result<NodeOutput>> {
        Box::pin(async move {
            let path = node
                .config_str("path")
                .or_else(|| inputs.get("input").and_then(Value::as_str))
                .ok_or_else(|| FlowError::NodeConfig {
                    node: node.id.clone(),
                    message: "no 'path' configured and no path input".into(),
                })?
                .to_string();

            let content = tokio::fs::read_to_string(&path).await.map_err(|e| FlowError::NodeExecution {
                node: node.id.clone(),
                message: format!("cannot read {}: {}", path, e),
            })?;

            let max = node
                .config_u64("maxLength")
                .map(|m| m as usize)
                .unwrap_or(self.max_length);
            let length = content.chars().count();
            let truncated = length > max;
            let content = if truncated {
                truncate_chars(&content, max)
            } else {
                content
            };

            ctx.log(format!(
                "[DocumentLoader] {}: loaded {} chars from {}",
                node.display_name(),
                length,
                path
            ));
            Ok(NodeOutput::new(json!({
                "content": content,
                "path": path,
                "length": length,
                "truncated": truncated,
            })))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flowloom_core::types::SessionId;

    #[tokio::test]
    async fn test_loads_and_truncates() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("notes.txt");
        std::fs::write(&file, "abcdefghij").unwrap();

        let node = Node::new("d", "documentLoader")
            .with_config("path", file.display().to_string())
            .with_config("maxLength", 4);
        let mut ctx = ExecutionContext::new(SessionId::from_str("s"), Value::Null);
        let out = DocumentLoaderNode::new(100)
            .execute(&node, Map::new(), &mut ctx)
            .await
            .unwrap();
        assert_eq!(out.value["content"], "abcd...");
        assert_eq!(out.value["length"], 10);
        assert_eq!(out.value["truncated"], true);
    }

    #[tokio::test]
    async fn test_missing_file_fails() {
        let node = Node::new("d", "documentLoader").with_config("path", "/nonexistent/flowloom.txt");
        let mut ctx = ExecutionContext::new(SessionId::from_str("s"), Value::Null);
        let err = DocumentLoaderNode::new(100)
            .execute(&node, Map::new(), &mut ctx)
            .await
            .unwrap_err();
        assert!(matches!(err, FlowError::NodeExecution { .. }));
    }
}
