use futures::future::BoxFuture;
use serde_json::{Map, Value};

use flowloom_core::error::Result;

use super::first_truthy;
use crate::context::ExecutionContext;
use crate::graph::{Node, DEFAULT_HANDLE};
use crate::registry::{NodeExecutor, NodeOutput};

/// Emits the run input.
pub struct StartNode;

impl NodeExecutor for StartNode {
    fn kind(&self) -> &str {
        "start"
    }

    fn aliases(&self) -> &'static [&'static str] {
        &["chatInput"]
    }

    fn execute<'a>(
        &'a self,
        node: &'a Node,
        _inputs: Map<String, Value>,
        ctx: &'a mut ExecutionContext,
    ) -> BoxFuture<'a, Result<NodeOutput>> {
        Box::pin(async move {
            ctx.log(format!("[Start] {}: input received", node.display_name()));
            Ok(NodeOutput::new(ctx.input.clone()))
        })
    }
}

/// Emits its `input` handle, or every input as an object.
pub struct EndNode;

impl NodeExecutor for EndNode {
    fn kind(&self) -> &str {
        "end"
    }

    fn aliases(&self) -> &'static [&'static str] {
        &["chatOutput"]
    }

    fn execute<'a>(
        &'a self,
        node: &'a Node,
        inputs: Map<String, Value>,
        ctx: &'a mut ExecutionContext,
    ) -> BoxFuture<'a, Result<NodeOutput>> {
        Box::pin(async move {
            ctx.log(format!("[End] {}: output ready", node.display_name()));
            Ok(NodeOutput::new(forward(inputs)))
        })
    }
}

/// Forwards its input unchanged.
pub struct PassthroughNode;

impl NodeExecutor for PassthroughNode {
    fn kind(&self) -> &str {
        "passthrough"
    }

    fn execute<'a>(
        &'a self,
        node: &'a Node,
        inputs: Map<String, Value>,
        ctx: &'a mut ExecutionContext,
    ) -> BoxFuture<'a, Result<NodeOutput>> {
        Box::pin(async move {
            ctx.log(format!("[{}] {}: passthrough", node.kind, node.display_name()));
            Ok(NodeOutput::new(forward(inputs)))
        })
    }
}

fn forward(mut inputs: Map<String, Value>) -> Value {
    if first_truthy(&inputs, &[DEFAULT_HANDLE]).is_some() {
        inputs.remove(DEFAULT_HANDLE).unwrap_or(Value::Null)
    } else {
        Value::Object(inputs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flowloom_core::types::SessionId;
    use serde_json::json;

    fn ctx() -> ExecutionContext {
        ExecutionContext::new(SessionId::from_str("s"), json!("hello"))
    }

    #[tokio::test]
    async fn test_start_emits_run_input() {
        let mut ctx = ctx();
        let node = Node::new("in", "start").with_label("Question");
        let out = StartNode.execute(&node, Map::new(), &mut ctx).await.unwrap();
        assert_eq!(out.value, json!("hello"));
        assert_eq!(ctx.logs, vec!["[Start] Question: input received"]);
    }

    #[tokio::test]
    async fn test_end_prefers_input_handle() {
        let mut inputs = Map::new();
        inputs.insert("input".into(), json!("answer"));
        inputs.insert("extra".into(), json!(1));
        let out = EndNode
            .execute(&Node::new("out", "end"), inputs, &mut ctx())
            .await
            .unwrap();
        assert_eq!(out.value, json!("answer"));
    }

    #[tokio::test]
    async fn test_end_collects_named_handles() {
        let mut inputs = Map::new();
        inputs.insert("summary".into(), json!("s"));
        inputs.insert("sources".into(), json!(["a"]));
        let out = EndNode
            .execute(&Node::new("out", "end"), inputs, &mut ctx())
            .await
            .unwrap();
        assert_eq!(out.value, json!({"summary": "s", "sources": ["a"]}));
    }
}
