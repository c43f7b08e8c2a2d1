use futures::future::BoxFuture;
use serde_json::{Map, Value};

use flowloom_core::error::Result;
use flowloom_core::types::value_to_text;

use crate::context::ExecutionContext;
use crate::graph::Node;
use crate::registry::{NodeExecutor, NodeOutput};

/// Fills `{handle}` placeholders in `config.template` from the node's inputs;
/// any `{input}` left over takes the run input.
pub struct PromptTemplateNode;

impl NodeExecutor for PromptTemplateNode {
    fn kind(&self) -> &str {
        "promptTemplate"
    }

    fn aliases(&self) -> &'static [&'static str] {
        &["prompt"]
    }

    fn execute<'a>(
        &'a self,
        node: &'a Node,
        inputs: Map<String, Value>,
        ctx: &'a mut ExecutionContext,
    ) -> BoxFuture<'a, Result<NodeOutput>> {
        Box::pin(async move {
            let template = node
                .config_str("template")
                .or_else(|| node.config_str("systemMessage"))
                .unwrap_or("");
            let rendered = render(template, &inputs, &ctx.input);
            ctx.log(format!("[PromptTemplate] {}: template applied", node.display_name()));
            Ok(NodeOutput::new(rendered))
        })
    }
}

pub(crate) fn render(template: &str, inputs: &Map<String, Value>, run_input: &Value) -> String {
    let mut text = template.to_string();
    for (handle, value) in inputs {
        text = text.replace(&format!("{{{}}}", handle), &value_to_text(value));
    }
    text.replace("{input}", &value_to_text(run_input))
}
