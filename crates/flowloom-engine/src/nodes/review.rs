use futures::future::BoxFuture;
use serde_json::{Map, Value};

use flowloom_core::error::Result;

use crate::context::ExecutionContext;
use crate::graph::Node;
use crate::registry::{NodeExecutor, NodeOutput, ReviewRequest};

pub const HUMAN_REVIEW_KIND: &str = "humanReview";
const DEFAULT_REVIEW_MESSAGE: &str = "Please review this output";

/// Build the review request a node declares through its `humanReview` block,
/// if that block is enabled.
pub fn declared_review(node: &Node) -> Option<ReviewRequest> {
    if !node.review_enabled() {
        return None;
    }
    let review = node.human_review.as_ref()?;
    Some(ReviewRequest {
        message: review
            .message
            .clone()
            .unwrap_or_else(|| DEFAULT_REVIEW_MESSAGE.to_string()),
        allow_edit: review.allow_edit,
        timeout_seconds: review.timeout_seconds,
    })
}

/// Pauses the run on its input until a human approves, edits or rejects it.
///
/// A `humanReview` block decides on its own: enabled always suspends, disabled
/// passes through. Without a block, `config.enabled = false` turns the node
/// into a passthrough.
pub struct HumanReviewNode;

impl NodeExecutor for HumanReviewNode {
    fn kind(&self) -> &str {
        HUMAN_REVIEW_KIND
    }

    fn execute<'a>(
        &'a self,
        node: &'a Node,
        mut inputs: Map<String, Value>,
        ctx: &'a mut ExecutionContext,
    ) -> BoxFuture<'a, Result<NodeOutput>> {
        Box::pin(async move {
            let value = inputs.remove("input").unwrap_or(Value::Null);
            let block = node.human_review.as_ref();
            let enabled = match block {
                Some(review) => review.enabled,
                None => node.config_bool("enabled") != Some(false),
            };

            if !enabled {
                let name = node.display_name();
                ctx.log(format!("[HumanReview] {}: review disabled, passing through", name));
                return Ok(NodeOutput::new(value));
            }

            let request = ReviewRequest {
                message: node
                    .config_str("message")
                    .map(str::to_string)
                    .or_else(|| block.and_then(|r| r.message.clone()))
                    .unwrap_or_else(|| DEFAULT_REVIEW_MESSAGE.to_string()),
                allow_edit: node
                    .config_bool("allowEdit")
                    .or_else(|| block.map(|r| r.allow_edit))
                    .unwrap_or(true),
                timeout_seconds: node
                    .config_u64("timeoutSeconds")
                    .or_else(|| block.and_then(|r| r.timeout_seconds)),
            };

            ctx.log(format!("[HumanReview] {}: awaiting review", node.display_name()));
            Ok(NodeOutput::new(value).with_review(request))
        })
    }
}
