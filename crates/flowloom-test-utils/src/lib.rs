//! Mocks and graph fixtures shared by flowloom tests.

use std::collections::{HashSet, VecDeque};
use std::io::Write;
use std::sync::{Arc, Mutex};

use futures::future::BoxFuture;
use serde_json::{Map, Value};

use flowloom_core::config::{AppConfig, ModelConfig};
use flowloom_core::error::{FlowError, Result};
use flowloom_core::traits::LlmClient;
use flowloom_core::types::{value_to_text, ChatMessage};
use flowloom_engine::{
    Edge, ExecutionContext, FlowExecutor, FlowGraph, HumanReviewConfig, Node, NodeExecutor,
    NodeOutput, NodeRegistry,
};

/// LLM client returning scripted replies, then echoing the last user message.
#[derive(Clone, Default)]
pub struct MockLlmClient {
    replies: Arc<Mutex<VecDeque<Result<String>>>>,
    requests: Arc<Mutex<Vec<Vec<ChatMessage>>>>,
}

impl MockLlmClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_reply(self, text: impl Into<String>) -> Self {
        self.push(Ok(text.into()));
        self
    }

    pub fn with_error(self, message: impl Into<String>) -> Self {
        self.push(Err(FlowError::LlmRequest(message.into())));
        self
    }

    fn push(&self, reply: Result<String>) {
        if let Ok(mut replies) = self.replies.lock() {
            replies.push_back(reply);
        }
    }

    /// Every message list sent so far.
    pub fn requests(&self) -> Vec<Vec<ChatMessage>> {
        self.requests.lock().map(|r| r.clone()).unwrap_or_default()
    }
}

impl LlmClient for MockLlmClient {
    fn name(&self) -> &str {
        "mock"
    }

    fn complete(
        &self,
        _config: &ModelConfig,
        messages: Vec<ChatMessage>,
    ) -> BoxFuture<'_, Result<String>> {
        Box::pin(async move {
            let echo = messages
                .iter()
                .rev()
                .find(|m| m.role.as_str() == "user")
                .map(|m| format!("echo: {}", m.content))
                .unwrap_or_default();
            if let Ok(mut requests) = self.requests.lock() {
                requests.push(messages);
            }
            let scripted = self.replies.lock().ok().and_then(|mut r| r.pop_front());
            scripted.unwrap_or(Ok(echo))
        })
    }
}

/// Node executor for kind `record`. Emits `"{input}>{node id}"` and
/// remembers every node it ran, in order. With no `input` handle it
/// falls back to the run input.
#[derive(Clone, Default)]
pub struct RecordingExecutor {
    invocations: Arc<Mutex<Vec<String>>>,
    fail_on: HashSet<String>,
}

impl RecordingExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the node with this id fail.
    pub fn fail_on(mut self, node_id: impl Into<String>) -> Self {
        self.fail_on.insert(node_id.into());
        self
    }

    /// Node ids in invocation order.
    pub fn invocations(&self) -> Vec<String> {
        self.invocations.lock().map(|i| i.clone()).unwrap_or_default()
    }

    pub fn count(&self, node_id: &str) -> usize {
        self.invocations().iter().filter(|id| *id == node_id).count()
    }
}

impl NodeExecutor for RecordingExecutor {
    fn kind(&self) -> &str {
        "record"
    }

    fn execute<'a>(
        &'a self,
        node: &'a Node,
        inputs: Map<String, Value>,
        ctx: &'a mut ExecutionContext,
    ) -> BoxFuture<'a, Result<NodeOutput>> {
        Box::pin(async move {
            if let Ok(mut invocations) = self.invocations.lock() {
                invocations.push(node.id.clone());
            }
            if self.fail_on.contains(&node.id) {
                return Err(FlowError::NodeExecution {
                    node: node.id.clone(),
                    message: "scripted failure".into(),
                });
            }
            let upstream = inputs.get("input").unwrap_or(&ctx.input);
            Ok(NodeOutput::new(format!("{}>{}", value_to_text(upstream), node.id)))
        })
    }
}

/// Builtin registry plus `recorder`, with `llm` backing the `llm` kind.
pub fn registry_with(recorder: &RecordingExecutor, llm: MockLlmClient) -> NodeRegistry {
    let mut registry = NodeRegistry::with_builtins(Arc::new(llm), &AppConfig::default());
    registry.register(recorder.clone());
    registry
}

/// Executor over [`registry_with`] and a default mock LLM.
pub fn recording_executor(recorder: &RecordingExecutor) -> FlowExecutor {
    FlowExecutor::new(Arc::new(registry_with(recorder, MockLlmClient::new())))
}

/// `record` nodes wired in a straight line.
pub fn chain(ids: &[&str]) -> FlowGraph {
    let nodes = ids.iter().map(|id| Node::new(*id, "record")).collect();
    let edges = ids.windows(2).map(|w| Edge::new(w[0], w[1])).collect();
    FlowGraph::new(nodes, edges)
}

/// [`chain`] with a human review on `review_id`.
pub fn reviewed_chain(ids: &[&str], review_id: &str, allow_edit: bool) -> FlowGraph {
    let mut graph = chain(ids);
    for node in &mut graph.nodes {
        if node.id == review_id {
            node.human_review = Some(
                HumanReviewConfig::new()
                    .with_allow_edit(allow_edit)
                    .with_message(format!("Check {}", review_id)),
            );
        }
    }
    graph
}

/// Write a flow document to a temp file.
pub fn flow_file(document: &Value) -> tempfile::NamedTempFile {
    let mut file = tempfile::Builder::new()
        .suffix(".json")
        .tempfile()
        .expect("create temp flow file");
    file.write_all(document.to_string().as_bytes())
        .expect("write flow document");
    file
}
