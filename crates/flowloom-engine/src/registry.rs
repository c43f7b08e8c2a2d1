use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use serde_json::{Map, Value};

use flowloom_core::config::AppConfig;
use flowloom_core::error::{FlowError, Result};
use flowloom_core::traits::LlmClient;

use crate::context::ExecutionContext;
use crate::graph::Node;

/// What a node executor produced.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeOutput {
    pub value: Value,
    /// Set when the executor wants a human to confirm `value` before it is
    /// committed.
    pub review: Option<ReviewRequest>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReviewRequest {
    pub message: String,
    pub allow_edit: bool,
    pub timeout_seconds: Option<u64>,
}

impl NodeOutput {
    pub fn new(value: impl Into<Value>) -> Self {
        Self {
            value: value.into(),
            review: None,
        }
    }

    pub fn with_review(mut self, review: ReviewRequest) -> Self {
        self.review = Some(review);
        self
    }
}

/// Logic behind one node kind.
pub trait NodeExecutor: Send + Sync + 'static {
    /// Primary kind tag.
    fn kind(&self) -> &str;

    /// Other tags resolving to this executor.
    fn aliases(&self) -> &'static [&'static str] {
        &[]
    }

    /// Upper bound on one invocation.
    fn timeout_secs(&self) -> u64 {
        300
    }

    /// Produce the node's output from its gathered inputs.
    fn execute<'a>(
        &'a self,
        node: &'a Node,
        inputs: Map<String, Value>,
        ctx: &'a mut ExecutionContext,
    ) -> BoxFuture<'a, Result<NodeOutput>>;
}

/// Maps node kinds to executors. Shared read-only between runs.
pub struct NodeRegistry {
    executors: HashMap<String, Arc<dyn NodeExecutor>>,
}

impl NodeRegistry {
    pub fn new() -> Self {
        Self {
            executors: HashMap::new(),
        }
    }

    /// Register an executor under its kind and all of its aliases.
    pub fn register(&mut self, executor: impl NodeExecutor) {
        self.register_arc(Arc::new(executor));
    }

    pub fn register_arc(&mut self, executor: Arc<dyn NodeExecutor>) {
        self.executors
            .insert(executor.kind().to_string(), executor.clone());
        for alias in executor.aliases() {
            self.executors.insert(alias.to_string(), executor.clone());
        }
    }

    /// Get an executor by kind or alias.
    pub fn get(&self, kind: &str) -> Option<Arc<dyn NodeExecutor>> {
        self.executors.get(kind).cloned()
    }

    pub fn contains(&self, kind: &str) -> bool {
        self.executors.contains_key(kind)
    }

    /// List all registered kinds and aliases, sorted.
    pub fn list(&self) -> Vec<&str> {
        let mut kinds: Vec<&str> = self.executors.keys().map(|s| s.as_str()).collect();
        kinds.sort_unstable();
        kinds
    }

    /// Resolve the executor for a node.
    pub fn resolve(&self, node: &Node) -> Result<Arc<dyn NodeExecutor>> {
        self.get(&node.kind).ok_or_else(|| FlowError::UnknownNodeKind {
            node: node.id.clone(),
            kind: node.kind.clone(),
        })
    }

    /// Run a node's executor under its timeout.
    pub async fn execute(
        &self,
        node: &Node,
        inputs: Map<String, Value>,
        ctx: &mut ExecutionContext,
    ) -> Result<NodeOutput> {
        let executor = self.resolve(node)?;
        let timeout = Duration::from_secs(executor.timeout_secs());

        match tokio::time::timeout(timeout, executor.execute(node, inputs, ctx)).await {
            Ok(result) => result,
            Err(_) => Err(FlowError::NodeExecution {
                node: node.id.clone(),
                message: format!("timed out after {}s", executor.timeout_secs()),
            }),
        }
    }

    /// Create a registry with every built-in node kind.
    pub fn with_builtins(llm: Arc<dyn LlmClient>, config: &AppConfig) -> Self {
        let mut registry = Self::new();
        crate::nodes::register_builtins(&mut registry, llm, config);
        registry
    }
}

impl Default for NodeRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flowloom_core::types::SessionId;
    use flowloom_llm::OfflineClient;

    struct Echo;

    impl NodeExecutor for Echo {
        fn kind(&self) -> &str {
            "echo"
        }

        fn aliases(&self) -> &'static [&'static str] {
            &["repeat"]
        }

        fn execute<'a>(
            &'a self,
            _node: &'a Node,
            inputs: Map<String, Value>,
            _ctx: &'a mut ExecutionContext,
        ) -> BoxFuture<'a, Result<NodeOutput>> {
            Box::pin(async move { Ok(NodeOutput::new(Value::Object(inputs))) })
        }
    }

    struct Slow;

    impl NodeExecutor for Slow {
        fn kind(&self) -> &str {
            "slow"
        }

        fn timeout_secs(&self) -> u64 {
            1
        }

        fn execute<'a>(
            &'a self,
            _node: &'a Node,
            _inputs: Map<String, Value>,
            _ctx: &'a mut ExecutionContext,
        ) -> BoxFuture<'a, Result<NodeOutput>> {
            Box::pin(async move {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(NodeOutput::new(Value::Null))
            })
        }
    }

    fn ctx() -> ExecutionContext {
        ExecutionContext::new(SessionId::from_str("s"), Value::Null)
    }

    #[test]
    fn test_aliases_resolve_to_same_executor() {
        let mut registry = NodeRegistry::new();
        registry.register(Echo);
        assert!(registry.contains("echo"));
        assert!(registry.contains("repeat"));
        assert_eq!(registry.list(), vec!["echo", "repeat"]);
    }

    #[tokio::test]
    async fn test_unknown_kind() {
        let registry = NodeRegistry::new();
        let node = Node::new("n1", "mystery");
        let err = registry.execute(&node, Map::new(), &mut ctx()).await.unwrap_err();
        assert!(matches!(err, FlowError::UnknownNodeKind { ref kind, .. } if kind == "mystery"));
        assert!(err.is_configuration());
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout() {
        let mut registry = NodeRegistry::new();
        registry.register(Slow);
        let node = Node::new("n1", "slow");
        let err = registry.execute(&node, Map::new(), &mut ctx()).await.unwrap_err();
        assert!(err.to_string().contains("timed out"));
    }

    #[test]
    fn test_builtins_cover_document_kinds() {
        let registry = NodeRegistry::with_builtins(Arc::new(OfflineClient::new()), &AppConfig::default());
        for kind in [
            "start", "chatInput", "end", "chatOutput", "promptTemplate", "llm", "chatOpenAI",
            "azureChatOpenAI", "openAI", "memory", "setVariable", "getVariable", "vectorStore",
            "vectorstore", "retriever", "tool", "httpRequest", "humanReview", "condition",
            "ifElse", "forEach", "transform", "documentLoader", "code", "customFunction",
            "passthrough",
        ] {
            assert!(registry.contains(kind), "missing {}", kind);
        }
    }
}
