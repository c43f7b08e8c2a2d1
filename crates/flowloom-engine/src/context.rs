use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use flowloom_core::types::SessionId;

use crate::graph::Edge;

/// Mutable state of one run.
///
/// Owned by the executor while the run is active. When the run suspends the
/// whole context is handed to the caller, who passes it back on resume.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionContext {
    pub session_id: SessionId,
    /// The value the run was started with.
    pub input: Value,
    /// Node id to output, in completion order. Never shrinks during a run.
    #[serde(default)]
    pub node_outputs: Map<String, Value>,
    /// Free-form scratchpad shared by all nodes of the run.
    #[serde(default)]
    pub memory: Map<String, Value>,
    #[serde(default)]
    pub logs: Vec<String>,
    #[serde(default)]
    pub node_execution_logs: Vec<NodeExecutionLog>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pending_review: Option<PendingReview>,
    /// Node id to error text for nodes whose executor failed.
    #[serde(default)]
    pub failed_nodes: Map<String, Value>,
    /// Every node that finished (output or failure), in the order it finished.
    #[serde(default)]
    pub completion_order: Vec<String>,
}

/// Structured trace record for one node.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeExecutionLog {
    pub node_id: String,
    pub node_name: String,
    pub node_kind: String,
    /// Input handles the node received.
    #[serde(default)]
    pub inputs: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
    pub execution_time_ms: u64,
    pub status: NodeStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeStatus {
    Success,
    Error,
    PendingReview,
    Skipped,
}

/// A tentative output awaiting a human decision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingReview {
    pub node_id: String,
    pub output: Value,
    pub message: String,
    pub allow_edit: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_seconds: Option<u64>,
}

impl ExecutionContext {
    pub fn new(session_id: SessionId, input: Value) -> Self {
        Self {
            session_id,
            input,
            node_outputs: Map::new(),
            memory: Map::new(),
            logs: Vec::new(),
            node_execution_logs: Vec::new(),
            pending_review: None,
            failed_nodes: Map::new(),
            completion_order: Vec::new(),
        }
    }

    /// Append a human-readable trace line.
    pub fn log(&mut self, line: impl Into<String>) {
        self.logs.push(line.into());
    }

    pub fn output_of(&self, node_id: &str) -> Option<&Value> {
        self.node_outputs.get(node_id)
    }

    pub fn record_output(&mut self, node_id: &str, output: Value) {
        self.node_outputs.insert(node_id.to_string(), output);
        self.mark_finished(node_id);
    }

    pub fn record_failure(&mut self, node_id: &str, error: &str) {
        self.failed_nodes
            .insert(node_id.to_string(), Value::String(error.to_string()));
        self.mark_finished(node_id);
    }

    fn mark_finished(&mut self, node_id: &str) {
        self.completion_order.retain(|id| id != node_id);
        self.completion_order.push(node_id.to_string());
    }

    /// Position of `node_id` in completion order; later finishers rank higher.
    pub fn completion_rank(&self, node_id: &str) -> Option<usize> {
        self.completion_order.iter().position(|id| id == node_id)
    }

    /// Whether execution has reached an edge's target through it. Ordinary
    /// edges are reached once their source finished, even if it failed and
    /// delivers nothing; error routes only when their source failed.
    pub fn edge_is_reached(&self, edge: &Edge) -> bool {
        if edge.is_error_path() {
            self.failed_nodes.contains_key(&edge.source)
        } else {
            self.completion_rank(&edge.source).is_some()
        }
    }

    /// The value an edge delivers, if it is live.
    pub fn edge_value(&self, edge: &Edge) -> Option<Value> {
        if edge.is_error_path() {
            self.failed_nodes.get(&edge.source).map(|error| {
                serde_json::json!({ "nodeId": edge.source, "error": error })
            })
        } else {
            self.node_outputs.get(&edge.source).cloned()
        }
    }

    /// Collect a node's inputs from its incoming edges.
    ///
    /// When several edges fill the same handle, the source that finished last
    /// wins, regardless of edge declaration order.
    pub fn gather_inputs<'a>(
        &self,
        incoming: impl IntoIterator<Item = &'a Edge>,
    ) -> Map<String, Value> {
        let mut live: Vec<(usize, &Edge, Value)> = incoming
            .into_iter()
            .filter_map(|edge| {
                let value = self.edge_value(edge)?;
                let rank = self.completion_rank(&edge.source).unwrap_or(0);
                Some((rank, edge, value))
            })
            .collect();
        live.sort_by_key(|(rank, _, _)| *rank);

        let mut inputs = Map::new();
        for (_, edge, value) in live {
            inputs.insert(edge.input_handle().to_string(), value);
        }
        inputs
    }
}
