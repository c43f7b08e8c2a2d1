//! Flow graph model.
//!
//! A flow is a set of typed `Node`s joined by directed `Edge`s. Each edge
//! carries its source's output into a named input handle on its target.
//! The graph must be a DAG; `FlowGraph::validate` rejects duplicate ids,
//! edges that point at unknown nodes, and cycles before anything executes.

pub mod edge;
pub mod node;

use std::collections::HashSet;
use std::path::Path;

use serde::{Deserialize, Serialize};

use flowloom_core::error::{FlowError, Result};

pub use edge::{Edge, DEFAULT_HANDLE, ERROR_HANDLE};
pub use node::{HumanReviewConfig, Node};

/// Nodes and edges of one flow, in document order.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FlowGraph {
    #[serde(default)]
    pub nodes: Vec<Node>,
    #[serde(default)]
    pub edges: Vec<Edge>,
}

impl FlowGraph {
    pub fn new(nodes: Vec<Node>, edges: Vec<Edge>) -> Self {
        Self { nodes, edges }
    }

    pub fn node(&self, id: &str) -> Option<&Node> {
        self.nodes.iter().find(|n| n.id == id)
    }

    /// Edges whose target is `id`, in document order.
    pub fn incoming<'a>(&'a self, id: &'a str) -> impl Iterator<Item = &'a Edge> + 'a {
        self.edges.iter().filter(move |e| e.target == id)
    }

    /// Edges whose source is `id`, in document order.
    pub fn outgoing<'a>(&'a self, id: &'a str) -> impl Iterator<Item = &'a Edge> + 'a {
        self.edges.iter().filter(move |e| e.source == id)
    }

    /// Whether a failure of `id` has somewhere to go.
    pub fn has_error_path(&self, id: &str) -> bool {
        self.outgoing(id).any(Edge::is_error_path)
    }

    /// Check ids, edge endpoints and acyclicity.
    pub fn validate(&self) -> Result<()> {
        self.validate_structure()?;
        crate::scheduler::execution_order(self).map(|_| ())
    }

    /// Duplicate ids and dangling edges; cycles are left to the scheduler.
    pub fn validate_structure(&self) -> Result<()> {
        let mut seen = HashSet::with_capacity(self.nodes.len());
        for node in &self.nodes {
            if !seen.insert(node.id.as_str()) {
                return Err(FlowError::DuplicateNode(node.id.clone()));
            }
        }

        for edge in &self.edges {
            for endpoint in [&edge.source, &edge.target] {
                if !seen.contains(endpoint.as_str()) {
                    return Err(FlowError::DanglingEdge {
                        edge: edge.label(),
                        node: endpoint.clone(),
                    });
                }
            }
        }
        Ok(())
    }
}

/// A flow document as stored on disk.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FlowDefinition {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Chat-flow id on the external platform, when this flow is mirrored there.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chatflow_id: Option<String>,
    #[serde(flatten)]
    pub graph: FlowGraph,
}

impl FlowDefinition {
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Load a flow document from a JSON file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_json(&content)
    }
}
