use thiserror::Error;

#[derive(Debug, Error)]
pub enum FlowError {
    // Graph configuration errors
    #[error("Graph contains a cycle through nodes: {}", nodes.join(", "))]
    Cycle { nodes: Vec<String> },

    #[error("Edge {edge} references unknown node '{node}'")]
    DanglingEdge { edge: String, node: String },

    #[error("Duplicate node id: {0}")]
    DuplicateNode(String),

    #[error("No executor registered for node kind '{kind}' (node {node})")]
    UnknownNodeKind { node: String, kind: String },

    // Node execution errors
    #[error("Node {node} failed: {message}")]
    NodeExecution { node: String, message: String },

    #[error("Invalid configuration for node {node}: {message}")]
    NodeConfig { node: String, message: String },

    // Provider errors
    #[error("LLM request failed: {0}")]
    LlmRequest(String),

    #[error("LLM response parse error: {0}")]
    LlmParse(String),

    #[error("HTTP error: {0}")]
    Http(String),

    // Review errors
    #[error("Review rejected by user at node {0}")]
    ReviewRejected(String),

    #[error("No pending review for node {0} (suspended run lost or already resolved)")]
    UnknownReview(String),

    #[error("Node {0} does not allow its output to be edited")]
    EditNotAllowed(String),

    #[error("Invalid review decision: {0}")]
    InvalidDecision(String),

    // External backend errors
    #[error("Delegation to chat-flow platform failed: {0}")]
    Delegation(String),

    // Config errors
    #[error("Config error: {0}")]
    Config(String),

    #[error("Config file not found: {0}")]
    ConfigNotFound(String),

    // Storage errors
    #[error("Database error: {0}")]
    Database(String),

    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // JSON errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl FlowError {
    /// Whether this error stems from the graph or registry setup rather than
    /// from a node doing its work.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            FlowError::Cycle { .. }
                | FlowError::DanglingEdge { .. }
                | FlowError::DuplicateNode(_)
                | FlowError::UnknownNodeKind { .. }
                | FlowError::EditNotAllowed(_)
                | FlowError::InvalidDecision(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, FlowError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cycle_message_lists_nodes() {
        let err = FlowError::Cycle {
            nodes: vec!["a".into(), "b".into()],
        };
        assert_eq!(err.to_string(), "Graph contains a cycle through nodes: a, b");
        assert!(err.is_configuration());
    }

    #[test]
    fn execution_error_is_not_configuration() {
        let err = FlowError::NodeExecution {
            node: "llm-1".into(),
            message: "HTTP 500".into(),
        };
        assert!(!err.is_configuration());
        assert!(err.to_string().contains("llm-1"));
    }
}
