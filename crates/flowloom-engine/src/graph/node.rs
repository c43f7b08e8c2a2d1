use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A node in a flow graph.
///
/// `kind` selects the executor from the [`NodeRegistry`](crate::registry::NodeRegistry);
/// `config` is handed to that executor untouched.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Node {
    /// Unique identifier within the graph.
    pub id: String,
    /// Executor tag, e.g. `llm` or `promptTemplate`.
    #[serde(rename = "type")]
    pub kind: String,
    /// Display name used in trace lines.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(default)]
    pub config: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub human_review: Option<HumanReviewConfig>,
}

/// Per-node human review settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HumanReviewConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_true")]
    pub allow_edit: bool,
    /// Advisory only; enforced by the suspension store sweep.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_seconds: Option<u64>,
    #[serde(default, alias = "approvalMessage", skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

fn default_true() -> bool { true }

impl HumanReviewConfig {
    /// Review enabled, edits allowed, no timeout.
    pub fn new() -> Self {
        Self {
            enabled: true,
            allow_edit: true,
            timeout_seconds: None,
            message: None,
        }
    }

    pub fn with_allow_edit(mut self, allow: bool) -> Self {
        self.allow_edit = allow;
        self
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn with_timeout(mut self, seconds: u64) -> Self {
        self.timeout_seconds = Some(seconds);
        self
    }
}

impl Default for HumanReviewConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl Node {
    /// Create a node with an empty config.
    pub fn new(id: impl Into<String>, kind: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind: kind.into(),
            label: None,
            config: Map::new(),
            human_review: None,
        }
    }

    /// Set the display label.
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    /// Set a single config entry.
    pub fn with_config(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.config.insert(key.into(), value.into());
        self
    }

    /// Attach human review settings.
    pub fn with_review(mut self, review: HumanReviewConfig) -> Self {
        self.human_review = Some(review);
        self
    }

    /// Label if set, otherwise the id.
    pub fn display_name(&self) -> &str {
        self.label.as_deref().unwrap_or(&self.id)
    }

    /// Whether the node itself declares an enabled review step.
    pub fn review_enabled(&self) -> bool {
        self.human_review.as_ref().is_some_and(|r| r.enabled)
    }

    pub fn config_str(&self, key: &str) -> Option<&str> {
        self.config.get(key).and_then(Value::as_str)
    }

    pub fn config_f64(&self, key: &str) -> Option<f64> {
        self.config.get(key).and_then(Value::as_f64)
    }

    pub fn config_u64(&self, key: &str) -> Option<u64> {
        self.config.get(key).and_then(Value::as_u64)
    }

    pub fn config_bool(&self, key: &str) -> Option<bool> {
        self.config.get(key).and_then(Value::as_bool)
    }
}
