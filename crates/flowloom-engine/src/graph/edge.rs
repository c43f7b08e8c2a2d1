use serde::{Deserialize, Serialize};

/// Source handle that marks an edge as a failure route.
pub const ERROR_HANDLE: &str = "error";

/// Target handle used when an edge does not name one.
pub const DEFAULT_HANDLE: &str = "input";

/// A directed edge carrying the source node's output to a target handle.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Edge {
    #[serde(default)]
    pub id: String,
    /// Source node id.
    pub source: String,
    /// Target node id.
    pub target: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_handle: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_handle: Option<String>,
}

impl Edge {
    /// Create an edge feeding the target's default `input` handle.
    pub fn new(source: impl Into<String>, target: impl Into<String>) -> Self {
        let source = source.into();
        let target = target.into();
        Self {
            id: format!("e-{}-{}", source, target),
            source,
            target,
            source_handle: None,
            target_handle: None,
        }
    }

    /// Create a failure route: active only when `source` fails.
    pub fn on_error(source: impl Into<String>, target: impl Into<String>) -> Self {
        Self::new(source, target).from_handle(ERROR_HANDLE)
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn from_handle(mut self, handle: impl Into<String>) -> Self {
        self.source_handle = Some(handle.into());
        self
    }

    pub fn to_handle(mut self, handle: impl Into<String>) -> Self {
        self.target_handle = Some(handle.into());
        self
    }

    /// Whether this edge routes the source's failure instead of its output.
    pub fn is_error_path(&self) -> bool {
        self.source_handle.as_deref() == Some(ERROR_HANDLE)
    }

    /// The handle this edge fills on its target.
    pub fn input_handle(&self) -> &str {
        self.target_handle.as_deref().unwrap_or(DEFAULT_HANDLE)
    }

    /// Identifier for error messages; falls back to `source->target`.
    pub fn label(&self) -> String {
        if self.id.is_empty() {
            format!("{}->{}", self.source, self.target)
        } else {
            self.id.clone()
        }
    }
}
