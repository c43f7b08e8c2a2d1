//! Resuming suspended runs with a human decision.

use std::time::Instant;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info, warn};

use flowloom_core::error::{FlowError, Result};
use flowloom_core::event::FlowEvent;
use flowloom_core::types::{truncate_chars, value_to_text};

use crate::context::{ExecutionContext, NodeStatus};
use crate::executor::{ExecutionResult, FailureKind, FlowExecutor, RunStatus};
use crate::graph::FlowGraph;

/// What the reviewer decided about a pending output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "decision", content = "editedOutput", rename_all = "snake_case")]
pub enum ReviewDecision {
    Approve,
    Reject,
    /// Approve with a replacement output.
    Edit(Value),
}

impl ReviewDecision {
    /// Build a decision from its wire form: `approve`, `reject`, or `edit`
    /// with a replacement value.
    pub fn from_parts(decision: &str, edited: Option<Value>) -> Result<Self> {
        match (decision.trim().to_ascii_lowercase().as_str(), edited) {
            ("approve", _) => Ok(Self::Approve),
            ("reject", _) => Ok(Self::Reject),
            ("edit", Some(value)) => Ok(Self::Edit(value)),
            ("edit", None) => Err(FlowError::InvalidDecision(
                "edit requires a replacement output".into(),
            )),
            (other, _) => Err(FlowError::InvalidDecision(format!(
                "unknown decision '{}' (expected approve, reject or edit)",
                other
            ))),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Approve => "approve",
            Self::Reject => "reject",
            Self::Edit(_) => "edit",
        }
    }
}

impl FlowExecutor {
    /// Resume a suspended run.
    ///
    /// `approve` commits the tentative output and `edit` commits the
    /// replacement; both continue after the reviewed node without re-running
    /// anything before it. `reject` fails the run. A snapshot whose pending
    /// review does not match `review_node_id` fails as a lost suspension.
    pub async fn process_review_decision(
        &self,
        graph: &FlowGraph,
        mut snapshot: ExecutionContext,
        review_node_id: &str,
        decision: ReviewDecision,
    ) -> ExecutionResult {
        let started = Instant::now();

        let pending = match snapshot.pending_review.clone() {
            Some(p) if p.node_id == review_node_id => p,
            _ => {
                snapshot.pending_review = None;
                return self.fail(
                    snapshot,
                    FailureKind::LostSuspension,
                    FlowError::UnknownReview(review_node_id.to_string()),
                    started,
                );
            }
        };

        if matches!(decision, ReviewDecision::Edit(_)) && !pending.allow_edit {
            warn!(session_id = %snapshot.session_id, node_id = %review_node_id, "Edit refused");
            return refused(snapshot, FlowError::EditNotAllowed(review_node_id.to_string()), started);
        }

        info!(
            session_id = %snapshot.session_id,
            node_id = %review_node_id,
            decision = decision.as_str(),
            "Applying review decision"
        );
        self.publish(FlowEvent::ReviewResolved {
            session_id: snapshot.session_id.clone(),
            node_id: review_node_id.to_string(),
            decision: decision.as_str().to_string(),
        });
        snapshot.log(format!("=== Review decision: {} ===", decision.as_str()));
        snapshot.pending_review = None;

        let committed = match decision {
            ReviewDecision::Reject => {
                return self.fail(
                    snapshot,
                    FailureKind::Rejected,
                    FlowError::ReviewRejected(review_node_id.to_string()),
                    started,
                );
            }
            ReviewDecision::Approve => pending.output,
            ReviewDecision::Edit(value) => {
                snapshot.log(format!(
                    "Using edited output: {}",
                    truncate_chars(&value_to_text(&value), 100)
                ));
                value
            }
        };

        let order = match self.prepare(graph) {
            Ok(order) => order,
            Err(e) => return self.fail(snapshot, FailureKind::Configuration, e, started),
        };
        let Some(position) = order.iter().position(|id| id == review_node_id) else {
            return self.fail(
                snapshot,
                FailureKind::LostSuspension,
                FlowError::UnknownReview(review_node_id.to_string()),
                started,
            );
        };

        if let Some(entry) = snapshot
            .node_execution_logs
            .iter_mut()
            .rev()
            .find(|l| l.node_id == review_node_id && l.status == NodeStatus::PendingReview)
        {
            entry.status = NodeStatus::Success;
            entry.output = Some(truncate_chars(&value_to_text(&committed), 200));
        }
        snapshot.record_output(review_node_id, committed);

        self.publish(FlowEvent::RunStarted {
            session_id: snapshot.session_id.clone(),
            node_count: graph.nodes.len(),
            resumed: true,
        });
        self.run_from(graph, snapshot, &order, position + 1, started).await
    }

    /// Fail a suspended run whose review timed out.
    pub fn expire_review(&self, mut snapshot: ExecutionContext) -> ExecutionResult {
        let started = Instant::now();
        let node_id = snapshot
            .pending_review
            .take()
            .map(|p| p.node_id)
            .unwrap_or_default();
        self.fail(
            snapshot,
            FailureKind::TimedOut,
            FlowError::NodeExecution {
                node: node_id,
                message: "review timed out".into(),
            },
            started,
        )
    }
}

/// The decision cannot be applied; the run stays suspended on the untouched snapshot.
fn refused(snapshot: ExecutionContext, error: FlowError, started: Instant) -> ExecutionResult {
    let mut logs = snapshot.logs.clone();
    logs.push(format!("[ERROR] {}", error));
    ExecutionResult {
        success: false,
        status: RunStatus::Suspended,
        output: Value::Null,
        execution_time: started.elapsed().as_millis() as u64,
        logs,
        error: Some(error.to_string()),
        failure: Some(FailureKind::Configuration),
        pending_review: snapshot.pending_review.clone(),
        session_id: snapshot.session_id.clone(),
        node_outputs: snapshot.node_outputs.clone(),
        node_execution_logs: snapshot.node_execution_logs.clone(),
        context: Some(snapshot),
    }
}
