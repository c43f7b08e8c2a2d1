use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, error, info, warn};

use flowloom_core::error::FlowError;
use flowloom_core::event::{EventBus, FlowEvent};
use flowloom_core::types::{truncate_chars, value_to_text, SessionId};

use crate::context::{ExecutionContext, NodeExecutionLog, NodeStatus, PendingReview};
use crate::graph::{FlowGraph, Node, DEFAULT_HANDLE};
use crate::nodes::review::declared_review;
use crate::registry::NodeRegistry;
use crate::scheduler::execution_order;

/// Where a run ended up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Completed,
    Suspended,
    Failed,
}

/// Why a run failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Invalid graph, unknown node kind, or a decision the review does not allow.
    Configuration,
    /// A node failed with no error route.
    Executor,
    /// A reviewer rejected the pending output.
    Rejected,
    /// The resume request does not match a pending review.
    LostSuspension,
    /// The review was not answered before its timeout.
    TimedOut,
}

/// Outcome of `execute_flow` or `process_review_decision`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionResult {
    pub success: bool,
    pub status: RunStatus,
    pub output: Value,
    /// Wall-clock milliseconds of this invocation.
    pub execution_time: u64,
    pub logs: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<FailureKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pending_review: Option<PendingReview>,
    pub session_id: SessionId,
    #[serde(default)]
    pub node_outputs: Map<String, Value>,
    #[serde(default)]
    pub node_execution_logs: Vec<NodeExecutionLog>,
    /// Snapshot to hand back on resume. Present only while suspended.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<ExecutionContext>,
}

impl ExecutionResult {
    pub fn is_suspended(&self) -> bool {
        self.status == RunStatus::Suspended
    }

    /// Terminal failure built from a context that will not be resumed.
    pub(crate) fn failed(
        mut ctx: ExecutionContext,
        kind: FailureKind,
        error: &FlowError,
        started: Instant,
    ) -> Self {
        let message = error.to_string();
        ctx.log(format!("[ERROR] {}", message));
        Self {
            success: false,
            status: RunStatus::Failed,
            output: Value::Null,
            execution_time: started.elapsed().as_millis() as u64,
            logs: ctx.logs,
            error: Some(message),
            failure: Some(kind),
            pending_review: None,
            session_id: ctx.session_id,
            node_outputs: ctx.node_outputs,
            node_execution_logs: ctx.node_execution_logs,
            context: None,
        }
    }

    pub(crate) fn completed(ctx: ExecutionContext, output: Value, started: Instant) -> Self {
        Self {
            success: true,
            status: RunStatus::Completed,
            output,
            execution_time: started.elapsed().as_millis() as u64,
            logs: ctx.logs,
            error: None,
            failure: None,
            pending_review: None,
            session_id: ctx.session_id,
            node_outputs: ctx.node_outputs,
            node_execution_logs: ctx.node_execution_logs,
            context: None,
        }
    }

    fn suspended(ctx: ExecutionContext, started: Instant) -> Self {
        let output = ctx
            .pending_review
            .as_ref()
            .map(|r| r.output.clone())
            .unwrap_or(Value::Null);
        Self {
            success: true,
            status: RunStatus::Suspended,
            output,
            execution_time: started.elapsed().as_millis() as u64,
            logs: ctx.logs.clone(),
            error: None,
            failure: None,
            pending_review: ctx.pending_review.clone(),
            session_id: ctx.session_id.clone(),
            node_outputs: ctx.node_outputs.clone(),
            node_execution_logs: ctx.node_execution_logs.clone(),
            context: Some(ctx),
        }
    }
}

/// Drives flow graphs through the node registry.
///
/// Nodes of one run execute sequentially in scheduler order. The executor
/// holds no per-run state, so one instance can serve many concurrent runs.
pub struct FlowExecutor {
    registry: Arc<NodeRegistry>,
    event_bus: Option<Arc<EventBus>>,
    preview_chars: usize,
}

/// How a stretch of nodes ended.
enum Drive {
    Finished,
    Suspended,
    Failed(FailureKind, FlowError),
}

impl FlowExecutor {
    pub fn new(registry: Arc<NodeRegistry>) -> Self {
        Self {
            registry,
            event_bus: None,
            preview_chars: 200,
        }
    }

    /// Publish engine events on `bus`.
    pub fn with_event_bus(mut self, bus: Arc<EventBus>) -> Self {
        self.event_bus = Some(bus);
        self
    }

    /// Max characters of output kept in node log previews.
    pub fn with_preview_chars(mut self, chars: usize) -> Self {
        self.preview_chars = chars;
        self
    }

    pub fn registry(&self) -> &NodeRegistry {
        &self.registry
    }

    pub(crate) fn publish(&self, event: FlowEvent) {
        if let Some(bus) = &self.event_bus {
            bus.publish(event);
        }
    }

    /// Run `graph` against `input` from the first node.
    pub async fn execute_flow(
        &self,
        graph: &FlowGraph,
        input: Value,
        session_id: Option<SessionId>,
    ) -> ExecutionResult {
        let started = Instant::now();
        let mut ctx = ExecutionContext::new(session_id.unwrap_or_default(), input);
        ctx.log("=== flowloom engine ===");
        ctx.log(format!("Session: {}", ctx.session_id));
        ctx.log(format!("Nodes: {}, Edges: {}", graph.nodes.len(), graph.edges.len()));

        info!(session_id = %ctx.session_id, nodes = graph.nodes.len(), "Starting flow run");
        self.publish(FlowEvent::RunStarted {
            session_id: ctx.session_id.clone(),
            node_count: graph.nodes.len(),
            resumed: false,
        });

        let order = match self.prepare(graph) {
            Ok(order) => order,
            Err(e) => return self.fail(ctx, FailureKind::Configuration, e, started),
        };
        ctx.log(format!("Execution order: {}", self.describe_order(graph, &order)));

        self.run_from(graph, ctx, &order, 0, started).await
    }

    /// Validate the graph and check every kind resolves before anything runs.
    pub(crate) fn prepare(&self, graph: &FlowGraph) -> Result<Vec<String>, FlowError> {
        graph.validate_structure()?;
        for node in &graph.nodes {
            self.registry.resolve(node)?;
        }
        execution_order(graph)
    }

    fn describe_order(&self, graph: &FlowGraph, order: &[String]) -> String {
        order
            .iter()
            .map(|id| graph.node(id).map_or(id.as_str(), Node::display_name))
            .collect::<Vec<_>>()
            .join(" -> ")
    }

    /// Execute `order[start..]` and turn the outcome into a result.
    pub(crate) async fn run_from(
        &self,
        graph: &FlowGraph,
        mut ctx: ExecutionContext,
        order: &[String],
        start: usize,
        started: Instant,
    ) -> ExecutionResult {
        match self.drive(graph, &mut ctx, order, start).await {
            Drive::Finished => {
                let output = order
                    .iter()
                    .rev()
                    .find_map(|id| ctx.output_of(id))
                    .cloned()
                    .unwrap_or(Value::Null);
                ctx.log("=== Run completed ===");
                let elapsed_ms = started.elapsed().as_millis() as u64;
                info!(session_id = %ctx.session_id, elapsed_ms, "Flow run completed");
                self.publish(FlowEvent::RunCompleted {
                    session_id: ctx.session_id.clone(),
                    elapsed_ms,
                });
                ExecutionResult::completed(ctx, output, started)
            }
            Drive::Suspended => {
                ctx.log("=== Run suspended: awaiting review ===");
                ExecutionResult::suspended(ctx, started)
            }
            Drive::Failed(kind, e) => self.fail(ctx, kind, e, started),
        }
    }

    pub(crate) fn fail(
        &self,
        ctx: ExecutionContext,
        kind: FailureKind,
        e: FlowError,
        started: Instant,
    ) -> ExecutionResult {
        error!(session_id = %ctx.session_id, failure = ?kind, error = %e, "Flow run failed");
        self.publish(FlowEvent::RunFailed {
            session_id: ctx.session_id.clone(),
            error: e.to_string(),
        });
        ExecutionResult::failed(ctx, kind, &e, started)
    }

    async fn drive(
        &self,
        graph: &FlowGraph,
        ctx: &mut ExecutionContext,
        order: &[String],
        start: usize,
    ) -> Drive {
        for node_id in order.iter().skip(start) {
            let Some(node) = graph.node(node_id) else {
                continue;
            };

            let incoming: Vec<_> = graph.incoming(&node.id).collect();
            if !incoming.is_empty() && !incoming.iter().any(|e| ctx.edge_is_reached(e)) {
                self.skip(node, ctx);
                continue;
            }

            // Roots take the run input; a failed predecessor leaves its handle absent.
            let mut inputs = ctx.gather_inputs(incoming.iter().copied());
            if incoming.is_empty() {
                inputs.insert(DEFAULT_HANDLE.to_string(), ctx.input.clone());
            }
            let handles: Vec<String> = inputs.keys().cloned().collect();

            debug!(
                session_id = %ctx.session_id,
                node_id = %node.id,
                kind = %node.kind,
                "Executing node"
            );
            self.publish(FlowEvent::NodeStarted {
                session_id: ctx.session_id.clone(),
                node_id: node.id.clone(),
                kind: node.kind.clone(),
            });

            let node_start = Instant::now();
            let result = self.registry.execute(node, inputs, ctx).await;
            let elapsed_ms = node_start.elapsed().as_millis() as u64;

            match result {
                Ok(output) => {
                    if let Some(review) = output.review.clone().or_else(|| declared_review(node)) {
                        let status = NodeStatus::PendingReview;
                        let preview = Some(&output.value);
                        self.push_log(ctx, node, handles, preview, elapsed_ms, status, None);
                        ctx.log(format!("[Review] {}: {}", node.display_name(), review.message));
                        info!(
                            session_id = %ctx.session_id,
                            node_id = %node.id,
                            "Run suspended for review"
                        );
                        self.publish(FlowEvent::ReviewRequested {
                            session_id: ctx.session_id.clone(),
                            node_id: node.id.clone(),
                            message: review.message.clone(),
                        });
                        ctx.pending_review = Some(PendingReview {
                            node_id: node.id.clone(),
                            output: output.value,
                            message: review.message,
                            allow_edit: review.allow_edit,
                            timeout_seconds: review.timeout_seconds,
                        });
                        return Drive::Suspended;
                    }

                    let status = NodeStatus::Success;
                    let preview = Some(&output.value);
                    self.push_log(ctx, node, handles, preview, elapsed_ms, status, None);
                    ctx.record_output(&node.id, output.value);
                    info!(
                        session_id = %ctx.session_id,
                        node_id = %node.id,
                        elapsed_ms,
                        "Node completed"
                    );
                    self.publish(FlowEvent::NodeCompleted {
                        session_id: ctx.session_id.clone(),
                        node_id: node.id.clone(),
                        elapsed_ms,
                    });
                }
                Err(e) => {
                    let message = e.to_string();
                    let status = NodeStatus::Error;
                    let error = Some(message.clone());
                    self.push_log(ctx, node, handles, None, elapsed_ms, status, error);
                    ctx.log(format!("[ERROR] {}: {}", node.display_name(), message));
                    ctx.record_failure(&node.id, &message);
                    self.publish(FlowEvent::NodeFailed {
                        session_id: ctx.session_id.clone(),
                        node_id: node.id.clone(),
                        error: message,
                    });

                    if graph.has_error_path(&node.id) {
                        warn!(
                            session_id = %ctx.session_id,
                            node_id = %node.id,
                            error = %e,
                            "Node failed, following error route"
                        );
                        continue;
                    }

                    let kind = if e.is_configuration() {
                        FailureKind::Configuration
                    } else {
                        FailureKind::Executor
                    };
                    return Drive::Failed(kind, e);
                }
            }
        }

        Drive::Finished
    }

    fn skip(&self, node: &Node, ctx: &mut ExecutionContext) {
        debug!(session_id = %ctx.session_id, node_id = %node.id, "Skipping unreached node");
        ctx.log(format!("[Skip] {}: no active incoming edge", node.display_name()));
        self.push_log(ctx, node, Vec::new(), None, 0, NodeStatus::Skipped, None);
        self.publish(FlowEvent::NodeSkipped {
            session_id: ctx.session_id.clone(),
            node_id: node.id.clone(),
        });
    }

    #[allow(clippy::too_many_arguments)]
    fn push_log(
        &self,
        ctx: &mut ExecutionContext,
        node: &Node,
        inputs: Vec<String>,
        output: Option<&Value>,
        elapsed_ms: u64,
        status: NodeStatus,
        error: Option<String>,
    ) {
        ctx.node_execution_logs.push(NodeExecutionLog {
            node_id: node.id.clone(),
            node_name: node.display_name().to_string(),
            node_kind: node.kind.clone(),
            inputs,
            output: output.map(|v| truncate_chars(&value_to_text(v), self.preview_chars)),
            execution_time_ms: elapsed_ms,
            status,
            error,
            timestamp: Utc::now(),
        });
    }
}
