use serde::Serialize;

use crate::types::SessionId;

/// Engine event broadcast to all subscribers.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FlowEvent {
    /// A run (or a resumed run) started driving the scheduler order.
    RunStarted {
        session_id: SessionId,
        node_count: usize,
        resumed: bool,
    },
    /// A node's executor is about to be invoked.
    NodeStarted {
        session_id: SessionId,
        node_id: String,
        kind: String,
    },
    /// A node produced an output.
    NodeCompleted {
        session_id: SessionId,
        node_id: String,
        elapsed_ms: u64,
    },
    /// A node's executor reported failure.
    NodeFailed {
        session_id: SessionId,
        node_id: String,
        error: String,
    },
    /// A node was skipped because no incoming edge was reached.
    NodeSkipped { session_id: SessionId, node_id: String },
    /// The run suspended awaiting a human decision.
    ReviewRequested {
        session_id: SessionId,
        node_id: String,
        message: String,
    },
    /// A human decision was applied to a suspended run.
    ReviewResolved {
        session_id: SessionId,
        node_id: String,
        decision: String,
    },
    /// The run completed.
    RunCompleted {
        session_id: SessionId,
        elapsed_ms: u64,
    },
    /// The run failed.
    RunFailed { session_id: SessionId, error: String },
}

impl FlowEvent {
    pub fn session_id(&self) -> &SessionId {
        match self {
            FlowEvent::RunStarted { session_id, .. }
            | FlowEvent::NodeStarted { session_id, .. }
            | FlowEvent::NodeCompleted { session_id, .. }
            | FlowEvent::NodeFailed { session_id, .. }
            | FlowEvent::NodeSkipped { session_id, .. }
            | FlowEvent::ReviewRequested { session_id, .. }
            | FlowEvent::ReviewResolved { session_id, .. }
            | FlowEvent::RunCompleted { session_id, .. }
            | FlowEvent::RunFailed { session_id, .. } => session_id,
        }
    }

    /// Whether this event ends the active stretch of a run.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            FlowEvent::RunCompleted { .. }
                | FlowEvent::RunFailed { .. }
                | FlowEvent::ReviewRequested { .. }
        )
    }
}

/// Event bus using tokio broadcast channel.
/// All subscribers receive all events.
pub struct EventBus {
    tx: tokio::sync::broadcast::Sender<FlowEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = tokio::sync::broadcast::channel(capacity);
        Self { tx }
    }

    pub fn publish(&self, event: FlowEvent) {
        // Ignore error if no receivers
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<FlowEvent> {
        self.tx.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}
