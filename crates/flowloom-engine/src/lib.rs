pub mod context;
pub mod delegate;
pub mod executor;
pub mod graph;
pub mod nodes;
pub mod registry;
pub mod review;
pub mod run_log;
pub mod scheduler;
pub mod suspension;

pub use context::{ExecutionContext, NodeExecutionLog, NodeStatus, PendingReview};
pub use delegate::{run_with_fallback, ChatflowBackend, HttpChatflowBackend};
pub use executor::{ExecutionResult, FailureKind, FlowExecutor, RunStatus};
pub use graph::{Edge, FlowDefinition, FlowGraph, HumanReviewConfig, Node};
pub use registry::{NodeExecutor, NodeOutput, NodeRegistry, ReviewRequest};
pub use review::ReviewDecision;
pub use run_log::RunLogger;
pub use scheduler::execution_order;
pub use suspension::{SuspendedRun, SuspendedSummary, SuspensionStore};
