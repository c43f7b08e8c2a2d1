use std::sync::Arc;

use serde_json::json;

use flowloom_engine::{
    Edge, ExecutionResult, FailureKind, FlowDefinition, FlowExecutor, FlowGraph, Node, NodeStatus,
    ReviewDecision, RunStatus, SuspendedRun, SuspensionStore,
};
use flowloom_test_utils::{
    chain, flow_file, recording_executor, registry_with, reviewed_chain, MockLlmClient,
    RecordingExecutor,
};

#[tokio::test]
async fn linear_chain_runs_every_node_in_order() {
    let recorder = RecordingExecutor::new();
    let exec = recording_executor(&recorder);

    let result = exec.execute_flow(&chain(&["A", "B", "C"]), json!("hello"), None).await;

    assert!(result.success);
    assert_eq!(result.status, RunStatus::Completed);
    assert_eq!(result.node_execution_logs.len(), 3);
    let order: Vec<_> = result.node_execution_logs.iter().map(|l| l.node_id.as_str()).collect();
    assert_eq!(order, vec!["A", "B", "C"]);
    assert_eq!(result.output, json!("hello>A>B>C"));
}

#[tokio::test]
async fn review_then_edit_replaces_output() {
    let recorder = RecordingExecutor::new();
    let exec = recording_executor(&recorder);
    let graph = reviewed_chain(&["A", "B"], "B", true);

    let suspended = exec.execute_flow(&graph, json!("draft"), None).await;
    assert_eq!(suspended.status, RunStatus::Suspended);
    let pending = suspended.pending_review.clone().unwrap();
    assert_eq!(pending.node_id, "B");
    assert_eq!(pending.message, "Check B");
    assert!(!suspended.node_outputs.contains_key("B"));

    let resumed = exec
        .process_review_decision(
            &graph,
            suspended.context.unwrap(),
            "B",
            ReviewDecision::Edit(json!("corrected")),
        )
        .await;
    assert!(resumed.success);
    assert_eq!(resumed.output, json!("corrected"));
    assert_eq!(resumed.session_id, suspended.session_id);
}

#[tokio::test]
async fn self_loop_is_rejected_before_running() {
    let recorder = RecordingExecutor::new();
    let exec = recording_executor(&recorder);
    let graph = FlowGraph::new(vec![Node::new("A", "record")], vec![Edge::new("A", "A")]);

    let result = exec.execute_flow(&graph, json!("x"), None).await;

    assert!(!result.success);
    assert_eq!(result.failure, Some(FailureKind::Configuration));
    assert!(result.error.unwrap().contains("cycle"));
    assert!(result.node_execution_logs.is_empty());
    assert!(recorder.invocations().is_empty());
}

#[tokio::test]
async fn identical_runs_are_deterministic() {
    let recorder = RecordingExecutor::new();
    let exec = recording_executor(&recorder);
    let graph = FlowGraph::new(
        vec![
            Node::new("root", "record"),
            Node::new("right", "record"),
            Node::new("left", "record"),
            Node::new("join", "record"),
        ],
        vec![
            Edge::new("root", "left"),
            Edge::new("root", "right"),
            Edge::new("left", "join"),
            Edge::new("right", "join"),
        ],
    );

    let first = exec.execute_flow(&graph, json!("in"), None).await;
    let second = exec.execute_flow(&graph, json!("in"), None).await;

    let keys = |r: &ExecutionResult| r.node_outputs.keys().cloned().collect::<Vec<_>>();
    assert_eq!(keys(&first), vec!["root", "right", "left", "join"]);
    assert_eq!(keys(&first), keys(&second));
    assert_eq!(first.output, second.output);
    // Both branches feed the same handle; the later completion wins.
    assert_eq!(first.output, json!("in>root>left>join"));
}

#[tokio::test]
async fn approve_does_not_rerun_completed_nodes() {
    let recorder = RecordingExecutor::new();
    let exec = recording_executor(&recorder);
    let graph = reviewed_chain(&["a", "b", "c"], "b", false);

    let suspended = exec.execute_flow(&graph, json!("x"), None).await;
    assert_eq!(recorder.invocations(), vec!["a", "b"]);

    let resumed = exec
        .process_review_decision(&graph, suspended.context.unwrap(), "b", ReviewDecision::Approve)
        .await;

    assert!(resumed.success);
    assert_eq!(resumed.output, json!("x>a>b>c"));
    assert_eq!(recorder.invocations(), vec!["a", "b", "c"]);
    let review_log = resumed
        .node_execution_logs
        .iter()
        .find(|l| l.node_id == "b")
        .unwrap();
    assert_eq!(review_log.status, NodeStatus::Success);
}

#[tokio::test]
async fn reject_never_advances() {
    let recorder = RecordingExecutor::new();
    let exec = recording_executor(&recorder);
    let graph = reviewed_chain(&["a", "b", "c"], "b", true);

    let suspended = exec.execute_flow(&graph, json!("x"), None).await;
    let rejected = exec
        .process_review_decision(&graph, suspended.context.unwrap(), "b", ReviewDecision::Reject)
        .await;

    assert!(!rejected.success);
    assert_eq!(rejected.status, RunStatus::Failed);
    assert_eq!(rejected.failure, Some(FailureKind::Rejected));
    assert_eq!(recorder.count("c"), 0);
    assert!(rejected.logs.iter().any(|l| l.contains("node b")));
}

#[tokio::test]
async fn resumed_run_can_suspend_again() {
    let recorder = RecordingExecutor::new();
    let exec = recording_executor(&recorder);
    let mut graph = reviewed_chain(&["a", "b", "c", "d"], "b", true);
    graph.nodes[3].human_review = graph.nodes[1].human_review.clone();

    let first = exec.execute_flow(&graph, json!("x"), None).await;
    let second = exec
        .process_review_decision(&graph, first.context.unwrap(), "b", ReviewDecision::Approve)
        .await;

    assert_eq!(second.status, RunStatus::Suspended);
    assert_eq!(second.pending_review.as_ref().unwrap().node_id, "d");
    assert!(second.node_outputs.contains_key("c"));
    assert!(!second.node_outputs.contains_key("d"));
}

#[tokio::test]
async fn error_route_continues_and_successor_runs_without_input() {
    let recorder = RecordingExecutor::new().fail_on("b");
    let exec = recording_executor(&recorder);
    let graph = FlowGraph::new(
        vec![
            Node::new("a", "record"),
            Node::new("b", "record"),
            Node::new("c", "record"),
            Node::new("handler", "record"),
        ],
        vec![Edge::new("a", "b"), Edge::new("b", "c"), Edge::on_error("b", "handler")],
    );

    let result = exec.execute_flow(&graph, json!("x"), None).await;

    assert!(result.success);
    let statuses: Vec<_> = result
        .node_execution_logs
        .iter()
        .map(|l| (l.node_id.as_str(), l.status))
        .collect();
    assert_eq!(
        statuses,
        vec![
            ("a", NodeStatus::Success),
            ("b", NodeStatus::Error),
            ("c", NodeStatus::Success),
            ("handler", NodeStatus::Success),
        ]
    );
    let output = result.output.as_str().unwrap();
    assert!(output.contains("scripted failure"));
    assert!(output.ends_with(">handler"));
    // `c` had nothing on its handle and fell back to the run input itself
    assert_eq!(result.node_outputs["c"], json!("x>c"));
    assert!(result.node_execution_logs[2].inputs.is_empty());
    assert_eq!(recorder.count("c"), 1);
}

#[tokio::test]
async fn root_nodes_get_the_run_input_on_their_handle() {
    let graph = FlowGraph::new(
        vec![
            Node::new("first", "passthrough"),
            Node::new("gate", "humanReview"),
        ],
        vec![Edge::new("first", "gate")],
    );
    let recorder = RecordingExecutor::new();
    let exec = recording_executor(&recorder);

    let result = exec.execute_flow(&graph, json!("hello"), None).await;

    assert_eq!(result.status, RunStatus::Suspended);
    assert_eq!(result.node_outputs["first"], json!("hello"));
    assert_eq!(result.pending_review.unwrap().output, json!("hello"));
}

#[tokio::test]
async fn llm_failure_follows_error_route() {
    let document = json!({
        "nodes": [
            {"id": "model", "type": "llm"},
            {"id": "sorry", "type": "promptTemplate",
             "config": {"template": "Model unavailable ({error})"}}
        ],
        "edges": [
            {"source": "model", "target": "sorry", "sourceHandle": "error", "targetHandle": "error"}
        ]
    });
    let definition: FlowDefinition = serde_json::from_value(document).unwrap();
    let llm = MockLlmClient::new().with_error("HTTP 503 Service Unavailable");
    let recorder = RecordingExecutor::new();
    let exec = FlowExecutor::new(Arc::new(registry_with(&recorder, llm.clone())));

    let result = exec.execute_flow(&definition.graph, json!("hi"), None).await;

    assert!(result.success, "{:?}", result.error);
    assert_eq!(llm.requests().len(), 1);
    assert_eq!(result.node_execution_logs[0].status, NodeStatus::Error);
    let text = result.output.as_str().unwrap();
    assert!(text.starts_with("Model unavailable"));
    assert!(text.contains("503"));
}

#[tokio::test]
async fn failure_without_route_keeps_partial_results() {
    let recorder = RecordingExecutor::new().fail_on("b");
    let exec = recording_executor(&recorder);

    let result = exec.execute_flow(&chain(&["a", "b", "c"]), json!("x"), None).await;

    assert!(!result.success);
    assert_eq!(result.failure, Some(FailureKind::Executor));
    assert_eq!(result.node_outputs.keys().collect::<Vec<_>>(), vec!["a"]);
    assert!(result.error.unwrap().contains("Node b failed"));
    assert_eq!(recorder.count("c"), 0);
}

#[tokio::test]
async fn flow_document_runs_through_builtin_kinds() {
    let document = json!({
        "name": "translate",
        "nodes": [
            {"id": "in", "type": "chatInput", "position": {"x": 0, "y": 0}},
            {"id": "prompt", "type": "promptTemplate",
             "config": {"template": "Translate: {input}"}},
            {"id": "model", "type": "chatOpenAI", "config": {"systemMessage": "You translate."}},
            {"id": "out", "type": "chatOutput", "label": "Answer"}
        ],
        "edges": [
            {"id": "e1", "source": "in", "target": "prompt"},
            {"id": "e2", "source": "prompt", "target": "model"},
            {"id": "e3", "source": "model", "target": "out"}
        ]
    });
    let file = flow_file(&document);
    let definition = FlowDefinition::load(file.path()).unwrap();

    let llm = MockLlmClient::new().with_reply("Bonjour");
    let recorder = RecordingExecutor::new();
    let exec = FlowExecutor::new(Arc::new(registry_with(&recorder, llm.clone())));

    let result = exec.execute_flow(&definition.graph, json!("Hello"), None).await;

    assert!(result.success, "{:?}", result.error);
    assert_eq!(result.output, json!("Bonjour"));
    assert_eq!(result.node_outputs["prompt"], json!("Translate: Hello"));
    let sent = llm.requests();
    assert_eq!(sent.len(), 1);
    assert!(sent[0].iter().any(|m| m.content == "Translate: Hello"));
}

#[tokio::test]
async fn suspended_run_survives_the_store() {
    let dir = tempfile::tempdir().unwrap();
    let recorder = RecordingExecutor::new();
    let exec = recording_executor(&recorder);
    let graph = reviewed_chain(&["a", "b", "c"], "b", true);

    let suspended = exec.execute_flow(&graph, json!("x"), None).await;
    let session = suspended.session_id.to_string();
    {
        let store = SuspensionStore::open(&dir.path().join("runs.db")).unwrap();
        store.save(&SuspendedRun::from_result(&graph, &suspended).unwrap()).unwrap();
    }

    let store = SuspensionStore::open(&dir.path().join("runs.db")).unwrap();
    let run = store.load(&session).unwrap().unwrap();
    assert_eq!(run.review_node_id, "b");
    let resumed = exec
        .process_review_decision(
            &run.graph,
            run.context,
            &run.review_node_id,
            ReviewDecision::Approve,
        )
        .await;

    assert!(resumed.success);
    assert_eq!(resumed.output, json!("x>a>b>c"));
    assert_eq!(recorder.count("a"), 1);
}
