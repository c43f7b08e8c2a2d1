//! Delegating whole runs to an external chat-flow platform.

use std::time::{Duration, Instant};

use futures::future::BoxFuture;
use serde_json::{json, Value};
use tracing::{info, warn};

use flowloom_core::config::DelegationConfig;
use flowloom_core::error::{FlowError, Result};
use flowloom_core::types::{value_to_text, SessionId};

use crate::context::ExecutionContext;
use crate::executor::{ExecutionResult, FlowExecutor};
use crate::graph::FlowDefinition;

/// A remote service that can run a whole flow given its chat-flow id.
pub trait ChatflowBackend: Send + Sync {
    fn name(&self) -> &str;

    /// Send `question` to the chat-flow and return the raw response body.
    fn predict<'a>(
        &'a self,
        chatflow_id: &'a str,
        question: &'a str,
        session_id: Option<&'a str>,
    ) -> BoxFuture<'a, Result<Value>>;
}

/// Prediction API client: `POST {api_url}/api/v1/prediction/{chatflowId}`.
pub struct HttpChatflowBackend {
    http: reqwest::Client,
    api_url: String,
    api_key: Option<String>,
}

impl HttpChatflowBackend {
    pub fn new(config: &DelegationConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| FlowError::Delegation(e.to_string()))?;
        Ok(Self {
            http,
            api_url: config.api_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone().filter(|k| !k.is_empty()),
        })
    }

    fn prediction_url(&self, chatflow_id: &str) -> String {
        format!("{}/api/v1/prediction/{}", self.api_url, chatflow_id)
    }
}

impl ChatflowBackend for HttpChatflowBackend {
    fn name(&self) -> &str {
        "http"
    }

    fn predict<'a>(
        &'a self,
        chatflow_id: &'a str,
        question: &'a str,
        session_id: Option<&'a str>,
    ) -> BoxFuture<'a, Result<Value>> {
        Box::pin(async move {
            let mut payload = json!({ "question": question });
            if let Some(sid) = session_id {
                payload["sessionId"] = json!(sid);
            }

            let mut request = self.http.post(self.prediction_url(chatflow_id)).json(&payload);
            if let Some(key) = &self.api_key {
                request = request.bearer_auth(key);
            }

            let response = request
                .send()
                .await
                .map_err(|e| FlowError::Delegation(format!("network error: {}", e)))?;

            let status = response.status();
            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                return Err(FlowError::Delegation(format!("HTTP {}: {}", status, body)));
            }

            response
                .json::<Value>()
                .await
                .map_err(|e| FlowError::Delegation(format!("invalid response: {}", e)))
        })
    }
}

/// Pick the useful part of a prediction response: `text`, then `json`, then the whole body.
fn prediction_output(response: Value) -> Value {
    if let Some(text) = response.get("text").filter(|t| !t.is_null()) {
        return text.clone();
    }
    if let Some(json) = response.get("json").filter(|j| !j.is_null()) {
        return json.clone();
    }
    response
}

/// Run `definition` remotely when it names a chat-flow and a backend is
/// available; on any delegation failure, run it locally instead.
pub async fn run_with_fallback(
    executor: &FlowExecutor,
    backend: Option<&dyn ChatflowBackend>,
    definition: &FlowDefinition,
    input: Value,
    session_id: Option<SessionId>,
) -> ExecutionResult {
    let (Some(backend), Some(chatflow_id)) = (backend, definition.chatflow_id.as_deref()) else {
        return executor.execute_flow(&definition.graph, input, session_id).await;
    };

    let started = Instant::now();
    let session_id = session_id.unwrap_or_default();
    let question = value_to_text(&input);

    info!(
        session_id = %session_id,
        chatflow_id = %chatflow_id,
        backend = backend.name(),
        "Delegating run"
    );

    match backend
        .predict(chatflow_id, &question, Some(session_id.as_str()))
        .await
    {
        Ok(response) => {
            let mut ctx = ExecutionContext::new(session_id, input);
            ctx.log(format!("Executing via chat-flow platform: {}", chatflow_id));
            ctx.log("Delegated run completed");
            ExecutionResult::completed(ctx, prediction_output(response), started)
        }
        Err(e) => {
            warn!(session_id = %session_id, error = %e, "Delegation failed, running locally");
            let mut result = executor
                .execute_flow(&definition.graph, input, Some(session_id))
                .await;
            result.logs.insert(0, format!("[WARN] {}; fell back to local execution", e));
            result
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use super::*;
    use crate::graph::{Edge, FlowGraph, Node};
    use crate::registry::NodeRegistry;
    use flowloom_core::config::AppConfig;
    use flowloom_llm::OfflineClient;

    struct FakeBackend {
        response: Option<Value>,
        calls: AtomicUsize,
    }

    impl ChatflowBackend for FakeBackend {
        fn name(&self) -> &str {
            "fake"
        }

        fn predict<'a>(
            &'a self,
            _chatflow_id: &'a str,
            question: &'a str,
            _session_id: Option<&'a str>,
        ) -> BoxFuture<'a, Result<Value>> {
            Box::pin(async move {
                self.calls.fetch_add(1, Ordering::SeqCst);
                match &self.response {
                    Some(v) => Ok(json!({ "text": format!("{} {}", v, question) })),
                    None => Err(FlowError::Delegation("HTTP 503: down".into())),
                }
            })
        }
    }

    fn executor() -> FlowExecutor {
        let registry = NodeRegistry::with_builtins(Arc::new(OfflineClient::new()), &AppConfig::default());
        FlowExecutor::new(Arc::new(registry))
    }

    fn definition(chatflow_id: Option<&str>) -> FlowDefinition {
        FlowDefinition {
            name: None,
            chatflow_id: chatflow_id.map(String::from),
            graph: FlowGraph::new(
                vec![Node::new("a", "start"), Node::new("b", "end")],
                vec![Edge::new("a", "b")],
            ),
        }
    }

    #[test]
    fn test_prediction_output() {
        assert_eq!(prediction_output(json!({"text": "hi", "json": {"a": 1}})), json!("hi"));
        assert_eq!(prediction_output(json!({"json": {"a": 1}})), json!({"a": 1}));
        assert_eq!(prediction_output(json!({"other": 1})), json!({"other": 1}));
    }

    #[test]
    fn test_prediction_url() {
        let config = DelegationConfig {
            api_url: "http://flows.local:3000/".into(),
            ..DelegationConfig::default()
        };
        let backend = HttpChatflowBackend::new(&config).unwrap();
        assert_eq!(
            backend.prediction_url("cf-9"),
            "http://flows.local:3000/api/v1/prediction/cf-9"
        );
    }

    #[tokio::test]
    async fn test_delegated_run() {
        let backend = FakeBackend {
            response: Some(json!("remote")),
            calls: AtomicUsize::new(0),
        };
        let result = run_with_fallback(&executor(), Some(&backend), &definition(Some("cf-1")), json!("hi"), None)
            .await;
        assert!(result.success);
        assert_eq!(result.output, json!("\"remote\" hi"));
        assert!(result.node_outputs.is_empty());
        assert_eq!(backend.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_falls_back_to_local() {
        let backend = FakeBackend {
            response: None,
            calls: AtomicUsize::new(0),
        };
        let result = run_with_fallback(&executor(), Some(&backend), &definition(Some("cf-1")), json!("hi"), None)
            .await;
        assert!(result.success);
        assert_eq!(result.output, json!("hi"));
        assert!(result.logs[0].contains("fell back to local execution"));
        assert_eq!(result.node_outputs.len(), 2);
    }

    #[tokio::test]
    async fn test_no_chatflow_id_runs_locally() {
        let backend = FakeBackend {
            response: Some(json!("remote")),
            calls: AtomicUsize::new(0),
        };
        let result = run_with_fallback(&executor(), Some(&backend), &definition(None), json!("hi"), None).await;
        assert_eq!(result.output, json!("hi"));
        assert_eq!(backend.calls.load(Ordering::SeqCst), 0);
    }
}
