use std::process::Stdio;
use std::time::Duration;

use futures::future::BoxFuture;
use serde_json::{Map, Value};
use tokio::io::AsyncWriteExt;
use tracing::debug;

use flowloom_core::error::{FlowError, Result};

use super::input_or_run;
use crate::context::ExecutionContext;
use crate::graph::Node;
use crate::registry::{NodeExecutor, NodeOutput};

/// Runs `config.command` through `sh -c` with the input as JSON on stdin.
///
/// Stdout is parsed as JSON when it can be, otherwise returned as trimmed text.
pub struct CodeNode {
    timeout_secs: u64,
}

impl CodeNode {
    pub fn new(timeout_secs: u64) -> Self {
        Self { timeout_secs }
    }
}

impl NodeExecutor for CodeNode {
    fn kind(&self) -> &str {
        "code"
    }

    fn aliases(&self) -> &'static [&'static str] {
        &["customFunction"]
    }

    fn timeout_secs(&self) -> u64 {
        self.timeout_secs + 5
    }

    fn execute<'a>(
        &'a self,
        node: &'a Node,
        inputs: Map<String, Value>,
        ctx: &'a mut ExecutionContext,
    ) -> BoxFuture<'a, Result<NodeOutput>> {
        Box::pin(async move {
            let fail = |message: String| FlowError::NodeExecution {
                node: node.id.clone(),
                message,
            };

            let command = node.config_str("command").ok_or_else(|| FlowError::NodeConfig {
                node: node.id.clone(),
                message: "missing 'command'".into(),
            })?;
            let stdin_payload = serde_json::to_vec(input_or_run(&inputs, ctx))?;
            let timeout_secs = node.config_u64("timeout").unwrap_or(self.timeout_secs);

            debug!(node_id = %node.id, command = %command, "Executing code node");

            let mut child = tokio::process::Command::new("sh")
                .arg("-c")
                .arg(command)
                .stdin(Stdio::piped())
                .stdout(Stdio::piped())
                .stderr(Stdio::piped())
                .kill_on_drop(true)
                .spawn()
                .map_err(|e| fail(format!("spawn failed: {}", e)))?;

            if let Some(mut stdin) = child.stdin.take() {
                // A command that ignores stdin may close it early
                stdin.write_all(&stdin_payload).await.ok();
            }

            let output = tokio::time::timeout(Duration::from_secs(timeout_secs), child.wait_with_output())
                .await
                .map_err(|_| fail(format!("timed out after {}s", timeout_secs)))?
                .map_err(|e| fail(e.to_string()))?;

            if !output.status.success() {
                let code = output.status.code().unwrap_or(-1);
                let stderr = String::from_utf8_lossy(&output.stderr);
                ctx.log(format!("[Code] {}: exit code {}", node.display_name(), code));
                return Err(fail(format!("exit code {}: {}", code, stderr.trim())));
            }

            let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
            ctx.log(format!("[Code] {}: {} bytes of output", node.display_name(), stdout.len()));
            let value = serde_json::from_str(&stdout).unwrap_or(Value::String(stdout));
            Ok(NodeOutput::new(value))
        })
    }
}
