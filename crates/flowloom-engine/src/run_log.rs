use std::path::PathBuf;

use chrono::Utc;
use serde::Serialize;
use tokio::io::AsyncWriteExt;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use flowloom_core::event::FlowEvent;
use flowloom_core::types::SessionId;

/// JSONL run logger.
///
/// Drains an EventBus receiver and appends one JSON object per line for a
/// single session. Lines already written survive a crash mid-run.
pub struct RunLogger {
    log_dir: PathBuf,
    level: u8,
}

#[derive(Serialize)]
struct LogEntry {
    timestamp: String,
    session_id: String,
    event_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    node_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    detail: Option<serde_json::Value>,
}

impl RunLogger {
    /// Logs go to `{log_dir}/{session_id}/{timestamp}.jsonl`.
    /// `level` 1 records run-level events, 2 adds per-node events.
    pub fn new(log_dir: PathBuf, level: u8) -> Self {
        Self { log_dir, level }
    }

    /// Write events for `session_id` until cancelled, the bus closes, or the
    /// run reaches a terminal event. Subscribe before the run starts publishing.
    pub async fn run(
        self,
        mut rx: broadcast::Receiver<FlowEvent>,
        session_id: SessionId,
        cancel: CancellationToken,
    ) {
        let session_dir = self.log_dir.join(session_id.as_str());
        if let Err(e) = tokio::fs::create_dir_all(&session_dir).await {
            error!(error = %e, "Failed to create log directory");
            return;
        }

        let timestamp = Utc::now().format("%Y%m%d_%H%M%S%.3f").to_string();
        let log_path = session_dir.join(format!("{}.jsonl", timestamp));

        let file = match tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_path)
            .await
        {
            Ok(f) => f,
            Err(e) => {
                error!(error = %e, path = %log_path.display(), "Failed to open log file");
                return;
            }
        };

        info!(path = %log_path.display(), "RunLogger started");

        let mut writer = tokio::io::BufWriter::new(file);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!("RunLogger cancelled");
                    break;
                }
                result = rx.recv() => {
                    match result {
                        Ok(event) => {
                            if event.session_id() != &session_id {
                                continue;
                            }
                            let Some(entry) = self.event_to_entry(&event) else {
                                continue;
                            };

                            if let Ok(json) = serde_json::to_string(&entry) {
                                let line = format!("{}\n", json);
                                if let Err(e) = writer.write_all(line.as_bytes()).await {
                                    error!(error = %e, "Failed to write log entry");
                                    break;
                                }
                                if let Err(e) = writer.flush().await {
                                    error!(error = %e, "Failed to flush log");
                                }
                            }

                            if event.is_terminal() {
                                break;
                            }
                        }
                        Err(RecvError::Lagged(n)) => {
                            debug!(skipped = n, "RunLogger lagged, skipped events");
                        }
                        Err(RecvError::Closed) => {
                            debug!("EventBus closed, RunLogger stopping");
                            break;
                        }
                    }
                }
            }
        }

        writer.flush().await.ok();
        debug!(path = %log_path.display(), "RunLogger finished");
    }

    /// Convert an event to a log entry, or `None` when filtered by level.
    fn event_to_entry(&self, event: &FlowEvent) -> Option<LogEntry> {
        let entry = |kind: &str, node_id: Option<&String>, detail: Option<serde_json::Value>| {
            LogEntry {
                timestamp: Utc::now().to_rfc3339(),
                session_id: event.session_id().to_string(),
                event_type: kind.to_string(),
                node_id: node_id.cloned(),
                detail,
            }
        };

        match event {
            FlowEvent::RunStarted {
                node_count, resumed, ..
            } => Some(entry(
                "run_started",
                None,
                Some(serde_json::json!({ "node_count": node_count, "resumed": resumed })),
            )),
            FlowEvent::RunCompleted { elapsed_ms, .. } => Some(entry(
                "run_completed",
                None,
                Some(serde_json::json!({ "elapsed_ms": elapsed_ms })),
            )),
            FlowEvent::RunFailed { error, .. } => {
                Some(entry("run_failed", None, Some(serde_json::json!({ "error": error }))))
            }
            FlowEvent::ReviewRequested { node_id, message, .. } => Some(entry(
                "review_requested",
                Some(node_id),
                Some(serde_json::json!({ "message": message })),
            )),
            FlowEvent::ReviewResolved { node_id, decision, .. } => Some(entry(
                "review_resolved",
                Some(node_id),
                Some(serde_json::json!({ "decision": decision })),
            )),

            FlowEvent::NodeStarted { node_id, kind, .. } if self.level >= 2 => Some(entry(
                "node_started",
                Some(node_id),
                Some(serde_json::json!({ "kind": kind })),
            )),
            FlowEvent::NodeCompleted {
                node_id, elapsed_ms, ..
            } if self.level >= 2 => Some(entry(
                "node_completed",
                Some(node_id),
                Some(serde_json::json!({ "elapsed_ms": elapsed_ms })),
            )),
            FlowEvent::NodeFailed { node_id, error, .. } if self.level >= 2 => Some(entry(
                "node_failed",
                Some(node_id),
                Some(serde_json::json!({ "error": error })),
            )),
            FlowEvent::NodeSkipped { node_id, .. } if self.level >= 2 => {
                Some(entry("node_skipped", Some(node_id), None))
            }

            _ => None,
        }
    }
}
