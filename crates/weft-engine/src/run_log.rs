use std::path::PathBuf;

use serde::Serialize;
use tokio::io::AsyncWriteExt;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use weft_core::event::EventBus;
use weft_core::execution::{EventKind, WorkflowExecutionEvent};
use weft_core::types::ExecutionId;

const MAX_DETAIL_CHARS: usize = 2000;

/// JSONL execution logger.
///
/// Subscribes to the EventBus and writes one execution's events to
/// `{log_dir}/{execution_id}.jsonl`, one JSON object per line, flushed after
/// every line so a crash never loses what was already written.
pub struct RunLogger {
    log_dir: PathBuf,
    level: u8,
}

/// A single log entry written to the JSONL file.
#[derive(Serialize)]
struct LogEntry {
    timestamp: String,
    execution_id: String,
    seq: u64,
    event_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    node_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    duration_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    detail: Option<serde_json::Value>,
}

impl RunLogger {
    /// `level` controls verbosity: 1 = failures only, 2 = per-node,
    /// 3 = tool calls and decisions.
    pub fn new(log_dir: PathBuf, level: u8) -> Self {
        Self { log_dir, level }
    }

    /// Subscribe now and write in the background until `cancel` fires.
    ///
    /// Subscribing before the task starts guarantees that every event
    /// published after this call is seen.
    pub fn spawn(
        self,
        bus: &EventBus,
        execution_id: ExecutionId,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        let rx = bus.subscribe();
        tokio::spawn(self.run(rx, execution_id, cancel))
    }

    pub async fn run(
        self,
        mut rx: broadcast::Receiver<WorkflowExecutionEvent>,
        execution_id: ExecutionId,
        cancel: CancellationToken,
    ) {
        if let Err(e) = tokio::fs::create_dir_all(&self.log_dir).await {
            error!(error = %e, "Failed to create log directory");
            return;
        }

        let log_path = self.log_dir.join(format!("{}.jsonl", execution_id));
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
            // Drain pending events before honouring cancellation.
            tokio::select! {
                biased;
                result = rx.recv() => {
                    match result {
                        Ok(event) => {
                            if event.execution_id != execution_id {
                                continue;
                            }
                            if let Some(entry) = self.entry(&event) {
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
                            }
                            // An error event always ends the execution
                            if event.kind == EventKind::Error {
                                break;
                            }
                        }
                        Err(broadcast::error::RecvError::Lagged(n)) => {
                            debug!(skipped = n, "RunLogger lagged, skipped events");
                        }
                        Err(broadcast::error::RecvError::Closed) => {
                            debug!("EventBus closed, RunLogger stopping");
                            break;
                        }
                    }
                }
                _ = cancel.cancelled() => {
                    debug!("RunLogger cancelled");
                    break;
                }
            }
        }

        writer.flush().await.ok();
        debug!(path = %log_path.display(), "RunLogger finished");
    }

    /// Convert an event to a log entry (None if filtered by level).
    fn entry(&self, event: &WorkflowExecutionEvent) -> Option<LogEntry> {
        let min_level = match event.kind {
            EventKind::Error | EventKind::NodeFailed => 1,
            EventKind::NodeStarted | EventKind::NodeCompleted => 2,
            EventKind::ToolCalled | EventKind::DecisionMade => 3,
        };
        if self.level < min_level {
            return None;
        }

        let detail = if event.data.is_null() {
            None
        } else {
            Some(truncate_json(serde_json::Value::from(event.data.clone()), MAX_DETAIL_CHARS))
        };
        Some(LogEntry {
            timestamp: event.timestamp.to_rfc3339(),
            execution_id: event.execution_id.to_string(),
            seq: event.seq,
            event_type: event.kind.to_string(),
            node_id: event.node_id.clone(),
            duration_ms: event.metadata.duration_ms,
            detail,
        })
    }
}

/// Replace an oversized JSON value with a truncated string preview.
fn truncate_json(value: serde_json::Value, max_chars: usize) -> serde_json::Value {
    let s = value.to_string();
    if s.chars().count() <= max_chars {
        value
    } else {
        let preview: String = s.chars().take(max_chars).collect();
        serde_json::Value::String(format!("{}...", preview))
    }
}
