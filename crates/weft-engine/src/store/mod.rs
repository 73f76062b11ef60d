//! Version and execution persistence backends.

pub mod memory;
pub mod sqlite;

pub use memory::{InMemoryExecutionStore, InMemoryVersionStore};
pub use sqlite::SqliteVersionStore;

use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};

use weft_core::error::{Result, WeftError};
use weft_core::execution::{StepCommit, WorkflowExecution, WorkflowExecutionEvent};

pub(crate) fn lock<'a, T>(mutex: &'a Mutex<T>, what: &str) -> Result<MutexGuard<'a, T>> {
    mutex
        .lock()
        .map_err(|_| WeftError::Database(format!("{} lock poisoned", what)))
}

/// Apply a commit to a non-terminal execution and its log.
///
/// Returns the appended events with their assigned sequence numbers.
pub(crate) fn apply_commit(
    execution: &mut WorkflowExecution,
    log: &mut Vec<WorkflowExecutionEvent>,
    commit: StepCommit,
    now: DateTime<Utc>,
) -> Vec<WorkflowExecutionEvent> {
    if let Some(status) = commit.status {
        execution.status = status;
        if status.is_terminal() {
            execution.finished_at = Some(now);
        }
    }
    if let Some(node_id) = commit.current_node_id {
        execution.current_node_id = Some(node_id);
    }
    if let Some(node_id) = commit.completed_node {
        execution.completed_nodes.push(node_id);
    }
    if let Some(delta) = commit.state_delta {
        execution
            .state
            .entry(delta.node_id)
            .or_default()
            .merge(delta.value);
    }
    if let Some(output) = commit.output {
        execution.output = Some(output);
    }
    if let Some(error) = commit.error {
        execution.error = Some(error);
    }
    execution.updated_at = now;

    let appended: Vec<WorkflowExecutionEvent> = commit
        .events
        .into_iter()
        .enumerate()
        .map(|(i, event)| WorkflowExecutionEvent {
            seq: (log.len() + i) as u64,
            execution_id: execution.id.clone(),
            node_id: event.node_id,
            kind: event.kind,
            timestamp: now,
            data: event.data,
            metadata: event.metadata,
        })
        .collect();
    log.extend(appended.iter().cloned());
    appended
}
