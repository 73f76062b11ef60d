use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{ErrorKind, WeftError};
use crate::types::{CallerContext, ExecutionId};
use crate::value::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Queued,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl ExecutionStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Queued => "queued",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// Why an execution ended in `failed` or `cancelled`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionFailure {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_id: Option<String>,
    pub kind: ErrorKind,
    pub message: String,
}

impl ExecutionFailure {
    pub fn from_error(node_id: Option<&str>, err: &WeftError) -> Self {
        Self {
            node_id: node_id.map(str::to_string),
            kind: err.kind(),
            message: err.to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    NodeStarted,
    NodeCompleted,
    NodeFailed,
    ToolCalled,
    DecisionMade,
    Error,
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::NodeStarted => "node_started",
            Self::NodeCompleted => "node_completed",
            Self::NodeFailed => "node_failed",
            Self::ToolCalled => "tool_called",
            Self::DecisionMade => "decision_made",
            Self::Error => "error",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EventMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_count: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tokens: Option<u64>,
}

impl EventMetadata {
    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }

    pub fn with_duration_ms(mut self, ms: u64) -> Self {
        self.duration_ms = Some(ms);
        self
    }
}

/// Immutable entry of an execution's event log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowExecutionEvent {
    /// Position in the execution's log, starting at 0.
    pub seq: u64,
    pub execution_id: ExecutionId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_id: Option<String>,
    #[serde(rename = "type")]
    pub kind: EventKind,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub data: Value,
    #[serde(default, skip_serializing_if = "EventMetadata::is_empty")]
    pub metadata: EventMetadata,
}

/// An event not yet placed in the log. The store assigns `seq`.
#[derive(Debug, Clone, PartialEq)]
pub struct NewEvent {
    pub node_id: Option<String>,
    pub kind: EventKind,
    pub data: Value,
    pub metadata: EventMetadata,
}

impl NewEvent {
    pub fn new(kind: EventKind, node_id: Option<&str>, data: Value) -> Self {
        Self {
            node_id: node_id.map(str::to_string),
            kind,
            data,
            metadata: EventMetadata::default(),
        }
    }

    pub fn with_metadata(mut self, metadata: EventMetadata) -> Self {
        self.metadata = metadata;
        self
    }
}

/// One run of a workflow version.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowExecution {
    pub id: ExecutionId,
    pub workflow_id: String,
    pub workflow_version_id: String,
    pub status: ExecutionStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_node_id: Option<String>,
    pub input: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ExecutionFailure>,
    /// Node id -> accumulated output of that node.
    #[serde(default)]
    pub state: BTreeMap<String, Value>,
    /// Node ids in the order they completed (repeats on revisits).
    #[serde(default)]
    pub completed_nodes: Vec<String>,
    pub caller: CallerContext,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
}

impl WorkflowExecution {
    pub fn new(
        workflow_id: impl Into<String>,
        workflow_version_id: impl Into<String>,
        input: Value,
        caller: CallerContext,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: ExecutionId::new(),
            workflow_id: workflow_id.into(),
            workflow_version_id: workflow_version_id.into(),
            status: ExecutionStatus::Queued,
            current_node_id: None,
            input,
            output: None,
            error: None,
            state: BTreeMap::new(),
            completed_nodes: vec![],
            caller,
            created_at: now,
            updated_at: now,
            finished_at: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

/// Node output merged into execution state when a node completes.
#[derive(Debug, Clone, PartialEq)]
pub struct StateDelta {
    pub node_id: String,
    pub value: Value,
}

/// An atomic change to an execution record: status, routing position,
/// state and new log entries are applied together or not at all.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StepCommit {
    pub status: Option<ExecutionStatus>,
    pub current_node_id: Option<String>,
    /// Records that a node completed, even when it produced no state.
    pub completed_node: Option<String>,
    pub state_delta: Option<StateDelta>,
    pub output: Option<Value>,
    pub error: Option<ExecutionFailure>,
    pub events: Vec<NewEvent>,
}

impl StepCommit {
    pub fn event(event: NewEvent) -> Self {
        Self {
            events: vec![event],
            ..Default::default()
        }
    }

    pub fn with_event(mut self, event: NewEvent) -> Self {
        self.events.push(event);
        self
    }

    pub fn with_status(mut self, status: ExecutionStatus) -> Self {
        self.status = Some(status);
        self
    }
}

/// Result of applying a [`StepCommit`].
#[derive(Debug, Clone, PartialEq)]
pub enum CommitOutcome {
    /// Applied; carries the events as written to the log.
    Applied(Vec<WorkflowExecutionEvent>),
    /// The execution was already terminal; nothing was written.
    Rejected(ExecutionStatus),
}

impl CommitOutcome {
    pub fn is_applied(&self) -> bool {
        matches!(self, Self::Applied(_))
    }
}
