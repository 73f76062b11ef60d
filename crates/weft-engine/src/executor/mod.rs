//! Node executors: one strategy per node kind, selected through a dispatch
//! table keyed by [`NodeKind`].

pub mod agent;
pub mod condition;
pub mod delay;
pub mod webhook;

use std::collections::HashMap;
use std::sync::Arc;

use futures::future::BoxFuture;
use tokio_util::sync::CancellationToken;

use weft_core::error::{Result, WeftError};
use weft_core::execution::{CommitOutcome, EventKind, EventMetadata, NewEvent, StepCommit, WorkflowExecution};
use weft_core::traits::AgentClient;
use weft_core::types::ToolContext;
use weft_core::workflow::{NodeKind, WorkflowNode};
use weft_core::Value;
use weft_tools::ToolInvoker;

use crate::journal::Journal;

pub use agent::AgentExecutor;
pub use condition::ConditionExecutor;
pub use delay::DelayExecutor;
pub use webhook::WebhookExecutor;

/// What a node produced.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeOutcome {
    pub output: Value,
    /// Merged into `state[node_id]` when the node completes.
    pub state_delta: Option<Value>,
    /// Attached to the `node_completed` event.
    pub metadata: EventMetadata,
}

impl NodeOutcome {
    /// Output that does not touch execution state.
    pub fn output(output: Value) -> Self {
        Self {
            output,
            state_delta: None,
            metadata: EventMetadata::default(),
        }
    }

    /// Output that is also recorded as the node's state.
    pub fn stateful(output: Value) -> Self {
        Self {
            state_delta: Some(output.clone()),
            output,
            metadata: EventMetadata::default(),
        }
    }

    pub fn with_metadata(mut self, metadata: EventMetadata) -> Self {
        self.metadata = metadata;
        self
    }
}

/// Appends node-scoped events to the running execution's log.
pub struct NodeEvents<'a> {
    journal: &'a Journal,
    execution: &'a WorkflowExecution,
    node_id: &'a str,
}

impl<'a> NodeEvents<'a> {
    pub fn new(journal: &'a Journal, execution: &'a WorkflowExecution, node_id: &'a str) -> Self {
        Self {
            journal,
            execution,
            node_id,
        }
    }

    /// Append one event. Fails with `Cancelled` once the execution has
    /// reached a terminal state behind the executor's back.
    pub fn record(&self, kind: EventKind, data: Value, metadata: EventMetadata) -> Result<()> {
        let event = NewEvent::new(kind, Some(self.node_id), data).with_metadata(metadata);
        match self.journal.commit(&self.execution.id, StepCommit::event(event))? {
            CommitOutcome::Applied(_) => Ok(()),
            CommitOutcome::Rejected(_) => Err(WeftError::Cancelled),
        }
    }
}

/// Everything an executor may read while running one node.
pub struct NodeContext<'a> {
    /// Snapshot of the execution taken before the node started.
    pub execution: &'a WorkflowExecution,
    pub node: &'a WorkflowNode,
    pub cancel: &'a CancellationToken,
    pub events: NodeEvents<'a>,
}

impl NodeContext<'_> {
    pub fn tool_context(&self) -> ToolContext {
        ToolContext::new(
            self.execution.id.clone(),
            self.node.id.clone(),
            self.execution.caller.clone(),
            self.cancel.clone(),
        )
    }

    pub(crate) fn kind_mismatch(&self, expected: NodeKind) -> WeftError {
        WeftError::Validation(format!(
            "node '{}' is a {} node, not {}",
            self.node.id,
            self.node.kind(),
            expected
        ))
    }
}

/// Executes one kind of node.
pub trait NodeExecutor: Send + Sync + 'static {
    fn execute<'a>(&'a self, ctx: &'a NodeContext<'a>) -> BoxFuture<'a, Result<NodeOutcome>>;
}

/// Dispatch table from node kind to executor.
#[derive(Clone)]
pub struct ExecutorTable {
    executors: HashMap<NodeKind, Arc<dyn NodeExecutor>>,
}

impl ExecutorTable {
    /// Table with the built-in executor for every node kind.
    pub fn new(agent: Arc<dyn AgentClient>, invoker: Arc<ToolInvoker>) -> Self {
        let mut executors: HashMap<NodeKind, Arc<dyn NodeExecutor>> = HashMap::new();
        executors.insert(
            NodeKind::Agent,
            Arc::new(AgentExecutor::new(agent, invoker.clone())),
        );
        executors.insert(NodeKind::Condition, Arc::new(ConditionExecutor));
        executors.insert(NodeKind::Delay, Arc::new(DelayExecutor));
        executors.insert(NodeKind::Webhook, Arc::new(WebhookExecutor::new(invoker)));
        Self { executors }
    }

    /// Replace the executor used for `kind`.
    pub fn with(mut self, kind: NodeKind, executor: Arc<dyn NodeExecutor>) -> Self {
        self.executors.insert(kind, executor);
        self
    }

    pub fn get(&self, kind: NodeKind) -> Option<Arc<dyn NodeExecutor>> {
        self.executors.get(&kind).cloned()
    }
}
