use futures::future::BoxFuture;

use crate::error::Result;
use crate::execution::{CommitOutcome, StepCommit, WorkflowExecution, WorkflowExecutionEvent};
use crate::policy::ToolPolicy;
use crate::types::*;
use crate::workflow::WorkflowVersion;

/// Tool — an opaque invocable capability with a declared schema and policy.
pub trait Tool: Send + Sync + 'static {
    /// Tool name (used in agent tool calls and webhook transport).
    fn name(&self) -> &str;

    /// Human-readable description.
    fn description(&self) -> &str;

    /// JSON Schema for tool input. `required` is enforced before execution.
    fn input_schema(&self) -> serde_json::Value;

    /// Execute the tool with given input and context.
    fn execute(
        &self,
        input: serde_json::Value,
        ctx: ToolContext,
    ) -> BoxFuture<'_, Result<ToolResult>>;

    /// Timeout in seconds for this tool.
    fn timeout_secs(&self) -> u64 {
        30
    }

    /// Default policy; config overrides are layered on top.
    fn policy(&self) -> ToolPolicy {
        ToolPolicy::default()
    }

    /// URL this call will reach, checked against the domain allowlist.
    fn target_url(&self, input: &serde_json::Value) -> Option<String> {
        input.get("url").and_then(|v| v.as_str()).map(str::to_string)
    }
}

/// Agent-call capability used by agent nodes. Opaque to the engine.
pub trait AgentClient: Send + Sync + 'static {
    fn invoke(&self, request: AgentRequest) -> BoxFuture<'_, Result<AgentResponse>>;
}

/// Workflow version persistence.
///
/// Implementations must apply `activate` atomically: the target becomes
/// `active` and every other version of the workflow becomes `deprecated`
/// with no intermediate state observable.
pub trait VersionStore: Send + Sync + 'static {
    /// Insert a new version. Fails with `Conflict` if the id exists.
    fn insert(&self, version: WorkflowVersion) -> Result<()>;

    /// Replace a stored version. Only `draft` versions may be replaced.
    fn replace(&self, version: WorkflowVersion) -> Result<()>;

    fn activate(&self, workflow_id: &str, version_id: &str) -> Result<()>;

    fn get(&self, version_id: &str) -> Result<WorkflowVersion>;

    /// All versions, optionally restricted to one workflow, oldest first.
    fn list(&self, workflow_id: Option<&str>) -> Result<Vec<WorkflowVersion>>;

    fn delete(&self, version_id: &str) -> Result<()>;
}

/// Execution record persistence.
///
/// `commit` is the only mutation after insert; it must apply a
/// [`StepCommit`] atomically and reject it once the execution is terminal.
pub trait ExecutionStore: Send + Sync + 'static {
    fn insert(&self, execution: WorkflowExecution) -> Result<()>;

    fn get(&self, id: &ExecutionId) -> Result<WorkflowExecution>;

    fn events(&self, id: &ExecutionId) -> Result<Vec<WorkflowExecutionEvent>>;

    /// Executions, optionally restricted to one workflow.
    fn list(&self, workflow_id: Option<&str>) -> Result<Vec<WorkflowExecution>>;

    fn commit(&self, id: &ExecutionId, commit: StepCommit) -> Result<CommitOutcome>;
}
