use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::policy::ToolPolicy;
use crate::value::Value;

/// Unique execution identifier.
#[derive(Debug, Clone, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ExecutionId(pub String);

impl ExecutionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn from_string(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl Default for ExecutionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ExecutionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Who triggered an execution. Rate limits are accounted per tenant.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallerContext {
    pub tenant_id: String,
    pub user_id: String,
}

impl CallerContext {
    pub fn new(tenant_id: impl Into<String>, user_id: impl Into<String>) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            user_id: user_id.into(),
        }
    }
}

/// Context passed to tools during execution.
#[derive(Debug, Clone)]
pub struct ToolContext {
    pub execution_id: ExecutionId,
    pub node_id: String,
    pub caller: CallerContext,
    pub cancel: CancellationToken,
    /// Effective policy for this call. The invoker overwrites whatever the
    /// caller put here before the tool runs.
    pub policy: ToolPolicy,
}

impl ToolContext {
    pub fn new(
        execution_id: ExecutionId,
        node_id: impl Into<String>,
        caller: CallerContext,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            execution_id,
            node_id: node_id.into(),
            caller,
            cancel,
            policy: ToolPolicy::default(),
        }
    }
}

/// Result of a tool execution.
#[derive(Debug, Clone)]
pub struct ToolResult {
    pub content: serde_json::Value,
    pub is_error: bool,
}

impl ToolResult {
    pub fn success(content: impl Into<serde_json::Value>) -> Self {
        Self {
            content: content.into(),
            is_error: false,
        }
    }

    pub fn error(content: impl Into<serde_json::Value>) -> Self {
        Self {
            content: content.into(),
            is_error: true,
        }
    }
}

/// Tool definition handed to the agent client.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub input_schema: serde_json::Value,
}

/// A tool call requested by an agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub input: serde_json::Value,
}

/// Outcome of a tool call fed back to the agent on the next turn.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCallResult {
    pub call_id: String,
    pub name: String,
    pub output: serde_json::Value,
}

/// Request sent to the agent-call capability for one turn of an agent node.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentRequest {
    pub execution_id: ExecutionId,
    pub node_id: String,
    pub system_prompt: String,
    pub tools: Vec<ToolDefinition>,
    #[serde(default)]
    pub params: serde_json::Value,
    pub state: Value,
    #[serde(default)]
    pub tool_results: Vec<ToolCallResult>,
    pub turn: usize,
}

/// Token usage reported by the agent backend.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    #[serde(default)]
    pub input_tokens: u64,
    #[serde(default)]
    pub output_tokens: u64,
}

impl TokenUsage {
    pub fn add(&mut self, other: TokenUsage) {
        self.input_tokens += other.input_tokens;
        self.output_tokens += other.output_tokens;
    }

    pub fn total(&self) -> u64 {
        self.input_tokens + self.output_tokens
    }
}

/// Response of the agent-call capability.
///
/// A non-empty `tool_calls` asks the executor to run those tools and call the
/// agent again; otherwise `output` is the node's final output.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AgentResponse {
    #[serde(default)]
    pub output: Value,
    #[serde(default)]
    pub tool_calls: Vec<ToolCall>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub usage: TokenUsage,
}

impl AgentResponse {
    pub fn text(output: impl Into<Value>) -> Self {
        Self {
            output: output.into(),
            ..Default::default()
        }
    }
}

/// Record of one tool invocation, kept for rate-limit accounting and
/// observability.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolExecution {
    pub tool_name: String,
    pub input: serde_json::Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub start_time: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,
    pub context: CallerContext,
}

impl ToolExecution {
    pub fn duration_ms(&self) -> Option<u64> {
        self.end_time
            .map(|end| (end - self.start_time).num_milliseconds().max(0) as u64)
    }
}
