use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum WeftError {
    // Lookup errors
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    // Graph / input validation
    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    // Tool errors
    #[error("Tool not found: {0}")]
    ToolNotFound(String),

    #[error("Tool execution failed: {tool}: {message}")]
    ToolExecution { tool: String, message: String },

    #[error("Tool timeout after {timeout_secs}s: {tool}")]
    ToolTimeout { tool: String, timeout_secs: u64 },

    #[error("Tool input validation failed: {tool}: {message}")]
    ToolValidation { tool: String, message: String },

    #[error("Host '{host}' is not in the allowlist of tool {tool}")]
    DomainNotAllowed { tool: String, host: String },

    #[error("Rate limit exceeded for tool {tool} (tenant {tenant}): {max_calls} calls per {window_secs}s")]
    RateLimited {
        tool: String,
        tenant: String,
        max_calls: u32,
        window_secs: u64,
    },

    // Node execution errors
    #[error("Agent request failed: {0}")]
    AgentRequest(String),

    #[error("Webhook returned HTTP {status}: {url}")]
    WebhookStatus { url: String, status: u16 },

    #[error("Node {node} panicked: {message}")]
    NodePanicked { node: String, message: String },

    #[error("No outgoing edge of node {node} matched: {reason}")]
    Routing { node: String, reason: String },

    #[error("Execution cancelled")]
    Cancelled,

    #[error("Execution exceeded max duration ({0}s)")]
    MaxDurationExceeded(u64),

    #[error("Execution exceeded max steps ({0})")]
    MaxStepsExceeded(usize),

    // Config errors
    #[error("Config error: {0}")]
    Config(String),

    #[error("Config file not found: {0}")]
    ConfigNotFound(String),

    // Storage errors
    #[error("Database error: {0}")]
    Database(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, WeftError>;

/// Coarse error category surfaced to callers and recorded on failed executions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    NotFound,
    Validation,
    Execution,
    RateLimit,
    Conflict,
    Storage,
    Cancelled,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::NotFound => "not_found",
            Self::Validation => "validation",
            Self::Execution => "execution",
            Self::RateLimit => "rate_limit",
            Self::Conflict => "conflict",
            Self::Storage => "storage",
            Self::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

impl WeftError {
    pub fn not_found(entity: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            entity,
            id: id.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::Validation(_)
            | Self::ToolValidation { .. }
            | Self::DomainNotAllowed { .. }
            | Self::Config(_)
            | Self::ConfigNotFound(_) => ErrorKind::Validation,
            Self::Conflict(_) => ErrorKind::Conflict,
            Self::RateLimited { .. } => ErrorKind::RateLimit,
            Self::Cancelled => ErrorKind::Cancelled,
            Self::Database(_) | Self::Io(_) => ErrorKind::Storage,
            Self::ToolNotFound(_)
            | Self::ToolExecution { .. }
            | Self::ToolTimeout { .. }
            | Self::AgentRequest(_)
            | Self::WebhookStatus { .. }
            | Self::NodePanicked { .. }
            | Self::Routing { .. }
            | Self::MaxDurationExceeded(_)
            | Self::MaxStepsExceeded(_)
            | Self::Json(_) => ErrorKind::Execution,
        }
    }

    /// Wrap a storage failure with the operation that triggered it.
    pub fn storage(context: &str, err: impl fmt::Display) -> Self {
        Self::Database(format!("{}: {}", context, err))
    }
}
