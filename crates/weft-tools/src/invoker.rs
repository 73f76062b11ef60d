use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use tracing::{debug, warn};

use weft_core::config::EngineConfig;
use weft_core::error::{Result, WeftError};
use weft_core::policy::ToolPolicy;
use weft_core::traits::Tool;
use weft_core::types::{ToolContext, ToolDefinition, ToolExecution};

use crate::rate_limit::RateLimiter;
use crate::registry::ToolRegistry;

const DEFAULT_HISTORY_CAPACITY: usize = 1024;

/// ToolInvoker — the single path from node executors to tools.
///
/// Every call is validated against the tool's schema and domain allowlist,
/// admitted by the per-(tool, tenant) rate limit, executed under a timeout
/// and the caller's cancellation token, and recorded as a [`ToolExecution`]
/// whether it succeeded, failed or was rejected.
pub struct ToolInvoker {
    tools: ToolRegistry,
    overrides: HashMap<String, ToolPolicy>,
    limiter: RateLimiter,
    history: Mutex<VecDeque<ToolExecution>>,
    history_capacity: usize,
}

impl ToolInvoker {
    pub fn new(registry: ToolRegistry) -> Self {
        Self {
            tools: registry,
            overrides: HashMap::new(),
            limiter: RateLimiter::new(),
            history: Mutex::new(VecDeque::new()),
            history_capacity: DEFAULT_HISTORY_CAPACITY,
        }
    }

    /// Create an invoker applying the `[tools.*]` policy overrides from config.
    pub fn from_config(registry: ToolRegistry, config: &EngineConfig) -> Self {
        let mut invoker = Self::new(registry);
        invoker.overrides = config.tools.clone();
        invoker
    }

    pub fn with_policy(mut self, tool: impl Into<String>, policy: ToolPolicy) -> Self {
        self.overrides.insert(tool.into(), policy);
        self
    }

    pub fn with_history_capacity(mut self, capacity: usize) -> Self {
        self.history_capacity = capacity;
        self
    }

    /// Definitions of the named tools, for handing to an agent.
    pub fn definitions(&self, names: &[String]) -> Vec<ToolDefinition> {
        self.tools.definitions(names)
    }

    fn resolve(&self, name: &str) -> Result<(Arc<dyn Tool>, ToolPolicy)> {
        let tool = self.tools.require(name)?;
        let policy = self.effective_policy(tool.as_ref());
        Ok((tool, policy))
    }

    fn effective_policy(&self, tool: &dyn Tool) -> ToolPolicy {
        let base = tool.policy();
        match self.overrides.get(tool.name()) {
            Some(over) => base.overlay(over),
            None => base,
        }
    }

    /// Effective policy for a tool (declared default plus overrides).
    pub fn policy(&self, name: &str) -> Result<ToolPolicy> {
        Ok(self.resolve(name)?.1)
    }

    /// Check the input against the tool's schema and domain allowlist.
    pub fn validate(&self, name: &str, input: &serde_json::Value) -> Result<()> {
        let (tool, policy) = self.resolve(name)?;
        validate_input(tool.as_ref(), &policy, input)
    }

    /// Would a call for `tenant` be admitted right now? Records nothing.
    pub fn check_rate_limit(&self, name: &str, tenant: &str) -> Result<bool> {
        let (_, policy) = self.resolve(name)?;
        Ok(match policy.rate_limit {
            Some(limit) => self
                .limiter
                .check_at(name, tenant, limit, std::time::Instant::now()),
            None => true,
        })
    }

    /// Validate, admit, execute and record one tool call.
    pub async fn execute(
        &self,
        name: &str,
        input: serde_json::Value,
        ctx: ToolContext,
    ) -> Result<serde_json::Value> {
        let mut record = ToolExecution {
            tool_name: name.to_string(),
            input: input.clone(),
            output: None,
            error: None,
            start_time: Utc::now(),
            end_time: None,
            context: ctx.caller.clone(),
        };

        let result = self.invoke(name, input, ctx).await;

        record.end_time = Some(Utc::now());
        match &result {
            Ok(output) => record.output = Some(output.clone()),
            Err(e) => record.error = Some(e.to_string()),
        }
        self.record(record);

        result
    }

    async fn invoke(
        &self,
        name: &str,
        input: serde_json::Value,
        mut ctx: ToolContext,
    ) -> Result<serde_json::Value> {
        let (tool, policy) = self.resolve(name)?;
        validate_input(tool.as_ref(), &policy, &input)?;

        let tenant = ctx.caller.tenant_id.clone();
        if let Some(limit) = policy.rate_limit {
            if !self.limiter.try_acquire(name, &tenant, limit) {
                warn!(tool = %name, tenant = %tenant, "Tool call denied by rate limit");
                return Err(WeftError::RateLimited {
                    tool: name.to_string(),
                    tenant,
                    max_calls: limit.max_calls,
                    window_secs: limit.window_secs,
                });
            }
        }

        let timeout_secs = policy.timeout_secs.unwrap_or_else(|| tool.timeout_secs());
        ctx.policy = policy;

        debug!(tool = %name, execution_id = %ctx.execution_id, node_id = %ctx.node_id, "Invoking tool");

        let cancel = ctx.cancel.clone();
        let result = tokio::select! {
            _ = cancel.cancelled() => Err(WeftError::Cancelled),
            outcome = tokio::time::timeout(Duration::from_secs(timeout_secs), tool.execute(input, ctx)) => {
                match outcome {
                    Ok(result) => result,
                    Err(_) => Err(WeftError::ToolTimeout {
                        tool: name.to_string(),
                        timeout_secs,
                    }),
                }
            }
        };

        result.and_then(|r| {
            if r.is_error {
                Err(WeftError::ToolExecution {
                    tool: name.to_string(),
                    message: match r.content {
                        serde_json::Value::String(s) => s,
                        other => other.to_string(),
                    },
                })
            } else {
                Ok(r.content)
            }
        })
    }

    fn record(&self, execution: ToolExecution) {
        let mut history = match self.history.lock() {
            Ok(h) => h,
            Err(poisoned) => poisoned.into_inner(),
        };
        if history.len() >= self.history_capacity {
            history.pop_front();
        }
        history.push_back(execution);
    }

    /// Most recent tool executions, oldest first.
    pub fn recent_executions(&self, limit: usize) -> Vec<ToolExecution> {
        let history = match self.history.lock() {
            Ok(h) => h,
            Err(poisoned) => poisoned.into_inner(),
        };
        let skip = history.len().saturating_sub(limit);
        history.iter().skip(skip).cloned().collect()
    }
}

fn validate_input(tool: &dyn Tool, policy: &ToolPolicy, input: &serde_json::Value) -> Result<()> {
    let schema = tool.input_schema();
    let required: Vec<&str> = schema
        .get("required")
        .and_then(|r| r.as_array())
        .map(|r| r.iter().filter_map(|v| v.as_str()).collect())
        .unwrap_or_default();

    if !required.is_empty() {
        let obj = input.as_object().ok_or_else(|| WeftError::ToolValidation {
            tool: tool.name().to_string(),
            message: "input must be an object".to_string(),
        })?;
        let missing: Vec<&str> = required
            .into_iter()
            .filter(|field| obj.get(*field).map_or(true, |v| v.is_null()))
            .collect();
        if !missing.is_empty() {
            return Err(WeftError::ToolValidation {
                tool: tool.name().to_string(),
                message: format!("missing required field(s): {}", missing.join(", ")),
            });
        }
    }

    if policy.is_domain_restricted() {
        let url = tool.target_url(input).ok_or_else(|| WeftError::ToolValidation {
            tool: tool.name().to_string(),
            message: "domain-restricted tool requires a target url".to_string(),
        })?;
        let parsed = reqwest::Url::parse(&url).map_err(|e| WeftError::ToolValidation {
            tool: tool.name().to_string(),
            message: format!("invalid url '{}': {}", url, e),
        })?;
        let host = parsed.host_str().unwrap_or_default();
        if !policy.allows_host(host) {
            return Err(WeftError::DomainNotAllowed {
                tool: tool.name().to_string(),
                host: host.to_string(),
            });
        }
    }

    Ok(())
}
