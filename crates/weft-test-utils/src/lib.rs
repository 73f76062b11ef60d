//! Shared test utilities, mocks, and fixtures for Weft crates.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::future::BoxFuture;
use serde_json::json;

use weft_core::error::{Result, WeftError};
use weft_core::traits::{AgentClient, Tool};
use weft_core::types::{
    AgentRequest, AgentResponse, CallerContext, ToolCall, ToolContext, ToolResult,
};
use weft_core::policy::ToolPolicy;
use weft_core::workflow::{WorkflowDefinition, WorkflowEdge, WorkflowNode};
use weft_core::Value;

/// Scripted reply of [`MockAgentClient`].
#[derive(Debug, Clone)]
pub enum MockReply {
    Respond(AgentResponse),
    Fail(String),
    Panic(String),
    /// Never completes; only cancellation ends the call.
    Hang,
}

impl MockReply {
    pub fn output(value: serde_json::Value) -> Self {
        Self::Respond(AgentResponse::text(Value::from(value)))
    }

    pub fn tool_call(name: &str, input: serde_json::Value) -> Self {
        Self::Respond(AgentResponse {
            tool_calls: vec![ToolCall {
                id: format!("call-{}", name),
                name: name.to_string(),
                input,
            }],
            ..Default::default()
        })
    }
}

/// Agent client replaying scripted replies per node id.
///
/// Nodes without a script answer with an empty object.
#[derive(Default)]
pub struct MockAgentClient {
    scripts: Mutex<HashMap<String, VecDeque<MockReply>>>,
    requests: Mutex<Vec<AgentRequest>>,
}

impl MockAgentClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a reply for the next call made by `node_id`.
    pub fn reply(self, node_id: &str, reply: MockReply) -> Self {
        self.push(node_id, reply);
        self
    }

    pub fn push(&self, node_id: &str, reply: MockReply) {
        let mut scripts = self.scripts.lock().unwrap();
        scripts
            .entry(node_id.to_string())
            .or_default()
            .push_back(reply);
    }

    /// All requests received so far.
    pub fn requests(&self) -> Vec<AgentRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn calls_for(&self, node_id: &str) -> usize {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.node_id == node_id)
            .count()
    }
}

impl AgentClient for MockAgentClient {
    fn invoke(&self, request: AgentRequest) -> BoxFuture<'_, Result<AgentResponse>> {
        let reply = self
            .scripts
            .lock()
            .unwrap()
            .get_mut(&request.node_id)
            .and_then(|q| q.pop_front());
        self.requests.lock().unwrap().push(request);

        Box::pin(async move {
            match reply {
                None => Ok(AgentResponse::text(Value::object())),
                Some(MockReply::Respond(resp)) => Ok(resp),
                Some(MockReply::Fail(msg)) => Err(WeftError::AgentRequest(msg)),
                Some(MockReply::Panic(msg)) => panic!("{}", msg),
                Some(MockReply::Hang) => futures::future::pending().await,
            }
        })
    }
}

/// Behaviour of a [`MockTool`].
#[derive(Debug, Clone)]
pub enum MockBehavior {
    Respond(serde_json::Value),
    Fail(String),
    /// Sleep, then respond.
    Slow(Duration, serde_json::Value),
}

/// Configurable tool recording every input it receives.
pub struct MockTool {
    name: String,
    required: Vec<String>,
    behavior: MockBehavior,
    policy: ToolPolicy,
    calls: AtomicUsize,
    inputs: Mutex<Vec<serde_json::Value>>,
}

impl MockTool {
    pub fn new(name: &str, behavior: MockBehavior) -> Self {
        Self {
            name: name.to_string(),
            required: vec![],
            behavior,
            policy: ToolPolicy::default(),
            calls: AtomicUsize::new(0),
            inputs: Mutex::new(vec![]),
        }
    }

    pub fn responding(name: &str, output: serde_json::Value) -> Self {
        Self::new(name, MockBehavior::Respond(output))
    }

    /// Stand-in for the `http_request` transport returning a fixed status.
    pub fn http(status: u16, body: serde_json::Value) -> Self {
        Self::responding("http_request", json!({"status": status, "body": body}))
    }

    pub fn with_required(mut self, fields: &[&str]) -> Self {
        self.required = fields.iter().map(|f| f.to_string()).collect();
        self
    }

    pub fn with_policy(mut self, policy: ToolPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn inputs(&self) -> Vec<serde_json::Value> {
        self.inputs.lock().unwrap().clone()
    }
}

impl Tool for MockTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        "Mock tool"
    }

    fn input_schema(&self) -> serde_json::Value {
        json!({"type": "object", "required": self.required})
    }

    fn policy(&self) -> ToolPolicy {
        self.policy.clone()
    }

    fn execute(
        &self,
        input: serde_json::Value,
        _ctx: ToolContext,
    ) -> BoxFuture<'_, Result<ToolResult>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inputs.lock().unwrap().push(input);
        let behavior = self.behavior.clone();
        Box::pin(async move {
            match behavior {
                MockBehavior::Respond(v) => Ok(ToolResult::success(v)),
                MockBehavior::Fail(msg) => Ok(ToolResult::error(msg)),
                MockBehavior::Slow(d, v) => {
                    tokio::time::sleep(d).await;
                    Ok(ToolResult::success(v))
                }
            }
        })
    }
}

/// Shared handle so tests can keep inspecting a tool after registering it.
pub fn shared(tool: MockTool) -> Arc<MockTool> {
    Arc::new(tool)
}

pub fn caller() -> CallerContext {
    CallerContext::new("tenant-1", "user-1")
}

/// `A(agent) -> B(condition: x >= 5) -> C(agent)`, with fallback `B -> D(agent)`.
pub fn lead_routing_definition() -> WorkflowDefinition {
    WorkflowDefinition::new("A")
        .with_workflow_id("lead-routing")
        .node(WorkflowNode::agent("A", "Score the lead."))
        .node(WorkflowNode::condition("B", "x >= 5"))
        .node(WorkflowNode::agent("C", "Book a meeting."))
        .node(WorkflowNode::agent("D", "Send a nurture email."))
        .edge(WorkflowEdge::always("A", "B"))
        .edge(WorkflowEdge::conditional("B", "C", "condition == true"))
        .edge(WorkflowEdge::always("B", "D"))
}

/// Straight line of agent nodes `n0 -> n1 -> ...`.
pub fn linear_definition(len: usize) -> WorkflowDefinition {
    let mut def = WorkflowDefinition::new("n0").with_workflow_id("linear");
    for i in 0..len {
        def = def.node(WorkflowNode::agent(format!("n{}", i), format!("Step {}", i)));
        if i > 0 {
            def = def.edge(WorkflowEdge::always(format!("n{}", i - 1), format!("n{}", i)));
        }
    }
    def
}
