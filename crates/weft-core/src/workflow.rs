//! Workflow graph definitions: nodes, edges and immutable versions.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Node kind. Immutable once a node is created.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    Agent,
    Condition,
    Delay,
    Webhook,
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Agent => "agent",
            Self::Condition => "condition",
            Self::Delay => "delay",
            Self::Webhook => "webhook",
        };
        f.write_str(s)
    }
}

/// Agent node: one agent run with its own prompt and tool allowlist.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentNode {
    pub system_prompt: String,
    /// Tool names this node's agent may call (empty = no tools).
    #[serde(default)]
    pub tools: Vec<String>,
    /// Model parameters passed through to the agent backend.
    #[serde(default)]
    pub params: serde_json::Value,
    /// Maximum agent turns (tool round-trips) for this node.
    #[serde(default = "default_max_turns")]
    pub max_turns: usize,
}

fn default_max_turns() -> usize {
    10
}

impl AgentNode {
    pub fn with_tools<I, S>(mut self, tools: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tools = tools.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_params(mut self, params: serde_json::Value) -> Self {
        self.params = params;
        self
    }

    pub fn with_max_turns(mut self, turns: usize) -> Self {
        self.max_turns = turns;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConditionNode {
    pub condition: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DelayNode {
    pub delay_ms: u64,
}

/// Webhook node: outbound HTTP call made through the tool invoker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WebhookNode {
    pub url: String,
    #[serde(default = "default_method")]
    pub method: String,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<serde_json::Value>,
    /// Tool used as transport. Defaults to `http_request`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool: Option<String>,
}

fn default_method() -> String {
    "POST".to_string()
}

pub const DEFAULT_WEBHOOK_TOOL: &str = "http_request";

impl WebhookNode {
    pub fn transport_tool(&self) -> &str {
        self.tool.as_deref().unwrap_or(DEFAULT_WEBHOOK_TOOL)
    }
}

/// Kind-specific node payload.
#[derive(Debug, Clone, PartialEq)]
pub enum NodeConfig {
    Agent(AgentNode),
    Condition(ConditionNode),
    Delay(DelayNode),
    Webhook(WebhookNode),
}

impl NodeConfig {
    pub fn kind(&self) -> NodeKind {
        match self {
            Self::Agent(_) => NodeKind::Agent,
            Self::Condition(_) => NodeKind::Condition,
            Self::Delay(_) => NodeKind::Delay,
            Self::Webhook(_) => NodeKind::Webhook,
        }
    }
}

/// A node in the workflow graph.
///
/// Serialized as `{"id", "name", "kind", "config"}` with `config` holding
/// the kind-specific payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawNode", into = "RawNode")]
pub struct WorkflowNode {
    pub id: String,
    pub name: String,
    pub config: NodeConfig,
}

#[derive(Serialize, Deserialize)]
struct RawNode {
    id: String,
    #[serde(default)]
    name: String,
    kind: NodeKind,
    #[serde(default)]
    config: serde_json::Value,
}

impl TryFrom<RawNode> for WorkflowNode {
    type Error = String;

    fn try_from(raw: RawNode) -> std::result::Result<Self, Self::Error> {
        let bad = |e: serde_json::Error| format!("invalid {} config for node '{}': {}", raw.kind, raw.id, e);
        let config = match raw.kind {
            NodeKind::Agent => NodeConfig::Agent(serde_json::from_value(raw.config.clone()).map_err(bad)?),
            NodeKind::Condition => {
                NodeConfig::Condition(serde_json::from_value(raw.config.clone()).map_err(bad)?)
            }
            NodeKind::Delay => NodeConfig::Delay(serde_json::from_value(raw.config.clone()).map_err(bad)?),
            NodeKind::Webhook => {
                NodeConfig::Webhook(serde_json::from_value(raw.config.clone()).map_err(bad)?)
            }
        };
        Ok(Self {
            id: raw.id,
            name: raw.name,
            config,
        })
    }
}

impl From<WorkflowNode> for RawNode {
    fn from(node: WorkflowNode) -> Self {
        let kind = node.kind();
        let config = match node.config {
            NodeConfig::Agent(c) => serde_json::to_value(c),
            NodeConfig::Condition(c) => serde_json::to_value(c),
            NodeConfig::Delay(c) => serde_json::to_value(c),
            NodeConfig::Webhook(c) => serde_json::to_value(c),
        }
        .unwrap_or(serde_json::Value::Null);
        Self {
            id: node.id,
            name: node.name,
            kind,
            config,
        }
    }
}

impl WorkflowNode {
    pub fn new(id: impl Into<String>, config: NodeConfig) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            config,
        }
    }

    pub fn agent(id: impl Into<String>, system_prompt: impl Into<String>) -> Self {
        Self::new(
            id,
            NodeConfig::Agent(AgentNode {
                system_prompt: system_prompt.into(),
                tools: vec![],
                params: serde_json::Value::Null,
                max_turns: default_max_turns(),
            }),
        )
    }

    pub fn condition(id: impl Into<String>, condition: impl Into<String>) -> Self {
        Self::new(
            id,
            NodeConfig::Condition(ConditionNode {
                condition: condition.into(),
            }),
        )
    }

    pub fn delay(id: impl Into<String>, delay_ms: u64) -> Self {
        Self::new(id, NodeConfig::Delay(DelayNode { delay_ms }))
    }

    pub fn webhook(id: impl Into<String>, url: impl Into<String>) -> Self {
        Self::new(
            id,
            NodeConfig::Webhook(WebhookNode {
                url: url.into(),
                method: default_method(),
                headers: BTreeMap::new(),
                body: None,
                tool: None,
            }),
        )
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Adjust an agent node's settings. No-op for other kinds.
    pub fn map_agent(mut self, f: impl FnOnce(AgentNode) -> AgentNode) -> Self {
        if let NodeConfig::Agent(agent) = self.config {
            self.config = NodeConfig::Agent(f(agent));
        }
        self
    }

    /// Adjust a webhook node's settings. No-op for other kinds.
    pub fn map_webhook(mut self, f: impl FnOnce(WebhookNode) -> WebhookNode) -> Self {
        if let NodeConfig::Webhook(hook) = self.config {
            self.config = NodeConfig::Webhook(f(hook));
        }
        self
    }

    pub fn kind(&self) -> NodeKind {
        self.config.kind()
    }
}

/// A directed transition between two nodes. No condition = fallback edge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowEdge {
    pub source: String,
    pub target: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<String>,
}

impl WorkflowEdge {
    /// Create an unconditional edge.
    pub fn always(source: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            target: target.into(),
            condition: None,
        }
    }

    /// Create a conditional edge.
    pub fn conditional(
        source: impl Into<String>,
        target: impl Into<String>,
        condition: impl Into<String>,
    ) -> Self {
        Self {
            source: source.into(),
            target: target.into(),
            condition: Some(condition.into()),
        }
    }

    pub fn is_fallback(&self) -> bool {
        self.condition.is_none()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VersionStatus {
    Draft,
    Active,
    Deprecated,
}

impl fmt::Display for VersionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Draft => "draft",
            Self::Active => "active",
            Self::Deprecated => "deprecated",
        };
        f.write_str(s)
    }
}

impl std::str::FromStr for VersionStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "draft" => Ok(Self::Draft),
            "active" => Ok(Self::Active),
            "deprecated" => Ok(Self::Deprecated),
            other => Err(format!("unknown version status: {}", other)),
        }
    }
}

/// An immutable, versioned workflow graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowVersion {
    pub id: String,
    pub workflow_id: String,
    pub version: String,
    #[serde(default)]
    pub name: String,
    pub nodes: Vec<WorkflowNode>,
    pub edges: Vec<WorkflowEdge>,
    pub start_node_id: String,
    pub status: VersionStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl WorkflowVersion {
    pub fn node(&self, id: &str) -> Option<&WorkflowNode> {
        self.nodes.iter().find(|n| n.id == id)
    }

    /// Outgoing edges of `node_id`, in declaration order.
    pub fn outgoing<'a>(&'a self, node_id: &'a str) -> impl Iterator<Item = &'a WorkflowEdge> + 'a {
        self.edges.iter().filter(move |e| e.source == node_id)
    }
}

/// Caller-supplied definition used to create a new draft version.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowDefinition {
    /// Groups versions. A fresh id is generated when absent.
    #[serde(default)]
    pub workflow_id: Option<String>,
    #[serde(default)]
    pub name: String,
    #[serde(default = "default_version_label")]
    pub version: String,
    pub nodes: Vec<WorkflowNode>,
    #[serde(default)]
    pub edges: Vec<WorkflowEdge>,
    pub start_node_id: String,
}

fn default_version_label() -> String {
    "1".to_string()
}

impl WorkflowDefinition {
    pub fn new(start_node_id: impl Into<String>) -> Self {
        Self {
            workflow_id: None,
            name: String::new(),
            version: default_version_label(),
            nodes: vec![],
            edges: vec![],
            start_node_id: start_node_id.into(),
        }
    }

    pub fn with_workflow_id(mut self, id: impl Into<String>) -> Self {
        self.workflow_id = Some(id.into());
        self
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    pub fn node(mut self, node: WorkflowNode) -> Self {
        self.nodes.push(node);
        self
    }

    pub fn edge(mut self, edge: WorkflowEdge) -> Self {
        self.edges.push(edge);
        self
    }
}

/// Partial update of a draft version. `None` fields are left unchanged.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WorkflowUpdate {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub nodes: Option<Vec<WorkflowNode>>,
    #[serde(default)]
    pub edges: Option<Vec<WorkflowEdge>>,
    #[serde(default)]
    pub start_node_id: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_node_json_shape() {
        let node = WorkflowNode::condition("b", "x >= 5");
        let json = serde_json::to_value(&node).unwrap();
        assert_eq!(json["kind"], "condition");
        assert_eq!(json["config"]["condition"], "x >= 5");

        let parsed: WorkflowNode = serde_json::from_value(json).unwrap();
        assert_eq!(parsed, node);
    }

    #[test]
    fn test_agent_node_defaults() {
        let node: WorkflowNode = serde_json::from_value(json!({
            "id": "a",
            "kind": "agent",
            "config": {"system_prompt": "Qualify the lead."}
        }))
        .unwrap();
        match node.config {
            NodeConfig::Agent(agent) => {
                assert_eq!(agent.max_turns, 10);
                assert!(agent.tools.is_empty());
            }
            other => panic!("unexpected config {:?}", other),
        }
    }

    #[test]
    fn test_bad_config_rejected() {
        let err = serde_json::from_value::<WorkflowNode>(json!({
            "id": "d",
            "kind": "delay",
            "config": {"delay": "soon"}
        }))
        .unwrap_err();
        assert!(err.to_string().contains("invalid delay config for node 'd'"));
    }

    #[test]
    fn test_webhook_defaults() {
        let node: WorkflowNode = serde_json::from_value(json!({
            "id": "w",
            "kind": "webhook",
            "config": {"url": "https://hooks.example.com/x"}
        }))
        .unwrap();
        let NodeConfig::Webhook(hook) = node.config else {
            panic!("expected webhook");
        };
        assert_eq!(hook.method, "POST");
        assert_eq!(hook.transport_tool(), DEFAULT_WEBHOOK_TOOL);
    }

    #[test]
    fn test_edge_builders() {
        let e = WorkflowEdge::always("a", "b");
        assert!(e.is_fallback());
        let e = WorkflowEdge::conditional("a", "c", "score > 3");
        assert_eq!(e.condition.as_deref(), Some("score > 3"));
        let json = serde_json::to_value(WorkflowEdge::always("a", "b")).unwrap();
        assert!(json.get("condition").is_none());
    }
}
