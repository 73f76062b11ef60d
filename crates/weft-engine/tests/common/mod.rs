#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;

use weft_core::config::RuntimeConfig;
use weft_core::execution::{EventKind, WorkflowExecution};
use weft_core::workflow::{WorkflowDefinition, WorkflowVersion};
use weft_core::Value;
use weft_engine::WorkflowEngine;
use weft_test_utils::{caller, MockAgentClient, MockTool};
use weft_tools::{ToolInvoker, ToolRegistry};

pub fn invoker(tools: Vec<Arc<MockTool>>) -> Arc<ToolInvoker> {
    let mut registry = ToolRegistry::new();
    for tool in tools {
        registry.register_arc(tool);
    }
    Arc::new(ToolInvoker::new(registry))
}

pub fn engine(agent: MockAgentClient) -> (WorkflowEngine, Arc<MockAgentClient>) {
    engine_with(agent, vec![], RuntimeConfig::default())
}

pub fn engine_with(
    agent: MockAgentClient,
    tools: Vec<Arc<MockTool>>,
    runtime: RuntimeConfig,
) -> (WorkflowEngine, Arc<MockAgentClient>) {
    let agent = Arc::new(agent);
    let engine = WorkflowEngine::builder(agent.clone(), invoker(tools))
        .runtime(runtime)
        .build();
    (engine, agent)
}

/// Create a version from `def` and make it the active one.
pub fn activate(engine: &WorkflowEngine, def: WorkflowDefinition) -> WorkflowVersion {
    let version = engine.create_workflow(def).unwrap();
    engine
        .activate_version(&version.workflow_id, &version.id)
        .unwrap();
    engine.get_version(&version.id).unwrap()
}

/// Start an execution and wait for its task to finish.
pub async fn run(
    engine: &WorkflowEngine,
    version_id: &str,
    input: serde_json::Value,
) -> WorkflowExecution {
    let started = engine
        .start_execution(version_id, Value::from(input), caller())
        .unwrap();
    settle(engine, &started).await
}

pub async fn settle(engine: &WorkflowEngine, execution: &WorkflowExecution) -> WorkflowExecution {
    tokio::time::timeout(
        Duration::from_secs(10),
        engine.wait_for_execution(&execution.id),
    )
    .await
    .expect("execution did not finish in time")
    .unwrap()
}

pub fn kinds(engine: &WorkflowEngine, execution: &WorkflowExecution) -> Vec<EventKind> {
    engine
        .get_execution_events(&execution.id)
        .unwrap()
        .into_iter()
        .map(|e| e.kind)
        .collect()
}

/// `(kind, node_id)` pairs of the execution's log.
pub fn trace(engine: &WorkflowEngine, execution: &WorkflowExecution) -> Vec<(EventKind, Option<String>)> {
    engine
        .get_execution_events(&execution.id)
        .unwrap()
        .into_iter()
        .map(|e| (e.kind, e.node_id))
        .collect()
}

pub fn empty_input() -> serde_json::Value {
    json!({})
}
