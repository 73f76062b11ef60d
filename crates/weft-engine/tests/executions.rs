mod common;

use std::time::{Duration, Instant};

use serde_json::json;

use weft_core::config::RuntimeConfig;
use weft_core::error::{ErrorKind, WeftError};
use weft_core::execution::{EventKind, ExecutionStatus};
use weft_core::policy::ToolPolicy;
use weft_core::workflow::{WorkflowDefinition, WorkflowEdge, WorkflowNode};
use weft_core::Value;
use weft_test_utils::{
    caller, lead_routing_definition, linear_definition, shared, MockAgentClient, MockReply,
    MockTool,
};

use common::{activate, engine, engine_with, kinds, run, settle, trace};

fn node(kind: EventKind, id: &str) -> (EventKind, Option<String>) {
    (kind, Some(id.to_string()))
}

#[tokio::test]
async fn lead_routing_takes_the_matching_branch() {
    let agent = MockAgentClient::new().reply("A", MockReply::output(json!({"x": 10})));
    let (engine, agent) = engine(agent);
    let version = activate(&engine, lead_routing_definition());

    let execution = run(&engine, &version.id, json!({"lead": "acme"})).await;

    assert_eq!(execution.status, ExecutionStatus::Completed);
    assert_eq!(execution.completed_nodes, vec!["A", "B", "C"]);
    assert_eq!(agent.calls_for("D"), 0);
    assert_eq!(
        trace(&engine, &execution),
        vec![
            node(EventKind::NodeStarted, "A"),
            node(EventKind::NodeCompleted, "A"),
            node(EventKind::NodeStarted, "B"),
            node(EventKind::DecisionMade, "B"),
            node(EventKind::NodeCompleted, "B"),
            node(EventKind::NodeStarted, "C"),
            node(EventKind::NodeCompleted, "C"),
        ]
    );
    assert_eq!(execution.state["A"], Value::from(json!({"x": 10})));
    assert!(execution.finished_at.is_some());
    assert!(execution.error.is_none());
}

#[tokio::test]
async fn lead_routing_falls_back_when_condition_fails() {
    let agent = MockAgentClient::new().reply("A", MockReply::output(json!({"x": 2})));
    let (engine, agent) = engine(agent);
    let version = activate(&engine, lead_routing_definition());

    let execution = run(&engine, &version.id, json!({})).await;

    assert_eq!(execution.status, ExecutionStatus::Completed);
    assert_eq!(execution.completed_nodes, vec!["A", "B", "D"]);
    assert_eq!(agent.calls_for("C"), 0);
}

#[tokio::test]
async fn first_matching_condition_wins_over_fallback() {
    let agent = MockAgentClient::new().reply("s", MockReply::output(json!({"score": 7})));
    let (engine, _) = engine(agent);
    let def = WorkflowDefinition::new("s")
        .node(WorkflowNode::agent("s", "score"))
        .node(WorkflowNode::agent("fallback", "f"))
        .node(WorkflowNode::agent("high", "h"))
        .node(WorkflowNode::agent("mid", "m"))
        .edge(WorkflowEdge::always("s", "fallback"))
        .edge(WorkflowEdge::conditional("s", "high", "score > 5"))
        .edge(WorkflowEdge::conditional("s", "mid", "score > 3"));
    let version = activate(&engine, def);

    let execution = run(&engine, &version.id, json!({})).await;
    assert_eq!(execution.completed_nodes, vec!["s", "high"]);
}

#[tokio::test]
async fn unmatched_conditions_without_fallback_fail() {
    let agent = MockAgentClient::new().reply("s", MockReply::output(json!({"score": 1})));
    let (engine, _) = engine(agent);
    let def = WorkflowDefinition::new("s")
        .node(WorkflowNode::agent("s", "score"))
        .node(WorkflowNode::agent("high", "h"))
        .edge(WorkflowEdge::conditional("s", "high", "score > 5"));
    let version = activate(&engine, def);

    let execution = run(&engine, &version.id, json!({})).await;

    assert_eq!(execution.status, ExecutionStatus::Failed);
    let failure = execution.error.as_ref().unwrap();
    assert_eq!(failure.kind, ErrorKind::Execution);
    assert_eq!(failure.node_id.as_deref(), Some("s"));
    assert_eq!(
        kinds(&engine, &execution)
            .iter()
            .filter(|k| **k == EventKind::Error)
            .count(),
        1
    );
}

#[tokio::test]
async fn node_without_outgoing_edges_completes_the_execution() {
    let agent = MockAgentClient::new().reply("only", MockReply::output(json!({"done": true})));
    let (engine, _) = engine(agent);
    let def = WorkflowDefinition::new("only").node(WorkflowNode::agent("only", "finish"));
    let version = activate(&engine, def);

    let execution = run(&engine, &version.id, json!({})).await;

    assert_eq!(execution.status, ExecutionStatus::Completed);
    assert_eq!(execution.output, Some(Value::from(json!({"done": true}))));
    assert_eq!(execution.current_node_id.as_deref(), Some("only"));
}

#[tokio::test]
async fn identical_runs_produce_identical_traces() {
    let agent = MockAgentClient::new()
        .reply("A", MockReply::output(json!({"x": 6})))
        .reply("A", MockReply::output(json!({"x": 6})));
    let (engine, _) = engine(agent);
    let version = activate(&engine, lead_routing_definition());

    let first = run(&engine, &version.id, json!({"lead": 1})).await;
    let second = run(&engine, &version.id, json!({"lead": 1})).await;

    assert_ne!(first.id, second.id);
    assert_eq!(first.completed_nodes, second.completed_nodes);
    assert_eq!(first.state, second.state);
    assert_eq!(trace(&engine, &first), trace(&engine, &second));
}

#[tokio::test]
async fn input_is_visible_to_conditions() {
    let (engine, _) = engine(MockAgentClient::new());
    let def = WorkflowDefinition::new("gate")
        .node(WorkflowNode::condition("gate", "tier == \"gold\" && input.seats > 10"))
        .node(WorkflowNode::agent("vip", "v"))
        .node(WorkflowNode::agent("std", "s"))
        .edge(WorkflowEdge::conditional("gate", "vip", "condition"))
        .edge(WorkflowEdge::always("gate", "std"));
    let version = activate(&engine, def);

    let gold = run(&engine, &version.id, json!({"tier": "gold", "seats": 50})).await;
    let small = run(&engine, &version.id, json!({"tier": "gold", "seats": 5})).await;

    assert_eq!(gold.completed_nodes, vec!["gate", "vip"]);
    assert_eq!(small.completed_nodes, vec!["gate", "std"]);
}

#[tokio::test]
async fn start_snapshot_is_running_at_the_start_node() {
    let agent = MockAgentClient::new().reply("n0", MockReply::Hang);
    let (engine, _) = engine(agent);
    let version = activate(&engine, linear_definition(2));

    let started = engine
        .start_execution(&version.id, Value::object(), caller())
        .unwrap();

    assert_eq!(started.status, ExecutionStatus::Running);
    assert_eq!(started.current_node_id.as_deref(), Some("n0"));
    assert_eq!(started.workflow_version_id, version.id);
    assert_eq!(kinds(&engine, &started), vec![EventKind::NodeStarted]);

    let active = engine.get_active_executions("linear").unwrap();
    assert_eq!(active.len(), 1);
    assert_eq!(active[0].id, started.id);

    engine.cancel_execution(&started.id).unwrap();
    settle(&engine, &started).await;
    assert!(engine.get_active_executions("linear").unwrap().is_empty());
    assert_eq!(engine.list_executions(Some("linear")).unwrap().len(), 1);
}

#[tokio::test]
async fn cancel_is_idempotent() {
    let agent = MockAgentClient::new().reply("n0", MockReply::Hang);
    let (engine, _) = engine(agent);
    let version = activate(&engine, linear_definition(2));

    let started = engine
        .start_execution(&version.id, Value::object(), caller())
        .unwrap();
    engine.cancel_execution(&started.id).unwrap();
    engine.cancel_execution(&started.id).unwrap();
    let execution = settle(&engine, &started).await;
    engine.cancel_execution(&started.id).unwrap();

    assert_eq!(execution.status, ExecutionStatus::Cancelled);
    let failure = execution.error.as_ref().unwrap();
    assert_eq!(failure.kind, ErrorKind::Cancelled);
    assert_eq!(failure.node_id.as_deref(), Some("n0"));
    assert_eq!(
        trace(&engine, &started),
        vec![node(EventKind::NodeStarted, "n0"), node(EventKind::Error, "n0")]
    );
}

#[tokio::test]
async fn terminal_executions_never_change() {
    let (engine, _) = engine(MockAgentClient::new());
    let version = activate(&engine, linear_definition(3));

    let execution = run(&engine, &version.id, json!({})).await;
    assert_eq!(execution.status, ExecutionStatus::Completed);
    let events = engine.get_execution_events(&execution.id).unwrap();

    engine.cancel_execution(&execution.id).unwrap();

    assert_eq!(engine.get_execution(&execution.id).unwrap(), execution);
    assert_eq!(engine.get_execution_events(&execution.id).unwrap(), events);
}

#[tokio::test]
async fn event_sequence_numbers_are_contiguous() {
    let (engine, _) = engine(MockAgentClient::new());
    let version = activate(&engine, linear_definition(4));

    let execution = run(&engine, &version.id, json!({})).await;
    let seqs: Vec<u64> = engine
        .get_execution_events(&execution.id)
        .unwrap()
        .iter()
        .map(|e| e.seq)
        .collect();
    assert_eq!(seqs, (0..8).collect::<Vec<u64>>());
}

#[tokio::test]
async fn subscribers_see_the_same_events_as_the_log() {
    let (engine, _) = engine(MockAgentClient::new());
    let version = activate(&engine, linear_definition(2));
    let mut rx = engine.subscribe();

    let execution = run(&engine, &version.id, json!({})).await;

    let mut seen = Vec::new();
    while let Ok(event) = rx.try_recv() {
        seen.push(event);
    }
    assert_eq!(seen, engine.get_execution_events(&execution.id).unwrap());
}

#[tokio::test]
async fn rate_limited_tool_fails_the_node() {
    let search = shared(
        MockTool::responding("search", json!({"hits": 3}))
            .with_policy(ToolPolicy::default().with_rate_limit(1, 60)),
    );
    let agent = MockAgentClient::new()
        .reply("research", MockReply::tool_call("search", json!({"q": "a"})))
        .reply("research", MockReply::tool_call("search", json!({"q": "b"})))
        .reply("research", MockReply::output(json!({"summary": "never"})));
    let (engine, _) = engine_with(agent, vec![search.clone()], RuntimeConfig::default());
    let def = WorkflowDefinition::new("research").node(
        WorkflowNode::agent("research", "Look things up.").map_agent(|a| a.with_tools(["search"])),
    );
    let version = activate(&engine, def);

    let execution = run(&engine, &version.id, json!({})).await;

    assert_eq!(execution.status, ExecutionStatus::Failed);
    let failure = execution.error.as_ref().unwrap();
    assert_eq!(failure.kind, ErrorKind::RateLimit);
    assert_eq!(failure.node_id.as_deref(), Some("research"));
    assert_eq!(search.calls(), 1);
    assert_eq!(
        kinds(&engine, &execution),
        vec![
            EventKind::NodeStarted,
            EventKind::ToolCalled,
            EventKind::ToolCalled,
            EventKind::NodeFailed,
            EventKind::Error,
        ]
    );
}

#[tokio::test]
async fn webhook_server_error_fails_with_one_error_event() {
    let transport = shared(MockTool::http(500, json!({"error": "boom"})));
    let (engine, _) = engine_with(MockAgentClient::new(), vec![transport.clone()], RuntimeConfig::default());
    let def = WorkflowDefinition::new("notify")
        .node(WorkflowNode::webhook("notify", "https://hooks.example.com/lead"))
        .node(WorkflowNode::agent("after", "unreachable"))
        .edge(WorkflowEdge::always("notify", "after"));
    let version = activate(&engine, def);

    let execution = run(&engine, &version.id, json!({})).await;

    assert_eq!(execution.status, ExecutionStatus::Failed);
    let failure = execution.error.as_ref().unwrap();
    assert_eq!(failure.kind, ErrorKind::Execution);
    assert!(failure.message.contains("500"), "{}", failure.message);
    assert_eq!(transport.calls(), 1);

    let errors: Vec<_> = engine
        .get_execution_events(&execution.id)
        .unwrap()
        .into_iter()
        .filter(|e| e.kind == EventKind::Error)
        .collect();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].node_id.as_deref(), Some("notify"));
    assert!(!execution.completed_nodes.contains(&"after".to_string()));
}

#[tokio::test]
async fn panicking_node_fails_only_its_execution() {
    let agent = MockAgentClient::new().reply("n0", MockReply::Panic("agent exploded".into()));
    let (engine, _) = engine(agent);
    let version = activate(&engine, linear_definition(1));

    let crashed = run(&engine, &version.id, json!({})).await;
    assert_eq!(crashed.status, ExecutionStatus::Failed);
    let failure = crashed.error.as_ref().unwrap();
    assert!(failure.message.contains("agent exploded"));
    assert_eq!(
        kinds(&engine, &crashed),
        vec![EventKind::NodeStarted, EventKind::NodeFailed, EventKind::Error]
    );

    let healthy = run(&engine, &version.id, json!({})).await;
    assert_eq!(healthy.status, ExecutionStatus::Completed);
}

#[tokio::test]
async fn agent_failure_is_recorded_on_the_node() {
    let agent = MockAgentClient::new().reply("n1", MockReply::Fail("upstream 503".into()));
    let (engine, _) = engine(agent);
    let version = activate(&engine, linear_definition(3));

    let execution = run(&engine, &version.id, json!({})).await;

    assert_eq!(execution.status, ExecutionStatus::Failed);
    assert_eq!(execution.completed_nodes, vec!["n0"]);
    let failure = execution.error.as_ref().unwrap();
    assert_eq!(failure.node_id.as_deref(), Some("n1"));
    assert!(failure.message.contains("upstream 503"));
}

#[tokio::test]
async fn cancelling_a_delay_is_prompt() {
    let (engine, _) = engine(MockAgentClient::new());
    let def = WorkflowDefinition::new("wait").node(WorkflowNode::delay("wait", 60_000));
    let version = activate(&engine, def);

    let started = engine
        .start_execution(&version.id, Value::object(), caller())
        .unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;

    let at = Instant::now();
    engine.cancel_execution(&started.id).unwrap();
    let execution = settle(&engine, &started).await;

    assert!(at.elapsed() < Duration::from_secs(2));
    assert_eq!(execution.status, ExecutionStatus::Cancelled);
    assert!(execution.completed_nodes.is_empty());
}

#[tokio::test]
async fn cycles_stop_at_the_step_limit() {
    let (engine, _) = engine_with(
        MockAgentClient::new(),
        vec![],
        RuntimeConfig {
            max_steps: 10,
            ..Default::default()
        },
    );
    let def = WorkflowDefinition::new("ping")
        .node(WorkflowNode::agent("ping", "p"))
        .node(WorkflowNode::agent("pong", "p"))
        .edge(WorkflowEdge::always("ping", "pong"))
        .edge(WorkflowEdge::always("pong", "ping"));
    let version = activate(&engine, def);

    let execution = run(&engine, &version.id, json!({})).await;

    assert_eq!(execution.status, ExecutionStatus::Failed);
    assert_eq!(execution.completed_nodes.len(), 10);
    let failure = execution.error.as_ref().unwrap();
    assert_eq!(failure.message, WeftError::MaxStepsExceeded(10).to_string());
    assert_eq!(kinds(&engine, &execution).last(), Some(&EventKind::Error));
}

#[tokio::test]
async fn slow_executions_hit_the_duration_limit() {
    let (engine, _) = engine_with(
        MockAgentClient::new(),
        vec![],
        RuntimeConfig {
            max_execution_secs: Some(1),
            ..Default::default()
        },
    );
    let def = WorkflowDefinition::new("wait").node(WorkflowNode::delay("wait", 30_000));
    let version = activate(&engine, def);

    let execution = run(&engine, &version.id, json!({})).await;

    assert_eq!(execution.status, ExecutionStatus::Failed);
    let failure = execution.error.as_ref().unwrap();
    assert_eq!(failure.message, WeftError::MaxDurationExceeded(1).to_string());
    assert_eq!(failure.node_id.as_deref(), Some("wait"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_executions_are_isolated() {
    let (engine, _) = engine(MockAgentClient::new());
    let version = activate(&engine, linear_definition(5));

    let started: Vec<_> = (0..8)
        .map(|i| {
            engine
                .start_execution(&version.id, Value::from(json!({"i": i})), caller())
                .unwrap()
        })
        .collect();

    for execution in &started {
        let finished = settle(&engine, execution).await;
        assert_eq!(finished.status, ExecutionStatus::Completed);
        assert_eq!(finished.completed_nodes.len(), 5);
        assert_eq!(finished.input, execution.input);
        assert_eq!(kinds(&engine, execution).len(), 10);
    }
}
