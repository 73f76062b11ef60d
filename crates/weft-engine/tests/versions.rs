mod common;

use weft_core::error::ErrorKind;
use weft_core::execution::ExecutionStatus;
use weft_core::types::ExecutionId;
use weft_core::workflow::{
    VersionStatus, WorkflowDefinition, WorkflowEdge, WorkflowNode, WorkflowUpdate,
};
use weft_core::Value;
use weft_test_utils::{caller, lead_routing_definition, linear_definition, MockAgentClient, MockReply};

use common::{activate, engine, settle};

#[test]
fn create_stores_a_draft() {
    let (engine, _) = engine(MockAgentClient::new());
    let version = engine.create_workflow(lead_routing_definition()).unwrap();

    assert_eq!(version.status, VersionStatus::Draft);
    assert_eq!(version.workflow_id, "lead-routing");
    assert_eq!(version.start_node_id, "A");
    assert_eq!(engine.get_version(&version.id).unwrap(), version);
}

#[test]
fn create_generates_workflow_id_when_absent() {
    let (engine, _) = engine(MockAgentClient::new());
    let def = WorkflowDefinition::new("a").node(WorkflowNode::agent("a", "hi"));
    let version = engine.create_workflow(def).unwrap();
    assert!(!version.workflow_id.is_empty());
    assert_ne!(version.workflow_id, version.id);
}

#[test]
fn create_rejects_invalid_graphs() {
    let (engine, _) = engine(MockAgentClient::new());

    let missing_start = WorkflowDefinition::new("nope").node(WorkflowNode::agent("a", "hi"));
    let dangling_edge = WorkflowDefinition::new("a")
        .node(WorkflowNode::agent("a", "hi"))
        .edge(WorkflowEdge::always("a", "ghost"));
    let bad_condition = WorkflowDefinition::new("a")
        .node(WorkflowNode::agent("a", "hi"))
        .node(WorkflowNode::agent("b", "hi"))
        .edge(WorkflowEdge::conditional("a", "b", "x >= "));
    let two_fallbacks = WorkflowDefinition::new("a")
        .node(WorkflowNode::agent("a", "hi"))
        .node(WorkflowNode::agent("b", "hi"))
        .node(WorkflowNode::agent("c", "hi"))
        .edge(WorkflowEdge::always("a", "b"))
        .edge(WorkflowEdge::always("a", "c"));

    for def in [missing_start, dangling_edge, bad_condition, two_fallbacks] {
        let err = engine.create_workflow(def).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation, "{}", err);
    }
    assert!(engine.list_versions(None).unwrap().is_empty());
}

#[test]
fn only_one_version_is_active() {
    let (engine, _) = engine(MockAgentClient::new());
    let v1 = engine.create_workflow(lead_routing_definition()).unwrap();
    let v2 = engine
        .create_workflow(lead_routing_definition().with_version("2"))
        .unwrap();
    let other = engine.create_workflow(linear_definition(2)).unwrap();

    engine.activate_version("lead-routing", &v1.id).unwrap();
    engine.activate_version("linear", &other.id).unwrap();
    engine.activate_version("lead-routing", &v2.id).unwrap();

    let statuses: Vec<_> = engine
        .list_versions(Some("lead-routing"))
        .unwrap()
        .into_iter()
        .map(|v| (v.id, v.status))
        .collect();
    assert_eq!(
        statuses,
        vec![
            (v1.id.clone(), VersionStatus::Deprecated),
            (v2.id.clone(), VersionStatus::Active),
        ]
    );
    // Other workflows are untouched.
    assert_eq!(engine.get_version(&other.id).unwrap().status, VersionStatus::Active);
}

#[test]
fn activate_checks_workflow_membership() {
    let (engine, _) = engine(MockAgentClient::new());
    let version = engine.create_workflow(lead_routing_definition()).unwrap();

    let err = engine.activate_version("linear", &version.id).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
    let err = engine.activate_version("lead-routing", "missing").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
    assert_eq!(engine.get_version(&version.id).unwrap().status, VersionStatus::Draft);
}

#[test]
fn update_applies_to_drafts_only() {
    let (engine, _) = engine(MockAgentClient::new());
    let version = engine.create_workflow(linear_definition(2)).unwrap();

    let updated = engine
        .update_workflow(
            &version.id,
            WorkflowUpdate {
                name: Some("renamed".into()),
                ..Default::default()
            },
        )
        .unwrap();
    assert_eq!(updated.name, "renamed");
    assert_eq!(engine.get_version(&version.id).unwrap().name, "renamed");

    engine.activate_version("linear", &version.id).unwrap();
    let err = engine
        .update_workflow(
            &version.id,
            WorkflowUpdate {
                name: Some("again".into()),
                ..Default::default()
            },
        )
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Conflict);
    assert_eq!(engine.get_version(&version.id).unwrap().name, "renamed");
}

#[test]
fn update_revalidates_the_graph() {
    let (engine, _) = engine(MockAgentClient::new());
    let version = engine.create_workflow(linear_definition(2)).unwrap();

    let dangling = WorkflowUpdate {
        edges: Some(vec![WorkflowEdge::always("n0", "n9")]),
        ..Default::default()
    };
    assert_eq!(
        engine.update_workflow(&version.id, dangling).unwrap_err().kind(),
        ErrorKind::Validation
    );

    let kind_change = WorkflowUpdate {
        nodes: Some(vec![
            WorkflowNode::delay("n0", 10),
            WorkflowNode::agent("n1", "Step 1"),
        ]),
        ..Default::default()
    };
    assert_eq!(
        engine.update_workflow(&version.id, kind_change).unwrap_err().kind(),
        ErrorKind::Validation
    );

    let grown = WorkflowUpdate {
        nodes: Some(vec![
            WorkflowNode::agent("n0", "Step 0"),
            WorkflowNode::agent("n1", "Step 1"),
            WorkflowNode::agent("n2", "Step 2"),
        ]),
        edges: Some(vec![
            WorkflowEdge::always("n0", "n1"),
            WorkflowEdge::always("n1", "n2"),
        ]),
        ..Default::default()
    };
    let updated = engine.update_workflow(&version.id, grown).unwrap();
    assert_eq!(updated.nodes.len(), 3);
    assert!(updated.updated_at >= version.updated_at);
}

#[tokio::test(flavor = "multi_thread")]
async fn delete_refuses_versions_with_live_executions() {
    let agent = MockAgentClient::new().reply("n0", MockReply::Hang);
    let (engine, _) = engine(agent);
    let version = activate(&engine, linear_definition(1));

    let execution = engine
        .start_execution(&version.id, Value::object(), caller())
        .unwrap();
    let err = engine.delete_version(&version.id).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Conflict);

    engine.cancel_execution(&execution.id).unwrap();
    let finished = settle(&engine, &execution).await;
    assert_eq!(finished.status, ExecutionStatus::Cancelled);

    engine.delete_version(&version.id).unwrap();
    assert_eq!(
        engine.get_version(&version.id).unwrap_err().kind(),
        ErrorKind::NotFound
    );
    // The finished execution outlives its version.
    assert_eq!(engine.get_execution(&execution.id).unwrap().status, ExecutionStatus::Cancelled);
}

#[tokio::test]
async fn unknown_ids_are_not_found() {
    let (engine, _) = engine(MockAgentClient::new());
    let unknown = ExecutionId::from_string("nope");

    assert_eq!(engine.get_version("nope").unwrap_err().kind(), ErrorKind::NotFound);
    assert_eq!(engine.delete_version("nope").unwrap_err().kind(), ErrorKind::NotFound);
    assert_eq!(
        engine
            .update_workflow("nope", WorkflowUpdate::default())
            .unwrap_err()
            .kind(),
        ErrorKind::NotFound
    );
    assert_eq!(
        engine
            .start_execution("nope", Value::object(), caller())
            .unwrap_err()
            .kind(),
        ErrorKind::NotFound
    );
    assert_eq!(engine.get_execution(&unknown).unwrap_err().kind(), ErrorKind::NotFound);
    assert_eq!(engine.get_execution_events(&unknown).unwrap_err().kind(), ErrorKind::NotFound);
    assert_eq!(engine.cancel_execution(&unknown).unwrap_err().kind(), ErrorKind::NotFound);
}
