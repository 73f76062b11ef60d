use weft_core::execution::WorkflowExecution;
use weft_core::Value;

/// Read-only snapshot that conditions are evaluated against.
///
/// Layered, later layers win: the input's top-level keys, then the object
/// outputs of completed nodes in completion order, then each node id bound
/// to its state entry, then `input` bound to the raw input.
pub fn state_scope(execution: &WorkflowExecution) -> Value {
    let mut scope = Value::object();

    if let Value::Object(input) = &execution.input {
        for (k, v) in input {
            scope.insert(k.clone(), v.clone());
        }
    }

    for node_id in &execution.completed_nodes {
        if let Some(Value::Object(output)) = execution.state.get(node_id) {
            for (k, v) in output {
                scope.insert(k.clone(), v.clone());
            }
        }
    }

    for (node_id, value) in &execution.state {
        scope.insert(node_id.clone(), value.clone());
    }

    scope.insert("input", execution.input.clone());
    scope
}

/// Scope for a node's outgoing edges: the state scope with the node's own
/// output keys on top.
pub fn edge_scope(execution: &WorkflowExecution, output: &Value) -> Value {
    let mut scope = state_scope(execution);
    if let Value::Object(fields) = output {
        for (k, v) in fields {
            scope.insert(k.clone(), v.clone());
        }
    }
    scope
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use weft_core::types::CallerContext;

    use super::*;

    fn execution() -> WorkflowExecution {
        let mut exec = WorkflowExecution::new(
            "wf",
            "v1",
            Value::from(json!({"x": 1, "source": "form"})),
            CallerContext::new("t", "u"),
        );
        exec.state.insert("score".into(), Value::from(json!({"x": 10})));
        exec.state.insert("enrich".into(), Value::from(json!({"x": 20, "company": "Acme"})));
        exec.completed_nodes = vec!["score".into(), "enrich".into()];
        exec
    }

    #[test]
    fn later_layers_win() {
        let scope = state_scope(&execution());
        assert_eq!(scope.lookup("x"), Some(&Value::from(20i64)));
        assert_eq!(scope.lookup("source"), Some(&Value::from("form")));
        assert_eq!(scope.lookup("score.x"), Some(&Value::from(10i64)));
        assert_eq!(scope.lookup("input.x"), Some(&Value::from(1i64)));
        assert_eq!(scope.lookup("company"), Some(&Value::from("Acme")));
    }

    #[test]
    fn completion_order_decides_flattening() {
        let mut exec = execution();
        exec.completed_nodes = vec!["enrich".into(), "score".into()];
        assert_eq!(state_scope(&exec).lookup("x"), Some(&Value::from(10i64)));
    }

    #[test]
    fn edge_scope_sees_current_output() {
        let output = Value::from(json!({"condition": true}));
        let scope = edge_scope(&execution(), &output);
        assert_eq!(scope.lookup("condition"), Some(&Value::Bool(true)));
        assert_eq!(scope.lookup("x"), Some(&Value::from(20i64)));
    }
}
