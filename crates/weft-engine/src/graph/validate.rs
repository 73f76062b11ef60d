use std::collections::{HashMap, HashSet};

use weft_core::error::{Result, WeftError};
use weft_core::workflow::{NodeConfig, WorkflowEdge, WorkflowNode};

use super::condition::Condition;

const METHODS: &[&str] = &["GET", "POST", "PUT", "PATCH", "DELETE", "HEAD"];

/// Check a graph for structural problems before it is stored.
///
/// Every problem found is reported in one `Validation` error.
pub fn validate_graph(
    nodes: &[WorkflowNode],
    edges: &[WorkflowEdge],
    start_node_id: &str,
) -> Result<()> {
    let mut problems = Vec::new();

    if nodes.is_empty() {
        problems.push("workflow has no nodes".to_string());
    }

    let mut ids = HashSet::new();
    for node in nodes {
        if node.id.trim().is_empty() {
            problems.push("node id must not be empty".to_string());
        } else if !ids.insert(node.id.as_str()) {
            problems.push(format!("duplicate node id '{}'", node.id));
        }
        check_node_config(node, &mut problems);
    }

    if !nodes.is_empty() && !ids.contains(start_node_id) {
        problems.push(format!("start node '{}' does not exist", start_node_id));
    }

    let mut fallbacks: HashMap<&str, usize> = HashMap::new();
    for edge in edges {
        for (end, id) in [("source", &edge.source), ("target", &edge.target)] {
            if !ids.contains(id.as_str()) {
                problems.push(format!(
                    "edge {} -> {}: {} node '{}' does not exist",
                    edge.source, edge.target, end, id
                ));
            }
        }
        match &edge.condition {
            None => *fallbacks.entry(edge.source.as_str()).or_default() += 1,
            Some(expr) => {
                if let Err(e) = Condition::parse(expr) {
                    problems.push(format!(
                        "edge {} -> {}: invalid condition '{}': {}",
                        edge.source, edge.target, expr, e
                    ));
                }
            }
        }
    }

    let mut multi: Vec<_> = fallbacks.into_iter().filter(|(_, n)| *n > 1).collect();
    multi.sort();
    for (source, count) in multi {
        problems.push(format!(
            "node '{}' has {} unconditioned outgoing edges (at most one allowed)",
            source, count
        ));
    }

    if problems.is_empty() {
        Ok(())
    } else {
        Err(WeftError::Validation(problems.join("; ")))
    }
}

fn check_node_config(node: &WorkflowNode, problems: &mut Vec<String>) {
    match &node.config {
        NodeConfig::Agent(agent) => {
            if agent.max_turns == 0 {
                problems.push(format!("agent node '{}': max_turns must be at least 1", node.id));
            }
        }
        NodeConfig::Condition(cond) => {
            if let Err(e) = Condition::parse(&cond.condition) {
                problems.push(format!(
                    "condition node '{}': invalid condition '{}': {}",
                    node.id, cond.condition, e
                ));
            }
        }
        NodeConfig::Delay(_) => {}
        NodeConfig::Webhook(hook) => {
            match reqwest::Url::parse(&hook.url) {
                Ok(url) if matches!(url.scheme(), "http" | "https") => {}
                Ok(url) => problems.push(format!(
                    "webhook node '{}': unsupported scheme '{}'",
                    node.id,
                    url.scheme()
                )),
                Err(e) => problems.push(format!(
                    "webhook node '{}': invalid url '{}': {}",
                    node.id, hook.url, e
                )),
            }
            if !METHODS.contains(&hook.method.to_uppercase().as_str()) {
                problems.push(format!(
                    "webhook node '{}': unsupported method '{}'",
                    node.id, hook.method
                ));
            }
        }
    }
}

/// Node kinds are immutable: an update may add or remove nodes but must not
/// change the kind of a node id that already exists.
pub fn check_kinds_unchanged(current: &[WorkflowNode], updated: &[WorkflowNode]) -> Result<()> {
    let kinds: HashMap<&str, _> = current.iter().map(|n| (n.id.as_str(), n.kind())).collect();
    for node in updated {
        if let Some(kind) = kinds.get(node.id.as_str()) {
            if *kind != node.kind() {
                return Err(WeftError::Validation(format!(
                    "node '{}' cannot change kind from {} to {}",
                    node.id,
                    kind,
                    node.kind()
                )));
            }
        }
    }
    Ok(())
}
