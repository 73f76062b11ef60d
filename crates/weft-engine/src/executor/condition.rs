use futures::future::BoxFuture;
use serde_json::json;

use weft_core::error::Result;
use weft_core::execution::{EventKind, EventMetadata};
use weft_core::workflow::{NodeConfig, NodeKind};
use weft_core::Value;

use super::{NodeContext, NodeExecutor, NodeOutcome};
use crate::graph::condition::evaluate;
use crate::graph::scope::state_scope;

/// Evaluates the node's expression and records the decision.
///
/// The result is not written to state; its output `{condition: bool}` is
/// visible to the node's outgoing edges.
pub struct ConditionExecutor;

impl NodeExecutor for ConditionExecutor {
    fn execute<'a>(&'a self, ctx: &'a NodeContext<'a>) -> BoxFuture<'a, Result<NodeOutcome>> {
        Box::pin(async move {
            let NodeConfig::Condition(config) = &ctx.node.config else {
                return Err(ctx.kind_mismatch(NodeKind::Condition));
            };

            let result = evaluate(&config.condition, &state_scope(ctx.execution));
            ctx.events.record(
                EventKind::DecisionMade,
                Value::from(json!({
                    "expression": config.condition,
                    "result": result,
                })),
                EventMetadata::default(),
            )?;

            Ok(NodeOutcome::output(Value::from(json!({ "condition": result }))))
        })
    }
}
