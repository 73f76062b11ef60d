use std::time::Duration;

use futures::future::BoxFuture;
use serde_json::json;
use tracing::debug;

use weft_core::error::{Result, WeftError};
use weft_core::workflow::{NodeConfig, NodeKind};
use weft_core::Value;

use super::{NodeContext, NodeExecutor, NodeOutcome};

/// Waits `delay_ms`, or until the execution is cancelled.
pub struct DelayExecutor;

impl NodeExecutor for DelayExecutor {
    fn execute<'a>(&'a self, ctx: &'a NodeContext<'a>) -> BoxFuture<'a, Result<NodeOutcome>> {
        Box::pin(async move {
            let NodeConfig::Delay(config) = &ctx.node.config else {
                return Err(ctx.kind_mismatch(NodeKind::Delay));
            };

            tokio::select! {
                _ = ctx.cancel.cancelled() => {
                    debug!(node_id = %ctx.node.id, "Delay interrupted by cancellation");
                    Err(WeftError::Cancelled)
                }
                _ = tokio::time::sleep(Duration::from_millis(config.delay_ms)) => {
                    Ok(NodeOutcome::output(Value::from(json!({ "delayed_ms": config.delay_ms }))))
                }
            }
        })
    }
}
