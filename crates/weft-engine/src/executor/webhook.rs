use std::sync::Arc;
use std::time::Instant;

use futures::future::BoxFuture;
use serde_json::json;
use tracing::warn;

use weft_core::error::{Result, WeftError};
use weft_core::execution::{EventKind, EventMetadata};
use weft_core::workflow::{NodeConfig, NodeKind, WebhookNode};
use weft_core::Value;
use weft_tools::ToolInvoker;

use super::{NodeContext, NodeExecutor, NodeOutcome};

/// Performs the node's outbound HTTP call through the transport tool.
///
/// Any non-2xx status fails the node. The response body becomes the node
/// output and its state.
pub struct WebhookExecutor {
    invoker: Arc<ToolInvoker>,
}

impl WebhookExecutor {
    pub fn new(invoker: Arc<ToolInvoker>) -> Self {
        Self { invoker }
    }
}

fn request_input(ctx: &NodeContext<'_>, hook: &WebhookNode) -> serde_json::Value {
    let method = hook.method.to_uppercase();
    let mut input = json!({
        "url": hook.url,
        "method": method,
        "headers": hook.headers,
    });
    if !matches!(method.as_str(), "GET" | "HEAD") {
        input["body"] = hook.body.clone().unwrap_or_else(|| {
            json!({
                "execution_id": ctx.execution.id,
                "node_id": ctx.node.id,
                "state": serde_json::Value::from(Value::Object(ctx.execution.state.clone())),
            })
        });
    }
    input
}

impl NodeExecutor for WebhookExecutor {
    fn execute<'a>(&'a self, ctx: &'a NodeContext<'a>) -> BoxFuture<'a, Result<NodeOutcome>> {
        Box::pin(async move {
            let NodeConfig::Webhook(hook) = &ctx.node.config else {
                return Err(ctx.kind_mismatch(NodeKind::Webhook));
            };

            let tool = hook.transport_tool();
            let input = request_input(ctx, hook);
            let started = Instant::now();
            let result = self
                .invoker
                .execute(tool, input.clone(), ctx.tool_context())
                .await;

            let status = result
                .as_ref()
                .ok()
                .and_then(|r| r.get("status"))
                .and_then(|s| s.as_u64());
            let mut data = json!({
                "tool": tool,
                "url": hook.url,
                "method": input["method"],
            });
            match (&result, status) {
                (Ok(_), Some(status)) => data["status"] = json!(status),
                (Ok(_), None) => {}
                (Err(e), _) => data["error"] = json!(e.to_string()),
            }
            ctx.events.record(
                EventKind::ToolCalled,
                Value::from(data),
                EventMetadata::default().with_duration_ms(started.elapsed().as_millis() as u64),
            )?;

            let mut response = result?;
            let status = status.ok_or_else(|| WeftError::ToolExecution {
                tool: tool.to_string(),
                message: "transport response has no status".to_string(),
            })?;
            if !(200..300).contains(&status) {
                warn!(node_id = %ctx.node.id, url = %hook.url, status, "Webhook returned non-2xx");
                return Err(WeftError::WebhookStatus {
                    url: hook.url.clone(),
                    status: u16::try_from(status).unwrap_or(u16::MAX),
                });
            }

            let body = response
                .get_mut("body")
                .map(serde_json::Value::take)
                .unwrap_or_default();
            Ok(NodeOutcome::stateful(Value::from(body)))
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use serde_json::json;
    use tokio_util::sync::CancellationToken;

    use weft_core::event::EventBus;
    use weft_core::execution::WorkflowExecution;
    use weft_core::policy::ToolPolicy;
    use weft_core::traits::ExecutionStore;
    use weft_core::workflow::WorkflowNode;
    use weft_test_utils::{caller, MockTool};
    use weft_tools::ToolRegistry;

    use super::*;
    use crate::executor::NodeEvents;
    use crate::journal::Journal;
    use crate::store::InMemoryExecutionStore;

    async fn run(
        tool: Arc<MockTool>,
        node: WorkflowNode,
        policy: Option<ToolPolicy>,
    ) -> (Result<NodeOutcome>, Vec<EventKind>) {
        let mut registry = ToolRegistry::new();
        registry.register_arc(tool);
        let mut invoker = ToolInvoker::new(registry);
        if let Some(policy) = policy {
            invoker = invoker.with_policy("http_request", policy);
        }
        let executor = WebhookExecutor::new(Arc::new(invoker));

        let store = Arc::new(InMemoryExecutionStore::new());
        let mut execution = WorkflowExecution::new("wf", "v1", Value::object(), caller());
        execution
            .state
            .insert("score".into(), Value::from(json!({"x": 10})));
        store.insert(execution.clone()).unwrap();
        let journal = Journal::new(store.clone(), Arc::new(EventBus::default()));
        let cancel = CancellationToken::new();

        let ctx = NodeContext {
            execution: &execution,
            node: &node,
            cancel: &cancel,
            events: NodeEvents::new(&journal, &execution, &node.id),
        };
        let result = executor.execute(&ctx).await;
        let kinds = store
            .events(&execution.id)
            .unwrap()
            .into_iter()
            .map(|e| e.kind)
            .collect();
        (result, kinds)
    }

    #[tokio::test]
    async fn success_body_becomes_output() {
        let http = Arc::new(MockTool::http(201, json!({"id": "lead-7"})));
        let (result, kinds) = run(http.clone(), WorkflowNode::webhook("hook", "https://hooks.example.com/leads"), None).await;

        let outcome = result.unwrap();
        assert_eq!(outcome.output, Value::from(json!({"id": "lead-7"})));
        assert_eq!(outcome.state_delta, Some(outcome.output.clone()));
        assert_eq!(kinds, vec![EventKind::ToolCalled]);

        let sent = &http.inputs()[0];
        assert_eq!(sent["method"], "POST");
        assert_eq!(sent["body"]["state"]["score"]["x"], 10);
    }

    #[tokio::test]
    async fn non_2xx_is_an_error() {
        let http = Arc::new(MockTool::http(500, json!("boom")));
        let (result, _) = run(http, WorkflowNode::webhook("hook", "https://hooks.example.com"), None).await;
        assert!(matches!(
            result.unwrap_err(),
            WeftError::WebhookStatus { status: 500, .. }
        ));
    }

    #[tokio::test]
    async fn get_sends_no_body_and_configured_body_wins() {
        let http = Arc::new(MockTool::http(200, json!(null)));
        let node = WorkflowNode::webhook("hook", "https://hooks.example.com").map_webhook(|mut w| {
            w.method = "get".into();
            w
        });
        run(http.clone(), node, None).await.0.unwrap();
        assert!(http.inputs()[0].get("body").is_none());
        assert_eq!(http.inputs()[0]["method"], "GET");

        let http = Arc::new(MockTool::http(200, json!(null)));
        let node = WorkflowNode::webhook("hook", "https://hooks.example.com").map_webhook(|mut w| {
            w.body = Some(json!({"ping": true}));
            w
        });
        run(http.clone(), node, None).await.0.unwrap();
        assert_eq!(http.inputs()[0]["body"], json!({"ping": true}));
    }

    #[tokio::test]
    async fn domain_allowlist_applies() {
        let http = Arc::new(MockTool::http(200, json!(null)));
        let policy = ToolPolicy::default().with_allowed_domains(["hooks.example.com"]);
        let (result, kinds) = run(http.clone(), WorkflowNode::webhook("hook", "https://evil.test/x"), Some(policy)).await;
        assert!(matches!(result.unwrap_err(), WeftError::DomainNotAllowed { .. }));
        assert_eq!(http.calls(), 0);
        assert_eq!(kinds, vec![EventKind::ToolCalled]);
    }
}
