use std::sync::Arc;
use std::time::Instant;

use futures::future::BoxFuture;
use serde_json::json;
use tracing::debug;

use weft_core::error::{Result, WeftError};
use weft_core::execution::{EventKind, EventMetadata};
use weft_core::traits::AgentClient;
use weft_core::types::{AgentRequest, TokenUsage, ToolCall, ToolCallResult};
use weft_core::workflow::{AgentNode, NodeConfig, NodeKind};
use weft_core::Value;
use weft_tools::ToolInvoker;

use super::{NodeContext, NodeExecutor, NodeOutcome};

/// Runs an agent turn loop for one node.
///
/// Each turn sends the prompt, the node's tool definitions, the accumulated
/// state and all tool results so far. Tool calls are restricted to the
/// node's allowlist and go through the [`ToolInvoker`]. The loop ends when
/// the agent answers without tool calls; that answer is the node output.
pub struct AgentExecutor {
    agent: Arc<dyn AgentClient>,
    invoker: Arc<ToolInvoker>,
}

impl AgentExecutor {
    pub fn new(agent: Arc<dyn AgentClient>, invoker: Arc<ToolInvoker>) -> Self {
        Self { agent, invoker }
    }

    async fn call_tool(
        &self,
        ctx: &NodeContext<'_>,
        config: &AgentNode,
        call: ToolCall,
    ) -> Result<ToolCallResult> {
        let started = Instant::now();
        let result = if config.tools.iter().any(|t| *t == call.name) {
            self.invoker
                .execute(&call.name, call.input.clone(), ctx.tool_context())
                .await
        } else {
            Err(WeftError::ToolValidation {
                tool: call.name.clone(),
                message: format!("not allowed for node '{}'", ctx.node.id),
            })
        };

        let mut data = json!({
            "tool": call.name,
            "call_id": call.id,
            "input": call.input,
        });
        match &result {
            Ok(output) => data["output"] = output.clone(),
            Err(e) => data["error"] = json!(e.to_string()),
        }
        ctx.events.record(
            EventKind::ToolCalled,
            Value::from(data),
            EventMetadata::default().with_duration_ms(started.elapsed().as_millis() as u64),
        )?;

        Ok(ToolCallResult {
            call_id: call.id,
            name: call.name,
            output: result?,
        })
    }
}

impl NodeExecutor for AgentExecutor {
    fn execute<'a>(&'a self, ctx: &'a NodeContext<'a>) -> BoxFuture<'a, Result<NodeOutcome>> {
        Box::pin(async move {
            let NodeConfig::Agent(config) = &ctx.node.config else {
                return Err(ctx.kind_mismatch(NodeKind::Agent));
            };

            let tools = self.invoker.definitions(&config.tools);
            let state = Value::Object(ctx.execution.state.clone());
            let mut tool_results: Vec<ToolCallResult> = Vec::new();
            let mut usage = TokenUsage::default();
            let mut model = None;

            for turn in 0..config.max_turns {
                let request = AgentRequest {
                    execution_id: ctx.execution.id.clone(),
                    node_id: ctx.node.id.clone(),
                    system_prompt: config.system_prompt.clone(),
                    tools: tools.clone(),
                    params: config.params.clone(),
                    state: state.clone(),
                    tool_results: tool_results.clone(),
                    turn,
                };

                let response = tokio::select! {
                    _ = ctx.cancel.cancelled() => return Err(WeftError::Cancelled),
                    response = self.agent.invoke(request) => response?,
                };
                usage.add(response.usage);
                if response.model.is_some() {
                    model = response.model.clone();
                }

                if response.tool_calls.is_empty() {
                    let metadata = EventMetadata {
                        model,
                        tokens: Some(usage.total()).filter(|t| *t > 0),
                        ..Default::default()
                    };
                    return Ok(NodeOutcome::stateful(response.output).with_metadata(metadata));
                }

                debug!(
                    node_id = %ctx.node.id,
                    turn,
                    calls = response.tool_calls.len(),
                    "Agent requested tools"
                );
                for call in response.tool_calls {
                    tool_results.push(self.call_tool(ctx, config, call).await?);
                }
            }

            Err(WeftError::AgentRequest(format!(
                "node '{}' did not finish within {} turns",
                ctx.node.id, config.max_turns
            )))
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
    use weft_core::traits::ExecutionStore;
    use weft_core::types::AgentResponse;
    use weft_core::workflow::WorkflowNode;
    use weft_test_utils::{caller, MockAgentClient, MockReply, MockTool};
    use weft_tools::ToolRegistry;

    use super::*;
    use crate::executor::NodeEvents;
    use crate::journal::Journal;
    use crate::store::InMemoryExecutionStore;

    struct Harness {
        journal: Journal,
        execution: WorkflowExecution,
        cancel: CancellationToken,
    }

    impl Harness {
        fn new() -> Self {
            let store = Arc::new(InMemoryExecutionStore::new());
            let execution = WorkflowExecution::new("wf", "v1", Value::object(), caller());
            store.insert(execution.clone()).unwrap();
            Self {
                journal: Journal::new(store, Arc::new(EventBus::default())),
                execution,
                cancel: CancellationToken::new(),
            }
        }

        async fn run(&self, executor: &AgentExecutor, node: &WorkflowNode) -> Result<NodeOutcome> {
            let ctx = NodeContext {
                execution: &self.execution,
                node,
                cancel: &self.cancel,
                events: NodeEvents::new(&self.journal, &self.execution, &node.id),
            };
            executor.execute(&ctx).await
        }

        fn event_kinds(&self) -> Vec<EventKind> {
            self.journal
                .store()
                .events(&self.execution.id)
                .unwrap()
                .into_iter()
                .map(|e| e.kind)
                .collect()
        }
    }

    fn invoker(tools: Vec<Arc<MockTool>>) -> Arc<ToolInvoker> {
        let mut registry = ToolRegistry::new();
        for tool in tools {
            registry.register_arc(tool);
        }
        Arc::new(ToolInvoker::new(registry))
    }

    #[tokio::test]
    async fn final_answer_becomes_state() {
        let agent = MockAgentClient::new().reply(
            "a",
            MockReply::Respond(AgentResponse {
                output: Value::from(json!({"x": 10})),
                model: Some("m-small".into()),
                usage: TokenUsage {
                    input_tokens: 12,
                    output_tokens: 3,
                },
                ..Default::default()
            }),
        );
        let executor = AgentExecutor::new(Arc::new(agent), invoker(vec![]));
        let h = Harness::new();

        let outcome = h.run(&executor, &WorkflowNode::agent("a", "Score")).await.unwrap();
        assert_eq!(outcome.state_delta, Some(Value::from(json!({"x": 10}))));
        assert_eq!(outcome.metadata.model.as_deref(), Some("m-small"));
        assert_eq!(outcome.metadata.tokens, Some(15));
        assert!(h.event_kinds().is_empty());
    }

    #[tokio::test]
    async fn tool_loop_feeds_results_back() {
        let lookup = Arc::new(MockTool::responding("crm_lookup", json!({"score": 8})));
        let agent = Arc::new(
            MockAgentClient::new()
                .reply("a", MockReply::tool_call("crm_lookup", json!({"email": "a@b.co"})))
                .reply("a", MockReply::output(json!({"x": 8}))),
        );
        let executor = AgentExecutor::new(agent.clone(), invoker(vec![lookup.clone()]));
        let h = Harness::new();
        let node = WorkflowNode::agent("a", "Score").map_agent(|a| a.with_tools(["crm_lookup"]));

        let outcome = h.run(&executor, &node).await.unwrap();
        assert_eq!(outcome.output, Value::from(json!({"x": 8})));
        assert_eq!(lookup.calls(), 1);

        let requests = agent.requests();
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[0].tools.len(), 1);
        assert_eq!(requests[1].turn, 1);
        assert_eq!(requests[1].tool_results[0].output, json!({"score": 8}));
        assert_eq!(h.event_kinds(), vec![EventKind::ToolCalled]);
    }

    #[tokio::test]
    async fn tool_outside_allowlist_fails_node() {
        let mailer = Arc::new(MockTool::responding("send_email", json!({})));
        let agent = MockAgentClient::new().reply("a", MockReply::tool_call("send_email", json!({})));
        let executor = AgentExecutor::new(Arc::new(agent), invoker(vec![mailer.clone()]));
        let h = Harness::new();

        let err = h.run(&executor, &WorkflowNode::agent("a", "Score")).await.unwrap_err();
        assert!(matches!(err, WeftError::ToolValidation { .. }));
        assert_eq!(mailer.calls(), 0);
        assert_eq!(h.event_kinds(), vec![EventKind::ToolCalled]);
    }

    #[tokio::test]
    async fn turn_limit() {
        let agent = MockAgentClient::new()
            .reply("a", MockReply::tool_call("noop", json!({})))
            .reply("a", MockReply::tool_call("noop", json!({})));
        let noop = Arc::new(MockTool::responding("noop", json!(null)));
        let executor = AgentExecutor::new(Arc::new(agent), invoker(vec![noop]));
        let h = Harness::new();
        let node = WorkflowNode::agent("a", "Loop")
            .map_agent(|a| a.with_tools(["noop"]).with_max_turns(2));

        let err = h.run(&executor, &node).await.unwrap_err();
        assert!(err.to_string().contains("2 turns"));
    }

    #[tokio::test]
    async fn cancellation_interrupts_agent_call() {
        let agent = MockAgentClient::new().reply("a", MockReply::Hang);
        let executor = AgentExecutor::new(Arc::new(agent), invoker(vec![]));
        let h = Harness::new();
        h.cancel.cancel();

        let err = h.run(&executor, &WorkflowNode::agent("a", "Wait")).await.unwrap_err();
        assert!(matches!(err, WeftError::Cancelled));
    }
}
