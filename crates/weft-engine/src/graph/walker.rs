use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::FutureExt;
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use weft_core::config::RuntimeConfig;
use weft_core::error::{Result, WeftError};
use weft_core::execution::{
    CommitOutcome, EventKind, ExecutionFailure, ExecutionStatus, NewEvent, StateDelta, StepCommit,
};
use weft_core::types::ExecutionId;
use weft_core::workflow::WorkflowVersion;
use weft_core::Value;

use super::condition::Condition;
use super::scope::edge_scope;
use crate::executor::{ExecutorTable, NodeContext, NodeEvents, NodeOutcome};
use crate::journal::Journal;

/// Where to go after a node completed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
    /// Take the edge to this node.
    Next(String),
    /// No outgoing edges: the execution is complete.
    End,
    /// Edges exist but none can be taken.
    Stuck,
}

/// Pick the outgoing edge of `node_id`.
///
/// Conditioned edges are tried in declaration order and the first match
/// wins; the unconditioned edge is the fallback when none match.
pub fn select_edge(version: &WorkflowVersion, node_id: &str, scope: &Value) -> Route {
    let mut fallback = None;
    let mut any = false;
    for edge in version.outgoing(node_id) {
        any = true;
        match &edge.condition {
            None => {
                if fallback.is_none() {
                    fallback = Some(&edge.target);
                }
            }
            Some(expr) => {
                let taken = match Condition::parse(expr) {
                    Ok(condition) => condition.check(scope),
                    Err(e) => {
                        warn!(source = %edge.source, target = %edge.target, error = %e, "Edge condition failed to parse");
                        false
                    }
                };
                if taken {
                    return Route::Next(edge.target.clone());
                }
            }
        }
    }
    match fallback {
        Some(target) => Route::Next(target.clone()),
        None if any => Route::Stuck,
        None => Route::End,
    }
}

/// Drives one execution from its current node to a terminal state.
///
/// The walker is the only writer of node lifecycle events for its
/// execution. It expects the execution to be `running` with
/// `current_node_id` set and `node_started` already appended for that node.
pub struct Walker {
    version: Arc<WorkflowVersion>,
    execution_id: ExecutionId,
    journal: Arc<Journal>,
    executors: Arc<ExecutorTable>,
    cancel: CancellationToken,
    limits: RuntimeConfig,
}

enum Step {
    Continue(String),
    Stop,
}

impl Walker {
    pub fn new(
        version: Arc<WorkflowVersion>,
        execution_id: ExecutionId,
        journal: Arc<Journal>,
        executors: Arc<ExecutorTable>,
        cancel: CancellationToken,
        limits: RuntimeConfig,
    ) -> Self {
        Self {
            version,
            execution_id,
            journal,
            executors,
            cancel,
            limits,
        }
    }

    /// Run the step loop. Never panics on executor failures; store errors
    /// are logged and, when possible, recorded as an execution failure.
    pub async fn run(self) {
        if let Err(e) = self.drive().await {
            error!(execution_id = %self.execution_id, error = %e, "Execution aborted");
            if let Err(e2) = self.fail(None, &e, false) {
                error!(execution_id = %self.execution_id, error = %e2, "Failed to record execution failure");
            }
        }
    }

    async fn drive(&self) -> Result<()> {
        let started = Instant::now();
        let deadline = self
            .limits
            .max_execution_secs
            .map(|secs| tokio::time::Instant::now() + Duration::from_secs(secs));

        let mut current = match self.journal.store().get(&self.execution_id)?.current_node_id {
            Some(node_id) => node_id,
            None => self.version.start_node_id.clone(),
        };
        let mut steps = 0usize;

        loop {
            if self.cancel.is_cancelled() {
                debug!(execution_id = %self.execution_id, "Walker observed cancellation");
                return Ok(());
            }

            steps += 1;
            if steps > self.limits.max_steps {
                warn!(execution_id = %self.execution_id, max_steps = self.limits.max_steps, "Step limit reached");
                self.fail(Some(&current), &WeftError::MaxStepsExceeded(self.limits.max_steps), false)?;
                return Ok(());
            }

            match self.step(&current, deadline).await? {
                Step::Continue(next) => current = next,
                Step::Stop => break,
            }
        }

        info!(
            execution_id = %self.execution_id,
            steps,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Execution finished"
        );
        Ok(())
    }

    async fn step(&self, node_id: &str, deadline: Option<tokio::time::Instant>) -> Result<Step> {
        let execution = self.journal.store().get(&self.execution_id)?;
        if execution.is_terminal() {
            return Ok(Step::Stop);
        }

        let Some(node) = self.version.node(node_id) else {
            let err = WeftError::Routing {
                node: node_id.to_string(),
                reason: "node does not exist in this version".to_string(),
            };
            self.fail(Some(node_id), &err, false)?;
            return Ok(Step::Stop);
        };
        let Some(executor) = self.executors.get(node.kind()) else {
            let err = WeftError::Validation(format!("no executor for {} nodes", node.kind()));
            self.fail(Some(node_id), &err, true)?;
            return Ok(Step::Stop);
        };

        info!(execution_id = %self.execution_id, node_id = %node.id, kind = %node.kind(), "Executing node");
        let node_start = Instant::now();
        let ctx = NodeContext {
            execution: &execution,
            node,
            cancel: &self.cancel,
            events: NodeEvents::new(&self.journal, &execution, &node.id),
        };

        let guarded = AssertUnwindSafe(executor.execute(&ctx)).catch_unwind();
        let caught = match deadline {
            Some(deadline) => match tokio::time::timeout_at(deadline, guarded).await {
                Ok(caught) => caught,
                Err(_) => Ok(Err(WeftError::MaxDurationExceeded(
                    self.limits.max_execution_secs.unwrap_or_default(),
                ))),
            },
            None => guarded.await,
        };
        let result = caught.unwrap_or_else(|panic| {
            Err(WeftError::NodePanicked {
                node: node.id.clone(),
                message: panic_message(panic.as_ref()),
            })
        });
        let elapsed_ms = node_start.elapsed().as_millis() as u64;

        if self.cancel.is_cancelled() {
            debug!(execution_id = %self.execution_id, node_id = %node.id, "Discarding node result after cancellation");
            return Ok(Step::Stop);
        }

        let outcome = match result {
            Ok(outcome) => outcome,
            Err(e) => {
                error!(execution_id = %self.execution_id, node_id = %node.id, error = %e, elapsed_ms, "Node failed");
                self.fail(Some(&node.id), &e, true)?;
                return Ok(Step::Stop);
            }
        };

        debug!(execution_id = %self.execution_id, node_id = %node.id, elapsed_ms, "Node complete");
        self.complete_node(&node.id, outcome, elapsed_ms)
    }

    fn complete_node(&self, node_id: &str, outcome: NodeOutcome, elapsed_ms: u64) -> Result<Step> {
        let NodeOutcome {
            output,
            state_delta,
            metadata,
        } = outcome;

        let completed = StepCommit {
            completed_node: Some(node_id.to_string()),
            state_delta: state_delta.map(|value| StateDelta {
                node_id: node_id.to_string(),
                value,
            }),
            ..StepCommit::event(
                NewEvent::new(
                    EventKind::NodeCompleted,
                    Some(node_id),
                    Value::from(json!({ "output": serde_json::Value::from(output.clone()) })),
                )
                .with_metadata(metadata.with_duration_ms(elapsed_ms)),
            )
        };
        if !self.commit(completed)? {
            return Ok(Step::Stop);
        }

        let execution = self.journal.store().get(&self.execution_id)?;
        let route = select_edge(&self.version, node_id, &edge_scope(&execution, &output));
        debug!(execution_id = %self.execution_id, node_id, route = ?route, "Edge selected");

        match route {
            Route::End => {
                let done = StepCommit {
                    output: Some(output),
                    ..Default::default()
                }
                .with_status(ExecutionStatus::Completed);
                self.commit(done)?;
                Ok(Step::Stop)
            }
            Route::Next(target) => {
                let next = StepCommit {
                    current_node_id: Some(target.clone()),
                    ..StepCommit::event(NewEvent::new(
                        EventKind::NodeStarted,
                        Some(&target),
                        Value::from(json!({ "from": node_id })),
                    ))
                };
                Ok(if self.commit(next)? {
                    Step::Continue(target)
                } else {
                    Step::Stop
                })
            }
            Route::Stuck => {
                let err = WeftError::Routing {
                    node: node_id.to_string(),
                    reason: "no edge condition matched and there is no fallback edge".to_string(),
                };
                warn!(execution_id = %self.execution_id, node_id, "Routing dead end");
                self.fail(Some(node_id), &err, false)?;
                Ok(Step::Stop)
            }
        }
    }

    /// Returns whether the commit was applied.
    fn commit(&self, commit: StepCommit) -> Result<bool> {
        match self.journal.commit(&self.execution_id, commit)? {
            CommitOutcome::Applied(_) => Ok(true),
            CommitOutcome::Rejected(status) => {
                debug!(execution_id = %self.execution_id, status = %status, "Commit rejected, execution already terminal");
                Ok(false)
            }
        }
    }

    /// Mark the execution failed. A node failure appends `node_failed`
    /// before the single execution-level `error` event.
    fn fail(&self, node_id: Option<&str>, err: &WeftError, node_failed: bool) -> Result<bool> {
        let failure = ExecutionFailure::from_error(node_id, err);
        let data = Value::from(json!({
            "kind": failure.kind,
            "message": failure.message,
        }));

        let mut events = Vec::new();
        if node_failed {
            events.push(NewEvent::new(EventKind::NodeFailed, node_id, data.clone()));
        }
        events.push(NewEvent::new(EventKind::Error, node_id, data));

        self.commit(StepCommit {
            status: Some(ExecutionStatus::Failed),
            error: Some(failure),
            events,
            ..Default::default()
        })
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
