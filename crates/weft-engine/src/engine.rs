use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::Utc;
use serde_json::json;
use tokio::sync::{broadcast, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use weft_core::config::{EngineConfig, LogConfig, RuntimeConfig, StoreBackend};
use weft_core::error::{Result, WeftError};
use weft_core::event::EventBus;
use weft_core::execution::{
    CommitOutcome, EventKind, ExecutionFailure, ExecutionStatus, NewEvent, StepCommit,
    WorkflowExecution, WorkflowExecutionEvent,
};
use weft_core::traits::{AgentClient, ExecutionStore, VersionStore};
use weft_core::types::{CallerContext, ExecutionId};
use weft_core::workflow::{
    NodeKind, VersionStatus, WorkflowDefinition, WorkflowUpdate, WorkflowVersion,
};
use weft_core::Value;
use weft_tools::{ToolInvoker, ToolRegistry};

use crate::executor::{ExecutorTable, NodeExecutor};
use crate::graph::validate::{check_kinds_unchanged, validate_graph};
use crate::graph::walker::Walker;
use crate::journal::Journal;
use crate::run_log::RunLogger;
use crate::store::{lock, InMemoryExecutionStore, InMemoryVersionStore, SqliteVersionStore};

#[derive(Clone)]
struct RunHandle {
    cancel: CancellationToken,
    done: watch::Receiver<bool>,
}

/// The workflow engine: version lifecycle plus execution control.
///
/// Every started execution runs its step loop on its own tokio task. The
/// engine shares only the version store, the execution store and the tool
/// invoker between them.
pub struct WorkflowEngine {
    versions: Arc<dyn VersionStore>,
    journal: Arc<Journal>,
    executors: Arc<ExecutorTable>,
    invoker: Arc<ToolInvoker>,
    runtime: RuntimeConfig,
    log: Option<LogConfig>,
    running: Arc<Mutex<HashMap<ExecutionId, RunHandle>>>,
    /// Serializes execution admission against version deletion.
    admission: Mutex<()>,
}

/// Builder for [`WorkflowEngine`]. Stores default to in-memory backends.
pub struct EngineBuilder {
    agent: Arc<dyn AgentClient>,
    invoker: Arc<ToolInvoker>,
    versions: Option<Arc<dyn VersionStore>>,
    executions: Option<Arc<dyn ExecutionStore>>,
    overrides: Vec<(NodeKind, Arc<dyn NodeExecutor>)>,
    runtime: RuntimeConfig,
    log: Option<LogConfig>,
}

impl EngineBuilder {
    pub fn new(agent: Arc<dyn AgentClient>, invoker: Arc<ToolInvoker>) -> Self {
        Self {
            agent,
            invoker,
            versions: None,
            executions: None,
            overrides: vec![],
            runtime: RuntimeConfig::default(),
            log: None,
        }
    }

    pub fn version_store(mut self, store: Arc<dyn VersionStore>) -> Self {
        self.versions = Some(store);
        self
    }

    pub fn execution_store(mut self, store: Arc<dyn ExecutionStore>) -> Self {
        self.executions = Some(store);
        self
    }

    /// Replace the built-in executor for one node kind.
    pub fn executor(mut self, kind: NodeKind, executor: Arc<dyn NodeExecutor>) -> Self {
        self.overrides.push((kind, executor));
        self
    }

    pub fn runtime(mut self, runtime: RuntimeConfig) -> Self {
        self.runtime = runtime;
        self
    }

    pub fn run_log(mut self, log: LogConfig) -> Self {
        self.log = Some(log);
        self
    }

    /// Apply the `[engine]` and `[log]` sections.
    pub fn config(mut self, config: &EngineConfig) -> Self {
        self.runtime = config.engine.clone();
        self.log = config.log.clone();
        self
    }

    pub fn build(self) -> WorkflowEngine {
        let bus = Arc::new(EventBus::new(self.runtime.event_bus_capacity));
        let executions = self
            .executions
            .unwrap_or_else(|| Arc::new(InMemoryExecutionStore::new()));
        let versions = self
            .versions
            .unwrap_or_else(|| Arc::new(InMemoryVersionStore::new()));

        let mut executors = ExecutorTable::new(self.agent, self.invoker.clone());
        for (kind, executor) in self.overrides {
            executors = executors.with(kind, executor);
        }

        WorkflowEngine {
            versions,
            journal: Arc::new(Journal::new(executions, bus)),
            executors: Arc::new(executors),
            invoker: self.invoker,
            runtime: self.runtime,
            log: self.log,
            running: Arc::new(Mutex::new(HashMap::new())),
            admission: Mutex::new(()),
        }
    }
}

impl WorkflowEngine {
    pub fn builder(agent: Arc<dyn AgentClient>, invoker: Arc<ToolInvoker>) -> EngineBuilder {
        EngineBuilder::new(agent, invoker)
    }

    /// Build an engine from configuration: tool policy overrides, runtime
    /// limits, run logging and the version store backend.
    pub fn from_config(
        config: &EngineConfig,
        agent: Arc<dyn AgentClient>,
        registry: ToolRegistry,
    ) -> Result<Self> {
        let invoker = Arc::new(ToolInvoker::from_config(registry, config));
        let mut builder = EngineBuilder::new(agent, invoker).config(config);
        if config.store.backend == StoreBackend::Sqlite {
            let path = config.store.sqlite_path();
            info!(path = %path.display(), "Using SQLite version store");
            builder = builder.version_store(Arc::new(SqliteVersionStore::open(&path)?));
        }
        Ok(builder.build())
    }

    pub fn invoker(&self) -> &Arc<ToolInvoker> {
        &self.invoker
    }

    /// Live feed of every event appended to any execution.
    pub fn subscribe(&self) -> broadcast::Receiver<WorkflowExecutionEvent> {
        self.journal.bus().subscribe()
    }

    fn executions(&self) -> &Arc<dyn ExecutionStore> {
        self.journal.store()
    }

    // ── Versions ─────────────────────────────────────────────

    /// Validate a definition and store it as a new draft version.
    pub fn create_workflow(&self, definition: WorkflowDefinition) -> Result<WorkflowVersion> {
        validate_graph(
            &definition.nodes,
            &definition.edges,
            &definition.start_node_id,
        )?;

        let now = Utc::now();
        let version = WorkflowVersion {
            id: uuid::Uuid::new_v4().to_string(),
            workflow_id: definition
                .workflow_id
                .unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
            version: definition.version,
            name: definition.name,
            nodes: definition.nodes,
            edges: definition.edges,
            start_node_id: definition.start_node_id,
            status: VersionStatus::Draft,
            created_at: now,
            updated_at: now,
        };
        self.versions.insert(version.clone())?;
        info!(workflow_id = %version.workflow_id, version_id = %version.id, "Workflow version created");
        Ok(version)
    }

    /// Apply a partial update to a draft version.
    pub fn update_workflow(&self, version_id: &str, update: WorkflowUpdate) -> Result<WorkflowVersion> {
        let mut version = self.versions.get(version_id)?;
        if version.status != VersionStatus::Draft {
            return Err(WeftError::Conflict(format!(
                "version '{}' is {}; only draft versions can be updated",
                version.id, version.status
            )));
        }

        if let Some(nodes) = update.nodes {
            check_kinds_unchanged(&version.nodes, &nodes)?;
            version.nodes = nodes;
        }
        if let Some(edges) = update.edges {
            version.edges = edges;
        }
        if let Some(start) = update.start_node_id {
            version.start_node_id = start;
        }
        if let Some(name) = update.name {
            version.name = name;
        }
        if let Some(label) = update.version {
            version.version = label;
        }
        validate_graph(&version.nodes, &version.edges, &version.start_node_id)?;

        version.updated_at = Utc::now();
        self.versions.replace(version.clone())?;
        debug!(version_id = %version.id, "Workflow version updated");
        Ok(version)
    }

    /// Make `version_id` the single active version of `workflow_id`.
    pub fn activate_version(&self, workflow_id: &str, version_id: &str) -> Result<()> {
        self.versions.activate(workflow_id, version_id)?;
        info!(workflow_id, version_id, "Workflow version activated");
        Ok(())
    }

    pub fn get_version(&self, version_id: &str) -> Result<WorkflowVersion> {
        self.versions.get(version_id)
    }

    pub fn list_versions(&self, workflow_id: Option<&str>) -> Result<Vec<WorkflowVersion>> {
        self.versions.list(workflow_id)
    }

    /// Delete a version. Rejected while any execution of it is still live.
    pub fn delete_version(&self, version_id: &str) -> Result<()> {
        let _admission = lock(&self.admission, "admission")?;
        self.versions.get(version_id)?;
        let live = self
            .executions()
            .list(None)?
            .into_iter()
            .filter(|e| e.workflow_version_id == version_id && !e.is_terminal())
            .count();
        if live > 0 {
            return Err(WeftError::Conflict(format!(
                "version '{}' has {} live execution(s)",
                version_id, live
            )));
        }
        self.versions.delete(version_id)?;
        info!(version_id, "Workflow version deleted");
        Ok(())
    }

    // ── Executions ───────────────────────────────────────────

    /// Start running a stored version.
    ///
    /// The execution is recorded as `queued`, moved to `running` at the start
    /// node with `node_started` appended, and handed to its own task. The
    /// returned snapshot reflects that `running` state.
    pub fn start_execution(
        &self,
        version_id: &str,
        input: Value,
        caller: CallerContext,
    ) -> Result<WorkflowExecution> {
        let admission = lock(&self.admission, "admission")?;
        let version = Arc::new(self.versions.get(version_id)?);
        let execution = WorkflowExecution::new(
            version.workflow_id.clone(),
            version.id.clone(),
            input,
            caller,
        );
        let id = execution.id.clone();
        self.executions().insert(execution)?;

        let log_done = CancellationToken::new();
        if let Some(log) = self.log.as_ref().filter(|l| l.enabled) {
            RunLogger::new(log.dir(), log.level).spawn(self.journal.bus(), id.clone(), log_done.clone());
        }

        let start = StepCommit {
            status: Some(ExecutionStatus::Running),
            current_node_id: Some(version.start_node_id.clone()),
            ..StepCommit::event(NewEvent::new(
                EventKind::NodeStarted,
                Some(&version.start_node_id),
                Value::object(),
            ))
        };
        if let Err(e) = self.journal.commit(&id, start) {
            log_done.cancel();
            self.abandon_start(&id, &version.start_node_id, &e);
            return Err(e);
        }
        drop(admission);

        let cancel = CancellationToken::new();
        let (done_tx, done_rx) = watch::channel(false);
        lock(&self.running, "running executions")?.insert(
            id.clone(),
            RunHandle {
                cancel: cancel.clone(),
                done: done_rx,
            },
        );

        info!(
            execution_id = %id,
            workflow_id = %version.workflow_id,
            version_id = %version.id,
            "Execution started"
        );

        let walker = Walker::new(
            version,
            id.clone(),
            self.journal.clone(),
            self.executors.clone(),
            cancel,
            self.runtime.clone(),
        );
        let running = self.running.clone();
        let task_id = id.clone();
        tokio::spawn(async move {
            walker.run().await;
            match running.lock() {
                Ok(mut map) => map.remove(&task_id),
                Err(poisoned) => poisoned.into_inner().remove(&task_id),
            };
            let _ = done_tx.send(true);
            log_done.cancel();
        });

        self.executions().get(&id)
    }

    /// Best effort: fail an execution whose start commit did not apply, so it
    /// does not linger as `queued` and block deletion of its version.
    fn abandon_start(&self, id: &ExecutionId, start_node: &str, cause: &WeftError) {
        error!(execution_id = %id, error = %cause, "Execution failed to start");
        let failure = ExecutionFailure::from_error(Some(start_node), cause);
        let data = Value::from(json!({ "kind": failure.kind, "message": failure.message }));
        let commit = StepCommit {
            status: Some(ExecutionStatus::Failed),
            error: Some(failure),
            ..StepCommit::event(NewEvent::new(EventKind::Error, Some(start_node), data))
        };
        if let Err(e) = self.journal.commit(id, commit) {
            error!(execution_id = %id, error = %e, "Failed to record start failure");
        }
    }

    pub fn get_execution(&self, id: &ExecutionId) -> Result<WorkflowExecution> {
        self.executions().get(id)
    }

    pub fn get_execution_events(&self, id: &ExecutionId) -> Result<Vec<WorkflowExecutionEvent>> {
        self.executions().events(id)
    }

    /// Non-terminal executions of a workflow, any version.
    pub fn get_active_executions(&self, workflow_id: &str) -> Result<Vec<WorkflowExecution>> {
        Ok(self
            .executions()
            .list(Some(workflow_id))?
            .into_iter()
            .filter(|e| !e.is_terminal())
            .collect())
    }

    pub fn list_executions(&self, workflow_id: Option<&str>) -> Result<Vec<WorkflowExecution>> {
        self.executions().list(workflow_id)
    }

    /// Cancel a running execution. No-op once it is terminal.
    ///
    /// The status change and the `error` event are committed together; the
    /// step loop stops at its next checkpoint without writing anything else.
    pub fn cancel_execution(&self, id: &ExecutionId) -> Result<()> {
        let execution = self.executions().get(id)?;
        if execution.is_terminal() {
            debug!(execution_id = %id, status = %execution.status, "Cancel ignored, execution already terminal");
            return Ok(());
        }

        let node_id = execution.current_node_id.as_deref();
        let failure = ExecutionFailure::from_error(node_id, &WeftError::Cancelled);
        let data = Value::from(json!({ "kind": failure.kind, "message": failure.message }));
        let commit = StepCommit {
            status: Some(ExecutionStatus::Cancelled),
            error: Some(failure),
            ..StepCommit::event(NewEvent::new(EventKind::Error, node_id, data))
        };
        match self.journal.commit(id, commit)? {
            CommitOutcome::Applied(_) => info!(execution_id = %id, "Execution cancelled"),
            CommitOutcome::Rejected(status) => {
                debug!(execution_id = %id, status = %status, "Cancel lost the race to completion")
            }
        }

        if let Some(handle) = lock(&self.running, "running executions")?.get(id) {
            handle.cancel.cancel();
        }
        Ok(())
    }

    /// Wait until the execution's task has finished, then return its record.
    pub async fn wait_for_execution(&self, id: &ExecutionId) -> Result<WorkflowExecution> {
        let handle = lock(&self.running, "running executions")?.get(id).cloned();
        if let Some(mut handle) = handle {
            let _ = handle.done.wait_for(|done| *done).await;
        }
        self.executions().get(id)
    }
}
