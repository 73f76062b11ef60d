use std::collections::HashMap;
use std::sync::Mutex;

use chrono::Utc;

use weft_core::error::{Result, WeftError};
use weft_core::execution::{CommitOutcome, StepCommit, WorkflowExecution, WorkflowExecutionEvent};
use weft_core::traits::{ExecutionStore, VersionStore};
use weft_core::types::ExecutionId;
use weft_core::workflow::{VersionStatus, WorkflowVersion};

use super::{apply_commit, lock};

/// Process-local version store. Versions are kept in insertion order.
#[derive(Default)]
pub struct InMemoryVersionStore {
    versions: Mutex<Vec<WorkflowVersion>>,
}

impl InMemoryVersionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl VersionStore for InMemoryVersionStore {
    fn insert(&self, version: WorkflowVersion) -> Result<()> {
        let mut versions = lock(&self.versions, "version store")?;
        if versions.iter().any(|v| v.id == version.id) {
            return Err(WeftError::Conflict(format!(
                "version '{}' already exists",
                version.id
            )));
        }
        versions.push(version);
        Ok(())
    }

    fn replace(&self, version: WorkflowVersion) -> Result<()> {
        let mut versions = lock(&self.versions, "version store")?;
        let slot = versions
            .iter_mut()
            .find(|v| v.id == version.id)
            .ok_or_else(|| WeftError::not_found("version", &version.id))?;
        if slot.status != VersionStatus::Draft {
            return Err(WeftError::Conflict(format!(
                "version '{}' is {} and can no longer be modified",
                slot.id, slot.status
            )));
        }
        *slot = version;
        Ok(())
    }

    fn activate(&self, workflow_id: &str, version_id: &str) -> Result<()> {
        let mut versions = lock(&self.versions, "version store")?;
        if !versions
            .iter()
            .any(|v| v.id == version_id && v.workflow_id == workflow_id)
        {
            return Err(WeftError::not_found(
                "version",
                format!("{}/{}", workflow_id, version_id),
            ));
        }
        let now = Utc::now();
        for v in versions.iter_mut().filter(|v| v.workflow_id == workflow_id) {
            let status = if v.id == version_id {
                VersionStatus::Active
            } else {
                VersionStatus::Deprecated
            };
            if v.status != status {
                v.status = status;
                v.updated_at = now;
            }
        }
        Ok(())
    }

    fn get(&self, version_id: &str) -> Result<WorkflowVersion> {
        lock(&self.versions, "version store")?
            .iter()
            .find(|v| v.id == version_id)
            .cloned()
            .ok_or_else(|| WeftError::not_found("version", version_id))
    }

    fn list(&self, workflow_id: Option<&str>) -> Result<Vec<WorkflowVersion>> {
        Ok(lock(&self.versions, "version store")?
            .iter()
            .filter(|v| workflow_id.map_or(true, |w| v.workflow_id == w))
            .cloned()
            .collect())
    }

    fn delete(&self, version_id: &str) -> Result<()> {
        let mut versions = lock(&self.versions, "version store")?;
        let before = versions.len();
        versions.retain(|v| v.id != version_id);
        if versions.len() == before {
            return Err(WeftError::not_found("version", version_id));
        }
        Ok(())
    }
}

struct Record {
    execution: WorkflowExecution,
    events: Vec<WorkflowExecutionEvent>,
}

#[derive(Default)]
struct Executions {
    records: HashMap<ExecutionId, Record>,
    order: Vec<ExecutionId>,
}

/// Process-local execution store.
#[derive(Default)]
pub struct InMemoryExecutionStore {
    inner: Mutex<Executions>,
}

impl InMemoryExecutionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ExecutionStore for InMemoryExecutionStore {
    fn insert(&self, execution: WorkflowExecution) -> Result<()> {
        let mut inner = lock(&self.inner, "execution store")?;
        if inner.records.contains_key(&execution.id) {
            return Err(WeftError::Conflict(format!(
                "execution '{}' already exists",
                execution.id
            )));
        }
        inner.order.push(execution.id.clone());
        inner.records.insert(
            execution.id.clone(),
            Record {
                execution,
                events: vec![],
            },
        );
        Ok(())
    }

    fn get(&self, id: &ExecutionId) -> Result<WorkflowExecution> {
        lock(&self.inner, "execution store")?
            .records
            .get(id)
            .map(|r| r.execution.clone())
            .ok_or_else(|| WeftError::not_found("execution", id.to_string()))
    }

    fn events(&self, id: &ExecutionId) -> Result<Vec<WorkflowExecutionEvent>> {
        lock(&self.inner, "execution store")?
            .records
            .get(id)
            .map(|r| r.events.clone())
            .ok_or_else(|| WeftError::not_found("execution", id.to_string()))
    }

    fn list(&self, workflow_id: Option<&str>) -> Result<Vec<WorkflowExecution>> {
        let inner = lock(&self.inner, "execution store")?;
        Ok(inner
            .order
            .iter()
            .filter_map(|id| inner.records.get(id))
            .map(|r| &r.execution)
            .filter(|e| workflow_id.map_or(true, |w| e.workflow_id == w))
            .cloned()
            .collect())
    }

    fn commit(&self, id: &ExecutionId, commit: StepCommit) -> Result<CommitOutcome> {
        let mut inner = lock(&self.inner, "execution store")?;
        let record = inner
            .records
            .get_mut(id)
            .ok_or_else(|| WeftError::not_found("execution", id.to_string()))?;
        if record.execution.is_terminal() {
            return Ok(CommitOutcome::Rejected(record.execution.status));
        }
        let appended = apply_commit(&mut record.execution, &mut record.events, commit, Utc::now());
        Ok(CommitOutcome::Applied(appended))
    }
}
