use std::sync::Arc;

use weft_core::error::Result;
use weft_core::event::EventBus;
use weft_core::execution::{CommitOutcome, StepCommit};
use weft_core::traits::ExecutionStore;
use weft_core::types::ExecutionId;

/// Single write path for execution records.
///
/// Applies commits to the execution store and broadcasts every event the
/// store accepted on the [`EventBus`], in log order.
pub struct Journal {
    store: Arc<dyn ExecutionStore>,
    bus: Arc<EventBus>,
}

impl Journal {
    pub fn new(store: Arc<dyn ExecutionStore>, bus: Arc<EventBus>) -> Self {
        Self { store, bus }
    }

    pub fn store(&self) -> &Arc<dyn ExecutionStore> {
        &self.store
    }

    pub fn bus(&self) -> &Arc<EventBus> {
        &self.bus
    }

    pub fn commit(&self, id: &ExecutionId, commit: StepCommit) -> Result<CommitOutcome> {
        let outcome = self.store.commit(id, commit)?;
        if let CommitOutcome::Applied(events) = &outcome {
            for event in events {
                self.bus.publish(event.clone());
            }
        }
        Ok(outcome)
    }
}
