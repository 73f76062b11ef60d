pub mod engine;
pub mod executor;
pub mod graph;
pub mod journal;
pub mod run_log;
pub mod store;

pub use engine::{EngineBuilder, WorkflowEngine};
pub use executor::{ExecutorTable, NodeContext, NodeExecutor, NodeOutcome};
pub use graph::{evaluate, Condition};
pub use journal::Journal;
pub use run_log::RunLogger;
pub use store::{InMemoryExecutionStore, InMemoryVersionStore, SqliteVersionStore};
