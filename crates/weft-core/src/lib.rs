pub mod config;
pub mod error;
pub mod event;
pub mod execution;
pub mod policy;
pub mod traits;
pub mod types;
pub mod value;
pub mod workflow;

pub use config::EngineConfig;
pub use error::{ErrorKind, Result, WeftError};
pub use event::EventBus;
pub use types::*;
pub use value::Value;
