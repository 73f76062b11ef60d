//! Graph traversal: routing expressions, evaluation scope, structural
//! validation and the step loop that walks an execution through its
//! workflow version.

pub mod condition;
pub mod scope;
pub mod validate;
pub mod walker;

pub use condition::{evaluate, Condition, ConditionError};
pub use validate::{check_kinds_unchanged, validate_graph};
pub use walker::{select_edge, Route, Walker};
