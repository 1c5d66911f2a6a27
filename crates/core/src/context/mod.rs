//! Layered context: Global, Project, Task and Session scopes merged into one
//! immutable snapshot per pipeline run.

mod layer;
mod resolver;
mod store;

pub use layer::{ContextLayer, ContextScope, ContextValue};
pub use resolver::{resolve, ContextSnapshot, ResolvedEntry};
pub use store::{
    ContextStore, Session, ERROR_COUNT_KEY, MESSAGE_COUNT_KEY, TASK_STATUS_KEY, TASK_TITLE_KEY,
};
