pub mod context;
pub mod error;
pub mod graph;
pub mod runner;
pub mod storage;
pub mod task;

// Re-export commonly used types
pub use context::Context;
pub use error::{BoxError, GraphError, Result};
pub use graph::{DEFAULT_MAX_CHAINED_STEPS, ExecutionResult, ExecutionStatus, Graph, GraphBuilder};
pub use runner::FlowRunner;
pub use storage::{InMemorySessionStorage, Session, SessionStorage};
pub use task::{NextAction, Task, TaskResult};
