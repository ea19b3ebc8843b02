use thiserror::Error;

/// Error type a task may hand back through the graph untouched
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors raised while building or executing a task graph
#[derive(Debug, Error)]
pub enum GraphError {
    /// A task failed; the task's own error is kept as the source so callers
    /// can downcast it back to their type.
    #[error("Task execution failed: {0}")]
    TaskExecutionFailed(#[source] BoxError),

    #[error("Task not found: {0}")]
    TaskNotFound(String),

    #[error("No edge leaves task {0}")]
    MissingEdge(String),

    #[error("Context error: {0}")]
    ContextError(String),

    #[error("Session not found: {0}")]
    SessionNotFound(String),
}

impl GraphError {
    pub fn task_failed(error: impl Into<BoxError>) -> Self {
        GraphError::TaskExecutionFailed(error.into())
    }
}

pub type Result<T> = std::result::Result<T, GraphError>;
