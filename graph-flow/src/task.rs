use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::{context::Context, error::Result};

/// Result of a task execution
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskResult {
    /// Response to hand back to the caller
    pub response: Option<String>,
    /// Next action to take
    pub next_action: NextAction,
    /// Id of the task that produced this result, filled in by the graph
    pub task_id: String,
    /// Human readable progress note stored on the session
    pub status_message: Option<String>,
}

impl TaskResult {
    pub fn new_with_status(
        response: Option<String>,
        next_action: NextAction,
        status_message: Option<String>,
    ) -> Self {
        Self {
            response,
            next_action,
            task_id: String::new(),
            status_message,
        }
    }
}

/// Defines what should happen after a task completes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum NextAction {
    /// Move to the next task and run it immediately
    ContinueAndExecute,
    /// End the graph execution
    End,
}

/// Core trait that all tasks must implement
#[async_trait]
pub trait Task: Send + Sync {
    /// Unique identifier for this task
    fn id(&self) -> &str {
        std::any::type_name::<Self>()
    }

    /// Execute the task with the given context
    async fn run(&self, context: Context) -> Result<TaskResult>;
}
