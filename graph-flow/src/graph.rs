use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::{
    context::Context,
    error::{GraphError, Result},
    storage::Session,
    task::{NextAction, Task, TaskResult},
};

/// Number of tasks a single `execute_session` call may run back to back
/// when tasks ask for `ContinueAndExecute`.
pub const DEFAULT_MAX_CHAINED_STEPS: usize = 5;

/// Edge between tasks in the graph
#[derive(Debug, Clone)]
pub struct Edge {
    pub from: String,
    pub to: String,
}

/// A graph of tasks that can be executed
pub struct Graph {
    pub id: String,
    tasks: HashMap<String, Arc<dyn Task>>,
    edges: Vec<Edge>,
    start_task_id: Option<String>,
    max_chained_steps: usize,
}

impl Graph {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            tasks: HashMap::new(),
            edges: Vec::new(),
            start_task_id: None,
            max_chained_steps: DEFAULT_MAX_CHAINED_STEPS,
        }
    }

    /// Run the session's current task and keep going while tasks return
    /// `ContinueAndExecute`, up to the configured step bound.
    ///
    /// The session's `current_task_id` and `status_message` are updated in
    /// place; persisting the session is the caller's job.
    pub async fn execute_session(&self, session: &mut Session) -> Result<ExecutionResult> {
        let mut steps = 0;

        loop {
            let result = self
                .execute_single_task(&session.current_task_id, session.context.clone())
                .await?;
            steps += 1;

            if result.status_message.is_some() {
                session.status_message = result.status_message.clone();
            }

            match &result.next_action {
                NextAction::ContinueAndExecute => {
                    let next_task_id = self
                        .find_next_task(&result.task_id)
                        .ok_or_else(|| GraphError::MissingEdge(result.task_id.clone()))?;
                    session.current_task_id = next_task_id;

                    if steps >= self.max_chained_steps {
                        warn!(
                            graph_id = %self.id,
                            steps,
                            next_task = %session.current_task_id,
                            "Step limit reached before the graph finished"
                        );
                        return Ok(ExecutionResult::new(
                            result.response,
                            ExecutionStatus::StepLimitReached,
                            steps,
                        ));
                    }
                }
                NextAction::End => {
                    session.current_task_id = result.task_id.clone();
                    return Ok(ExecutionResult::new(
                        result.response,
                        ExecutionStatus::Completed,
                        steps,
                    ));
                }
            }
        }
    }

    /// Execute a single task without following its next action
    async fn execute_single_task(&self, task_id: &str, context: Context) -> Result<TaskResult> {
        let task = self
            .tasks
            .get(task_id)
            .ok_or_else(|| GraphError::TaskNotFound(task_id.to_string()))?;

        debug!(graph_id = %self.id, task_id = %task_id, "Running task");
        let mut result = task.run(context).await?;
        result.task_id = task_id.to_string();

        Ok(result)
    }

    /// Find the task that follows `current_task_id`
    pub fn find_next_task(&self, current_task_id: &str) -> Option<String> {
        self.edges
            .iter()
            .find(|edge| edge.from == current_task_id)
            .map(|edge| edge.to.clone())
    }

    pub fn start_task_id(&self) -> Option<&str> {
        self.start_task_id.as_deref()
    }
}

/// Builder for creating graphs
pub struct GraphBuilder {
    graph: Graph,
}

impl GraphBuilder {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            graph: Graph::new(id),
        }
    }

    /// Add a task. The first task added becomes the start task.
    pub fn add_task(mut self, task: Arc<dyn Task>) -> Self {
        let task_id = task.id().to_string();
        if self.graph.start_task_id.is_none() {
            self.graph.start_task_id = Some(task_id.clone());
        }
        self.graph.tasks.insert(task_id, task);
        self
    }

    pub fn add_edge(mut self, from: impl Into<String>, to: impl Into<String>) -> Self {
        self.graph.edges.push(Edge {
            from: from.into(),
            to: to.into(),
        });
        self
    }

    /// Bound on back-to-back task runs per `execute_session` call; at least 1
    pub fn with_max_chained_steps(mut self, max_steps: usize) -> Self {
        self.graph.max_chained_steps = max_steps.max(1);
        self
    }

    pub fn build(self) -> Graph {
        self.graph
    }
}

/// Outcome of one `execute_session` call
#[derive(Debug, Clone)]
pub struct ExecutionResult {
    pub response: Option<String>,
    pub status: ExecutionStatus,
    /// Tasks run during this call
    pub steps: usize,
}

impl ExecutionResult {
    fn new(response: Option<String>, status: ExecutionStatus, steps: usize) -> Self {
        Self {
            response,
            status,
            steps,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutionStatus {
    /// Workflow completed successfully
    Completed,
    /// Chained execution stopped at the step bound
    StepLimitReached,
}
