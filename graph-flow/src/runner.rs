//! FlowRunner – loads a session, executes the graph from the session's current task and
//! persists the updated session back to storage.
//!
//! Use it from request handlers where every call should start where the previous one left
//! off. Call [`Graph::execute_session`] directly when the session should not be saved, or
//! should be inspected before saving.
//!
//! ```rust,ignore
//! let runner = FlowRunner::new(graph.clone(), storage.clone());
//! let result = runner.run(&session_id).await?;
//! ```

use std::sync::Arc;

use crate::{
    error::{GraphError, Result},
    graph::{ExecutionResult, Graph},
    storage::SessionStorage,
};

/// Orchestrates the _load → execute → save_ pattern.
#[derive(Clone)]
pub struct FlowRunner {
    graph: Arc<Graph>,
    storage: Arc<dyn SessionStorage>,
}

impl FlowRunner {
    pub fn new(graph: Arc<Graph>, storage: Arc<dyn SessionStorage>) -> Self {
        Self { graph, storage }
    }

    pub fn graph(&self) -> &Arc<Graph> {
        &self.graph
    }

    /// Execute the graph for `session_id` and persist the updated session.
    ///
    /// The session is saved even when the run stops at the step bound, so a
    /// later call continues from the next pending task.
    pub async fn run(&self, session_id: &str) -> Result<ExecutionResult> {
        let mut session = self
            .storage
            .get(session_id)
            .await?
            .ok_or_else(|| GraphError::SessionNotFound(session_id.to_string()))?;

        let result = self.graph.execute_session(&mut session).await?;

        self.storage.save(session).await?;

        Ok(result)
    }
}
