use graph_flow::{FlowRunner, Graph, GraphBuilder, Session, SessionStorage, Task};
use std::sync::Arc;
use uuid::Uuid;

use crate::config::ModelSettings;
use crate::llm::LanguageModel;
use crate::tasks::*;

/// Analyzer -> issue identifier -> lifestyle advisor -> narrative
pub fn build_report_workflow(
    model: Arc<dyn LanguageModel>,
    settings: ModelSettings,
    max_steps: usize,
) -> Graph {
    let blood_analysis_task = Arc::new(BloodTestAnalysisTask::new(model.clone(), settings.clone()));
    let blood_analysis_id = blood_analysis_task.id().to_string();

    let health_issue_task = Arc::new(HealthIssueTask::new(model.clone(), settings.clone()));
    let health_issue_id = health_issue_task.id().to_string();

    let lifestyle_task = Arc::new(LifestyleAdviceTask::new(model, settings));
    let lifestyle_id = lifestyle_task.id().to_string();

    let composition_task = Arc::new(ReportCompositionTask);
    let composition_id = composition_task.id().to_string();

    GraphBuilder::new("blood_report_workflow")
        .add_task(blood_analysis_task)
        .add_task(health_issue_task)
        .add_task(lifestyle_task)
        .add_task(composition_task)
        .add_edge(&blood_analysis_id, &health_issue_id)
        .add_edge(&health_issue_id, &lifestyle_id)
        .add_edge(&lifestyle_id, &composition_id)
        .with_max_chained_steps(max_steps)
        .build()
}

/// New session holding the report text, positioned at the first task
pub async fn create_report_session(graph: &Graph, report_text: String) -> Session {
    let session_id = Uuid::new_v4().to_string();
    let start_task = graph.start_task_id().unwrap_or_default();

    let mut session = Session::new_from_task(session_id, start_task);
    session.graph_id = graph.id.clone();
    session
        .context
        .set(session_keys::REPORT_TEXT, report_text)
        .await;
    session
        .context
        .set(session_keys::CHAT_HISTORY, Vec::<crate::models::ChatTurn>::new())
        .await;

    session
}

pub fn create_flow_runner(graph: Arc<Graph>, session_storage: Arc<dyn SessionStorage>) -> FlowRunner {
    FlowRunner::new(graph, session_storage)
}
