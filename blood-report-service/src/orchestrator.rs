use graph_flow::{ExecutionStatus, FlowRunner, Graph, InMemorySessionStorage, Session, SessionStorage};
use serde::Serialize;
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::config::ModelSettings;
use crate::error::{ReportError, Result};
use crate::llm::LanguageModel;
use crate::models::{BloodTestAnalysis, HealthIssueReport, LifestylePlan, StageOutput};
use crate::sections::{ReportSections, extract_sections};
use crate::tasks::{StageOutputs, compose_narrative, session_keys};
use crate::workflow::{build_report_workflow, create_flow_runner, create_report_session};

/// Prefix of the agent response when the analysis run failed
pub const AGENT_ERROR_PREFIX: &str = "Error in agent execution: ";

/// Result of one analysis run
#[derive(Debug, Clone, Serialize)]
pub struct AnalysisOutcome {
    pub session_id: String,
    /// All three tools ran and the narrative was composed
    pub complete: bool,
    pub steps: usize,
    pub agent_response: String,
    pub sections: ReportSections,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub blood_analysis: Option<StageOutput<BloodTestAnalysis>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub health_issues: Option<StageOutput<HealthIssueReport>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lifestyle_plan: Option<StageOutput<LifestylePlan>>,
}

impl AnalysisOutcome {
    fn failed(session_id: &str, agent_response: String) -> Self {
        Self {
            session_id: session_id.to_string(),
            complete: false,
            steps: 0,
            agent_response,
            sections: ReportSections::default(),
            blood_analysis: None,
            health_issues: None,
            lifestyle_plan: None,
        }
    }
}

/// Runs the analysis workflow for report sessions
#[derive(Clone)]
pub struct ReportOrchestrator {
    runner: FlowRunner,
    storage: Arc<dyn SessionStorage>,
}

impl ReportOrchestrator {
    pub fn new(
        model: Arc<dyn LanguageModel>,
        settings: ModelSettings,
        max_steps: usize,
        storage: Arc<dyn SessionStorage>,
    ) -> Self {
        let graph = Arc::new(build_report_workflow(model, settings, max_steps));
        Self::from_graph(graph, storage)
    }

    pub fn from_graph(graph: Arc<Graph>, storage: Arc<dyn SessionStorage>) -> Self {
        Self {
            runner: create_flow_runner(graph, storage.clone()),
            storage,
        }
    }

    pub fn storage(&self) -> &Arc<dyn SessionStorage> {
        &self.storage
    }

    /// Store a new session for `report_text` and return its id
    pub async fn create_session(&self, report_text: String) -> Result<String> {
        let session = create_report_session(self.runner.graph(), report_text).await;
        let session_id = session.id.clone();
        self.storage.save(session).await?;

        info!(session_id = %session_id, "Report session created");
        Ok(session_id)
    }

    pub async fn load(&self, session_id: &str) -> Result<Session> {
        self.storage
            .get(session_id)
            .await?
            .ok_or_else(|| ReportError::SessionNotFound(session_id.to_string()))
    }

    /// Run the three tools and compose the narrative.
    ///
    /// Earlier results of the session are discarded first. When the step bound
    /// stops the chain early the narrative holds only the finished stages and
    /// `complete` is false.
    pub async fn analyze(&self, session_id: &str) -> Result<AnalysisOutcome> {
        let mut session = self.load(session_id).await?;
        self.reset_analysis(&mut session).await;
        self.storage.save(session).await?;

        info!(session_id = %session_id, "Starting report analysis");
        let result = self.runner.run(session_id).await?;

        let session = self.load(session_id).await?;
        let context = &session.context;
        let outputs = StageOutputs::from_context(context).await;
        // The step bound may stop the chain after the last tool but before
        // composition; completeness is decided by the tool outputs alone.
        let complete = outputs.is_complete();
        if !complete {
            warn!(
                session_id = %session_id,
                steps = result.steps,
                status = ?result.status,
                "Analysis stopped before all tools ran, returning partial narrative"
            );
        }

        let composed = match result.status {
            ExecutionStatus::Completed => context.get::<String>(session_keys::AGENT_RESPONSE).await,
            ExecutionStatus::StepLimitReached => None,
        };
        let agent_response = composed.unwrap_or_else(|| compose_narrative(&outputs));

        let sections = extract_sections(&agent_response);
        context
            .set(session_keys::AGENT_RESPONSE, agent_response.clone())
            .await;
        context.set(session_keys::SECTIONS, sections.clone()).await;
        context.set(session_keys::ANALYSIS_COMPLETE, complete).await;
        self.storage.save(session.clone()).await?;

        info!(
            session_id = %session_id,
            complete,
            steps = result.steps,
            "Report analysis finished"
        );

        Ok(AnalysisOutcome {
            session_id: session_id.to_string(),
            complete,
            steps: result.steps,
            agent_response,
            sections,
            blood_analysis: outputs.blood_analysis,
            health_issues: outputs.health_issues,
            lifestyle_plan: outputs.lifestyle_plan,
        })
    }

    /// Like [`analyze`](Self::analyze), but a failed run becomes an outcome whose
    /// agent response is the `"Error in agent execution: ..."` text. Only an
    /// unknown session is returned as an error.
    pub async fn run_analysis(&self, session_id: &str) -> Result<AnalysisOutcome> {
        match self.analyze(session_id).await {
            Ok(outcome) => Ok(outcome),
            Err(ReportError::SessionNotFound(id)) => Err(ReportError::SessionNotFound(id)),
            Err(e) => {
                error!(session_id = %session_id, error = %e, "Report analysis failed");
                let agent_response = format!("{AGENT_ERROR_PREFIX}{e}");
                self.store_failure(session_id, &agent_response).await;
                Ok(AnalysisOutcome::failed(session_id, agent_response))
            }
        }
    }

    /// Analyze `report_text` in a fresh session and return the narrative, or
    /// the error text. Never fails.
    pub async fn process_report(&self, report_text: &str) -> String {
        let session_id = match self.create_session(report_text.to_string()).await {
            Ok(id) => id,
            Err(e) => return format!("{AGENT_ERROR_PREFIX}{e}"),
        };

        match self.run_analysis(&session_id).await {
            Ok(outcome) => outcome.agent_response,
            Err(e) => format!("{AGENT_ERROR_PREFIX}{e}"),
        }
    }

    async fn reset_analysis(&self, session: &mut Session) {
        if let Some(start) = self.runner.graph().start_task_id() {
            session.current_task_id = start.to_string();
        }
        session.status_message = None;

        let context = &session.context;
        for key in [
            session_keys::BLOOD_ANALYSIS,
            session_keys::HEALTH_ISSUES,
            session_keys::LIFESTYLE_PLAN,
            session_keys::AGENT_RESPONSE,
            session_keys::SECTIONS,
        ] {
            context.remove(key).await;
        }
        context.set(session_keys::ANALYSIS_COMPLETE, false).await;
    }

    async fn store_failure(&self, session_id: &str, agent_response: &str) {
        let Ok(session) = self.load(session_id).await else {
            return;
        };
        session
            .context
            .set(session_keys::AGENT_RESPONSE, agent_response)
            .await;
        session
            .context
            .set(session_keys::SECTIONS, ReportSections::default())
            .await;
        if let Err(e) = self.storage.save(session).await {
            warn!(session_id = %session_id, error = %e, "Failed to store analysis error");
        }
    }
}

/// One-shot analysis with a throwaway in-memory session store
pub async fn process_blood_test_report(
    model: Arc<dyn LanguageModel>,
    settings: ModelSettings,
    max_steps: usize,
    report_text: &str,
) -> String {
    let storage: Arc<dyn SessionStorage> = Arc::new(InMemorySessionStorage::new());
    ReportOrchestrator::new(model, settings, max_steps, storage)
        .process_report(report_text)
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::testing::ScriptedModel;
    use crate::models::UNPARSED_SENTINEL;
    use serde_json::json;

    const ANALYSIS_REPLY: &str = r#"```json
{"summary": "Low hemoglobin", "abnormal_values": [
  {"parameter": "Hemoglobin", "value": "10.2 g/dL", "reference_range": "13.5-17.5 g/dL", "interpretation": "Anemia"}
]}
```"#;
    const ISSUES_REPLY: &str = r#"{"potential_health_issues": [
  {"issue": "Anemia", "related_parameters": ["Hemoglobin"], "confidence": "High", "explanation": "Low hemoglobin"}
]}"#;
    const LIFESTYLE_REPLY: &str = r#"{"lifestyle_recommendations": [
  {"category": "Diet", "recommendation": "Eat iron-rich foods", "related_issues": ["Anemia"], "importance": "High"}
]}"#;

    fn orchestrator(model: Arc<ScriptedModel>, max_steps: usize) -> ReportOrchestrator {
        ReportOrchestrator::new(
            model,
            ModelSettings::new("test-model", 0.3),
            max_steps,
            Arc::new(InMemorySessionStorage::new()),
        )
    }

    #[tokio::test]
    async fn full_run_produces_three_sections() {
        let model = Arc::new(ScriptedModel::new([ANALYSIS_REPLY, ISSUES_REPLY, LIFESTYLE_REPLY]));
        let orchestrator = orchestrator(model.clone(), 5);
        let session_id = orchestrator
            .create_session("Hemoglobin 10.2 g/dL".to_string())
            .await
            .unwrap();

        let outcome = orchestrator.analyze(&session_id).await.unwrap();

        assert!(outcome.complete);
        assert_eq!(outcome.steps, 4);
        assert!(outcome.agent_response.starts_with("1. Blood Test Analysis"));
        assert_eq!(
            outcome.sections.health_issues_json.as_ref().unwrap()["potential_health_issues"][0]
                ["issue"],
            json!("Anemia")
        );
        assert!(outcome.sections.lifestyle_recommendations.is_some());

        // Each stage is fed the previous stage's JSON
        let prompts = model.prompts();
        assert_eq!(prompts.len(), 3);
        assert!(prompts[0].contains("Report: Hemoglobin 10.2 g/dL"));
        assert!(prompts[1].contains("\"parameter\": \"Hemoglobin\""));
        assert!(prompts[2].contains("\"issue\": \"Anemia\""));

        let session = orchestrator.load(&session_id).await.unwrap();
        let stored: ReportSections = session.context.get(session_keys::SECTIONS).await.unwrap();
        assert_eq!(stored, outcome.sections);
    }

    #[tokio::test]
    async fn unparseable_stage_flows_through_as_text() {
        let model = Arc::new(ScriptedModel::new([
            "Everything looks normal to me.",
            ISSUES_REPLY,
            LIFESTYLE_REPLY,
        ]));
        let orchestrator = orchestrator(model.clone(), 5);
        let session_id = orchestrator.create_session("report".to_string()).await.unwrap();

        let outcome = orchestrator.analyze(&session_id).await.unwrap();

        assert!(outcome.complete);
        assert!(
            outcome
                .sections
                .blood_analysis
                .as_deref()
                .unwrap()
                .starts_with(UNPARSED_SENTINEL)
        );
        assert!(outcome.sections.blood_analysis_json.is_none());
        assert!(model.prompts()[1].contains(UNPARSED_SENTINEL));
    }

    #[tokio::test]
    async fn step_limit_returns_partial_narrative() {
        let model = Arc::new(ScriptedModel::new([ANALYSIS_REPLY, ISSUES_REPLY, LIFESTYLE_REPLY]));
        let orchestrator = orchestrator(model.clone(), 2);
        let session_id = orchestrator.create_session("report".to_string()).await.unwrap();

        let outcome = orchestrator.analyze(&session_id).await.unwrap();

        assert!(!outcome.complete);
        assert_eq!(outcome.steps, 2);
        assert!(outcome.sections.blood_analysis.is_some());
        assert!(outcome.sections.health_issues.is_some());
        assert!(outcome.sections.lifestyle_recommendations.is_none());
        assert_eq!(model.prompts().len(), 2);
    }

    #[tokio::test]
    async fn step_limit_after_last_tool_is_still_complete() {
        let model = Arc::new(ScriptedModel::new([ANALYSIS_REPLY, ISSUES_REPLY, LIFESTYLE_REPLY]));
        let orchestrator = orchestrator(model, 3);
        let session_id = orchestrator.create_session("report".to_string()).await.unwrap();

        let outcome = orchestrator.analyze(&session_id).await.unwrap();

        assert!(outcome.complete);
        assert_eq!(outcome.steps, 3);
        assert!(outcome.sections.lifestyle_recommendations_json.is_some());
        assert!(outcome.agent_response.contains("3. Lifestyle Recommendations"));

        let session = orchestrator.load(&session_id).await.unwrap();
        let stored: bool = session
            .context
            .get(session_keys::ANALYSIS_COMPLETE)
            .await
            .unwrap();
        assert!(stored);
    }

    #[tokio::test]
    async fn upstream_failure_becomes_error_text() {
        let model = Arc::new(ScriptedModel::new([ANALYSIS_REPLY]));
        model.push_error(ReportError::Upstream {
            status: 500,
            body: "internal error".to_string(),
        });
        let orchestrator = orchestrator(model, 5);

        let response = orchestrator.process_report("report").await;

        assert!(response.starts_with(AGENT_ERROR_PREFIX), "got: {response}");
        assert!(response.contains("500"));
    }

    #[tokio::test]
    async fn typed_analyze_returns_the_error() {
        let model = Arc::new(ScriptedModel::default());
        model.push_error(ReportError::MissingCredential);
        let orchestrator = orchestrator(model.clone(), 5);
        let session_id = orchestrator.create_session("report".to_string()).await.unwrap();

        let err = orchestrator.analyze(&session_id).await.unwrap_err();
        assert!(matches!(err, ReportError::MissingCredential));

        model.push_error(ReportError::InvalidModelResponse("no choices".to_string()));
        let err = orchestrator.analyze(&session_id).await.unwrap_err();
        assert!(matches!(err, ReportError::InvalidModelResponse(_)));

        model.push_error(ReportError::MissingCredential);
        let outcome = orchestrator.run_analysis(&session_id).await.unwrap();
        assert!(!outcome.complete);
        assert_eq!(
            outcome.agent_response,
            format!("{AGENT_ERROR_PREFIX}OPENROUTER_API_KEY environment variable not set")
        );
        assert!(outcome.sections.is_empty());
        assert!(outcome.sections.is_empty());
    }

    #[tokio::test]
    async fn rerun_replaces_previous_results() {
        let model = Arc::new(ScriptedModel::new([
            ANALYSIS_REPLY,
            ISSUES_REPLY,
            LIFESTYLE_REPLY,
            "not json",
            "not json",
            "not json",
        ]));
        let orchestrator = orchestrator(model, 5);
        let session_id = orchestrator.create_session("report".to_string()).await.unwrap();

        orchestrator.analyze(&session_id).await.unwrap();
        let second = orchestrator.analyze(&session_id).await.unwrap();

        assert!(second.complete);
        assert!(second.sections.blood_analysis_json.is_none());
        assert!(second.agent_response.contains(UNPARSED_SENTINEL));
    }

    #[tokio::test]
    async fn unknown_session_is_not_found() {
        let orchestrator = orchestrator(Arc::new(ScriptedModel::default()), 5);

        let err = orchestrator.run_analysis("missing").await.unwrap_err();
        assert!(matches!(err, ReportError::SessionNotFound(_)));
    }

    #[tokio::test]
    async fn one_shot_helper_returns_narrative() {
        let model = Arc::new(ScriptedModel::new([ANALYSIS_REPLY, ISSUES_REPLY, LIFESTYLE_REPLY]));

        let narrative = process_blood_test_report(
            model,
            ModelSettings::new("test-model", 0.3),
            5,
            "Hemoglobin 10.2 g/dL",
        )
        .await;

        let sections = extract_sections(&narrative);
        assert!(sections.blood_analysis_json.is_some());
        assert!(sections.health_issues_json.is_some());
        assert!(sections.lifestyle_recommendations_json.is_some());
    }
}
