use async_trait::async_trait;
use graph_flow::{Context, GraphError, NextAction, Result, Task, TaskResult};
use std::sync::Arc;
use tracing::info;

use super::session_keys;
use super::utils::run_json_tool;
use crate::config::ModelSettings;
use crate::llm::LanguageModel;
use crate::models::{BloodTestAnalysis, HealthIssueReport, StageOutput};

pub const TOOL_NAME: &str = "HealthIssueIdentifier";

fn health_issue_prompt(abnormal_values_json: &str) -> String {
    format!(
        r#"You are a medical expert. Given these abnormal blood test values, identify potential health issues.

Return a JSON object with the following structure:
{{
    "potential_health_issues": [
        {{
            "issue": "Name of potential health issue",
            "related_parameters": ["Parameter 1", "Parameter 2"],
            "confidence": "High/Medium/Low",
            "explanation": "Brief explanation of why these parameters suggest this issue"
        }}
    ]
}}

Abnormal Values: {abnormal_values_json}"#
    )
}

/// Identify potential health issues from the analyzer's output text
pub async fn identify_health_issues(
    model: &dyn LanguageModel,
    settings: &ModelSettings,
    abnormal_values_json: &str,
) -> crate::error::Result<StageOutput<HealthIssueReport>> {
    run_json_tool(
        model,
        settings,
        TOOL_NAME,
        health_issue_prompt(abnormal_values_json),
    )
    .await
}

/// Second step: abnormal values -> potential health issues
pub struct HealthIssueTask {
    model: Arc<dyn LanguageModel>,
    settings: ModelSettings,
}

impl HealthIssueTask {
    pub fn new(model: Arc<dyn LanguageModel>, settings: ModelSettings) -> Self {
        Self { model, settings }
    }
}

#[async_trait]
impl Task for HealthIssueTask {
    async fn run(&self, context: Context) -> Result<TaskResult> {
        info!(task_id = %self.id(), "Starting health issue identification");

        let analysis: StageOutput<BloodTestAnalysis> = context
            .get(session_keys::BLOOD_ANALYSIS)
            .await
            .ok_or_else(|| {
                GraphError::ContextError("Blood test analysis not found in context".to_string())
            })?;

        let output = identify_health_issues(
            self.model.as_ref(),
            &self.settings,
            &analysis.display_text(),
        )
        .await?;

        let status_message = match output.parsed() {
            Some(report) => format!(
                "Identified {} potential health issues",
                report.potential_health_issues.len()
            ),
            None => "Health issue response was not in the expected format".to_string(),
        };
        context.set(session_keys::HEALTH_ISSUES, output).await;

        Ok(TaskResult::new_with_status(
            None,
            NextAction::ContinueAndExecute,
            Some(status_message),
        ))
    }
}
