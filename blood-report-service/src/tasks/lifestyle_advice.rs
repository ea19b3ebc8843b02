use async_trait::async_trait;
use graph_flow::{Context, GraphError, NextAction, Result, Task, TaskResult};
use std::sync::Arc;
use tracing::info;

use super::session_keys;
use super::utils::run_json_tool;
use crate::config::ModelSettings;
use crate::llm::LanguageModel;
use crate::models::{HealthIssueReport, LifestylePlan, StageOutput};

pub const TOOL_NAME: &str = "LifestyleAdvisor";

fn lifestyle_prompt(health_issues_json: &str) -> String {
    format!(
        r#"You are a health advisor. Given these potential health issues, provide actionable lifestyle recommendations.

Return a JSON object with the following structure:
{{
    "lifestyle_recommendations": [
        {{
            "category": "Diet/Exercise/Sleep/etc.",
            "recommendation": "Specific actionable advice",
            "related_issues": ["Health issue 1", "Health issue 2"],
            "importance": "High/Medium/Low"
        }}
    ]
}}

Health Issues: {health_issues_json}"#
    )
}

/// Turn identified health issues into lifestyle recommendations
pub async fn advise_lifestyle(
    model: &dyn LanguageModel,
    settings: &ModelSettings,
    health_issues_json: &str,
) -> crate::error::Result<StageOutput<LifestylePlan>> {
    run_json_tool(model, settings, TOOL_NAME, lifestyle_prompt(health_issues_json)).await
}

/// Third step: health issues -> lifestyle recommendations
pub struct LifestyleAdviceTask {
    model: Arc<dyn LanguageModel>,
    settings: ModelSettings,
}

impl LifestyleAdviceTask {
    pub fn new(model: Arc<dyn LanguageModel>, settings: ModelSettings) -> Self {
        Self { model, settings }
    }
}

#[async_trait]
impl Task for LifestyleAdviceTask {
    async fn run(&self, context: Context) -> Result<TaskResult> {
        info!(task_id = %self.id(), "Starting lifestyle advice");

        let issues: StageOutput<HealthIssueReport> = context
            .get(session_keys::HEALTH_ISSUES)
            .await
            .ok_or_else(|| {
                GraphError::ContextError("Health issues not found in context".to_string())
            })?;

        let output =
            advise_lifestyle(self.model.as_ref(), &self.settings, &issues.display_text()).await?;

        let status_message = match output.parsed() {
            Some(plan) => format!(
                "Prepared {} lifestyle recommendations",
                plan.lifestyle_recommendations.len()
            ),
            None => "Lifestyle advice response was not in the expected format".to_string(),
        };
        context.set(session_keys::LIFESTYLE_PLAN, output).await;

        Ok(TaskResult::new_with_status(
            None,
            NextAction::ContinueAndExecute,
            Some(status_message),
        ))
    }
}
