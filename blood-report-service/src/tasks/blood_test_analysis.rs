use async_trait::async_trait;
use graph_flow::{Context, GraphError, NextAction, Result, Task, TaskResult};
use std::sync::Arc;
use tracing::info;

use super::session_keys;
use super::utils::run_json_tool;
use crate::config::ModelSettings;
use crate::llm::LanguageModel;
use crate::models::{BloodTestAnalysis, StageOutput};

pub const TOOL_NAME: &str = "BloodTestAnalyzer";

fn analysis_prompt(report_text: &str) -> String {
    format!(
        r#"You are a blood test analyst. Analyze the following blood test report and extract the important information.

Return a JSON object with the following structure, containing only the abnormal values:
{{
    "summary": "Brief summary of the overall blood test results",
    "abnormal_values": [
        {{
            "parameter": "Parameter name",
            "value": "Measured value",
            "reference_range": "Normal range",
            "interpretation": "Brief explanation of what this abnormal value might indicate"
        }}
    ]
}}

Report: {report_text}"#
    )
}

/// Extract the summary and abnormal values from raw report text
pub async fn analyze_blood_test(
    model: &dyn LanguageModel,
    settings: &ModelSettings,
    report_text: &str,
) -> crate::error::Result<StageOutput<BloodTestAnalysis>> {
    run_json_tool(model, settings, TOOL_NAME, analysis_prompt(report_text)).await
}

/// First step of the analysis: report text -> abnormal values
pub struct BloodTestAnalysisTask {
    model: Arc<dyn LanguageModel>,
    settings: ModelSettings,
}

impl BloodTestAnalysisTask {
    pub fn new(model: Arc<dyn LanguageModel>, settings: ModelSettings) -> Self {
        Self { model, settings }
    }
}

#[async_trait]
impl Task for BloodTestAnalysisTask {
    async fn run(&self, context: Context) -> Result<TaskResult> {
        info!(task_id = %self.id(), "Starting blood test analysis");

        let report_text: String = context
            .get(session_keys::REPORT_TEXT)
            .await
            .ok_or_else(|| GraphError::ContextError("Report text not found in context".to_string()))?;

        let output = analyze_blood_test(self.model.as_ref(), &self.settings, &report_text).await?;

        let status_message = match output.parsed() {
            Some(analysis) => format!(
                "Blood test analyzed: {} abnormal values",
                analysis.abnormal_values.len()
            ),
            None => "Blood test analyzed: response was not in the expected format".to_string(),
        };
        context.set(session_keys::BLOOD_ANALYSIS, output).await;

        Ok(TaskResult::new_with_status(
            None,
            NextAction::ContinueAndExecute,
            Some(status_message),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::testing::ScriptedModel;
    use crate::models::UNPARSED_SENTINEL;

    fn settings() -> ModelSettings {
        ModelSettings::new("test-model", 0.3)
    }

    #[tokio::test]
    async fn fenced_reply_is_parsed() {
        let model = ScriptedModel::new([r#"```json
{
  "summary": "Mild anemia",
  "abnormal_values": [
    {"parameter": "Hemoglobin", "value": "10.2 g/dL", "reference_range": "13.5-17.5 g/dL", "interpretation": "Low"}
  ]
}
```"#]);

        let output = analyze_blood_test(&model, &settings(), "Hemoglobin 10.2 g/dL")
            .await
            .unwrap();

        let analysis = output.parsed().unwrap();
        assert_eq!(analysis.summary, "Mild anemia");
        assert_eq!(analysis.abnormal_values[0].parameter, "Hemoglobin");

        let prompts = model.prompts();
        assert!(prompts[0].contains("Report: Hemoglobin 10.2 g/dL"));
        assert_eq!(model.requests.lock().unwrap()[0].settings.temperature, 0.3);
    }

    #[tokio::test]
    async fn numeric_value_is_not_a_parse_failure() {
        let model = ScriptedModel::new([
            r#"{"summary":"Low Hb","abnormal_values":[{"parameter":"Hemoglobin","value":10.2,"reference_range":"13.5-17.5","interpretation":"Low"}]}"#,
        ]);

        let output = analyze_blood_test(&model, &settings(), "Hemoglobin 10.2")
            .await
            .unwrap();

        assert!(output.is_parsed());
        assert_eq!(output.parsed().unwrap().abnormal_values[0].value, "10.2");
        assert!(!output.display_text().starts_with(UNPARSED_SENTINEL));
    }

    #[tokio::test]
    async fn prose_reply_degrades_to_sentinel_text() {
        let model = ScriptedModel::new(["The results look mostly fine."]);

        let output = analyze_blood_test(&model, &settings(), "report").await.unwrap();

        assert!(!output.is_parsed());
        let text = output.display_text();
        assert!(text.starts_with(UNPARSED_SENTINEL));
        assert!(text.ends_with("The results look mostly fine."));
    }

    #[tokio::test]
    async fn task_stores_output_and_continues() {
        let model = Arc::new(ScriptedModel::new([
            r#"{"summary": "Normal", "abnormal_values": []}"#,
        ]));
        let task = BloodTestAnalysisTask::new(model, settings());
        let context = Context::new();
        context.set(session_keys::REPORT_TEXT, "Glucose 90 mg/dL").await;

        let result = task.run(context.clone()).await.unwrap();

        assert_eq!(result.next_action, NextAction::ContinueAndExecute);
        let stored: StageOutput<BloodTestAnalysis> =
            context.get(session_keys::BLOOD_ANALYSIS).await.unwrap();
        assert_eq!(stored.parsed().unwrap().summary, "Normal");
    }

    #[tokio::test]
    async fn missing_report_text_is_context_error() {
        let task = BloodTestAnalysisTask::new(Arc::new(ScriptedModel::default()), settings());

        let err = task.run(Context::new()).await.unwrap_err();
        assert!(matches!(err, GraphError::ContextError(_)));
    }
}
