use async_trait::async_trait;
use graph_flow::{Context, NextAction, Result, Task, TaskResult};
use serde::Serialize;
use std::fmt::Write as _;
use tracing::info;

use super::session_keys;
use crate::models::{BloodTestAnalysis, HealthIssueReport, LifestylePlan, StageOutput};

pub const BLOOD_ANALYSIS_HEADING: &str = "1. Blood Test Analysis";
pub const HEALTH_ISSUES_HEADING: &str = "2. Potential Health Issues";
pub const LIFESTYLE_HEADING: &str = "3. Lifestyle Recommendations";

/// Stage outputs available to the narrative; missing ones are skipped
#[derive(Debug, Clone, Default)]
pub struct StageOutputs {
    pub blood_analysis: Option<StageOutput<BloodTestAnalysis>>,
    pub health_issues: Option<StageOutput<HealthIssueReport>>,
    pub lifestyle_plan: Option<StageOutput<LifestylePlan>>,
}

impl StageOutputs {
    pub async fn from_context(context: &Context) -> Self {
        Self {
            blood_analysis: context.get(session_keys::BLOOD_ANALYSIS).await,
            health_issues: context.get(session_keys::HEALTH_ISSUES).await,
            lifestyle_plan: context.get(session_keys::LIFESTYLE_PLAN).await,
        }
    }

    pub fn is_complete(&self) -> bool {
        self.blood_analysis.is_some() && self.health_issues.is_some() && self.lifestyle_plan.is_some()
    }
}

/// Write the numbered three-section narrative the section extractor reads back.
pub fn compose_narrative(outputs: &StageOutputs) -> String {
    let mut sections = Vec::new();

    if let Some(output) = &outputs.blood_analysis {
        sections.push(section(BLOOD_ANALYSIS_HEADING, output, |analysis, out| {
            let _ = writeln!(out, "{}", analysis.summary);
            if analysis.abnormal_values.is_empty() {
                let _ = writeln!(out, "No abnormal values were found.");
            }
            for value in &analysis.abnormal_values {
                let _ = writeln!(
                    out,
                    "- {}: {} (reference: {}) - {}",
                    value.parameter, value.value, value.reference_range, value.interpretation
                );
            }
        }));
    }

    if let Some(output) = &outputs.health_issues {
        sections.push(section(HEALTH_ISSUES_HEADING, output, |report, out| {
            if report.potential_health_issues.is_empty() {
                let _ = writeln!(out, "No potential health issues were identified.");
            }
            for issue in &report.potential_health_issues {
                let _ = writeln!(
                    out,
                    "- {} (confidence: {}): {}",
                    issue.issue, issue.confidence, issue.explanation
                );
            }
        }));
    }

    if let Some(output) = &outputs.lifestyle_plan {
        sections.push(section(LIFESTYLE_HEADING, output, |plan, out| {
            if plan.lifestyle_recommendations.is_empty() {
                let _ = writeln!(out, "No lifestyle changes were recommended.");
            }
            for rec in &plan.lifestyle_recommendations {
                let _ = writeln!(
                    out,
                    "- [{}] {} (importance: {})",
                    rec.category, rec.recommendation, rec.importance
                );
            }
        }));
    }

    sections.join("\n")
}

fn section<T, F>(heading: &str, output: &StageOutput<T>, describe: F) -> String
where
    T: Serialize + serde::de::DeserializeOwned,
    F: FnOnce(&T, &mut String),
{
    let mut out = String::new();
    let _ = writeln!(out, "{heading}");
    match output {
        StageOutput::Parsed(payload) => {
            describe(payload, &mut out);
            let _ = writeln!(out, "```json\n{}\n```", output.display_text());
        }
        StageOutput::Untyped(_) => {
            let _ = writeln!(out, "```json\n{}\n```", output.display_text());
        }
        StageOutput::Unparsed(_) => {
            let _ = writeln!(out, "{}", output.display_text());
        }
    }
    out
}

/// Last step: stitch the stage outputs into the analysis narrative
pub struct ReportCompositionTask;

#[async_trait]
impl Task for ReportCompositionTask {
    async fn run(&self, context: Context) -> Result<TaskResult> {
        info!(task_id = %self.id(), "Composing analysis narrative");

        let outputs = StageOutputs::from_context(&context).await;
        let narrative = compose_narrative(&outputs);
        context.set(session_keys::AGENT_RESPONSE, narrative.clone()).await;

        Ok(TaskResult::new_with_status(
            Some(narrative),
            NextAction::End,
            Some("Analysis complete".to_string()),
        ))
    }
}
