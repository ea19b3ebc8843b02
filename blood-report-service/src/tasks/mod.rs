pub mod blood_test_analysis;
pub mod health_issues;
pub mod lifestyle_advice;
pub mod report_composition;
pub mod utils;

pub use blood_test_analysis::BloodTestAnalysisTask;
pub use health_issues::HealthIssueTask;
pub use lifestyle_advice::LifestyleAdviceTask;
pub use report_composition::{ReportCompositionTask, StageOutputs, compose_narrative};

/// Context keys shared by the tasks and the session layer
pub mod session_keys {
    pub const REPORT_TEXT: &str = "report_text";
    pub const BLOOD_ANALYSIS: &str = "blood_analysis";
    pub const HEALTH_ISSUES: &str = "health_issues";
    pub const LIFESTYLE_PLAN: &str = "lifestyle_plan";
    pub const AGENT_RESPONSE: &str = "agent_response";
    pub const SECTIONS: &str = "sections";
    pub const ANALYSIS_COMPLETE: &str = "analysis_complete";
    pub const CHAT_HISTORY: &str = "chat_history";
}
