pub mod chat;
pub mod config;
pub mod error;
pub mod llm;
pub mod models;
pub mod orchestrator;
pub mod pdf_text;
pub mod sections;
pub mod service;
pub mod session;
pub mod tasks;
pub mod workflow;

pub use config::{ModelSettings, ServiceConfig};
pub use error::{ReportError, Result};
pub use llm::{CompletionRequest, LanguageModel, OpenRouterModel};
pub use models::*;
pub use orchestrator::{AnalysisOutcome, ReportOrchestrator, process_blood_test_report};
pub use sections::{ReportSections, extract_sections};
pub use service::{AppState, build_router, create_app};
pub use session::{ReportSessions, SessionSnapshot};
pub use workflow::{build_report_workflow, create_flow_runner, create_report_session};
