use graph_flow::GraphError;
use thiserror::Error;

/// Failures of the report pipeline that are not expressed as data.
///
/// Malformed model replies are not errors: they surface as
/// [`StageOutput::Unparsed`](crate::models::StageOutput::Unparsed).
#[derive(Debug, Error)]
pub enum ReportError {
    #[error("OPENROUTER_API_KEY environment variable not set")]
    MissingCredential,

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("HTTP request to model API failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Model API returned {status}: {body}")]
    Upstream { status: u16, body: String },

    #[error("Invalid response format from model API: {0}")]
    InvalidModelResponse(String),

    #[error("Failed to read PDF: {0}")]
    Pdf(String),

    #[error("Workflow error: {0}")]
    Workflow(#[source] GraphError),

    #[error("Session not found: {0}")]
    SessionNotFound(String),

    #[error("No analysis available for session {0}")]
    AnalysisMissing(String),
}

/// Tasks return `GraphError`; the report error rides along as the source.
impl From<ReportError> for GraphError {
    fn from(e: ReportError) -> Self {
        match e {
            ReportError::Workflow(inner) => inner,
            other => GraphError::task_failed(other),
        }
    }
}

/// Recover a report error raised inside a task; other graph errors stay `Workflow`.
impl From<GraphError> for ReportError {
    fn from(e: GraphError) -> Self {
        match e {
            GraphError::TaskExecutionFailed(source) => match source.downcast::<ReportError>() {
                Ok(report_error) => *report_error,
                Err(source) => ReportError::Workflow(GraphError::TaskExecutionFailed(source)),
            },
            other => ReportError::Workflow(other),
        }
    }
}

pub type Result<T> = std::result::Result<T, ReportError>;
