use axum::{
    Router,
    body::Bytes,
    extract::{DefaultBodyLimit, Path, State},
    http::{HeaderValue, Request, StatusCode},
    middleware::{Next, from_fn},
    response::Json,
    routing::{get, post},
};
use graph_flow::{InMemorySessionStorage, SessionStorage};
use serde_json::{Value, json};
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{Instrument, error, info, warn};
use uuid::Uuid;

use crate::{
    config::ServiceConfig,
    error::{ReportError, Result},
    llm::{LanguageModel, OpenRouterModel},
    models::{ChatRequest, ChatTurn, CreateFromTextRequest},
    orchestrator::AnalysisOutcome,
    pdf_text::extract_report_text_blocking,
    session::{ReportSessions, SessionSnapshot},
};

/// Upper bound for uploaded PDF bodies
const MAX_UPLOAD_BYTES: usize = 20 * 1024 * 1024;

type ApiResult<T> = std::result::Result<Json<T>, (StatusCode, Json<Value>)>;
type ApiError = (StatusCode, Json<Value>);

fn bad_request_error(message: &str) -> ApiError {
    (StatusCode::BAD_REQUEST, Json(json!({ "error": message })))
}

fn not_found_error(message: &str, id: &str) -> ApiError {
    (
        StatusCode::NOT_FOUND,
        Json(json!({
            "error": message,
            "session_id": id
        })),
    )
}

fn error_with_details(status: StatusCode, message: &str, details: &str) -> ApiError {
    (
        status,
        Json(json!({
            "error": message,
            "details": details
        })),
    )
}

/// Map a domain error to a status code; `context` names the failed operation
fn api_error(e: ReportError, context: &str) -> ApiError {
    match &e {
        ReportError::SessionNotFound(id) => not_found_error("Session not found", id),
        ReportError::AnalysisMissing(_) => {
            error_with_details(StatusCode::CONFLICT, context, &e.to_string())
        }
        ReportError::Pdf(_) => {
            error_with_details(StatusCode::UNPROCESSABLE_ENTITY, context, &e.to_string())
        }
        ReportError::Http(_)
        | ReportError::Upstream { .. }
        | ReportError::InvalidModelResponse(_)
        | ReportError::MissingCredential => {
            error!("{}: {}", context, e);
            error_with_details(StatusCode::BAD_GATEWAY, context, &e.to_string())
        }
        ReportError::Config(_) | ReportError::Workflow(_) => {
            error!("{}: {}", context, e);
            error_with_details(StatusCode::INTERNAL_SERVER_ERROR, context, &e.to_string())
        }
    }
}

/// Tag every request with a correlation id and run it inside a span carrying it
async fn correlation_id_middleware(
    mut request: Request<axum::body::Body>,
    next: Next,
) -> axum::response::Response {
    let correlation_id = Uuid::new_v4().to_string();

    if let Ok(value) = HeaderValue::from_str(&correlation_id) {
        request.headers_mut().insert("x-correlation-id", value);
    }

    let span = tracing::info_span!("http_request", correlation_id = %correlation_id);
    next.run(request).instrument(span).await
}

#[derive(Clone)]
pub struct AppState {
    pub sessions: ReportSessions,
}

pub fn create_app(config: &ServiceConfig) -> Result<Router> {
    let model: Arc<dyn LanguageModel> = Arc::new(OpenRouterModel::from_config(config)?);
    let storage: Arc<dyn SessionStorage> = Arc::new(InMemorySessionStorage::new());
    Ok(build_router(AppState {
        sessions: ReportSessions::new(model, config, storage),
    }))
}

pub fn build_router(app_state: AppState) -> Router {
    Router::new()
        .route("/", get(root))
        .route("/health", get(health_check))
        .route("/reports", post(upload_report))
        .route("/reports/text", post(create_from_text))
        .route(
            "/reports/{session_id}",
            get(get_session_status).delete(delete_session),
        )
        .route("/reports/{session_id}/analyze", post(analyze_report))
        .route(
            "/reports/{session_id}/chat",
            post(ask_question)
                .get(get_chat_history)
                .delete(clear_chat_history),
        )
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
        .layer(from_fn(correlation_id_middleware))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(app_state)
}

async fn root() -> Json<Value> {
    Json(json!({
        "service": "Blood Report Analysis Service",
        "version": env!("CARGO_PKG_VERSION"),
        "description": "Blood test report analysis with abnormal values, potential health issues, lifestyle advice and follow-up chat",
        "endpoints": {
            "POST /reports": "Upload a PDF report (raw body) and start a session",
            "POST /reports/text": "Start a session from already extracted text",
            "GET /reports/{session_id}": "Get session state and results",
            "DELETE /reports/{session_id}": "Delete a session",
            "POST /reports/{session_id}/analyze": "Run the three step analysis",
            "POST /reports/{session_id}/chat": "Ask a follow-up question",
            "GET /reports/{session_id}/chat": "Get chat history",
            "DELETE /reports/{session_id}/chat": "Clear chat history",
            "GET /health": "Health check"
        },
        "disclaimer": "Educational use only. Always consult a healthcare professional for medical advice."
    }))
}

async fn health_check() -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339()
    }))
}

async fn upload_report(State(state): State<AppState>, body: Bytes) -> ApiResult<Value> {
    if body.is_empty() {
        return Err(bad_request_error("PDF body is required"));
    }
    info!("Received report upload of {} bytes", body.len());

    let report = extract_report_text_blocking(body.to_vec())
        .await
        .map_err(|e| api_error(e, "Failed to extract text from PDF"))?;

    if report.text.trim().is_empty() {
        warn!("No text extracted from {} page report", report.page_count);
    }

    let session_id = state
        .sessions
        .create(report.text.clone())
        .await
        .map_err(|e| api_error(e, "Failed to create report session"))?;

    Ok(Json(json!({
        "session_id": session_id,
        "page_count": report.page_count,
        "extracted_text": report.text
    })))
}

async fn create_from_text(
    State(state): State<AppState>,
    Json(request): Json<CreateFromTextRequest>,
) -> ApiResult<Value> {
    if request.text.trim().is_empty() {
        return Err(bad_request_error("Report text is required"));
    }

    let session_id = state
        .sessions
        .create(request.text)
        .await
        .map_err(|e| api_error(e, "Failed to create report session"))?;

    Ok(Json(json!({ "session_id": session_id })))
}

async fn analyze_report(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> ApiResult<AnalysisOutcome> {
    info!("Running analysis for session: {}", session_id);

    let outcome = state
        .sessions
        .analyze(&session_id)
        .await
        .map_err(|e| api_error(e, "Failed to analyze report"))?;

    Ok(Json(outcome))
}

async fn get_session_status(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> ApiResult<SessionSnapshot> {
    let snapshot = state
        .sessions
        .snapshot(&session_id)
        .await
        .map_err(|e| api_error(e, "Failed to load session"))?;

    Ok(Json(snapshot))
}

async fn delete_session(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> ApiResult<Value> {
    state
        .sessions
        .delete(&session_id)
        .await
        .map_err(|e| api_error(e, "Failed to delete session"))?;

    Ok(Json(json!({ "session_id": session_id, "status": "deleted" })))
}

async fn ask_question(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    Json(request): Json<ChatRequest>,
) -> ApiResult<Value> {
    if request.question.trim().is_empty() {
        return Err(bad_request_error("Question cannot be empty"));
    }

    let answer = state
        .sessions
        .ask(&session_id, &request.question)
        .await
        .map_err(|e| api_error(e, "Failed to answer"))?;

    let history = state
        .sessions
        .chat_history(&session_id)
        .await
        .map_err(|e| api_error(e, "Failed to load chat history"))?;

    Ok(Json(json!({
        "answer": answer,
        "history": history
    })))
}

async fn get_chat_history(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> ApiResult<Vec<ChatTurn>> {
    let history = state
        .sessions
        .chat_history(&session_id)
        .await
        .map_err(|e| api_error(e, "Failed to load chat history"))?;

    Ok(Json(history))
}

async fn clear_chat_history(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> ApiResult<Value> {
    state
        .sessions
        .clear_chat_history(&session_id)
        .await
        .map_err(|e| api_error(e, "Failed to clear chat history"))?;

    Ok(Json(json!({ "session_id": session_id, "status": "cleared" })))
}
