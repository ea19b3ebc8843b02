use tracing::info;

use crate::config::ModelSettings;
use crate::error::Result;
use crate::llm::{CompletionRequest, LanguageModel};

pub const CHAT_SYSTEM_PROMPT: &str = "You are a health assistant AI. A user has uploaded their pathology report and received analysis and lifestyle advice.
Use the context from their report and previous analyses to answer their questions precisely and responsibly.

Important guidelines:
- Be clear and concise in your responses
- Avoid speculative medical advice
- Always remind them to consult their healthcare provider for professional medical advice
- When referring to data, cite specific values from their report
- Focus on providing educational information rather than diagnosis";

/// User message sent with every question: analysis first, then the report text
pub fn build_chat_context(question: &str, context: &str, report_analysis: &str) -> String {
    format!(
        "Blood Report Analysis:\n{report_analysis}\n\nAdditional Context:\n{context}\n\nUser Question: {question}"
    )
}

/// Answer one follow-up question. Earlier chat turns are not sent.
pub async fn personalized_chat(
    model: &dyn LanguageModel,
    settings: &ModelSettings,
    question: &str,
    context: &str,
    report_analysis: &str,
) -> Result<String> {
    info!(question_chars = question.len(), "Answering follow-up question");

    let request = CompletionRequest::new(
        settings,
        build_chat_context(question, context, report_analysis),
    )
    .with_system(CHAT_SYSTEM_PROMPT);

    let reply = model.complete(request).await?;
    Ok(reply.trim().to_string())
}
