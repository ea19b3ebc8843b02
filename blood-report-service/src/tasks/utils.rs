use regex::Regex;
use serde::{Serialize, de::DeserializeOwned};
use std::sync::LazyLock;
use tracing::{debug, info, warn};

use crate::config::ModelSettings;
use crate::error::Result;
use crate::llm::{CompletionRequest, LanguageModel};
use crate::models::StageOutput;

static FENCED_BLOCK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"```(?:json)?\s*([\s\S]*?)```").expect("fenced block pattern is valid")
});

/// Contents of the first fenced block, if any
pub fn fenced_block(text: &str) -> Option<&str> {
    FENCED_BLOCK
        .captures(text)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().trim())
}

/// Strip markdown code fencing from a model reply; falls back to the whole
/// trimmed reply when there is no fence.
pub fn clean_json_response(raw_response: &str) -> String {
    fenced_block(raw_response)
        .unwrap_or_else(|| raw_response.trim())
        .to_string()
}

/// One model call whose reply should decode into `T`.
///
/// Transport failures are errors. Valid JSON in another shape becomes
/// [`StageOutput::Untyped`]; anything else becomes [`StageOutput::Unparsed`].
pub async fn run_json_tool<T>(
    model: &dyn LanguageModel,
    settings: &ModelSettings,
    tool: &str,
    prompt: String,
) -> Result<StageOutput<T>>
where
    T: Serialize + DeserializeOwned,
{
    let raw = model.complete(CompletionRequest::new(settings, prompt)).await?;
    debug!(tool = %tool, raw_response = %raw, "Tool raw response");

    let cleaned = clean_json_response(&raw);
    let output = StageOutput::<T>::from_cleaned(&cleaned);

    match &output {
        StageOutput::Parsed(_) => info!(tool = %tool, "Tool response parsed"),
        StageOutput::Untyped(_) => {
            warn!(tool = %tool, "Tool response is JSON in an unexpected shape, keeping it as-is")
        }
        StageOutput::Unparsed(_) => {
            warn!(tool = %tool, "Could not parse tool response as JSON, keeping raw text")
        }
    }

    Ok(output)
}
