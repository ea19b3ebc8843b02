use serde::{Deserialize, Deserializer, Serialize, de::DeserializeOwned};
use serde_json::Value;
use std::fmt;

/// Prefix of the display text for a model reply that was not valid JSON
pub const UNPARSED_SENTINEL: &str = "Error: Could not parse JSON response.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Level {
    #[serde(alias = "high", alias = "HIGH")]
    High,
    #[serde(alias = "medium", alias = "MEDIUM")]
    Medium,
    #[serde(alias = "low", alias = "LOW")]
    Low,
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Level::High => "High",
            Level::Medium => "Medium",
            Level::Low => "Low",
        };
        f.write_str(label)
    }
}

/// Text field that also accepts numbers and booleans (`10.2`) and `null` (`""`)
fn lenient_string<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    Ok(match Value::deserialize(deserializer)? {
        Value::String(text) => text,
        Value::Null => String::new(),
        other => other.to_string(),
    })
}

/// List of text that also accepts a single scalar or `null`
fn lenient_strings<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<String>, D::Error> {
    let scalar = |value: Value| match value {
        Value::String(text) => text,
        other => other.to_string(),
    };
    Ok(match Value::deserialize(deserializer)? {
        Value::Null => Vec::new(),
        Value::Array(items) => items
            .into_iter()
            .filter(|item| !item.is_null())
            .map(scalar)
            .collect(),
        other => vec![scalar(other)],
    })
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AbnormalValue {
    #[serde(deserialize_with = "lenient_string")]
    pub parameter: String,
    #[serde(deserialize_with = "lenient_string")]
    pub value: String,
    #[serde(deserialize_with = "lenient_string", default)]
    pub reference_range: String,
    #[serde(deserialize_with = "lenient_string", default)]
    pub interpretation: String,
}

/// Output of the blood test analyzer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BloodTestAnalysis {
    #[serde(deserialize_with = "lenient_string", default)]
    pub summary: String,
    pub abnormal_values: Vec<AbnormalValue>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthIssue {
    #[serde(deserialize_with = "lenient_string")]
    pub issue: String,
    #[serde(deserialize_with = "lenient_strings", default)]
    pub related_parameters: Vec<String>,
    pub confidence: Level,
    #[serde(deserialize_with = "lenient_string", default)]
    pub explanation: String,
}

/// Output of the health issue identifier
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthIssueReport {
    pub potential_health_issues: Vec<HealthIssue>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LifestyleRecommendation {
    #[serde(deserialize_with = "lenient_string")]
    pub category: String,
    #[serde(deserialize_with = "lenient_string")]
    pub recommendation: String,
    #[serde(deserialize_with = "lenient_strings", default)]
    pub related_issues: Vec<String>,
    pub importance: Level,
}

/// Output of the lifestyle advisor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LifestylePlan {
    pub lifestyle_recommendations: Vec<LifestyleRecommendation>,
}

/// Result of one tool step.
///
/// `Parsed` holds the typed payload. `Untyped` holds a reply that is valid
/// JSON but does not fit the payload shape, so it is still passed on as JSON.
/// `Unparsed` holds the cleaned reply when it is not JSON at all.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", content = "data", rename_all = "snake_case")]
pub enum StageOutput<T> {
    Parsed(T),
    Untyped(Value),
    Unparsed(String),
}

impl<T: Serialize + DeserializeOwned> StageOutput<T> {
    /// Decode already-cleaned model text into the payload type
    pub fn from_cleaned(cleaned: &str) -> Self {
        let Ok(value) = serde_json::from_str::<Value>(cleaned) else {
            return StageOutput::Unparsed(cleaned.to_string());
        };
        match T::deserialize(&value) {
            Ok(payload) => StageOutput::Parsed(payload),
            Err(_) => StageOutput::Untyped(value),
        }
    }

    pub fn parsed(&self) -> Option<&T> {
        match self {
            StageOutput::Parsed(payload) => Some(payload),
            StageOutput::Untyped(_) | StageOutput::Unparsed(_) => None,
        }
    }

    pub fn is_parsed(&self) -> bool {
        matches!(self, StageOutput::Parsed(_))
    }

    /// The reply was valid JSON, typed or not
    pub fn is_json(&self) -> bool {
        !matches!(self, StageOutput::Unparsed(_))
    }

    /// Pretty JSON of the payload, or the sentinel line followed by the raw text.
    ///
    /// This is also the text handed to the next tool as its input.
    pub fn display_text(&self) -> String {
        let pretty = match self {
            StageOutput::Parsed(payload) => serde_json::to_string_pretty(payload),
            StageOutput::Untyped(value) => serde_json::to_string_pretty(value),
            StageOutput::Unparsed(raw) => return format!("{UNPARSED_SENTINEL} Raw response: {raw}"),
        };
        pretty.unwrap_or_else(|e| format!("{UNPARSED_SENTINEL} Raw response: {e}"))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    User,
    Ai,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatTurn {
    pub role: ChatRole,
    pub message: String,
}

impl ChatTurn {
    pub fn user(message: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            message: message.into(),
        }
    }

    pub fn ai(message: impl Into<String>) -> Self {
        Self {
            role: ChatRole::Ai,
            message: message.into(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CreateFromTextRequest {
    pub text: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ChatRequest {
    pub question: String,
}
