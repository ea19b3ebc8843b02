use std::time::Duration;

use crate::error::{ReportError, Result};

pub const DEFAULT_BASE_URL: &str = "https://openrouter.ai/api/v1";
pub const DEFAULT_ANALYSIS_MODEL: &str = "google/gemini-2.0-flash-thinking-exp:free";
pub const DEFAULT_CHAT_MODEL: &str = "mistralai/mixtral-8x7b-instruct";
pub const DEFAULT_MAX_AGENT_STEPS: usize = 5;
pub const DEFAULT_PORT: u16 = 3000;
const MAX_TEMPERATURE: f32 = 2.0;

/// Model id plus sampling settings for one kind of call
#[derive(Debug, Clone, PartialEq)]
pub struct ModelSettings {
    pub model: String,
    pub temperature: f32,
}

impl ModelSettings {
    pub fn new(model: impl Into<String>, temperature: f32) -> Self {
        Self {
            model: model.into(),
            temperature,
        }
    }
}

/// Configuration for the report service, read from the environment
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub api_key: String,
    pub base_url: String,
    /// Used by the three analysis tools
    pub analysis: ModelSettings,
    /// Used by the follow-up chat
    pub chat: ModelSettings,
    pub max_agent_steps: usize,
    pub request_timeout: Option<Duration>,
    pub port: u16,
}

impl ServiceConfig {
    /// Config with defaults for everything but the credential
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: DEFAULT_BASE_URL.to_string(),
            analysis: ModelSettings::new(DEFAULT_ANALYSIS_MODEL, 0.3),
            chat: ModelSettings::new(DEFAULT_CHAT_MODEL, 0.5),
            max_agent_steps: DEFAULT_MAX_AGENT_STEPS,
            request_timeout: None,
            port: DEFAULT_PORT,
        }
    }

    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build the config from any key lookup; `from_env` passes `std::env::var`.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let api_key = lookup("OPENROUTER_API_KEY")
            .filter(|key| !key.trim().is_empty())
            .ok_or(ReportError::MissingCredential)?;

        let mut config = Self::new(api_key);

        if let Some(base_url) = lookup("OPENROUTER_BASE_URL") {
            config.base_url = base_url.trim_end_matches('/').to_string();
        }
        if let Some(model) = lookup("ANALYSIS_MODEL") {
            config.analysis.model = model;
        }
        if let Some(model) = lookup("CHAT_MODEL") {
            config.chat.model = model;
        }
        if let Some(value) = lookup("ANALYSIS_TEMPERATURE") {
            config.analysis.temperature = parse_temperature("ANALYSIS_TEMPERATURE", &value)?;
        }
        if let Some(value) = lookup("CHAT_TEMPERATURE") {
            config.chat.temperature = parse_temperature("CHAT_TEMPERATURE", &value)?;
        }
        if let Some(value) = lookup("MAX_AGENT_STEPS") {
            config.max_agent_steps = parse_var("MAX_AGENT_STEPS", &value)?;
        }
        if let Some(value) = lookup("REQUEST_TIMEOUT_SECS") {
            let secs: u64 = parse_var("REQUEST_TIMEOUT_SECS", &value)?;
            config.request_timeout = Some(Duration::from_secs(secs));
        }
        if let Some(value) = lookup("PORT") {
            config.port = parse_var("PORT", &value)?;
        }

        Ok(config)
    }
}

fn parse_var<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| ReportError::Config(format!("{key} has invalid value '{value}'")))
}

/// Sampling temperature accepted by OpenAI-compatible APIs: finite, 0.0 to 2.0
fn parse_temperature(key: &str, value: &str) -> Result<f32> {
    let temperature: f32 = parse_var(key, value)?;
    if !(0.0..=MAX_TEMPERATURE).contains(&temperature) {
        return Err(ReportError::Config(format!(
            "{key} must be between 0 and {MAX_TEMPERATURE}, got '{value}'"
        )));
    }
    Ok(temperature)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn missing_key_is_reported() {
        let err = ServiceConfig::from_lookup(lookup_from(&[])).unwrap_err();
        assert!(matches!(err, ReportError::MissingCredential));

        let err = ServiceConfig::from_lookup(lookup_from(&[("OPENROUTER_API_KEY", "  ")]))
            .unwrap_err();
        assert!(matches!(err, ReportError::MissingCredential));
    }

    #[test]
    fn defaults_match_hosted_setup() {
        let config =
            ServiceConfig::from_lookup(lookup_from(&[("OPENROUTER_API_KEY", "sk-test")])).unwrap();

        assert_eq!(config.base_url, DEFAULT_BASE_URL);
        assert_eq!(config.analysis, ModelSettings::new(DEFAULT_ANALYSIS_MODEL, 0.3));
        assert_eq!(config.chat, ModelSettings::new(DEFAULT_CHAT_MODEL, 0.5));
        assert_eq!(config.max_agent_steps, 5);
        assert!(config.request_timeout.is_none());
        assert_eq!(config.port, 3000);
    }

    #[test]
    fn overrides_are_applied() {
        let config = ServiceConfig::from_lookup(lookup_from(&[
            ("OPENROUTER_API_KEY", "sk-test"),
            ("OPENROUTER_BASE_URL", "http://localhost:8080/v1/"),
            ("CHAT_MODEL", "openai/gpt-4.1-mini"),
            ("CHAT_TEMPERATURE", "0.1"),
            ("MAX_AGENT_STEPS", "8"),
            ("REQUEST_TIMEOUT_SECS", "30"),
        ]))
        .unwrap();

        assert_eq!(config.base_url, "http://localhost:8080/v1");
        assert_eq!(config.chat.model, "openai/gpt-4.1-mini");
        assert_eq!(config.chat.temperature, 0.1);
        assert_eq!(config.max_agent_steps, 8);
        assert_eq!(config.request_timeout, Some(Duration::from_secs(30)));
    }

    #[test]
    fn bad_number_is_config_error() {
        let err = ServiceConfig::from_lookup(lookup_from(&[
            ("OPENROUTER_API_KEY", "sk-test"),
            ("PORT", "eighty"),
        ]))
        .unwrap_err();

        assert!(matches!(err, ReportError::Config(msg) if msg.contains("PORT")));
    }

    #[test]
    fn temperature_out_of_range_is_rejected() {
        for bad in ["-0.1", "2.5", "NaN", "inf"] {
            let err = ServiceConfig::from_lookup(lookup_from(&[
                ("OPENROUTER_API_KEY", "sk-test"),
                ("ANALYSIS_TEMPERATURE", bad),
            ]))
            .unwrap_err();
            assert!(
                matches!(&err, ReportError::Config(msg) if msg.contains("ANALYSIS_TEMPERATURE")),
                "{bad}: {err}"
            );
        }

        let config = ServiceConfig::from_lookup(lookup_from(&[
            ("OPENROUTER_API_KEY", "sk-test"),
            ("CHAT_TEMPERATURE", "0"),
        ]))
        .unwrap();
        assert_eq!(config.chat.temperature, 0.0);
    }
}
