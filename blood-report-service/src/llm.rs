use async_trait::async_trait;
use reqwest::Client;
use serde_json::{Value, json};
use tracing::{debug, info};

use crate::config::{ModelSettings, ServiceConfig};
use crate::error::{ReportError, Result};

/// One single-turn completion call
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub settings: ModelSettings,
    pub system: Option<String>,
    pub prompt: String,
}

impl CompletionRequest {
    pub fn new(settings: &ModelSettings, prompt: impl Into<String>) -> Self {
        Self {
            settings: settings.clone(),
            system: None,
            prompt: prompt.into(),
        }
    }

    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        self.system = Some(system.into());
        self
    }
}

/// Seam between the pipeline and the hosted model
#[async_trait]
pub trait LanguageModel: Send + Sync {
    /// Returns the reply text as sent by the model, untrimmed
    async fn complete(&self, request: CompletionRequest) -> Result<String>;
}

/// OpenAI-compatible chat completions client, pointed at OpenRouter by default
pub struct OpenRouterModel {
    client: Client,
    base_url: String,
    api_key: String,
}

impl OpenRouterModel {
    pub fn new(api_key: impl Into<String>, base_url: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into(),
            api_key: api_key.into(),
        }
    }

    pub fn from_config(config: &ServiceConfig) -> Result<Self> {
        let mut builder = Client::builder();
        if let Some(timeout) = config.request_timeout {
            builder = builder.timeout(timeout);
        }

        Ok(Self {
            client: builder.build()?,
            base_url: config.base_url.clone(),
            api_key: config.api_key.clone(),
        })
    }
}

#[async_trait]
impl LanguageModel for OpenRouterModel {
    async fn complete(&self, request: CompletionRequest) -> Result<String> {
        if self.api_key.is_empty() {
            return Err(ReportError::MissingCredential);
        }

        let mut messages = Vec::with_capacity(2);
        if let Some(system) = &request.system {
            messages.push(json!({ "role": "system", "content": system }));
        }
        messages.push(json!({ "role": "user", "content": request.prompt }));

        let payload = json!({
            "model": request.settings.model,
            "messages": messages,
            "temperature": request.settings.temperature,
        });

        debug!(model = %request.settings.model, "Calling model API");

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&payload)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ReportError::Upstream {
                status: status.as_u16(),
                body,
            });
        }

        let response_json: Value = response.json().await?;

        let content = response_json["choices"][0]["message"]["content"]
            .as_str()
            .ok_or_else(|| {
                ReportError::InvalidModelResponse(
                    "missing choices[0].message.content".to_string(),
                )
            })?;

        info!(
            model = %request.settings.model,
            chars = content.len(),
            "Model call completed"
        );
        Ok(content.to_string())
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Replays canned replies in order and records every request
    #[derive(Default)]
    pub struct ScriptedModel {
        replies: Mutex<VecDeque<Result<String>>>,
        pub requests: Mutex<Vec<CompletionRequest>>,
    }

    impl ScriptedModel {
        pub fn new<I, S>(replies: I) -> Self
        where
            I: IntoIterator<Item = S>,
            S: Into<String>,
        {
            Self {
                replies: Mutex::new(replies.into_iter().map(|r| Ok(r.into())).collect()),
                requests: Mutex::new(Vec::new()),
            }
        }

        pub fn push_error(&self, error: ReportError) {
            self.replies.lock().unwrap().push_back(Err(error));
        }

        pub fn prompts(&self) -> Vec<String> {
            self.requests
                .lock()
                .unwrap()
                .iter()
                .map(|r| r.prompt.clone())
                .collect()
        }
    }

    #[async_trait]
    impl LanguageModel for ScriptedModel {
        async fn complete(&self, request: CompletionRequest) -> Result<String> {
            self.requests.lock().unwrap().push(request);
            self.replies
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(ReportError::InvalidModelResponse("no scripted reply".into())))
        }
    }
}
