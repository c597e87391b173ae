//! OpenAI-compatible `/chat/completions` provider.
//!
//! Works against any endpoint speaking the OpenAI chat completions format
//! (OpenAI, OpenRouter, vLLM, Ollama's compatibility layer, ...).

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};
use tracing::debug;

use super::{CompletionProvider, PromptContext};
use crate::config::ProviderConfig;
use crate::error::{Result, WayfarerError};

/// Provider for OpenAI-style chat completion endpoints.
pub struct OpenAiCompatProvider {
    api_base: String,
    api_key: Option<String>,
    model: String,
    client: Client,
}

impl std::fmt::Debug for OpenAiCompatProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiCompatProvider")
            .field("api_base", &self.api_base)
            .field("api_key", &self.api_key.as_ref().map(|_| "[REDACTED]"))
            .field("model", &self.model)
            .finish()
    }
}

impl OpenAiCompatProvider {
    pub fn from_config(config: &ProviderConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs.max(1)))
            .build()?;
        Ok(Self {
            api_base: config.api_base.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone().filter(|k| !k.is_empty()),
            model: config.model.clone(),
            client,
        })
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.api_base)
    }

    /// Request body for `context`. A `model` parameter overrides the
    /// configured model.
    pub fn build_request_body(&self, context: &PromptContext) -> Value {
        let mut messages = Vec::with_capacity(context.turns.len() + 1);
        if !context.system_prompt.is_empty() {
            messages.push(json!({ "role": "system", "content": context.system_prompt }));
        }
        if let Some(lang) = context.params.get("language") {
            messages.push(json!({
                "role": "system",
                "content": format!("Reply in language: {lang}"),
            }));
        }
        for turn in &context.turns {
            messages.push(json!({ "role": turn.role.as_str(), "content": turn.text }));
        }
        let model = context.params.get("model").unwrap_or(&self.model);
        json!({ "model": model, "messages": messages })
    }

    /// Pull `choices[0].message.content` out of a response.
    pub fn extract_text(response: &Value) -> Option<String> {
        response["choices"][0]["message"]["content"]
            .as_str()
            .map(String::from)
    }
}

#[async_trait]
impl CompletionProvider for OpenAiCompatProvider {
    async fn complete(&self, context: &PromptContext) -> Result<String> {
        let body = self.build_request_body(context);
        debug!(
            model = %body["model"],
            turns = context.turns.len(),
            "Completion request"
        );

        let mut request = self.client.post(self.endpoint()).json(&body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| WayfarerError::Provider(format!("request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<Value>(&text)
                .ok()
                .and_then(|v| v["error"]["message"].as_str().map(String::from))
                .unwrap_or(text);
            return Err(WayfarerError::Provider(format!(
                "HTTP {}: {}",
                status.as_u16(),
                message
            )));
        }

        let json: Value = response
            .json()
            .await
            .map_err(|e| WayfarerError::Provider(format!("invalid response body: {e}")))?;
        Self::extract_text(&json)
            .ok_or_else(|| WayfarerError::Provider("response had no message content".into()))
    }

    fn name(&self) -> &str {
        "openai-compat"
    }
}
