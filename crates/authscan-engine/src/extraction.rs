//! Extraction model client
//!
//! The model receives redacted authorization context and answers with free
//! text that should contain policy JSON. Every way a call can go wrong is
//! reported as one [`ExtractionFailed`] so the pipeline can count it against
//! the unit and move on.

use std::time::Duration;

use async_trait::async_trait;
use authscan_core::{AuthorizationDetail, Language};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use thiserror::Error;
use tracing::debug;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("extraction failed: {reason}")]
pub struct ExtractionFailed {
    pub reason: String,
}

impl ExtractionFailed {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

#[async_trait]
pub trait ExtractionModel: Send + Sync {
    async fn complete(
        &self,
        prompt: &str,
        max_tokens: u32,
        temperature: f32,
    ) -> Result<String, ExtractionFailed>;
}

/// Connection settings for [`HttpExtractionModel`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractionSettings {
    /// Chat-completions style endpoint
    pub endpoint: String,
    pub model: String,
    #[serde(skip)]
    pub api_key: Option<String>,
    pub timeout: Duration,
}

impl Default for ExtractionSettings {
    fn default() -> Self {
        Self {
            endpoint: "http://localhost:11434/v1/chat/completions".to_string(),
            model: "policy-extractor".to_string(),
            api_key: None,
            timeout: Duration::from_secs(120),
        }
    }
}

impl ExtractionSettings {
    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Extraction over an HTTP chat-completions API.
#[derive(Debug)]
pub struct HttpExtractionModel {
    settings: ExtractionSettings,
    client: reqwest::Client,
}

impl HttpExtractionModel {
    pub fn new(settings: ExtractionSettings) -> Result<Self, ExtractionFailed> {
        let client = reqwest::Client::builder()
            .timeout(settings.timeout)
            .build()
            .map_err(|e| ExtractionFailed::new(format!("failed to create HTTP client: {e}")))?;
        Ok(Self { settings, client })
    }
}

#[async_trait]
impl ExtractionModel for HttpExtractionModel {
    async fn complete(
        &self,
        prompt: &str,
        max_tokens: u32,
        temperature: f32,
    ) -> Result<String, ExtractionFailed> {
        let body = json!({
            "model": self.settings.model,
            "max_tokens": max_tokens,
            "temperature": temperature,
            "messages": [{ "role": "user", "content": prompt }],
        });

        let mut request = self.client.post(&self.settings.endpoint).json(&body);
        if let Some(key) = &self.settings.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                ExtractionFailed::new(format!("timed out after {:?}", self.settings.timeout))
            } else {
                ExtractionFailed::new(format!("transport error: {e}"))
            }
        })?;

        let status = response.status();
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(ExtractionFailed::new("rate limited"));
        }
        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
            return Err(ExtractionFailed::new(format!("not authorized ({status})")));
        }
        if !status.is_success() {
            return Err(ExtractionFailed::new(format!("API error: {status}")));
        }

        let value: Value = response
            .json()
            .await
            .map_err(|e| ExtractionFailed::new(format!("unreadable response body: {e}")))?;
        let text = completion_text(&value)
            .ok_or_else(|| ExtractionFailed::new("response carried no completion text"))?;
        debug!(chars = text.len(), "extraction model answered");
        Ok(text)
    }
}

/// Completion text from a chat-completions or messages style body.
fn completion_text(value: &Value) -> Option<String> {
    if let Some(content) = value.pointer("/choices/0/message/content").and_then(Value::as_str) {
        return Some(content.to_string());
    }
    if let Some(text) = value.pointer("/choices/0/text").and_then(Value::as_str) {
        return Some(text.to_string());
    }
    let blocks = value.get("content")?.as_array()?;
    let text: String = blocks
        .iter()
        .filter_map(|b| b.get("text").and_then(Value::as_str))
        .collect();
    (!text.is_empty()).then_some(text)
}

/// Render the structural details of one unit into the context block that is
/// redacted and sent to the model.
pub fn render_context(path: &str, details: &[AuthorizationDetail]) -> String {
    let mut out = String::new();
    for detail in details {
        out.push_str(&format!(
            "--- {path}:{}-{} [{} / {} / {}]\n",
            detail.line_start,
            detail.line_end,
            detail.construct,
            detail.category,
            detail.pattern,
        ));
        out.push_str(&detail.context);
        if !detail.context.ends_with('\n') {
            out.push('\n');
        }
    }
    out
}

pub fn build_prompt(path: &str, language: Language, context: &str) -> String {
    format!(
        "Extract the authorization policies enforced by the following {language} code from {path}.\n\
         Answer with JSON: {{\"policies\": [{{\"subject\": ..., \"resource\": ..., \"action\": ..., \
         \"conditions\": ..., \"description\": ..., \"evidence\": [{{\"file_path\": ..., \
         \"line_start\": ..., \"line_end\": ..., \"snippet\": ...}}]}}]}}\n\n{context}"
    )
}
