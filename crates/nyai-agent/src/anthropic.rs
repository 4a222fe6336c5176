use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use nyai_core::flow::{FlowBackend, FlowRequest};
use reqwest::Client;
use serde_json::Value;
use tracing::{info, warn};

const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";
const ANTHROPIC_VERSION: &str = "2023-06-01";
const MAX_TOKENS: u32 = 4096;

/// Calls the Anthropic messages API.
pub struct AnthropicBackend {
    pub base_url: String,
    pub api_key: String,
    pub model: String,
    pub timeout_secs: u64,
}

impl AnthropicBackend {
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.into(),
            api_key: api_key.into(),
            model: model.into(),
            timeout_secs: 120,
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn with_timeout(mut self, secs: u64) -> Self {
        self.timeout_secs = secs;
        self
    }

    fn client(&self) -> Result<Client> {
        Ok(Client::builder()
            .timeout(std::time::Duration::from_secs(self.timeout_secs))
            .build()?)
    }
}

/// Concatenated text blocks of a messages API response.
fn response_text(resp: &Value) -> Option<String> {
    let blocks = resp["content"].as_array()?;
    let text: String = blocks
        .iter()
        .filter(|b| b["type"].as_str() == Some("text"))
        .filter_map(|b| b["text"].as_str())
        .collect();
    (!text.is_empty()).then_some(text)
}

#[async_trait]
impl FlowBackend for AnthropicBackend {
    async fn complete(&self, request: &FlowRequest) -> Result<String> {
        let mut body = serde_json::json!({
            "model": self.model,
            "max_tokens": MAX_TOKENS,
            "messages": [{"role": "user", "content": request.prompt}]
        });
        if !request.system_prompt.is_empty() {
            body["system"] = Value::String(request.system_prompt.clone());
        }

        info!(flow = %request.kind, model = %self.model, "calling anthropic messages API");

        let url = format!("{}/v1/messages", self.base_url.trim_end_matches('/'));
        let response = self
            .client()?
            .post(&url)
            .header("content-type", "application/json")
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&body)
            .send()
            .await
            .context("anthropic request failed")?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(flow = %request.kind, status = %status, "anthropic returned non-200: {}", body);
            bail!("anthropic error {status}: {body}");
        }

        let resp: Value = response
            .json()
            .await
            .context("failed to parse anthropic response")?;
        let text = response_text(&resp).ok_or_else(|| anyhow!("anthropic response had no text content"))?;

        info!(flow = %request.kind, output_len = text.len(), "anthropic response received");
        Ok(text)
    }

    fn model(&self) -> &str {
        &self.model
    }
}
