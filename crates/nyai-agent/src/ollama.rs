use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use nyai_core::flow::{FlowBackend, FlowRequest};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

/// Calls a locally-hosted Ollama model via its native chat API.
///
/// Keeps case details on the local machine. Every flow answers in JSON, so
/// completions are constrained with `format: "json"`.
pub struct OllamaBackend {
    pub base_url: String,
    pub model: String,
    pub timeout_secs: u64,
}

impl OllamaBackend {
    pub fn new(base_url: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            model: model.into(),
            timeout_secs: 120,
        }
    }

    pub fn with_timeout(mut self, secs: u64) -> Self {
        self.timeout_secs = secs;
        self
    }
}

#[derive(Serialize)]
struct OllamaMessage {
    role: String,
    content: String,
}

#[derive(Serialize)]
struct OllamaChatRequest {
    model: String,
    messages: Vec<OllamaMessage>,
    stream: bool,
    format: &'static str,
}

#[derive(Deserialize)]
struct OllamaChatResponse {
    message: OllamaResponseMessage,
}

#[derive(Deserialize)]
struct OllamaResponseMessage {
    content: String,
}

#[async_trait]
impl FlowBackend for OllamaBackend {
    async fn complete(&self, request: &FlowRequest) -> Result<String> {
        let mut messages = Vec::new();
        if !request.system_prompt.is_empty() {
            messages.push(OllamaMessage {
                role: "system".into(),
                content: request.system_prompt.clone(),
            });
        }
        messages.push(OllamaMessage {
            role: "user".into(),
            content: request.prompt.clone(),
        });

        let request_body = OllamaChatRequest {
            model: self.model.clone(),
            messages,
            stream: false,
            format: "json",
        };

        info!(
            flow = %request.kind,
            model = %self.model,
            base_url = %self.base_url,
            "calling ollama chat API"
        );

        let url = format!("{}/api/chat", self.base_url.trim_end_matches('/'));

        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(self.timeout_secs))
            .build()?;

        let response = match client.post(&url).json(&request_body).send().await {
            Ok(r) => r,
            Err(e) if e.is_timeout() => {
                warn!(
                    flow = %request.kind,
                    timeout_secs = self.timeout_secs,
                    "ollama request timed out"
                );
                bail!("ollama request timed out after {}s", self.timeout_secs);
            },
            Err(e) => {
                warn!(flow = %request.kind, "ollama request failed: {}", e);
                return Err(e).context("ollama request failed");
            },
        };

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(
                flow = %request.kind,
                status = %status,
                "ollama returned non-200: {}",
                body
            );
            bail!("ollama error {status}: {body}");
        }

        let parsed: OllamaChatResponse = response
            .json()
            .await
            .context("failed to parse ollama response")?;

        let output = parsed.message.content;

        info!(
            flow = %request.kind,
            output_len = output.len(),
            "ollama response received"
        );

        Ok(output)
    }

    fn model(&self) -> &str {
        &self.model
    }
}
