use async_trait::async_trait;
use nyai_core::{retrieval::Retriever, types::RetrievalResult};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{info, warn};

const DEFAULT_BASE_URL: &str = "https://api.cloudflare.com/client/v4";

/// Cloudflare AutoRAG `ai-search` client, the default knowledge source.
pub struct AutoRagClient {
    pub base_url: String,
    pub account_id: String,
    pub rag_name: String,
    pub api_token: String,
    pub timeout_secs: u64,
}

#[derive(Deserialize)]
struct AiSearchResponse {
    #[serde(default)]
    success: bool,
    #[serde(default)]
    result: Option<AiSearchResult>,
    #[serde(default)]
    errors: Vec<Value>,
}

#[derive(Deserialize)]
struct AiSearchResult {
    #[serde(default)]
    response: String,
}

impl AutoRagClient {
    pub fn new(
        account_id: impl Into<String>,
        rag_name: impl Into<String>,
        api_token: impl Into<String>,
    ) -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.into(),
            account_id: account_id.into(),
            rag_name: rag_name.into(),
            api_token: api_token.into(),
            timeout_secs: 60,
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

    fn missing_settings(&self) -> Vec<&'static str> {
        [
            ("CLOUDFLARE_ACCOUNT_ID", &self.account_id),
            ("CLOUDFLARE_AUTORAG_NAME", &self.rag_name),
            ("CLOUDFLARE_API_TOKEN", &self.api_token),
        ]
        .into_iter()
        .filter(|(_, v)| v.trim().is_empty())
        .map(|(k, _)| k)
        .collect()
    }

    fn search_url(&self) -> String {
        format!(
            "{}/accounts/{}/autorag/rags/{}/ai-search",
            self.base_url.trim_end_matches('/'),
            self.account_id,
            self.rag_name
        )
    }
}

fn error(message: impl Into<String>, details: Option<Value>) -> RetrievalResult {
    RetrievalResult::Error {
        message: message.into(),
        details,
    }
}

#[async_trait]
impl Retriever for AutoRagClient {
    async fn retrieve(&self, query: &str) -> RetrievalResult {
        let missing = self.missing_settings();
        if !missing.is_empty() {
            warn!(?missing, "autorag is not configured");
            return error(
                "Cloudflare AutoRAG is not configured.",
                Some(json!({ "missing": missing })),
            );
        }

        let client = match reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(self.timeout_secs))
            .build()
        {
            Ok(c) => c,
            Err(e) => return error(format!("Failed to build HTTP client: {e}"), None),
        };

        info!(rag = %self.rag_name, query_len = query.len(), "querying autorag");

        let response = match client
            .post(self.search_url())
            .bearer_auth(&self.api_token)
            .json(&json!({ "query": query }))
            .send()
            .await
        {
            Ok(r) => r,
            Err(e) => {
                warn!("autorag request failed: {e}");
                return error(format!("Failed to reach Cloudflare AutoRAG: {e}"), None);
            }
        };

        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        if !status.is_success() {
            warn!(status = %status, "autorag returned non-200: {}", body);
            let details = serde_json::from_str::<Value>(&body)
                .unwrap_or(Value::String(body));
            return error(
                format!("Cloudflare AutoRAG request failed with status {status}."),
                Some(details),
            );
        }

        let parsed: AiSearchResponse = match serde_json::from_str(&body) {
            Ok(p) => p,
            Err(e) => {
                warn!("failed to parse autorag response: {e}");
                return error(
                    "Cloudflare AutoRAG returned an unreadable response.",
                    Some(Value::String(body)),
                );
            }
        };

        if !parsed.success {
            let message = parsed
                .errors
                .first()
                .and_then(|e| e["message"].as_str())
                .unwrap_or("Cloudflare AutoRAG reported an error.")
                .to_string();
            return error(message, Some(Value::Array(parsed.errors)));
        }

        let text = parsed.result.map(|r| r.response).unwrap_or_default();
        info!(response_len = text.len(), "autorag response received");
        RetrievalResult::Success {
            raw_text_response: text,
        }
    }
}
