use std::fmt;

use anyhow::Result;
use async_trait::async_trait;
use serde::Serialize;

/// The named prompt flows sent to the language model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FlowKind {
    IdentifyLaws,
    RetrievePrecedents,
    GenerateChecklist,
    SummarizeDocument,
    EnhanceCitation,
    ParseStructuredLegalInfo,
}

impl FlowKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::IdentifyLaws => "identify_laws",
            Self::RetrievePrecedents => "retrieve_precedents",
            Self::GenerateChecklist => "generate_checklist",
            Self::SummarizeDocument => "summarize_document",
            Self::EnhanceCitation => "enhance_citation",
            Self::ParseStructuredLegalInfo => "parse_structured_legal_info",
        }
    }
}

impl fmt::Display for FlowKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One rendered prompt, ready for a backend.
#[derive(Debug, Clone)]
pub struct FlowRequest {
    pub kind: FlowKind,
    pub system_prompt: String,
    pub prompt: String,
}

#[async_trait]
pub trait FlowBackend: Send + Sync {
    /// Run one prompt and return the model's raw text completion.
    async fn complete(&self, request: &FlowRequest) -> Result<String>;

    /// Model identifier, for status reporting.
    fn model(&self) -> &str;
}
