use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use serde::{de::DeserializeOwned, Deserialize};
use tracing::{debug, warn};

use crate::{
    flow::{FlowBackend, FlowKind, FlowRequest},
    types::{
        ChecklistResult, LawsResult, PrecedentsResult, StructuredLegalInfo, SummaryResult,
        SOURCE_CUSTOM_LIBRARY,
    },
};

const SYSTEM_PROMPT: &str = "You are a legal research assistant specialising in Indian law. \
     You answer strictly in JSON matching the schema given in each request. \
     Never invent statutes, cases or citations; when a section cannot be answered \
     reliably, return an empty array for it.";

/// Typed wrappers around the prompt flows. Cheap to clone.
#[derive(Clone)]
pub struct Flows {
    backend: Arc<dyn FlowBackend>,
}

#[derive(Deserialize)]
struct CitationOutput {
    #[serde(default)]
    citation: String,
}

impl Flows {
    pub fn new(backend: Arc<dyn FlowBackend>) -> Self {
        Self { backend }
    }

    pub fn model(&self) -> &str {
        self.backend.model()
    }

    /// Run a flow and decode its JSON output. `Ok(None)` means the model
    /// answered but produced nothing decodable.
    async fn run<T: DeserializeOwned>(&self, kind: FlowKind, prompt: String) -> Result<Option<T>> {
        let request = FlowRequest {
            kind,
            system_prompt: SYSTEM_PROMPT.to_string(),
            prompt,
        };
        debug!(flow = %kind, prompt_len = request.prompt.len(), "running flow");

        let text = self
            .backend
            .complete(&request)
            .await
            .with_context(|| format!("{kind} flow failed"))?;

        let decoded = decode_json(&text);
        if decoded.is_none() {
            warn!(flow = %kind, output_len = text.len(), "flow returned no structured output");
        }
        Ok(decoded)
    }

    async fn run_required<T: DeserializeOwned>(&self, kind: FlowKind, prompt: String) -> Result<T> {
        self.run(kind, prompt)
            .await?
            .ok_or_else(|| anyhow!("{kind} flow returned no structured output"))
    }

    pub async fn identify_laws(&self, query: &str) -> Result<LawsResult> {
        self.run_required(FlowKind::IdentifyLaws, identify_laws_prompt(query))
            .await
    }

    pub async fn retrieve_precedents(
        &self,
        legal_question: &str,
        library_context: Option<&str>,
    ) -> Result<PrecedentsResult> {
        let mut result: PrecedentsResult = self
            .run_required(
                FlowKind::RetrievePrecedents,
                retrieve_precedents_prompt(legal_question, library_context),
            )
            .await?;
        result.source_type = SOURCE_CUSTOM_LIBRARY.to_string();
        Ok(result)
    }

    pub async fn generate_checklist(&self, query: &str, jurisdiction: &str) -> Result<ChecklistResult> {
        self.run_required(
            FlowKind::GenerateChecklist,
            generate_checklist_prompt(query, jurisdiction),
        )
        .await
    }

    pub async fn summarize_document(&self, document_text: &str) -> Result<SummaryResult> {
        self.run_required(
            FlowKind::SummarizeDocument,
            summarize_document_prompt(document_text),
        )
        .await
    }

    /// Best-guess formal citation for a case. `Ok(None)` when the output could
    /// not be decoded; a decoded but blank citation comes back as `Some("")`.
    pub async fn enhance_citation(&self, case_name: &str) -> Result<Option<String>> {
        let output: Option<CitationOutput> = self
            .run(FlowKind::EnhanceCitation, enhance_citation_prompt(case_name))
            .await?;
        Ok(output.map(|o| o.citation.trim().to_string()))
    }

    pub async fn parse_structured_legal_info(&self, raw_text: &str) -> Result<Option<StructuredLegalInfo>> {
        self.run(
            FlowKind::ParseStructuredLegalInfo,
            parse_structured_prompt(raw_text),
        )
        .await
    }
}

// ── Prompts ───────────────────────────────────────────────────────────────

fn identify_laws_prompt(query: &str) -> String {
    format!(
        "Identify the statutes, sections and constitutional articles of Indian law that \
         apply to the following legal query.\n\n\
         Query:\n{query}\n\n\
         Respond with JSON: {{\"laws\": [\"<law, section or article with a short note>\"]}}"
    )
}

fn retrieve_precedents_prompt(legal_question: &str, library_context: Option<&str>) -> String {
    let mut s = String::from(
        "Find past Indian court cases that are relevant to the legal question below. \
         For each case give its name, citation, a brief summary of the case and its \
         relevance, and any notable differences from the question.\n\n",
    );
    if let Some(ctx) = library_context.filter(|c| !c.trim().is_empty()) {
        s.push_str(
            "Prefer cases from the user's custom case library, reproduced here:\n\
             ---\n",
        );
        s.push_str(ctx);
        s.push_str("\n---\n\n");
    }
    s.push_str("Legal question:\n");
    s.push_str(legal_question);
    s.push_str(
        "\n\nRespond with JSON: {\"precedents\": [{\"caseName\": \"\", \"citation\": \"\", \
         \"summary\": \"\", \"differences\": \"<optional>\"}]}",
    );
    s
}

fn generate_checklist_prompt(query: &str, jurisdiction: &str) -> String {
    format!(
        "Produce an ordered procedural checklist for pursuing the following matter in \
         {jurisdiction}. Each item is one concrete step or consideration.\n\n\
         Matter:\n{query}\n\n\
         Respond with JSON: {{\"checklist\": [\"<step>\"]}}"
    )
}

fn summarize_document_prompt(document_text: &str) -> String {
    format!(
        "Summarise the following legal document in plain language for a non-lawyer. \
         Keep the parties, obligations, deadlines and risks.\n\n\
         Document:\n{document_text}\n\n\
         Respond with JSON: {{\"summary\": \"<summary>\"}}"
    )
}

fn enhance_citation_prompt(case_name: &str) -> String {
    format!(
        "You are a legal citation expert specialising in Indian court cases.\n\n\
         Provide the full and accurate citation for the following Indian court case:\n\n\
         {case_name}\n\n\
         Return ONLY the citation in the standard Indian legal citation format. \
         If you cannot find the exact citation, provide the most likely citation format \
         based on similar cases. Do not include explanations.\n\n\
         Respond with JSON: {{\"citation\": \"<citation>\"}}"
    )
}

fn parse_structured_prompt(raw_text: &str) -> String {
    format!(
        "Parse the following raw text, which is the output of another AI assistant. \
         It contains applicable laws, similar legal precedents and a procedural checklist. \
         Extract them without inventing anything:\n\
         - \"laws\": array of strings, one distinct law, section or article each\n\
         - \"precedents\": array of objects with \"caseName\", \"citation\", \"summary\" \
         and optionally \"differences\"\n\
         - \"checklist\": array of strings, one procedural step each\n\
         Return an empty array for any section that is missing or cannot be reliably extracted.\n\n\
         Raw text to parse:\n{raw_text}\n\n\
         Respond with JSON: {{\"laws\": [], \"precedents\": [], \"checklist\": []}}"
    )
}

// ── Output decoding ───────────────────────────────────────────────────────

/// Decode a model completion into `T`, tolerating markdown fences and
/// prose around the JSON object.
pub fn decode_json<T: DeserializeOwned>(text: &str) -> Option<T> {
    let body = strip_fences(text);
    if body.is_empty() {
        return None;
    }
    if let Ok(v) = serde_json::from_str(body) {
        return Some(v);
    }
    let start = body.find('{')?;
    let end = body.rfind('}')?;
    if end <= start {
        return None;
    }
    serde_json::from_str(&body[start..=end]).ok()
}

fn strip_fences(text: &str) -> &str {
    let t = text.trim();
    if !t.starts_with("```") {
        return t;
    }
    let nl = match t.find('\n') {
        Some(i) => i,
        None => return t,
    };
    let inner = &t[nl + 1..];
    if inner.ends_with("```") {
        inner[..inner.len() - 3].trim_end()
    } else {
        inner
    }
}

// ── Tests ──────────────────────────────────────────────────────────────────
