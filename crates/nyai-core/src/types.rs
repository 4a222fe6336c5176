use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ── Legal results ────────────────────────────────────────────────────────

/// A past court case surfaced for a query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Precedent {
    /// Join key back into the citation cache.
    pub case_name: String,
    #[serde(default)]
    pub citation: String,
    #[serde(default)]
    pub summary: String,
    /// Key differences compared to the query, when notable.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub differences: Option<String>,
}

/// Output of the structured-info parser: all three result sections at once.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StructuredLegalInfo {
    #[serde(default)]
    pub laws: Vec<String>,
    #[serde(default)]
    pub precedents: Vec<Precedent>,
    #[serde(default)]
    pub checklist: Vec<String>,
}

impl StructuredLegalInfo {
    pub fn is_empty(&self) -> bool {
        self.laws.is_empty() && self.precedents.is_empty() && self.checklist.is_empty()
    }
}

pub const SOURCE_CUSTOM_LIBRARY: &str = "Custom Library";
pub const SOURCE_AUTORAG: &str = "Cloudflare AutoRAG";
pub const SOURCE_AUTORAG_EMPTY: &str = "Cloudflare AutoRAG (Empty)";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LawsResult {
    #[serde(default)]
    pub laws: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PrecedentsResult {
    #[serde(default)]
    pub precedents: Vec<Precedent>,
    /// Where the precedents came from (e.g. "Cloudflare AutoRAG").
    #[serde(default)]
    pub source_type: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChecklistResult {
    #[serde(default)]
    pub checklist: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SummaryResult {
    pub summary: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddDocumentResult {
    pub message: String,
    pub library_size: i64,
}

// ── Retrieval ────────────────────────────────────────────────────────────

/// What the external knowledge source hands back for a query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum RetrievalResult {
    Success {
        #[serde(rename = "rawTextResponse")]
        raw_text_response: String,
    },
    Error {
        message: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        details: Option<serde_json::Value>,
    },
}

// ── Query orchestration ──────────────────────────────────────────────────

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryRequest {
    /// Signed-in user; anonymous queries are never persisted.
    #[serde(default)]
    pub user_id: Option<String>,
    pub query: String,
    /// Use the custom case library fan-out instead of the external knowledge source.
    #[serde(default)]
    pub use_custom_library: bool,
    #[serde(default)]
    pub demo: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueryState {
    #[default]
    Idle,
    Processing,
    Success,
    Error,
}

impl QueryState {
    pub fn is_processing(self) -> bool {
        self == Self::Processing
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NoticeLevel {
    Info,
    Error,
}

/// A user-visible message produced while handling a request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notice {
    pub title: String,
    pub description: String,
    pub level: NoticeLevel,
}

impl Notice {
    pub fn info(title: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            description: description.into(),
            level: NoticeLevel::Info,
        }
    }

    pub fn error(title: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            description: description.into(),
            level: NoticeLevel::Error,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryOutcome {
    pub state: QueryState,
    pub laws_result: Option<LawsResult>,
    pub precedents_result: Option<PrecedentsResult>,
    pub checklist_result: Option<ChecklistResult>,
    pub notices: Vec<Notice>,
    /// True when a history record was handed to the background writer.
    pub history_queued: bool,
}

impl QueryOutcome {
    pub fn has_results(&self) -> bool {
        self.laws_result.as_ref().is_some_and(|r| !r.laws.is_empty())
            || self
                .precedents_result
                .as_ref()
                .is_some_and(|r| !r.precedents.is_empty())
            || self
                .checklist_result
                .as_ref()
                .is_some_and(|r| !r.checklist.is_empty())
    }

    pub fn has_error_notice(&self) -> bool {
        self.notices.iter().any(|n| n.level == NoticeLevel::Error)
    }
}

// ── History ──────────────────────────────────────────────────────────────

/// A query and its results, queued for persistence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryRecord {
    pub user_id: String,
    pub query: String,
    pub laws_result: Option<LawsResult>,
    pub precedents_result: Option<PrecedentsResult>,
    pub checklist_result: Option<ChecklistResult>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryHistoryEntry {
    pub id: i64,
    pub user_id: String,
    pub query: String,
    pub laws_result: Option<LawsResult>,
    pub precedents_result: Option<PrecedentsResult>,
    pub checklist_result: Option<ChecklistResult>,
    pub timestamp: DateTime<Utc>,
}

// ── Feedback ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FeedbackSection {
    Laws,
    Precedents,
    Checklist,
    Overall,
}

impl FeedbackSection {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Laws => "laws",
            Self::Precedents => "precedents",
            Self::Checklist => "checklist",
            Self::Overall => "overall",
        }
    }

    pub fn from_db(value: &str) -> Self {
        match value {
            "laws" => Self::Laws,
            "precedents" => Self::Precedents,
            "checklist" => Self::Checklist,
            _ => Self::Overall,
        }
    }
}

/// Feedback as submitted; `rating` is validated before it reaches the store.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewFeedback {
    pub query_id: i64,
    pub user_id: String,
    pub section: FeedbackSection,
    pub rating: i64,
    #[serde(default)]
    pub comments: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedbackItem {
    pub id: i64,
    pub query_id: i64,
    pub user_id: String,
    pub section: FeedbackSection,
    pub rating: i64,
    pub comments: Option<String>,
    pub timestamp: DateTime<Utc>,
}
