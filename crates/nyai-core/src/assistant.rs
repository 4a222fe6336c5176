use std::sync::{Arc, Mutex};

use anyhow::Result;
use tracing::{info, warn};

use crate::{
    db::Db,
    error::ValidationError,
    flows::Flows,
    history::HistoryWriter,
    parser::StructuredInfoParser,
    retrieval::Retriever,
    types::{
        AddDocumentResult, ChecklistResult, HistoryRecord, LawsResult, Notice, PrecedentsResult,
        QueryOutcome, QueryRequest, QueryState, RetrievalResult, SummaryResult,
        SOURCE_AUTORAG, SOURCE_AUTORAG_EMPTY,
    },
};

/// Library documents considered when building custom-library context.
const LIBRARY_CONTEXT_DOCS: i64 = 50;

#[derive(Debug, Clone)]
pub struct AssistantSettings {
    /// Jurisdiction named in checklist prompts.
    pub jurisdiction: String,
    /// Upper bound on library text included in precedent prompts.
    pub library_context_chars: usize,
}

impl Default for AssistantSettings {
    fn default() -> Self {
        Self {
            jurisdiction: "India".into(),
            library_context_chars: 12_000,
        }
    }
}

// ── Session state ─────────────────────────────────────────────────────────

/// Per-user query state. Only one query runs per session at a time.
#[derive(Default)]
pub struct QuerySession {
    state: Mutex<QueryState>,
}

impl QuerySession {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> QueryState {
        *self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn begin(&self) -> Option<ProcessingGuard<'_>> {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if state.is_processing() {
            return None;
        }
        *state = QueryState::Processing;
        Some(ProcessingGuard {
            session: self,
            finish_as: QueryState::Idle,
        })
    }
}

/// Leaves the session in `finish_as` on every exit path, unwinding included.
struct ProcessingGuard<'a> {
    session: &'a QuerySession,
    finish_as: QueryState,
}

impl Drop for ProcessingGuard<'_> {
    fn drop(&mut self) {
        let mut state = self.session.state.lock().unwrap_or_else(|e| e.into_inner());
        *state = self.finish_as;
    }
}

// ── Orchestrator ──────────────────────────────────────────────────────────

/// Drives one user query through either the custom-library fan-out or the
/// retrieve-then-parse pipeline, then queues the results for history.
pub struct Assistant {
    flows: Flows,
    parser: StructuredInfoParser,
    retriever: Arc<dyn Retriever>,
    history: HistoryWriter,
    db: Arc<Db>,
    settings: AssistantSettings,
}

impl Assistant {
    pub fn new(
        flows: Flows,
        parser: StructuredInfoParser,
        retriever: Arc<dyn Retriever>,
        history: HistoryWriter,
        db: Arc<Db>,
        settings: AssistantSettings,
    ) -> Self {
        Self {
            flows,
            parser,
            retriever,
            history,
            db,
            settings,
        }
    }

    pub fn parser(&self) -> &StructuredInfoParser {
        &self.parser
    }

    pub async fn run_query(&self, session: &QuerySession, req: &QueryRequest) -> QueryOutcome {
        let query = req.query.trim();
        if query.is_empty() {
            return QueryOutcome {
                state: session.state(),
                notices: vec![Notice::error(
                    "Input Required",
                    ValidationError::EmptyQuery.to_string(),
                )],
                ..Default::default()
            };
        }

        let Some(mut guard) = session.begin() else {
            return QueryOutcome {
                state: QueryState::Processing,
                notices: vec![Notice::error(
                    "Query In Progress",
                    "Wait for the current query to finish before sending another.",
                )],
                ..Default::default()
            };
        };

        // Prior results are cleared: the outcome starts empty.
        let mut outcome = QueryOutcome::default();
        let finished = if req.use_custom_library {
            self.run_custom_library(query, &mut outcome).await
        } else {
            self.run_knowledge_source(query, &mut outcome).await
        };

        if finished && outcome.has_results() {
            outcome.history_queued = self.queue_history(req, query, &outcome);
        }

        if req.demo {
            outcome.notices.push(Notice::info(
                "Demo Complete",
                "Sign in to continue using NYAI and save your query history.",
            ));
        }

        outcome.state = match (finished, outcome.has_results()) {
            (false, _) => QueryState::Idle,
            (true, true) => QueryState::Success,
            (true, false) if outcome.has_error_notice() => QueryState::Error,
            (true, false) => QueryState::Success,
        };
        guard.finish_as = outcome.state;
        info!(
            state = ?outcome.state,
            custom_library = req.use_custom_library,
            history_queued = outcome.history_queued,
            "query finished"
        );
        outcome
    }

    /// Three independent flows run concurrently; one failing does not cancel
    /// the others. Returns true when the path ran to completion.
    async fn run_custom_library(&self, query: &str, outcome: &mut QueryOutcome) -> bool {
        let library_context = self.library_context();
        let (laws, precedents, checklist) = tokio::join!(
            self.flows.identify_laws(query),
            self.flows
                .retrieve_precedents(query, library_context.as_deref()),
            self.flows
                .generate_checklist(query, &self.settings.jurisdiction),
        );

        outcome.laws_result = settle(laws, "Error Identifying Laws", &mut outcome.notices);
        outcome.precedents_result =
            settle(precedents, "Error Retrieving Precedents", &mut outcome.notices);
        outcome.checklist_result =
            settle(checklist, "Error Generating Checklist", &mut outcome.notices);

        if outcome.laws_result.is_some()
            || outcome.precedents_result.is_some()
            || outcome.checklist_result.is_some()
        {
            outcome.notices.push(Notice::info(
                "Insights Generated (Custom Library)",
                "Legal insights from your library have been processed.",
            ));
        } else {
            outcome.notices.push(Notice::error(
                "No Insights (Custom Library)",
                "Could not generate insights from your custom library.",
            ));
        }
        true
    }

    /// Retrieval, then structured parsing. Returns false on an early exit
    /// (retrieval error or empty retrieval).
    async fn run_knowledge_source(&self, query: &str, outcome: &mut QueryOutcome) -> bool {
        let raw_text = match self.retriever.retrieve(query).await {
            RetrievalResult::Error { message, details } => {
                warn!(?details, "knowledge source error: {message}");
                outcome
                    .notices
                    .push(Notice::error("Knowledge Source Error", message));
                return false;
            }
            RetrievalResult::Success { raw_text_response } => raw_text_response,
        };

        if raw_text.trim().is_empty() {
            outcome.notices.push(Notice::error(
                "Empty Response",
                "The knowledge source returned an empty response.",
            ));
            outcome.laws_result = Some(LawsResult::default());
            outcome.precedents_result = Some(PrecedentsResult {
                precedents: Vec::new(),
                source_type: SOURCE_AUTORAG_EMPTY.into(),
            });
            outcome.checklist_result = Some(ChecklistResult::default());
            return false;
        }

        let parsed = self.parser.parse(&raw_text).await;
        let structured = !parsed.is_empty();

        outcome.laws_result = Some(LawsResult { laws: parsed.laws });
        outcome.precedents_result = Some(PrecedentsResult {
            precedents: parsed.precedents,
            source_type: SOURCE_AUTORAG.into(),
        });
        outcome.checklist_result = Some(ChecklistResult {
            checklist: parsed.checklist,
        });

        if structured {
            outcome.notices.push(Notice::info(
                "Insights Generated",
                "Legal insights from the knowledge source have been processed.",
            ));
        } else {
            outcome.notices.push(Notice::error(
                "No Structured Insights",
                "Could not structure insights from the knowledge source response. \
                 The raw response might be incomplete or not in the expected format.",
            ));
        }
        true
    }

    fn queue_history(&self, req: &QueryRequest, query: &str, outcome: &QueryOutcome) -> bool {
        if req.demo {
            return false;
        }
        let Some(user_id) = req.user_id.as_deref().filter(|u| !u.trim().is_empty()) else {
            return false;
        };
        self.history.submit(HistoryRecord {
            user_id: user_id.to_string(),
            query: query.to_string(),
            laws_result: outcome.laws_result.clone(),
            precedents_result: outcome.precedents_result.clone(),
            checklist_result: outcome.checklist_result.clone(),
        })
    }

    /// Recent library documents joined and cut to the configured budget.
    fn library_context(&self) -> Option<String> {
        let docs = match self.db.library_documents(LIBRARY_CONTEXT_DOCS) {
            Ok(docs) => docs,
            Err(e) => {
                warn!("failed to load custom library: {e:#}");
                return None;
            }
        };
        if docs.is_empty() {
            return None;
        }
        let joined = docs.join("\n\n---\n\n");
        Some(truncate_chars(&joined, self.settings.library_context_chars))
    }

    // ── Document tools ────────────────────────────────────────────────────

    pub async fn summarize_document(&self, document_text: &str) -> Result<SummaryResult> {
        if document_text.trim().is_empty() {
            return Err(ValidationError::EmptyDocument.into());
        }
        self.flows.summarize_document(document_text).await
    }

    pub fn add_library_document(&self, document_text: &str) -> Result<AddDocumentResult> {
        let text = document_text.trim();
        if text.is_empty() {
            return Err(ValidationError::EmptyDocument.into());
        }
        let id = self.db.add_library_document(text)?;
        let library_size = self.db.library_size()?;
        info!(document_id = id, library_size, "document added to custom library");
        Ok(AddDocumentResult {
            message: "Document added to your custom library.".into(),
            library_size,
        })
    }
}

/// Keep a section's result, or record why it is missing.
fn settle<T>(result: Result<T>, title: &str, notices: &mut Vec<Notice>) -> Option<T> {
    match result {
        Ok(v) => Some(v),
        Err(e) => {
            warn!("{title}: {e:#}");
            notices.push(Notice::error(title, format!("{e:#}")));
            None
        }
    }
}

fn truncate_chars(s: &str, max_chars: usize) -> String {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => s[..idx].to_string(),
        None => s.to_string(),
    }
}
