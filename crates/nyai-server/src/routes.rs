use std::{
    collections::{HashMap, VecDeque},
    convert::Infallible,
    sync::{Arc, Mutex},
    time::Instant,
};

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{
        sse::{Event, KeepAlive, Sse},
        Json,
    },
    routing::{delete, get, post},
    Router,
};
use nyai_core::{
    assistant::{Assistant, QuerySession},
    citation::CitationEnhancer,
    db::Db,
    error::{FeedbackError, ValidationError},
    feedback::FeedbackService,
    types::{NewFeedback, QueryOutcome, QueryRequest, StructuredLegalInfo},
};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::{broadcast, watch};
use tokio_stream::{wrappers::BroadcastStream, StreamExt};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

const DEFAULT_HISTORY_LIMIT: i64 = 50;

// ── AppState ──────────────────────────────────────────────────────────────

pub struct AppState {
    pub db: Arc<Db>,
    pub assistant: Arc<Assistant>,
    pub enhancer: CitationEnhancer,
    pub feedback: FeedbackService,
    /// One query session per signed-in user.
    pub sessions: Mutex<HashMap<String, Arc<QuerySession>>>,
    pub start_time: Instant,
    pub log_tx: broadcast::Sender<String>,
    pub log_ring: Arc<Mutex<VecDeque<String>>>,
    /// Flips to `true` once the server starts shutting down; ends open log streams.
    pub shutdown: watch::Receiver<bool>,
    pub backend: String,
    pub model: String,
}

impl AppState {
    /// Anonymous requests get a throwaway session so they never block each other.
    /// Sessions no request is holding are dropped; a fresh one is equivalent.
    fn session_for(&self, user_id: Option<&str>) -> Arc<QuerySession> {
        let Some(user_id) = user_id.filter(|u| !u.trim().is_empty()) else {
            return Arc::new(QuerySession::new());
        };
        let mut sessions = self.sessions.lock().unwrap_or_else(|e| e.into_inner());
        sessions.retain(|id, session| id == user_id || Arc::strong_count(session) > 1);
        sessions
            .entry(user_id.to_string())
            .or_insert_with(|| Arc::new(QuerySession::new()))
            .clone()
    }
}

// ── Error helpers ─────────────────────────────────────────────────────────

type ApiError = (StatusCode, Json<Value>);

pub(crate) fn internal(e: impl std::fmt::Display) -> StatusCode {
    tracing::error!("internal error: {e}");
    StatusCode::INTERNAL_SERVER_ERROR
}

fn internal_json(e: impl std::fmt::Display) -> ApiError {
    (internal(e), Json(json!({ "error": "internal error" })))
}

fn bad_request(e: impl std::fmt::Display) -> ApiError {
    (
        StatusCode::BAD_REQUEST,
        Json(json!({ "error": e.to_string() })),
    )
}

/// Validation failures are the caller's fault; anything else is ours.
fn classify(e: anyhow::Error) -> ApiError {
    match e.downcast_ref::<ValidationError>() {
        Some(v) => bad_request(v),
        None => internal_json(format!("{e:#}")),
    }
}

// ── Request body types ────────────────────────────────────────────────────

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ParseBody {
    pub raw_text: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct CitationsBody {
    pub case_names: Vec<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct DocumentBody {
    pub document_text: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct HistoryQuery {
    pub user_id: Option<String>,
    pub limit: Option<i64>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct FeedbackQuery {
    pub query_id: Option<i64>,
    pub user_id: Option<String>,
}

// ── Router ────────────────────────────────────────────────────────────────

pub(crate) fn router(state: Arc<AppState>) -> Router {
    Router::new()
        // Health
        .route("/api/health", get(health))
        .route("/api/status", get(get_status))
        // Assistant
        .route("/api/query", post(post_query))
        .route("/api/parse", post(post_parse))
        .route("/api/citations", post(post_citations))
        .route("/api/summarize", post(post_summarize))
        .route("/api/library", post(post_library))
        // History
        .route("/api/history", get(get_history))
        .route("/api/history/:id", delete(delete_history))
        // Feedback
        .route("/api/feedback", post(post_feedback).get(get_feedback))
        // SSE logs
        .route("/api/logs", get(sse_logs))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

// ── Handlers ──────────────────────────────────────────────────────────────

async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

async fn get_status(State(state): State<Arc<AppState>>) -> Result<Json<Value>, StatusCode> {
    let library_size = state.db.library_size().map_err(internal)?;
    Ok(Json(json!({
        "version": env!("CARGO_PKG_VERSION"),
        "uptime_s": state.start_time.elapsed().as_secs(),
        "backend": state.backend,
        "model": state.model,
        "citation_cache_size": state.enhancer.resolver().cache().len(),
        "library_size": library_size,
    })))
}

// Assistant

async fn post_query(
    State(state): State<Arc<AppState>>,
    Json(req): Json<QueryRequest>,
) -> Json<QueryOutcome> {
    let session = state.session_for(req.user_id.as_deref());
    Json(state.assistant.run_query(&session, &req).await)
}

async fn post_parse(
    State(state): State<Arc<AppState>>,
    Json(body): Json<ParseBody>,
) -> Json<StructuredLegalInfo> {
    Json(state.assistant.parser().parse(&body.raw_text).await)
}

async fn post_citations(
    State(state): State<Arc<AppState>>,
    Json(body): Json<CitationsBody>,
) -> Json<Value> {
    let citations = state.enhancer.enhance(&body.case_names).await;
    Json(json!({ "citations": citations }))
}

async fn post_summarize(
    State(state): State<Arc<AppState>>,
    Json(body): Json<DocumentBody>,
) -> Result<Json<Value>, ApiError> {
    let result = state
        .assistant
        .summarize_document(&body.document_text)
        .await
        .map_err(classify)?;
    Ok(Json(json!(result)))
}

async fn post_library(
    State(state): State<Arc<AppState>>,
    Json(body): Json<DocumentBody>,
) -> Result<Json<Value>, ApiError> {
    let result = state
        .assistant
        .add_library_document(&body.document_text)
        .map_err(classify)?;
    Ok(Json(json!(result)))
}

// History

async fn get_history(
    State(state): State<Arc<AppState>>,
    Query(q): Query<HistoryQuery>,
) -> Result<Json<Value>, ApiError> {
    let user_id = q
        .user_id
        .filter(|u| !u.trim().is_empty())
        .ok_or_else(|| bad_request(ValidationError::EmptyField("userId")))?;
    let limit = q.limit.unwrap_or(DEFAULT_HISTORY_LIMIT).clamp(1, 500);
    let entries = state
        .db
        .list_history(&user_id, limit)
        .map_err(internal_json)?;
    Ok(Json(json!(entries)))
}

async fn delete_history(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> Result<StatusCode, StatusCode> {
    if state.db.delete_history(id).map_err(internal)? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(StatusCode::NOT_FOUND)
    }
}

// Feedback

async fn post_feedback(
    State(state): State<Arc<AppState>>,
    Json(body): Json<NewFeedback>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    match state.feedback.save(&body) {
        Ok(id) => Ok((StatusCode::CREATED, Json(json!({ "id": id })))),
        Err(FeedbackError::Invalid(e)) => Err(bad_request(e)),
        Err(e @ FeedbackError::Store(_)) => Err((
            internal(&e),
            Json(json!({ "error": "Could not submit feedback. Please try again." })),
        )),
    }
}

async fn get_feedback(
    State(state): State<Arc<AppState>>,
    Query(q): Query<FeedbackQuery>,
) -> Result<Json<Value>, ApiError> {
    let items = match (q.query_id, q.user_id) {
        (Some(query_id), _) => state.feedback.for_query(query_id),
        (None, Some(user_id)) if !user_id.trim().is_empty() => state.feedback.for_user(&user_id),
        _ => return Err(bad_request("queryId or userId is required")),
    }
    .map_err(internal_json)?;
    Ok(Json(json!(items)))
}

// SSE logs

async fn sse_logs(
    State(state): State<Arc<AppState>>,
) -> Sse<impl tokio_stream::Stream<Item = Result<Event, Infallible>>> {
    let rx = state.log_tx.subscribe();
    let mut shutdown = state.shutdown.clone();
    let backlog: Vec<String> = state
        .log_ring
        .lock()
        .map(|ring| ring.iter().cloned().collect())
        .unwrap_or_default();
    let live = BroadcastStream::new(rx).filter_map(|msg| msg.ok());
    let stream = tokio_stream::iter(backlog)
        .chain(live)
        .map(|data| Ok(Event::default().data(data)));
    // The log sender lives as long as the process, so the stream has to be
    // cut explicitly or graceful shutdown waits on it forever.
    let stream = futures::StreamExt::take_until(stream, async move {
        while !*shutdown.borrow_and_update() {
            if shutdown.changed().await.is_err() {
                break;
            }
        }
    });
    Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(std::time::Duration::from_secs(15))
            .text("ping"),
    )
}

// ── Tests ──────────────────────────────────────────────────────────────────
