#![allow(dead_code)]

use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc, Mutex,
};

use anyhow::Result;
use async_trait::async_trait;
use nyai_core::{
    citation::{CitationCache, CitationEnhancer, CitationResolver},
    db::Db,
    flow::{FlowBackend, FlowKind, FlowRequest},
    flows::Flows,
    parser::StructuredInfoParser,
    retrieval::Retriever,
    types::RetrievalResult,
};

// ── helpers ──────────────────────────────────────────────────────────────────

pub fn open_db() -> Db {
    let mut db = Db::open(":memory:").expect("open in-memory db");
    db.migrate().expect("migrate");
    db
}

type Handler = Box<dyn Fn(&FlowRequest) -> Result<String> + Send + Sync>;

/// Answers each flow from a closure and records every request it sees.
pub struct ScriptedBackend {
    handler: Handler,
    requests: Mutex<Vec<FlowRequest>>,
}

impl ScriptedBackend {
    pub fn new(handler: impl Fn(&FlowRequest) -> Result<String> + Send + Sync + 'static) -> Arc<Self> {
        Arc::new(Self {
            handler: Box::new(handler),
            requests: Mutex::new(Vec::new()),
        })
    }

    pub fn calls(&self, kind: FlowKind) -> usize {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.kind == kind)
            .count()
    }

    pub fn total_calls(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub fn prompts(&self, kind: FlowKind) -> Vec<String> {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.kind == kind)
            .map(|r| r.prompt.clone())
            .collect()
    }
}

#[async_trait]
impl FlowBackend for ScriptedBackend {
    async fn complete(&self, request: &FlowRequest) -> Result<String> {
        self.requests.lock().unwrap().push(request.clone());
        tokio::task::yield_now().await;
        (self.handler)(request)
    }

    fn model(&self) -> &str {
        "scripted"
    }
}

/// Returns a fixed retrieval result and counts calls.
pub struct FixedRetriever {
    result: RetrievalResult,
    pub calls: AtomicUsize,
}

impl FixedRetriever {
    pub fn new(result: RetrievalResult) -> Arc<Self> {
        Arc::new(Self {
            result,
            calls: AtomicUsize::new(0),
        })
    }

    pub fn success(text: &str) -> Arc<Self> {
        Self::new(RetrievalResult::Success {
            raw_text_response: text.to_string(),
        })
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Retriever for FixedRetriever {
    async fn retrieve(&self, _query: &str) -> RetrievalResult {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.result.clone()
    }
}

pub fn flows(backend: &Arc<ScriptedBackend>) -> Flows {
    Flows::new(backend.clone() as Arc<dyn FlowBackend>)
}

pub fn parser_with_cache(backend: &Arc<ScriptedBackend>, cache: Arc<CitationCache>) -> StructuredInfoParser {
    let flows = flows(backend);
    let enhancer = CitationEnhancer::new(CitationResolver::new(flows.clone(), cache), 5);
    StructuredInfoParser::new(flows, enhancer)
}

pub fn citation_json(citation: &str) -> String {
    format!(r#"{{"citation": "{citation}"}}"#)
}
