mod common;

use std::{
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use common::{citation_json, flows, ScriptedBackend};
use nyai_core::{
    citation::{
        CitationCache, CitationEnhancer, CitationResolver, CITATION_ENHANCEMENT_FAILED,
        CITATION_NOT_FOUND,
    },
    flow::{FlowBackend, FlowKind, FlowRequest},
    flows::Flows,
};

fn names(list: &[&str]) -> Vec<String> {
    list.iter().map(|s| s.to_string()).collect()
}

fn enhancer(backend: &Arc<ScriptedBackend>, cache: Arc<CitationCache>, batch: usize) -> CitationEnhancer {
    CitationEnhancer::new(CitationResolver::new(flows(backend), cache), batch)
}

// ── resolver ─────────────────────────────────────────────────────────────────

#[tokio::test]
async fn resolver_caches_found_citations() {
    let backend = ScriptedBackend::new(|_| Ok(citation_json("(1973) 4 SCC 225")));
    let cache = Arc::new(CitationCache::unbounded());
    let resolver = CitationResolver::new(flows(&backend), cache.clone());

    let first = resolver.resolve("Kesavananda Bharati v State of Kerala").await;
    let second = resolver.resolve("Kesavananda Bharati v State of Kerala").await;

    assert_eq!(first, "(1973) 4 SCC 225");
    assert_eq!(second, first);
    assert_eq!(backend.calls(FlowKind::EnhanceCitation), 1);
    assert!(cache.contains("Kesavananda Bharati v State of Kerala"));
}

#[tokio::test]
async fn resolver_caches_not_found() {
    let backend = ScriptedBackend::new(|_| Ok("No citation available.".to_string()));
    let cache = Arc::new(CitationCache::unbounded());
    let resolver = CitationResolver::new(flows(&backend), cache.clone());

    assert_eq!(resolver.resolve("Unknown v Nobody").await, CITATION_NOT_FOUND);
    assert_eq!(resolver.resolve("Unknown v Nobody").await, CITATION_NOT_FOUND);
    assert_eq!(backend.calls(FlowKind::EnhanceCitation), 1);
    assert_eq!(cache.get("Unknown v Nobody").as_deref(), Some(CITATION_NOT_FOUND));
}

#[tokio::test]
async fn resolver_caches_blank_citation_as_empty() {
    let backend = ScriptedBackend::new(|_| Ok(r#"{"citation": "  "}"#.to_string()));
    let cache = Arc::new(CitationCache::unbounded());
    let resolver = CitationResolver::new(flows(&backend), cache.clone());

    assert_eq!(resolver.resolve("Blank v Answer").await, "");
    assert_eq!(resolver.resolve("Blank v Answer").await, "");
    assert_eq!(backend.calls(FlowKind::EnhanceCitation), 1);
    assert_eq!(cache.get("Blank v Answer").as_deref(), Some(""));
}

#[tokio::test]
async fn resolver_does_not_cache_failures() {
    let backend = ScriptedBackend::new(|_| Err(anyhow!("provider unavailable")));
    let cache = Arc::new(CitationCache::unbounded());
    let resolver = CitationResolver::new(flows(&backend), cache.clone());

    assert_eq!(resolver.resolve("A v B").await, CITATION_ENHANCEMENT_FAILED);
    assert_eq!(resolver.resolve("A v B").await, CITATION_ENHANCEMENT_FAILED);
    assert_eq!(backend.calls(FlowKind::EnhanceCitation), 2);
    assert!(!cache.contains("A v B"));
}

#[tokio::test]
async fn resolver_serves_preloaded_entries_without_calls() {
    let backend = ScriptedBackend::new(|_| Ok(citation_json("should not be used")));
    let cache = Arc::new(CitationCache::unbounded());
    cache.insert("Maneka Gandhi v Union of India", "AIR 1978 SC 597");
    let resolver = CitationResolver::new(flows(&backend), cache);

    assert_eq!(
        resolver.resolve("Maneka Gandhi v Union of India").await,
        "AIR 1978 SC 597"
    );
    assert_eq!(backend.total_calls(), 0);
}

// ── enhancer ─────────────────────────────────────────────────────────────────

#[tokio::test]
async fn enhancer_looks_up_each_distinct_name_once() {
    let backend = ScriptedBackend::new(|req| {
        if req.prompt.contains("A v B") {
            Ok(citation_json("C1"))
        } else {
            Ok(citation_json("C2"))
        }
    });
    let enhancer = enhancer(&backend, Arc::new(CitationCache::unbounded()), 5);

    let out = enhancer.enhance(&names(&["A v B", "C v D", "A v B"])).await;

    assert_eq!(out.len(), 2);
    assert_eq!(out["A v B"], "C1");
    assert_eq!(out["C v D"], "C2");
    assert_eq!(backend.calls(FlowKind::EnhanceCitation), 2);
}

#[tokio::test]
async fn enhancer_covers_every_name_across_batches() {
    let backend = ScriptedBackend::new(|_| Ok(citation_json("X")));
    let enhancer = enhancer(&backend, Arc::new(CitationCache::unbounded()), 5);
    let input: Vec<String> = (0..12).map(|i| format!("Case {i:02} v State")).collect();

    let out = enhancer.enhance(&input).await;

    assert_eq!(out.len(), 12);
    assert!(input.iter().all(|n| out.contains_key(n)));
    assert_eq!(backend.calls(FlowKind::EnhanceCitation), 12);
}

#[tokio::test]
async fn enhancer_with_warm_cache_makes_no_calls() {
    let backend = ScriptedBackend::new(|_| Ok(citation_json("X")));
    let cache = Arc::new(CitationCache::unbounded());
    let enhancer = enhancer(&backend, cache, 5);
    let input = names(&["P v Q", "R v S"]);

    enhancer.enhance(&input).await;
    let calls_after_first = backend.total_calls();
    let again = enhancer.enhance(&input).await;

    assert_eq!(calls_after_first, 2);
    assert_eq!(backend.total_calls(), 2);
    assert_eq!(again["P v Q"], "X");
}

#[tokio::test]
async fn enhancer_reports_failures_per_name() {
    let backend = ScriptedBackend::new(|req| {
        if req.prompt.contains("Broken v Case") {
            Err(anyhow!("timeout"))
        } else {
            Ok(citation_json("AIR 2000 SC 1"))
        }
    });
    let enhancer = enhancer(&backend, Arc::new(CitationCache::unbounded()), 2);

    let out = enhancer.enhance(&names(&["Good v Case", "Broken v Case"])).await;

    assert_eq!(out["Good v Case"], "AIR 2000 SC 1");
    assert_eq!(out["Broken v Case"], CITATION_ENHANCEMENT_FAILED);
    assert!(!enhancer.resolver().cache().contains("Broken v Case"));
}

#[tokio::test]
async fn enhancer_empty_input_makes_no_calls() {
    let backend = ScriptedBackend::new(|_| Ok(citation_json("X")));
    let enhancer = enhancer(&backend, Arc::new(CitationCache::unbounded()), 5);

    assert!(enhancer.enhance(&[]).await.is_empty());
    assert_eq!(backend.total_calls(), 0);
}

// ── batching ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
enum Event {
    Start(String),
    End(String),
}

/// Holds every lookup open for a moment and records when each starts and
/// finishes, plus the highest number of lookups open at once.
struct SlowBackend {
    names: Vec<String>,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
    events: Mutex<Vec<Event>>,
}

impl SlowBackend {
    fn name_in(&self, prompt: &str) -> String {
        self.names
            .iter()
            .find(|n| prompt.contains(n.as_str()))
            .cloned()
            .unwrap_or_default()
    }
}

#[async_trait]
impl FlowBackend for SlowBackend {
    async fn complete(&self, request: &FlowRequest) -> Result<String> {
        let name = self.name_in(&request.prompt);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        self.events.lock().unwrap().push(Event::Start(name.clone()));

        tokio::time::sleep(Duration::from_millis(20)).await;

        self.events.lock().unwrap().push(Event::End(name));
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        Ok(citation_json("AIR 1950 SC 1"))
    }

    fn model(&self) -> &str {
        "slow"
    }
}

#[tokio::test]
async fn enhancer_runs_one_full_batch_at_a_time() {
    let input: Vec<String> = (0..12).map(|i| format!("Case {i:02} v State")).collect();
    let backend = Arc::new(SlowBackend {
        names: input.clone(),
        in_flight: AtomicUsize::new(0),
        peak: AtomicUsize::new(0),
        events: Mutex::new(Vec::new()),
    });
    let enhancer = CitationEnhancer::new(
        CitationResolver::new(
            Flows::new(backend.clone() as Arc<dyn FlowBackend>),
            Arc::new(CitationCache::unbounded()),
        ),
        5,
    );

    let out = enhancer.enhance(&input).await;
    assert_eq!(out.len(), 12);

    // every lookup of a batch is in flight together, never more
    assert_eq!(backend.peak.load(Ordering::SeqCst), 5);

    let events = backend.events.lock().unwrap().clone();
    let position = |e: &Event| events.iter().position(|x| x == e).unwrap();
    for (batch, next) in [(&input[0..5], &input[5..10]), (&input[5..10], &input[10..12])] {
        let last_end = batch.iter().map(|n| position(&Event::End(n.clone()))).max().unwrap();
        let first_start = next.iter().map(|n| position(&Event::Start(n.clone()))).min().unwrap();
        assert!(
            last_end < first_start,
            "a lookup from the next batch started before the previous batch finished"
        );
    }

    // all five starts of the first batch precede its first completion
    let first_end = input[0..5].iter().map(|n| position(&Event::End(n.clone()))).min().unwrap();
    assert!(input[0..5].iter().all(|n| position(&Event::Start(n.clone())) < first_end));
}
