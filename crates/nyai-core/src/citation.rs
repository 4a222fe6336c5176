use std::{
    collections::{BTreeMap, HashMap, HashSet},
    sync::{Arc, Mutex},
    time::{Duration, Instant},
};

use futures::future::join_all;
use tracing::{debug, info, warn};

use crate::flows::Flows;

/// Returned in place of a citation when the lookup itself failed.
pub const CITATION_ENHANCEMENT_FAILED: &str = "Citation enhancement failed";
/// Returned when the model's answer could not be decoded.
pub const CITATION_NOT_FOUND: &str = "Citation not found";

pub const DEFAULT_BATCH_SIZE: usize = 5;
pub const DEFAULT_CACHE_CAPACITY: usize = 10_000;

// ── Cache ─────────────────────────────────────────────────────────────────

/// Process-wide case name → citation memo table.
///
/// Bounded: once `capacity` entries are held, inserting a new name evicts the
/// least recently used one. With a `ttl`, entries older than it are treated
/// as absent and dropped on access.
pub struct CitationCache {
    inner: Mutex<CacheInner>,
    capacity: usize,
    ttl: Option<Duration>,
}

#[derive(Default)]
struct CacheInner {
    entries: HashMap<String, CacheEntry>,
    /// use tick → case name, oldest first.
    recency: BTreeMap<u64, String>,
    tick: u64,
}

struct CacheEntry {
    citation: String,
    inserted_at: Instant,
    last_used: u64,
}

impl CacheInner {
    fn touch(&mut self, name: &str) -> Option<String> {
        self.tick += 1;
        let tick = self.tick;
        let entry = self.entries.get_mut(name)?;
        self.recency.remove(&entry.last_used);
        entry.last_used = tick;
        self.recency.insert(tick, name.to_string());
        Some(entry.citation.clone())
    }

    fn remove(&mut self, name: &str) {
        if let Some(entry) = self.entries.remove(name) {
            self.recency.remove(&entry.last_used);
        }
    }

    fn evict_oldest(&mut self) -> bool {
        match self.recency.pop_first() {
            Some((_, name)) => self.entries.remove(&name).is_some(),
            None => false,
        }
    }
}

impl CitationCache {
    pub fn new(capacity: usize, ttl: Option<Duration>) -> Self {
        Self {
            inner: Mutex::new(CacheInner::default()),
            capacity: capacity.max(1),
            ttl,
        }
    }

    pub fn unbounded() -> Self {
        Self::new(usize::MAX, None)
    }

    fn is_expired(&self, entry: &CacheEntry) -> bool {
        self.ttl.is_some_and(|ttl| entry.inserted_at.elapsed() >= ttl)
    }

    pub fn contains(&self, name: &str) -> bool {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner
            .entries
            .get(name)
            .is_some_and(|entry| !self.is_expired(entry))
    }

    pub fn get(&self, name: &str) -> Option<String> {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let expired = self.is_expired(inner.entries.get(name)?);
        if expired {
            inner.remove(name);
            return None;
        }
        inner.touch(name)
    }

    pub fn insert(&self, name: &str, citation: &str) {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.remove(name);
        while inner.entries.len() >= self.capacity {
            if !inner.evict_oldest() {
                break;
            }
        }
        inner.tick += 1;
        let tick = inner.tick;
        inner.entries.insert(
            name.to_string(),
            CacheEntry {
                citation: citation.to_string(),
                inserted_at: Instant::now(),
                last_used: tick,
            },
        );
        inner.recency.insert(tick, name.to_string());
    }

    pub fn len(&self) -> usize {
        self.inner
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .entries
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// ── Resolver ──────────────────────────────────────────────────────────────

/// Resolves one case name to a citation, through the cache. Never fails:
/// a failed lookup yields [`CITATION_ENHANCEMENT_FAILED`].
#[derive(Clone)]
pub struct CitationResolver {
    flows: Flows,
    cache: Arc<CitationCache>,
}

impl CitationResolver {
    pub fn new(flows: Flows, cache: Arc<CitationCache>) -> Self {
        Self { flows, cache }
    }

    pub fn cache(&self) -> &Arc<CitationCache> {
        &self.cache
    }

    pub async fn resolve(&self, case_name: &str) -> String {
        if let Some(cached) = self.cache.get(case_name) {
            debug!(case_name, "citation cache hit");
            return cached;
        }

        match self.flows.enhance_citation(case_name).await {
            Ok(found) => {
                let citation = found.unwrap_or_else(|| CITATION_NOT_FOUND.to_string());
                self.cache.insert(case_name, &citation);
                citation
            }
            // Not cached: the next request for this name tries again.
            Err(e) => {
                warn!(case_name, "citation enhancement failed: {e:#}");
                CITATION_ENHANCEMENT_FAILED.to_string()
            }
        }
    }
}

// ── Batch enhancer ────────────────────────────────────────────────────────

/// Deduplicate `names` (first occurrence wins) and split them into
/// contiguous batches of at most `batch_size`.
pub fn plan_batches(names: &[String], batch_size: usize) -> Vec<Vec<String>> {
    let mut seen = HashSet::new();
    let unique: Vec<String> = names
        .iter()
        .filter(|n| seen.insert(n.as_str()))
        .cloned()
        .collect();
    unique
        .chunks(batch_size.max(1))
        .map(<[String]>::to_vec)
        .collect()
}

/// Resolves many case names, a batch at a time. Every lookup in a batch is
/// issued before any is awaited; the next batch starts once the previous one
/// has fully resolved, which bounds concurrent calls to the provider.
#[derive(Clone)]
pub struct CitationEnhancer {
    resolver: CitationResolver,
    batch_size: usize,
}

impl CitationEnhancer {
    pub fn new(resolver: CitationResolver, batch_size: usize) -> Self {
        Self {
            resolver,
            batch_size: batch_size.max(1),
        }
    }

    pub fn resolver(&self) -> &CitationResolver {
        &self.resolver
    }

    pub async fn enhance(&self, case_names: &[String]) -> HashMap<String, String> {
        let batches = plan_batches(case_names, self.batch_size);
        let mut results = HashMap::new();

        for (i, batch) in batches.iter().enumerate() {
            debug!(batch = i, size = batch.len(), "resolving citation batch");
            let resolved = join_all(batch.iter().map(|name| async move {
                let citation = self.resolver.resolve(name).await;
                (name.clone(), citation)
            }))
            .await;
            results.extend(resolved);
        }

        info!(
            requested = case_names.len(),
            distinct = results.len(),
            batches = batches.len(),
            "citation enhancement finished"
        );
        results
    }
}

// ── Tests ──────────────────────────────────────────────────────────────────
