use std::{sync::Arc, time::Duration};

use anyhow::Result;
use async_trait::async_trait;
use tokio::{sync::mpsc, task::JoinHandle};
use tracing::{error, info, warn};

use crate::{db::Db, types::HistoryRecord};

const QUEUE_DEPTH: usize = 256;

/// Where finished queries are persisted.
#[async_trait]
pub trait HistoryStore: Send + Sync {
    async fn save_history(&self, record: &HistoryRecord) -> Result<i64>;
}

#[async_trait]
impl HistoryStore for Db {
    async fn save_history(&self, record: &HistoryRecord) -> Result<i64> {
        self.insert_history(record)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Total attempts per record, including the first.
    pub max_attempts: u32,
    /// Delay before the second attempt; doubles after each failure.
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(500),
        }
    }
}

impl RetryPolicy {
    fn delay_after(&self, attempt: u32) -> Duration {
        self.base_delay
            .saturating_mul(2u32.saturating_pow(attempt.saturating_sub(1)))
    }
}

/// Fire-and-forget history persistence. Records go onto a bounded queue that
/// a background task drains, retrying failed writes with exponential backoff.
/// Nothing flows back to the request that submitted the record.
#[derive(Clone)]
pub struct HistoryWriter {
    tx: mpsc::Sender<HistoryRecord>,
}

impl HistoryWriter {
    /// Start the background worker. It exits once every writer handle is dropped
    /// and the queue is drained.
    pub fn spawn(store: Arc<dyn HistoryStore>, policy: RetryPolicy) -> (Self, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(QUEUE_DEPTH);
        let handle = tokio::spawn(run_worker(store, policy, rx));
        (Self { tx }, handle)
    }

    /// Queue a record. Returns false if it was dropped (queue full or worker gone).
    pub fn submit(&self, record: HistoryRecord) -> bool {
        match self.tx.try_send(record) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(record)) => {
                warn!(user_id = %record.user_id, "history queue full, dropping record");
                false
            }
            Err(mpsc::error::TrySendError::Closed(record)) => {
                warn!(user_id = %record.user_id, "history writer stopped, dropping record");
                false
            }
        }
    }
}

async fn run_worker(
    store: Arc<dyn HistoryStore>,
    policy: RetryPolicy,
    mut rx: mpsc::Receiver<HistoryRecord>,
) {
    while let Some(record) = rx.recv().await {
        save_with_retry(store.as_ref(), &policy, &record).await;
    }
    info!("history writer stopped");
}

async fn save_with_retry(store: &dyn HistoryStore, policy: &RetryPolicy, record: &HistoryRecord) {
    let max_attempts = policy.max_attempts.max(1);
    for attempt in 1..=max_attempts {
        match store.save_history(record).await {
            Ok(id) => {
                info!(history_id = id, user_id = %record.user_id, attempt, "saved query history");
                return;
            }
            Err(e) if attempt < max_attempts => {
                let delay = policy.delay_after(attempt);
                warn!(
                    user_id = %record.user_id,
                    attempt,
                    retry_in_ms = delay.as_millis() as u64,
                    "saving query history failed: {e:#}"
                );
                tokio::time::sleep(delay).await;
            }
            Err(e) => {
                error!(
                    user_id = %record.user_id,
                    attempts = max_attempts,
                    "giving up on query history: {e:#}"
                );
            }
        }
    }
}
