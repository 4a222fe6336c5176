use async_trait::async_trait;

use crate::types::RetrievalResult;

/// The external knowledge source queried on the default path.
///
/// Implementations report failures as [`RetrievalResult::Error`] rather than
/// returning an error, so the orchestrator can show the message to the user.
#[async_trait]
pub trait Retriever: Send + Sync {
    async fn retrieve(&self, query: &str) -> RetrievalResult;
}
