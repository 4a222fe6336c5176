use thiserror::Error;

/// Input rejected before any external call or write is made.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("please enter a legal query")]
    EmptyQuery,
    #[error("please upload or paste a document")]
    EmptyDocument,
    #[error("rating must be between 1 and 5, got {0}")]
    RatingOutOfRange(i64),
    #[error("{0} must not be empty")]
    EmptyField(&'static str),
}

#[derive(Debug, Error)]
pub enum FeedbackError {
    #[error(transparent)]
    Invalid(#[from] ValidationError),
    #[error("failed to save feedback: {0:#}")]
    Store(anyhow::Error),
}
