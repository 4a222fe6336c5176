use std::sync::Arc;

use tracing::{error, info};

use crate::{
    db::Db,
    error::{FeedbackError, ValidationError},
    types::{FeedbackItem, NewFeedback},
};

pub const MIN_RATING: i64 = 1;
pub const MAX_RATING: i64 = 5;

/// Check a submission before it reaches the store.
pub fn validate(feedback: &NewFeedback) -> Result<(), ValidationError> {
    if !(MIN_RATING..=MAX_RATING).contains(&feedback.rating) {
        return Err(ValidationError::RatingOutOfRange(feedback.rating));
    }
    if feedback.user_id.trim().is_empty() {
        return Err(ValidationError::EmptyField("userId"));
    }
    Ok(())
}

#[derive(Clone)]
pub struct FeedbackService {
    db: Arc<Db>,
}

impl FeedbackService {
    pub fn new(db: Arc<Db>) -> Self {
        Self { db }
    }

    /// Validate and persist. Store failures are returned so the caller can
    /// tell the user their feedback was not saved.
    pub fn save(&self, feedback: &NewFeedback) -> Result<i64, FeedbackError> {
        validate(feedback)?;
        let id = self.db.insert_feedback(feedback).map_err(|e| {
            error!(query_id = feedback.query_id, "error saving feedback: {e:#}");
            FeedbackError::Store(e)
        })?;
        info!(
            feedback_id = id,
            query_id = feedback.query_id,
            section = feedback.section.as_str(),
            rating = feedback.rating,
            "feedback saved"
        );
        Ok(id)
    }

    pub fn for_query(&self, query_id: i64) -> anyhow::Result<Vec<FeedbackItem>> {
        self.db.feedback_for_query(query_id)
    }

    pub fn for_user(&self, user_id: &str) -> anyhow::Result<Vec<FeedbackItem>> {
        self.db.feedback_for_user(user_id)
    }
}
