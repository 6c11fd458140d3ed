use thiserror::Error;

#[derive(Debug, Error)]
pub enum RecommendationError {
    #[error("validation error: {0}")]
    Validation(String),

    #[error("unknown item '{0}'")]
    UnknownItem(String),

    #[error("scoring pass for user '{user_id}' exceeded its {deadline_ms}ms deadline")]
    ComputationTimeout { user_id: String, deadline_ms: u64 },

    #[error("refresh for user '{0}' was superseded by a newer request")]
    StaleRequestSuperseded(String),

    #[error("storage error: {0}")]
    Storage(#[from] anyhow::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("background task failed: {0}")]
    Join(String),
}

impl RecommendationError {
    /// Validation failures are the only errors a caller can fix by changing input.
    pub fn is_validation(&self) -> bool {
        matches!(self, RecommendationError::Validation(_) | RecommendationError::UnknownItem(_))
    }
}

impl From<rusqlite::Error> for RecommendationError {
    fn from(err: rusqlite::Error) -> Self {
        RecommendationError::Storage(err.into())
    }
}

pub type Result<T> = std::result::Result<T, RecommendationError>;
