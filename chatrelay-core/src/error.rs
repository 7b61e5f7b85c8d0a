use thiserror::Error;

use crate::history::HistoryError;
use crate::model::ModelError;

/// Failures of the conversation store.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("History error: {0}")]
    History(#[from] HistoryError),

    #[error("Concurrent update for user {user_id}; stored conversation was changed by another request")]
    Conflict { user_id: i64 },
}

/// Top-level error for one chat turn.
#[derive(Error, Debug)]
pub enum RelayError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Model error: {0}")]
    Model(#[from] ModelError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}
