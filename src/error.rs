//! Error types for hostel-sync
//!
//! Network failures never show up here: delivery collapses to a boolean and
//! a queued retry. Only local storage failures and rejected input propagate.

use thiserror::Error;

/// Local storage failures
#[derive(Error, Debug)]
pub enum StoreError {
    /// SQLite error
    #[error("Database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Encoding a collection failed
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// IO error while preparing the database location
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A previous holder of the connection lock panicked
    #[error("Database lock poisoned")]
    Poisoned,
}

/// Input rejected before anything is persisted
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Please fill in the {0} field.")]
    MissingField(&'static str),

    #[error("Please provide at least one rating.")]
    NoRatings,

    #[error("Please provide all three ratings.")]
    IncompleteRatings,

    #[error("Rating for {field} must be between 1 and 5 (got {value}).")]
    RatingOutOfRange { field: &'static str, value: u8 },
}

/// Failures of a user-initiated outbox action
#[derive(Error, Debug)]
pub enum OutboxError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("No record with id {0}")]
    NotFound(i64),
}
