use thiserror::Error;

use crate::overflow::YearMonth;

/// Errors surfaced by repositories and use-cases.
///
/// The first group mirrors what the user is told ("already exists",
/// "not found", ...); the rest wrap lower-level failures.
#[derive(Error, Debug)]
pub enum CashbackError {
    #[error("Entry already exists: {0}")]
    EntryAlreadyExists(String),

    #[error("Insertion failed: {0}")]
    InsertionFailed(String),

    #[error("{entity} with id {id} not found")]
    NotFound { entity: &'static str, id: i64 },

    #[error("Invalid input: {0}")]
    Validation(String),

    #[error("Card cashback limit exceeded in {month}")]
    CashbackOverflow { month: YearMonth },

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Update error: {0}")]
    Update(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Database connection lock poisoned")]
    LockPoisoned,
}

impl CashbackError {
    pub fn not_found(entity: &'static str, id: i64) -> Self {
        CashbackError::NotFound { entity, id }
    }

    /// Errors caused by user input rather than by the environment.
    pub fn is_user_error(&self) -> bool {
        matches!(
            self,
            CashbackError::EntryAlreadyExists(_)
                | CashbackError::NotFound { .. }
                | CashbackError::Validation(_)
                | CashbackError::CashbackOverflow { .. }
        )
    }
}

/// Convenience type alias for Results with CashbackError
pub type Result<T> = std::result::Result<T, CashbackError>;
