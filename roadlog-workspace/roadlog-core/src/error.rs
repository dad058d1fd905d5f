// src/error.rs
use thiserror::Error;

/// Failure taxonomy shared by the journal, trip and history paths.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Write collision on a unique key.
    #[error("duplicate key in {table}: {key}")]
    DuplicateKey { table: &'static str, key: String },

    /// The referenced aggregate does not exist.
    #[error("{what} not found: {key}")]
    NotFound { what: &'static str, key: String },

    /// A fix or sample that must never reach the journal.
    #[error("invalid sample: {0}")]
    InvalidSample(String),

    /// The backend failed; the surrounding transaction was rolled back.
    #[error("persistence failure: {0}")]
    Persistence(#[from] rusqlite::Error),

    #[error("i/o failure: {0}")]
    Io(#[from] std::io::Error),
}

pub type CoreResult<T> = std::result::Result<T, CoreError>;

impl CoreError {
    pub(crate) fn not_found(what: &'static str, key: impl ToString) -> Self {
        CoreError::NotFound {
            what,
            key: key.to_string(),
        }
    }

    pub(crate) fn duplicate(table: &'static str, key: impl ToString) -> Self {
        CoreError::DuplicateKey {
            table,
            key: key.to_string(),
        }
    }

    pub fn is_duplicate(&self) -> bool {
        matches!(self, CoreError::DuplicateKey { .. })
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, CoreError::NotFound { .. })
    }
}
