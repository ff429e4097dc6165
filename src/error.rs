//! Error types for lamad-progress

use thiserror::Error;

#[derive(Error, Debug)]
pub enum LearningError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Invalid package archive: {0}")]
    InvalidArchive(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Locked: {0}")]
    Locked(String),

    #[error("Payload too large: {0}")]
    PayloadTooLarge(String),

    #[error("Store timeout: {0}")]
    Timeout(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl LearningError {
    /// Whether the caller may retry the same operation unchanged.
    ///
    /// Every core operation is an upsert or an idempotent read, so a
    /// retry after a timeout or a busy database converges.
    pub fn is_retryable(&self) -> bool {
        match self {
            LearningError::Timeout(_) => true,
            LearningError::Database(msg) => {
                let msg = msg.to_ascii_lowercase();
                msg.contains("database is locked") || msg.contains("database is busy")
            }
            _ => false,
        }
    }
}

impl From<diesel::result::Error> for LearningError {
    fn from(e: diesel::result::Error) -> Self {
        match e {
            diesel::result::Error::NotFound => LearningError::NotFound("record".into()),
            other => LearningError::Database(other.to_string()),
        }
    }
}

impl From<zip::result::ZipError> for LearningError {
    fn from(e: zip::result::ZipError) -> Self {
        LearningError::InvalidArchive(e.to_string())
    }
}
