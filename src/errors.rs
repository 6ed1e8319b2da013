use serde::Serialize;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("S3 operation failed: {0}")]
    S3Error(String),

    #[error("Invalid configuration: {0}")]
    ConfigError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerdeError(#[from] serde_json::Error),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Database error: {0}")]
    DatabaseError(String),

    #[error("Database connection pool error: {0}")]
    PoolError(String),

    #[error("Database migration error: {0}")]
    MigrationError(String),

    #[error("Corrupt database quarantined: {0}")]
    CorruptDatabase(String),

    #[error("Index operation error: {0}")]
    IndexError(String),

    #[error("Indexing already in progress for bucket: {0}")]
    IndexingAlreadyInProgress(String),

    #[error("No active indexing job for bucket: {0}")]
    NoSuchIndexingJob(String),

    #[error("Unknown error: {0}")]
    Unknown(String),
}

// Conversion depuis rusqlite::Error
impl From<rusqlite::Error> for AppError {
    fn from(err: rusqlite::Error) -> Self {
        AppError::DatabaseError(err.to_string())
    }
}

// Conversion depuis r2d2::Error
impl From<r2d2::Error> for AppError {
    fn from(err: r2d2::Error) -> Self {
        AppError::PoolError(err.to_string())
    }
}

/// Error response serialized for an embedding host (IPC, HTTP, ...)
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub details: Option<String>,
}

impl From<AppError> for ErrorResponse {
    fn from(err: AppError) -> Self {
        ErrorResponse {
            error: err.to_string(),
            details: None,
        }
    }
}

impl From<AppError> for String {
    fn from(err: AppError) -> Self {
        err.to_string()
    }
}
