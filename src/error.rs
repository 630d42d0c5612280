use thiserror::Error;

#[derive(Error, Debug)]
pub enum InsightError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Introspection error: {0}")]
    Introspection(String),

    #[error("Vocabulary error: {0}")]
    Vocabulary(String),

    #[error("Validation failed: {}", .0.join("; "))]
    Validation(Vec<String>),

    #[error("SQL build error: {0}")]
    SqlBuild(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Timed out: {0}")]
    Timeout(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl From<sqlx::Error> for InsightError {
    fn from(err: sqlx::Error) -> Self {
        InsightError::Database(err.to_string())
    }
}

impl From<rusqlite::Error> for InsightError {
    fn from(err: rusqlite::Error) -> Self {
        InsightError::Database(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, InsightError>;
