use axum::{http::StatusCode, response::IntoResponse};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Database migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// Bulk snapshot or history call failed or returned nothing. Cycle-level.
    #[error("Market data source unavailable: {0}")]
    SourceUnavailable(String),

    /// A single symbol's record failed validation. Absorbed by the batch.
    #[error("Invalid record for {symbol}: {reason}")]
    InvalidRecord { symbol: String, reason: String },

    #[error("Insufficient baseline for {symbol}: {samples} valid samples, {required} required")]
    InsufficientBaseline {
        symbol: String,
        samples: usize,
        required: usize,
    },

    #[error("No usable subscores for {0}")]
    AllComponentsMissing(String),

    #[error("Cycle lock held: {0}")]
    LockHeld(String),

    #[error("Upstream call timed out: {0}")]
    Timeout(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, AppError>;

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let status = match &self {
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Config(_) => StatusCode::BAD_REQUEST,
            AppError::SourceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, self.to_string()).into_response()
    }
}
