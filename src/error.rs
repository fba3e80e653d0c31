use axum::{http::StatusCode, response::IntoResponse};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    /// Remote directory service unreachable or returned garbage. Run-level.
    #[error("Directory unavailable: {0}")]
    DirectoryUnavailable(String),

    /// Per-file: recorded as FAILED(download), never retried within the run.
    #[error("Download failed: {0}")]
    DownloadFailed(String),

    /// Per-file: recorded as FAILED(parse), contributes zero records.
    #[error("Parse failed: {0}")]
    ParseFailed(String),

    #[error("Storage unavailable: {0}")]
    StorageUnavailable(#[from] sqlx::Error),

    #[error("Database migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid path: {0}")]
    InvalidPath(String),

    #[error("Run cancelled")]
    Cancelled,
}

impl AppError {
    /// Errors after which no safe partial progress can be recorded.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            AppError::StorageUnavailable(_) | AppError::Migration(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, AppError>;

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let status = match &self {
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Config(_) | AppError::InvalidPath(_) => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, self.to_string()).into_response()
    }
}
