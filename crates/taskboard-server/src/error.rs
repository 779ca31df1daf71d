//! Server-specific error types

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for server operations
pub type ServerResult<T> = std::result::Result<T, AppError>;

/// Failures inside the instrumentation machinery.
///
/// These never reach business callers: interceptors and the audit worker log
/// them where they happen.
#[derive(Error, Debug)]
pub enum InstrumentError {
    #[error("Audit store error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Audit store error: {0}")]
    Store(String),

    #[error("Invalid instrumentation configuration: {0}")]
    Config(#[from] figment::Error),

    #[error("Instrumentation configuration file not found: {}", .0.display())]
    ConfigFileMissing(PathBuf),

    #[error("Audit dispatch failed: {0}")]
    Dispatch(String),

    #[error("{0} interceptor panicked while recording")]
    RecordingPanicked(&'static str),
}

/// Application error types
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Instrumentation error: {0}")]
    Instrument(#[from] InstrumentError),

    #[error("Bad request: {0}")]
    BadRequest(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_message) = match self {
            AppError::Instrument(ref e) => {
                tracing::error!("Instrumentation error: {:?}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, "An audit store error occurred".to_string())
            },
            AppError::BadRequest(ref message) => (StatusCode::BAD_REQUEST, message.clone()),
        };

        let body = Json(json!({
            "error": {
                "message": error_message,
                "status": status.as_u16(),
            }
        }));

        (status, body).into_response()
    }
}
