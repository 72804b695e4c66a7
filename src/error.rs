use axum::{
    response::{IntoResponse, Response},
    http::StatusCode,
};
use serde_json::json;
use axum::Json;
use thiserror::Error;

/// Failures raised by the query engine itself.
///
/// Only parse/format problems are errors here. Resolution misses and empty
/// results are handled inside the executor and never surface as `EngineError`.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Unreadable file: {0}")]
    UnreadableFile(String),

    #[error("The model did not return a JSON plan")]
    NoJsonPlan,

    #[error("Invalid JSON plan: {0}")]
    InvalidPlanJson(String),

    #[error("Text completion failed: {0}")]
    Completion(String),

    #[error("Columnar conversion failed: {0}")]
    Columnar(String),

    #[error("Invalid cell reference: {0}")]
    InvalidCellRef(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl EngineError {
    /// Stable identifier reported in `QueryOutcome::error`.
    pub fn kind(&self) -> &'static str {
        match self {
            EngineError::UnreadableFile(_) => "unreadable_file",
            EngineError::NoJsonPlan => "no_json_plan",
            EngineError::InvalidPlanJson(_) => "invalid_plan_json",
            EngineError::Completion(_) => "completion",
            EngineError::Columnar(_) => "columnar",
            EngineError::InvalidCellRef(_) => "invalid_cell_ref",
            EngineError::Io(_) => "io",
            EngineError::Json(_) => "json",
        }
    }

    pub fn is_plan_parse_error(&self) -> bool {
        matches!(self, EngineError::NoJsonPlan | EngineError::InvalidPlanJson(_))
    }
}

impl From<calamine::Error> for EngineError {
    fn from(err: calamine::Error) -> Self {
        EngineError::UnreadableFile(err.to_string())
    }
}

impl From<polars::prelude::PolarsError> for EngineError {
    fn from(err: polars::prelude::PolarsError) -> Self {
        EngineError::Columnar(err.to_string())
    }
}

#[derive(Debug)]
pub enum AppError {
    InvalidInput(String),
    NotFound(String),
    FileProcessingError(String),
    LlmError(String),
    HttpError(String),
    Internal(String),
}

impl std::fmt::Display for AppError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AppError::InvalidInput(msg) => write!(f, "Invalid input: {}", msg),
            AppError::NotFound(msg) => write!(f, "Not found: {}", msg),
            AppError::FileProcessingError(msg) => write!(f, "File processing error: {}", msg),
            AppError::LlmError(msg) => write!(f, "LLM error: {}", msg),
            AppError::HttpError(msg) => write!(f, "HTTP Error: {}", msg),
            AppError::Internal(msg) => write!(f, "Internal error: {}", msg),
        }
    }
}

impl std::error::Error for AppError {}

impl From<EngineError> for AppError {
    fn from(err: EngineError) -> Self {
        match err {
            EngineError::UnreadableFile(msg) => AppError::FileProcessingError(msg),
            EngineError::InvalidCellRef(msg) => AppError::InvalidInput(msg),
            EngineError::Completion(msg) => AppError::LlmError(msg),
            other => AppError::Internal(other.to_string()),
        }
    }
}

impl From<tokio::task::JoinError> for AppError {
    fn from(err: tokio::task::JoinError) -> Self {
        AppError::Internal(format!("worker task failed: {}", err))
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            AppError::InvalidInput(msg) => (StatusCode::BAD_REQUEST, msg),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            AppError::FileProcessingError(msg) => (StatusCode::UNPROCESSABLE_ENTITY, msg),
            AppError::LlmError(msg) => (StatusCode::SERVICE_UNAVAILABLE, msg),
            AppError::HttpError(msg) => (StatusCode::BAD_GATEWAY, msg),
            AppError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };

        let body = Json(json!({
            "error": message
        }));

        (status, body).into_response()
    }
}
