use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

/// Error taxonomy shared by the client-side orchestrator and the server's
/// `IntoResponse` mapping (§7 of the reconciliation design: transport/auth,
/// validation, parse failure, AI mismatch, vector store failure, ...).
#[derive(Error, Debug)]
pub enum AppError {
    #[error("project not found or not yet initialized: {0}")]
    NotFound(String),

    #[error("path not allowed: {0}")]
    PathNotAllowed(String),

    #[error("hash error: {0}")]
    Hash(String),

    #[error("chunker error: {0}")]
    Chunk(String),

    #[error("merkle state error: {0}")]
    Merkle(String),

    #[error("project config error: {0}")]
    Project(String),

    #[error("sync error: {0}")]
    Sync(String),

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("unauthorized")]
    Unauthorized,

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            AppError::NotFound(_) => (StatusCode::NOT_FOUND, self.to_string()),
            AppError::PathNotAllowed(_) => (StatusCode::FORBIDDEN, self.to_string()),
            AppError::Hash(_) | AppError::Chunk(_) | AppError::Merkle(_) | AppError::Project(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, self.to_string())
            }
            AppError::Sync(_) => (StatusCode::BAD_GATEWAY, self.to_string()),
            AppError::BadRequest(_) => (StatusCode::BAD_REQUEST, self.to_string()),
            AppError::Unauthorized => (StatusCode::UNAUTHORIZED, self.to_string()),
            AppError::Io(_) => (StatusCode::INTERNAL_SERVER_ERROR, self.to_string()),
            AppError::Serde(_) => (StatusCode::BAD_REQUEST, self.to_string()),
            AppError::Internal(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "internal server error".to_string(),
            ),
        };

        let body = json!({
            "error": status.canonical_reason().unwrap_or("error"),
            "message": message,
            "details": serde_json::Value::Null,
        });

        (status, Json(body)).into_response()
    }
}

pub type AppResult<T> = Result<T, AppError>;
