use std::path::PathBuf;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum FleetError {
    #[error("Invalid parameter {field}: {reason}")]
    InvalidParameter { field: String, reason: String },

    #[error("Invalid artifact filename: {0:?}")]
    InvalidFilename(String),

    #[error("Artifact not found: {0}")]
    ArtifactNotFound(String),

    #[error("No engine binary registered")]
    NoEngineRegistered,

    #[error("Engine binary unavailable at {path}: {reason}")]
    EngineUnavailable { path: PathBuf, reason: String },

    #[error("Malformed local state in {path}: {reason}")]
    MalformedState { path: PathBuf, reason: String },

    #[error("Coordinator rejected request: {0}")]
    Rejected(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Multipart error: {0}")]
    Multipart(#[from] axum::extract::multipart::MultipartError),

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, FleetError>;

impl FleetError {
    fn status_code(&self) -> StatusCode {
        match self {
            FleetError::InvalidParameter { .. }
            | FleetError::InvalidFilename(_)
            | FleetError::Multipart(_) => StatusCode::BAD_REQUEST,
            FleetError::ArtifactNotFound(_) | FleetError::NoEngineRegistered => {
                StatusCode::NOT_FOUND
            }
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for FleetError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(error = %self, "Request failed");
        } else {
            tracing::debug!(error = %self, "Request rejected");
        }
        (status, Json(serde_json::json!({ "error": self.to_string() }))).into_response()
    }
}
