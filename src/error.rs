//! # error
//!
//! Error type for the monitor HTTP handlers.
//!
//! Axum's `IntoResponse` impl turns these into `{ ok: false, error }` JSON
//! bodies so dashboards always get a machine-readable response.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    /// Nothing to show yet (e.g. no account poll has completed).
    #[error("Not found: {0}")]
    NotFound(String),

    /// Missing or wrong `X-API-Key`.
    #[error("Unauthorized: invalid or missing X-API-Key header")]
    Unauthorized,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match &self {
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Unauthorized => StatusCode::UNAUTHORIZED,
        };

        let body = Json(json!({
            "ok":    false,
            "error": self.to_string(),
        }));

        (status, body).into_response()
    }
}
