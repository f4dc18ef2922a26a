//! Typed error taxonomy shared by the stores, services and HTTP layer.
//!
//! Every variant maps to a stable HTTP status and error code. Services
//! surface these unchanged; the `IntoResponse` impl is the single place
//! where they become wire responses. Server-class failures log at
//! `error` and hide their detail from the client; client-class errors
//! log at `warn` and keep their message.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};

use crate::api::types::ApiResponse;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// Malformed input shape or out-of-range field (400).
    #[error("{0}")]
    Validation(String),
    /// Referenced task or user is absent (404).
    #[error("{0}")]
    NotFound(String),
    /// Access policy denial (403).
    #[error("{0}")]
    Forbidden(String),
    /// Missing or invalid credential (401).
    #[error("{0}")]
    Unauthorized(String),
    /// Store or infrastructure failure (500).
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "VALIDATION_ERROR",
            Self::NotFound(_) => "NOT_FOUND",
            Self::Forbidden(_) => "FORBIDDEN",
            Self::Unauthorized(_) => "UNAUTHORIZED",
            Self::Internal(_) => "INTERNAL_SERVER_ERROR",
        }
    }
}

impl From<rusqlite::Error> for ApiError {
    fn from(err: rusqlite::Error) -> Self {
        Self::Internal(anyhow::Error::new(err))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let code = self.code();

        let message = if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
            "Internal server error".to_string()
        } else {
            tracing::warn!("{}", self);
            self.to_string()
        };

        let body = ApiResponse::error(message, status.as_u16(), code);
        (status, Json(body)).into_response()
    }
}
