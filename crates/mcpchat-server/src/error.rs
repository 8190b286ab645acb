//! HTTP error responses.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use mcpchat_core::{ChatError, StoreError};
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum HttpError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl HttpError {
    pub fn status(&self) -> StatusCode {
        match self {
            HttpError::NotFound(_) => StatusCode::NOT_FOUND,
            HttpError::BadRequest(_) => StatusCode::BAD_REQUEST,
            HttpError::Conflict(_) => StatusCode::CONFLICT,
            HttpError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
    status: u16,
}

impl IntoResponse for HttpError {
    fn into_response(self) -> Response {
        let status = self.status();
        let error = match self {
            HttpError::NotFound(msg)
            | HttpError::BadRequest(msg)
            | HttpError::Conflict(msg)
            | HttpError::Internal(msg) => msg,
        };
        let body = ErrorBody {
            error,
            status: status.as_u16(),
        };
        (status, Json(body)).into_response()
    }
}

impl From<StoreError> for HttpError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Invalid(msg) => HttpError::BadRequest(msg),
            err @ StoreError::AlreadyExists { .. } => HttpError::Conflict(err.to_string()),
        }
    }
}

impl From<ChatError> for HttpError {
    fn from(err: ChatError) -> Self {
        match err {
            ChatError::NotFound { .. } => HttpError::NotFound(err.to_string()),
            ChatError::Config(_) => HttpError::BadRequest(err.to_string()),
            ChatError::Store(store) => store.into(),
            other => HttpError::Internal(other.to_string()),
        }
    }
}
