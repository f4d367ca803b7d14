//! Mapping of core errors onto HTTP responses.

use axum::Json;
use axum::http::{HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use nuru_core::{ErrorKind, NuruError, RangeError};
use serde::Serialize;

/// JSON error body: `{ "error": ... }`.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    /// Human readable message
    pub error: String,
}

/// Error returned by every handler.
#[derive(Debug, thiserror::Error)]
#[error("{status}: {message}")]
pub struct ApiError {
    /// Response status
    pub status: StatusCode,
    /// Message placed in the body
    pub message: String,
    /// File length for `Content-Range: bytes */len` on 416
    pub unsatisfied_length: Option<u64>,
}

impl ApiError {
    /// Error with an explicit status and message.
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
            unsatisfied_length: None,
        }
    }

    /// 400 with the given message.
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    /// 404 for an unknown torrent.
    pub fn torrent_not_found() -> Self {
        Self::new(StatusCode::NOT_FOUND, "Torrent not found")
    }
}

impl From<NuruError> for ApiError {
    fn from(err: NuruError) -> Self {
        let status = match err.kind() {
            ErrorKind::NotFound => StatusCode::NOT_FOUND,
            ErrorKind::InvalidInput => StatusCode::BAD_REQUEST,
            ErrorKind::RangeUnsatisfiable => StatusCode::RANGE_NOT_SATISFIABLE,
            ErrorKind::StreamFailure | ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        };

        if status.is_server_error() {
            tracing::error!("Request failed: {err}");
        } else {
            tracing::debug!("Request rejected: {err}");
        }

        let unsatisfied_length = match &err {
            NuruError::Range(RangeError::Unsatisfiable { file_length, .. }) => Some(*file_length),
            _ => None,
        };

        Self {
            status,
            message: err.user_message(),
            unsatisfied_length,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let mut response = (
            self.status,
            Json(ErrorBody {
                error: self.message,
            }),
        )
            .into_response();

        if let Some(length) = self.unsatisfied_length
            && let Ok(value) = HeaderValue::from_str(&format!("bytes */{length}"))
        {
            response.headers_mut().insert(header::CONTENT_RANGE, value);
        }
        response
    }
}
