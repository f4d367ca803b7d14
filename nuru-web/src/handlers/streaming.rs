//! Range streaming handlers
//!
//! Headers are built from the resolved [`StreamResponse`]; the body is the
//! bounded channel fed by the core producer, so hyper only pulls chunks as
//! fast as the client drains them.

use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, HeaderName, StatusCode, header};
use axum::response::Response;
use nuru_core::streaming::{FileTarget, StreamResponse};

use super::parse_info_hash;
use crate::error::ApiError;
use crate::server::AppState;

/// Buffer health of the primary file at request time, two decimals.
pub const X_BUFFER_HEALTH: HeaderName = HeaderName::from_static("x-buffer-health");
/// Throughput-derived quality label at request time.
pub const X_ADAPTIVE_QUALITY: HeaderName = HeaderName::from_static("x-adaptive-quality");

/// Streams a session's primary video file.
///
/// # Errors
///
/// - 404 - Unknown session, metadata pending, or no video file
/// - 400 - Malformed range
/// - 416 - Range starts past the end of the file
/// - 500 - Engine could not open the read stream
pub async fn stream_primary(
    State(state): State<AppState>,
    Path(info_hash): Path<String>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let info_hash = parse_info_hash(&info_hash)?;
    let range = range_header(&headers)?;
    let stream = state
        .streaming
        .open(info_hash, FileTarget::Primary, range)
        .await?;
    build_response(stream)
}

/// Streams one file of a session by index.
///
/// # Errors
///
/// - 404 - Unknown session or file index
/// - 400 - Malformed range
/// - 416 - Range starts past the end of the file
/// - 500 - Engine could not open the read stream
pub async fn stream_file(
    State(state): State<AppState>,
    Path((info_hash, file_index)): Path<(String, String)>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let info_hash = parse_info_hash(&info_hash)?;
    let index = file_index
        .parse::<usize>()
        .map_err(|_| ApiError::new(StatusCode::NOT_FOUND, "File not found"))?;
    let range = range_header(&headers)?;
    let stream = state
        .streaming
        .open(info_hash, FileTarget::Index(index), range)
        .await?;
    build_response(stream)
}

fn range_header(headers: &HeaderMap) -> Result<Option<&str>, ApiError> {
    headers
        .get(header::RANGE)
        .map(|value| {
            value
                .to_str()
                .map_err(|_| ApiError::bad_request("Invalid range: header is not ASCII"))
        })
        .transpose()
}

fn build_response(stream: StreamResponse) -> Result<Response, ApiError> {
    let status = if stream.is_partial() {
        StatusCode::PARTIAL_CONTENT
    } else {
        StatusCode::OK
    };

    let mut builder = Response::builder()
        .status(status)
        .header(header::CONTENT_TYPE, stream.content_type.as_str())
        .header(header::ACCEPT_RANGES, "bytes")
        .header(header::CONTENT_LENGTH, stream.content_length());

    if let Some(content_range) = stream.content_range() {
        builder = builder.header(header::CONTENT_RANGE, content_range);
    }
    if let Some(advisory) = stream.advisory {
        builder = builder
            .header(X_BUFFER_HEALTH, advisory.buffer_health_header())
            .header(X_ADAPTIVE_QUALITY, advisory.quality.as_str());
    }
    if let Some(etag) = &stream.etag {
        builder = builder.header(header::ETAG, etag.as_str());
    }
    if let Some(cache_control) = stream.cache_control {
        builder = builder.header(header::CACHE_CONTROL, cache_control);
    }

    let info_hash = stream.info_hash;
    builder.body(Body::from_stream(stream.body)).map_err(|e| {
        tracing::error!(%info_hash, "Failed to build stream response: {e}");
        ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, "Streaming error occurred")
    })
}
