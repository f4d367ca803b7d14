//! HTTP request handlers organized by functionality

pub mod api;
pub mod streaming;
pub mod ws;

use nuru_core::InfoHash;
use nuru_core::session::resolve_info_hash;

use crate::error::ApiError;

/// Parses a path segment naming a session.
fn parse_info_hash(raw: &str) -> Result<InfoHash, ApiError> {
    resolve_info_hash(raw).map_err(ApiError::from)
}
