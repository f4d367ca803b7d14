//! Byte-range streaming of torrent files
//!
//! Requests are resolved against a session's file list, the engine opens a
//! read stream over the requested bytes, and a bounded producer feeds the
//! response body so a slow client holds back the engine reader instead of
//! growing a buffer.

pub mod content_type;
pub mod pump;
pub mod range;
pub mod service;

pub use content_type::content_type_for;
pub use pump::{BodyStream, OpenStreams};
pub use range::{ByteRange, RangeError, RangeSpec, parse_range_header, resolve_range};
pub use service::{Advisory, FileTarget, StreamResponse, StreamingService};
