//! Range-aware streaming of session files.

use std::sync::Arc;

use crate::config::StreamingConfig;
use crate::health::{BufferHealthEstimator, QualityLabel};
use crate::session::{Session, SessionRegistry};
use crate::streaming::content_type::content_type_for;
use crate::streaming::pump::{self, BodyStream, OpenStreams, PumpLimits};
use crate::streaming::range::{ByteRange, resolve_range};
use crate::torrent::{FileDescriptor, InfoHash};
use crate::{NuruError, Result};

pub const PRIMARY_CACHE_CONTROL: &str = "public, max-age=3600";

/// Which file of a session to stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileTarget {
    /// The largest video file
    Primary,
    Index(usize),
}

/// Playback hints attached to primary-file responses.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Advisory {
    pub buffer_health: f64,
    pub quality: QualityLabel,
}

impl Advisory {
    /// `X-Buffer-Health` header value.
    pub fn buffer_health_header(&self) -> String {
        format!("{:.2}", self.buffer_health)
    }
}

/// Everything a transport needs to answer a stream request.
pub struct StreamResponse {
    pub info_hash: InfoHash,
    pub file_name: String,
    pub file_length: u64,
    /// Bounds of a partial response; `None` serves the whole file
    pub range: Option<ByteRange>,
    pub content_type: String,
    pub advisory: Option<Advisory>,
    pub etag: Option<String>,
    pub cache_control: Option<&'static str>,
    pub body: BodyStream,
}

impl std::fmt::Debug for StreamResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamResponse")
            .field("info_hash", &self.info_hash)
            .field("file_name", &self.file_name)
            .field("file_length", &self.file_length)
            .field("range", &self.range)
            .field("content_type", &self.content_type)
            .finish_non_exhaustive()
    }
}

impl StreamResponse {
    pub fn is_partial(&self) -> bool {
        self.range.is_some()
    }

    pub fn content_length(&self) -> u64 {
        self.range.map_or(self.file_length, |range| range.length())
    }

    pub fn content_range(&self) -> Option<String> {
        self.range
            .map(|range| range.content_range(self.file_length))
    }
}

/// Opens backpressured byte streams over session files.
#[derive(Debug, Clone)]
pub struct StreamingService {
    registry: Arc<SessionRegistry>,
    config: StreamingConfig,
    estimator: BufferHealthEstimator,
    open_streams: OpenStreams,
}

impl StreamingService {
    pub fn new(registry: Arc<SessionRegistry>, config: StreamingConfig) -> Self {
        Self {
            registry,
            config,
            estimator: BufferHealthEstimator,
            open_streams: OpenStreams::new(),
        }
    }

    /// Number of response bodies still being produced.
    pub fn open_streams(&self) -> usize {
        self.open_streams.count()
    }

    /// Resolves the target file and range and starts the producer.
    ///
    /// # Errors
    ///
    /// - `NuruError::SessionNotFound` - Unknown or closing session
    /// - `NuruError::MetadataPending` - File list not known yet
    /// - `NuruError::NoPlayableFile` - Primary requested but no video present
    /// - `NuruError::FileNotFound` - Index out of range
    /// - `NuruError::Range` - Unparseable or unsatisfiable range
    /// - `NuruError::StreamFailure` - Engine refused to open the read stream
    pub async fn open(
        &self,
        info_hash: InfoHash,
        target: FileTarget,
        range_header: Option<&str>,
    ) -> Result<StreamResponse> {
        let session = self
            .registry
            .with_active(&info_hash, Session::clone)
            .ok_or_else(|| NuruError::session_not_found(info_hash))?;
        let file = select_file(&session, target)?;

        let range = resolve_range(range_header, file.length)?;
        let bounds = range.or_else(|| ByteRange::full(file.length));

        let body = match bounds {
            Some(bounds) => {
                let source = session
                    .torrent
                    .open_read_stream(file.index, bounds.as_range())
                    .await
                    .map_err(|e| {
                        tracing::error!(%info_hash, file = %file.name, "Failed to open read stream: {e}");
                        NuruError::StreamFailure {
                            reason: e.to_string(),
                        }
                    })?;
                pump::spawn_pump(
                    info_hash,
                    source,
                    PumpLimits {
                        chunk_size: self.config.chunk_size,
                        channel_capacity: self.config.channel_capacity,
                    },
                    session.streams.child_token(),
                    self.open_streams.track(),
                )
            }
            None => pump::empty_body(),
        };

        tracing::debug!(
            %info_hash,
            file = %file.name,
            start = bounds.map(|b| b.start),
            end = bounds.map(|b| b.end),
            partial = range.is_some(),
            "Stream opened"
        );

        let primary = target == FileTarget::Primary;
        let advisory = primary.then(|| Advisory {
            buffer_health: self
                .estimator
                .measure(session.torrent.as_ref(), session.primary_window()),
            quality: session.metrics.quality,
        });
        let etag = primary.then(|| match range {
            Some(range) => format!("\"{info_hash}-{}-{}\"", range.start, range.end),
            None => format!("\"{info_hash}-full\""),
        });

        Ok(StreamResponse {
            info_hash,
            content_type: content_type_for(&file.name),
            file_name: file.name,
            file_length: file.length,
            range,
            advisory,
            etag,
            cache_control: primary.then_some(PRIMARY_CACHE_CONTROL),
            body,
        })
    }
}

fn select_file(session: &Session, target: FileTarget) -> Result<FileDescriptor> {
    let info_hash = session.info_hash;
    if session.layout.is_none() {
        return Err(NuruError::MetadataPending { info_hash });
    }

    match target {
        FileTarget::Primary => session
            .primary_file
            .clone()
            .ok_or(NuruError::NoPlayableFile { info_hash }),
        FileTarget::Index(index) => session
            .file(index)
            .cloned()
            .ok_or(NuruError::FileNotFound { info_hash, index }),
    }
}
