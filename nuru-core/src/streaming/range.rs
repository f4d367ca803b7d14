//! HTTP range request parsing
//!
//! Accepts the three single-range forms of RFC 7233 (`bytes=start-end`,
//! `bytes=start-` and `bytes=-suffix`) and resolves them against a file
//! length into inclusive byte bounds.

use std::ops::RangeInclusive;

/// Errors that occur while parsing or resolving a `Range` header.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RangeError {
    #[error("malformed range header: {reason}")]
    Malformed { reason: String },

    #[error("multiple ranges are not supported")]
    MultipleRanges,

    #[error("range end {end} is before start {start}")]
    Inverted { start: u64, end: u64 },

    #[error("range start {start} is beyond file length {file_length}")]
    Unsatisfiable { start: u64, file_length: u64 },
}

impl RangeError {
    fn malformed(reason: impl Into<String>) -> Self {
        RangeError::Malformed {
            reason: reason.into(),
        }
    }
}

/// A parsed but unresolved byte range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RangeSpec {
    /// `bytes=start-end`, end possibly past the file
    Bounded { start: u64, end: u64 },
    /// `bytes=start-`
    From { start: u64 },
    /// `bytes=-length`, the final `length` bytes
    Suffix { length: u64 },
}

/// Inclusive byte bounds within one file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
    pub start: u64,
    pub end: u64,
}

impl ByteRange {
    /// The whole file; `None` for an empty file.
    pub fn full(file_length: u64) -> Option<Self> {
        (file_length > 0).then(|| Self {
            start: 0,
            end: file_length - 1,
        })
    }

    /// Number of bytes covered; never zero.
    pub fn length(&self) -> u64 {
        self.end - self.start + 1
    }

    pub fn as_range(&self) -> RangeInclusive<u64> {
        self.start..=self.end
    }

    /// `Content-Range` value for a partial response.
    pub fn content_range(&self, file_length: u64) -> String {
        format!("bytes {}-{}/{}", self.start, self.end, file_length)
    }
}

/// Parses a `Range` header value.
///
/// # Errors
///
/// - `RangeError::Malformed` - Wrong unit or unparseable bounds
/// - `RangeError::MultipleRanges` - More than one range requested
/// - `RangeError::Inverted` - End before start
pub fn parse_range_header(value: &str) -> Result<RangeSpec, RangeError> {
    let value = value.trim();
    let Some(ranges) = value.strip_prefix("bytes=") else {
        return Err(RangeError::malformed("expected bytes unit"));
    };
    if ranges.contains(',') {
        return Err(RangeError::MultipleRanges);
    }

    let Some((start, end)) = ranges.trim().split_once('-') else {
        return Err(RangeError::malformed("missing '-'"));
    };
    let (start, end) = (start.trim(), end.trim());

    match (start.is_empty(), end.is_empty()) {
        (true, true) => Err(RangeError::malformed("empty range")),
        (true, false) => Ok(RangeSpec::Suffix {
            length: parse_bound(end)?,
        }),
        (false, true) => Ok(RangeSpec::From {
            start: parse_bound(start)?,
        }),
        (false, false) => {
            let start = parse_bound(start)?;
            let end = parse_bound(end)?;
            if end < start {
                return Err(RangeError::Inverted { start, end });
            }
            Ok(RangeSpec::Bounded { start, end })
        }
    }
}

fn parse_bound(raw: &str) -> Result<u64, RangeError> {
    if !raw.bytes().all(|b| b.is_ascii_digit()) {
        return Err(RangeError::malformed(format!("invalid bound '{raw}'")));
    }
    raw.parse::<u64>()
        .map_err(|e| RangeError::malformed(format!("invalid bound '{raw}': {e}")))
}

impl RangeSpec {
    /// Resolves against a file length, clamping the end to the last byte.
    ///
    /// # Errors
    ///
    /// - `RangeError::Unsatisfiable` - Start at or past the end of the file,
    ///   or a zero-length suffix
    pub fn resolve(self, file_length: u64) -> Result<ByteRange, RangeError> {
        let (start, end) = match self {
            RangeSpec::Bounded { start, end } => (start, end),
            RangeSpec::From { start } => (start, u64::MAX),
            RangeSpec::Suffix { length } => {
                if length == 0 {
                    return Err(RangeError::Unsatisfiable {
                        start: file_length,
                        file_length,
                    });
                }
                (file_length.saturating_sub(length), u64::MAX)
            }
        };

        if start >= file_length {
            return Err(RangeError::Unsatisfiable { start, file_length });
        }
        Ok(ByteRange {
            start,
            end: end.min(file_length - 1),
        })
    }
}

/// Parses and resolves an optional header in one go.
///
/// `Ok(None)` means no header: serve the full file.
///
/// # Errors
///
/// Any [`RangeError`] from parsing or resolution.
pub fn resolve_range(
    header: Option<&str>,
    file_length: u64,
) -> Result<Option<ByteRange>, RangeError> {
    header
        .map(|value| parse_range_header(value)?.resolve(file_length))
        .transpose()
}
