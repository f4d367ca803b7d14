//! File placement within a torrent's concatenated content.

use std::ops::RangeInclusive;
use std::path::Path;

use serde::Serialize;

/// Extensions treated as playable video when choosing the primary file.
const VIDEO_EXTENSIONS: &[&str] = &["mp4", "avi", "mkv", "mov", "wmv", "flv", "webm", "m4v"];
const AUDIO_EXTENSIONS: &[&str] = &["mp3", "wav", "flac", "aac", "ogg", "m4a"];
const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "gif", "bmp", "webp"];
const DOCUMENT_EXTENSIONS: &[&str] = &["pdf", "txt", "doc", "docx", "rtf"];

/// One file inside a torrent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FileDescriptor {
    /// Position in the torrent's file list
    pub index: usize,
    /// File name (last path component)
    pub name: String,
    /// Length in bytes
    pub length: u64,
    /// Byte offset of the first byte within the concatenated content
    pub offset: u64,
}

impl FileDescriptor {
    /// Lower-cased extension without the dot, if any.
    pub fn extension(&self) -> Option<String> {
        Path::new(&self.name)
            .extension()
            .and_then(|ext| ext.to_str())
            .map(str::to_ascii_lowercase)
    }

    /// Coarse media classification used by file listings.
    pub fn kind(&self) -> FileKind {
        FileKind::from_extension(self.extension().as_deref())
    }

    /// Piece window covering this file, `None` for empty files.
    pub fn piece_window(&self, piece_length: u32, piece_count: u32) -> Option<PieceWindow> {
        PieceWindow::for_extent(self.offset, self.length, piece_length, piece_count)
    }
}

/// Coarse file classification by extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FileKind {
    Video,
    Audio,
    Image,
    Document,
    Other,
}

impl FileKind {
    /// Classifies a lower-cased extension.
    pub fn from_extension(extension: Option<&str>) -> Self {
        let Some(ext) = extension else {
            return Self::Other;
        };

        if VIDEO_EXTENSIONS.contains(&ext) {
            Self::Video
        } else if AUDIO_EXTENSIONS.contains(&ext) {
            Self::Audio
        } else if IMAGE_EXTENSIONS.contains(&ext) {
            Self::Image
        } else if DOCUMENT_EXTENSIONS.contains(&ext) {
            Self::Document
        } else {
            Self::Other
        }
    }
}

/// Piece geometry and file list, known once the engine has metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentLayout {
    /// Fixed piece length in bytes (the last piece may be shorter)
    pub piece_length: u32,
    /// Number of pieces in the torrent
    pub piece_count: u32,
    /// Files in torrent order
    pub files: Vec<FileDescriptor>,
}

impl ContentLayout {
    /// Total content length across all files.
    pub fn total_length(&self) -> u64 {
        self.files.iter().map(|file| file.length).sum()
    }
}

/// Contiguous, inclusive range of pieces covering one file.
///
/// Derived on demand from a file's placement, which never changes for the
/// lifetime of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PieceWindow {
    pub start: u32,
    pub end: u32,
}

impl PieceWindow {
    /// Computes the window for a byte extent.
    ///
    /// Returns `None` for empty extents, a zero piece length, or an extent
    /// that starts beyond the piece table.
    pub fn for_extent(
        offset: u64,
        length: u64,
        piece_length: u32,
        piece_count: u32,
    ) -> Option<Self> {
        if length == 0 || piece_length == 0 || piece_count == 0 {
            return None;
        }

        let piece_length = u64::from(piece_length);
        let last_piece = u64::from(piece_count - 1);
        let start = offset / piece_length;
        if start > last_piece {
            return None;
        }
        let end = ((offset + length - 1) / piece_length).min(last_piece);

        Some(Self {
            start: start as u32,
            end: end as u32,
        })
    }

    /// Number of pieces in the window, never zero.
    pub fn piece_count(&self) -> u32 {
        self.end - self.start + 1
    }

    /// Whether `piece` lies inside the window.
    pub fn contains(&self, piece: u32) -> bool {
        (self.start..=self.end).contains(&piece)
    }

    /// The window as an inclusive range.
    pub fn as_range(&self) -> RangeInclusive<u32> {
        self.start..=self.end
    }
}

/// Picks the largest video file as the one to play.
pub fn select_primary_file(files: &[FileDescriptor]) -> Option<&FileDescriptor> {
    files
        .iter()
        .filter(|file| file.kind() == FileKind::Video)
        .max_by_key(|file| file.length)
}
