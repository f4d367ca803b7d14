//! Content type lookup for streamed files.

/// Types browsers need exactly; anything else falls through to `mime_guess`.
const KNOWN_TYPES: &[(&str, &str)] = &[
    ("mp4", "video/mp4"),
    ("avi", "video/x-msvideo"),
    ("mkv", "video/x-matroska"),
    ("mov", "video/quicktime"),
    ("wmv", "video/x-ms-wmv"),
    ("flv", "video/x-flv"),
    ("webm", "video/webm"),
    ("m4v", "video/x-m4v"),
    ("mp3", "audio/mpeg"),
    ("wav", "audio/wav"),
    ("flac", "audio/flac"),
    ("aac", "audio/aac"),
    ("ogg", "audio/ogg"),
    ("m4a", "audio/mp4"),
    ("jpg", "image/jpeg"),
    ("jpeg", "image/jpeg"),
    ("png", "image/png"),
    ("gif", "image/gif"),
    ("bmp", "image/bmp"),
    ("webp", "image/webp"),
    ("pdf", "application/pdf"),
    ("txt", "text/plain"),
    ("doc", "application/msword"),
    (
        "docx",
        "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
    ),
    ("rtf", "application/rtf"),
];

pub const FALLBACK_CONTENT_TYPE: &str = "application/octet-stream";

/// Content type for a file name.
pub fn content_type_for(file_name: &str) -> String {
    let extension = std::path::Path::new(file_name)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(str::to_ascii_lowercase);

    let known = extension
        .as_deref()
        .and_then(|extension| KNOWN_TYPES.iter().find(|(ext, _)| *ext == extension));
    if let Some((_, mime)) = known {
        return (*mime).to_string();
    }

    mime_guess::from_path(file_name)
        .first_raw()
        .unwrap_or(FALLBACK_CONTENT_TYPE)
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_table_wins() {
        assert_eq!(content_type_for("Movie.MKV"), "video/x-matroska");
        assert_eq!(content_type_for("clip.avi"), "video/x-msvideo");
        assert_eq!(content_type_for("cover.jpeg"), "image/jpeg");
        assert_eq!(
            content_type_for("notes.docx"),
            "application/vnd.openxmlformats-officedocument.wordprocessingml.document"
        );
    }

    #[test]
    fn test_mime_guess_then_fallback() {
        assert_eq!(content_type_for("index.html"), "text/html");
        assert_eq!(content_type_for("blob.nurux"), FALLBACK_CONTENT_TYPE);
        assert_eq!(content_type_for("README"), FALLBACK_CONTENT_TYPE);
    }
}
