//! Content-type inference from file extensions

use std::path::Path;

/// Used when neither the extension nor the caller knows better
pub const GENERIC_BINARY: &str = "application/octet-stream";

/// Media type for a known extension (case-insensitive)
pub fn media_type_for_extension(extension: &str) -> Option<&'static str> {
    let media_type = match extension.to_ascii_lowercase().as_str() {
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "mp4" => "video/mp4",
        "mov" => "video/quicktime",
        "avi" => "video/x-msvideo",
        "webm" => "video/webm",
        _ => return None,
    };
    Some(media_type)
}

/// Infer the media type of `path`.
///
/// Falls back to `supplied` (whatever the file picker reported), then to
/// [`GENERIC_BINARY`].
pub fn infer_media_type(path: &Path, supplied: Option<&str>) -> String {
    path.extension()
        .and_then(|ext| ext.to_str())
        .and_then(media_type_for_extension)
        .map(str::to_string)
        .or_else(|| {
            supplied
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
        })
        .unwrap_or_else(|| GENERIC_BINARY.to_string())
}
