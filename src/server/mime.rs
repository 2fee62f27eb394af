use std::path::Path;

pub const OCTET_STREAM: &str = "application/octet-stream";

/// Content type for a served file, chosen by extension.
pub fn content_type(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|ext| ext.to_str())
        .unwrap_or("")
        .to_lowercase();

    match ext.as_str() {
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "webp" => "image/webp",
        "bmp" => "image/bmp",
        "tiff" => "image/tiff",
        "gif" => "image/gif",
        "mp4" => "video/mp4",
        "mkv" => "video/x-matroska",
        _ => OCTET_STREAM,
    }
}
