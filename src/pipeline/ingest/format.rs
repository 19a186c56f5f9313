use std::path::Path;

/// Media types the pipeline accepts.
pub const ACCEPTED_MEDIA_TYPES: &[&str] = &[
    "image/jpeg",
    "image/png",
    "image/gif",
    "image/bmp",
    "image/tiff",
    "application/pdf",
];

/// Declared types that say nothing about the content.
const GENERIC_MEDIA_TYPES: &[&str] = &["", "application/octet-stream", "binary/octet-stream"];

pub fn is_accepted(media_type: &str) -> bool {
    ACCEPTED_MEDIA_TYPES.contains(&media_type)
}

/// Resolve the media type to validate against.
///
/// A specific declared type is trusted as-is. A missing or generic one is
/// filled in from magic bytes, then from the file extension.
pub fn resolve_media_type(declared: &str, name: &str, bytes: &[u8]) -> String {
    let declared = declared.trim().to_ascii_lowercase();
    if !GENERIC_MEDIA_TYPES.contains(&declared.as_str()) {
        return declared;
    }

    if let Some(sniffed) = sniff_media_type(bytes) {
        return sniffed.to_string();
    }

    mime_guess::from_path(name)
        .first_raw()
        .map(str::to_string)
        .unwrap_or(declared)
}

/// Detect an accepted format from magic bytes.
pub fn sniff_media_type(bytes: &[u8]) -> Option<&'static str> {
    match bytes {
        [0x25, 0x50, 0x44, 0x46, ..] => Some("application/pdf"),
        [0xFF, 0xD8, 0xFF, ..] => Some("image/jpeg"),
        [0x89, 0x50, 0x4E, 0x47, ..] => Some("image/png"),
        [0x47, 0x49, 0x46, 0x38, ..] => Some("image/gif"),
        [0x42, 0x4D, ..] => Some("image/bmp"),
        [0x49, 0x49, 0x2A, 0x00, ..] | [0x4D, 0x4D, 0x00, 0x2A, ..] => Some("image/tiff"),
        _ => None,
    }
}

/// Sanitize a display name: strip path components, limit length.
pub fn sanitize_filename(original: &str) -> String {
    let name = Path::new(original)
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("document");

    let clean: String = name
        .chars()
        .filter(|c| !matches!(c, '/' | '\\' | '\0'))
        .take(255)
        .collect();

    if clean.trim().is_empty() {
        "document".to_string()
    } else {
        clean
    }
}
