//! Content-type admission and file-extension resolution for downloaded images.

use url::Url;

// ── Constants ────────────────────────────────────────────────────────────────

/// Extension used when neither the content type nor the URL names an image format.
pub const FALLBACK_EXTENSION: &str = ".bin";

/// Accepted image media types and the canonical extension each one maps to.
const IMAGE_TYPES: &[(&str, &str)] = &[
    ("image/png", ".png"),
    ("image/jpeg", ".jpg"),
    ("image/jpg", ".jpg"),
    ("image/gif", ".gif"),
    ("image/webp", ".webp"),
    ("image/svg+xml", ".svg"),
    ("image/bmp", ".bmp"),
    ("image/tiff", ".tiff"),
    ("image/x-icon", ".ico"),
    ("image/vnd.microsoft.icon", ".ico"),
];

const URL_EXTENSIONS: &[&str] = &[
    ".png", ".jpg", ".jpeg", ".gif", ".webp", ".svg", ".bmp", ".tiff", ".ico",
];

// ── Error type ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ContentTypeError {
    #[error("content-type header is missing")]
    Missing,
    #[error("invalid content type for image: {0} (expected image/*)")]
    Unsupported(String),
}

// ── Public API ───────────────────────────────────────────────────────────────

/// Accepts the image media types the downloader is willing to keep.
///
/// Matching is case-insensitive and ignores `;`-delimited parameters, so
/// `IMAGE/PNG; charset=utf-8` is accepted as `image/png`.
pub fn validate_content_type(content_type: &str) -> Result<(), ContentTypeError> {
    if content_type.trim().is_empty() {
        return Err(ContentTypeError::Missing);
    }
    match lookup(content_type) {
        Some(_) => Ok(()),
        None => Err(ContentTypeError::Unsupported(content_type.to_string())),
    }
}

/// Canonical extension for an accepted content type, `.bin` for anything else.
pub fn extension_for_content_type(content_type: &str) -> &'static str {
    lookup(content_type).unwrap_or(FALLBACK_EXTENSION)
}

/// Recognised image extension from the URL path, lowercased.
///
/// Query string and fragment never contribute to the extension.
pub fn extension_from_url(url: &str) -> Option<&'static str> {
    if url.is_empty() {
        return None;
    }

    let path = match Url::parse(url) {
        Ok(parsed) => parsed.path().to_string(),
        Err(_) => url
            .split(['?', '#'])
            .next()
            .unwrap_or_default()
            .to_string(),
    };

    let file_name = path.rsplit('/').next().unwrap_or_default();
    let dot = file_name.rfind('.')?;
    let ext = file_name[dot..].to_lowercase();
    URL_EXTENSIONS.iter().copied().find(|known| *known == ext)
}

/// Extension to store a download under: content type first, then the URL, then `.bin`.
pub fn determine_extension(content_type: &str, url: &str) -> &'static str {
    lookup(content_type)
        .or_else(|| extension_from_url(url))
        .unwrap_or(FALLBACK_EXTENSION)
}

// ── Helpers ──────────────────────────────────────────────────────────────────

fn lookup(content_type: &str) -> Option<&'static str> {
    let essence = media_type_essence(content_type);
    IMAGE_TYPES
        .iter()
        .find(|(mime, _)| *mime == essence)
        .map(|(_, ext)| *ext)
}

/// Lowercased media type with parameters and surrounding whitespace removed.
fn media_type_essence(content_type: &str) -> String {
    content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_every_supported_image_type() {
        for (mime, _) in IMAGE_TYPES {
            assert!(validate_content_type(mime).is_ok(), "{mime} should be accepted");
        }
    }

    #[test]
    fn matching_ignores_case_parameters_and_whitespace() {
        assert!(validate_content_type("IMAGE/PNG").is_ok());
        assert!(validate_content_type("Image/Jpeg").is_ok());
        assert!(validate_content_type("image/png; charset=utf-8").is_ok());
        assert!(validate_content_type("image/jpeg; boundary=something").is_ok());
        assert!(validate_content_type("  image/png  ").is_ok());
        assert!(validate_content_type("image/png;").is_ok());
    }

    #[test]
    fn rejects_missing_and_non_image_types() {
        assert_eq!(validate_content_type(""), Err(ContentTypeError::Missing));
        for mime in [
            "text/plain",
            "text/html",
            "application/json",
            "application/pdf",
            "video/mp4",
            "audio/mp3",
        ] {
            let err = validate_content_type(mime).unwrap_err();
            assert!(err.to_string().contains("invalid content type"), "{err}");
        }
    }

    #[test]
    fn accepted_types_never_map_to_the_fallback_extension() {
        for (mime, ext) in IMAGE_TYPES {
            assert_eq!(extension_for_content_type(mime), *ext);
            assert_ne!(extension_for_content_type(mime), FALLBACK_EXTENSION);
        }
        assert_eq!(extension_for_content_type("IMAGE/PNG; charset=utf-8"), ".png");
    }

    #[test]
    fn unknown_types_map_to_bin() {
        assert_eq!(extension_for_content_type(""), ".bin");
        assert_eq!(extension_for_content_type("application/octet-stream"), ".bin");
        assert_eq!(extension_for_content_type("text/plain"), ".bin");
    }

    #[test]
    fn url_extension_ignores_query_and_fragment() {
        assert_eq!(extension_from_url("https://example.com/a/photo.PNG?size=large"), Some(".png"));
        assert_eq!(extension_from_url("https://example.com/photo.jpeg#top"), Some(".jpeg"));
        assert_eq!(extension_from_url("https://example.com/file.gif?x=1#y"), Some(".gif"));
        assert_eq!(extension_from_url("https://example.com/doc.pdf"), None);
        assert_eq!(extension_from_url("https://example.com/images/photo"), None);
        assert_eq!(extension_from_url("https://example.com/v1.2/photo"), None);
        assert_eq!(extension_from_url(""), None);
    }

    #[test]
    fn determine_extension_prefers_content_type_then_url() {
        assert_eq!(determine_extension("image/gif", "https://example.com/a.png"), ".gif");
        assert_eq!(
            determine_extension("application/octet-stream", "https://example.com/a.png"),
            ".png"
        );
        assert_eq!(determine_extension("", "https://example.com/a.webp?x=1"), ".webp");
        assert_eq!(determine_extension("", "https://example.com/a"), ".bin");
        assert_eq!(determine_extension("", ""), ".bin");
    }
}
