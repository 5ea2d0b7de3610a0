//! Attachment file naming.

use sha2::{Digest, Sha256};

use crate::remote::Attachment;

/// Maximum length of a sanitized file name, in characters.
pub const MAX_FILENAME_CHARS: usize = 180;

/// First 12 hex characters of the SHA-256 of `value`.
#[must_use]
pub fn short_hash(value: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(value.as_bytes());
    let digest = hasher.finalize();

    digest
        .iter()
        .take(6)
        .map(|b| format!("{:02x}", b))
        .collect()
}

/// Last path segment of a URL, ignoring the query string.
#[must_use]
pub fn infer_name_from_url(url: &str) -> String {
    let path = url.split(['?', '#']).next().unwrap_or_default();
    match path.trim_end_matches('/').rsplit('/').next() {
        Some(segment) if !segment.is_empty() && !segment.contains(':') => segment.to_string(),
        _ => "attachment".to_string(),
    }
}

/// Make a declared attachment name safe for a flat media directory.
///
/// Falls back to the URL's last path segment when `name` is empty, and to
/// `attachment_<hash>` when nothing usable survives.
#[must_use]
pub fn sanitize_filename(name: &str, url: &str) -> String {
    let source = if name.is_empty() {
        infer_name_from_url(url)
    } else {
        name.to_string()
    };

    let mut cleaned = String::with_capacity(source.len());
    let mut in_run = false;
    for ch in source.chars() {
        let ch = if ch.is_whitespace() { '_' } else { ch };
        if ch.is_ascii_alphanumeric() || matches!(ch, '.' | '_' | '-') {
            cleaned.push(ch);
            in_run = false;
        } else if !in_run {
            cleaned.push('_');
            in_run = true;
        }
    }

    let trimmed = cleaned.trim_matches(|c| c == '.' || c == '_');
    if trimmed.is_empty() {
        return format!("attachment_{}", short_hash(url));
    }

    trimmed.chars().take(MAX_FILENAME_CHARS).collect()
}

/// Name of the cached copy: `<attachmentId>_<sanitizedFilename>`.
///
/// The attachment id falls back to the URL hash, so the name is stable across
/// runs and doubles as the dedup key.
#[must_use]
pub fn local_filename(attachment: &Attachment, sanitized: &str) -> String {
    let id = if attachment.id.is_empty() {
        short_hash(&attachment.url)
    } else {
        attachment.id.clone()
    };
    format!("{}_{}", id, sanitized)
}

/// Lowercased extension of a name or URL path, without the dot.
#[must_use]
pub fn extension_of(value: &str) -> Option<String> {
    let path = value.split(['?', '#']).next().unwrap_or_default();
    let last = path.rsplit('/').next().unwrap_or(path);
    let (stem, ext) = last.rsplit_once('.')?;
    if stem.is_empty() && last.starts_with('.') && !last[1..].contains('.') {
        return None;
    }
    if ext.is_empty() || !ext.chars().all(|c| c.is_ascii_alphanumeric()) {
        return None;
    }
    Some(ext.to_ascii_lowercase())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_hash_is_stable_and_short() {
        let a = short_hash("https://dl.example.com/a.png");
        assert_eq!(a.len(), 12);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(a, short_hash("https://dl.example.com/a.png"));
        assert_ne!(a, short_hash("https://dl.example.com/b.png"));
    }

    #[test]
    fn test_sanitize_replaces_unsafe_runs() {
        assert_eq!(sanitize_filename("map of a&&&b.JPG", ""), "map_of_a_b.JPG");
        assert_eq!(sanitize_filename("scan (1).png", ""), "scan__1_.png");
        assert_eq!(sanitize_filename("..hidden__", ""), "hidden");
        assert_eq!(sanitize_filename("report-v1.2.pdf", ""), "report-v1.2.pdf");
    }

    #[test]
    fn test_sanitize_falls_back_to_url_then_hash() {
        assert_eq!(
            sanitize_filename("", "https://dl.example.com/files/scan%201.png?x=1"),
            "scan_201.png"
        );

        let url = "https://dl.example.com/???";
        let name = sanitize_filename("***", url);
        assert_eq!(name, format!("attachment_{}", short_hash(url)));
    }

    #[test]
    fn test_sanitize_truncates() {
        let long = "a".repeat(400);
        assert_eq!(sanitize_filename(&long, "").chars().count(), MAX_FILENAME_CHARS);
    }

    #[test]
    fn test_infer_name_from_url() {
        assert_eq!(infer_name_from_url("https://x/y/z.pdf?dl=1"), "z.pdf");
        assert_eq!(infer_name_from_url("https://x/y/"), "y");
        assert_eq!(infer_name_from_url(""), "attachment");
    }

    #[test]
    fn test_local_filename_prefers_attachment_id() {
        let att = Attachment {
            id: "att123".to_string(),
            url: "https://x/a.png".to_string(),
            ..Attachment::default()
        };
        assert_eq!(local_filename(&att, "a.png"), "att123_a.png");

        let anonymous = Attachment {
            url: "https://x/a.png".to_string(),
            ..Attachment::default()
        };
        assert_eq!(
            local_filename(&anonymous, "a.png"),
            format!("{}_a.png", short_hash("https://x/a.png"))
        );
    }

    #[test]
    fn test_extension_of() {
        assert_eq!(extension_of("photo.JPEG").as_deref(), Some("jpeg"));
        assert_eq!(
            extension_of("https://x/files/doc.pdf?sig=abc").as_deref(),
            Some("pdf")
        );
        assert_eq!(extension_of("https://x/files/noext"), None);
        assert_eq!(extension_of(".env"), None);
    }
}
