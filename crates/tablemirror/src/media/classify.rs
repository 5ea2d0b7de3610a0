//! Attachment classification.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use super::error::MediaError;
use super::filename::extension_of;
use crate::remote::Attachment;

const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "webp", "gif", "bmp", "svg", "avif"];
const PDF_EXTENSIONS: &[&str] = &["pdf"];

/// Extensions that are never mirrored, cached or linked.
const BLOCKED_EXTENSIONS: &[&str] = &["tif", "tiff"];

/// Coarse attachment class used for cache selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum AttachmentKind {
    Image,
    Pdf,
    File,
}

impl AttachmentKind {
    pub const ALL: [AttachmentKind; 3] =
        [AttachmentKind::Image, AttachmentKind::Pdf, AttachmentKind::File];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            AttachmentKind::Image => "image",
            AttachmentKind::Pdf => "pdf",
            AttachmentKind::File => "file",
        }
    }
}

impl fmt::Display for AttachmentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AttachmentKind {
    type Err = MediaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "image" => Ok(AttachmentKind::Image),
            "pdf" => Ok(AttachmentKind::Pdf),
            "file" => Ok(AttachmentKind::File),
            other => Err(MediaError::InvalidMediaType(other.to_string())),
        }
    }
}

type Rule = fn(&Attachment) -> Option<AttachmentKind>;

/// Classification rules, tried in order; the first match wins.
const RULES: &[Rule] = &[by_mime_type, by_preview, by_filename_extension, by_url_extension];

/// Classify an attachment. Anything no rule recognizes is a plain file.
#[must_use]
pub fn classify(attachment: &Attachment) -> AttachmentKind {
    RULES
        .iter()
        .find_map(|rule| rule(attachment))
        .unwrap_or(AttachmentKind::File)
}

fn by_mime_type(attachment: &Attachment) -> Option<AttachmentKind> {
    let mime = attachment.mime_type.as_deref()?.trim().to_ascii_lowercase();
    if mime.starts_with("image/") {
        Some(AttachmentKind::Image)
    } else if mime == "application/pdf" {
        Some(AttachmentKind::Pdf)
    } else {
        None
    }
}

fn by_preview(attachment: &Attachment) -> Option<AttachmentKind> {
    attachment.has_preview().then_some(AttachmentKind::Image)
}

fn by_filename_extension(attachment: &Attachment) -> Option<AttachmentKind> {
    kind_for_extension(&extension_of(&attachment.filename)?)
}

fn by_url_extension(attachment: &Attachment) -> Option<AttachmentKind> {
    kind_for_extension(&extension_of(&attachment.url)?)
}

fn kind_for_extension(ext: &str) -> Option<AttachmentKind> {
    if IMAGE_EXTENSIONS.contains(&ext) {
        Some(AttachmentKind::Image)
    } else if PDF_EXTENSIONS.contains(&ext) {
        Some(AttachmentKind::Pdf)
    } else {
        None
    }
}

/// Whether the attachment's name or URL carries a blocked extension.
#[must_use]
pub fn is_blocked(attachment: &Attachment, sanitized: &str) -> bool {
    [sanitized, attachment.filename.as_str(), attachment.url.as_str()]
        .into_iter()
        .filter_map(extension_of)
        .any(|ext| BLOCKED_EXTENSIONS.contains(&ext.as_str()))
}

/// Which attachment classes are cached locally.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaTypeSelection {
    kinds: BTreeSet<AttachmentKind>,
}

impl Default for MediaTypeSelection {
    fn default() -> Self {
        Self::all()
    }
}

impl MediaTypeSelection {
    /// Select every class.
    #[must_use]
    pub fn all() -> Self {
        Self {
            kinds: AttachmentKind::ALL.into_iter().collect(),
        }
    }

    /// Parse a comma-separated list such as `image,pdf`.
    ///
    /// An empty or blank value selects every class.
    pub fn parse(raw: &str) -> Result<Self, MediaError> {
        let kinds = raw
            .split(',')
            .map(str::trim)
            .filter(|part| !part.is_empty())
            .map(str::parse)
            .collect::<Result<BTreeSet<AttachmentKind>, _>>()?;

        if kinds.is_empty() {
            Ok(Self::all())
        } else {
            Ok(Self { kinds })
        }
    }

    #[must_use]
    pub fn contains(&self, kind: AttachmentKind) -> bool {
        self.kinds.contains(&kind)
    }
}

impl FromStr for MediaTypeSelection {
    type Err = MediaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for MediaTypeSelection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = self.kinds.iter().map(|k| k.as_str()).collect();
        f.write_str(&names.join(","))
    }
}
