//! Extension repair based on magic headers.
//!
//! Upstream services mislabel or drop extensions, so the bytes win over the
//! claimed filename whenever a signature is recognized.

use std::path::Path;

use tracing::warn;

/// Bytes needed to recognize every signature in the table.
pub const SNIFF_LEN: usize = 16;

/// Longest extension taken from a claimed filename when the bytes are not
/// recognized.
pub const MAX_CLAIMED_EXT_LEN: usize = 16;

/// File types with a recognizable header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetectedType {
    Jpeg,
    Png,
    Gif,
    Webp,
    Bmp,
    Tiff,
    Mp4,
    QuickTime,
    Webm,
    Pdf,
}

impl DetectedType {
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        match bytes {
            [0xff, 0xd8, 0xff, ..] => Some(Self::Jpeg),
            [0x89, 0x50, 0x4e, 0x47, 0x0d, 0x0a, 0x1a, 0x0a, ..] => Some(Self::Png),
            [b'G', b'I', b'F', b'8', b'7' | b'9', b'a', ..] => Some(Self::Gif),
            [b'R', b'I', b'F', b'F', _, _, _, _, b'W', b'E', b'B', b'P', ..] => Some(Self::Webp),
            [b'B', b'M', _, _, _, _, 0, 0, 0, 0, ..] => Some(Self::Bmp),
            [b'I', b'I', 0x2a, 0x00, ..] | [b'M', b'M', 0x00, 0x2a, ..] => Some(Self::Tiff),
            [_, _, _, _, b'f', b't', b'y', b'p', b'q', b't', b' ', b' ', ..] => {
                Some(Self::QuickTime)
            }
            [_, _, _, _, b'f', b't', b'y', b'p', ..] => Some(Self::Mp4),
            [0x1a, 0x45, 0xdf, 0xa3, ..] => Some(Self::Webm),
            [b'%', b'P', b'D', b'F', b'-', ..] => Some(Self::Pdf),
            _ => None,
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            Self::Jpeg => ".jpg",
            Self::Png => ".png",
            Self::Gif => ".gif",
            Self::Webp => ".webp",
            Self::Bmp => ".bmp",
            Self::Tiff => ".tiff",
            Self::Mp4 => ".mp4",
            Self::QuickTime => ".mov",
            Self::Webm => ".webm",
            Self::Pdf => ".pdf",
        }
    }
}

/// Canonical spelling of an extension: lowercase, leading dot, legacy
/// aliases folded (`.jpeg` becomes `.jpg`).
pub fn normalize_extension(ext: &str) -> String {
    let lower = ext.trim_start_matches('.').to_ascii_lowercase();
    match lower.as_str() {
        "" => String::new(),
        "jpeg" | "jpe" => ".jpg".to_string(),
        "tif" => ".tiff".to_string(),
        _ => format!(".{lower}"),
    }
}

/// Extension implied by a filename, normalized. Anything longer than
/// [`MAX_CLAIMED_EXT_LEN`] or not ASCII alphanumeric is dropped, since it
/// ends up in the stored file name.
pub fn claimed_extension(claimed_filename: &str) -> String {
    Path::new(claimed_filename)
        .extension()
        .and_then(|ext| ext.to_str())
        .filter(|ext| {
            ext.len() <= MAX_CLAIMED_EXT_LEN && ext.bytes().all(|b| b.is_ascii_alphanumeric())
        })
        .map(normalize_extension)
        .unwrap_or_default()
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ExtensionResolver;

impl ExtensionResolver {
    pub fn new() -> Self {
        Self
    }

    /// Returns the extension (with leading dot, or "") to store a payload
    /// under. `header` only needs the first [`SNIFF_LEN`] bytes.
    pub fn resolve(&self, claimed_filename: &str, header: Option<&[u8]>) -> String {
        let claimed = claimed_extension(claimed_filename);
        let Some(detected) = header.and_then(DetectedType::from_bytes) else {
            return claimed;
        };

        let detected_ext = detected.extension();
        if claimed != detected_ext {
            warn!(
                filename = claimed_filename,
                claimed = %claimed,
                detected = detected_ext,
                "Extension does not match content, using detected type"
            );
        }
        detected_ext.to_string()
    }
}
