//! Data model shared by the processing, upload and execution layers

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::catalog::Dimensions;
use crate::classify::CreativeType;

/// Byte ceiling for every image category (standard, native, source).
pub const IMAGE_MAX_BYTES: u64 = 500 * 1024;

/// Byte ceiling for the native video variant.
pub const NATIVE_VIDEO_MAX_BYTES: u64 = 10 * 1024 * 1024;

/// A probed local file. Immutable; a normalization step that writes a new file
/// produces a new descriptor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetDescriptor {
    pub original_path: PathBuf,
    pub probed_width: u32,
    pub probed_height: u32,
    pub byte_size: u64,
}

impl AssetDescriptor {
    pub fn dimensions(&self) -> Dimensions {
        Dimensions::new(self.probed_width, self.probed_height)
    }
}

/// Result of normalizing one image file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizationReport {
    pub original_path: PathBuf,
    pub corrected_path: PathBuf,
    pub original_dimensions: Dimensions,
    pub corrected_dimensions: Dimensions,
    pub size_kb: f64,
    pub creative_type: CreativeType,
    pub was_retina: bool,
    pub was_compressed: bool,
    pub warnings: Vec<String>,
    pub upload_ready: bool,
}

/// Whether a final artifact fits its category ceiling.
pub fn is_upload_ready(size_bytes: u64, max_bytes: u64) -> bool {
    size_bytes <= max_bytes
}

/// Kilobytes rounded to one decimal, as shown to users.
pub fn size_kb(size_bytes: u64) -> f64 {
    (size_bytes as f64 / 1024.0 * 10.0).round() / 10.0
}

/// One entry of the scanned workspace, produced by the file-scanning
/// collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScannedFile {
    #[serde(alias = "rel_path")]
    pub relative_path: String,
    #[serde(alias = "abs_path")]
    pub absolute_path: PathBuf,
    #[serde(alias = "size_bytes")]
    pub byte_size: u64,
    #[serde(alias = "mime")]
    pub detected_mime: String,
}

impl ScannedFile {
    pub fn is_image(&self) -> bool {
        self.detected_mime.starts_with("image/")
    }

    pub fn is_video(&self) -> bool {
        self.detected_mime.starts_with("video/")
    }

    /// File name without extension.
    pub fn stem(&self) -> Option<&str> {
        std::path::Path::new(&self.relative_path)
            .file_stem()
            .and_then(|s| s.to_str())
    }
}

/// MIME type inferred from a file extension.
pub fn mime_for_path(path: &std::path::Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "mp4" | "m4v" => "video/mp4",
        "mov" => "video/quicktime",
        "webm" => "video/webm",
        _ => "application/octet-stream",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    #[test]
    fn test_upload_ready_boundary() {
        assert!(is_upload_ready(IMAGE_MAX_BYTES, IMAGE_MAX_BYTES));
        assert!(!is_upload_ready(IMAGE_MAX_BYTES + 1, IMAGE_MAX_BYTES));
        assert!(is_upload_ready(0, IMAGE_MAX_BYTES));
    }

    #[test]
    fn test_size_kb_rounding() {
        assert_eq!(size_kb(640 * 1024), 640.0);
        assert_eq!(size_kb(1536), 1.5);
        assert_eq!(size_kb(1100), 1.1);
    }

    #[test]
    fn test_mime_for_path() {
        assert_eq!(mime_for_path(Path::new("a/banner.JPG")), "image/jpeg");
        assert_eq!(mime_for_path(Path::new("clip.mp4")), "video/mp4");
        assert_eq!(mime_for_path(Path::new("noext")), "application/octet-stream");
    }

    #[test]
    fn test_scanned_file_accepts_short_field_names() {
        let file: ScannedFile = serde_json::from_value(serde_json::json!({
            "rel_path": "videos/promo.mp4",
            "abs_path": "/tmp/ws/videos/promo.mp4",
            "size_bytes": 1024,
            "mime": "video/mp4"
        }))
        .unwrap();
        assert!(file.is_video());
        assert!(!file.is_image());
        assert_eq!(file.stem(), Some("promo"));
    }
}
