//! Size classification against the accepted catalogs

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::catalog::{self, SizeCatalogEntry, SizeCategory};

/// Pixel slack allowed when matching a retina multiple. Absorbs rounding
/// introduced by exporters and compressors.
pub const RETINA_TOLERANCE_PX: i64 = 5;

/// Scales checked for retina oversizing, smallest first.
pub const RETINA_SCALES: [u32; 3] = [2, 3, 4];

/// Minimum width and height for an off-catalog image to be usable as
/// letterbox source material.
pub const SOURCE_MIN_SIDE: u32 = 640;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CreativeType {
    Image,
    Native,
    ImageSource,
    Unknown,
}

impl CreativeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            CreativeType::Image => "IMAGE",
            CreativeType::Native => "NATIVE",
            CreativeType::ImageSource => "IMAGE_SOURCE",
            CreativeType::Unknown => "UNKNOWN",
        }
    }

    /// Standard or native catalog size, as opposed to raw source material.
    pub fn is_catalog_size(&self) -> bool {
        matches!(self, CreativeType::Image | CreativeType::Native)
    }
}

impl fmt::Display for CreativeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<SizeCategory> for CreativeType {
    fn from(category: SizeCategory) -> Self {
        match category {
            SizeCategory::Image => CreativeType::Image,
            SizeCategory::Native => CreativeType::Native,
        }
    }
}

/// A retina match: the catalog entry the asset is an integer multiple of.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetinaMatch {
    pub entry: &'static SizeCatalogEntry,
    pub scale: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassificationResult {
    pub creative_type: CreativeType,
    pub corrected_width: u32,
    pub corrected_height: u32,
    pub was_retina: bool,
    pub retina_scale: Option<u32>,
}

/// Find the first catalog entry the dimensions are a 2x/3x/4x multiple of.
///
/// Iterates scales ascending and, within a scale, the standard catalog then
/// the native catalog, so the smallest matching scale wins.
pub fn detect_retina(width: u32, height: u32) -> Option<RetinaMatch> {
    let (w, h) = (i64::from(width), i64::from(height));
    RETINA_SCALES.iter().find_map(|&scale| {
        let s = i64::from(scale);
        catalog::all_sizes()
            .find(|entry| {
                (w - s * i64::from(entry.width)).abs() <= RETINA_TOLERANCE_PX
                    && (h - s * i64::from(entry.height)).abs() <= RETINA_TOLERANCE_PX
            })
            .map(|entry| RetinaMatch { entry, scale })
    })
}

/// Classify probed dimensions.
///
/// A `(0, 0)` probe lands in `Unknown` through the ordinary source threshold:
/// unreadable files are never treated as source material.
pub fn classify(width: u32, height: u32) -> ClassificationResult {
    if let Some(retina) = detect_retina(width, height) {
        return ClassificationResult {
            creative_type: retina.entry.category.into(),
            corrected_width: retina.entry.width,
            corrected_height: retina.entry.height,
            was_retina: true,
            retina_scale: Some(retina.scale),
        };
    }

    ClassificationResult {
        creative_type: classify_exact(width, height),
        corrected_width: width,
        corrected_height: height,
        was_retina: false,
        retina_scale: None,
    }
}

/// Classification without retina detection, used after a correction step.
pub fn classify_exact(width: u32, height: u32) -> CreativeType {
    if catalog::is_standard_size(width, height) {
        CreativeType::Image
    } else if catalog::is_native_size(width, height) {
        CreativeType::Native
    } else if width >= SOURCE_MIN_SIDE && height >= SOURCE_MIN_SIDE {
        CreativeType::ImageSource
    } else {
        CreativeType::Unknown
    }
}
