//! Accepted creative sizes
//!
//! The advertising platform accepts a fixed set of standard IMAGE sizes and a
//! second set of NATIVE sizes. Both catalogs are static and read-only.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Category a catalog size belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SizeCategory {
    Image,
    Native,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SizeCatalogEntry {
    pub width: u32,
    pub height: u32,
    pub label: &'static str,
    pub category: SizeCategory,
}

impl SizeCatalogEntry {
    const fn new(width: u32, height: u32, label: &'static str, category: SizeCategory) -> Self {
        Self {
            width,
            height,
            label,
            category,
        }
    }

    pub fn dimensions(&self) -> Dimensions {
        Dimensions::new(self.width, self.height)
    }
}

/// Width × height pair in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Dimensions {
    pub width: u32,
    pub height: u32,
}

impl Dimensions {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn is_zero(&self) -> bool {
        self.width == 0 && self.height == 0
    }
}

impl fmt::Display for Dimensions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

impl From<(u32, u32)> for Dimensions {
    fn from((width, height): (u32, u32)) -> Self {
        Self { width, height }
    }
}

pub const STANDARD_SIZES: [SizeCatalogEntry; 9] = [
    SizeCatalogEntry::new(300, 250, "Medium Rectangle", SizeCategory::Image),
    SizeCatalogEntry::new(320, 480, "Portrait Interstitial", SizeCategory::Image),
    SizeCatalogEntry::new(320, 50, "Mobile Banner", SizeCategory::Image),
    SizeCatalogEntry::new(728, 90, "Leaderboard", SizeCategory::Image),
    SizeCatalogEntry::new(480, 320, "Landscape Interstitial", SizeCategory::Image),
    SizeCatalogEntry::new(768, 1024, "Tablet Portrait", SizeCategory::Image),
    SizeCatalogEntry::new(1024, 768, "Tablet Landscape", SizeCategory::Image),
    SizeCatalogEntry::new(300, 50, "Mobile Banner Small", SizeCategory::Image),
    SizeCatalogEntry::new(468, 60, "Banner", SizeCategory::Image),
];

pub const NATIVE_SIZES: [SizeCatalogEntry; 6] = [
    SizeCatalogEntry::new(1200, 628, "Native Landscape", SizeCategory::Native),
    SizeCatalogEntry::new(1200, 600, "Native Landscape Alt", SizeCategory::Native),
    SizeCatalogEntry::new(720, 720, "Native Square", SizeCategory::Native),
    SizeCatalogEntry::new(720, 960, "Native Portrait 3:4", SizeCategory::Native),
    SizeCatalogEntry::new(720, 1280, "Native Portrait", SizeCategory::Native),
    SizeCatalogEntry::new(1200, 1600, "Native Portrait Large", SizeCategory::Native),
];

/// Native video boxes chosen by orientation.
pub const NATIVE_VIDEO_LANDSCAPE: Dimensions = Dimensions::new(1280, 720);
pub const NATIVE_VIDEO_PORTRAIT: Dimensions = Dimensions::new(720, 1280);
pub const NATIVE_VIDEO_SQUARE: Dimensions = Dimensions::new(720, 720);

/// Standard entries followed by native entries, in catalog order.
pub fn all_sizes() -> impl Iterator<Item = &'static SizeCatalogEntry> {
    STANDARD_SIZES.iter().chain(NATIVE_SIZES.iter())
}

pub fn is_standard_size(width: u32, height: u32) -> bool {
    STANDARD_SIZES
        .iter()
        .any(|e| e.width == width && e.height == height)
}

pub fn is_native_size(width: u32, height: u32) -> bool {
    NATIVE_SIZES
        .iter()
        .any(|e| e.width == width && e.height == height)
}

pub fn lookup(width: u32, height: u32) -> Option<&'static SizeCatalogEntry> {
    all_sizes().find(|e| e.width == width && e.height == height)
}

/// Human-readable label, falling back to `WxH` for sizes outside the catalog.
pub fn label_for(width: u32, height: u32) -> String {
    lookup(width, height)
        .map(|e| e.label.to_string())
        .unwrap_or_else(|| format!("{}x{}", width, height))
}

/// Sorted `[WxH, ...]` listing of the standard catalog, used in warnings.
pub fn standard_size_listing() -> String {
    let mut sizes: Vec<(u32, u32)> = STANDARD_SIZES.iter().map(|e| (e.width, e.height)).collect();
    sizes.sort_unstable();
    let parts: Vec<String> = sizes
        .iter()
        .map(|(w, h)| format!("{}x{}", w, h))
        .collect();
    format!("[{}]", parts.join(", "))
}
