//! Image processing module
//!
//! - Letterbox and exact resizes (resize)
//! - Byte-budget JPEG compression over a quality ladder (compression)
//! - Per-file normalization producing a `NormalizationReport` (normalizer)

pub mod compression;
pub mod normalizer;
pub mod resize;

pub use compression::{BudgetCompressor, CompressionAttempt, CompressionOutcome};
pub use normalizer::{CompressedArtifact, ImageNormalizer};
pub use resize::ImageResize;
