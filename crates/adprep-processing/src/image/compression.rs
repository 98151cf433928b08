//! Budget-constrained JPEG compression
//!
//! Qualities are tried from the ladder left to right and the first encoding
//! that fits the budget wins. When the ladder is exhausted one final
//! maximum-compression encoding is made; missing the budget after that is
//! reported, not raised.

use std::io::Cursor;

use adprep_core::{PipelineError, PipelineResult};
use image::codecs::jpeg::JpegEncoder;
use image::DynamicImage;

/// Encoder qualities, most to least faithful.
pub const QUALITY_LADDER: [u8; 5] = [90, 80, 70, 60, 50];

/// Last resort after the ladder.
pub const MAX_COMPRESSION_QUALITY: u8 = 20;

/// Quality used for intermediate artifacts (resizes) before budget checks.
pub const HIGH_QUALITY: u8 = 95;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompressionAttempt {
    pub quality: u8,
    pub size_bytes: u64,
}

#[derive(Debug, Clone)]
pub struct CompressionOutcome {
    pub data: Vec<u8>,
    pub quality: u8,
    pub within_budget: bool,
    pub attempts: Vec<CompressionAttempt>,
}

impl CompressionOutcome {
    pub fn size_bytes(&self) -> u64 {
        self.data.len() as u64
    }
}

pub struct BudgetCompressor;

impl BudgetCompressor {
    /// Full attempt order: the ladder followed by the last-resort quality.
    pub fn schedule() -> impl Iterator<Item = u8> {
        QUALITY_LADDER
            .into_iter()
            .chain(std::iter::once(MAX_COMPRESSION_QUALITY))
    }

    pub fn encode_jpeg(img: &DynamicImage, quality: u8) -> PipelineResult<Vec<u8>> {
        let rgb = img.to_rgb8();
        let mut buffer = Vec::with_capacity((rgb.width() * rgb.height()) as usize / 4);
        let mut encoder = JpegEncoder::new_with_quality(Cursor::new(&mut buffer), quality);
        encoder
            .encode_image(&rgb)
            .map_err(|e| PipelineError::transform("jpeg encoder", e.to_string()))?;
        Ok(buffer)
    }

    pub fn compress_to_budget(img: &DynamicImage, max_bytes: u64) -> PipelineResult<CompressionOutcome> {
        let mut attempts = Vec::new();
        let mut last: Option<(u8, Vec<u8>)> = None;

        for quality in Self::schedule() {
            let data = Self::encode_jpeg(img, quality)?;
            let size_bytes = data.len() as u64;
            attempts.push(CompressionAttempt {
                quality,
                size_bytes,
            });
            tracing::debug!(quality, size_bytes, max_bytes, "Compression attempt");

            if size_bytes <= max_bytes {
                return Ok(CompressionOutcome {
                    data,
                    quality,
                    within_budget: true,
                    attempts,
                });
            }
            last = Some((quality, data));
        }

        let (quality, data) = last.ok_or_else(|| {
            PipelineError::transform("jpeg encoder", "no compression attempt was made")
        })?;
        tracing::warn!(
            quality,
            size_bytes = data.len(),
            max_bytes,
            "Budget unmet after maximum compression"
        );
        Ok(CompressionOutcome {
            data,
            quality,
            within_budget: false,
            attempts,
        })
    }
}
