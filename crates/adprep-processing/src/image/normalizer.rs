//! Image normalization
//!
//! Probes a file, downscales retina exports, classifies the result and
//! compresses catalog-sized images over the byte budget. The original file is
//! never modified; every artifact is written next to it with a suffix naming
//! the transform.

use std::path::{Path, PathBuf};
use std::time::Duration;

use adprep_core::catalog::{self, Dimensions};
use adprep_core::classify::{classify, classify_exact};
use adprep_core::models::{is_upload_ready, size_kb};
use adprep_core::{CreativeType, MediaConfig, NormalizationReport, PipelineError, PipelineResult};
use image::{DynamicImage, RgbImage};

use super::compression::{BudgetCompressor, HIGH_QUALITY};
use super::resize::ImageResize;
use crate::probe::DimensionProbe;

/// A compressed file and whether it met its budget.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompressedArtifact {
    pub path: PathBuf,
    pub size_bytes: u64,
    pub within_budget: bool,
}

#[derive(Debug, Clone)]
pub struct ImageNormalizer {
    probe: DimensionProbe,
    max_bytes: u64,
    timeout: Duration,
}

impl ImageNormalizer {
    pub fn new(probe: DimensionProbe, max_bytes: u64, timeout: Duration) -> Self {
        Self {
            probe,
            max_bytes,
            timeout,
        }
    }

    pub fn from_config(config: &MediaConfig) -> PipelineResult<Self> {
        let probe = DimensionProbe::new(config.ffprobe_path.clone(), config.probe_timeout)?;
        Ok(Self::new(probe, config.image_max_bytes, config.image_timeout))
    }

    pub fn probe(&self) -> &DimensionProbe {
        &self.probe
    }

    pub fn max_bytes(&self) -> u64 {
        self.max_bytes
    }

    #[tracing::instrument(skip(self), fields(path = %path.display()))]
    pub async fn normalize(&self, path: &Path) -> PipelineResult<NormalizationReport> {
        let original = self.probe.describe(path).await?;
        let original_dimensions = original.dimensions();
        let classification = classify(original.probed_width, original.probed_height);

        let mut warnings = Vec::new();
        let mut corrected_path = path.to_path_buf();
        let mut corrected_dimensions = original_dimensions;
        let mut size_bytes = original.byte_size;

        if let (true, Some(scale)) = (classification.was_retina, classification.retina_scale) {
            let target = Dimensions::new(
                classification.corrected_width,
                classification.corrected_height,
            );
            let output = sibling_path(path, &format!("_{}x{}", target.width, target.height));
            self.resize_exact(path, target, &output).await?;
            size_bytes = file_size(&output).await?;

            warnings.push(format!(
                "Detected {}x retina image ({}) - resized to {} ({}), now {}KB",
                scale,
                original_dimensions,
                target,
                catalog::label_for(target.width, target.height),
                size_kb(size_bytes)
            ));
            corrected_path = output;
            corrected_dimensions = target;
        }

        let creative_type = classify_exact(corrected_dimensions.width, corrected_dimensions.height);
        match creative_type {
            CreativeType::ImageSource => warnings.push(format!(
                "Dimensions {} are not an accepted size, but large enough to use as source material - will letterbox-resize to every standard size",
                corrected_dimensions
            )),
            CreativeType::Unknown => warnings.push(format!(
                "Dimensions {} are not an accepted size and too small for source. Valid sizes: {}",
                corrected_dimensions,
                catalog::standard_size_listing()
            )),
            CreativeType::Image | CreativeType::Native => {}
        }

        let mut was_compressed = false;
        if size_bytes > self.max_bytes && creative_type.is_catalog_size() {
            warnings.push(format!(
                "File is {}KB (max {}KB) - compressing",
                size_kb(size_bytes),
                self.max_bytes / 1024
            ));
            let output = sibling_path(&corrected_path, "_compressed");
            let artifact = self.compress_file(&corrected_path, &output).await?;
            if !artifact.within_budget {
                warnings.push(format!(
                    "Still {}KB after maximum compression - upload may be rejected",
                    size_kb(artifact.size_bytes)
                ));
            }
            was_compressed = true;
            corrected_path = artifact.path;
            size_bytes = artifact.size_bytes;
        }

        tracing::info!(
            path = %path.display(),
            creative_type = %creative_type,
            corrected = %corrected_dimensions,
            size_bytes,
            warnings = warnings.len(),
            "Image normalized"
        );

        Ok(NormalizationReport {
            original_path: path.to_path_buf(),
            corrected_path,
            original_dimensions,
            corrected_dimensions,
            size_kb: size_kb(size_bytes),
            creative_type,
            was_retina: classification.was_retina,
            was_compressed,
            warnings,
            upload_ready: is_upload_ready(size_bytes, self.max_bytes),
        })
    }

    /// Letterbox `source` to `target`, writing a JPEG to `output` or to
    /// `<name>_<w>x<h>.jpg` next to the source.
    pub async fn letterbox(
        &self,
        source: &Path,
        target: Dimensions,
        output: Option<PathBuf>,
    ) -> PipelineResult<PathBuf> {
        let output = output.unwrap_or_else(|| {
            sibling_path(source, &format!("_{}x{}", target.width, target.height))
        });
        let (src, dst) = (source.to_path_buf(), output.clone());
        self.run_blocking("letterbox", move || {
            let img = open_image(&src)?;
            let canvas = ImageResize::letterbox(&img, target)?;
            write_jpeg(canvas, HIGH_QUALITY, &dst)
        })
        .await?;
        Ok(output)
    }

    /// Compress `path` to the byte budget. Files already within budget are
    /// returned untouched; otherwise `<name>_compressed.jpg` is written.
    pub async fn compress_to_budget(&self, path: &Path) -> PipelineResult<CompressedArtifact> {
        let size_bytes = file_size(path).await?;
        if size_bytes <= self.max_bytes {
            return Ok(CompressedArtifact {
                path: path.to_path_buf(),
                size_bytes,
                within_budget: true,
            });
        }
        self.compress_file(path, &sibling_path(path, "_compressed"))
            .await
    }

    async fn compress_file(&self, source: &Path, output: &Path) -> PipelineResult<CompressedArtifact> {
        let max_bytes = self.max_bytes;
        let (src, dst) = (source.to_path_buf(), output.to_path_buf());
        let outcome = self
            .run_blocking("compress", move || {
                let img = open_image(&src)?;
                let outcome = BudgetCompressor::compress_to_budget(&img, max_bytes)?;
                std::fs::write(&dst, &outcome.data)?;
                Ok(outcome)
            })
            .await?;

        tracing::debug!(
            output = %output.display(),
            quality = outcome.quality,
            attempts = outcome.attempts.len(),
            within_budget = outcome.within_budget,
            "Compressed image"
        );

        Ok(CompressedArtifact {
            path: output.to_path_buf(),
            size_bytes: outcome.size_bytes(),
            within_budget: outcome.within_budget,
        })
    }

    async fn resize_exact(&self, source: &Path, target: Dimensions, output: &Path) -> PipelineResult<()> {
        let (src, dst) = (source.to_path_buf(), output.to_path_buf());
        self.run_blocking("retina_resize", move || {
            let img = open_image(&src)?;
            let resized = ImageResize::exact(&img, target)?;
            write_jpeg(resized, HIGH_QUALITY, &dst)
        })
        .await
    }

    async fn run_blocking<T, F>(&self, operation: &str, f: F) -> PipelineResult<T>
    where
        T: Send + 'static,
        F: FnOnce() -> PipelineResult<T> + Send + 'static,
    {
        match tokio::time::timeout(self.timeout, tokio::task::spawn_blocking(f)).await {
            Ok(Ok(result)) => result,
            Ok(Err(join_err)) => Err(PipelineError::transform(
                "image",
                format!("{} task failed: {}", operation, join_err),
            )),
            Err(_) => Err(PipelineError::Timeout {
                operation: operation.to_string(),
                seconds: self.timeout.as_secs(),
            }),
        }
    }
}

/// `<dir>/<file name><suffix>.jpg`. The full file name, extension
/// included, keeps `hero.png` and `hero.jpg` from sharing an artifact path.
pub fn sibling_path(path: &Path, suffix: &str) -> PathBuf {
    let name = path
        .file_name()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "image".to_string());
    path.with_file_name(format!("{}{}.jpg", name, suffix))
}

fn open_image(path: &Path) -> PipelineResult<DynamicImage> {
    image::ImageReader::open(path)?
        .with_guessed_format()?
        .decode()
        .map_err(|e| PipelineError::transform("image decoder", format!("{}: {}", path.display(), e)))
}

fn write_jpeg(img: RgbImage, quality: u8, output: &Path) -> PipelineResult<()> {
    let data = BudgetCompressor::encode_jpeg(&DynamicImage::ImageRgb8(img), quality)?;
    std::fs::write(output, data)?;
    Ok(())
}

async fn file_size(path: &Path) -> PipelineResult<u64> {
    Ok(tokio::fs::metadata(path).await?.len())
}
