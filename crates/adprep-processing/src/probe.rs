//! Dimension probing
//!
//! Width and height come from a format-aware header decode first, then from
//! `ffprobe`, which also understands video containers. Probing never fails:
//! an unreadable file reports `(0, 0)`.

use std::path::{Path, PathBuf};
use std::time::Duration;

use adprep_core::{AssetDescriptor, PipelineError, PipelineResult};

use crate::command::{run_tool, validate_tool_path};

#[derive(Debug, Clone)]
pub struct DimensionProbe {
    ffprobe_path: String,
    timeout: Duration,
}

impl DimensionProbe {
    pub fn new(ffprobe_path: impl Into<String>, timeout: Duration) -> PipelineResult<Self> {
        let ffprobe_path = ffprobe_path.into();
        validate_tool_path(&ffprobe_path)?;
        Ok(Self {
            ffprobe_path,
            timeout,
        })
    }

    /// `(width, height)` of an image or video, `(0, 0)` if indeterminate.
    #[tracing::instrument(skip(self), fields(path = %path.display()))]
    pub async fn dimensions(&self, path: &Path) -> (u32, u32) {
        if let Some(dims) = decode_header(path).await {
            return dims;
        }
        match self.ffprobe_dimensions(path).await {
            Some(dims) => dims,
            None => {
                tracing::debug!(path = %path.display(), "Dimensions indeterminate");
                (0, 0)
            }
        }
    }

    /// Probe dimensions and byte size. Fails only if the file cannot be stat'ed.
    pub async fn describe(&self, path: &Path) -> PipelineResult<AssetDescriptor> {
        let metadata = tokio::fs::metadata(path)
            .await
            .map_err(|e| PipelineError::Probe {
                path: path.to_path_buf(),
                reason: e.to_string(),
            })?;
        let (probed_width, probed_height) = self.dimensions(path).await;

        Ok(AssetDescriptor {
            original_path: PathBuf::from(path),
            probed_width,
            probed_height,
            byte_size: metadata.len(),
        })
    }

    /// Container duration in seconds.
    pub async fn duration(&self, path: &Path) -> Option<f64> {
        let args = vec![
            "-v".to_string(),
            "error".to_string(),
            "-show_entries".to_string(),
            "format=duration".to_string(),
            "-of".to_string(),
            "default=noprint_wrappers=1:nokey=1".to_string(),
            path.to_string_lossy().into_owned(),
        ];
        match run_tool(&self.ffprobe_path, &args, self.timeout, "probe_duration").await {
            Ok(output) => parse_duration(&String::from_utf8_lossy(&output.stdout)),
            Err(e) => {
                tracing::debug!(error = %e, path = %path.display(), "Duration probe failed");
                None
            }
        }
    }

    async fn ffprobe_dimensions(&self, path: &Path) -> Option<(u32, u32)> {
        let args = vec![
            "-v".to_string(),
            "quiet".to_string(),
            "-select_streams".to_string(),
            "v:0".to_string(),
            "-show_entries".to_string(),
            "stream=width,height".to_string(),
            "-of".to_string(),
            "csv=p=0:s=x".to_string(),
            path.to_string_lossy().into_owned(),
        ];
        match run_tool(&self.ffprobe_path, &args, self.timeout, "probe").await {
            Ok(output) => parse_dimensions(&String::from_utf8_lossy(&output.stdout)),
            Err(e) => {
                tracing::debug!(error = %e, path = %path.display(), "ffprobe fallback failed");
                None
            }
        }
    }
}

async fn decode_header(path: &Path) -> Option<(u32, u32)> {
    let path = path.to_path_buf();
    tokio::task::spawn_blocking(move || image::image_dimensions(&path).ok())
        .await
        .ok()
        .flatten()
        .filter(|(w, h)| *w > 0 && *h > 0)
}

/// Parse `WIDTHxHEIGHT` as printed by ffprobe's csv writer.
pub fn parse_dimensions(stdout: &str) -> Option<(u32, u32)> {
    let line = stdout.lines().map(str::trim).find(|l| !l.is_empty())?;
    let mut parts = line.split('x').filter(|p| !p.is_empty());
    let width = parts.next()?.trim().parse::<u32>().ok()?;
    let height = parts.next()?.trim().parse::<u32>().ok()?;
    if width == 0 || height == 0 {
        return None;
    }
    Some((width, height))
}

pub fn parse_duration(stdout: &str) -> Option<f64> {
    stdout
        .lines()
        .map(str::trim)
        .find(|l| !l.is_empty())?
        .parse::<f64>()
        .ok()
        .filter(|d| d.is_finite() && *d >= 0.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};

    fn probe() -> DimensionProbe {
        DimensionProbe::new("ffprobe", Duration::from_secs(10)).unwrap()
    }

    #[test]
    fn test_parse_dimensions() {
        assert_eq!(parse_dimensions("1080x1920\n"), Some((1080, 1920)));
        assert_eq!(parse_dimensions("320x50x\n"), Some((320, 50)));
        assert_eq!(parse_dimensions("\n640x480\n"), Some((640, 480)));
        assert_eq!(parse_dimensions(""), None);
        assert_eq!(parse_dimensions("N/A"), None);
        assert_eq!(parse_dimensions("0x0"), None);
    }

    #[test]
    fn test_parse_duration() {
        assert_eq!(parse_duration("8.000000\n"), Some(8.0));
        assert_eq!(parse_duration("0.6"), Some(0.6));
        assert_eq!(parse_duration("N/A\n"), None);
        assert_eq!(parse_duration(""), None);
    }

    #[test]
    fn test_rejects_unsafe_tool_path() {
        assert!(DimensionProbe::new("ffprobe && echo", Duration::from_secs(1)).is_err());
    }

    #[tokio::test]
    async fn test_dimensions_from_image_header() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("banner.png");
        RgbImage::from_pixel(320, 50, Rgb([10, 20, 30]))
            .save(&path)
            .unwrap();

        assert_eq!(probe().dimensions(&path).await, (320, 50));

        let descriptor = probe().describe(&path).await.unwrap();
        assert_eq!(descriptor.probed_width, 320);
        assert_eq!(descriptor.probed_height, 50);
        assert!(descriptor.byte_size > 0);
    }

    #[tokio::test]
    async fn test_unreadable_file_degrades_to_zero() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("garbage.jpg");
        std::fs::write(&path, b"definitely not an image").unwrap();

        // Either ffprobe is missing or it cannot read the file: both give (0, 0).
        let probe = DimensionProbe::new("/nonexistent/ffprobe", Duration::from_secs(2)).unwrap();
        assert_eq!(probe.dimensions(&path).await, (0, 0));
    }

    #[tokio::test]
    async fn test_describe_missing_file_is_probe_failure() {
        let err = probe()
            .describe(Path::new("/nonexistent/missing.png"))
            .await
            .unwrap_err();
        assert_eq!(err.error_code(), "PROBE_FAILURE");
    }
}
