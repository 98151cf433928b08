//! Video engine
//!
//! `VideoEngine` is the seam between the normalizer's policy (which frame,
//! which CRF, when to stop) and the tool doing the work.

use std::path::Path;
use std::time::Duration;

use adprep_core::{Dimensions, MediaConfig, PipelineResult};
use async_trait::async_trait;

use crate::command::{run_tool, validate_tool_path};
use crate::probe::DimensionProbe;

#[async_trait]
pub trait VideoEngine: Send + Sync {
    /// Container duration in seconds, `None` if it cannot be read.
    async fn duration(&self, video: &Path) -> Option<f64>;

    /// `(width, height)` of the first video stream, `(0, 0)` if indeterminate.
    async fn dimensions(&self, video: &Path) -> (u32, u32);

    /// Write the frame at `timestamp` seconds to `output` as JPEG.
    async fn extract_frame(&self, video: &Path, timestamp: f64, output: &Path) -> PipelineResult<()>;

    /// Re-encode `video` letterboxed to `target` at the given CRF.
    async fn transcode_letterbox(
        &self,
        video: &Path,
        target: Dimensions,
        crf: u8,
        output: &Path,
    ) -> PipelineResult<()>;
}

pub struct FfmpegEngine {
    ffmpeg_path: String,
    probe: DimensionProbe,
    timeout: Duration,
}

impl FfmpegEngine {
    pub fn new(ffmpeg_path: impl Into<String>, probe: DimensionProbe, timeout: Duration) -> PipelineResult<Self> {
        let ffmpeg_path = ffmpeg_path.into();
        validate_tool_path(&ffmpeg_path)?;
        Ok(Self {
            ffmpeg_path,
            probe,
            timeout,
        })
    }

    pub fn from_config(config: &MediaConfig) -> PipelineResult<Self> {
        let probe = DimensionProbe::new(config.ffprobe_path.clone(), config.probe_timeout)?;
        Self::new(config.ffmpeg_path.clone(), probe, config.video_timeout)
    }
}

#[async_trait]
impl VideoEngine for FfmpegEngine {
    async fn duration(&self, video: &Path) -> Option<f64> {
        self.probe.duration(video).await
    }

    async fn dimensions(&self, video: &Path) -> (u32, u32) {
        self.probe.dimensions(video).await
    }

    #[tracing::instrument(skip(self), fields(video = %video.display()))]
    async fn extract_frame(&self, video: &Path, timestamp: f64, output: &Path) -> PipelineResult<()> {
        let args = frame_args(video, timestamp, output);
        run_tool(&self.ffmpeg_path, &args, self.timeout, "extract_endcard").await?;
        Ok(())
    }

    #[tracing::instrument(skip(self), fields(video = %video.display(), target = %target))]
    async fn transcode_letterbox(
        &self,
        video: &Path,
        target: Dimensions,
        crf: u8,
        output: &Path,
    ) -> PipelineResult<()> {
        let args = transcode_args(video, target, crf, output);
        run_tool(&self.ffmpeg_path, &args, self.timeout, "transcode").await?;
        Ok(())
    }
}

/// Scale to fit inside `target`, then pad with black to exactly `target`.
pub fn letterbox_filter(target: Dimensions) -> String {
    format!(
        "scale={w}:{h}:force_original_aspect_ratio=decrease,pad={w}:{h}:(ow-iw)/2:(oh-ih)/2:black",
        w = target.width,
        h = target.height
    )
}

pub fn frame_args(video: &Path, timestamp: f64, output: &Path) -> Vec<String> {
    let mut args = vec!["-y".to_string()];
    if timestamp > 0.0 {
        args.extend_from_slice(&["-ss".to_string(), format!("{:.3}", timestamp)]);
    }
    args.extend_from_slice(&[
        "-i".to_string(),
        video.to_string_lossy().to_string(),
        "-frames:v".to_string(),
        "1".to_string(),
        "-q:v".to_string(),
        "2".to_string(),
        output.to_string_lossy().to_string(),
    ]);
    args
}

pub fn transcode_args(video: &Path, target: Dimensions, crf: u8, output: &Path) -> Vec<String> {
    vec![
        "-y".to_string(),
        "-i".to_string(),
        video.to_string_lossy().to_string(),
        "-vf".to_string(),
        letterbox_filter(target),
        "-c:v".to_string(),
        "libx264".to_string(),
        "-crf".to_string(),
        crf.to_string(),
        "-preset".to_string(),
        "medium".to_string(),
        "-pix_fmt".to_string(),
        "yuv420p".to_string(),
        "-movflags".to_string(),
        "+faststart".to_string(),
        output.to_string_lossy().to_string(),
    ]
}
