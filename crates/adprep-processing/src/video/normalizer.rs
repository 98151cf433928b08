//! Video normalization
//!
//! Endcard extraction, native target selection and budget-constrained
//! letterbox transcoding. Outputs go to uniquely named files in the work
//! directory so concurrent calls never collide.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use adprep_core::catalog::{
    Dimensions, NATIVE_VIDEO_LANDSCAPE, NATIVE_VIDEO_PORTRAIT, NATIVE_VIDEO_SQUARE,
};
use adprep_core::PipelineResult;
use uuid::Uuid;

use super::engine::VideoEngine;

/// x264 CRF levels, least to most aggressive.
pub const CRF_LADDER: [u8; 4] = [23, 28, 33, 38];

/// Distance from the end of the clip to the endcard frame, in seconds.
const ENDCARD_OFFSET_SECS: f64 = 1.0;

/// Seek position for the endcard: one second before the end, or the first
/// frame for clips of a second or less.
pub fn endcard_timestamp(duration: f64) -> f64 {
    if duration > ENDCARD_OFFSET_SECS {
        duration - ENDCARD_OFFSET_SECS
    } else {
        0.0
    }
}

/// Native video box for the source orientation.
pub fn derive_native_target(width: u32, height: u32) -> Option<Dimensions> {
    if width == 0 || height == 0 {
        return None;
    }
    Some(match width.cmp(&height) {
        std::cmp::Ordering::Greater => NATIVE_VIDEO_LANDSCAPE,
        std::cmp::Ordering::Less => NATIVE_VIDEO_PORTRAIT,
        std::cmp::Ordering::Equal => NATIVE_VIDEO_SQUARE,
    })
}

#[derive(Clone)]
pub struct VideoNormalizer {
    engine: Arc<dyn VideoEngine>,
    work_dir: PathBuf,
}

impl VideoNormalizer {
    pub fn new(engine: Arc<dyn VideoEngine>, work_dir: impl Into<PathBuf>) -> Self {
        Self {
            engine,
            work_dir: work_dir.into(),
        }
    }

    /// Normalizer writing into the system temp directory.
    pub fn with_temp_dir(engine: Arc<dyn VideoEngine>) -> Self {
        Self::new(engine, std::env::temp_dir())
    }

    pub fn engine(&self) -> &Arc<dyn VideoEngine> {
        &self.engine
    }

    /// Extract the endcard frame. Any failure yields `None`; callers fall
    /// back to another endcard strategy.
    #[tracing::instrument(skip(self), fields(video = %video.display()))]
    pub async fn extract_endcard(&self, video: &Path) -> Option<PathBuf> {
        let duration = self.engine.duration(video).await.unwrap_or(0.0);
        let timestamp = endcard_timestamp(duration);
        let output = self.work_dir.join(format!("endcard_{}.jpg", Uuid::new_v4()));

        if let Err(e) = self.engine.extract_frame(video, timestamp, &output).await {
            tracing::warn!(error = %e, video = %video.display(), "Endcard extraction failed");
            remove_quietly(&output).await;
            return None;
        }

        match tokio::fs::metadata(&output).await {
            Ok(meta) if meta.len() > 0 => {
                tracing::debug!(timestamp, output = %output.display(), "Endcard extracted");
                Some(output)
            }
            _ => {
                tracing::warn!(video = %video.display(), "Endcard extraction produced no frame");
                remove_quietly(&output).await;
                None
            }
        }
    }

    /// Letterbox-transcode `video` into `target`, raising CRF until the
    /// output fits `max_bytes`.
    ///
    /// Returns `Ok(None)` when every level is over budget (the last output is
    /// deleted). An encoder failure aborts the ladder and is returned as is.
    #[tracing::instrument(skip(self), fields(video = %video.display(), target = %target))]
    pub async fn transcode_to_budget(
        &self,
        video: &Path,
        target: Dimensions,
        max_bytes: u64,
    ) -> PipelineResult<Option<PathBuf>> {
        let output = self
            .work_dir
            .join(format!("native_vid_{}.mp4", Uuid::new_v4()));

        for crf in CRF_LADDER {
            if let Err(e) = self
                .engine
                .transcode_letterbox(video, target, crf, &output)
                .await
            {
                remove_quietly(&output).await;
                return Err(e);
            }

            let size_bytes = match tokio::fs::metadata(&output).await {
                Ok(meta) => meta.len(),
                Err(e) => {
                    remove_quietly(&output).await;
                    return Err(e.into());
                }
            };

            if size_bytes <= max_bytes {
                tracing::info!(crf, size_bytes, max_bytes, "Transcode within budget");
                return Ok(Some(output));
            }
            tracing::info!(crf, size_bytes, max_bytes, "Transcode over budget");
        }

        remove_quietly(&output).await;
        tracing::warn!(video = %video.display(), max_bytes, "Every CRF level exceeded the budget");
        Ok(None)
    }
}

async fn remove_quietly(path: &Path) {
    if let Err(e) = tokio::fs::remove_file(path).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            tracing::debug!(error = %e, path = %path.display(), "Failed to remove artifact");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use adprep_core::PipelineError;
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// Writes files whose size is chosen per CRF and records every call.
    #[derive(Default)]
    struct FakeEngine {
        duration: Option<f64>,
        sizes: Vec<(u8, usize)>,
        fail_at_crf: Option<u8>,
        fail_extract: bool,
        timestamps: Mutex<Vec<f64>>,
        crfs: Mutex<Vec<u8>>,
    }

    #[async_trait]
    impl VideoEngine for FakeEngine {
        async fn duration(&self, _video: &Path) -> Option<f64> {
            self.duration
        }

        async fn dimensions(&self, _video: &Path) -> (u32, u32) {
            (1080, 1920)
        }

        async fn extract_frame(&self, _video: &Path, timestamp: f64, output: &Path) -> PipelineResult<()> {
            self.timestamps.lock().unwrap().push(timestamp);
            if self.fail_extract {
                return Err(PipelineError::transform("ffmpeg", "Invalid data found"));
            }
            std::fs::write(output, b"jpeg")?;
            Ok(())
        }

        async fn transcode_letterbox(
            &self,
            _video: &Path,
            _target: Dimensions,
            crf: u8,
            output: &Path,
        ) -> PipelineResult<()> {
            self.crfs.lock().unwrap().push(crf);
            if self.fail_at_crf == Some(crf) {
                std::fs::write(output, b"partial")?;
                return Err(PipelineError::transform("ffmpeg", "Conversion failed!"));
            }
            let size = self
                .sizes
                .iter()
                .find(|(c, _)| *c == crf)
                .map(|(_, s)| *s)
                .unwrap_or(0);
            std::fs::write(output, vec![0u8; size])?;
            Ok(())
        }
    }

    fn shrinking_sizes() -> Vec<(u8, usize)> {
        vec![(23, 4000), (28, 3000), (33, 2000), (38, 1500)]
    }

    fn normalizer(engine: FakeEngine, dir: &Path) -> (VideoNormalizer, Arc<FakeEngine>) {
        let engine = Arc::new(engine);
        (VideoNormalizer::new(engine.clone(), dir), engine)
    }

    #[test]
    fn test_endcard_timestamp() {
        assert_eq!(endcard_timestamp(8.0), 7.0);
        assert_eq!(endcard_timestamp(0.6), 0.0);
        assert_eq!(endcard_timestamp(1.0), 0.0);
        assert_eq!(endcard_timestamp(0.0), 0.0);
    }

    #[test]
    fn test_derive_native_target() {
        assert_eq!(derive_native_target(1920, 1080), Some(Dimensions::new(1280, 720)));
        assert_eq!(derive_native_target(1080, 1920), Some(Dimensions::new(720, 1280)));
        assert_eq!(derive_native_target(500, 500), Some(Dimensions::new(720, 720)));
        assert_eq!(derive_native_target(0, 0), None);
    }

    #[test]
    fn test_crf_ladder_is_monotonic() {
        assert_eq!(CRF_LADDER.len(), 4);
        assert!(CRF_LADDER.windows(2).all(|w| w[0] < w[1]));
    }

    #[tokio::test]
    async fn test_endcard_extracted_one_second_before_end() {
        let dir = tempfile::tempdir().unwrap();
        let (normalizer, engine) = normalizer(
            FakeEngine {
                duration: Some(8.0),
                ..Default::default()
            },
            dir.path(),
        );

        let endcard = normalizer.extract_endcard(Path::new("promo.mp4")).await.unwrap();

        assert!(endcard.starts_with(dir.path()));
        assert!(endcard
            .file_name()
            .unwrap()
            .to_string_lossy()
            .starts_with("endcard_"));
        assert_eq!(*engine.timestamps.lock().unwrap(), vec![7.0]);
    }

    #[tokio::test]
    async fn test_short_clip_uses_first_frame() {
        let dir = tempfile::tempdir().unwrap();
        let (normalizer, engine) = normalizer(
            FakeEngine {
                duration: Some(0.6),
                ..Default::default()
            },
            dir.path(),
        );

        assert!(normalizer.extract_endcard(Path::new("blip.mp4")).await.is_some());
        assert_eq!(*engine.timestamps.lock().unwrap(), vec![0.0]);
    }

    #[tokio::test]
    async fn test_endcard_failure_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let (normalizer, _) = normalizer(
            FakeEngine {
                duration: None,
                fail_extract: true,
                ..Default::default()
            },
            dir.path(),
        );

        assert!(normalizer.extract_endcard(Path::new("bad.mp4")).await.is_none());
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_transcode_accepts_first_level_within_budget() {
        let dir = tempfile::tempdir().unwrap();
        let (normalizer, engine) = normalizer(
            FakeEngine {
                sizes: shrinking_sizes(),
                ..Default::default()
            },
            dir.path(),
        );

        let output = normalizer
            .transcode_to_budget(Path::new("promo.mp4"), Dimensions::new(720, 1280), 2500)
            .await
            .unwrap()
            .unwrap();

        assert_eq!(*engine.crfs.lock().unwrap(), vec![23, 28, 33]);
        assert_eq!(std::fs::metadata(&output).unwrap().len(), 2000);
    }

    #[tokio::test]
    async fn test_transcode_exhausted_deletes_output() {
        let dir = tempfile::tempdir().unwrap();
        let (normalizer, engine) = normalizer(
            FakeEngine {
                sizes: shrinking_sizes(),
                ..Default::default()
            },
            dir.path(),
        );

        let result = normalizer
            .transcode_to_budget(Path::new("promo.mp4"), Dimensions::new(1280, 720), 1000)
            .await
            .unwrap();

        assert!(result.is_none());
        assert_eq!(*engine.crfs.lock().unwrap(), CRF_LADDER.to_vec());
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_encoder_error_aborts_ladder() {
        let dir = tempfile::tempdir().unwrap();
        let (normalizer, engine) = normalizer(
            FakeEngine {
                sizes: shrinking_sizes(),
                fail_at_crf: Some(28),
                ..Default::default()
            },
            dir.path(),
        );

        let err = normalizer
            .transcode_to_budget(Path::new("promo.mp4"), Dimensions::new(1280, 720), 1000)
            .await
            .unwrap_err();

        assert_eq!(err.to_string(), "ffmpeg failed: Conversion failed!");
        assert_eq!(*engine.crfs.lock().unwrap(), vec![23, 28]);
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }
}
