//! Plan execution
//!
//! Runs every output of a validated plan with bounded concurrency. A failure
//! inside one output is recorded on that output's outcome and the batch moves
//! on; batch-fatal errors (auth, config) stop the whole run and cancel the
//! outputs still in flight.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use adprep_api_client::AssetUploader;
use adprep_core::models::mime_for_path;
use adprep_core::progress::{Operation, ProgressEvent, ProgressReporter};
use adprep_core::{
    Dimensions, EndcardMode, EndcardPlan, OutputKind, PipelineError, PipelineResult,
    PlanOutput, PlanTransform, ScannedFile, ValidatedPlan,
};
use adprep_processing::{derive_native_target, ImageNormalizer, VideoNormalizer};
use futures::stream::{self, StreamExt};
use serde::Serialize;
use uuid::Uuid;

/// Suffix marking an image as the endcard of the video with the same stem.
pub const SIDECAR_SUFFIX: &str = "_endcard";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactKind {
    Image,
    Video,
    Endcard,
    NativeVideo,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UploadedArtifact {
    pub kind: ArtifactKind,
    pub dimensions: Option<Dimensions>,
    pub asset_reference: String,
    pub group: Option<String>,
    pub path: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OutputOutcome {
    pub source_rel_path: String,
    pub kind: OutputKind,
    pub group: Option<String>,
    pub title: Option<String>,
    pub artifacts: Vec<UploadedArtifact>,
    pub warnings: Vec<String>,
    pub failure: Option<String>,
}

impl OutputOutcome {
    fn new(output: &PlanOutput) -> Self {
        Self {
            source_rel_path: output.source_rel_path.clone(),
            kind: output.kind,
            group: output.group.clone(),
            title: output.title.clone(),
            artifacts: Vec::new(),
            warnings: Vec::new(),
            failure: None,
        }
    }

    pub fn is_success(&self) -> bool {
        self.failure.is_none()
    }
}

/// Per-output outcomes in plan order.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ExecutionReport {
    pub outcomes: Vec<OutputOutcome>,
}

impl ExecutionReport {
    pub fn succeeded(&self) -> usize {
        self.outcomes.iter().filter(|o| o.is_success()).count()
    }

    pub fn failed(&self) -> usize {
        self.outcomes.len() - self.succeeded()
    }
}

pub struct PlanExecutor {
    images: ImageNormalizer,
    videos: VideoNormalizer,
    uploader: Arc<dyn AssetUploader>,
    reporter: ProgressReporter,
    work_dir: PathBuf,
    native_video_max_bytes: u64,
    max_concurrency: usize,
}

impl PlanExecutor {
    pub fn new(
        images: ImageNormalizer,
        videos: VideoNormalizer,
        uploader: Arc<dyn AssetUploader>,
        work_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            images,
            videos,
            uploader,
            reporter: ProgressReporter::new(),
            work_dir: work_dir.into(),
            native_video_max_bytes: adprep_core::NATIVE_VIDEO_MAX_BYTES,
            max_concurrency: 4,
        }
    }

    pub fn with_reporter(mut self, reporter: ProgressReporter) -> Self {
        self.reporter = reporter;
        self
    }

    pub fn with_native_video_budget(mut self, max_bytes: u64) -> Self {
        self.native_video_max_bytes = max_bytes;
        self
    }

    pub fn with_max_concurrency(mut self, max_concurrency: usize) -> Self {
        self.max_concurrency = max_concurrency.max(1);
        self
    }

    /// Execute every output of `plan`. `scanned` is the full scanned file set,
    /// used to find sidecar endcards.
    pub async fn execute(
        &self,
        plan: &ValidatedPlan,
        scanned: &[ScannedFile],
    ) -> PipelineResult<ExecutionReport> {
        let total = plan.outputs().len();
        tracing::info!(outputs = total, concurrency = self.max_concurrency, "Executing plan");

        let mut slots: Vec<Option<OutputOutcome>> = vec![None; total];
        let mut runs = stream::iter(plan.outputs().iter().enumerate())
            .map(|(idx, output)| async move { (idx, self.run_output(plan, scanned, output).await) })
            .buffer_unordered(self.max_concurrency);

        while let Some((idx, result)) = runs.next().await {
            match result {
                Ok(outcome) => slots[idx] = Some(outcome),
                Err(e) => {
                    tracing::error!(error = %e, code = e.error_code(), "Aborting batch");
                    return Err(e);
                }
            }
        }

        let report = ExecutionReport {
            outcomes: slots.into_iter().flatten().collect(),
        };
        tracing::info!(
            succeeded = report.succeeded(),
            failed = report.failed(),
            "Plan executed"
        );
        Ok(report)
    }

    async fn run_output(
        &self,
        plan: &ValidatedPlan,
        scanned: &[ScannedFile],
        output: &PlanOutput,
    ) -> PipelineResult<OutputOutcome> {
        let mut outcome = OutputOutcome::new(output);
        let source = plan.source(output).ok_or_else(|| {
            PipelineError::Validation(vec![format!(
                "{}: source is not in the validated plan",
                output.source_rel_path
            )])
        })?;

        let result = match output.kind {
            OutputKind::Image => self.run_image(output, source, &mut outcome).await,
            OutputKind::Video => self.run_video(output, source, scanned, &mut outcome).await,
        };

        match result {
            Ok(()) => Ok(outcome),
            Err(e) if e.is_batch_fatal() => Err(e),
            Err(e) => {
                tracing::warn!(
                    source = %output.source_rel_path,
                    code = e.error_code(),
                    error = %e,
                    "Output failed"
                );
                outcome.failure = Some(e.to_string());
                Ok(outcome)
            }
        }
    }

    async fn run_image(
        &self,
        output: &PlanOutput,
        source: &ScannedFile,
        outcome: &mut OutputOutcome,
    ) -> PipelineResult<()> {
        let group = output.group.as_deref();
        let report = self.track(
            Operation::Normalize,
            output,
            self.images.normalize(&source.absolute_path).await,
            |r| Some(r.corrected_dimensions),
        )?;
        outcome.warnings.extend(report.warnings.iter().cloned());

        for size in &output.target_sizes {
            let target = size.dimensions();
            let sized = if report.corrected_dimensions == target {
                report.corrected_path.clone()
            } else {
                let dest = self.artifact_path(&source.relative_path, target);
                self.track(
                    Operation::Letterbox,
                    output,
                    self.images
                        .letterbox(&report.corrected_path, target, Some(dest))
                        .await,
                    |_| Some(target),
                )?
            };

            let final_path = self.compress(output, &sized, outcome).await?;
            let asset_reference = self.upload(output, &final_path, Some(target)).await?;
            outcome.artifacts.push(UploadedArtifact {
                kind: ArtifactKind::Image,
                dimensions: Some(target),
                asset_reference,
                group: group.map(str::to_string),
                path: final_path,
            });
        }
        Ok(())
    }

    async fn run_video(
        &self,
        output: &PlanOutput,
        source: &ScannedFile,
        scanned: &[ScannedFile],
        outcome: &mut OutputOutcome,
    ) -> PipelineResult<()> {
        let group = output.group.as_deref().map(str::to_string);
        let video = source.absolute_path.as_path();
        let (width, height) = self.videos.engine().dimensions(video).await;
        let video_dims = Some(Dimensions::new(width, height)).filter(|d| !d.is_zero());

        let asset_reference = self.upload(output, video, video_dims).await?;
        outcome.artifacts.push(UploadedArtifact {
            kind: ArtifactKind::Video,
            dimensions: video_dims,
            asset_reference,
            group: group.clone(),
            path: video.to_path_buf(),
        });

        if let Some(endcard) = &output.endcard {
            let frame = self.resolve_endcard(output, endcard, source, scanned).await?;
            let target = endcard.target_size.dimensions();
            let name = format!("{}{}.jpg", source.stem().unwrap_or("video"), SIDECAR_SUFFIX);
            let dest = self.artifact_path(&name, target);
            let sized = self.track(
                Operation::Letterbox,
                output,
                self.images.letterbox(&frame, target, Some(dest)).await,
                |_| Some(target),
            )?;
            let final_path = self.compress(output, &sized, outcome).await?;
            let asset_reference = self.upload(output, &final_path, Some(target)).await?;
            outcome.artifacts.push(UploadedArtifact {
                kind: ArtifactKind::Endcard,
                dimensions: Some(target),
                asset_reference,
                group: group.clone(),
                path: final_path,
            });
        }

        if output.wants(PlanTransform::NativeVideo) {
            let target = derive_native_target(width, height).ok_or_else(|| PipelineError::Probe {
                path: video.to_path_buf(),
                reason: "video dimensions are indeterminate".to_string(),
            })?;
            let transcoded = self
                .videos
                .transcode_to_budget(video, target, self.native_video_max_bytes)
                .await
                .and_then(|path| {
                    path.ok_or_else(|| PipelineError::BudgetUnmet {
                        path: video.to_path_buf(),
                        size_bytes: 0,
                        max_bytes: self.native_video_max_bytes,
                    })
                });
            let native = self.track(Operation::Transcode, output, transcoded, |_| Some(target))?;
            let asset_reference = self.upload(output, &native, Some(target)).await?;
            outcome.artifacts.push(UploadedArtifact {
                kind: ArtifactKind::NativeVideo,
                dimensions: Some(target),
                asset_reference,
                group,
                path: native,
            });
        }
        Ok(())
    }

    async fn resolve_endcard(
        &self,
        output: &PlanOutput,
        plan: &EndcardPlan,
        video: &ScannedFile,
        scanned: &[ScannedFile],
    ) -> PipelineResult<PathBuf> {
        let sidecar = || find_sidecar(scanned, video).map(|f| f.absolute_path.clone());
        let frame = match plan.mode {
            EndcardMode::SidecarOnly => sidecar(),
            EndcardMode::ExtractOnly => self.videos.extract_endcard(&video.absolute_path).await,
            EndcardMode::SidecarOrExtract => match sidecar() {
                Some(path) => Some(path),
                None => self.videos.extract_endcard(&video.absolute_path).await,
            },
        };

        let result = frame.ok_or_else(|| {
            PipelineError::transform(
                "endcard",
                format!("no endcard available for {} ({:?})", video.relative_path, plan.mode),
            )
        });
        self.track(Operation::ExtractEndcard, output, result, |_| None)
    }

    async fn compress(
        &self,
        output: &PlanOutput,
        path: &Path,
        outcome: &mut OutputOutcome,
    ) -> PipelineResult<PathBuf> {
        let artifact = self.track(
            Operation::Compress,
            output,
            self.images.compress_to_budget(path).await,
            |_| None,
        )?;
        if !artifact.within_budget {
            outcome.warnings.push(format!(
                "{} is still {}KB after maximum compression - upload may be rejected",
                artifact.path.display(),
                adprep_core::models::size_kb(artifact.size_bytes)
            ));
        }
        Ok(artifact.path)
    }

    async fn upload(
        &self,
        output: &PlanOutput,
        path: &Path,
        dimensions: Option<Dimensions>,
    ) -> PipelineResult<String> {
        tracing::debug!(path = %path.display(), mime = mime_for_path(path), "Uploading artifact");
        let result = self.uploader.upload_file(path).await;
        self.track(Operation::Upload, output, result, |_| dimensions)
    }

    /// Emit a progress event for `result` and pass it through.
    fn track<T>(
        &self,
        op: Operation,
        output: &PlanOutput,
        result: PipelineResult<T>,
        dimensions: impl FnOnce(&T) -> Option<Dimensions>,
    ) -> PipelineResult<T> {
        let group = output.group.as_deref();
        let event = match &result {
            Ok(value) => ProgressEvent::done(op, &output.source_rel_path, group, dimensions(value)),
            Err(e) => ProgressEvent::failed(op, &output.source_rel_path, group, e.to_string()),
        };
        self.reporter.emit(event);
        result
    }

    fn artifact_path(&self, rel_path: &str, target: Dimensions) -> PathBuf {
        let stem = Path::new(rel_path)
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "asset".to_string());
        self.work_dir.join(format!(
            "{}_{}x{}_{}.jpg",
            stem,
            target.width,
            target.height,
            Uuid::new_v4().simple()
        ))
    }
}

/// Image in the same directory as `video` whose stem is the video's stem
/// plus `_endcard`.
pub fn find_sidecar<'a>(scanned: &'a [ScannedFile], video: &ScannedFile) -> Option<&'a ScannedFile> {
    let video_path = Path::new(&video.relative_path);
    let wanted = format!("{}{}", video.stem()?, SIDECAR_SUFFIX);
    scanned.iter().find(|f| {
        f.is_image()
            && f.stem() == Some(wanted.as_str())
            && Path::new(&f.relative_path).parent() == video_path.parent()
    })
}
