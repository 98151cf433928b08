//! adprep CLI: normalize ad creatives and upload them to the ad platform.
//!
//! Upload commands need ADPREP_API_KEY and ADPREP_AD_ACCOUNT_ID; see
//! `PipelineConfig::from_env` for the remaining settings.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use adprep_api_client::{uploader_from_config, AssetUploader};
use adprep_cli::{init_tracing, PlanExecutor};
use adprep_core::{classify, Dimensions, PipelineConfig, Plan, ScannedFile};
use adprep_processing::{
    derive_native_target, DimensionProbe, FfmpegEngine, ImageNormalizer, VideoNormalizer,
};
use anyhow::Context;
use clap::{Parser, Subcommand};
use serde::Serialize;

#[derive(Parser)]
#[command(name = "adprep", about = "Ad creative normalization and upload")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the pixel dimensions (and duration, for videos) of a file
    Probe {
        /// Path to an image or video
        path: PathBuf,
    },
    /// Classify dimensions against the accepted size catalogs
    Classify {
        /// Width in pixels
        width: u32,
        /// Height in pixels
        height: u32,
    },
    /// Normalize an image: retina downscale, classification, compression
    Normalize {
        /// Path to the image
        path: PathBuf,
    },
    /// Extract the endcard frame of a video
    Endcard {
        /// Path to the video
        video: PathBuf,
    },
    /// Transcode a video to a letterboxed native variant within a byte budget
    Transcode {
        /// Path to the video
        video: PathBuf,
        /// Target width (derived from the source orientation when omitted)
        #[arg(long, requires = "height")]
        width: Option<u32>,
        /// Target height
        #[arg(long, requires = "width")]
        height: Option<u32>,
        /// Byte budget in megabytes (defaults to NATIVE_VIDEO_MAX_MB)
        #[arg(long)]
        max_mb: Option<u64>,
    },
    /// Upload a file as-is and print the asset reference
    Upload {
        /// Path to the file to upload
        file: PathBuf,
    },
    /// Validate a plan against a scanned file listing
    ValidatePlan {
        /// Plan document (JSON)
        #[arg(long)]
        plan: PathBuf,
        /// Scanned file listing (JSON array)
        #[arg(long)]
        files: PathBuf,
    },
    /// Validate and execute a plan: transform, upload, report
    Execute {
        /// Plan document (JSON)
        #[arg(long)]
        plan: PathBuf,
        /// Scanned file listing (JSON array)
        #[arg(long)]
        files: PathBuf,
        /// Directory for derived artifacts (defaults to a temp directory)
        #[arg(long)]
        work_dir: Option<PathBuf>,
    },
}

fn print_json(value: &impl Serialize) -> anyhow::Result<()> {
    let out = serde_json::to_string_pretty(value).context("Serialize response")?;
    println!("{}", out);
    Ok(())
}

fn read_plan(plan: &Path, files: &Path) -> anyhow::Result<(Plan, Vec<ScannedFile>)> {
    let raw = std::fs::read_to_string(plan)
        .with_context(|| format!("Failed to read plan {}", plan.display()))?;
    let plan = Plan::from_json(&raw)?;
    let raw = std::fs::read_to_string(files)
        .with_context(|| format!("Failed to read file listing {}", files.display()))?;
    let scanned: Vec<ScannedFile> =
        serde_json::from_str(&raw).context("File listing is not a JSON array of scanned files")?;
    Ok((plan, scanned))
}

fn video_normalizer(config: &PipelineConfig, work_dir: Option<&Path>) -> anyhow::Result<VideoNormalizer> {
    let engine = Arc::new(FfmpegEngine::from_config(&config.media)?);
    Ok(match work_dir {
        Some(dir) => VideoNormalizer::new(engine, dir),
        None => VideoNormalizer::with_temp_dir(engine),
    })
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let config = PipelineConfig::from_env().context("Invalid configuration")?;
    let cli = Cli::parse();

    match cli.command {
        Commands::Probe { path } => {
            let probe = DimensionProbe::new(&config.media.ffprobe_path, config.media.probe_timeout)?;
            let descriptor = probe.describe(&path).await?;
            let duration = probe.duration(&path).await;
            print_json(&serde_json::json!({
                "path": descriptor.original_path,
                "width": descriptor.probed_width,
                "height": descriptor.probed_height,
                "byte_size": descriptor.byte_size,
                "duration_seconds": duration,
            }))?;
        }
        Commands::Classify { width, height } => {
            print_json(&classify(width, height))?;
        }
        Commands::Normalize { path } => {
            let normalizer = ImageNormalizer::from_config(&config.media)?;
            let report = normalizer.normalize(&path).await?;
            print_json(&report)?;
        }
        Commands::Endcard { video } => {
            let normalizer = video_normalizer(&config, None)?;
            let endcard = normalizer.extract_endcard(&video).await;
            print_json(&serde_json::json!({ "endcard": endcard }))?;
        }
        Commands::Transcode {
            video,
            width,
            height,
            max_mb,
        } => {
            let normalizer = video_normalizer(&config, None)?;
            let target = match (width, height) {
                (Some(w), Some(h)) => Dimensions::new(w, h),
                _ => {
                    let (w, h) = normalizer.engine().dimensions(&video).await;
                    derive_native_target(w, h).with_context(|| {
                        format!("Could not determine dimensions of {}", video.display())
                    })?
                }
            };
            let max_bytes = match max_mb {
                Some(mb) => mb
                    .checked_mul(1024 * 1024)
                    .with_context(|| format!("--max-mb {} is too large", mb))?,
                None => config.media.native_video_max_bytes,
            };
            let output = normalizer.transcode_to_budget(&video, target, max_bytes).await?;
            print_json(&serde_json::json!({
                "target": target,
                "max_bytes": max_bytes,
                "output": output,
                "within_budget": output.is_some(),
            }))?;
        }
        Commands::Upload { file } => {
            let uploader = uploader_from_config(&config).await?;
            let asset_reference = uploader.upload_file(&file).await?;
            print_json(&serde_json::json!({
                "file": file,
                "asset_reference": asset_reference,
            }))?;
        }
        Commands::ValidatePlan { plan, files } => {
            let (plan, scanned) = read_plan(&plan, &files)?;
            let validated = adprep_core::validate_plan(plan, &scanned)?;
            print_json(&serde_json::json!({
                "valid": true,
                "outputs": validated.outputs().len(),
            }))?;
        }
        Commands::Execute {
            plan,
            files,
            work_dir,
        } => {
            let (plan, scanned) = read_plan(&plan, &files)?;
            let validated = adprep_core::validate_plan(plan, &scanned)?;

            let work_dir = match work_dir {
                Some(dir) => dir,
                None => std::env::temp_dir().join("adprep"),
            };
            std::fs::create_dir_all(&work_dir)
                .with_context(|| format!("Failed to create {}", work_dir.display()))?;

            let uploader: Arc<dyn AssetUploader> = Arc::new(uploader_from_config(&config).await?);
            let executor = PlanExecutor::new(
                ImageNormalizer::from_config(&config.media)?,
                video_normalizer(&config, Some(&work_dir))?,
                uploader,
                &work_dir,
            )
            .with_native_video_budget(config.media.native_video_max_bytes)
            .with_max_concurrency(config.max_concurrency);

            let report = executor.execute(&validated, &scanned).await?;
            print_json(&report)?;
            if report.failed() > 0 {
                anyhow::bail!("{} of {} outputs failed", report.failed(), report.outcomes.len());
            }
        }
    }

    Ok(())
}
