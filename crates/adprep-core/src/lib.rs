//! adprep core library
//!
//! Shared building blocks for the media normalization and upload pipeline:
//! the accepted-size catalogs, size classification, the data model, plan
//! documents and their validation, the error taxonomy, configuration and
//! progress events.

pub mod catalog;
pub mod classify;
pub mod config;
pub mod error;
pub mod models;
pub mod plan;
pub mod progress;

// Re-export commonly used types
pub use catalog::{Dimensions, SizeCatalogEntry, SizeCategory};
pub use classify::{classify, detect_retina, ClassificationResult, CreativeType, RetinaMatch};
pub use config::{ApiConfig, MediaConfig, PipelineConfig, TlsMode};
pub use error::{LogLevel, PipelineError, PipelineResult};
pub use models::{
    AssetDescriptor, NormalizationReport, ScannedFile, IMAGE_MAX_BYTES, NATIVE_VIDEO_MAX_BYTES,
};
pub use plan::{
    validate_plan, EndcardMode, EndcardPlan, OutputKind, Plan, PlanGroup, PlanOutput,
    PlanTransform, TargetSize, ValidatedPlan,
};
pub use progress::{Operation, ProgressEvent, ProgressReporter};
