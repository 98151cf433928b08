//! Video processing module
//!
//! - `VideoEngine` seam and its ffmpeg implementation (engine)
//! - Endcard extraction, native target selection and budget transcoding (normalizer)

pub mod engine;
pub mod normalizer;

pub use engine::{FfmpegEngine, VideoEngine};
pub use normalizer::{derive_native_target, endcard_timestamp, VideoNormalizer, CRF_LADDER};
