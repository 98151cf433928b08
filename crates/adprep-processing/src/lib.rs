//! adprep processing
//!
//! Media-side building blocks: dimension probing, image normalization
//! (retina downscale, letterbox, budget compression) and video
//! normalization (endcard extraction, native transcode).

pub mod command;
pub mod image;
pub mod probe;
pub mod video;

pub use self::image::{CompressedArtifact, ImageNormalizer, ImageResize};
pub use probe::DimensionProbe;
pub use video::{
    derive_native_target, endcard_timestamp, FfmpegEngine, VideoEngine, VideoNormalizer,
};
