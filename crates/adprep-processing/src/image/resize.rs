//! Resize operations
//!
//! Letterboxing is the only path that changes how the aspect ratio is
//! presented: content is fitted inside the target box and the remainder is
//! padded with solid black. Retina downscales use an exact resize because the
//! ratio already matches.

use adprep_core::{Dimensions, PipelineError, PipelineResult};
use image::imageops::{self, FilterType};
use image::{DynamicImage, GenericImageView, Rgb, RgbImage};

const PAD_COLOR: Rgb<u8> = Rgb([0, 0, 0]);

pub struct ImageResize;

impl ImageResize {
    /// Fit `img` inside `target` preserving aspect ratio, pad with black and
    /// center the content. The result is exactly `target` sized.
    pub fn letterbox(img: &DynamicImage, target: Dimensions) -> PipelineResult<RgbImage> {
        let (src_w, src_h) = img.dimensions();
        if src_w == 0 || src_h == 0 || target.is_zero() {
            return Err(PipelineError::transform(
                "image",
                format!("cannot letterbox {}x{} into {}", src_w, src_h, target),
            ));
        }

        let (fit_w, fit_h) = Self::fit_within(src_w, src_h, target);
        let content = if (fit_w, fit_h) == (src_w, src_h) {
            img.to_rgb8()
        } else {
            img.resize_exact(fit_w, fit_h, FilterType::Lanczos3).to_rgb8()
        };

        let mut canvas = RgbImage::from_pixel(target.width, target.height, PAD_COLOR);
        let x = (target.width - fit_w) / 2;
        let y = (target.height - fit_h) / 2;
        imageops::overlay(&mut canvas, &content, i64::from(x), i64::from(y));

        tracing::debug!(
            source = %Dimensions::new(src_w, src_h),
            content = %Dimensions::new(fit_w, fit_h),
            target = %target,
            "Letterboxed image"
        );

        Ok(canvas)
    }

    /// Resize to exactly `target` without padding.
    pub fn exact(img: &DynamicImage, target: Dimensions) -> PipelineResult<RgbImage> {
        if target.is_zero() {
            return Err(PipelineError::transform(
                "image",
                format!("invalid resize target {}", target),
            ));
        }
        Ok(img
            .resize_exact(target.width, target.height, FilterType::Lanczos3)
            .to_rgb8())
    }

    /// Largest size with the source ratio that fits inside `target`.
    pub fn fit_within(src_w: u32, src_h: u32, target: Dimensions) -> (u32, u32) {
        let scale = f64::min(
            f64::from(target.width) / f64::from(src_w),
            f64::from(target.height) / f64::from(src_h),
        );
        let fit_w = ((f64::from(src_w) * scale).round() as u32).clamp(1, target.width);
        let fit_h = ((f64::from(src_h) * scale).round() as u32).clamp(1, target.height);
        (fit_w, fit_h)
    }
}
