//! Blend-back of reconstructed pixels into the original image.
//!
//! The inpainting model sees the whole image and may alter pixels far outside
//! the watermark. Blending selects, per pixel, either the original or the
//! reconstruction according to the mask, so background pixels come out
//! bit-identical to the input no matter what the model returned.

use std::borrow::Cow;

use image::{imageops, GrayImage, RgbImage};

use crate::mask::MASK_KEEP;

/// Resize `candidate` to `width` x `height` (bilinear), borrowing when it already fits.
#[must_use]
pub fn match_dimensions(candidate: &RgbImage, width: u32, height: u32) -> Cow<'_, RgbImage> {
    if candidate.dimensions() == (width, height) {
        Cow::Borrowed(candidate)
    } else {
        Cow::Owned(imageops::resize(candidate, width, height, imageops::FilterType::Triangle))
    }
}

/// Combine `original` and `reconstruction` under `mask`.
///
/// Pixels where the mask is [`MASK_KEEP`] are copied from `original`; all
/// others are taken from `reconstruction`, resized first if its dimensions
/// differ from `original`.
///
/// # Panics
///
/// Panics if `mask` and `original` have different dimensions.
#[must_use]
pub fn blend(original: &RgbImage, mask: &GrayImage, reconstruction: &RgbImage) -> RgbImage {
    assert_eq!(
        original.dimensions(),
        mask.dimensions(),
        "mask must match the original image"
    );
    let candidate = match_dimensions(reconstruction, original.width(), original.height());

    let mut out = original.clone();
    for ((px, m), fill) in out.pixels_mut().zip(mask.pixels()).zip(candidate.pixels()) {
        if m[0] != MASK_KEEP {
            *px = *fill;
        }
    }
    out
}
