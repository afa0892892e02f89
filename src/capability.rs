//! Capability providers consumed by the pipeline.
//!
//! The detection model, text recognizer, and inpainting model are black boxes:
//! the pipeline only cares about their inputs, outputs, and failure modes.
//! Implementations must be shareable across worker threads.

use image::{DynamicImage, GrayImage, RgbImage};
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::region::Region;

/// A fast region detector, typically a pretrained logo/object detector.
pub trait RegionDetector: Send + Sync {
    /// Return candidate watermark regions scoring at least `confidence_threshold`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Capability`] when inference fails.
    fn detect(&self, image: &RgbImage, confidence_threshold: f32) -> Result<Vec<Region>>;
}

/// One piece of text reported by a [`TextRecognizer`].
#[derive(Debug, Clone, PartialEq)]
pub struct TextHit {
    /// Outline of the text as reported by the engine; not necessarily axis-aligned.
    pub polygon: Vec<(f32, f32)>,
    /// Recognized text.
    pub text: String,
    /// Recognition confidence in `[0, 1]`.
    pub confidence: f32,
}

/// Tuning knobs forwarded verbatim to the text engine.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecognizerOptions {
    /// Minimum text confidence for a character region.
    pub text_threshold: f32,
    /// Lower bound on text score used when growing regions.
    pub low_text: f32,
    /// Threshold for linking characters into words.
    pub link_threshold: f32,
}

impl Default for RecognizerOptions {
    fn default() -> Self {
        Self {
            text_threshold: 0.1,
            low_text: 0.05,
            link_threshold: 0.2,
        }
    }
}

/// A text recognizer (OCR engine) used by the fallback passes.
pub trait TextRecognizer: Send + Sync {
    /// Recognize all text in `image` (a full frame, an enhanced copy, or a crop).
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Capability`] when recognition fails.
    fn read(&self, image: &DynamicImage, options: &RecognizerOptions) -> Result<Vec<TextHit>>;
}

/// A generative model that fills masked pixels with plausible content.
///
/// The returned image may differ in size from the input; the blend step
/// resizes it back.
pub trait Inpainter: Send + Sync {
    /// Reconstruct `image` wherever `mask` is non-zero.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Capability`] when reconstruction fails.
    fn reconstruct(&self, image: &RgbImage, mask: &GrayImage) -> Result<RgbImage>;
}

/// A detector that always reports the same regions.
///
/// Useful when the watermark sits at a known position in every image.
#[derive(Debug, Clone, Default)]
pub struct FixedRegions {
    regions: Vec<Region>,
}

impl FixedRegions {
    /// Report `regions` for every image.
    #[must_use]
    pub fn new(regions: Vec<Region>) -> Self {
        Self { regions }
    }
}

impl RegionDetector for FixedRegions {
    fn detect(&self, _image: &RgbImage, _confidence_threshold: f32) -> Result<Vec<Region>> {
        Ok(self.regions.clone())
    }
}
