//! Ordered, early-exiting watermark detection cascade.
//!
//! Detection runs in two tiers:
//! 1. **Primary**: the fast region detector. Any hit ends the cascade.
//! 2. **Fallback**: an ordered list of text-recognition passes, tried until one
//!    yields a region whose text contains a configured target substring:
//!    - *standard* pass on the unmodified image,
//!    - *contrast-enhanced* pass on a stretched grayscale copy,
//!    - *upscaled* pass, with regions mapped back to source coordinates,
//!    - *targeted-crop* pass over the area watermarks most often occupy, with
//!      regions translated back by the crop offset.
//!
//! Every region returned is in source-image pixel space.

use std::fmt;
use std::path::Path;
use std::sync::Arc;

use image::{imageops, DynamicImage, GrayImage, Luma, RgbImage};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::capability::{RecognizerOptions, RegionDetector, TextHit, TextRecognizer};
use crate::error::{Error, Result};
use crate::region::Region;

/// Default confidence threshold for the primary detector.
const DEFAULT_CONFIDENCE: f32 = 0.15;
/// Default contrast gain for the enhanced pass.
const DEFAULT_CONTRAST_ALPHA: f32 = 2.0;
/// Default upscale factor for the upscaled pass.
const DEFAULT_UPSCALE: f32 = 1.5;
/// Default watermark text fragments, including partial OCR reads.
const DEFAULT_TARGETS: [&str; 9] = [
    "wedme", "megood", "wed", "good", "edme", "dmegoo", "dmeg", "wmg", "edmeg",
];

/// The stage of the cascade that produced a detection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetectionPass {
    /// The fast region detector.
    Primary,
    /// Text recognition on the unmodified image.
    Standard,
    /// Text recognition on a contrast-stretched grayscale copy.
    ContrastEnhanced,
    /// Text recognition on an upscaled copy.
    Upscaled,
    /// Text recognition on a fixed sub-rectangle.
    TargetedCrop,
}

impl DetectionPass {
    /// Short machine-friendly name.
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::Primary => "primary",
            Self::Standard => "standard",
            Self::ContrastEnhanced => "contrast",
            Self::Upscaled => "upscaled",
            Self::TargetedCrop => "targeted-crop",
        }
    }
}

impl fmt::Display for DetectionPass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// One text-recognition fallback strategy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FallbackPass {
    /// Recognize text on the image as-is.
    Standard,
    /// Grayscale, then `|alpha * gray + beta|` saturated to `u8`.
    ContrastEnhanced {
        /// Contrast gain.
        alpha: f32,
        /// Brightness offset.
        beta: f32,
    },
    /// Resize by `factor` (bilinear) and scale hits back down.
    Upscaled {
        /// Scale factor, must be positive.
        factor: f32,
    },
    /// Recognize only inside a fractional sub-rectangle of the image.
    TargetedCrop {
        /// Left edge as a fraction of width.
        x_start: f32,
        /// Right edge as a fraction of width.
        x_end: f32,
        /// Top edge as a fraction of height.
        y_start: f32,
        /// Bottom edge as a fraction of height.
        y_end: f32,
    },
}

impl FallbackPass {
    /// The four passes in their standard order.
    #[must_use]
    pub fn default_sequence() -> Vec<Self> {
        vec![
            Self::Standard,
            Self::ContrastEnhanced {
                alpha: DEFAULT_CONTRAST_ALPHA,
                beta: 0.0,
            },
            Self::Upscaled {
                factor: DEFAULT_UPSCALE,
            },
            Self::TargetedCrop {
                x_start: 0.0,
                x_end: 0.5,
                y_start: 0.2,
                y_end: 0.8,
            },
        ]
    }

    /// Which [`DetectionPass`] this strategy reports as.
    #[must_use]
    pub fn kind(&self) -> DetectionPass {
        match self {
            Self::Standard => DetectionPass::Standard,
            Self::ContrastEnhanced { .. } => DetectionPass::ContrastEnhanced,
            Self::Upscaled { .. } => DetectionPass::Upscaled,
            Self::TargetedCrop { .. } => DetectionPass::TargetedCrop,
        }
    }

    fn validate(&self) -> Result<()> {
        match *self {
            Self::Upscaled { factor } => {
                if factor.is_finite() && factor > 1.0 {
                    Ok(())
                } else {
                    Err(Error::Misconfigured(format!(
                        "upscale factor must be greater than 1, got {factor}"
                    )))
                }
            }
            Self::TargetedCrop {
                x_start,
                x_end,
                y_start,
                y_end,
            } => {
                let in_unit = [x_start, x_end, y_start, y_end]
                    .iter()
                    .all(|f| (0.0..=1.0).contains(f));
                if in_unit && x_start < x_end && y_start < y_end {
                    Ok(())
                } else {
                    Err(Error::Misconfigured(format!(
                        "crop fractions out of range: x {x_start}..{x_end}, y {y_start}..{y_end}"
                    )))
                }
            }
            Self::Standard | Self::ContrastEnhanced { .. } => Ok(()),
        }
    }

    /// Run this pass and return matching regions in source coordinates.
    ///
    /// # Errors
    ///
    /// Propagates any recognizer failure.
    #[allow(
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss,
        clippy::cast_precision_loss,
        clippy::cast_possible_wrap
    )]
    pub fn attempt(
        &self,
        image: &RgbImage,
        recognizer: &dyn TextRecognizer,
        matcher: &TargetMatcher,
        options: &RecognizerOptions,
    ) -> Result<Vec<Region>> {
        match *self {
            Self::Standard => {
                let hits = recognizer.read(&DynamicImage::ImageRgb8(image.clone()), options)?;
                Ok(matcher.regions(&hits))
            }
            Self::ContrastEnhanced { alpha, beta } => {
                let enhanced = contrast_stretch(image, alpha, beta);
                let hits = recognizer.read(&DynamicImage::ImageLuma8(enhanced), options)?;
                Ok(matcher.regions(&hits))
            }
            Self::Upscaled { factor } => {
                let w = ((image.width() as f32 * factor) as u32).max(1);
                let h = ((image.height() as f32 * factor) as u32).max(1);
                let scaled = imageops::resize(image, w, h, imageops::FilterType::Triangle);
                let hits = recognizer.read(&DynamicImage::ImageRgb8(scaled), options)?;
                Ok(matcher
                    .regions(&hits)
                    .into_iter()
                    .map(|r| r.scaled_down(factor))
                    .collect())
            }
            Self::TargetedCrop {
                x_start,
                x_end,
                y_start,
                y_end,
            } => {
                let (w, h) = (image.width() as f32, image.height() as f32);
                let x1 = (w * x_start) as u32;
                let x2 = ((w * x_end) as u32).min(image.width());
                let y1 = (h * y_start) as u32;
                let y2 = ((h * y_end) as u32).min(image.height());
                if x2 <= x1 || y2 <= y1 {
                    return Ok(Vec::new());
                }
                let crop = imageops::crop_imm(image, x1, y1, x2 - x1, y2 - y1).to_image();
                let hits = recognizer.read(&DynamicImage::ImageRgb8(crop), options)?;
                Ok(matcher
                    .regions(&hits)
                    .into_iter()
                    .map(|r| r.translated(x1 as i32, y1 as i32))
                    .collect())
            }
        }
    }
}

/// Decides which recognized strings count as watermark text.
#[derive(Debug, Clone, Default)]
pub struct TargetMatcher {
    targets: Vec<String>,
}

impl TargetMatcher {
    /// Build a matcher from target substrings (case-insensitive; blanks dropped).
    #[must_use]
    pub fn new<S: AsRef<str>>(targets: &[S]) -> Self {
        let targets = targets
            .iter()
            .map(|t| t.as_ref().trim().to_lowercase())
            .filter(|t| !t.is_empty())
            .collect();
        Self { targets }
    }

    /// True if the lower-cased, trimmed `text` contains any target.
    #[must_use]
    pub fn matches(&self, text: &str) -> bool {
        let clean = text.trim().to_lowercase();
        self.targets.iter().any(|t| clean.contains(t.as_str()))
    }

    /// Bounding boxes of every hit whose text matches.
    #[must_use]
    pub fn regions(&self, hits: &[TextHit]) -> Vec<Region> {
        hits.iter()
            .filter(|hit| self.matches(&hit.text))
            .filter_map(|hit| {
                debug!(text = %hit.text, confidence = hit.confidence, "watermark text found");
                Region::from_polygon(&hit.polygon)
            })
            .collect()
    }
}

/// Tunables for the cascade.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CascadeConfig {
    /// Confidence threshold handed to the primary detector.
    pub confidence_threshold: f32,
    /// Substrings that mark recognized text as a watermark.
    pub targets: Vec<String>,
    /// Fallback passes, tried in order.
    pub passes: Vec<FallbackPass>,
    /// Options forwarded to the text recognizer.
    pub recognizer: RecognizerOptions,
}

impl Default for CascadeConfig {
    fn default() -> Self {
        Self {
            confidence_threshold: DEFAULT_CONFIDENCE,
            targets: DEFAULT_TARGETS.iter().map(ToString::to_string).collect(),
            passes: FallbackPass::default_sequence(),
            recognizer: RecognizerOptions::default(),
        }
    }
}

/// Regions found for one image plus the pass that found them.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Detection {
    /// Candidate watermark regions in source coordinates.
    pub regions: Vec<Region>,
    /// Pass that produced `regions`; `None` when nothing was found.
    pub pass: Option<DetectionPass>,
}

impl Detection {
    /// True when no pass found a region.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.regions.is_empty()
    }
}

/// Run the cascade against borrowed capabilities.
///
/// A missing `detector` skips the primary tier; a missing `recognizer` skips
/// all fallback passes.
///
/// # Errors
///
/// Propagates capability failures.
pub fn detect_regions(
    image: &RgbImage,
    detector: Option<&dyn RegionDetector>,
    recognizer: Option<&dyn TextRecognizer>,
    config: &CascadeConfig,
) -> Result<Detection> {
    let matcher = TargetMatcher::new(&config.targets);
    run(image, detector, recognizer, config, &matcher)
}

fn run(
    image: &RgbImage,
    detector: Option<&dyn RegionDetector>,
    recognizer: Option<&dyn TextRecognizer>,
    config: &CascadeConfig,
    matcher: &TargetMatcher,
) -> Result<Detection> {
    if let Some(detector) = detector {
        let regions = detector.detect(image, config.confidence_threshold)?;
        if !regions.is_empty() {
            debug!(
                count = regions.len(),
                "primary detector hit, skipping text passes"
            );
            return Ok(Detection {
                regions,
                pass: Some(DetectionPass::Primary),
            });
        }
    }

    let Some(recognizer) = recognizer else {
        return Ok(Detection::default());
    };

    for pass in &config.passes {
        let regions = pass.attempt(image, recognizer, matcher, &config.recognizer)?;
        if !regions.is_empty() {
            info!(pass = %pass.kind(), count = regions.len(), "watermark text located");
            return Ok(Detection {
                regions,
                pass: Some(pass.kind()),
            });
        }
        debug!(pass = %pass.kind(), "no watermark text");
    }

    Ok(Detection::default())
}

/// The detection cascade with its capabilities bound.
#[derive(Clone)]
pub struct DetectionCascade {
    detector: Option<Arc<dyn RegionDetector>>,
    recognizer: Option<Arc<dyn TextRecognizer>>,
    config: CascadeConfig,
    matcher: TargetMatcher,
}

impl DetectionCascade {
    /// Bind capabilities and configuration.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Misconfigured`] if neither capability is provided or a
    /// fallback pass has invalid parameters.
    pub fn new(
        detector: Option<Arc<dyn RegionDetector>>,
        recognizer: Option<Arc<dyn TextRecognizer>>,
        config: CascadeConfig,
    ) -> Result<Self> {
        if detector.is_none() && recognizer.is_none() {
            return Err(Error::Misconfigured(
                "no region detector or text recognizer configured".to_string(),
            ));
        }
        for pass in &config.passes {
            pass.validate()?;
        }
        if recognizer.is_some() && config.targets.is_empty() {
            warn!("recognizer configured without targets; fallback passes cannot match");
        }
        let matcher = TargetMatcher::new(&config.targets);
        Ok(Self {
            detector,
            recognizer,
            config,
            matcher,
        })
    }

    /// Locate watermark regions in a decoded image.
    ///
    /// # Errors
    ///
    /// Propagates capability failures.
    pub fn detect(&self, image: &RgbImage) -> Result<Detection> {
        run(
            image,
            self.detector.as_deref(),
            self.recognizer.as_deref(),
            &self.config,
            &self.matcher,
        )
    }

    /// Decode `path` and detect. An undecodable image yields an empty detection.
    ///
    /// # Errors
    ///
    /// Propagates capability failures.
    pub fn detect_path(&self, path: &Path) -> Result<Detection> {
        match image::open(path) {
            Ok(img) => self.detect(&img.to_rgb8()),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "unreadable image, nothing detected");
                Ok(Detection::default())
            }
        }
    }
}

/// Grayscale (`0.299*R + 0.587*G + 0.114*B`) followed by `|alpha*g + beta|`,
/// saturated to `u8`.
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn contrast_stretch(image: &RgbImage, alpha: f32, beta: f32) -> GrayImage {
    GrayImage::from_fn(image.width(), image.height(), |x, y| {
        let px = image.get_pixel(x, y);
        let lum = 0.299 * f32::from(px[0]) + 0.587 * f32::from(px[1]) + 0.114 * f32::from(px[2]);
        let stretched = (alpha * lum.round() + beta).abs().round().clamp(0.0, 255.0);
        Luma([stretched as u8])
    })
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    use super::*;

    /// Returns `responses[n]` on the n-th call and records input sizes.
    struct ScriptedRecognizer {
        responses: Vec<Vec<TextHit>>,
        calls: AtomicUsize,
        sizes: Mutex<Vec<(u32, u32)>>,
    }

    impl ScriptedRecognizer {
        fn new(responses: Vec<Vec<TextHit>>) -> Self {
            Self {
                responses,
                calls: AtomicUsize::new(0),
                sizes: Mutex::new(Vec::new()),
            }
        }
    }

    impl TextRecognizer for ScriptedRecognizer {
        fn read(&self, image: &DynamicImage, _options: &RecognizerOptions) -> Result<Vec<TextHit>> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            self.sizes
                .lock()
                .unwrap()
                .push((image.width(), image.height()));
            Ok(self.responses.get(n).cloned().unwrap_or_default())
        }
    }

    fn hit(text: &str, x1: f32, y1: f32, x2: f32, y2: f32) -> TextHit {
        TextHit {
            polygon: vec![(x1, y1), (x2, y1), (x2, y2), (x1, y2)],
            text: text.to_string(),
            confidence: 0.4,
        }
    }

    #[test]
    fn matcher_normalizes_case_and_whitespace() {
        let m = TargetMatcher::new(&["WedMe", "  ", "good"]);
        assert!(m.matches("  wedmegood.com "));
        assert!(m.matches("GOOD"));
        assert!(!m.matches("watermark"));
        assert!(!TargetMatcher::default().matches("anything"));
    }

    #[test]
    fn default_targets_catch_partial_reads() {
        let m = TargetMatcher::new(&CascadeConfig::default().targets);
        assert!(m.matches("WEDMEGOOD"));
        assert!(m.matches("dmeg"));
        assert!(!m.matches("sunset"));
    }

    #[test]
    fn matcher_ignores_non_matching_hits() {
        let m = TargetMatcher::new(&["logo"]);
        let hits = vec![
            hit("caption", 0.0, 0.0, 5.0, 5.0),
            hit("LOGO", 1.0, 2.0, 3.0, 4.0),
        ];
        assert_eq!(m.regions(&hits), vec![Region::new(1, 2, 3, 4)]);
    }

    #[test]
    fn contrast_stretch_saturates() {
        let img = RgbImage::from_fn(3, 1, |x, _| match x {
            0 => image::Rgb([0, 0, 0]),
            1 => image::Rgb([100, 100, 100]),
            _ => image::Rgb([200, 200, 200]),
        });
        let out = contrast_stretch(&img, 2.0, 0.0);
        assert_eq!(out.get_pixel(0, 0)[0], 0);
        assert_eq!(out.get_pixel(1, 0)[0], 200);
        assert_eq!(out.get_pixel(2, 0)[0], 255);

        let neg = contrast_stretch(&img, 1.0, -150.0);
        assert_eq!(neg.get_pixel(0, 0)[0], 150);
    }

    #[test]
    fn targeted_crop_translates_hits_by_offset() {
        let rec = ScriptedRecognizer::new(vec![vec![hit("mark", 10.0, 5.0, 30.0, 15.0)]]);
        let pass = FallbackPass::TargetedCrop {
            x_start: 0.0,
            x_end: 0.5,
            y_start: 0.2,
            y_end: 0.8,
        };
        let regions = pass
            .attempt(
                &RgbImage::new(200, 100),
                &rec,
                &TargetMatcher::new(&["mark"]),
                &RecognizerOptions::default(),
            )
            .unwrap();
        assert_eq!(regions, vec![Region::new(10, 25, 30, 35)]);
        assert_eq!(*rec.sizes.lock().unwrap(), vec![(100, 60)]);
    }

    #[test]
    fn upscaled_pass_reads_enlarged_image() {
        let rec = ScriptedRecognizer::new(vec![vec![hit("mark", 30.0, 15.0, 60.0, 45.0)]]);
        let pass = FallbackPass::Upscaled { factor: 1.5 };
        let regions = pass
            .attempt(
                &RgbImage::new(40, 20),
                &rec,
                &TargetMatcher::new(&["mark"]),
                &RecognizerOptions::default(),
            )
            .unwrap();
        assert_eq!(regions, vec![Region::new(20, 10, 40, 30)]);
        assert_eq!(*rec.sizes.lock().unwrap(), vec![(60, 30)]);
    }

    #[test]
    fn contrast_pass_hands_grayscale_to_recognizer() {
        struct GrayOnly;
        impl TextRecognizer for GrayOnly {
            fn read(&self, image: &DynamicImage, _: &RecognizerOptions) -> Result<Vec<TextHit>> {
                assert!(matches!(image, DynamicImage::ImageLuma8(_)));
                Ok(vec![hit("mark", 0.0, 0.0, 1.0, 1.0)])
            }
        }
        let pass = FallbackPass::ContrastEnhanced {
            alpha: 2.0,
            beta: 0.0,
        };
        let regions = pass
            .attempt(
                &RgbImage::new(8, 8),
                &GrayOnly,
                &TargetMatcher::new(&["mark"]),
                &RecognizerOptions::default(),
            )
            .unwrap();
        assert_eq!(regions.len(), 1);
    }

    #[test]
    fn cascade_without_capabilities_is_misconfigured() {
        let err = DetectionCascade::new(None, None, CascadeConfig::default())
            .err()
            .unwrap();
        assert!(matches!(err, Error::Misconfigured(_)));
    }

    #[test]
    fn cascade_rejects_bad_pass_parameters() {
        let rec: Arc<dyn TextRecognizer> = Arc::new(ScriptedRecognizer::new(Vec::new()));
        let config = CascadeConfig {
            passes: vec![FallbackPass::Upscaled { factor: 0.0 }],
            ..CascadeConfig::default()
        };
        assert!(DetectionCascade::new(None, Some(Arc::clone(&rec)), config).is_err());

        let config = CascadeConfig {
            passes: vec![FallbackPass::Upscaled { factor: 1.0 }],
            ..CascadeConfig::default()
        };
        assert!(DetectionCascade::new(None, Some(Arc::clone(&rec)), config).is_err());

        let config = CascadeConfig {
            passes: vec![FallbackPass::Upscaled { factor: 2.0 }],
            ..CascadeConfig::default()
        };
        assert!(DetectionCascade::new(None, Some(Arc::clone(&rec)), config).is_ok());

        let inverted = FallbackPass::TargetedCrop {
            x_start: 0.6,
            x_end: 0.5,
            y_start: 0.0,
            y_end: 1.0,
        };
        let config = CascadeConfig {
            passes: vec![inverted],
            ..CascadeConfig::default()
        };
        assert!(DetectionCascade::new(None, Some(rec), config).is_err());
    }

    #[test]
    fn cascade_exhausting_all_passes_returns_empty() {
        let rec = Arc::new(ScriptedRecognizer::new(Vec::new()));
        let cascade = DetectionCascade::new(
            None,
            Some(Arc::clone(&rec) as Arc<dyn TextRecognizer>),
            CascadeConfig {
                targets: vec!["mark".into()],
                ..CascadeConfig::default()
            },
        )
        .unwrap();
        let detection = cascade.detect(&RgbImage::new(32, 32)).unwrap();
        assert!(detection.is_empty());
        assert_eq!(detection.pass, None);
        assert_eq!(rec.calls.load(Ordering::SeqCst), 4);
    }

    #[test]
    fn unreadable_path_yields_empty_detection() {
        let rec: Arc<dyn TextRecognizer> = Arc::new(ScriptedRecognizer::new(Vec::new()));
        let cascade = DetectionCascade::new(None, Some(rec), CascadeConfig::default()).unwrap();
        let detection = cascade
            .detect_path(Path::new("/definitely/not/here.png"))
            .unwrap();
        assert!(detection.is_empty());
    }
}
