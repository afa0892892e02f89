//! Per-image pipeline: detect, mask, inpaint, blend, score, save.

use std::io::BufWriter;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use image::codecs::jpeg::JpegEncoder;
use image::{GrayImage, ImageFormat, RgbImage};
use tracing::{debug, info};

use crate::blending;
use crate::capability::Inpainter;
use crate::checkpoint::item_key;
use crate::config::BatchOptions;
use crate::detection::{Detection, DetectionCascade, DetectionPass};
use crate::error::{Error, Result};
use crate::mask;
use crate::metrics::{self, QualityScores};

/// Output of [`WatermarkEngine::clean`].
#[derive(Debug, Clone)]
pub struct Cleaned {
    /// Final image; equal to the input when nothing was detected.
    pub image: RgbImage,
    /// What the cascade found.
    pub detection: Detection,
    /// Mask used for reconstruction, if any region was found.
    pub mask: Option<GrayImage>,
    /// Fidelity of `image` against the input, if it was reconstructed.
    pub scores: Option<QualityScores>,
}

/// Summary of one successfully processed file.
#[derive(Debug, Clone)]
pub struct ItemReport {
    /// Checkpoint key (file name).
    pub key: String,
    /// Source path.
    pub input: PathBuf,
    /// Written output path.
    pub output: PathBuf,
    /// Pass that located the watermark, `None` if the image was clean.
    pub pass: Option<DetectionPass>,
    /// Number of regions masked.
    pub regions: usize,
    /// Fraction of pixels reconstructed.
    pub mask_coverage: f32,
    /// Fidelity scores, present when the image was reconstructed.
    pub scores: Option<QualityScores>,
}

/// The watermark engine: a detection cascade plus an inpainting model.
///
/// Create once and share across workers; it holds no per-image state.
#[derive(Clone)]
pub struct WatermarkEngine {
    cascade: DetectionCascade,
    inpainter: Arc<dyn Inpainter>,
    padding: u32,
    jpeg_quality: u8,
    mask_dir: Option<PathBuf>,
}

impl WatermarkEngine {
    /// Assemble an engine with default padding and output quality.
    #[must_use]
    pub fn new(cascade: DetectionCascade, inpainter: Arc<dyn Inpainter>) -> Self {
        let defaults = BatchOptions::default();
        Self {
            cascade,
            inpainter,
            padding: defaults.padding,
            jpeg_quality: defaults.jpeg_quality,
            mask_dir: defaults.mask_dir,
        }
    }

    /// Take padding, output quality, and mask directory from `opts`.
    #[must_use]
    pub fn with_options(mut self, opts: &BatchOptions) -> Self {
        self.padding = opts.padding;
        self.jpeg_quality = opts.jpeg_quality;
        self.mask_dir.clone_from(&opts.mask_dir);
        self
    }

    /// Build the padded mask for a detection on an image of the given size.
    #[must_use]
    pub fn mask_for(&self, width: u32, height: u32, detection: &Detection) -> GrayImage {
        mask::build_mask(width, height, &detection.regions, self.padding)
    }

    /// Inpaint under `mask`, blend back, and score against `original`.
    ///
    /// # Errors
    ///
    /// Propagates inpainter failures.
    pub fn reconstruct(
        &self,
        original: &RgbImage,
        mask: &GrayImage,
    ) -> Result<(RgbImage, QualityScores)> {
        let candidate = self.inpainter.reconstruct(original, mask)?;
        let blended = blending::blend(original, mask, &candidate);
        let scores = metrics::score(original, &blended);
        Ok((blended, scores))
    }

    /// Run the full in-memory pipeline on one image.
    ///
    /// # Errors
    ///
    /// Propagates capability failures.
    pub fn clean(&self, image: RgbImage) -> Result<Cleaned> {
        let detection = self.cascade.detect(&image)?;
        if detection.is_empty() {
            return Ok(Cleaned {
                image,
                detection,
                mask: None,
                scores: None,
            });
        }
        let mask = self.mask_for(image.width(), image.height(), &detection);
        let (cleaned, scores) = self.reconstruct(&image, &mask)?;
        Ok(Cleaned {
            image: cleaned,
            detection,
            mask: Some(mask),
            scores: Some(scores),
        })
    }

    /// Process a single file: decode, clean, audit mask, save.
    ///
    /// A file with no detected watermark is saved unmodified.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Decode`] for unreadable input, capability errors from
    /// the cascade or inpainter, and I/O or format errors from saving.
    pub fn process_file(&self, input: &Path, output: &Path) -> Result<ItemReport> {
        let key = item_key(input)?;
        let image = image::open(input)
            .map_err(|source| Error::Decode {
                path: input.to_path_buf(),
                source,
            })?
            .to_rgb8();

        let detection = self.cascade.detect(&image)?;
        let mut report = ItemReport {
            key,
            input: input.to_path_buf(),
            output: output.to_path_buf(),
            pass: detection.pass,
            regions: detection.regions.len(),
            mask_coverage: 0.0,
            scores: None,
        };

        if let Some(parent) = output.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent)?;
            }
        }

        if detection.is_empty() {
            debug!(item = %report.key, "no watermark found, saving unmodified");
            save_image(&image, output, self.jpeg_quality)?;
            return Ok(report);
        }

        let mask = self.mask_for(image.width(), image.height(), &detection);
        report.mask_coverage = mask::coverage(&mask);
        if let Some(dir) = &self.mask_dir {
            let path = mask_path(dir, input);
            std::fs::create_dir_all(dir)?;
            mask.save(&path)?;
            debug!(item = %report.key, mask = %path.display(), "mask written");
        }

        let (cleaned, scores) = self.reconstruct(&image, &mask)?;
        save_image(&cleaned, output, self.jpeg_quality)?;
        info!(
            item = %report.key,
            ssim = scores.similarity,
            psnr = scores.fidelity,
            "watermark removed"
        );
        report.scores = Some(scores);
        Ok(report)
    }
}

/// Audit mask location for `input`: `<dir>/<file name>.png`.
///
/// The full file name is kept so `logo.jpg` and `logo.png` get distinct masks.
#[must_use]
pub fn mask_path(dir: &Path, input: &Path) -> PathBuf {
    let name = input.file_name().unwrap_or_default().to_string_lossy();
    dir.join(format!("{name}.png"))
}

/// Check if a file has a supported image extension.
#[must_use]
pub fn is_supported_image(path: &Path) -> bool {
    match path.extension().and_then(|e| e.to_str()) {
        Some(ext) => matches!(
            ext.to_lowercase().as_str(),
            "jpg" | "jpeg" | "png" | "webp" | "bmp"
        ),
        None => false,
    }
}

/// List supported images directly inside `dir`, sorted by path.
///
/// # Errors
///
/// Returns [`Error::Io`] if the directory cannot be read.
pub fn collect_images(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut images: Vec<PathBuf> = std::fs::read_dir(dir)?
        .filter_map(std::result::Result::ok)
        .filter(|e| e.file_type().map(|ft| ft.is_file()).unwrap_or(false))
        .map(|e| e.path())
        .filter(|p| is_supported_image(p))
        .collect();
    images.sort();
    Ok(images)
}

/// Save an RGB image, writing JPEGs at `jpeg_quality`.
///
/// # Errors
///
/// Returns an error if the format is unsupported or writing fails.
pub fn save_image(img: &RgbImage, path: &Path, jpeg_quality: u8) -> Result<()> {
    let format =
        ImageFormat::from_path(path).map_err(|e| Error::UnsupportedFormat(e.to_string()))?;

    match format {
        ImageFormat::Jpeg => {
            let file = BufWriter::new(std::fs::File::create(path)?);
            let mut encoder = JpegEncoder::new_with_quality(file, jpeg_quality);
            encoder.encode_image(img)?;
        }
        ImageFormat::Png | ImageFormat::WebP | ImageFormat::Bmp => {
            img.save_with_format(path, format)?;
        }
        _ => {
            return Err(Error::UnsupportedFormat(format!("{format:?}")));
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use image::Rgb;

    use super::*;
    use crate::capability::{FixedRegions, RegionDetector};
    use crate::detection::CascadeConfig;
    use crate::inpaint::DiffusionInpainter;
    use crate::region::Region;

    fn engine(regions: Vec<Region>) -> WatermarkEngine {
        let detector: Arc<dyn RegionDetector> = Arc::new(FixedRegions::new(regions));
        let config = CascadeConfig::default();
        let cascade = DetectionCascade::new(Some(detector), None, config).unwrap();
        WatermarkEngine::new(cascade, Arc::new(DiffusionInpainter::default()))
    }

    #[test]
    fn clean_without_detection_returns_input() {
        let img = RgbImage::from_pixel(10, 10, Rgb([5, 6, 7]));
        let out = engine(Vec::new()).clean(img.clone()).unwrap();
        assert_eq!(out.image, img);
        assert!(out.mask.is_none());
        assert!(out.scores.is_none());
    }

    #[test]
    fn clean_replaces_only_masked_pixels() {
        let mut img = RgbImage::from_pixel(60, 60, Rgb([90, 90, 90]));
        img.put_pixel(50, 50, Rgb([255, 0, 0]));
        let out = engine(vec![Region::new(50, 50, 50, 50)])
            .with_options(&BatchOptions {
                padding: 2,
                ..BatchOptions::default()
            })
            .clean(img.clone())
            .unwrap();
        let mask = out.mask.unwrap();
        assert_eq!(*out.image.get_pixel(50, 50), Rgb([90, 90, 90]));
        for (x, y, m) in mask.enumerate_pixels() {
            if m[0] == mask::MASK_KEEP {
                assert_eq!(out.image.get_pixel(x, y), img.get_pixel(x, y));
            }
        }
        assert!(out.scores.unwrap().similarity > 0.9);
    }

    #[test]
    fn process_file_writes_output_and_mask() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("photo.png");
        RgbImage::from_pixel(40, 40, Rgb([10, 20, 30]))
            .save(&input)
            .unwrap();
        let output = dir.path().join("out").join("photo.png");
        let masks = dir.path().join("masks");

        let report = engine(vec![Region::new(5, 5, 10, 10)])
            .with_options(&BatchOptions {
                mask_dir: Some(masks.clone()),
                ..BatchOptions::default()
            })
            .process_file(&input, &output)
            .unwrap();

        assert_eq!(report.key, "photo.png");
        assert_eq!(report.pass, Some(DetectionPass::Primary));
        assert_eq!(report.regions, 1);
        assert!(output.exists());
        assert!(masks.join("photo.png.png").exists());
        assert!(report.mask_coverage > 0.0);
    }

    #[test]
    fn process_file_reports_decode_failure() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("broken.png");
        std::fs::write(&input, b"not an image").unwrap();
        let err = engine(Vec::new())
            .process_file(&input, &dir.path().join("broken_out.png"))
            .unwrap_err();
        assert!(matches!(err, Error::Decode { .. }));
    }

    #[test]
    fn save_image_rejects_unknown_extension() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("x.unknownext");
        let err = save_image(&RgbImage::new(2, 2), &path, 90).unwrap_err();
        assert!(matches!(err, Error::UnsupportedFormat(_)));
    }

    #[test]
    fn collect_images_filters_and_sorts() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["b.PNG", "a.jpg", "notes.txt", "c.webp"] {
            std::fs::write(dir.path().join(name), b"").unwrap();
        }
        std::fs::create_dir(dir.path().join("sub.png")).unwrap();
        let found: Vec<String> = collect_images(dir.path())
            .unwrap()
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(found, vec!["a.jpg", "b.PNG", "c.webp"]);
    }

    #[test]
    fn mask_path_keeps_full_file_name() {
        let jpeg = mask_path(Path::new("/m"), Path::new("/in/logo.jpg"));
        let png = mask_path(Path::new("/m"), Path::new("/other/logo.png"));
        assert_eq!(jpeg, PathBuf::from("/m/logo.jpg.png"));
        assert_eq!(png, PathBuf::from("/m/logo.png.png"));
        assert_ne!(jpeg, png);
    }

    #[test]
    fn is_supported_image_accepts_common_formats() {
        assert!(is_supported_image(Path::new("photo.jpg")));
        assert!(is_supported_image(Path::new("photo.JPEG")));
        assert!(is_supported_image(Path::new("photo.png")));
        assert!(is_supported_image(Path::new("photo.webp")));
        assert!(is_supported_image(Path::new("photo.bmp")));
    }

    #[test]
    fn is_supported_image_rejects_unsupported_formats() {
        assert!(!is_supported_image(Path::new("photo.gif")));
        assert!(!is_supported_image(Path::new("photo.txt")));
        assert!(!is_supported_image(Path::new("photo")));
    }
}
