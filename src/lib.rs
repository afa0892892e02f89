//! Remove visible watermarks from batches of images.
//!
//! Each image goes through detect → mask → inpaint → blend → score → save.
//! Detection is a cascade: a fast region detector first, then progressively
//! more expensive text-recognition passes until one finds watermark text.
//! Blending copies reconstructed pixels only inside the mask, so every
//! background pixel of the output is bit-identical to the input.
//!
//! Batches run on a fixed worker pool and record finished items in an
//! append-only checkpoint, so an interrupted run resumes where it stopped.
//!
//! The detector, text recognizer, and inpainting model are capabilities
//! supplied by the caller through [`RegionDetector`], [`TextRecognizer`], and
//! [`Inpainter`]. [`FixedRegions`] and [`DiffusionInpainter`] are simple
//! built-in providers.
//!
//! # Quick Start
//!
//! ```no_run
//! use std::path::Path;
//! use std::sync::Arc;
//!
//! use batch_watermark_removal::{
//!     BatchOptions, BatchProcessor, CascadeConfig, DetectionCascade, DiffusionInpainter,
//!     FixedRegions, Region, RegionDetector, WatermarkEngine,
//! };
//!
//! let detector: Arc<dyn RegionDetector> =
//!     Arc::new(FixedRegions::new(vec![Region::new(10, 10, 120, 40)]));
//! let cascade = DetectionCascade::new(Some(detector), None, CascadeConfig::default())
//!     .expect("valid cascade");
//! let engine = WatermarkEngine::new(cascade, Arc::new(DiffusionInpainter::default()));
//!
//! let batch = BatchProcessor::from_options(engine, &BatchOptions::default())
//!     .expect("checkpoint readable");
//! let stats = batch
//!     .process_directory(Path::new("data/input"), Path::new("data/output"))
//!     .expect("batch ran");
//! println!("{stats}");
//! ```

#![deny(missing_docs)]

pub mod batch;
pub mod blending;
pub mod capability;
pub mod checkpoint;
pub mod config;
pub mod detection;
mod engine;
pub mod error;
pub mod inpaint;
pub mod mask;
pub mod metrics;
pub mod region;

pub use batch::{BatchProcessor, RunStatistics};
pub use capability::{
    FixedRegions, Inpainter, RecognizerOptions, RegionDetector, TextHit, TextRecognizer,
};
pub use checkpoint::CheckpointStore;
pub use config::BatchOptions;
pub use detection::{
    detect_regions, CascadeConfig, Detection, DetectionCascade, DetectionPass, FallbackPass,
};
pub use engine::{
    collect_images, is_supported_image, mask_path, save_image, Cleaned, ItemReport, WatermarkEngine,
};
pub use error::{Error, Result};
pub use inpaint::DiffusionInpainter;
pub use metrics::QualityScores;
pub use region::Region;
