//! Batch configuration, loadable from TOML.
//!
//! Every field has a default, so a config file only needs the keys it changes:
//!
//! ```toml
//! workers = 8
//! mask_dir = "data/masks"
//!
//! [cascade]
//! confidence_threshold = 0.2
//! targets = ["sample", "preview"]
//!
//! [[cascade.passes]]
//! kind = "standard"
//!
//! [[cascade.passes]]
//! kind = "upscaled"
//! factor = 2.0
//! ```

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::checkpoint::DEFAULT_CHECKPOINT_FILE;
use crate::detection::CascadeConfig;
use crate::error::{Error, Result};
use crate::mask::DEFAULT_PADDING;

/// Default worker pool size.
pub const DEFAULT_WORKERS: usize = 4;
/// Default JPEG output quality.
pub const DEFAULT_JPEG_QUALITY: u8 = 100;

/// Settings for one batch run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchOptions {
    /// Number of parallel workers.
    pub workers: usize,
    /// Path of the completed-items log.
    pub checkpoint: PathBuf,
    /// Directory receiving one audit mask per processed item, if set.
    pub mask_dir: Option<PathBuf>,
    /// Pixels of padding around each detected region.
    pub padding: u32,
    /// JPEG quality (1-100) for `.jpg`/`.jpeg` outputs.
    pub jpeg_quality: u8,
    /// Detection cascade settings.
    pub cascade: CascadeConfig,
}

impl Default for BatchOptions {
    fn default() -> Self {
        Self {
            workers: DEFAULT_WORKERS,
            checkpoint: PathBuf::from(DEFAULT_CHECKPOINT_FILE),
            mask_dir: None,
            padding: DEFAULT_PADDING,
            jpeg_quality: DEFAULT_JPEG_QUALITY,
            cascade: CascadeConfig::default(),
        }
    }
}

impl BatchOptions {
    /// Parse options from TOML text.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] on malformed TOML and
    /// [`Error::Misconfigured`] on out-of-range values.
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let opts: Self = toml::from_str(text)?;
        opts.validate()?;
        Ok(opts)
    }

    /// Read and parse a TOML config file.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] if the file cannot be read, otherwise as
    /// [`BatchOptions::from_toml_str`].
    pub fn from_toml_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    /// Check value ranges.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Misconfigured`] describing the first bad value.
    pub fn validate(&self) -> Result<()> {
        if self.workers == 0 {
            return Err(Error::Misconfigured("workers must be at least 1".into()));
        }
        if !(1..=100).contains(&self.jpeg_quality) {
            return Err(Error::Misconfigured(format!(
                "jpeg_quality must be 1-100, got {}",
                self.jpeg_quality
            )));
        }
        if !(0.0..=1.0).contains(&self.cascade.confidence_threshold) {
            return Err(Error::Misconfigured(format!(
                "confidence_threshold must be 0.0-1.0, got {}",
                self.cascade.confidence_threshold
            )));
        }
        Ok(())
    }
}
