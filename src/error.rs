//! Error types for the batch-watermark-removal crate.

use std::path::PathBuf;

/// Errors that can occur while detecting, reconstructing, or tracking images.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A source image could not be read or decoded.
    #[error("failed to decode {}: {source}", path.display())]
    Decode {
        /// Path of the unreadable image.
        path: PathBuf,
        /// Underlying codec error.
        source: image::ImageError,
    },

    /// A capability provider (detector, recognizer, inpainter) failed.
    #[error("{capability} failed: {message}")]
    Capability {
        /// Which capability raised the fault.
        capability: &'static str,
        /// Provider-supplied description.
        message: String,
    },

    /// The checkpoint log could not be read or appended to.
    #[error("checkpoint {} unavailable: {source}", path.display())]
    Checkpoint {
        /// Path of the checkpoint file.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// The pipeline was assembled without a usable configuration.
    #[error("misconfigured: {0}")]
    Misconfigured(String),

    /// A configuration file could not be parsed.
    #[error("invalid configuration: {0}")]
    Config(#[from] toml::de::Error),

    /// The worker pool could not be started.
    #[error("failed to start worker pool: {0}")]
    WorkerPool(#[from] rayon::ThreadPoolBuildError),

    /// A worker panicked while processing an item.
    #[error("worker panicked: {0}")]
    WorkerPanic(String),

    /// A batch item has no usable file name to key it by.
    #[error("item has no file name: {}", .0.display())]
    InvalidItem(PathBuf),

    /// An I/O error occurred while reading or writing files.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The image format is not supported.
    #[error("unsupported image format: {0}")]
    UnsupportedFormat(String),

    /// An error occurred during image processing (encode, save).
    #[error("image processing error: {0}")]
    Image(#[from] image::ImageError),
}

impl Error {
    /// Build a [`Error::Capability`] from any displayable provider fault.
    pub fn capability(capability: &'static str, message: impl std::fmt::Display) -> Self {
        Self::Capability {
            capability,
            message: message.to_string(),
        }
    }
}

/// A specialized `Result` type for this crate.
pub type Result<T> = std::result::Result<T, Error>;
