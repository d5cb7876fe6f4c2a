//! Error types for the precompressed store.

use std::path::PathBuf;

use thiserror::Error;

/// Errors from the artifact store and the pyramid generator.
#[derive(Debug, Error)]
pub enum StoreError {
    /// I/O failure reading or writing an artifact.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The source directory is missing or holds too few cells to generate
    /// a trustworthy pyramid.
    #[error("refusing to generate from {dir}: found {found} source cells, need {required}")]
    SourceUndersized {
        /// Source directory examined.
        dir: PathBuf,
        /// Cells found.
        found: usize,
        /// Minimum required.
        required: usize,
    },

    /// Mosaicking failed while generating.
    #[error("elevation source error: {0}")]
    Dem(#[from] floodmap_dem::DemError),

    /// Manifest serialization failed.
    #[error("manifest error: {0}")]
    Manifest(#[from] serde_json::Error),
}
