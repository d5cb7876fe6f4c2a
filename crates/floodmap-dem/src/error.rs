//! Error types for the DEM crate.

use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur when reading DEM sources or building mosaics.
///
/// Per-cell damage (bad side-car, shape mismatch, truncated frame) is *not*
/// represented here — the store logs it once and treats the cell as absent,
/// so a single corrupt file cannot take down tile serving. These variants
/// are the failures that must surface to the caller as 5xx conditions.
#[derive(Debug, Error)]
pub enum DemError {
    /// I/O error reading a cell or side-car.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The configured source root does not exist at all.
    #[error("elevation source directory missing: {0}")]
    RootMissing(PathBuf),
}
