//! The engine's error taxonomy.
//!
//! Coverage misses are deliberately absent: a tile outside coverage is a
//! valid all-NoData response, not a failure. Per-cell corruption is
//! handled (and logged) inside the DEM store and likewise never surfaces
//! here.

use thiserror::Error;

use floodmap_dem::TileId;

/// Failures that surface at the engine boundary.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Malformed or out-of-policy tile coordinates. Maps to 400.
    #[error("invalid tile coordinates {z}/{x}/{y} (max zoom {max_zoom})")]
    InvalidTile {
        /// Requested zoom.
        z: u8,
        /// Requested column.
        x: u32,
        /// Requested row.
        y: u32,
        /// Policy maximum zoom.
        max_zoom: u8,
    },

    /// Water level outside the configured range. Maps to 400.
    #[error("water level {value} m outside [{min}, {max}]")]
    InvalidWaterLevel {
        /// Requested level in meters.
        value: f64,
        /// Configured minimum.
        min: f64,
        /// Configured maximum.
        max: f64,
    },

    /// Geographic coordinate outside the valid domain. Maps to 400.
    #[error("coordinate ({lat}, {lon}) outside valid range")]
    InvalidCoordinate {
        /// Requested latitude.
        lat: f64,
        /// Requested longitude.
        lon: f64,
    },

    /// The client required a precompressed artifact and none exists.
    /// Maps to 404.
    #[error("no precompressed artifact for tile {0} and runtime synthesis was declined")]
    NotPrecompressed(TileId),

    /// Elevation source failure (missing root, I/O). Maps to 5xx.
    #[error(transparent)]
    Dem(#[from] floodmap_dem::DemError),

    /// Artifact store failure. Maps to 5xx.
    #[error(transparent)]
    Store(#[from] floodmap_store::StoreError),

    /// The synthesis queue is full. Maps to 503 with a Retry-After hint.
    #[error("engine overloaded; synthesis queue is full")]
    Overloaded,

    /// The per-request deadline elapsed. Maps to 504.
    #[error("request deadline exceeded")]
    Timeout,

    /// An internal invariant was violated (payload shape, encoder
    /// failure, worker panic). Maps to 500; never cached.
    #[error("internal error: {0}")]
    Internal(String),
}

impl From<tokio::task::JoinError> for EngineError {
    fn from(e: tokio::task::JoinError) -> Self {
        EngineError::Internal(format!("worker task failed: {e}"))
    }
}
