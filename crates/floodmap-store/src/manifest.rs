//! The pyramid manifest.

use serde::{Deserialize, Serialize};

/// `manifest.json` at the pyramid root: what the generator produced.
///
/// Written last and atomically, so a manifest on disk always describes a
/// complete generation pass.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Manifest {
    /// Version of the generator that wrote this pyramid.
    pub generator_version: String,
    /// Bounding box covered, `[min_lon, min_lat, max_lon, max_lat]`.
    pub bbox: [f64; 4],
    /// Lowest zoom generated (inclusive).
    pub zoom_min: u8,
    /// Highest zoom generated (inclusive).
    pub zoom_max: u8,
    /// Variant tokens present in the pyramid (`br`, `gz`, `raw`).
    pub variants: Vec<String>,
    /// Per-zoom production counts.
    pub zooms: Vec<ZoomSummary>,
    /// Tiles written across all zooms.
    pub tiles_written: u64,
    /// Tiles examined but skipped because the mosaic was all-NoData.
    pub tiles_skipped_nodata: u64,
}

/// Counts for a single zoom level.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ZoomSummary {
    /// Zoom level.
    pub z: u8,
    /// Tiles examined in the bbox at this zoom.
    pub tiles_examined: u64,
    /// Tiles written.
    pub tiles_written: u64,
    /// All-NoData tiles deliberately skipped.
    pub tiles_skipped_nodata: u64,
    /// Total bytes written across variants.
    pub bytes_written: u64,
}
