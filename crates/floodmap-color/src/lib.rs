//! # floodmap-color
//!
//! Pure-function colorization of uint16 elevation payloads.
//!
//! Rendering never touches elevation math per pixel: a 65,536-entry RGBA
//! lookup table is built once per `(mode, water-level quantum)` and every
//! pixel becomes a single table index. Two modes exist:
//!
//! - **Flood**: color encodes elevation *relative to a water level* —
//!   transparent well above the waterline, then green → amber → red → blue
//!   as the margin shrinks. NoData renders as deep water.
//! - **Topographic**: a parameter-free hypsometric ramp with an `asinh`
//!   height compression so lowland detail is not crushed by mountain range.
//!
//! The LUT is a pure function of its key, which makes rendered tiles
//! byte-reproducible and the PNG cache content-addressable.

mod lut;
mod ramp;
mod water_level;

pub use lut::{Lut, LutRegistry};
pub use ramp::{flood_color, topographic_color, Rgba, OCEAN, WATER};
pub use water_level::WaterLevel;

/// Rendering mode for a colorized tile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ColorMode {
    /// Flood-risk colors relative to a quantized water level.
    Flood(WaterLevel),
    /// Absolute-elevation hypsometric colors.
    Topographic,
}

impl ColorMode {
    /// The fill color for a tile with no elevation data anywhere.
    pub fn nodata_fill(&self) -> Rgba {
        match self {
            ColorMode::Flood(_) => WATER,
            ColorMode::Topographic => OCEAN,
        }
    }
}

impl std::fmt::Display for ColorMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ColorMode::Flood(level) => write!(f, "flood@{level}"),
            ColorMode::Topographic => write!(f, "topographic"),
        }
    }
}
