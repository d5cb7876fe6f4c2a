//! Web-Mercator tile math and the mosaicking elevation loader.

use std::collections::HashMap;
use std::f64::consts::PI;
use std::sync::Arc;

use crate::cell::{CellId, SourceCell, NODATA};
use crate::store::SourceStore;
use crate::Result;

/// Tile edge length in pixels.
pub const TILE_SIZE: usize = 256;

/// Latitude limit of the web-Mercator projection, `arctan(sinh(pi))`.
pub const MAX_MERCATOR_LAT: f64 = 85.051_128_779_806_6;

/// Slippy-map tile coordinates `(z, x, y)`.
///
/// `x` runs west to east from the antimeridian, `y` north to south from
/// `MAX_MERCATOR_LAT`. Zoom policy (which `z` values are servable) is the
/// engine's concern; this type only requires coordinates in range for their
/// zoom.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TileId {
    /// Zoom level.
    pub z: u8,
    /// Column, `0..2^z`.
    pub x: u32,
    /// Row, `0..2^z`.
    pub y: u32,
}

impl TileId {
    /// Create a tile coordinate.
    ///
    /// # Panics
    /// Panics if `x` or `y` is out of range for the zoom; request
    /// validation happens before construction.
    pub fn new(z: u8, x: u32, y: u32) -> Self {
        let n = 1u64 << z;
        assert!(u64::from(x) < n, "x={x} out of range for zoom {z}");
        assert!(u64::from(y) < n, "y={y} out of range for zoom {z}");
        TileId { z, x, y }
    }

    /// Checked constructor for request validation.
    pub fn checked(z: u8, x: u32, y: u32) -> Option<Self> {
        let n = 1u64 << z;
        (u64::from(x) < n && u64::from(y) < n).then_some(TileId { z, x, y })
    }

    /// The tile containing a coordinate at a zoom level.
    pub fn from_lat_lon(lat: f64, lon: f64, z: u8) -> Self {
        let lat = lat.clamp(-MAX_MERCATOR_LAT, MAX_MERCATOR_LAT);
        let n = (1u64 << z) as f64;
        let x = ((lon + 180.0) / 360.0 * n).floor();
        let lat_rad = lat.to_radians();
        let y = ((1.0 - lat_rad.tan().asinh() / PI) / 2.0 * n).floor();
        let max = (1u64 << z) - 1;
        TileId {
            z,
            x: (x.max(0.0) as u64).min(max) as u32,
            y: (y.max(0.0) as u64).min(max) as u32,
        }
    }

    /// Geographic bounds of this tile.
    pub fn bounds(&self) -> TileBounds {
        let n = (1u64 << self.z) as f64;
        let lon_left = f64::from(self.x) / n * 360.0 - 180.0;
        let lon_right = (f64::from(self.x) + 1.0) / n * 360.0 - 180.0;
        let lat_top = inv_mercator(f64::from(self.y) / n);
        let lat_bottom = inv_mercator((f64::from(self.y) + 1.0) / n);
        TileBounds {
            lat_top,
            lat_bottom,
            lon_left,
            lon_right,
        }
    }

    /// Latitude of a pixel-row center within this tile.
    #[inline]
    pub fn pixel_lat(&self, py: usize) -> f64 {
        let n = (1u64 << self.z) as f64;
        let yf = (f64::from(self.y) + (py as f64 + 0.5) / TILE_SIZE as f64) / n;
        inv_mercator(yf)
    }

    /// Longitude of a pixel-column center within this tile.
    #[inline]
    pub fn pixel_lon(&self, px: usize) -> f64 {
        let n = (1u64 << self.z) as f64;
        (f64::from(self.x) + (px as f64 + 0.5) / TILE_SIZE as f64) / n * 360.0 - 180.0
    }

    /// The in-tile pixel containing a coordinate, via the forward
    /// projection. The coordinate must fall inside this tile; out-of-tile
    /// inputs clamp to the edge pixels.
    pub fn pixel_for(&self, lat: f64, lon: f64) -> (usize, usize) {
        let lat = lat.clamp(-MAX_MERCATOR_LAT, MAX_MERCATOR_LAT);
        let n = (1u64 << self.z) as f64;
        let xf = (lon + 180.0) / 360.0 * n - f64::from(self.x);
        let yf = (1.0 - lat.to_radians().tan().asinh() / PI) / 2.0 * n - f64::from(self.y);
        let px = (xf * TILE_SIZE as f64).floor().clamp(0.0, (TILE_SIZE - 1) as f64);
        let py = (yf * TILE_SIZE as f64).floor().clamp(0.0, (TILE_SIZE - 1) as f64);
        (px as usize, py as usize)
    }
}

impl std::fmt::Display for TileId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}/{}", self.z, self.x, self.y)
    }
}

/// Inverse web-Mercator: fraction of the world height → latitude.
#[inline]
fn inv_mercator(yf: f64) -> f64 {
    (PI * (1.0 - 2.0 * yf)).sinh().atan().to_degrees()
}

/// Geographic bounds of a tile.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TileBounds {
    /// Northern edge.
    pub lat_top: f64,
    /// Southern edge.
    pub lat_bottom: f64,
    /// Western edge.
    pub lon_left: f64,
    /// Eastern edge.
    pub lon_right: f64,
}

/// Resampling mode for mosaic assembly.
///
/// Wire payloads must use `Nearest` so point sampling stays deterministic
/// and precompressed artifacts match runtime synthesis byte for byte.
/// `Bilinear` is available for presentation PNGs only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Resampling {
    /// Nearest-neighbor at the pixel center.
    #[default]
    Nearest,
    /// Bilinear over the four nearest source pixels.
    Bilinear,
}

/// A 256×256 int16 elevation mosaic for one tile.
#[derive(Debug, Clone)]
pub struct Mosaic {
    grid: Vec<i16>,
    has_data: bool,
}

impl Mosaic {
    /// The row-major elevation grid, exactly `TILE_SIZE * TILE_SIZE` long.
    pub fn grid(&self) -> &[i16] {
        &self.grid
    }

    /// Whether any pixel carries real data.
    pub fn has_data(&self) -> bool {
        self.has_data
    }

    /// Elevation at a pixel.
    ///
    /// # Panics
    /// Panics when `px` or `py` is outside `0..256`.
    #[inline]
    pub fn get(&self, px: usize, py: usize) -> i16 {
        assert!(px < TILE_SIZE && py < TILE_SIZE);
        self.grid[py * TILE_SIZE + px]
    }
}

/// Materializes `(z, x, y)` tiles from the source store.
///
/// The loader walks the 256×256 output grid, projects each pixel center
/// back to geographic coordinates, and samples the source cell containing
/// that point. Cells are fetched at most once per tile and shared through
/// the store's LRU across tiles. Pixels with no covering cell, or whose
/// source value is NoData, stay NoData in the mosaic.
#[derive(Debug)]
pub struct ElevationLoader {
    store: Arc<SourceStore>,
}

impl ElevationLoader {
    /// Create a loader over a source store.
    pub fn new(store: Arc<SourceStore>) -> Self {
        ElevationLoader { store }
    }

    /// The underlying store.
    pub fn store(&self) -> &Arc<SourceStore> {
        &self.store
    }

    /// Assemble the mosaic for a tile.
    ///
    /// Absent cells produce NoData regions; a tile wholly outside coverage
    /// comes back with `has_data() == false`. Only environmental failures
    /// (missing source root, I/O errors) are `Err`.
    pub fn load_tile(&self, tile: TileId, resampling: Resampling) -> Result<Mosaic> {
        let mut grid = vec![NODATA; TILE_SIZE * TILE_SIZE];
        let mut has_data = false;
        // Cells touched by this tile, fetched once each. `None` records an
        // absent cell so ocean pixels cost one lookup, not one stat per
        // pixel.
        let mut cells: HashMap<CellId, Option<Arc<SourceCell>>> = HashMap::new();

        for py in 0..TILE_SIZE {
            let lat = tile.pixel_lat(py);
            for px in 0..TILE_SIZE {
                let lon = tile.pixel_lon(px);
                let id = CellId::from_coord(lat, lon);
                let cell = match cells.entry(id) {
                    std::collections::hash_map::Entry::Occupied(e) => e.into_mut(),
                    std::collections::hash_map::Entry::Vacant(e) => {
                        e.insert(self.store.open(id)?)
                    }
                };
                let Some(cell) = cell else { continue };

                let value = match resampling {
                    Resampling::Nearest => cell.sample_nearest(lat, lon),
                    Resampling::Bilinear => cell.sample_bilinear(lat, lon),
                };
                if value != NODATA {
                    grid[py * TILE_SIZE + px] = value;
                    has_data = true;
                }
            }
        }

        Ok(Mosaic { grid, has_data })
    }
}
