//! Source cell identity, metadata, and sampling.

use serde::{Deserialize, Serialize};

/// Canonical int16 NoData sentinel for decompressed cells.
pub(crate) const NODATA: i16 = -32768;

/// Legacy void value found in older ingests; coerced to [`NODATA`] on load.
pub(crate) const LEGACY_VOID: i16 = -32767;

/// Identity of a 1°×1° source cell: the integer degree corner at its
/// south-west.
///
/// Floor division keeps negative coordinates correct: `(-0.3, -80.2)` lives
/// in cell `(-1, -81)`, not `(0, -80)`. A coordinate exactly on an integer
/// degree is the shared edge of two cells and resolves to the south/east
/// cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CellId {
    /// Latitude of the southern edge.
    pub lat_floor: i32,
    /// Longitude of the western edge.
    pub lon_floor: i32,
}

impl CellId {
    /// The cell containing a geographic coordinate.
    pub fn from_coord(lat: f64, lon: f64) -> Self {
        CellId {
            // ceil()-1 equals floor() for every non-integer latitude, but
            // steps an exact boundary to the south cell. floor() alone
            // already gives the east cell on an exact longitude boundary.
            lat_floor: lat.ceil() as i32 - 1,
            lon_floor: lon.floor() as i32,
        }
    }

    /// File stem for this cell, e.g. `n27_w082` or `s03_e005`.
    ///
    /// The letters follow SRTM conventions: latitude names the southern
    /// edge, longitude the western edge, magnitudes zero-padded to 2 and 3
    /// digits respectively.
    pub fn file_stem(&self) -> String {
        let lat_letter = if self.lat_floor >= 0 { 'n' } else { 's' };
        let lon_letter = if self.lon_floor >= 0 { 'e' } else { 'w' };
        format!(
            "{}{:02}_{}{:03}",
            lat_letter,
            self.lat_floor.abs(),
            lon_letter,
            self.lon_floor.abs()
        )
    }

    /// Parse a file stem back into a cell id. Returns `None` for stems that
    /// do not follow the naming convention.
    pub fn parse_stem(stem: &str) -> Option<Self> {
        let (lat_part, lon_part) = stem.split_once('_')?;
        let lat_sign = match lat_part.chars().next()? {
            'n' => 1,
            's' => -1,
            _ => return None,
        };
        let lon_sign = match lon_part.chars().next()? {
            'e' => 1,
            'w' => -1,
            _ => return None,
        };
        let lat: i32 = lat_part[1..].parse().ok()?;
        let lon: i32 = lon_part[1..].parse().ok()?;
        Some(CellId {
            lat_floor: lat_sign * lat,
            lon_floor: lon_sign * lon,
        })
    }

    /// Nominal 1-degree bounds of this cell.
    pub fn nominal_bounds(&self) -> CellBounds {
        CellBounds {
            north: f64::from(self.lat_floor) + 1.0,
            south: f64::from(self.lat_floor),
            west: f64::from(self.lon_floor),
            east: f64::from(self.lon_floor) + 1.0,
        }
    }
}

impl std::fmt::Display for CellId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.file_stem())
    }
}

/// Georeferencing bounds of a cell in EPSG:4326 degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CellBounds {
    /// Northern edge latitude.
    pub north: f64,
    /// Southern edge latitude.
    pub south: f64,
    /// Western edge longitude.
    pub west: f64,
    /// Eastern edge longitude.
    pub east: f64,
}

impl CellBounds {
    /// Whether a coordinate falls within the bounds (edges inclusive).
    pub fn contains(&self, lat: f64, lon: f64) -> bool {
        lat >= self.south && lat <= self.north && lon >= self.west && lon <= self.east
    }
}

/// Side-car metadata stored as `<stem>.json` next to each `.zst` raster.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CellMeta {
    /// Raster shape as `[rows, cols]`.
    pub shape: [usize; 2],
    /// Georeferencing bounds.
    pub bounds: CellBounds,
    /// Declared NoData sentinel, typically -32768.
    pub nodata: i16,
    /// Coordinate reference system; sources are always EPSG:4326.
    pub crs: String,
}

/// A decompressed, immutable source cell.
///
/// Rows run north to south, columns west to east, matching the raster
/// orientation of the ingestion pipeline's output.
#[derive(Debug)]
pub struct SourceCell {
    id: CellId,
    rows: usize,
    cols: usize,
    bounds: CellBounds,
    data: Vec<i16>,
}

impl SourceCell {
    pub(crate) fn new(
        id: CellId,
        rows: usize,
        cols: usize,
        bounds: CellBounds,
        data: Vec<i16>,
    ) -> Self {
        debug_assert_eq!(data.len(), rows * cols);
        SourceCell {
            id,
            rows,
            cols,
            bounds,
            data,
        }
    }

    /// This cell's identity.
    pub fn id(&self) -> CellId {
        self.id
    }

    /// Raster shape as `(rows, cols)`.
    pub fn shape(&self) -> (usize, usize) {
        (self.rows, self.cols)
    }

    /// Georeferencing bounds.
    pub fn bounds(&self) -> CellBounds {
        self.bounds
    }

    /// Raw value at a raster position, clamped into the raster.
    #[inline]
    pub fn pixel(&self, row: usize, col: usize) -> i16 {
        let row = row.min(self.rows - 1);
        let col = col.min(self.cols - 1);
        self.data[row * self.cols + col]
    }

    /// The raster row whose span contains a latitude, clamped to the edge
    /// rows for coordinates within floating-point slop of the boundary.
    #[inline]
    pub fn row_for_lat(&self, lat: f64) -> usize {
        let span = self.bounds.north - self.bounds.south;
        let frac = (self.bounds.north - lat) / span;
        let row = (frac * self.rows as f64).floor();
        (row.max(0.0) as usize).min(self.rows - 1)
    }

    /// The raster column whose span contains a longitude.
    #[inline]
    pub fn col_for_lon(&self, lon: f64) -> usize {
        let span = self.bounds.east - self.bounds.west;
        let frac = (lon - self.bounds.west) / span;
        let col = (frac * self.cols as f64).floor();
        (col.max(0.0) as usize).min(self.cols - 1)
    }

    /// Nearest-neighbor sample at a geographic coordinate.
    #[inline]
    pub fn sample_nearest(&self, lat: f64, lon: f64) -> i16 {
        self.pixel(self.row_for_lat(lat), self.col_for_lon(lon))
    }

    /// Bilinear sample at a geographic coordinate.
    ///
    /// Falls back to nearest-neighbor when any of the four contributing
    /// pixels is NoData, so voids never bleed into their surroundings.
    pub fn sample_bilinear(&self, lat: f64, lon: f64) -> i16 {
        let lat_span = self.bounds.north - self.bounds.south;
        let lon_span = self.bounds.east - self.bounds.west;
        // Continuous raster coordinates of the sample point, offset so that
        // integer positions land on pixel centers.
        let y = ((self.bounds.north - lat) / lat_span * self.rows as f64 - 0.5)
            .clamp(0.0, (self.rows - 1) as f64);
        let x = ((lon - self.bounds.west) / lon_span * self.cols as f64 - 0.5)
            .clamp(0.0, (self.cols - 1) as f64);

        let y0 = y.floor() as usize;
        let x0 = x.floor() as usize;
        let y1 = (y0 + 1).min(self.rows - 1);
        let x1 = (x0 + 1).min(self.cols - 1);
        let fy = y - y0 as f64;
        let fx = x - x0 as f64;

        let v00 = self.pixel(y0, x0);
        let v01 = self.pixel(y0, x1);
        let v10 = self.pixel(y1, x0);
        let v11 = self.pixel(y1, x1);
        if v00 == NODATA || v01 == NODATA || v10 == NODATA || v11 == NODATA {
            return self.sample_nearest(lat, lon);
        }

        let top = f64::from(v00) * (1.0 - fx) + f64::from(v01) * fx;
        let bottom = f64::from(v10) * (1.0 - fx) + f64::from(v11) * fx;
        (top * (1.0 - fy) + bottom * fy).round() as i16
    }
}
