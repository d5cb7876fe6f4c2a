//! # floodmap-dem
//!
//! Digital Elevation Model (DEM) source access and tile mosaicking.
//!
//! The on-disk source is a directory of 1°×1° geographic cells, each a
//! Zstandard-compressed row-major int16 raster (`n27_w082.zst`) with a JSON
//! side-car (`n27_w082.json`) declaring its shape, georeferencing bounds,
//! NoData sentinel, and CRS. Cells may be absent — open ocean and
//! un-ingested areas simply have no file, and that is not an error.
//!
//! ## Overview
//!
//! - [`SourceStore`] opens cells on demand, decompresses them with a
//!   long-lived Zstandard context, and interns the decompressed arrays in a
//!   bounded LRU so the warm path never touches disk.
//! - [`ElevationLoader`] resolves a web-Mercator tile `(z, x, y)` to its
//!   covering cells and assembles a 256×256 int16 [`Mosaic`], propagating
//!   NoData for absent coverage.
//!
//! ## Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use floodmap_dem::{ElevationLoader, Resampling, SourceStore, TileId};
//!
//! let store = Arc::new(SourceStore::new("data/elevation-source", 50));
//! let loader = ElevationLoader::new(store);
//!
//! let mosaic = loader.load_tile(TileId::new(11, 555, 859), Resampling::Nearest)?;
//! if mosaic.has_data() {
//!     println!("center elevation: {}", mosaic.get(128, 128));
//! }
//! # Ok::<(), floodmap_dem::DemError>(())
//! ```

mod cell;
mod error;
mod loader;
mod store;

pub use cell::{CellBounds, CellId, CellMeta, SourceCell};
pub use error::DemError;
pub use loader::{ElevationLoader, Mosaic, Resampling, TileBounds, TileId, MAX_MERCATOR_LAT};
pub use store::{SourceStore, StoreStats};

/// Result type for DEM operations.
pub type Result<T> = std::result::Result<T, DemError>;
