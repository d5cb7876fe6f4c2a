//! On-disk source cell store with a bounded decompressed-cell cache.

use std::collections::{HashMap, HashSet};
use std::hash::{Hash, Hasher};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use tracing::{debug, warn};

use crate::cell::{CellId, CellMeta, SourceCell, LEGACY_VOID, NODATA};
use crate::{DemError, Result};

/// Number of lock stripes for the cell cache. Requests for cells on
/// different stripes never contend.
const CACHE_STRIPES: usize = 8;

/// Counters describing store traffic since startup.
#[derive(Debug, Clone, Copy, Default)]
pub struct StoreStats {
    /// Cache hits (decompressed cell already resident).
    pub hits: u64,
    /// Cache misses that went to disk.
    pub misses: u64,
    /// Cells loaded and decompressed.
    pub loads: u64,
    /// Cells found damaged and treated as absent.
    pub corrupt: u64,
}

/// Read-only mapping from integer degree corners to decompressed elevation
/// rasters.
///
/// Thread-safe: decompression runs under a single long-lived Zstandard
/// context, and decompressed cells are interned in a striped-lock LRU so
/// concurrent readers of a warm cell take one mutex briefly and share the
/// same `Arc<SourceCell>`.
pub struct SourceStore {
    dir: PathBuf,
    stripes: Vec<Mutex<Shard>>,
    per_stripe_capacity: usize,
    decompressor: Mutex<zstd::bulk::Decompressor<'static>>,
    /// Cells already reported (and skipped) as damaged. One warning per
    /// cell per process lifetime.
    condemned: Mutex<HashSet<CellId>>,
    hits: AtomicU64,
    misses: AtomicU64,
    loads: AtomicU64,
    corrupt: AtomicU64,
}

/// One LRU shard: most recently used keys at the back of `access_order`.
struct Shard {
    cells: HashMap<CellId, Arc<SourceCell>>,
    access_order: Vec<CellId>,
}

impl Shard {
    fn new() -> Self {
        Shard {
            cells: HashMap::new(),
            access_order: Vec::new(),
        }
    }

    fn get(&mut self, id: &CellId) -> Option<Arc<SourceCell>> {
        let cell = self.cells.get(id)?.clone();
        if let Some(pos) = self.access_order.iter().position(|k| k == id) {
            self.access_order.remove(pos);
            self.access_order.push(*id);
        }
        Some(cell)
    }

    fn insert(&mut self, id: CellId, cell: Arc<SourceCell>, capacity: usize) {
        if self.cells.contains_key(&id) {
            if let Some(pos) = self.access_order.iter().position(|k| *k == id) {
                self.access_order.remove(pos);
                self.access_order.push(id);
            }
            return;
        }
        while self.cells.len() >= capacity && !self.access_order.is_empty() {
            let oldest = self.access_order.remove(0);
            self.cells.remove(&oldest);
        }
        self.cells.insert(id, cell);
        self.access_order.push(id);
    }
}

impl SourceStore {
    /// Create a store over a source directory, holding at most
    /// `cache_capacity` decompressed cells in memory.
    pub fn new<P: AsRef<Path>>(dir: P, cache_capacity: usize) -> Self {
        let per_stripe_capacity = (cache_capacity / CACHE_STRIPES).max(1);
        let stripes = (0..CACHE_STRIPES).map(|_| Mutex::new(Shard::new())).collect();
        SourceStore {
            dir: dir.as_ref().to_path_buf(),
            stripes,
            per_stripe_capacity,
            decompressor: Mutex::new(
                zstd::bulk::Decompressor::new().expect("zstd context allocation"),
            ),
            condemned: Mutex::new(HashSet::new()),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            loads: AtomicU64::new(0),
            corrupt: AtomicU64::new(0),
        }
    }

    /// The source directory this store reads from.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Open a cell, loading and interning it on first access.
    ///
    /// Returns `Ok(None)` when the cell is absent — no file, no side-car,
    /// or previously found damaged. Only environmental failures (missing
    /// root, I/O errors other than not-found) surface as `Err`.
    pub fn open(&self, id: CellId) -> Result<Option<Arc<SourceCell>>> {
        {
            let mut shard = self.shard(&id);
            if let Some(cell) = shard.get(&id) {
                self.hits.fetch_add(1, Ordering::Relaxed);
                return Ok(Some(cell));
            }
        }
        self.misses.fetch_add(1, Ordering::Relaxed);

        if self
            .condemned
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains(&id)
        {
            return Ok(None);
        }

        if !self.dir.exists() {
            return Err(DemError::RootMissing(self.dir.clone()));
        }

        let cell = match self.load_cell(id)? {
            Some(cell) => Arc::new(cell),
            None => return Ok(None),
        };
        self.loads.fetch_add(1, Ordering::Relaxed);

        let mut shard = self.shard(&id);
        shard.insert(id, cell.clone(), self.per_stripe_capacity);
        Ok(Some(cell))
    }

    /// Number of cells indexed on disk (side-cars present).
    pub fn cell_count(&self) -> Result<usize> {
        let mut count = 0;
        for entry in std::fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if path.extension().is_some_and(|ext| ext == "zst") {
                count += 1;
            }
        }
        Ok(count)
    }

    /// Union bounding box of every indexed cell, as
    /// `(min_lon, min_lat, max_lon, max_lat)`. `None` when the directory
    /// holds no recognizable cells.
    pub fn coverage_bbox(&self) -> Result<Option<(f64, f64, f64, f64)>> {
        let mut bbox: Option<(f64, f64, f64, f64)> = None;
        for entry in std::fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if !path.extension().is_some_and(|ext| ext == "zst") {
                continue;
            }
            let Some(id) = path
                .file_stem()
                .and_then(|s| s.to_str())
                .and_then(CellId::parse_stem)
            else {
                continue;
            };
            let (west, south) = (f64::from(id.lon_floor), f64::from(id.lat_floor));
            let (east, north) = (west + 1.0, south + 1.0);
            bbox = Some(match bbox {
                None => (west, south, east, north),
                Some((w, s, e, n)) => (w.min(west), s.min(south), e.max(east), n.max(north)),
            });
        }
        Ok(bbox)
    }

    /// Traffic counters since startup.
    pub fn stats(&self) -> StoreStats {
        StoreStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            loads: self.loads.load(Ordering::Relaxed),
            corrupt: self.corrupt.load(Ordering::Relaxed),
        }
    }

    fn shard(&self, id: &CellId) -> std::sync::MutexGuard<'_, Shard> {
        let mut hasher = std::collections::hash_map::DefaultHasher::new();
        id.hash(&mut hasher);
        let stripe = (hasher.finish() as usize) % CACHE_STRIPES;
        self.stripes[stripe].lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Mark a cell damaged: warn once, count it, and make every later open
    /// return absent without re-reading the file.
    fn condemn(&self, id: CellId, reason: &str) {
        let mut condemned = self.condemned.lock().unwrap_or_else(|e| e.into_inner());
        if condemned.insert(id) {
            self.corrupt.fetch_add(1, Ordering::Relaxed);
            warn!(cell = %id, reason, "source cell is corrupt; treating as absent");
        }
    }

    fn load_cell(&self, id: CellId) -> Result<Option<SourceCell>> {
        let stem = id.file_stem();
        let raster_path = self.dir.join(format!("{stem}.zst"));
        let meta_path = self.dir.join(format!("{stem}.json"));

        let compressed = match std::fs::read(&raster_path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(cell = %id, "no source cell on disk");
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        };

        let meta_bytes = match std::fs::read(&meta_path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                self.condemn(id, "raster present but side-car missing");
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        };

        let meta: CellMeta = match serde_json::from_slice(&meta_bytes) {
            Ok(meta) => meta,
            Err(e) => {
                self.condemn(id, &format!("unparseable side-car: {e}"));
                return Ok(None);
            }
        };

        let [rows, cols] = meta.shape;
        if rows == 0 || cols == 0 {
            self.condemn(id, "side-car declares an empty shape");
            return Ok(None);
        }
        let expected_bytes = rows * cols * 2;

        let decompressed = {
            let mut dctx = self
                .decompressor
                .lock()
                .unwrap_or_else(|e| e.into_inner());
            match dctx.decompress(&compressed, expected_bytes) {
                Ok(bytes) => bytes,
                Err(e) => {
                    self.condemn(id, &format!("zstd decompression failed: {e}"));
                    return Ok(None);
                }
            }
        };

        if decompressed.len() != expected_bytes {
            self.condemn(
                id,
                &format!(
                    "shape {rows}x{cols} wants {expected_bytes} bytes, frame held {}",
                    decompressed.len()
                ),
            );
            return Ok(None);
        }

        let declared_nodata = meta.nodata;
        let mut data = Vec::with_capacity(rows * cols);
        for chunk in decompressed.chunks_exact(2) {
            let mut v = i16::from_le_bytes([chunk[0], chunk[1]]);
            if v == LEGACY_VOID || v == declared_nodata {
                v = NODATA;
            }
            data.push(v);
        }

        debug!(cell = %id, rows, cols, "loaded source cell");
        Ok(Some(SourceCell::new(id, rows, cols, meta.bounds, data)))
    }
}

impl std::fmt::Debug for SourceStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SourceStore")
            .field("dir", &self.dir)
            .field("per_stripe_capacity", &self.per_stripe_capacity)
            .finish()
    }
}
