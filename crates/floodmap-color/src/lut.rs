//! Lookup tables and their memoization.

use std::collections::HashMap;
use std::sync::{Arc, OnceLock, RwLock};

use floodmap_codec::{decode_elevation, TILE_PIXELS};

use crate::ramp::{flood_color, topographic_color, Rgba};
use crate::{ColorMode, WaterLevel};

/// Number of LUT entries: one per possible wire value.
const LUT_ENTRIES: usize = 65_536;

/// A complete wire-value → RGBA table for one color mode.
///
/// Entry `u` is the color of wire value `u`; entry 65,535 is the mode's
/// NoData color. Given the same table, colorization is a pure per-pixel
/// array index, so rendered output is byte-reproducible.
pub struct Lut {
    mode: ColorMode,
    entries: Box<[Rgba; LUT_ENTRIES]>,
}

impl Lut {
    /// Build the table for a mode by evaluating the ramp at every wire
    /// value.
    pub fn build(mode: ColorMode) -> Self {
        let mut entries = Box::new([[0u8; 4]; LUT_ENTRIES]);
        for (u, entry) in entries.iter_mut().enumerate() {
            *entry = match decode_elevation(u as u16) {
                None => mode.nodata_fill(),
                Some(elevation) => match mode {
                    ColorMode::Flood(level) => flood_color(elevation, level.meters()),
                    ColorMode::Topographic => topographic_color(elevation),
                },
            };
        }
        Lut { mode, entries }
    }

    /// The mode this table was built for.
    pub fn mode(&self) -> ColorMode {
        self.mode
    }

    /// Color for a single wire value.
    #[inline]
    pub fn color(&self, value: u16) -> Rgba {
        self.entries[value as usize]
    }

    /// Map a full payload to a tightly packed RGBA buffer
    /// (`TILE_PIXELS * 4` bytes, row-major).
    pub fn map(&self, values: &[u16; TILE_PIXELS]) -> Vec<u8> {
        let mut rgba = Vec::with_capacity(TILE_PIXELS * 4);
        for &v in values.iter() {
            rgba.extend_from_slice(&self.entries[v as usize]);
        }
        rgba
    }

    /// A buffer filled with one color, for the all-NoData fast path.
    pub fn solid(color: Rgba) -> Vec<u8> {
        let mut rgba = Vec::with_capacity(TILE_PIXELS * 4);
        for _ in 0..TILE_PIXELS {
            rgba.extend_from_slice(&color);
        }
        rgba
    }
}

/// Most flood LUTs to keep resident. Each table is 256 KiB; a slider UI
/// touches a handful of adjacent quanta, not thousands.
const FLOOD_LUT_CAPACITY: usize = 64;

/// Shared registry of built tables.
///
/// The topographic table is constant and built once. Flood tables are
/// memoized per water-level quantum behind an `RwLock`; readers only ever
/// observe a complete `Arc<Lut>`, never a partially built table. The memo
/// is bounded: when full, the oldest-built table is dropped (hits take a
/// read lock and cannot reorder, so eviction is by build order).
pub struct LutRegistry {
    topographic: OnceLock<Arc<Lut>>,
    flood: RwLock<FloodMemo>,
}

struct FloodMemo {
    tables: HashMap<i32, Arc<Lut>>,
    access_order: Vec<i32>,
}

impl Default for LutRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl LutRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        LutRegistry {
            topographic: OnceLock::new(),
            flood: RwLock::new(FloodMemo {
                tables: HashMap::new(),
                access_order: Vec::new(),
            }),
        }
    }

    /// Get or build the table for a mode.
    pub fn get(&self, mode: ColorMode) -> Arc<Lut> {
        match mode {
            ColorMode::Topographic => self
                .topographic
                .get_or_init(|| Arc::new(Lut::build(ColorMode::Topographic)))
                .clone(),
            ColorMode::Flood(level) => self.get_flood(level),
        }
    }

    fn get_flood(&self, level: WaterLevel) -> Arc<Lut> {
        let key = level.decimeters();

        {
            let memo = self.flood.read().unwrap_or_else(|e| e.into_inner());
            if let Some(lut) = memo.tables.get(&key) {
                return lut.clone();
            }
        }

        // Build outside the lock; a racing builder just wastes one build.
        let built = Arc::new(Lut::build(ColorMode::Flood(level)));

        let mut memo = self.flood.write().unwrap_or_else(|e| e.into_inner());
        if let Some(existing) = memo.tables.get(&key) {
            return existing.clone();
        }
        while memo.tables.len() >= FLOOD_LUT_CAPACITY && !memo.access_order.is_empty() {
            let oldest = memo.access_order.remove(0);
            memo.tables.remove(&oldest);
        }
        memo.tables.insert(key, built.clone());
        memo.access_order.push(key);
        built
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ramp::{OCEAN, TRANSPARENT, WATER};
    use floodmap_codec::{encode_elevation, NODATA_U16};

    #[test]
    fn nodata_entry_is_the_mode_fill() {
        let flood = Lut::build(ColorMode::Flood(WaterLevel::from_meters(1.0)));
        assert_eq!(flood.color(NODATA_U16), WATER);

        let topo = Lut::build(ColorMode::Topographic);
        assert_eq!(topo.color(NODATA_U16), OCEAN);
    }

    #[test]
    fn lut_agrees_with_the_ramp() {
        let level = WaterLevel::from_meters(2.0);
        let lut = Lut::build(ColorMode::Flood(level));
        for elevation in [-400i16, -1, 0, 2, 3, 7, 120, 8000] {
            let u = encode_elevation(elevation);
            let decoded = decode_elevation(u).unwrap();
            assert_eq!(lut.color(u), flood_color(decoded, level.meters()));
        }
    }

    #[test]
    fn high_ground_is_transparent_in_flood_mode() {
        let lut = Lut::build(ColorMode::Flood(WaterLevel::from_meters(1.0)));
        assert_eq!(lut.color(encode_elevation(500)), TRANSPARENT);
    }

    #[test]
    fn map_is_pure_lut_indexing() {
        let lut = Lut::build(ColorMode::Topographic);
        let values = Box::new([encode_elevation(42); TILE_PIXELS]);
        let rgba = lut.map(&values);
        assert_eq!(rgba.len(), TILE_PIXELS * 4);
        let expected = lut.color(encode_elevation(42));
        assert_eq!(&rgba[0..4], &expected);
        assert_eq!(&rgba[rgba.len() - 4..], &expected);
    }

    #[test]
    fn registry_memoizes_per_quantum() {
        let registry = LutRegistry::new();
        let a = registry.get(ColorMode::Flood(WaterLevel::from_meters(1.23)));
        let b = registry.get(ColorMode::Flood(WaterLevel::from_meters(1.2)));
        assert!(Arc::ptr_eq(&a, &b), "1.23 and 1.20 share a quantum");

        let c = registry.get(ColorMode::Flood(WaterLevel::from_meters(1.27)));
        assert!(!Arc::ptr_eq(&a, &c), "1.3 is a different quantum");
    }

    #[test]
    fn registry_topographic_is_singleton() {
        let registry = LutRegistry::new();
        let a = registry.get(ColorMode::Topographic);
        let b = registry.get(ColorMode::Topographic);
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn flood_memo_is_bounded() {
        let registry = LutRegistry::new();
        for dm in 0..(FLOOD_LUT_CAPACITY as i32 + 8) {
            registry.get(ColorMode::Flood(WaterLevel::from_decimeters(dm)));
        }
        let memo = registry.flood.read().unwrap();
        assert!(memo.tables.len() <= FLOOD_LUT_CAPACITY);
    }
}
