//! Bounded LRU cache for rendered PNG tiles.

use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use bytes::Bytes;

use floodmap_color::ColorMode;
use floodmap_dem::TileId;

/// Number of lock stripes.
const CACHE_STRIPES: usize = 8;

/// Full identity of a rendered PNG: mode (including the water-level
/// quantum) plus tile coordinates. Two requests with equal keys produce
/// byte-identical PNGs, which is what makes this cache sound.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CacheKey {
    /// Render mode, carrying the water-level quantum in flood mode.
    pub mode: ColorMode,
    /// Tile coordinates.
    pub tile: TileId,
}

/// Counters describing cache traffic since startup.
#[derive(Debug, Clone, Copy, Default)]
pub struct CacheStats {
    /// Lookups that found a live entry.
    pub hits: u64,
    /// Lookups that missed (or found an expired entry).
    pub misses: u64,
    /// Entries evicted to make room.
    pub evictions: u64,
    /// Entries currently resident.
    pub entries: usize,
}

struct Entry {
    body: Bytes,
    inserted_at: Instant,
}

struct Shard {
    entries: HashMap<CacheKey, Entry>,
    access_order: Vec<CacheKey>,
}

/// Thread-safe bounded LRU of PNG bodies.
///
/// Striped: keys hash to one of several independently locked shards, so
/// concurrent requests for different tiles rarely contend. Within a shard
/// the least-recently-used entry is evicted first; a hit refreshes
/// recency. Entries are RAM-only and die with the process.
pub struct TileCache {
    stripes: Vec<Mutex<Shard>>,
    per_stripe_capacity: usize,
    /// Optional expiry. PNG output is a pure function of the key and the
    /// immutable source data, so the default is no expiry at all.
    ttl: Option<Duration>,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
}

impl TileCache {
    /// Create a cache holding at most `capacity` entries.
    pub fn new(capacity: usize, ttl: Option<Duration>) -> Self {
        TileCache {
            stripes: (0..CACHE_STRIPES)
                .map(|_| {
                    Mutex::new(Shard {
                        entries: HashMap::new(),
                        access_order: Vec::new(),
                    })
                })
                .collect(),
            per_stripe_capacity: (capacity / CACHE_STRIPES).max(1),
            ttl,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    /// Look up a rendered tile, refreshing its recency.
    pub fn get(&self, key: &CacheKey) -> Option<Bytes> {
        let mut shard = self.shard(key);
        let expired = match shard.entries.get(key) {
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                return None;
            }
            Some(entry) => self
                .ttl
                .is_some_and(|ttl| entry.inserted_at.elapsed() > ttl),
        };
        if expired {
            shard.entries.remove(key);
            if let Some(pos) = shard.access_order.iter().position(|k| k == key) {
                shard.access_order.remove(pos);
            }
            self.misses.fetch_add(1, Ordering::Relaxed);
            return None;
        }
        if let Some(pos) = shard.access_order.iter().position(|k| k == key) {
            shard.access_order.remove(pos);
            shard.access_order.push(*key);
        }
        self.hits.fetch_add(1, Ordering::Relaxed);
        shard.entries.get(key).map(|e| e.body.clone())
    }

    /// Insert a rendered tile. An identical key overwrites; the insert
    /// appears atomically to readers.
    pub fn insert(&self, key: CacheKey, body: Bytes) {
        let mut shard = self.shard(&key);
        if shard.entries.contains_key(&key) {
            shard.entries.insert(
                key,
                Entry {
                    body,
                    inserted_at: Instant::now(),
                },
            );
            if let Some(pos) = shard.access_order.iter().position(|k| *k == key) {
                shard.access_order.remove(pos);
            }
            shard.access_order.push(key);
            return;
        }
        while shard.entries.len() >= self.per_stripe_capacity && !shard.access_order.is_empty() {
            let oldest = shard.access_order.remove(0);
            shard.entries.remove(&oldest);
            self.evictions.fetch_add(1, Ordering::Relaxed);
        }
        shard.entries.insert(
            key,
            Entry {
                body,
                inserted_at: Instant::now(),
            },
        );
        shard.access_order.push(key);
    }

    /// Traffic counters since startup.
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            entries: self
                .stripes
                .iter()
                .map(|s| s.lock().map(|g| g.entries.len()).unwrap_or(0))
                .sum(),
        }
    }

    fn shard(&self, key: &CacheKey) -> std::sync::MutexGuard<'_, Shard> {
        let mut hasher = std::collections::hash_map::DefaultHasher::new();
        key.hash(&mut hasher);
        let stripe = (hasher.finish() as usize) % CACHE_STRIPES;
        self.stripes[stripe].lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl std::fmt::Debug for TileCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TileCache")
            .field("per_stripe_capacity", &self.per_stripe_capacity)
            .field("ttl", &self.ttl)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use floodmap_color::WaterLevel;

    fn key(z: u8, x: u32, y: u32) -> CacheKey {
        CacheKey {
            mode: ColorMode::Flood(WaterLevel::from_meters(1.0)),
            tile: TileId::new(z, x, y),
        }
    }

    #[test]
    fn hit_after_insert() {
        let cache = TileCache::new(16, None);
        let k = key(9, 140, 215);
        assert!(cache.get(&k).is_none());
        cache.insert(k, Bytes::from_static(b"png"));
        assert_eq!(cache.get(&k).unwrap(), Bytes::from_static(b"png"));
        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
    }

    #[test]
    fn distinct_water_levels_are_distinct_keys() {
        let cache = TileCache::new(16, None);
        let tile = TileId::new(10, 286, 387);
        let a = CacheKey {
            mode: ColorMode::Flood(WaterLevel::from_meters(1.2)),
            tile,
        };
        let b = CacheKey {
            mode: ColorMode::Flood(WaterLevel::from_meters(1.3)),
            tile,
        };
        cache.insert(a, Bytes::from_static(b"a"));
        assert!(cache.get(&b).is_none());
    }

    #[test]
    fn insert_overwrites_identical_key() {
        let cache = TileCache::new(16, None);
        let k = key(9, 1, 1);
        cache.insert(k, Bytes::from_static(b"one"));
        cache.insert(k, Bytes::from_static(b"two"));
        assert_eq!(cache.get(&k).unwrap(), Bytes::from_static(b"two"));
    }

    #[test]
    fn lru_evicts_oldest_within_a_shard() {
        // Capacity of one entry per shard forces eviction on the second
        // insert that lands on the same shard.
        let cache = TileCache::new(CACHE_STRIPES, None);
        let keys: Vec<CacheKey> = (0..64).map(|i| key(10, i, 0)).collect();
        for k in &keys {
            cache.insert(*k, Bytes::from_static(b"x"));
        }
        let stats = cache.stats();
        assert!(stats.evictions > 0);
        assert!(stats.entries <= CACHE_STRIPES);
    }

    #[test]
    fn ttl_expires_entries() {
        let cache = TileCache::new(16, Some(Duration::ZERO));
        let k = key(9, 2, 2);
        cache.insert(k, Bytes::from_static(b"png"));
        std::thread::sleep(Duration::from_millis(2));
        assert!(cache.get(&k).is_none());
    }
}
