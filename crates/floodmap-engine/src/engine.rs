//! The tile engine proper.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use image::codecs::png::{CompressionType, FilterType, PngEncoder};
use image::ImageEncoder;
use metrics::counter;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::debug;

use floodmap_codec::{U16Tile, TILE_SIZE};
use floodmap_color::{ColorMode, Lut, LutRegistry, WaterLevel};
use floodmap_dem::{ElevationLoader, Resampling, TileId};
use floodmap_store::{Encoding, PrecompressedStore};

use crate::cache::{CacheKey, TileCache};
use crate::flight::SingleFlight;
use crate::{EngineError, Result};

/// Engine construction parameters, from server configuration.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Policy maximum zoom; requests beyond it are rejected.
    pub max_zoom: u8,
    /// Lowest accepted flood water level in meters.
    pub min_water_level: f64,
    /// Highest accepted flood water level in meters.
    pub max_water_level: f64,
    /// Bound on rendered PNGs held in RAM.
    pub png_cache_max: usize,
    /// Optional PNG cache expiry; `None` (the default) is correct because
    /// output is a pure function of the cache key.
    pub png_cache_ttl: Option<Duration>,
    /// Maximum concurrent tile syntheses.
    pub concurrency_cap: usize,
    /// Requests allowed to queue for a synthesis slot beyond the cap;
    /// past this the engine sheds load.
    pub queue_bound: usize,
    /// Per-request deadline.
    pub deadline: Duration,
    /// Resampling for presentation PNGs. Wire payloads are always
    /// nearest-neighbor regardless of this setting.
    pub png_resampling: Resampling,
    /// Zoom used by the point-sample service, clamped to `max_zoom`.
    pub sample_zoom: u8,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            max_zoom: 11,
            min_water_level: -10.0,
            max_water_level: 1000.0,
            png_cache_max: 1000,
            png_cache_ttl: None,
            concurrency_cap: 8,
            queue_bound: 64,
            deadline: Duration::from_secs(5),
            png_resampling: Resampling::Nearest,
            sample_zoom: 11,
        }
    }
}

/// Where a response's bytes came from, for the `X-Tile-Source` header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TileSource {
    /// Served from the on-disk precompressed pyramid.
    Precompressed,
    /// Synthesized for this request (or a concurrent one sharing the
    /// single-flight result).
    Runtime,
    /// Served from the in-RAM PNG cache.
    Cache,
}

impl TileSource {
    /// Header value.
    pub fn as_str(&self) -> &'static str {
        match self {
            TileSource::Precompressed => "precompressed",
            TileSource::Runtime => "runtime",
            TileSource::Cache => "cache",
        }
    }
}

/// A uint16 tile response.
#[derive(Debug, Clone)]
pub struct Uint16Response {
    /// Payload bytes, possibly content-encoded.
    pub body: Bytes,
    /// Encoding of `body`.
    pub encoding: Encoding,
    /// Source tag for diagnostics.
    pub source: TileSource,
}

/// What kind of PNG a request wants.
#[derive(Debug, Clone, Copy)]
pub enum PngRequest {
    /// Absolute-elevation topographic colors.
    Topographic,
    /// Flood-risk colors at a water level in meters (unquantized).
    Flood {
        /// Requested water level in meters.
        water_level: f64,
    },
}

/// A rendered PNG response.
#[derive(Debug, Clone)]
pub struct PngResponse {
    /// PNG bytes.
    pub body: Bytes,
    /// Source tag for diagnostics.
    pub source: TileSource,
    /// The mode actually rendered, carrying the water-level quantum for
    /// the `X-Water-Level` header.
    pub mode: ColorMode,
}

/// Counters for observability and tests.
#[derive(Debug, Clone, Copy, Default)]
pub struct EngineStats {
    /// Times the elevation loader was invoked (mosaic built).
    pub loader_calls: u64,
    /// Requests answered from the precompressed pyramid.
    pub precompressed_hits: u64,
    /// PNG responses rendered (not served from cache).
    pub png_renders: u64,
}

struct Counters {
    loader_calls: AtomicU64,
    precompressed_hits: AtomicU64,
    png_renders: AtomicU64,
}

/// The request coordinator. Construct once at startup, share by `Arc`.
pub struct TileEngine {
    loader: Arc<ElevationLoader>,
    precompressed: Arc<PrecompressedStore>,
    config: EngineConfig,
    luts: LutRegistry,
    png_cache: TileCache,
    u16_flights: SingleFlight<TileId, Bytes>,
    png_flights: SingleFlight<CacheKey, Bytes>,
    synth_slots: Arc<Semaphore>,
    queued: AtomicUsize,
    counters: Arc<Counters>,
}

impl TileEngine {
    /// Build an engine over its stores.
    pub fn new(
        loader: Arc<ElevationLoader>,
        precompressed: Arc<PrecompressedStore>,
        config: EngineConfig,
    ) -> Self {
        let png_cache = TileCache::new(config.png_cache_max, config.png_cache_ttl);
        let synth_slots = Arc::new(Semaphore::new(config.concurrency_cap.max(1)));
        TileEngine {
            loader,
            precompressed,
            config,
            luts: LutRegistry::new(),
            png_cache,
            u16_flights: SingleFlight::new(),
            png_flights: SingleFlight::new(),
            synth_slots,
            queued: AtomicUsize::new(0),
            counters: Arc::new(Counters {
                loader_calls: AtomicU64::new(0),
                precompressed_hits: AtomicU64::new(0),
                png_renders: AtomicU64::new(0),
            }),
        }
    }

    /// The engine's configuration.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Counter snapshot.
    pub fn stats(&self) -> EngineStats {
        EngineStats {
            loader_calls: self.counters.loader_calls.load(Ordering::Relaxed),
            precompressed_hits: self.counters.precompressed_hits.load(Ordering::Relaxed),
            png_renders: self.counters.png_renders.load(Ordering::Relaxed),
        }
    }

    /// PNG cache counters.
    pub fn png_cache_stats(&self) -> crate::CacheStats {
        self.png_cache.stats()
    }

    /// Serve the uint16 payload for a tile.
    ///
    /// `preferences` is the client's ordered `Accept-Encoding` list.
    /// With `precompressed_only`, a pyramid miss is a 404-class error
    /// instead of falling through to runtime synthesis.
    pub async fn serve_uint16(
        &self,
        z: u8,
        x: u32,
        y: u32,
        preferences: &[Encoding],
        precompressed_only: bool,
    ) -> Result<Uint16Response> {
        let tile = self.validate_tile(z, x, y)?;
        counter!("floodmap_requests_total", "path" => "u16").increment(1);
        tokio::time::timeout(
            self.config.deadline,
            self.serve_uint16_inner(tile, preferences, precompressed_only),
        )
        .await
        .map_err(|_| EngineError::Timeout)?
    }

    async fn serve_uint16_inner(
        &self,
        tile: TileId,
        preferences: &[Encoding],
        precompressed_only: bool,
    ) -> Result<Uint16Response> {
        if let Some(artifact) = self.precompressed.negotiate(tile, preferences) {
            let body = tokio::fs::read(&artifact.path).await.map_err(|e| {
                EngineError::Store(floodmap_store::StoreError::Io(e))
            })?;
            self.counters.precompressed_hits.fetch_add(1, Ordering::Relaxed);
            counter!("floodmap_precompressed_hits_total").increment(1);
            debug!(tile = %tile, encoding = %artifact.encoding, "serving precompressed artifact");
            return Ok(Uint16Response {
                body: Bytes::from(body),
                encoding: artifact.encoding,
                source: TileSource::Precompressed,
            });
        }
        if precompressed_only {
            return Err(EngineError::NotPrecompressed(tile));
        }

        let body = self
            .u16_flights
            .run(tile, || self.synthesize_uint16(tile))
            .await?;
        Ok(Uint16Response {
            body,
            encoding: Encoding::Identity,
            source: TileSource::Runtime,
        })
    }

    /// Leader-side uint16 synthesis: mosaic, encode, serialize.
    async fn synthesize_uint16(&self, tile: TileId) -> Result<Bytes> {
        let _permit = self.acquire_synth_slot().await?;
        let payload = self.build_payload(tile, Resampling::Nearest).await?;
        Ok(payload.to_bytes())
    }

    /// Mosaic a tile and encode it, off the async runtime. Wire payloads
    /// always use nearest-neighbor so precompressed and runtime output
    /// agree byte for byte.
    async fn build_payload(&self, tile: TileId, resampling: Resampling) -> Result<U16Tile> {
        let loader = self.loader.clone();
        let counters = self.counters.clone();
        let payload = tokio::task::spawn_blocking(move || -> Result<U16Tile> {
            counters.loader_calls.fetch_add(1, Ordering::Relaxed);
            let mosaic = loader.load_tile(tile, resampling)?;
            if !mosaic.has_data() {
                // Pure ocean or outside coverage: a synthetic all-NoData
                // payload is the correct, cacheable answer.
                return Ok(U16Tile::all_nodata());
            }
            Ok(U16Tile::encode(mosaic.grid()))
        })
        .await??;
        counter!("floodmap_tiles_synthesized_total").increment(1);
        Ok(payload)
    }

    /// Serve a colorized PNG tile.
    pub async fn serve_png(&self, z: u8, x: u32, y: u32, request: PngRequest) -> Result<PngResponse> {
        let tile = self.validate_tile(z, x, y)?;
        let mode = match request {
            PngRequest::Topographic => ColorMode::Topographic,
            PngRequest::Flood { water_level } => {
                if !water_level.is_finite()
                    || water_level < self.config.min_water_level
                    || water_level > self.config.max_water_level
                {
                    return Err(EngineError::InvalidWaterLevel {
                        value: water_level,
                        min: self.config.min_water_level,
                        max: self.config.max_water_level,
                    });
                }
                ColorMode::Flood(WaterLevel::from_meters(water_level))
            }
        };
        counter!("floodmap_requests_total", "path" => "png").increment(1);
        tokio::time::timeout(self.config.deadline, self.serve_png_inner(tile, mode))
            .await
            .map_err(|_| EngineError::Timeout)?
    }

    async fn serve_png_inner(&self, tile: TileId, mode: ColorMode) -> Result<PngResponse> {
        let key = CacheKey { mode, tile };
        if let Some(body) = self.png_cache.get(&key) {
            counter!("floodmap_png_cache_hits_total").increment(1);
            return Ok(PngResponse {
                body,
                source: TileSource::Cache,
                mode,
            });
        }

        let body = self
            .png_flights
            .run(key, || self.render_png(key))
            .await?;
        Ok(PngResponse {
            body,
            source: TileSource::Runtime,
            mode,
        })
    }

    /// Leader-side PNG render: payload, colorize, encode, cache.
    async fn render_png(&self, key: CacheKey) -> Result<Bytes> {
        let _permit = self.acquire_synth_slot().await?;

        // Prefer decoding a precompressed artifact over re-mosaicking;
        // the pyramid already paid for the mosaic.
        let payload = {
            let precompressed = self.precompressed.clone();
            let tile = key.tile;
            let stored = tokio::task::spawn_blocking(move || precompressed.load_payload(tile))
                .await??;
            match stored {
                Some(payload) => payload,
                None => self.build_payload(key.tile, self.config.png_resampling).await?,
            }
        };

        let lut = self.luts.get(key.mode);
        let mode = key.mode;
        let body = tokio::task::spawn_blocking(move || -> Result<Bytes> {
            let rgba = if payload.is_all_nodata() {
                Lut::solid(mode.nodata_fill())
            } else {
                lut.map(payload.values())
            };
            encode_png(&rgba)
        })
        .await??;

        self.counters.png_renders.fetch_add(1, Ordering::Relaxed);
        counter!("floodmap_png_renders_total").increment(1);
        self.png_cache.insert(key, body.clone());
        Ok(body)
    }

    fn validate_tile(&self, z: u8, x: u32, y: u32) -> Result<TileId> {
        if z > self.config.max_zoom {
            return Err(EngineError::InvalidTile {
                z,
                x,
                y,
                max_zoom: self.config.max_zoom,
            });
        }
        TileId::checked(z, x, y).ok_or(EngineError::InvalidTile {
            z,
            x,
            y,
            max_zoom: self.config.max_zoom,
        })
    }

    /// Take a synthesis slot, queueing up to the configured bound.
    async fn acquire_synth_slot(&self) -> Result<OwnedSemaphorePermit> {
        if let Ok(permit) = self.synth_slots.clone().try_acquire_owned() {
            return Ok(permit);
        }
        let waiting = self.queued.fetch_add(1, Ordering::AcqRel);
        if waiting >= self.config.queue_bound {
            self.queued.fetch_sub(1, Ordering::AcqRel);
            counter!("floodmap_overloaded_total").increment(1);
            return Err(EngineError::Overloaded);
        }
        let permit = self.synth_slots.clone().acquire_owned().await;
        self.queued.fetch_sub(1, Ordering::AcqRel);
        permit.map_err(|_| EngineError::Internal("synthesis semaphore closed".into()))
    }

    pub(crate) fn precompressed(&self) -> &Arc<PrecompressedStore> {
        &self.precompressed
    }

    pub(crate) fn u16_flight_payload(
        &self,
        tile: TileId,
    ) -> impl std::future::Future<Output = Result<Bytes>> + '_ {
        self.u16_flights.run(tile, move || self.synthesize_uint16(tile))
    }
}

impl std::fmt::Debug for TileEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TileEngine")
            .field("config", &self.config)
            .finish()
    }
}

/// Encode a tightly packed RGBA buffer as a 256x256 PNG.
///
/// Compression is tuned for speed: the PNG path is a compatibility
/// format, and most bytes are served from the cache afterwards anyway.
fn encode_png(rgba: &[u8]) -> Result<Bytes> {
    debug_assert_eq!(rgba.len(), TILE_SIZE * TILE_SIZE * 4);
    let mut out = Vec::with_capacity(16 * 1024);
    let encoder = PngEncoder::new_with_quality(&mut out, CompressionType::Fast, FilterType::NoFilter);
    encoder
        .write_image(
            rgba,
            TILE_SIZE as u32,
            TILE_SIZE as u32,
            image::ColorType::Rgba8,
        )
        .map_err(|e| EngineError::Internal(format!("png encode failed: {e}")))?;
    Ok(Bytes::from(out))
}
