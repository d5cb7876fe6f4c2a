//! # floodmap-engine
//!
//! The tile engine: the request coordinator between the HTTP surface and
//! the elevation stores.
//!
//! Two entry points serve tiles:
//!
//! - [`TileEngine::serve_uint16`] — the primary wire format. Precompressed
//!   artifacts are served when an acceptable content-encoding exists on
//!   disk; otherwise the payload is synthesized from DEM sources under a
//!   single-flight discipline so concurrent requests for one tile do the
//!   mosaic work once.
//! - [`TileEngine::serve_png`] — colorized compatibility tiles (flood and
//!   topographic modes), cached in a bounded LRU keyed by the full render
//!   key, with the same single-flight discipline.
//!
//! [`TileEngine::assess_risk`] answers the point-sample question ("how high
//! is this coordinate, relative to a water level?") through the same uint16
//! path, precompressed preferred.
//!
//! The engine owns all shared mutable state — caches, lock stripes, the
//! synthesis semaphore — and is constructed once at startup and passed by
//! `Arc` into request handlers.

mod cache;
mod engine;
mod error;
mod flight;
mod sample;

pub use cache::{CacheKey, CacheStats, TileCache};
pub use engine::{
    EngineConfig, EngineStats, PngRequest, PngResponse, TileEngine, TileSource, Uint16Response,
};
pub use error::EngineError;
pub use sample::{RiskAssessment, RiskLevel};

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, EngineError>;
