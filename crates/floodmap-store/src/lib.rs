//! # floodmap-store
//!
//! The precompressed elevation tile pyramid.
//!
//! Serving a `.u16` payload from disk costs a file open; synthesizing one
//! costs a mosaic and an encode. An offline generator therefore
//! pre-materializes the pyramid for the covered region, in one or more
//! content-encodings:
//!
//! ```text
//! <root>/
//!   manifest.json
//!   <z>/<x>/<y>.u16.br     Brotli
//!   <z>/<x>/<y>.u16.gz     gzip (optional)
//!   <z>/<x>/<y>.u16        identity (optional)
//! ```
//!
//! At request time [`PrecompressedStore`] negotiates the client's
//! `Accept-Encoding` preferences against what exists on disk; a missing
//! file is a cache miss that falls through to runtime synthesis, never an
//! error. Artifacts are immutable once written — the generator writes to a
//! temporary file and renames, so a reader observes either the old bytes or
//! the new bytes in full.

mod artifact;
mod encoding;
mod error;
mod generator;
mod manifest;

pub use artifact::{Artifact, PrecompressedStore};
pub use encoding::Encoding;
pub use error::StoreError;
pub use generator::{GeneratorConfig, GeneratorSummary, PyramidGenerator};
pub use manifest::{Manifest, ZoomSummary};

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;
