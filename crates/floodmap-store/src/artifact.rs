//! Read-side access to the precompressed pyramid.

use std::io::Read;
use std::path::{Path, PathBuf};

use bytes::Bytes;
use tracing::{info, warn};

use floodmap_codec::U16Tile;
use floodmap_dem::TileId;

use crate::encoding::Encoding;
use crate::manifest::Manifest;
use crate::Result;

/// Decode order when any variant will do: cheapest first.
const DECODE_ORDER: [Encoding; 3] = [Encoding::Identity, Encoding::Gzip, Encoding::Brotli];

/// A concrete on-disk artifact selected by negotiation.
#[derive(Debug, Clone)]
pub struct Artifact {
    /// Path of the file to serve.
    pub path: PathBuf,
    /// The encoding its bytes are in.
    pub encoding: Encoding,
    /// File size in bytes.
    pub len: u64,
}

/// Read-only view of the pyramid directory.
///
/// All methods treat a missing file as a miss. The store performs no
/// writes at request time; regeneration happens out-of-process and
/// replaces files atomically, so concurrent readers see old or new bytes,
/// never a torn file.
#[derive(Debug)]
pub struct PrecompressedStore {
    root: PathBuf,
}

impl PrecompressedStore {
    /// Open a store over a pyramid root. The root may be empty or absent;
    /// every lookup will simply miss.
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        let store = PrecompressedStore {
            root: root.as_ref().to_path_buf(),
        };
        match store.read_manifest() {
            Ok(Some(manifest)) => info!(
                root = %store.root.display(),
                tiles = manifest.tiles_written,
                zoom_min = manifest.zoom_min,
                zoom_max = manifest.zoom_max,
                "precompressed pyramid available"
            ),
            Ok(None) => info!(
                root = %store.root.display(),
                "no precompressed manifest; serving will rely on runtime synthesis"
            ),
            Err(e) => warn!(root = %store.root.display(), error = %e, "unreadable manifest"),
        }
        store
    }

    /// The pyramid root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path of a tile's artifact under a given encoding.
    pub fn artifact_path(&self, tile: TileId, encoding: Encoding) -> PathBuf {
        self.root
            .join(tile.z.to_string())
            .join(tile.x.to_string())
            .join(format!("{}.u16{}", tile.y, encoding.file_suffix()))
    }

    /// Pick the first client-acceptable encoding that exists on disk.
    pub fn negotiate(&self, tile: TileId, preferences: &[Encoding]) -> Option<Artifact> {
        for &encoding in preferences {
            let path = self.artifact_path(tile, encoding);
            if let Ok(meta) = std::fs::metadata(&path) {
                if meta.is_file() {
                    return Some(Artifact {
                        path,
                        encoding,
                        len: meta.len(),
                    });
                }
            }
        }
        None
    }

    /// Read an artifact's raw (still-encoded) bytes.
    pub fn read(&self, artifact: &Artifact) -> Result<Bytes> {
        Ok(Bytes::from(std::fs::read(&artifact.path)?))
    }

    /// Load and decode a tile payload from any variant, for in-process
    /// consumers (PNG rendering, point sampling).
    ///
    /// Returns `Ok(None)` when no variant exists. A variant that exists
    /// but does not decode to a valid payload is logged and treated as a
    /// miss so the engine falls through to runtime synthesis.
    pub fn load_payload(&self, tile: TileId) -> Result<Option<U16Tile>> {
        for encoding in DECODE_ORDER {
            let path = self.artifact_path(tile, encoding);
            let raw = match std::fs::read(&path) {
                Ok(bytes) => bytes,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            };
            match decode_variant(&raw, encoding) {
                Ok(payload) => return Ok(Some(payload)),
                Err(e) => {
                    warn!(
                        tile = %tile,
                        path = %path.display(),
                        error = %e,
                        "undecodable precompressed artifact; falling through"
                    );
                }
            }
        }
        Ok(None)
    }

    /// Parse `manifest.json` if present.
    pub fn read_manifest(&self) -> Result<Option<Manifest>> {
        let path = self.root.join("manifest.json");
        let bytes = match std::fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        Ok(Some(serde_json::from_slice(&bytes)?))
    }
}

/// Decode one stored variant into a validated payload.
fn decode_variant(raw: &[u8], encoding: Encoding) -> std::io::Result<U16Tile> {
    let identity = match encoding {
        Encoding::Identity => raw.to_vec(),
        Encoding::Gzip => {
            let mut out = Vec::with_capacity(floodmap_codec::PAYLOAD_BYTES);
            flate2::bufread::GzDecoder::new(raw).read_to_end(&mut out)?;
            out
        }
        Encoding::Brotli => {
            let mut out = Vec::with_capacity(floodmap_codec::PAYLOAD_BYTES);
            brotli::Decompressor::new(raw, 4096).read_to_end(&mut out)?;
            out
        }
    };
    U16Tile::from_bytes(&identity)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
}
