//! # floodmap-codec
//!
//! The uint16 wire codec for elevation tiles.
//!
//! Clients render elevation tiles on the GPU from a compact binary format:
//! a 256x256 grid of little-endian `u16` values, 131,072 bytes exactly, no
//! header. Values `0..=65534` linearly encode meters over `[-500, +9000]`;
//! the value `65535` is reserved for NoData (ocean, voids, outside
//! coverage). The server and the client renderer must agree on this format
//! bit-exactly, so the quantization lives in its own crate with exhaustive
//! round-trip tests.
//!
//! ## Example
//!
//! ```
//! use floodmap_codec::{decode_elevation, encode_elevation, NODATA_I16};
//!
//! let wire = encode_elevation(250);
//! let meters = decode_elevation(wire).unwrap();
//! assert!((meters - 250.0).abs() < 0.15);
//!
//! assert_eq!(decode_elevation(encode_elevation(NODATA_I16)), None);
//! ```

use bytes::Bytes;
use thiserror::Error;

/// Tile edge length in pixels.
pub const TILE_SIZE: usize = 256;

/// Number of pixels in a tile.
pub const TILE_PIXELS: usize = TILE_SIZE * TILE_SIZE;

/// Exact byte length of an encoded tile payload.
pub const PAYLOAD_BYTES: usize = TILE_PIXELS * 2;

/// Lowest encodable elevation in meters.
pub const E_MIN: f64 = -500.0;

/// Highest encodable elevation in meters.
pub const E_MAX: f64 = 9000.0;

/// Encodable elevation span in meters.
pub const E_RANGE: f64 = E_MAX - E_MIN;

/// Wire sentinel for NoData. No other value encodes NoData.
pub const NODATA_U16: u16 = 65535;

/// Canonical source-side NoData sentinel for int16 elevation rasters.
pub const NODATA_I16: i16 = -32768;

/// Largest wire value that encodes a real elevation.
const U16_MAX_VALID: u16 = 65534;

/// Errors produced when interpreting payload bytes.
#[derive(Debug, Error)]
pub enum CodecError {
    /// A payload buffer had the wrong length.
    #[error("payload length {actual} (expected exactly {PAYLOAD_BYTES} bytes)")]
    PayloadLength {
        /// Observed byte length.
        actual: usize,
    },
}

/// Result type for codec operations.
pub type Result<T> = std::result::Result<T, CodecError>;

/// Encode a source elevation into the uint16 wire format.
///
/// NoData maps to [`NODATA_U16`]; finite elevations are clamped into
/// `[E_MIN, E_MAX]` and quantized linearly onto `0..=65534`.
#[inline]
pub fn encode_elevation(elevation: i16) -> u16 {
    if elevation == NODATA_I16 {
        return NODATA_U16;
    }
    let e = f64::from(elevation);
    let scaled = (e - E_MIN) / E_RANGE * f64::from(U16_MAX_VALID);
    scaled.round().clamp(0.0, f64::from(U16_MAX_VALID)) as u16
}

/// Decode a wire value back to meters.
///
/// Returns `None` for the NoData sentinel. The decoded value is within
/// ±0.145 m of the encoded elevation.
#[inline]
pub fn decode_elevation(value: u16) -> Option<f64> {
    if value == NODATA_U16 {
        return None;
    }
    Some(f64::from(value) / f64::from(U16_MAX_VALID) * E_RANGE + E_MIN)
}

/// A 256x256 uint16 elevation payload.
///
/// The in-memory representation is host-order `u16`; [`U16Tile::to_bytes`]
/// produces the little-endian wire form. Constructing from bytes validates
/// the exact length so a truncated payload can never propagate.
#[derive(Clone, PartialEq, Eq)]
pub struct U16Tile {
    values: Box<[u16; TILE_PIXELS]>,
}

impl std::fmt::Debug for U16Tile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("U16Tile")
            .field("pixels", &TILE_PIXELS)
            .field("all_nodata", &self.is_all_nodata())
            .finish()
    }
}

impl U16Tile {
    /// Build a payload where every pixel is NoData.
    pub fn all_nodata() -> Self {
        U16Tile {
            values: Box::new([NODATA_U16; TILE_PIXELS]),
        }
    }

    /// Encode a 256x256 row-major int16 elevation grid.
    ///
    /// # Panics
    /// Panics if `grid` is not exactly [`TILE_PIXELS`] long; the mosaic
    /// layer guarantees the shape, so a mismatch is an invariant violation.
    pub fn encode(grid: &[i16]) -> Self {
        assert_eq!(grid.len(), TILE_PIXELS, "mosaic grid must be 256x256");
        let mut values = Box::new([NODATA_U16; TILE_PIXELS]);
        for (dst, &src) in values.iter_mut().zip(grid.iter()) {
            *dst = encode_elevation(src);
        }
        U16Tile { values }
    }

    /// Parse a little-endian wire payload.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != PAYLOAD_BYTES {
            return Err(CodecError::PayloadLength {
                actual: bytes.len(),
            });
        }
        let mut values = Box::new([0u16; TILE_PIXELS]);
        for (dst, chunk) in values.iter_mut().zip(bytes.chunks_exact(2)) {
            *dst = u16::from_le_bytes([chunk[0], chunk[1]]);
        }
        Ok(U16Tile { values })
    }

    /// Serialize to the little-endian wire form. Always exactly
    /// [`PAYLOAD_BYTES`] bytes.
    pub fn to_bytes(&self) -> Bytes {
        let mut buf = Vec::with_capacity(PAYLOAD_BYTES);
        for value in self.values.iter() {
            buf.extend_from_slice(&value.to_le_bytes());
        }
        Bytes::from(buf)
    }

    /// Wire value at a pixel.
    ///
    /// # Panics
    /// Panics when `px` or `py` is outside `0..256`.
    #[inline]
    pub fn get(&self, px: usize, py: usize) -> u16 {
        assert!(px < TILE_SIZE && py < TILE_SIZE);
        self.values[py * TILE_SIZE + px]
    }

    /// Decoded elevation at a pixel, `None` for NoData.
    #[inline]
    pub fn elevation_at(&self, px: usize, py: usize) -> Option<f64> {
        decode_elevation(self.get(px, py))
    }

    /// The raw wire values, row-major.
    #[inline]
    pub fn values(&self) -> &[u16; TILE_PIXELS] {
        &self.values
    }

    /// True when every pixel is the NoData sentinel.
    pub fn is_all_nodata(&self) -> bool {
        self.values.iter().all(|&v| v == NODATA_U16)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nodata_round_trips_exactly() {
        assert_eq!(encode_elevation(NODATA_I16), NODATA_U16);
        assert_eq!(decode_elevation(NODATA_U16), None);
    }

    #[test]
    fn encode_decode_within_quantization_error() {
        let step = E_RANGE / f64::from(U16_MAX_VALID);
        for e in [-500i16, -499, -1, 0, 1, 250, 1500, 8848, 8999, 9000] {
            let decoded = decode_elevation(encode_elevation(e)).unwrap();
            assert!(
                (decoded - f64::from(e)).abs() <= step / 2.0 + 1e-9,
                "elevation {e} decoded to {decoded}"
            );
        }
    }

    #[test]
    fn decode_encode_is_identity_for_all_wire_values() {
        for u in 0..=U16_MAX_VALID {
            let e = decode_elevation(u).unwrap();
            let back = ((e - E_MIN) / E_RANGE * f64::from(U16_MAX_VALID))
                .round()
                .clamp(0.0, f64::from(U16_MAX_VALID)) as u16;
            assert_eq!(back, u, "wire value {u} did not round-trip");
        }
    }

    #[test]
    fn decode_is_strictly_monotonic() {
        let mut prev = decode_elevation(0).unwrap();
        for u in 1..=U16_MAX_VALID {
            let e = decode_elevation(u).unwrap();
            assert!(e > prev, "decode not monotonic at {u}");
            prev = e;
        }
    }

    #[test]
    fn range_endpoints() {
        assert_eq!(encode_elevation(-500), 0);
        assert_eq!(encode_elevation(9000), U16_MAX_VALID);
        assert!((decode_elevation(0).unwrap() - E_MIN).abs() < 1e-9);
        assert!((decode_elevation(U16_MAX_VALID).unwrap() - E_MAX).abs() < 1e-9);
    }

    #[test]
    fn out_of_range_elevations_clamp() {
        assert_eq!(encode_elevation(-501), 0);
        assert_eq!(encode_elevation(9001), U16_MAX_VALID);
        assert_eq!(encode_elevation(i16::MAX), U16_MAX_VALID);
        // -32767 is the legacy void value; the loader coerces it to the
        // canonical sentinel before encoding, so here it just clamps.
        assert_eq!(encode_elevation(-32767), 0);
    }

    #[test]
    fn payload_is_exactly_131072_bytes() {
        let tile = U16Tile::all_nodata();
        let bytes = tile.to_bytes();
        assert_eq!(bytes.len(), 131_072);
        assert!(bytes.iter().all(|&b| b == 0xFF));
    }

    #[test]
    fn payload_byte_order_is_little_endian() {
        let mut grid = vec![NODATA_I16; TILE_PIXELS];
        grid[0] = -500; // encodes to 0x0000
        grid[1] = 9000; // encodes to 0xFFFE
        let bytes = U16Tile::encode(&grid).to_bytes();
        assert_eq!(&bytes[0..2], &[0x00, 0x00]);
        assert_eq!(&bytes[2..4], &[0xFE, 0xFF]);
        assert_eq!(&bytes[4..6], &[0xFF, 0xFF]);
    }

    #[test]
    fn from_bytes_rejects_wrong_length() {
        assert!(U16Tile::from_bytes(&[0u8; 10]).is_err());
        assert!(U16Tile::from_bytes(&[0u8; PAYLOAD_BYTES + 2]).is_err());
        assert!(U16Tile::from_bytes(&vec![0u8; PAYLOAD_BYTES]).is_ok());
    }

    #[test]
    fn bytes_round_trip() {
        let mut grid = vec![0i16; TILE_PIXELS];
        for (i, v) in grid.iter_mut().enumerate() {
            *v = ((i % 9500) as i32 - 500) as i16;
        }
        let tile = U16Tile::encode(&grid);
        let parsed = U16Tile::from_bytes(&tile.to_bytes()).unwrap();
        assert_eq!(tile, parsed);
    }

    #[test]
    fn pixel_accessors() {
        let mut grid = vec![NODATA_I16; TILE_PIXELS];
        grid[3 * TILE_SIZE + 7] = 120;
        let tile = U16Tile::encode(&grid);
        assert_eq!(tile.elevation_at(0, 0), None);
        let e = tile.elevation_at(7, 3).unwrap();
        assert!((e - 120.0).abs() < 0.15);
    }
}
