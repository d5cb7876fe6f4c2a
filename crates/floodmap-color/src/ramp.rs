//! The flood and topographic color ramps.
//!
//! These are the reference definitions; the LUT in [`crate::lut`] is built
//! by evaluating them at every decodable wire value.

/// An 8-bit RGBA color.
pub type Rgba = [u8; 4];

/// Fully transparent; used well above the flood waterline.
pub const TRANSPARENT: Rgba = [0, 0, 0, 0];

/// Deep steel blue for NoData pixels in flood mode (open water).
pub const WATER: Rgba = [36, 74, 115, 242];

/// Ocean blue for NoData and below-sea pixels in topographic mode.
pub const OCEAN: Rgba = [70, 130, 180, 255];

/// Comfortably above the waterline.
pub const SAFE: Rgba = [76, 175, 80, 120];

/// Narrowing margin.
pub const CAUTION: Rgba = [255, 193, 7, 160];

/// Margin under half a meter.
pub const DANGER: Rgba = [244, 67, 54, 200];

/// At or below the waterline.
pub const FLOODED: Rgba = [33, 150, 243, 220];

/// Margin (m above water) at and beyond which flood tiles are transparent.
pub const SAFE_MARGIN_M: f64 = 5.0;

/// Margin where the caution band begins.
pub const CAUTION_MARGIN_M: f64 = 2.0;

/// Margin where the danger band begins.
pub const DANGER_MARGIN_M: f64 = 0.5;

/// Linear blend between two RGBA colors, `t` in `[0, 1]`.
#[inline]
fn blend(a: Rgba, b: Rgba, t: f64) -> Rgba {
    let t = t.clamp(0.0, 1.0);
    let mut out = [0u8; 4];
    for i in 0..4 {
        out[i] = (f64::from(a[i]) * (1.0 - t) + f64::from(b[i]) * t).round() as u8;
    }
    out
}

/// Flood-mode color for an elevation at a given water level, both in meters.
///
/// The ramp is continuous in the margin `r = elevation - water_level`:
///
/// - `r >= 5.0` — transparent
/// - `r in [2.0, 5.0)` — SAFE → CAUTION
/// - `r in [0.5, 2.0)` — CAUTION → DANGER
/// - `r in [-0.5, 0.5)` — DANGER → FLOODED
/// - `r < -0.5` — FLOODED
pub fn flood_color(elevation_m: f64, water_level_m: f64) -> Rgba {
    let r = elevation_m - water_level_m;
    if r >= SAFE_MARGIN_M {
        TRANSPARENT
    } else if r >= CAUTION_MARGIN_M {
        blend(SAFE, CAUTION, (SAFE_MARGIN_M - r) / (SAFE_MARGIN_M - CAUTION_MARGIN_M))
    } else if r >= DANGER_MARGIN_M {
        blend(
            CAUTION,
            DANGER,
            (CAUTION_MARGIN_M - r) / (CAUTION_MARGIN_M - DANGER_MARGIN_M),
        )
    } else if r >= -DANGER_MARGIN_M {
        blend(DANGER, FLOODED, (DANGER_MARGIN_M - r) / (2.0 * DANGER_MARGIN_M))
    } else {
        FLOODED
    }
}

/// Elevation ceiling for the topographic ramp.
const TOPO_MAX_M: f64 = 6500.0;

/// Softening constant for the `asinh` height compression.
const TOPO_SOFT_M: f64 = 120.0;

/// Hypsometric stops: (elevation m, color). Green lowlands through
/// yellow-green and tan to brown, gray, and white at the ceiling.
const TOPO_STOPS: [(f64, Rgba); 15] = [
    (0.0, [70, 138, 80, 255]),
    (5.0, [92, 154, 84, 255]),
    (15.0, [116, 170, 88, 255]),
    (30.0, [140, 184, 94, 255]),
    (60.0, [165, 196, 102, 255]),
    (100.0, [190, 206, 112, 255]),
    (150.0, [211, 212, 125, 255]),
    (250.0, [225, 209, 133, 255]),
    (400.0, [222, 192, 128, 255]),
    (700.0, [205, 168, 115, 255]),
    (1200.0, [181, 141, 100, 255]),
    (2000.0, [156, 118, 91, 255]),
    (3000.0, [142, 121, 109, 255]),
    (4500.0, [170, 160, 153, 255]),
    (6500.0, [238, 238, 238, 255]),
];

/// `asinh` warp used to spread lowland detail across the ramp.
#[inline]
fn topo_warp(elevation_m: f64) -> f64 {
    (elevation_m.clamp(0.0, TOPO_MAX_M) / TOPO_SOFT_M).asinh()
        / (TOPO_MAX_M / TOPO_SOFT_M).asinh()
}

/// Topographic color for an absolute elevation in meters.
///
/// Below sea level renders as [`OCEAN`]; at and above the ceiling the last
/// stop applies. Between stops the color interpolates linearly in warped
/// height space.
pub fn topographic_color(elevation_m: f64) -> Rgba {
    if elevation_m < 0.0 {
        return OCEAN;
    }
    let t = topo_warp(elevation_m);
    let last = TOPO_STOPS.len() - 1;
    for i in 0..last {
        let (lo_e, lo_c) = TOPO_STOPS[i];
        let (hi_e, hi_c) = TOPO_STOPS[i + 1];
        if elevation_m < hi_e {
            let lo_t = topo_warp(lo_e);
            let hi_t = topo_warp(hi_e);
            let local = if hi_t > lo_t { (t - lo_t) / (hi_t - lo_t) } else { 0.0 };
            return blend(lo_c, hi_c, local);
        }
    }
    TOPO_STOPS[last].1
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flood_bands() {
        let w = 1.0;
        assert_eq!(flood_color(6.0, w), TRANSPARENT);
        assert_eq!(flood_color(w + SAFE_MARGIN_M, w), TRANSPARENT);
        // Just under the safe margin starts at SAFE
        let near_safe = flood_color(w + SAFE_MARGIN_M - 1e-6, w);
        assert_eq!(near_safe, SAFE);
        // Band boundaries land exactly on the anchor colors
        assert_eq!(flood_color(w + CAUTION_MARGIN_M, w), CAUTION);
        assert_eq!(flood_color(w + DANGER_MARGIN_M, w), DANGER);
        assert_eq!(flood_color(w - DANGER_MARGIN_M - 1e-6, w), FLOODED);
        assert_eq!(flood_color(-100.0, w), FLOODED);
    }

    #[test]
    fn flood_ramp_is_continuous_at_interior_boundaries() {
        let w = 0.0;
        for boundary in [CAUTION_MARGIN_M, DANGER_MARGIN_M, -DANGER_MARGIN_M] {
            let above = flood_color(boundary + 1e-7, w);
            let below = flood_color(boundary - 1e-7, w);
            for i in 0..4 {
                assert!(
                    (i32::from(above[i]) - i32::from(below[i])).abs() <= 1,
                    "discontinuity at margin {boundary}: {above:?} vs {below:?}"
                );
            }
        }
    }

    #[test]
    fn topographic_endpoints() {
        assert_eq!(topographic_color(-5.0), OCEAN);
        assert_eq!(topographic_color(0.0), TOPO_STOPS[0].1);
        assert_eq!(topographic_color(6500.0), TOPO_STOPS[14].1);
        assert_eq!(topographic_color(9000.0), TOPO_STOPS[14].1);
    }

    #[test]
    fn topographic_stops_hit_their_colors() {
        for (e, c) in TOPO_STOPS {
            assert_eq!(topographic_color(e), c, "stop at {e} m");
        }
    }

    #[test]
    fn topographic_lowlands_get_ramp_room() {
        // The asinh warp should spend a visible share of the ramp below
        // 100 m even though that is under 2% of the elevation range.
        let t100 = topo_warp(100.0);
        assert!(t100 > 0.25, "warp at 100 m was only {t100}");
    }
}
