//! Point sampling and flood-risk classification.
//!
//! The risk endpoint answers "how exposed is this coordinate?" by reading
//! one pixel out of the fixed-zoom uint16 tile containing it. Going
//! through the tile path (precompressed preferred) keeps the answer
//! consistent with what the client renders: the same payload bytes back
//! both.

use metrics::counter;
use serde::Serialize;

use floodmap_codec::U16Tile;
use floodmap_dem::TileId;

use crate::engine::TileEngine;
use crate::{EngineError, Result};

/// Water level assumed when the caller does not supply one.
const DEFAULT_WATER_LEVEL_M: f64 = 1.0;

/// Margin below which risk is `High`.
const HIGH_MARGIN_M: f64 = 0.5;

/// Margin below which risk is `Moderate`.
const MODERATE_MARGIN_M: f64 = 2.0;

/// Margin below which risk is `Low` with a limited-margin description.
const LOW_MARGIN_M: f64 = 5.0;

/// Flood risk classification for a point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    /// At or below the water level.
    VeryHigh,
    /// Less than half a meter of margin.
    High,
    /// Less than two meters of margin.
    Moderate,
    /// Five meters of margin or a comfortable surplus.
    Low,
    /// No elevation data and no hint that the point is open water.
    Unknown,
}

/// Result of a point-sample risk assessment.
#[derive(Debug, Clone, Serialize)]
pub struct RiskAssessment {
    /// Echoed request latitude.
    pub latitude: f64,
    /// Echoed request longitude.
    pub longitude: f64,
    /// Decoded elevation in meters; `None` for NoData.
    pub elevation_m: Option<f64>,
    /// Classified risk.
    pub flood_risk_level: RiskLevel,
    /// Human-readable explanation.
    pub risk_description: String,
    /// The water level the classification used.
    pub water_level_m: f64,
}

impl TileEngine {
    /// Assess flood risk at a geographic coordinate.
    ///
    /// Sampling happens at the configured sample zoom through the uint16
    /// path, so the value returned here round-trips with what tile
    /// clients decode. `is_water_hint` lets a caller that already knows
    /// the point is open water (reverse geocoding, basemap) get a water
    /// classification instead of `Unknown` on NoData.
    pub async fn assess_risk(
        &self,
        latitude: f64,
        longitude: f64,
        water_level_m: Option<f64>,
        is_water_hint: bool,
    ) -> Result<RiskAssessment> {
        if !(-90.0..=90.0).contains(&latitude)
            || !(-180.0..=180.0).contains(&longitude)
            || !latitude.is_finite()
            || !longitude.is_finite()
        {
            return Err(EngineError::InvalidCoordinate {
                lat: latitude,
                lon: longitude,
            });
        }
        let water_level = water_level_m.unwrap_or(DEFAULT_WATER_LEVEL_M);
        let config = self.config();
        if !water_level.is_finite()
            || water_level < config.min_water_level
            || water_level > config.max_water_level
        {
            return Err(EngineError::InvalidWaterLevel {
                value: water_level,
                min: config.min_water_level,
                max: config.max_water_level,
            });
        }
        counter!("floodmap_requests_total", "path" => "risk").increment(1);

        let zoom = config.sample_zoom.min(config.max_zoom);
        let tile = TileId::from_lat_lon(latitude, longitude, zoom);
        let payload = self.sample_payload(tile).await?;
        let (px, py) = tile.pixel_for(latitude, longitude);
        let elevation = payload.elevation_at(px, py);

        let (level, description) = classify(elevation, water_level, is_water_hint);
        Ok(RiskAssessment {
            latitude,
            longitude,
            elevation_m: elevation,
            flood_risk_level: level,
            risk_description: description,
            water_level_m: water_level,
        })
    }

    /// Fetch the uint16 payload for a sample tile: precompressed when
    /// available, otherwise the single-flight runtime path.
    async fn sample_payload(&self, tile: TileId) -> Result<U16Tile> {
        let precompressed = self.precompressed().clone();
        let stored =
            tokio::task::spawn_blocking(move || precompressed.load_payload(tile)).await??;
        if let Some(payload) = stored {
            return Ok(payload);
        }
        let body = self.u16_flight_payload(tile).await?;
        U16Tile::from_bytes(&body)
            .map_err(|e| EngineError::Internal(format!("synthesized payload invalid: {e}")))
    }
}

/// Map a decoded elevation and water level onto a risk classification.
fn classify(
    elevation_m: Option<f64>,
    water_level_m: f64,
    is_water_hint: bool,
) -> (RiskLevel, String) {
    let Some(elevation) = elevation_m else {
        return if is_water_hint {
            (
                RiskLevel::VeryHigh,
                "Open water at this location".to_string(),
            )
        } else {
            (
                RiskLevel::Unknown,
                "No elevation data available for this location".to_string(),
            )
        };
    };

    if elevation <= water_level_m {
        return (
            RiskLevel::VeryHigh,
            format!(
                "Very high flood risk: elevation {elevation:.1} m is at or below the {water_level_m:.1} m water level"
            ),
        );
    }
    let margin = elevation - water_level_m;
    if margin < HIGH_MARGIN_M {
        (
            RiskLevel::High,
            format!("High flood risk: only {margin:.1} m above the water level"),
        )
    } else if margin < MODERATE_MARGIN_M {
        (
            RiskLevel::Moderate,
            format!("Moderate flood risk: {margin:.1} m above the water level"),
        )
    } else if margin < LOW_MARGIN_M {
        (
            RiskLevel::Low,
            format!("Low flood risk: {margin:.1} m above the water level"),
        )
    } else {
        (
            RiskLevel::Low,
            format!("Low flood risk: elevation {elevation:.1} m is well above the water level"),
        )
    }
}
