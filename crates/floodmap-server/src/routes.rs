//! HTTP handlers for the tile and risk endpoints.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::{header, HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use metrics_exporter_prometheus::PrometheusHandle;
use serde::Deserialize;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::error;

use floodmap_engine::{EngineError, PngRequest, TileEngine};
use floodmap_store::Encoding;

/// Far-future cache lifetime for immutable tile responses.
const TILE_CACHE_CONTROL: &str = "public, max-age=31536000, immutable";

/// Shared handler state.
#[derive(Clone)]
pub struct AppState {
    /// The tile engine.
    pub engine: Arc<TileEngine>,
    /// Prometheus exposition handle; `None` when no recorder is
    /// installed (tests).
    pub prometheus: Option<PrometheusHandle>,
}

/// Build the service router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/v1/tiles/elevation-data/:z/:x/:y", get(elevation_data_tile))
        .route("/api/v1/tiles/elevation/:z/:x/:y", get(topographic_tile))
        .route("/api/v1/tiles/flood/:water_level/:z/:x/:y", get(flood_tile))
        .route("/risk/location", post(risk_location))
        .route("/api/v1/tiles/health", get(tiles_health))
        .route("/metrics", get(metrics_exposition))
        .with_state(state)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
}

#[derive(Debug, Deserialize)]
struct TileQuery {
    /// `method=precompressed` declines runtime synthesis.
    method: Option<String>,
}

/// Split `"215.u16"` into the row number, enforcing the extension.
fn parse_tile_row(raw: &str, extension: &str) -> Option<u32> {
    raw.strip_suffix(extension)?.parse().ok()
}

async fn elevation_data_tile(
    State(state): State<AppState>,
    Path((z, x, y_raw)): Path<(u8, u32, String)>,
    Query(query): Query<TileQuery>,
    headers: HeaderMap,
) -> Response {
    let Some(y) = parse_tile_row(&y_raw, ".u16") else {
        return bad_request(format!("expected <y>.u16, got '{y_raw}'"));
    };
    let accept_encoding = headers
        .get(header::ACCEPT_ENCODING)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");
    let preferences = Encoding::parse_preferences(accept_encoding);
    let precompressed_only = query.method.as_deref() == Some("precompressed");

    match state
        .engine
        .serve_uint16(z, x, y, &preferences, precompressed_only)
        .await
    {
        Ok(tile) => {
            let mut response = Response::builder()
                .status(StatusCode::OK)
                .header(header::CONTENT_TYPE, "application/octet-stream")
                .header(header::CACHE_CONTROL, TILE_CACHE_CONTROL)
                .header(header::VARY, "Accept-Encoding")
                .header("X-Tile-Source", tile.source.as_str());
            if let Some(encoding) = tile.encoding.content_encoding() {
                response = response.header(header::CONTENT_ENCODING, encoding);
            }
            response.body(tile.body.into()).unwrap_or_else(|e| {
                error!(error = %e, "response build failed");
                StatusCode::INTERNAL_SERVER_ERROR.into_response()
            })
        }
        Err(e) => error_response(e),
    }
}

async fn topographic_tile(
    State(state): State<AppState>,
    Path((z, x, y_raw)): Path<(u8, u32, String)>,
) -> Response {
    let Some(y) = parse_tile_row(&y_raw, ".png") else {
        return bad_request(format!("expected <y>.png, got '{y_raw}'"));
    };
    match state.engine.serve_png(z, x, y, PngRequest::Topographic).await {
        Ok(tile) => png_response(tile),
        Err(e) => error_response(e),
    }
}

async fn flood_tile(
    State(state): State<AppState>,
    Path((water_level, z, x, y_raw)): Path<(f64, u8, u32, String)>,
) -> Response {
    let Some(y) = parse_tile_row(&y_raw, ".png") else {
        return bad_request(format!("expected <y>.png, got '{y_raw}'"));
    };
    match state
        .engine
        .serve_png(z, x, y, PngRequest::Flood { water_level })
        .await
    {
        Ok(tile) => png_response(tile),
        Err(e) => error_response(e),
    }
}

fn png_response(tile: floodmap_engine::PngResponse) -> Response {
    let mut response = Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "image/png")
        .header(header::CACHE_CONTROL, TILE_CACHE_CONTROL)
        .header("X-Tile-Source", tile.source.as_str());
    if let floodmap_color::ColorMode::Flood(level) = tile.mode {
        if let Ok(value) = HeaderValue::from_str(&level.to_string()) {
            response = response.header("X-Water-Level", value);
        }
    }
    response.body(tile.body.into()).unwrap_or_else(|e| {
        error!(error = %e, "response build failed");
        StatusCode::INTERNAL_SERVER_ERROR.into_response()
    })
}

#[derive(Debug, Deserialize)]
struct RiskRequest {
    latitude: f64,
    longitude: f64,
    water_level_m: Option<f64>,
    is_water_hint: Option<bool>,
}

async fn risk_location(
    State(state): State<AppState>,
    Json(request): Json<RiskRequest>,
) -> Response {
    match state
        .engine
        .assess_risk(
            request.latitude,
            request.longitude,
            request.water_level_m,
            request.is_water_hint.unwrap_or(false),
        )
        .await
    {
        Ok(assessment) => Json(assessment).into_response(),
        Err(e) => error_response(e),
    }
}

async fn tiles_health(State(state): State<AppState>) -> Response {
    let config = state.engine.config();
    let cache = state.engine.png_cache_stats();
    Json(serde_json::json!({
        "status": "healthy",
        "endpoints": {
            "elevation_data": "/api/v1/tiles/elevation-data/{z}/{x}/{y}.u16",
            "elevation": "/api/v1/tiles/elevation/{z}/{x}/{y}.png",
            "flood": "/api/v1/tiles/flood/{water_level}/{z}/{x}/{y}.png",
            "risk": "/risk/location",
        },
        "max_zoom": config.max_zoom,
        "water_level_range": [config.min_water_level, config.max_water_level],
        "png_cache": {
            "entries": cache.entries,
            "hits": cache.hits,
            "misses": cache.misses,
        },
    }))
    .into_response()
}

async fn metrics_exposition(State(state): State<AppState>) -> Response {
    match &state.prometheus {
        Some(handle) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            handle.render(),
        )
            .into_response(),
        None => StatusCode::SERVICE_UNAVAILABLE.into_response(),
    }
}

fn bad_request(message: String) -> Response {
    (
        StatusCode::BAD_REQUEST,
        Json(serde_json::json!({ "error": message })),
    )
        .into_response()
}

/// Map an engine error onto the HTTP surface.
fn error_response(error: EngineError) -> Response {
    let status = match &error {
        EngineError::InvalidTile { .. }
        | EngineError::InvalidWaterLevel { .. }
        | EngineError::InvalidCoordinate { .. } => StatusCode::BAD_REQUEST,
        EngineError::NotPrecompressed(_) => StatusCode::NOT_FOUND,
        EngineError::Overloaded => StatusCode::SERVICE_UNAVAILABLE,
        EngineError::Timeout => StatusCode::GATEWAY_TIMEOUT,
        EngineError::Dem(floodmap_dem::DemError::RootMissing(_)) => StatusCode::SERVICE_UNAVAILABLE,
        EngineError::Dem(_) | EngineError::Store(_) | EngineError::Internal(_) => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    };
    if status.is_server_error() {
        error!(error = %error, status = %status, "request failed");
    }
    let mut response = (
        status,
        Json(serde_json::json!({ "error": error.to_string() })),
    )
        .into_response();
    if status == StatusCode::SERVICE_UNAVAILABLE {
        response
            .headers_mut()
            .insert(header::RETRY_AFTER, HeaderValue::from_static("1"));
    }
    response
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tile_row_parsing() {
        assert_eq!(parse_tile_row("215.u16", ".u16"), Some(215));
        assert_eq!(parse_tile_row("859.png", ".png"), Some(859));
        assert_eq!(parse_tile_row("215", ".u16"), None);
        assert_eq!(parse_tile_row("215.png", ".u16"), None);
        assert_eq!(parse_tile_row("abc.u16", ".u16"), None);
    }
}
