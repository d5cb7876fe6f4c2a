//! End-to-end engine tests over fixture source directories.

use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use floodmap_codec::U16Tile;
use floodmap_dem::{CellId, CellMeta, ElevationLoader, SourceStore, TileId};
use floodmap_engine::{
    EngineConfig, EngineError, PngRequest, RiskLevel, TileEngine, TileSource,
};
use floodmap_store::{Encoding, PrecompressedStore};

fn write_cell(dir: &Path, id: CellId, fill: i16) {
    let rows = 16;
    let cols = 16;
    let values = vec![fill; rows * cols];
    let mut raw = Vec::with_capacity(values.len() * 2);
    for v in &values {
        raw.extend_from_slice(&v.to_le_bytes());
    }
    let compressed = zstd::bulk::Compressor::new(3).unwrap().compress(&raw).unwrap();
    let stem = id.file_stem();
    std::fs::File::create(dir.join(format!("{stem}.zst")))
        .unwrap()
        .write_all(&compressed)
        .unwrap();
    let meta = CellMeta {
        shape: [rows, cols],
        bounds: id.nominal_bounds(),
        nodata: -32768,
        crs: "EPSG:4326".to_string(),
    };
    std::fs::write(dir.join(format!("{stem}.json")), serde_json::to_vec(&meta).unwrap()).unwrap();
}

struct Fixture {
    engine: Arc<TileEngine>,
    _source: tempfile::TempDir,
    pyramid: tempfile::TempDir,
}

fn fixture(config: EngineConfig, cells: &[(CellId, i16)]) -> Fixture {
    let source = tempfile::tempdir().unwrap();
    let pyramid = tempfile::tempdir().unwrap();
    for (id, fill) in cells {
        write_cell(source.path(), *id, *fill);
    }
    let store = Arc::new(SourceStore::new(source.path(), 16));
    let loader = Arc::new(ElevationLoader::new(store));
    let precompressed = Arc::new(PrecompressedStore::new(pyramid.path()));
    Fixture {
        engine: Arc::new(TileEngine::new(loader, precompressed, config)),
        _source: source,
        pyramid,
    }
}

const TAMPA_CELL: CellId = CellId { lat_floor: 27, lon_floor: -83 };

/// A z=11 tile inside the Tampa cell.
fn tampa_tile() -> TileId {
    TileId::from_lat_lon(27.5, -82.5, 11)
}

#[tokio::test]
async fn pure_ocean_tile_is_all_nodata_bytes() {
    let fx = fixture(EngineConfig::default(), &[]);
    let response = fx
        .engine
        .serve_uint16(9, 140, 215, &[Encoding::Identity], false)
        .await
        .unwrap();
    assert_eq!(response.body.len(), 131_072);
    assert!(response.body.iter().all(|&b| b == 0xFF));
    assert_eq!(response.source, TileSource::Runtime);
    assert_eq!(response.encoding, Encoding::Identity);
}

#[tokio::test]
async fn invalid_tiles_are_rejected() {
    let fx = fixture(EngineConfig::default(), &[]);
    let err = fx
        .engine
        .serve_uint16(12, 0, 0, &[Encoding::Identity], false)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::InvalidTile { .. }));

    let err = fx
        .engine
        .serve_uint16(5, 32, 0, &[Encoding::Identity], false)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::InvalidTile { .. }));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn single_flight_collapses_concurrent_requests() {
    let fx = fixture(EngineConfig::default(), &[(TAMPA_CELL, 30)]);
    let tile = tampa_tile();

    let barrier = Arc::new(tokio::sync::Barrier::new(50));
    let mut handles = Vec::new();
    for _ in 0..50 {
        let engine = fx.engine.clone();
        let barrier = barrier.clone();
        handles.push(tokio::spawn(async move {
            barrier.wait().await;
            engine
                .serve_uint16(tile.z, tile.x, tile.y, &[Encoding::Identity], false)
                .await
                .unwrap()
        }));
    }
    let mut bodies = Vec::new();
    for handle in handles {
        bodies.push(handle.await.unwrap().body);
    }
    let first = &bodies[0];
    assert!(bodies.iter().all(|b| b == first), "all responses byte-identical");
    assert_eq!(
        fx.engine.stats().loader_calls,
        1,
        "the loader ran once for 50 concurrent requests"
    );
}

#[tokio::test]
async fn precompressed_artifact_is_preferred_and_tagged() {
    let fx = fixture(EngineConfig::default(), &[(TAMPA_CELL, 30)]);
    let tile = tampa_tile();

    // Materialize an identity artifact where the store will look for it.
    let store = PrecompressedStore::new(fx.pyramid.path());
    let path = store.artifact_path(tile, Encoding::Identity);
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    let payload = U16Tile::all_nodata().to_bytes();
    std::fs::write(&path, &payload).unwrap();

    let response = fx
        .engine
        .serve_uint16(tile.z, tile.x, tile.y, &[Encoding::Identity], false)
        .await
        .unwrap();
    assert_eq!(response.source, TileSource::Precompressed);
    assert_eq!(response.body, payload);
    assert_eq!(fx.engine.stats().loader_calls, 0);
}

#[tokio::test]
async fn precompressed_miss_falls_back_to_identical_runtime_bytes() {
    let fx = fixture(EngineConfig::default(), &[(TAMPA_CELL, 30)]);
    let tile = tampa_tile();

    // The client accepts only br/gzip artifacts; none exist, so the
    // engine synthesizes an identity payload instead.
    let response = fx
        .engine
        .serve_uint16(
            tile.z,
            tile.x,
            tile.y,
            &[Encoding::Brotli, Encoding::Gzip, Encoding::Identity],
            false,
        )
        .await
        .unwrap();
    assert_eq!(response.source, TileSource::Runtime);
    assert_eq!(response.encoding, Encoding::Identity);

    // What the pyramid would have held decodes to exactly these bytes.
    let mosaic = {
        let store = Arc::new(SourceStore::new(fx._source.path(), 4));
        ElevationLoader::new(store)
            .load_tile(tile, floodmap_dem::Resampling::Nearest)
            .unwrap()
    };
    assert_eq!(response.body, U16Tile::encode(mosaic.grid()).to_bytes());
}

#[tokio::test]
async fn precompressed_only_misses_are_not_found() {
    let fx = fixture(EngineConfig::default(), &[(TAMPA_CELL, 30)]);
    let tile = tampa_tile();
    let err = fx
        .engine
        .serve_uint16(tile.z, tile.x, tile.y, &[Encoding::Identity], true)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::NotPrecompressed(_)));
}

#[tokio::test]
async fn water_level_quantization_drives_the_cache_key() {
    let fx = fixture(EngineConfig::default(), &[(TAMPA_CELL, 2)]);
    let tile = tampa_tile();

    let at = |wl: f64| {
        let engine = fx.engine.clone();
        async move {
            engine
                .serve_png(tile.z, tile.x, tile.y, PngRequest::Flood { water_level: wl })
                .await
                .unwrap()
        }
    };

    let first = at(1.23).await;
    assert_eq!(first.source, TileSource::Runtime);

    // 1.27 quantizes to 1.3: a different LUT, a different tile.
    let other = at(1.27).await;
    assert_ne!(first.body, other.body);

    // 1.23 again quantizes to 1.2: byte-identical and served from cache.
    let repeat = at(1.23).await;
    assert_eq!(repeat.body, first.body);
    assert_eq!(repeat.source, TileSource::Cache);
}

#[tokio::test]
async fn ocean_flood_png_is_solid_water_color() {
    let fx = fixture(EngineConfig::default(), &[]);
    let response = fx
        .engine
        .serve_png(9, 140, 215, PngRequest::Flood { water_level: 1.0 })
        .await
        .unwrap();

    let decoded = image::load_from_memory(&response.body).unwrap().to_rgba8();
    assert_eq!(decoded.dimensions(), (256, 256));
    let water = floodmap_color::WATER;
    for corner in [(0u32, 0u32), (255, 0), (0, 255), (255, 255), (128, 128)] {
        assert_eq!(decoded.get_pixel(corner.0, corner.1).0, water);
    }
}

#[tokio::test]
async fn ocean_topographic_png_is_solid_ocean_color() {
    let fx = fixture(EngineConfig::default(), &[]);
    let response = fx
        .engine
        .serve_png(9, 140, 215, PngRequest::Topographic)
        .await
        .unwrap();
    let decoded = image::load_from_memory(&response.body).unwrap().to_rgba8();
    assert_eq!(decoded.get_pixel(128, 128).0, floodmap_color::OCEAN);
}

#[tokio::test]
async fn water_level_out_of_range_is_invalid() {
    let fx = fixture(EngineConfig::default(), &[]);
    let err = fx
        .engine
        .serve_png(9, 140, 215, PngRequest::Flood { water_level: 5000.0 })
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::InvalidWaterLevel { .. }));
}

#[tokio::test]
async fn zero_deadline_times_out() {
    let fx = fixture(
        EngineConfig {
            deadline: Duration::ZERO,
            ..EngineConfig::default()
        },
        &[(TAMPA_CELL, 30)],
    );
    let tile = tampa_tile();
    let err = fx
        .engine
        .serve_uint16(tile.z, tile.x, tile.y, &[Encoding::Identity], false)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Timeout));
}

#[tokio::test]
async fn risk_assessment_on_land() {
    let fx = fixture(EngineConfig::default(), &[(TAMPA_CELL, 30)]);
    let assessment = fx
        .engine
        .assess_risk(27.5, -82.5, Some(1.0), false)
        .await
        .unwrap();
    let elevation = assessment.elevation_m.unwrap();
    assert!((elevation - 30.0).abs() < 0.2, "decoded {elevation}");
    assert_eq!(assessment.flood_risk_level, RiskLevel::Low);
    assert_eq!(assessment.water_level_m, 1.0);
}

#[tokio::test]
async fn risk_assessment_low_ground_is_very_high() {
    let fx = fixture(EngineConfig::default(), &[(TAMPA_CELL, 1)]);
    let assessment = fx
        .engine
        .assess_risk(27.5, -82.5, Some(2.0), false)
        .await
        .unwrap();
    assert_eq!(assessment.flood_risk_level, RiskLevel::VeryHigh);
}

#[tokio::test]
async fn risk_assessment_open_ocean_with_hint() {
    let fx = fixture(EngineConfig::default(), &[]);
    // Mid-Pacific, no coverage.
    let assessment = fx
        .engine
        .assess_risk(10.0, -150.0, None, true)
        .await
        .unwrap();
    assert_eq!(assessment.flood_risk_level, RiskLevel::VeryHigh);
    assert!(assessment.risk_description.to_lowercase().contains("water"));
    assert_eq!(assessment.elevation_m, None);
    assert_eq!(assessment.water_level_m, 1.0);

    let without_hint = fx
        .engine
        .assess_risk(10.0, -150.0, None, false)
        .await
        .unwrap();
    assert_eq!(without_hint.flood_risk_level, RiskLevel::Unknown);
}

#[tokio::test]
async fn risk_rejects_bad_coordinates() {
    let fx = fixture(EngineConfig::default(), &[]);
    let err = fx.engine.assess_risk(95.0, 0.0, None, false).await.unwrap_err();
    assert!(matches!(err, EngineError::InvalidCoordinate { .. }));
}
