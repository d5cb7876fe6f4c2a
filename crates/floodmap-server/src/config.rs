//! Command-line and environment configuration.

use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, ValueEnum};

use floodmap_dem::Resampling;
use floodmap_engine::EngineConfig;
use floodmap_store::Encoding;

/// Resampling choice for presentation PNG tiles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ResamplingArg {
    /// Nearest-neighbor (default; matches the wire payloads).
    Nearest,
    /// Bilinear; smoother PNGs, wire payloads stay nearest-neighbor.
    Bilinear,
}

impl From<ResamplingArg> for Resampling {
    fn from(arg: ResamplingArg) -> Self {
        match arg {
            ResamplingArg::Nearest => Resampling::Nearest,
            ResamplingArg::Bilinear => Resampling::Bilinear,
        }
    }
}

/// `serve` subcommand configuration.
#[derive(Args, Debug, Clone)]
pub struct ServeArgs {
    /// Directory of DEM source cells (`*.zst` + `*.json`).
    #[arg(long, env = "FLOODMAP_SOURCE_DIR", default_value = "data/elevation-source")]
    pub source_dir: PathBuf,

    /// Root of the precompressed `.u16` pyramid.
    #[arg(long, env = "FLOODMAP_PRECOMPRESSED_DIR", default_value = "data/elevation-tiles")]
    pub precompressed_dir: PathBuf,

    /// Decompressed source cells held in RAM.
    #[arg(long, env = "FLOODMAP_SOURCE_CACHE_MAX", default_value_t = 50)]
    pub source_cache_max: usize,

    /// Rendered PNG tiles held in RAM.
    #[arg(long, env = "FLOODMAP_PNG_CACHE_MAX", default_value_t = 1000)]
    pub png_cache_max: usize,

    /// Policy maximum zoom; requests beyond it get 400.
    #[arg(long, env = "FLOODMAP_MAX_ZOOM", default_value_t = 11)]
    pub max_zoom: u8,

    /// Lowest accepted flood water level (meters).
    #[arg(long, default_value_t = -10.0, allow_hyphen_values = true)]
    pub min_water_level: f64,

    /// Highest accepted flood water level (meters).
    #[arg(long, default_value_t = 1000.0)]
    pub max_water_level: f64,

    /// Maximum concurrent tile syntheses.
    #[arg(long, env = "FLOODMAP_CONCURRENCY_CAP", default_value_t = 8)]
    pub concurrency_cap: usize,

    /// Requests allowed to queue for a synthesis slot; beyond this the
    /// server sheds load with 503.
    #[arg(long, default_value_t = 64)]
    pub queue_bound: usize,

    /// Per-request deadline in milliseconds.
    #[arg(long, env = "FLOODMAP_DEADLINE_MS", default_value_t = 5000)]
    pub deadline_ms: u64,

    /// Resampling for presentation PNGs.
    #[arg(long, value_enum, default_value_t = ResamplingArg::Nearest)]
    pub resampling: ResamplingArg,

    /// Listen address.
    #[arg(long, env = "FLOODMAP_BIND", default_value = "0.0.0.0:8000")]
    pub bind: String,
}

impl ServeArgs {
    /// The engine configuration this server runs with.
    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            max_zoom: self.max_zoom,
            min_water_level: self.min_water_level,
            max_water_level: self.max_water_level,
            png_cache_max: self.png_cache_max,
            png_cache_ttl: None,
            concurrency_cap: self.concurrency_cap,
            queue_bound: self.queue_bound,
            deadline: Duration::from_millis(self.deadline_ms),
            png_resampling: self.resampling.into(),
            sample_zoom: self.max_zoom.min(11),
        }
    }
}

/// `generate` subcommand configuration.
#[derive(Args, Debug, Clone)]
pub struct GenerateArgs {
    /// Directory of DEM source cells.
    #[arg(long, env = "FLOODMAP_SOURCE_DIR", default_value = "data/elevation-source")]
    pub source_dir: PathBuf,

    /// Pyramid output directory.
    #[arg(long, env = "FLOODMAP_PRECOMPRESSED_DIR", default_value = "data/elevation-tiles")]
    pub output_dir: PathBuf,

    /// Optional bounding box: MIN_LON MIN_LAT MAX_LON MAX_LAT.
    /// Defaults to the union coverage of the source directory.
    #[arg(long, num_args = 4, value_names = ["MIN_LON", "MIN_LAT", "MAX_LON", "MAX_LAT"], allow_hyphen_values = true)]
    pub bbox: Option<Vec<f64>>,

    /// Lowest zoom to generate (inclusive).
    #[arg(long, default_value_t = 8)]
    pub zoom_min: u8,

    /// Highest zoom to generate (inclusive).
    #[arg(long, default_value_t = 11)]
    pub zoom_max: u8,

    /// Variants to write: any of `br`, `gz`, `raw`.
    #[arg(long, value_delimiter = ',', default_value = "br")]
    pub variants: Vec<String>,

    /// Re-write artifacts that already exist.
    #[arg(long, default_value_t = false)]
    pub overwrite: bool,

    /// Refuse to run with fewer source cells than this.
    #[arg(long, default_value_t = 100)]
    pub min_source_cells: usize,

    /// Worker threads for tile generation (defaults to the rayon global
    /// pool size).
    #[arg(long)]
    pub workers: Option<usize>,

    /// Source cells held in RAM while generating.
    #[arg(long, default_value_t = 128)]
    pub source_cache_max: usize,
}

impl GenerateArgs {
    /// Parse the variant tokens into encodings.
    pub fn encodings(&self) -> anyhow::Result<Vec<Encoding>> {
        let mut encodings = Vec::new();
        for token in &self.variants {
            let encoding = match token.as_str() {
                "br" => Encoding::Brotli,
                "gz" => Encoding::Gzip,
                "raw" => Encoding::Identity,
                other => anyhow::bail!("unknown variant '{other}' (expected br, gz, or raw)"),
            };
            if !encodings.contains(&encoding) {
                encodings.push(encoding);
            }
        }
        anyhow::ensure!(!encodings.is_empty(), "at least one variant is required");
        Ok(encodings)
    }

    /// The bbox as a tuple, if supplied.
    pub fn bbox_tuple(&self) -> Option<(f64, f64, f64, f64)> {
        self.bbox
            .as_ref()
            .map(|b| (b[0], b[1], b[2], b[3]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn variant_tokens_parse() {
        let args = GenerateArgs {
            source_dir: PathBuf::new(),
            output_dir: PathBuf::new(),
            bbox: None,
            zoom_min: 8,
            zoom_max: 11,
            variants: vec!["br".into(), "raw".into(), "br".into()],
            overwrite: false,
            min_source_cells: 1,
            workers: None,
            source_cache_max: 16,
        };
        assert_eq!(
            args.encodings().unwrap(),
            vec![Encoding::Brotli, Encoding::Identity]
        );
    }

    #[test]
    fn unknown_variant_is_rejected() {
        let args = GenerateArgs {
            source_dir: PathBuf::new(),
            output_dir: PathBuf::new(),
            bbox: None,
            zoom_min: 8,
            zoom_max: 11,
            variants: vec!["zstd".into()],
            overwrite: false,
            min_source_cells: 1,
            workers: None,
            source_cache_max: 16,
        };
        assert!(args.encodings().is_err());
    }
}
