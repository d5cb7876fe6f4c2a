//! FloodMap tile server binary.
//!
//! Two subcommands share one binary so the offline generator and the
//! runtime path can never drift apart:
//!
//! - `serve` — run the HTTP tile server.
//! - `generate` — materialize the precompressed `.u16` pyramid.

use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use metrics_exporter_prometheus::PrometheusBuilder;
use tracing::info;
use tracing_subscriber::EnvFilter;

use floodmap_dem::{ElevationLoader, SourceStore};
use floodmap_engine::TileEngine;
use floodmap_store::{GeneratorConfig, PrecompressedStore, PyramidGenerator};

use floodmap_server::config::{GenerateArgs, ServeArgs};
use floodmap_server::routes::{self, AppState};

#[derive(Parser, Debug)]
#[command(name = "floodmap-server", version, about = "Elevation tile server for flood-risk maps")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the HTTP tile server.
    Serve(ServeArgs),
    /// Generate the precompressed elevation tile pyramid.
    Generate(GenerateArgs),
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    match cli.command {
        Command::Serve(args) => serve(args),
        Command::Generate(args) => generate(args),
    }
}

fn serve(args: ServeArgs) -> anyhow::Result<()> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("building tokio runtime")?;
    runtime.block_on(serve_async(args))
}

async fn serve_async(args: ServeArgs) -> anyhow::Result<()> {
    anyhow::ensure!(
        args.source_dir.exists(),
        "source directory {} does not exist",
        args.source_dir.display()
    );

    let store = Arc::new(SourceStore::new(&args.source_dir, args.source_cache_max));
    let cells = store.cell_count().context("scanning source directory")?;
    info!(
        source = %args.source_dir.display(),
        cells,
        "elevation source ready"
    );

    let loader = Arc::new(ElevationLoader::new(store));
    let precompressed = Arc::new(PrecompressedStore::new(&args.precompressed_dir));
    let engine = Arc::new(TileEngine::new(loader, precompressed, args.engine_config()));

    let prometheus = PrometheusBuilder::new()
        .install_recorder()
        .context("installing metrics recorder")?;

    let app = routes::router(AppState {
        engine,
        prometheus: Some(prometheus),
    });

    let listener = tokio::net::TcpListener::bind(&args.bind)
        .await
        .with_context(|| format!("binding {}", args.bind))?;
    info!(bind = %args.bind, max_zoom = args.max_zoom, "listening");
    axum::serve(listener, app).await.context("server loop")?;
    Ok(())
}

fn generate(args: GenerateArgs) -> anyhow::Result<()> {
    if let Some(workers) = args.workers {
        rayon::ThreadPoolBuilder::new()
            .num_threads(workers)
            .build_global()
            .context("configuring worker pool")?;
    }

    let store = Arc::new(SourceStore::new(&args.source_dir, args.source_cache_max));
    let loader = ElevationLoader::new(store);
    let generator = PyramidGenerator::new(
        loader,
        GeneratorConfig {
            output_dir: args.output_dir.clone(),
            bbox: args.bbox_tuple(),
            zoom_min: args.zoom_min,
            zoom_max: args.zoom_max,
            variants: args.encodings()?,
            overwrite: args.overwrite,
            min_source_cells: args.min_source_cells,
        },
    );

    let summary = generator.run().context("pyramid generation")?;
    info!(
        tiles_written = summary.manifest.tiles_written,
        tiles_skipped_nodata = summary.manifest.tiles_skipped_nodata,
        output = %args.output_dir.display(),
        "pyramid generation complete"
    );
    Ok(())
}
