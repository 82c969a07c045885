//! Streams a tileset along a camera flight and logs what the tileset does.
//!
//! Configuration is loaded from `config.ron` and can be overridden via CLI
//! flags. Without `--tileset` the demo streams a synthetic quadtree; fetches
//! go through a simulated network with configurable latency and failures.
//!
//! Run with `cargo run -p strata-demo -- --frames 300 --skip-lod true`.

mod content;
mod fetcher;
mod scene;

use std::path::Path;
use std::process::ExitCode;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use clap::Parser;
use strata_config::{CliArgs, Config, default_config_dir};
use strata_tiles::{CameraTracker, Tileset, TilesetDescriptor, TilesetEvent};
use tokio::runtime::Handle;
use tracing::{error, info, warn};

use crate::content::SyntheticFactory;
use crate::fetcher::{SimulatedFetcher, Source};
use crate::scene::FlightPath;

/// Half-width of the synthetic quadtree's ground square.
const QUADTREE_EXTENT: f64 = 4096.0;

/// Event totals over the whole run.
#[derive(Default)]
struct EventCounts {
    loaded: AtomicU64,
    unloaded: AtomicU64,
    failed: AtomicU64,
}

fn main() -> ExitCode {
    let args = CliArgs::parse();

    let config_dir = args.config.clone().unwrap_or_else(default_config_dir);
    let mut config = Config::load_or_create(&config_dir).unwrap_or_else(|e| {
        eprintln!("Failed to load config: {e}, using defaults");
        Config::default()
    });
    config.apply_cli_overrides(&args);

    let log_dir = config_dir.join("logs");
    strata_log::init_logging(Some(&log_dir), cfg!(debug_assertions), Some(&config));

    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(e) => {
            error!("Failed to start runtime: {e}");
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(run(config)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("Demo failed: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(config: Config) -> Result<(), Box<dyn std::error::Error>> {
    let (descriptor, source) = match &config.stream.tileset_path {
        Some(path) => (load_descriptor(path).await?, Source::Filesystem),
        None => (
            scene::quadtree(QUADTREE_EXTENT, config.stream.quadtree_levels),
            Source::Synthetic,
        ),
    };

    let fetcher = Arc::new(SimulatedFetcher::new(Handle::current(), source, &config.stream));
    let mut tileset = Tileset::new(descriptor, config.tileset.clone(), fetcher, Arc::new(SyntheticFactory))?;
    info!(
        tiles = tileset.statistics().tiles_total,
        skip_lod = config.tileset.skip_level_of_detail,
        "Tileset ready"
    );

    let counts = Arc::new(EventCounts::default());
    let listener_counts = Arc::clone(&counts);
    tileset.subscribe(move |event| match event {
        TilesetEvent::TileLoaded(_) => {
            listener_counts.loaded.fetch_add(1, Ordering::Relaxed);
        }
        TilesetEvent::TileUnloaded(_) => {
            listener_counts.unloaded.fetch_add(1, Ordering::Relaxed);
        }
        TilesetEvent::TileFailed { url, message, .. } => {
            listener_counts.failed.fetch_add(1, Ordering::Relaxed);
            warn!(%url, %message, "Tile failed to load");
        }
        TilesetEvent::TileVisible(_) => {}
    });

    let path = FlightPath {
        radius: QUADTREE_EXTENT * 0.5,
        altitude: config.camera.altitude,
        speed: config.camera.speed,
        fov_y: config.camera.fov_y_degrees.to_radians(),
    };
    let mut tracker = CameraTracker::new(config.camera.viewport_height);
    let frame_time = Duration::from_millis(config.stream.frame_time_ms.max(1));
    let mut ticker = tokio::time::interval(frame_time);

    for index in 0..config.stream.frames {
        ticker.tick().await;
        let time = f64::from(index) * frame_time.as_secs_f64();
        let frame = tracker.next_frame(path.camera_at(time), time);
        tileset.update(&frame);

        let interval = config.debug.stats_interval;
        if interval > 0 && frame.frame_number % u64::from(interval) == 0 {
            log_statistics(&tileset, frame.frame_number);
        }
    }

    let summary = serde_json::json!({
        "frames": config.stream.frames,
        "loaded": counts.loaded.load(Ordering::Relaxed),
        "unloaded": counts.unloaded.load(Ordering::Relaxed),
        "failed": counts.failed.load(Ordering::Relaxed),
        "resident_tiles": tileset.cached_tiles(),
        "resident_bytes": tileset.total_memory_bytes(),
    });
    info!("Run complete: {summary}");
    Ok(())
}

async fn load_descriptor(path: &Path) -> Result<TilesetDescriptor, Box<dyn std::error::Error>> {
    let bytes = tokio::fs::read(path).await?;
    let descriptor = TilesetDescriptor::from_json(&bytes, path.to_string_lossy())?;
    info!("Loaded tileset from {}", path.display());
    Ok(descriptor)
}

fn log_statistics(tileset: &Tileset, frame_number: u64) {
    let stats = tileset.statistics();
    info!(
        frame = frame_number,
        visited = stats.visited,
        selected = stats.selected,
        requested = tileset.requested_tiles().len(),
        attempted = stats.attempted_requests,
        pending = stats.pending_requests,
        processing = stats.tiles_processing,
        ready = stats.tiles_with_content_ready,
        triangles = stats.triangles_selected,
        memory_mb = tileset.total_memory_bytes() as f64 / (1024.0 * 1024.0),
        over_budget = tileset.is_over_budget(),
        "Frame statistics"
    );
}
