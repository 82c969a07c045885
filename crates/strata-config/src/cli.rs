//! Command-line argument parsing for the demo.

use std::path::PathBuf;

use clap::Parser;

use crate::Config;

/// Strata demo command-line arguments.
///
/// CLI values override settings loaded from `config.ron`.
#[derive(Parser, Debug, Default)]
#[command(name = "strata-demo", about = "Stream a tileset along a camera flight")]
pub struct CliArgs {
    /// Tileset JSON to stream instead of the synthetic quadtree.
    #[arg(long)]
    pub tileset: Option<PathBuf>,

    /// Number of frames to run.
    #[arg(long)]
    pub frames: Option<u32>,

    /// Maximum screen-space error in pixels.
    #[arg(long)]
    pub max_sse: Option<f64>,

    /// Memory budget in megabytes.
    #[arg(long)]
    pub memory_mb: Option<usize>,

    /// Enable or disable skip level of detail.
    #[arg(long)]
    pub skip_lod: Option<bool>,

    /// Mean simulated fetch latency in milliseconds.
    #[arg(long)]
    pub latency_ms: Option<u64>,

    /// Probability that a simulated fetch fails.
    #[arg(long)]
    pub failure_rate: Option<f64>,

    /// Seed for simulated latency and failures.
    #[arg(long)]
    pub seed: Option<u64>,

    /// Log level (error, warn, info, debug, trace).
    #[arg(long)]
    pub log_level: Option<String>,

    /// Path to config directory (overrides default location).
    #[arg(long)]
    pub config: Option<PathBuf>,
}

impl Config {
    /// Apply CLI overrides to a loaded config.
    pub fn apply_cli_overrides(&mut self, args: &CliArgs) {
        if let Some(ref path) = args.tileset {
            self.stream.tileset_path = Some(path.clone());
        }
        if let Some(frames) = args.frames {
            self.stream.frames = frames;
        }
        if let Some(sse) = args.max_sse {
            self.tileset.maximum_screen_space_error = sse;
        }
        if let Some(mb) = args.memory_mb {
            self.tileset.maximum_memory_usage_mb = mb;
        }
        if let Some(skip) = args.skip_lod {
            self.tileset.skip_level_of_detail = skip;
        }
        if let Some(latency) = args.latency_ms {
            self.stream.latency_ms = latency;
        }
        if let Some(rate) = args.failure_rate {
            self.stream.failure_rate = rate.clamp(0.0, 1.0);
        }
        if let Some(seed) = args.seed {
            self.stream.seed = seed;
        }
        if let Some(ref level) = args.log_level {
            self.debug.log_level = level.clone();
        }
    }
}
