//! Configuration structs with defaults and RON persistence.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use strata_tiles::TilesetOptions;

use crate::error::ConfigError;

const CONFIG_FILE: &str = "config.ron";

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    /// Traversal, request and cache knobs handed to the tileset.
    pub tileset: TilesetOptions,
    /// Simulated network and frame loop.
    pub stream: StreamConfig,
    pub camera: CameraConfig,
    pub debug: DebugConfig,
}

/// Simulated streaming conditions for the demo run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct StreamConfig {
    /// Mean fetch latency in milliseconds.
    pub latency_ms: u64,
    /// Random extra latency, up to this many milliseconds.
    pub latency_jitter_ms: u64,
    /// Probability in `[0, 1]` that a fetch fails.
    pub failure_rate: f64,
    /// Number of frames to run.
    pub frames: u32,
    /// Wall-clock time per frame in milliseconds.
    pub frame_time_ms: u64,
    /// Seed for latency and failure sampling.
    pub seed: u64,
    /// Levels below the root of the synthetic quadtree.
    pub quadtree_levels: u32,
    /// Tileset JSON to stream instead of the synthetic quadtree.
    pub tileset_path: Option<PathBuf>,
}

/// Viewer settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CameraConfig {
    /// Drawing buffer height in pixels.
    pub viewport_height: f64,
    /// Vertical field of view in degrees.
    pub fov_y_degrees: f64,
    /// Flight altitude above the ground plane.
    pub altitude: f64,
    /// Flight speed in units per second.
    pub speed: f64,
}

/// Debug/development configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DebugConfig {
    /// Log level override (e.g., "debug", "info", "warn").
    pub log_level: String,
    /// Log statistics every this many frames. Zero disables the report.
    pub stats_interval: u32,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            latency_ms: 40,
            latency_jitter_ms: 40,
            failure_rate: 0.0,
            frames: 600,
            frame_time_ms: 16,
            seed: 7,
            quadtree_levels: 6,
            tileset_path: None,
        }
    }
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            viewport_height: 1080.0,
            fov_y_degrees: 60.0,
            altitude: 400.0,
            speed: 600.0,
        }
    }
}

impl Default for DebugConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            stats_interval: 60,
        }
    }
}

/// Platform config directory for Strata, or the working directory when the
/// platform has none.
pub fn default_config_dir() -> PathBuf {
    dirs::config_dir()
        .map(|dir| dir.join("strata"))
        .unwrap_or_else(|| PathBuf::from("."))
}

impl Config {
    /// Load config from the given directory, or create a default config file.
    pub fn load_or_create(config_dir: &Path) -> Result<Self, ConfigError> {
        let config_path = config_dir.join(CONFIG_FILE);

        if config_path.exists() {
            let config = Self::read(&config_path)?;
            log::info!("Loaded config from {}", config_path.display());
            Ok(config)
        } else {
            let config = Config::default();
            config.save(config_dir)?;
            log::info!("Created default config at {}", config_path.display());
            Ok(config)
        }
    }

    /// Save config to the given directory as `config.ron`.
    pub fn save(&self, config_dir: &Path) -> Result<(), ConfigError> {
        std::fs::create_dir_all(config_dir).map_err(ConfigError::WriteError)?;

        let pretty = ron::ser::PrettyConfig::new()
            .depth_limit(3)
            .separate_tuple_members(true)
            .enumerate_arrays(false);
        let serialized =
            ron::ser::to_string_pretty(self, pretty).map_err(ConfigError::SerializeError)?;

        std::fs::write(config_dir.join(CONFIG_FILE), serialized).map_err(ConfigError::WriteError)
    }

    /// Re-read the file. Returns `Some(new_config)` if it differs from `self`.
    pub fn reload(&self, config_dir: &Path) -> Result<Option<Self>, ConfigError> {
        let new_config = Self::read(&config_dir.join(CONFIG_FILE))?;
        if &new_config != self {
            log::info!("Config reloaded with changes");
            Ok(Some(new_config))
        } else {
            Ok(None)
        }
    }

    fn read(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(ConfigError::ReadError)?;
        ron::from_str(&contents).map_err(ConfigError::ParseError)
    }
}
