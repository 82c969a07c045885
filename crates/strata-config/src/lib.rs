//! Configuration for the Strata streaming demo.
//!
//! Settings persist to disk as RON and can be overridden from the command
//! line. Unknown fields are ignored and missing ones take their defaults, so
//! files written by older or newer builds keep loading.

mod cli;
mod config;
mod error;

pub use cli::CliArgs;
pub use config::{CameraConfig, Config, DebugConfig, StreamConfig, default_config_dir};
pub use error::ConfigError;
