//! Tileset tuning knobs.

use serde::{Deserialize, Serialize};

/// Options controlling traversal, request scheduling and caching.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TilesetOptions {
    /// Pixel error above which a tile refines to its children.
    pub maximum_screen_space_error: f64,
    /// Memory budget for resident content, in megabytes.
    pub maximum_memory_usage_mb: usize,
    /// Upper bound on requests in the fetch stage at once.
    pub maximum_simultaneous_requests: usize,

    /// Render coarse ancestors and fine descendants together while loading.
    pub skip_level_of_detail: bool,
    /// Coarse pixel error loaded first during skip traversal.
    pub base_screen_space_error: f64,
    /// A descendant must improve on its nearest content ancestor by this
    /// factor before it is loaded independently.
    pub skip_screen_space_error_factor: f64,
    /// Minimum tree levels between a content ancestor and a skipped-to tile.
    pub skip_levels: u32,
    /// Load only the desired level of detail, skipping intermediate levels.
    pub immediately_load_desired_level_of_detail: bool,
    /// Load siblings of visible tiles even when they are out of view.
    pub load_siblings: bool,

    /// Cull replacement tiles whose children are all out of view.
    pub cull_with_children_bounds: bool,
    /// Skip requests for tiles the camera is moving past quickly.
    pub cull_requests_while_moving: bool,
    /// Frames of camera movement compared against a tile's size.
    pub cull_requests_while_moving_multiplier: f64,

    /// Fraction of the viewport height used for the progressive-resolution
    /// pass. Values outside `(0, 0.5]` disable it.
    pub progressive_resolution_height_fraction: f64,

    /// Defer loading of tiles far from the center of view.
    pub foveated_screen_space_error: bool,
    /// Size of the undeferred cone around the view direction, in `[0, 1]`.
    pub foveated_cone_size: f64,
    /// Pixel error relaxation at the edge of the cone.
    pub foveated_minimum_screen_space_error_relaxation: f64,
    /// Seconds the camera must be still before deferred tiles load.
    pub foveated_time_delay: f64,

    /// Load leaves before their ancestors.
    pub prefer_leaves: bool,
}

impl Default for TilesetOptions {
    fn default() -> Self {
        Self {
            maximum_screen_space_error: 16.0,
            maximum_memory_usage_mb: 512,
            maximum_simultaneous_requests: 50,
            skip_level_of_detail: false,
            base_screen_space_error: 1024.0,
            skip_screen_space_error_factor: 16.0,
            skip_levels: 1,
            immediately_load_desired_level_of_detail: false,
            load_siblings: false,
            cull_with_children_bounds: true,
            cull_requests_while_moving: true,
            cull_requests_while_moving_multiplier: 60.0,
            progressive_resolution_height_fraction: 0.3,
            foveated_screen_space_error: true,
            foveated_cone_size: 0.1,
            foveated_minimum_screen_space_error_relaxation: 0.0,
            foveated_time_delay: 0.2,
            prefer_leaves: false,
        }
    }
}

impl TilesetOptions {
    /// Memory budget in bytes.
    #[must_use]
    pub fn maximum_memory_usage_bytes(&self) -> usize {
        self.maximum_memory_usage_mb.saturating_mul(1024 * 1024)
    }
}
