//! Counters aggregated by the tileset.
//!
//! Per-frame counters are cleared at the start of every update; load counters
//! and byte totals persist and track resident content.

use crate::content::TileContent;

#[derive(Clone, Debug, Default, PartialEq)]
pub struct Statistics {
    // Per-frame.
    /// Tiles visited by traversal.
    pub visited: u32,
    /// Tiles selected for rendering.
    pub selected: u32,
    /// Tiles culled because none of their children were visible.
    pub culled_with_children_union: u32,
    /// Requests that could not be issued this frame.
    pub attempted_requests: u32,
    pub features_selected: u64,
    pub points_selected: u64,
    pub triangles_selected: u64,

    // Persistent.
    /// Requests in the fetch stage.
    pub pending_requests: u32,
    /// Requests in the parse stage.
    pub tiles_processing: u32,
    /// Tiles with renderable content resident.
    pub tiles_with_content_ready: u32,
    /// Tiles in the tree, including attached external subtrees.
    pub tiles_total: u32,
    /// Loads completed since the tileset was created.
    pub loaded_tiles_total: u64,
    pub features_loaded: u64,
    pub points_loaded: u64,
    pub triangles_loaded: u64,
    pub geometry_bytes: usize,
    pub texture_bytes: usize,
    pub auxiliary_table_bytes: usize,
}

impl Statistics {
    /// Reset the per-frame counters.
    pub fn clear(&mut self) {
        self.visited = 0;
        self.selected = 0;
        self.culled_with_children_union = 0;
        self.attempted_requests = 0;
        self.features_selected = 0;
        self.points_selected = 0;
        self.triangles_selected = 0;
    }

    pub fn increment_selection_counts(&mut self, content: &dyn TileContent) {
        let counts = content.counts();
        self.features_selected += counts.feature_count;
        self.points_selected += counts.point_count;
        self.triangles_selected += counts.triangle_count;
    }

    pub fn increment_load_counts(&mut self, content: &dyn TileContent) {
        let counts = content.counts();
        let memory = content.memory();
        self.features_loaded += counts.feature_count;
        self.points_loaded += counts.point_count;
        self.triangles_loaded += counts.triangle_count;
        self.geometry_bytes += memory.geometry_bytes;
        self.texture_bytes += memory.texture_bytes;
        self.auxiliary_table_bytes += memory.auxiliary_table_bytes;
    }

    pub fn decrement_load_counts(&mut self, content: &dyn TileContent) {
        let counts = content.counts();
        let memory = content.memory();
        self.features_loaded = self.features_loaded.saturating_sub(counts.feature_count);
        self.points_loaded = self.points_loaded.saturating_sub(counts.point_count);
        self.triangles_loaded = self.triangles_loaded.saturating_sub(counts.triangle_count);
        self.geometry_bytes = self.geometry_bytes.saturating_sub(memory.geometry_bytes);
        self.texture_bytes = self.texture_bytes.saturating_sub(memory.texture_bytes);
        self.auxiliary_table_bytes = self
            .auxiliary_table_bytes
            .saturating_sub(memory.auxiliary_table_bytes);
    }

    /// Sum of geometry, texture and auxiliary table bytes of resident content.
    #[must_use]
    pub fn total_memory_bytes(&self) -> usize {
        self.geometry_bytes + self.texture_bytes + self.auxiliary_table_bytes
    }
}
