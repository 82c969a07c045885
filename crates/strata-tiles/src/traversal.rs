//! Per-frame tree walk that decides what to select and what to request.
//!
//! Three modes share one depth-first walk over an explicit stack:
//!
//! - Base traversal: a replacement tile refines only once every child it
//!   needs has content available.
//! - Skip traversal: a coarse base pass keeps fallbacks resident while
//!   deeper tiles that improve enough on their nearest content ancestor load
//!   directly. A second pass with an ancestor stack selects the finest ready
//!   tile per branch, standing in with a ready ancestor where needed.
//! - Immediate traversal: skip without a base pass, falling back to ready
//!   descendants a bounded number of levels down.

use std::cmp::Ordering;

use glam::DMat4;
use strata_bounds::Intersection;

use crate::cache::TileCache;
use crate::frame::FrameState;
use crate::options::TilesetOptions;
use crate::priority::PriorityBounds;
use crate::statistics::Statistics;
use crate::tile::{Refine, TileArena, TileFrameState, TileId, VisibilityContext, update_visibility};

/// Extra levels below a desired tile searched for ready stand-ins.
const DESCENDANT_SELECTION_DEPTH: u32 = 2;

/// Scratch lists produced by one traversal.
#[derive(Debug, Default)]
pub struct Selection {
    /// Tiles to render, in selection order.
    pub selected: Vec<TileId>,
    /// Tiles whose content should be fetched.
    pub requested: Vec<TileId>,
    /// Tiles without renderable content that traversal passed through.
    pub empty: Vec<TileId>,
    /// Some selected tile stands in for unloaded descendants.
    pub has_mixed_content: bool,
}

impl Selection {
    pub fn clear(&mut self) {
        self.selected.clear();
        self.requested.clear();
        self.empty.clear();
        self.has_mixed_content = false;
    }
}

/// Everything a traversal reads and writes, borrowed from the tileset.
pub(crate) struct Traversal<'a> {
    pub tiles: &'a mut TileArena,
    pub cache: &'a mut TileCache,
    pub selection: &'a mut Selection,
    pub bounds: &'a mut PriorityBounds,
    pub statistics: &'a mut Statistics,
    pub frame: &'a FrameState,
    pub options: &'a TilesetOptions,
    pub skip_level_of_detail: bool,
    pub model_matrix: DMat4,
    pub root: TileId,
    /// Visibility is computed at most once per tile per value of this.
    pub visibility_frame: u64,
}

impl Traversal<'_> {
    /// Fill the selection for this frame.
    pub fn select_tiles(&mut self) {
        self.selection.clear();
        let root = self.root;
        self.update_tile(root);

        let maximum = self.options.maximum_screen_space_error;
        let tile = &self.tiles[root];
        if !tile.is_visible() || tile.screen_space_error(self.frame, true, 1.0) <= maximum {
            return;
        }

        if !self.skip_level_of_detail {
            self.execute_traversal(maximum);
        } else if self.options.immediately_load_desired_level_of_detail {
            self.execute_traversal(f64::MAX);
            self.traverse_and_select();
        } else {
            self.execute_traversal(self.options.base_screen_space_error.max(maximum));
            self.traverse_and_select();
        }
    }

    fn execute_traversal(&mut self, base_screen_space_error: f64) {
        let frame_number = self.frame.frame_number;
        let mut stack = vec![self.root];
        while let Some(id) = stack.pop() {
            self.update_tile_ancestor_content_links(id);
            let base_traversal = self.in_base_traversal(id, base_screen_space_error);
            let parent_refines = self.tiles[id]
                .parent
                .is_none_or(|parent| self.tiles[parent].frame.refines);

            let mut refines = false;
            if self.can_traverse(id) {
                refines = self.update_and_push_children(id, &mut stack) && parent_refines;
            }
            let stopped_refining = !refines && parent_refines;

            let tile = &self.tiles[id];
            if tile.has_no_renderable_content() {
                self.selection.empty.push(id);
                self.load_tile(id);
                if stopped_refining {
                    self.select_desired_tile(id);
                }
            } else if tile.refine == Refine::Add {
                self.select_desired_tile(id);
                self.load_tile(id);
            } else if base_traversal {
                self.load_tile(id);
                if stopped_refining {
                    self.select_desired_tile(id);
                }
            } else if stopped_refining {
                self.select_desired_tile(id);
                self.load_tile(id);
            } else if reached_skipping_threshold(self.tiles, id, self.options) {
                self.load_tile(id);
            }

            self.statistics.visited += 1;
            self.tiles[id].frame.visited_frame = frame_number;
            self.touch_tile(id);
            self.tiles[id].frame.refines = refines;
        }
    }

    /// Update the children of `id`, push the visible ones farthest first and
    /// report whether `id` may refine to them.
    fn update_and_push_children(&mut self, id: TileId, stack: &mut Vec<TileId>) -> bool {
        let children = self.tiles[id].children.clone();
        for &child in &children {
            self.update_tile(child);
        }
        self.sort_children_farthest_first(id);
        let children = self.tiles[id].children.clone();

        let tile = &self.tiles[id];
        let replace = tile.refine == Refine::Replace;
        let check_refines = !self.skip_level_of_detail && replace && !tile.has_no_renderable_content();

        let mut refines = true;
        let mut any_children_visible = false;
        let mut min_priority_child = None;
        let mut minimum_priority = f64::MAX;

        for &child in &children {
            let child_tile = &self.tiles[child];
            let foveated_factor = child_tile.frame.foveated_factor;
            if child_tile.is_visible() {
                stack.push(child);
                if foveated_factor < minimum_priority {
                    min_priority_child = Some(child);
                    minimum_priority = foveated_factor;
                }
                any_children_visible = true;
            } else if check_refines || self.options.load_siblings {
                // Out-of-view children are still needed before the parent can refine.
                if foveated_factor < minimum_priority {
                    min_priority_child = Some(child);
                    minimum_priority = foveated_factor;
                }
                self.load_tile(child);
                self.touch_tile(child);
            }

            if check_refines {
                let child_tile = &self.tiles[child];
                let child_refines = if !child_tile.frame.in_request_volume {
                    false
                } else if child_tile.has_no_renderable_content() {
                    self.execute_empty_traversal(child)
                } else {
                    child_tile.content_available()
                };
                refines = refines && child_refines;
            }
        }

        if !any_children_visible {
            refines = false;
        }

        if let Some(min_child) = min_priority_child
            && !self.skip_level_of_detail
            && replace
        {
            self.share_priority_holder(id, min_child, minimum_priority, &children);
        }
        refines
    }

    /// Chain the children of `id` to a common priority holder so a branch
    /// sorts together in the request queue.
    fn share_priority_holder(&mut self, id: TileId, min_child: TileId, minimum_priority: f64, children: &[TileId]) {
        self.tiles[min_child].frame.was_min_priority_child = true;
        let tile = &self.tiles[id];
        let current_holder = tile.frame.priority_holder;
        let extends_chain = (tile.frame.was_min_priority_child || id == self.root)
            && minimum_priority <= self.tiles[current_holder].frame.foveated_factor;
        let holder = if extends_chain { current_holder } else { id };

        let min_frame = self.tiles[min_child].frame;
        let holder_frame = &mut self.tiles[holder].frame;
        holder_frame.foveated_factor = holder_frame.foveated_factor.min(min_frame.foveated_factor);
        holder_frame.distance_to_camera = holder_frame.distance_to_camera.min(min_frame.distance_to_camera);
        for &child in children {
            self.tiles[child].frame.priority_holder = holder;
        }
    }

    fn sort_children_farthest_first(&mut self, id: TileId) {
        let mut children = std::mem::take(&mut self.tiles[id].children);
        children.sort_by(|&a, &b| farthest_first(&self.tiles[a].frame, &self.tiles[b].frame));
        self.tiles[id].children = children;
    }

    /// Whether every nearest descendant with content under the empty tile
    /// `id` is available. Visibility is ignored.
    fn execute_empty_traversal(&mut self, id: TileId) -> bool {
        let mut all_descendants_loaded = true;
        let mut stack = vec![id];
        while let Some(tile_id) = stack.pop() {
            let tile = &self.tiles[tile_id];
            let empty = tile.has_no_renderable_content();
            let traverse = empty && self.can_traverse(tile_id);
            let empty_leaf = empty && tile.children.is_empty();

            // A descendant that stops the walk without content would leave a hole.
            if !traverse && !tile.content_available() && !empty_leaf {
                all_descendants_loaded = false;
            }

            self.update_tile(tile_id);
            if !self.tiles[tile_id].is_visible() {
                self.load_tile(tile_id);
                self.touch_tile(tile_id);
            }

            if traverse {
                stack.extend(self.tiles[tile_id].children.iter().copied());
            }
        }
        all_descendants_loaded
    }

    /// Select tiles bottom-up using the `should_select` marks from the first
    /// pass. A marked replacement tile waits on the ancestor stack until its
    /// subtree is done; it is final only if nothing below it was selected.
    fn traverse_and_select(&mut self) {
        let mut stack = vec![self.root];
        let mut ancestor_stack: Vec<TileId> = Vec::new();
        let mut last_ancestor = None;

        while !stack.is_empty() || !ancestor_stack.is_empty() {
            if let Some(&waiting) = ancestor_stack.last()
                && self.tiles[waiting].frame.stack_length == stack.len()
            {
                ancestor_stack.pop();
                if Some(waiting) != last_ancestor {
                    self.tiles[waiting].frame.final_resolution = false;
                }
                self.select_tile(waiting);
                continue;
            }

            let Some(id) = stack.pop() else {
                continue;
            };

            let traverse = self.can_traverse(id);
            let tile = &self.tiles[id];
            if tile.frame.should_select {
                if tile.refine == Refine::Add {
                    self.select_tile(id);
                } else {
                    let depth = ancestor_stack.len() as u32;
                    self.tiles[id].frame.selection_depth = depth;
                    if depth > 0 {
                        self.selection.has_mixed_content = true;
                    }
                    last_ancestor = Some(id);
                    if !traverse {
                        self.select_tile(id);
                        continue;
                    }
                    ancestor_stack.push(id);
                    self.tiles[id].frame.stack_length = stack.len();
                }
            }

            if traverse {
                for &child in &self.tiles[id].children {
                    if self.tiles[child].is_visible() {
                        stack.push(child);
                    }
                }
            }
        }
    }

    fn select_desired_tile(&mut self, id: TileId) {
        let tile = &self.tiles[id];
        if !self.skip_level_of_detail {
            if tile.content_available() {
                self.select_tile(id);
            }
            return;
        }

        let loaded = if tile.content_available() {
            Some(id)
        } else {
            tile.frame.ancestor_with_content_available
        };
        match loaded {
            // Selected later by traverse_and_select.
            Some(loaded) => self.tiles[loaded].frame.should_select = true,
            None => self.select_descendants(id),
        }
    }

    /// Select ready descendants of `root` up to a fixed depth below it.
    fn select_descendants(&mut self, root: TileId) {
        let root_depth = self.tiles[root].depth;
        let mut stack = vec![root];
        while let Some(id) = stack.pop() {
            let children = self.tiles[id].children.clone();
            for child in children {
                let child_tile = &self.tiles[child];
                if !child_tile.is_visible() {
                    continue;
                }
                if child_tile.content_available() {
                    self.update_tile(child);
                    self.touch_tile(child);
                    self.select_tile(child);
                } else if child_tile.depth - root_depth < DESCENDANT_SELECTION_DEPTH {
                    stack.push(child);
                }
            }
        }
    }

    fn select_tile(&mut self, id: TileId) {
        let tile = &self.tiles[id];
        if tile.content_visibility(self.frame) == Intersection::Outside {
            return;
        }
        self.tiles[id].frame.selected_frame = self.frame.frame_number;
        self.selection.selected.push(id);
    }

    fn update_tile(&mut self, id: TileId) {
        self.update_tile_visibility(id);
        let tile = &mut self.tiles[id];
        tile.update_expiration(self.frame.time);

        tile.frame.was_min_priority_child = false;
        tile.frame.priority_holder = id;
        let sample = tile.priority_sample(&tile.frame);
        self.bounds.include(&sample);

        tile.frame.should_select = false;
        tile.frame.final_resolution = true;
    }

    fn refresh_visibility(&mut self, id: TileId) {
        if self.tiles[id].frame.updated_visibility_frame == self.visibility_frame {
            return;
        }
        let context = VisibilityContext {
            frame: self.frame,
            options: self.options,
            skip_level_of_detail: self.skip_level_of_detail,
            model_matrix: self.model_matrix,
            root: self.root,
        };
        update_visibility(self.tiles, id, &context);
        self.tiles[id].frame.updated_visibility_frame = self.visibility_frame;
    }

    fn update_tile_visibility(&mut self, id: TileId) {
        self.refresh_visibility(id);
        let tile = &self.tiles[id];
        if !tile.is_visible() {
            return;
        }

        // An external tileset tile takes the visibility of the subtree it links to.
        if tile.has_tileset_content
            && let Some(&child) = tile.children.first()
        {
            self.update_tile_visibility(child);
            self.tiles[id].frame.visible = self.tiles[child].frame.visible;
            return;
        }

        if self.meets_screen_space_error_early(id) {
            self.tiles[id].frame.visible = false;
            return;
        }

        let tile = &self.tiles[id];
        let use_children_bounds = self.options.cull_with_children_bounds
            && tile.refine == Refine::Replace
            && tile.children_within_parent
            && !tile.children.is_empty();
        if use_children_bounds {
            let children = tile.children.clone();
            let mut any_visible = false;
            for child in children {
                self.refresh_visibility(child);
                any_visible |= self.tiles[child].is_visible();
            }
            if !any_visible {
                self.statistics.culled_with_children_union += 1;
                self.tiles[id].frame.visible = false;
            }
        }
    }

    /// A child of an additive parent that already meets the error budget
    /// with the parent's error needs no content of its own.
    fn meets_screen_space_error_early(&self, id: TileId) -> bool {
        let tile = &self.tiles[id];
        let Some(parent) = tile.parent else {
            return false;
        };
        let parent = &self.tiles[parent];
        if parent.has_tileset_content || parent.refine != Refine::Add {
            return false;
        }
        tile.screen_space_error(self.frame, true, 1.0) <= self.options.maximum_screen_space_error
    }

    fn update_tile_ancestor_content_links(&mut self, id: TileId) {
        let frame_number = self.frame.frame_number;
        let links = self.tiles[id].parent.map(|parent_id| {
            let parent = &self.tiles[parent_id];
            let has_content = !parent.has_unloaded_content() || parent.frame.requested_frame == frame_number;
            let with_content = if has_content {
                Some(parent_id)
            } else {
                parent.frame.ancestor_with_content
            };
            let with_content_available = if parent.content_available() {
                Some(parent_id)
            } else {
                parent.frame.ancestor_with_content_available
            };
            (with_content, with_content_available)
        });
        let (with_content, with_content_available) = links.unwrap_or((None, None));
        let frame = &mut self.tiles[id].frame;
        frame.ancestor_with_content = with_content;
        frame.ancestor_with_content_available = with_content_available;
    }

    fn in_base_traversal(&self, id: TileId, base_screen_space_error: f64) -> bool {
        if !self.skip_level_of_detail {
            return true;
        }
        if self.options.immediately_load_desired_level_of_detail {
            return false;
        }
        let tile = &self.tiles[id];
        if tile.frame.ancestor_with_content.is_none() {
            // Near-root tiles always load so there is something to fall back to.
            return true;
        }
        if tile.frame.screen_space_error == 0.0 {
            return tile
                .parent
                .is_some_and(|parent| self.tiles[parent].frame.screen_space_error > base_screen_space_error);
        }
        tile.frame.screen_space_error > base_screen_space_error
    }

    fn can_traverse(&self, id: TileId) -> bool {
        let tile = &self.tiles[id];
        if tile.children.is_empty() {
            return false;
        }
        if tile.has_tileset_content {
            return !tile.content_expired();
        }
        tile.frame.screen_space_error > self.options.maximum_screen_space_error
    }

    fn load_tile(&mut self, id: TileId) {
        let frame_number = self.frame.frame_number;
        let tile = &self.tiles[id];
        if tile.frame.requested_frame == frame_number || (!tile.has_unloaded_content() && !tile.content_expired()) {
            return;
        }
        if !self.is_on_screen_long_enough(id) {
            return;
        }
        let camera_settling = self.frame.time_since_camera_moved < self.options.foveated_time_delay;
        if tile.frame.priority_deferred && camera_settling {
            return;
        }
        self.tiles[id].frame.requested_frame = frame_number;
        self.selection.requested.push(id);
    }

    /// Compare a few frames of camera travel to the tile's size.
    fn is_on_screen_long_enough(&self, id: TileId) -> bool {
        if !self.options.cull_requests_while_moving {
            return true;
        }
        let sphere = self.tiles[id].bounding_volume.bounding_sphere();
        let diameter = (sphere.radius * 2.0).max(1.0);
        let delta = if self.frame.camera_delta_magnitude != 0.0 {
            self.frame.camera_delta_magnitude
        } else {
            self.frame.camera_delta_magnitude_last_frame
        };
        let movement_ratio = self.options.cull_requests_while_moving_multiplier * delta / diameter;
        movement_ratio < 1.0
    }

    fn touch_tile(&mut self, id: TileId) {
        let frame_number = self.frame.frame_number;
        let tile = &mut self.tiles[id];
        if tile.frame.touched_frame == frame_number {
            return;
        }
        if let Some(node) = tile.cache_node {
            self.cache.touch(node);
        }
        tile.frame.touched_frame = frame_number;
    }
}

/// Skip traversal loads a tile on its own only once it improves on its
/// nearest content ancestor by the skip factor and sits enough levels below
/// it, or when it is a progressive-resolution leaf.
pub(crate) fn reached_skipping_threshold(tiles: &TileArena, id: TileId, options: &TilesetOptions) -> bool {
    if options.immediately_load_desired_level_of_detail {
        return false;
    }
    let tile = &tiles[id];
    if tile.frame.progressive_resolution_leaf {
        return true;
    }
    tile.frame.ancestor_with_content.is_some_and(|ancestor| {
        let ancestor = &tiles[ancestor];
        tile.frame.screen_space_error
            < ancestor.frame.screen_space_error / options.skip_screen_space_error_factor
            && tile.depth > ancestor.depth + options.skip_levels
    })
}

fn farthest_first(a: &TileFrameState, b: &TileFrameState) -> Ordering {
    if a.distance_to_camera == 0.0 && b.distance_to_camera == 0.0 {
        return b.center_z_depth.total_cmp(&a.center_z_depth);
    }
    b.distance_to_camera.total_cmp(&a.distance_to_camera)
}
