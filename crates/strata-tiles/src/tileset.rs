//! Per-frame orchestration of a tile tree.
//!
//! [`Tileset::update`] runs once per rendered frame:
//!
//! 1. poll in-flight requests and absorb finished content
//! 2. decide whether skip level of detail is usable
//! 3. evict untouched tiles while over budget, then reset the cache partition
//! 4. reset per-frame counters and priority ranges
//! 5. traverse
//! 6. prioritize and issue requests
//! 7. update selected content
//! 8. cancel fetches for tiles that left view
//! 9. hide tiles that dropped out of the selection and show the rest

use std::sync::Arc;

use glam::DMat4;
use rustc_hash::FxHashSet;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::cache::TileCache;
use crate::content::{ContentFactory, ContentUpdateContext, LoadedContent};
use crate::error::TilesetError;
use crate::events::{TilesetEvent, TilesetEvents};
use crate::frame::FrameState;
use crate::options::TilesetOptions;
use crate::priority::{PriorityBounds, compute_priority};
use crate::request::{ByteFetcher, ContentRequest, RequestProgress};
use crate::statistics::Statistics;
use crate::tile::{ContentState, Refine, SubtreeParent, Tile, TileArena, TileHeader, TileId};
use crate::traversal::{Selection, Traversal};

/// A parsed tileset document.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TilesetDescriptor {
    /// Error of the whole tileset, used as the root's parent error.
    pub geometric_error: f64,
    pub root: TileHeader,
    /// URL of the document; content URIs resolve against it.
    #[serde(skip)]
    pub base_url: String,
}

impl TilesetDescriptor {
    pub fn new(geometric_error: f64, root: TileHeader) -> Self {
        Self {
            geometric_error,
            root,
            base_url: String::new(),
        }
    }

    /// Parse a JSON tileset document fetched from `base_url`.
    pub fn from_json(bytes: &[u8], base_url: impl Into<String>) -> Result<Self, TilesetError> {
        let mut descriptor: Self =
            serde_json::from_slice(bytes).map_err(|err| TilesetError::Document(err.to_string()))?;
        descriptor.base_url = base_url.into();
        Ok(descriptor)
    }
}

/// A streamed tile tree and everything needed to drive it frame by frame.
pub struct Tileset {
    tiles: TileArena,
    root: TileId,
    options: TilesetOptions,
    fetcher: Arc<dyn ByteFetcher>,
    factory: Arc<dyn ContentFactory>,

    cache: TileCache,
    selection: Selection,
    previous_selected: Vec<TileId>,
    priority_bounds: PriorityBounds,
    statistics: Statistics,
    events: TilesetEvents,
    /// Tiles with an outstanding request, in issue order.
    in_flight: Vec<TileId>,

    model_matrix: DMat4,
    last_model_matrix: DMat4,
    visibility_frame: u64,
    /// Set once content that cannot be mixed with stand-ins has loaded.
    skip_disabled_by_content: bool,
    all_tiles_additive: bool,
    skip_level_of_detail: bool,
}

impl Tileset {
    pub fn new(
        descriptor: TilesetDescriptor,
        options: TilesetOptions,
        fetcher: Arc<dyn ByteFetcher>,
        factory: Arc<dyn ContentFactory>,
    ) -> Result<Self, TilesetError> {
        if !descriptor.geometric_error.is_finite() || descriptor.geometric_error < 0.0 {
            return Err(TilesetError::InvalidGeometricError(descriptor.geometric_error));
        }
        let mut tiles = TileArena::default();
        let root = tiles.build_subtree(
            &descriptor.root,
            SubtreeParent {
                id: None,
                transform: DMat4::IDENTITY,
                geometric_error: descriptor.geometric_error,
                refine: Refine::Replace,
                depth: 0,
            },
            &descriptor.base_url,
        )?;
        debug!(tiles = tiles.len(), url = descriptor.base_url.as_str(), "tileset built");

        let mut tileset = Self {
            tiles,
            root,
            options,
            fetcher,
            factory,
            cache: TileCache::new(),
            selection: Selection::default(),
            previous_selected: Vec::new(),
            priority_bounds: PriorityBounds::default(),
            statistics: Statistics::default(),
            events: TilesetEvents::new(),
            in_flight: Vec::new(),
            model_matrix: DMat4::IDENTITY,
            last_model_matrix: DMat4::IDENTITY,
            visibility_frame: 0,
            skip_disabled_by_content: false,
            all_tiles_additive: false,
            skip_level_of_detail: false,
        };
        tileset.tree_changed();
        Ok(tileset)
    }

    pub fn root(&self) -> TileId {
        self.root
    }

    pub fn tile(&self, id: TileId) -> &Tile {
        &self.tiles[id]
    }

    pub fn tiles(&self) -> &TileArena {
        &self.tiles
    }

    pub fn options(&self) -> &TilesetOptions {
        &self.options
    }

    pub fn set_options(&mut self, options: TilesetOptions) {
        self.options = options;
    }

    pub fn statistics(&self) -> &Statistics {
        &self.statistics
    }

    /// Tiles selected by the last update, in selection order.
    pub fn selected_tiles(&self) -> &[TileId] {
        &self.selection.selected
    }

    /// Tiles requested by the last update, most urgent first.
    pub fn requested_tiles(&self) -> &[TileId] {
        &self.selection.requested
    }

    /// Tiles without renderable content reached by the last update.
    pub fn empty_tiles(&self) -> &[TileId] {
        &self.selection.empty
    }

    /// Whether the last selection mixes stand-in ancestors with descendants.
    pub fn has_mixed_content(&self) -> bool {
        self.selection.has_mixed_content
    }

    /// Whether the last update ran skip traversal.
    pub fn skip_level_of_detail_active(&self) -> bool {
        self.skip_level_of_detail
    }

    /// Number of tiles with resident content.
    pub fn cached_tiles(&self) -> usize {
        self.cache.len()
    }

    #[must_use]
    pub fn total_memory_bytes(&self) -> usize {
        self.statistics.total_memory_bytes()
    }

    #[must_use]
    pub fn is_over_budget(&self) -> bool {
        self.total_memory_bytes() > self.options.maximum_memory_usage_bytes()
    }

    /// No requests are waiting on bytes or on parsing.
    pub fn tiles_loaded(&self) -> bool {
        self.in_flight.is_empty()
    }

    pub fn model_matrix(&self) -> &DMat4 {
        &self.model_matrix
    }

    /// Place the whole tree. Selected content is updated on the next frame.
    pub fn set_model_matrix(&mut self, model_matrix: DMat4) {
        self.model_matrix = model_matrix;
    }

    pub fn subscribe(&mut self, listener: impl FnMut(&TilesetEvent) + Send + 'static) {
        self.events.subscribe(listener);
    }

    /// Evict every tile not used since the last cache reset on the next
    /// update, regardless of the memory budget.
    pub fn trim_loaded_tiles(&mut self) {
        self.cache.trim();
    }

    /// Advance one frame.
    pub fn update(&mut self, frame: &FrameState) {
        self.process_requests(frame.time);

        self.skip_level_of_detail = self.options.skip_level_of_detail
            && !self.skip_disabled_by_content
            && !self.all_tiles_additive;

        self.unload_tiles();
        if frame.camera_changed {
            self.cache.reset();
        }

        self.statistics.clear();
        self.priority_bounds.reset();
        let transform_changed = self.model_matrix != self.last_model_matrix;
        self.last_model_matrix = self.model_matrix;
        self.visibility_frame += 1;

        Traversal {
            tiles: &mut self.tiles,
            cache: &mut self.cache,
            selection: &mut self.selection,
            bounds: &mut self.priority_bounds,
            statistics: &mut self.statistics,
            frame,
            options: &self.options,
            skip_level_of_detail: self.skip_level_of_detail,
            model_matrix: self.model_matrix,
            root: self.root,
            visibility_frame: self.visibility_frame,
        }
        .select_tiles();

        self.request_tiles();
        self.update_selected_content(frame, transform_changed);
        self.cancel_out_of_view_requests(frame);
        self.show_and_hide();

        trace!(
            frame = frame.frame_number,
            visited = self.statistics.visited,
            selected = self.statistics.selected,
            requested = self.selection.requested.len(),
            pending = self.statistics.pending_requests,
            processing = self.statistics.tiles_processing,
            memory = self.statistics.total_memory_bytes(),
            "tileset updated"
        );
    }

    fn tree_changed(&mut self) {
        self.all_tiles_additive = self.tiles.iter().all(|tile| tile.refine == Refine::Add);
        self.statistics.tiles_total = self.tiles.len() as u32;
    }

    fn unload_tiles(&mut self) {
        let limit = self.options.maximum_memory_usage_bytes();
        let over_budget = self.statistics.total_memory_bytes() > limit;
        let Self {
            cache,
            tiles,
            statistics,
            events,
            ..
        } = self;
        let mut parsing = Vec::new();
        cache.unload_tiles(over_budget, |id| {
            if !unload_tile(tiles, statistics, events, id) {
                parsing.push(id);
            }
            statistics.total_memory_bytes() > limit
        });
        // A parse cannot be interrupted; such tiles stay resident until it ends.
        for id in parsing {
            tiles[id].cache_node = Some(cache.add(id));
        }
    }

    fn request_tiles(&mut self) {
        let mut requested = std::mem::take(&mut self.selection.requested);
        for &id in &requested {
            let tile = &self.tiles[id];
            let holder = &self.tiles[tile.frame.priority_holder].frame;
            let use_distance = !self.skip_level_of_detail && tile.refine == Refine::Replace;
            let priority = compute_priority(
                &tile.priority_sample(holder),
                &self.priority_bounds,
                use_distance,
                self.options.prefer_leaves,
            );
            self.tiles[id].frame.priority = priority;
        }
        requested.sort_by(|&a, &b| self.tiles[a].frame.priority.total_cmp(&self.tiles[b].frame.priority));

        for &id in &requested {
            self.request_content(id);
        }
        self.selection.requested = requested;
    }

    /// Start fetching a tile's content. A tile already loading is left alone;
    /// a full request budget is counted as an attempted request.
    fn request_content(&mut self, id: TileId) {
        let tile = &self.tiles[id];
        if tile.has_no_renderable_content() || tile.request.is_some() {
            return;
        }
        let Some(url) = tile.content_url.as_deref() else {
            return;
        };
        if self.statistics.pending_requests as usize >= self.options.maximum_simultaneous_requests {
            self.statistics.attempted_requests += 1;
            return;
        }

        let request = ContentRequest::start(self.fetcher.as_ref(), url, tile.frame.priority);
        let tile = &mut self.tiles[id];
        if tile.state == ContentState::Expired {
            if let Some(expired) = tile.expired_content.as_deref() {
                self.statistics.decrement_load_counts(expired);
            }
            self.statistics.tiles_with_content_ready = self.statistics.tiles_with_content_ready.saturating_sub(1);
        }
        tile.state_before_request = tile.state;
        tile.state = ContentState::Loading;
        tile.request = Some(request);
        self.statistics.pending_requests += 1;
        self.in_flight.push(id);
    }

    fn process_requests(&mut self, time: f64) {
        for id in std::mem::take(&mut self.in_flight) {
            if self.poll_request(id, time) {
                self.in_flight.push(id);
            }
        }
    }

    /// Drive one request as far as it will go without blocking. Returns
    /// whether it is still outstanding.
    fn poll_request(&mut self, id: TileId, time: f64) -> bool {
        loop {
            let tile = &mut self.tiles[id];
            let Some(request) = tile.request.as_mut() else {
                return false;
            };
            let was_fetching = request.is_fetching();
            match request.poll(self.factory.as_ref()) {
                RequestProgress::Pending => return true,
                RequestProgress::Fetched(variant) => {
                    tile.state = ContentState::Processing;
                    self.statistics.pending_requests = self.statistics.pending_requests.saturating_sub(1);
                    self.statistics.tiles_processing += 1;
                    if variant.disables_skip_level_of_detail() {
                        self.skip_disabled_by_content = true;
                    }
                }
                RequestProgress::Ready(content) => {
                    tile.request = None;
                    self.statistics.tiles_processing = self.statistics.tiles_processing.saturating_sub(1);
                    self.finish_load(id, content, time);
                    return false;
                }
                RequestProgress::Aborted => {
                    tile.request = None;
                    tile.state = tile.state_before_request;
                    self.statistics.pending_requests = self.statistics.pending_requests.saturating_sub(1);
                    if tile.state == ContentState::Expired {
                        if let Some(expired) = tile.expired_content.as_deref() {
                            self.statistics.increment_load_counts(expired);
                        }
                        self.statistics.tiles_with_content_ready += 1;
                    }
                    debug!(tile = id.index(), "content request aborted");
                    return false;
                }
                RequestProgress::Failed(message) => {
                    tile.request = None;
                    if was_fetching {
                        self.statistics.pending_requests = self.statistics.pending_requests.saturating_sub(1);
                    } else {
                        self.statistics.tiles_processing = self.statistics.tiles_processing.saturating_sub(1);
                    }
                    self.fail_load(id, message);
                    return false;
                }
            }
        }
    }

    fn finish_load(&mut self, id: TileId, content: LoadedContent, time: f64) {
        match content {
            LoadedContent::Renderable(content) => {
                let tile = &mut self.tiles[id];
                if let Some(mut expired) = tile.expired_content.take() {
                    expired.destroy();
                }
                self.statistics.increment_load_counts(content.as_ref());
                self.statistics.tiles_with_content_ready += 1;
                self.statistics.loaded_tiles_total += 1;
                tile.content = Some(content);
                tile.state = ContentState::Ready;
                tile.expire_at = tile.expire_duration.map(|duration| time + duration);
                if tile.cache_node.is_none() {
                    tile.cache_node = Some(self.cache.add(id));
                }
                debug!(tile = id.index(), "tile content ready");
                self.events.emit(TilesetEvent::TileLoaded(id));
            }
            LoadedContent::ExternalTileset(header) => {
                let tile = &self.tiles[id];
                let parent = SubtreeParent {
                    id: Some(id),
                    transform: tile.computed_transform,
                    geometric_error: tile.geometric_error,
                    refine: tile.refine,
                    depth: tile.depth + 1,
                };
                let base_url = tile.content_url.clone().unwrap_or_default();
                match self.tiles.build_subtree(&header, parent, &base_url) {
                    Ok(_) => {
                        let tile = &mut self.tiles[id];
                        tile.has_tileset_content = true;
                        tile.state = ContentState::Ready;
                        tile.expire_duration = None;
                        self.tree_changed();
                        debug!(tile = id.index(), tiles = self.tiles.len(), "external tileset attached");
                        self.events.emit(TilesetEvent::TileLoaded(id));
                    }
                    Err(err) => self.fail_load(id, err.to_string()),
                }
            }
        }
    }

    fn fail_load(&mut self, id: TileId, message: String) {
        let tile = &mut self.tiles[id];
        if let Some(mut expired) = tile.expired_content.take() {
            expired.destroy();
        }
        tile.state = ContentState::Failed;
        let url = tile.content_url.clone().unwrap_or_default();
        debug!(tile = id.index(), url = url.as_str(), message = message.as_str(), "tile failed");
        self.events.emit(TilesetEvent::TileFailed { tile: id, url, message });
    }

    fn update_selected_content(&mut self, frame: &FrameState, transform_changed: bool) {
        let selected = std::mem::take(&mut self.selection.selected);
        for &id in &selected {
            self.events.emit(TilesetEvent::TileVisible(id));
            update_tile_content(&mut self.tiles, id, frame, transform_changed);
            if let Some(content) = self.tiles[id].content() {
                self.statistics.increment_selection_counts(content);
            }
            self.statistics.selected += 1;
        }
        if transform_changed {
            for &id in &self.previous_selected {
                if self.tiles[id].frame.selected_frame != frame.frame_number {
                    update_tile_content(&mut self.tiles, id, frame, transform_changed);
                }
            }
        }
        self.selection.selected = selected;
    }

    /// Abort fetches for tiles that were not touched this frame. Parsing is
    /// never interrupted.
    fn cancel_out_of_view_requests(&mut self, frame: &FrameState) {
        for id in std::mem::take(&mut self.in_flight) {
            let tile = &self.tiles[id];
            let Some(request) = &tile.request else {
                continue;
            };
            let out_of_view = frame.frame_number.saturating_sub(tile.frame.touched_frame) >= 1;
            if tile.state == ContentState::Loading && out_of_view {
                request.cancel();
                if !self.poll_request(id, frame.time) {
                    continue;
                }
            }
            self.in_flight.push(id);
        }
    }

    fn show_and_hide(&mut self) {
        let current: FxHashSet<TileId> = self.selection.selected.iter().copied().collect();
        for &id in &self.previous_selected {
            if !current.contains(&id)
                && let Some(content) = self.tiles[id].content_mut()
            {
                content.hide();
            }
        }
        for &id in &self.selection.selected {
            if let Some(content) = self.tiles[id].content_mut() {
                content.show();
            }
        }
        self.previous_selected.clone_from(&self.selection.selected);
    }
}

impl Drop for Tileset {
    fn drop(&mut self) {
        for tile in self.tiles.iter_mut() {
            if let Some(request) = tile.request.take() {
                request.cancel();
            }
            for mut content in [tile.content.take(), tile.expired_content.take()].into_iter().flatten() {
                content.destroy();
            }
        }
    }
}

fn update_tile_content(tiles: &mut TileArena, id: TileId, frame: &FrameState, transform_changed: bool) {
    let tile = &mut tiles[id];
    let context = ContentUpdateContext {
        computed_transform: tile.computed_transform,
        final_resolution: tile.frame.final_resolution,
        selection_depth: tile.frame.selection_depth,
        transform_changed,
    };
    if let Some(content) = tile.content_mut() {
        content.update(&context, frame);
    }
}

/// Release a tile's content after eviction. The tile itself stays in the tree.
/// Returns `false` when the tile is mid-parse and was left untouched.
fn unload_tile(tiles: &mut TileArena, statistics: &mut Statistics, events: &mut TilesetEvents, id: TileId) -> bool {
    let tile = &mut tiles[id];
    if tile.has_no_renderable_content() {
        return true;
    }
    if tile.request.as_ref().is_some_and(|request| !request.is_fetching()) {
        trace!(tile = id.index(), "eviction deferred until parse completes");
        return false;
    }
    events.emit(TilesetEvent::TileUnloaded(id));

    if matches!(tile.state, ContentState::Ready | ContentState::Expired) {
        if let Some(content) = tile.content() {
            statistics.decrement_load_counts(content);
        }
        statistics.tiles_with_content_ready = statistics.tiles_with_content_ready.saturating_sub(1);
    }
    if let Some(request) = tile.request.take() {
        request.cancel();
        statistics.pending_requests = statistics.pending_requests.saturating_sub(1);
    }
    for mut content in [tile.content.take(), tile.expired_content.take()].into_iter().flatten() {
        content.destroy();
    }
    tile.state = ContentState::Unloaded;
    tile.cache_node = None;
    tile.expire_at = None;
    trace!(tile = id.index(), "tile unloaded");
    true
}
