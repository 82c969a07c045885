//! Tiles: nodes of the spatial tree and their content state machine.
//!
//! Tiles live in a [`TileArena`] and refer to each other by [`TileId`]. A
//! tile owns its list of children; its parent link and its cache node are
//! plain indices. Everything traversal recomputes each frame sits in a
//! [`TileFrameState`] value.

use std::ops::{Index, IndexMut};

use glam::{DMat4, DVec3};
use serde::{Deserialize, Serialize};
use strata_bounds::{
    BoundingVolume, BoundingVolumeHeader, Intersection, PlaneMask,
};

use crate::cache::CacheNodeId;
use crate::content::TileContent;
use crate::error::TilesetError;
use crate::frame::FrameState;
use crate::options::TilesetOptions;
use crate::priority::PrioritySample;
use crate::request::ContentRequest;

const EPSILON7: f64 = 1e-7;

/// Index of a tile in its tileset.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TileId(u32);

impl TileId {
    pub fn new(index: u32) -> Self {
        Self(index)
    }

    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// How a tile's children relate to it once they are shown.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Refine {
    /// Children are drawn alongside the parent.
    #[serde(alias = "add")]
    Add,
    /// Children replace the parent.
    #[serde(alias = "replace")]
    Replace,
}

/// Content life cycle.
///
/// ```text
/// Unloaded | Expired --request--> Loading --bytes--> Processing --ready--> Ready
/// Loading --abort--> (previous state)
/// Loading | Processing --error--> Failed
/// Ready --expire--> Expired
/// Ready | Expired | Failed --unload--> Unloaded
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ContentState {
    Unloaded,
    Loading,
    Processing,
    Ready,
    Expired,
    Failed,
}

/// Content reference in a tile header.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContentHeader {
    #[serde(alias = "url")]
    pub uri: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bounding_volume: Option<BoundingVolumeHeader>,
}

/// Content expiry in a tile header.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ExpireHeader {
    /// Seconds after loading until the content expires.
    pub duration: f64,
}

/// One node of a tileset document.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TileHeader {
    pub bounding_volume: BoundingVolumeHeader,
    #[serde(default)]
    pub geometric_error: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refine: Option<Refine>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<ContentHeader>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<TileHeader>,
    /// Column-major 4x4 transform.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transform: Option<[f64; 16]>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub viewer_request_volume: Option<BoundingVolumeHeader>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expire: Option<ExpireHeader>,
}

impl TileHeader {
    /// A header with a bounding volume and geometric error and nothing else.
    pub fn new(bounding_volume: BoundingVolumeHeader, geometric_error: f64) -> Self {
        Self {
            bounding_volume,
            geometric_error: Some(geometric_error),
            refine: None,
            content: None,
            children: Vec::new(),
            transform: None,
            viewer_request_volume: None,
            expire: None,
        }
    }

    pub fn with_content(mut self, uri: impl Into<String>) -> Self {
        self.content = Some(ContentHeader {
            uri: uri.into(),
            bounding_volume: None,
        });
        self
    }

    pub fn with_refine(mut self, refine: Refine) -> Self {
        self.refine = Some(refine);
        self
    }

    pub fn with_child(mut self, child: TileHeader) -> Self {
        self.children.push(child);
        self
    }
}

/// Values traversal derives for a tile each frame.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TileFrameState {
    pub distance_to_camera: f64,
    /// Distance along the view direction to the volume center.
    pub center_z_depth: f64,
    pub screen_space_error: f64,
    /// SSE evaluated at the progressive-resolution height fraction.
    pub progressive_screen_space_error: f64,
    pub plane_mask: PlaneMask,
    /// Inside the view frustum.
    pub visible: bool,
    /// Inside the viewer request volume, or no such volume.
    pub in_request_volume: bool,

    pub priority: f64,
    pub priority_holder: TileId,
    pub priority_reverse_screen_space_error: f64,
    pub priority_progressive_resolution: bool,
    /// Passes the progressive-resolution SSE while its parent fails it.
    pub progressive_resolution_leaf: bool,
    pub foveated_factor: f64,
    pub priority_deferred: bool,
    pub was_min_priority_child: bool,

    pub refines: bool,
    pub should_select: bool,
    /// False when the tile is selected in place of unloaded descendants.
    pub final_resolution: bool,
    pub selection_depth: u32,
    pub stack_length: usize,
    pub ancestor_with_content: Option<TileId>,
    pub ancestor_with_content_available: Option<TileId>,

    pub updated_visibility_frame: u64,
    pub touched_frame: u64,
    pub visited_frame: u64,
    pub selected_frame: u64,
    pub requested_frame: u64,
}

impl TileFrameState {
    fn new(id: TileId) -> Self {
        Self {
            distance_to_camera: 0.0,
            center_z_depth: 0.0,
            screen_space_error: 0.0,
            progressive_screen_space_error: 0.0,
            plane_mask: PlaneMask::INDETERMINATE,
            visible: false,
            in_request_volume: true,
            priority: 0.0,
            priority_holder: id,
            priority_reverse_screen_space_error: 0.0,
            priority_progressive_resolution: false,
            progressive_resolution_leaf: false,
            foveated_factor: 0.0,
            priority_deferred: false,
            was_min_priority_child: false,
            refines: false,
            should_select: false,
            final_resolution: true,
            selection_depth: 0,
            stack_length: 0,
            ancestor_with_content: None,
            ancestor_with_content_available: None,
            updated_visibility_frame: 0,
            touched_frame: 0,
            visited_frame: 0,
            selected_frame: 0,
            requested_frame: 0,
        }
    }
}

/// A node of the spatial tree.
pub struct Tile {
    pub(crate) id: TileId,
    pub(crate) parent: Option<TileId>,
    pub(crate) children: Vec<TileId>,
    pub(crate) depth: u32,
    pub(crate) geometric_error: f64,
    /// The parent's geometric error, or the tileset's for the root.
    pub(crate) parent_geometric_error: f64,
    pub(crate) refine: Refine,

    pub(crate) local_transform: DMat4,
    pub(crate) computed_transform: DMat4,
    local_volume: BoundingVolume,
    pub(crate) bounding_volume: BoundingVolume,
    local_content_volume: Option<BoundingVolume>,
    pub(crate) content_volume: Option<BoundingVolume>,
    local_request_volume: Option<BoundingVolume>,
    pub(crate) request_volume: Option<BoundingVolume>,
    volume_updates: u64,

    pub(crate) content_url: Option<String>,
    pub(crate) state: ContentState,
    pub(crate) content: Option<Box<dyn TileContent>>,
    /// Stale content still drawn while its replacement loads.
    pub(crate) expired_content: Option<Box<dyn TileContent>>,
    /// No content was declared.
    pub(crate) has_empty_content: bool,
    /// The content turned out to be an external tileset.
    pub(crate) has_tileset_content: bool,
    /// Every child volume lies strictly within this tile's volume.
    pub(crate) children_within_parent: bool,
    pub(crate) expire_duration: Option<f64>,
    pub(crate) expire_at: Option<f64>,

    pub(crate) cache_node: Option<CacheNodeId>,
    pub(crate) request: Option<ContentRequest>,
    /// State to return to if the in-flight request is aborted.
    pub(crate) state_before_request: ContentState,

    pub(crate) frame: TileFrameState,
}

impl Tile {
    pub fn id(&self) -> TileId {
        self.id
    }

    pub fn parent(&self) -> Option<TileId> {
        self.parent
    }

    pub fn children(&self) -> &[TileId] {
        &self.children
    }

    pub fn depth(&self) -> u32 {
        self.depth
    }

    pub fn geometric_error(&self) -> f64 {
        self.geometric_error
    }

    pub fn refine(&self) -> Refine {
        self.refine
    }

    pub fn content_state(&self) -> ContentState {
        self.state
    }

    pub fn content_url(&self) -> Option<&str> {
        self.content_url.as_deref()
    }

    pub fn bounding_volume(&self) -> &BoundingVolume {
        &self.bounding_volume
    }

    pub fn computed_transform(&self) -> &DMat4 {
        &self.computed_transform
    }

    /// Per-frame derived values from the last traversal.
    pub fn frame_state(&self) -> &TileFrameState {
        &self.frame
    }

    /// How many times the bounding volumes were re-derived after a
    /// transform change.
    pub fn bounding_volume_updates(&self) -> u64 {
        self.volume_updates
    }

    pub fn has_empty_content(&self) -> bool {
        self.has_empty_content
    }

    pub fn has_tileset_content(&self) -> bool {
        self.has_tileset_content
    }

    /// Empty tiles and external-tileset tiles have nothing to draw.
    pub fn has_no_renderable_content(&self) -> bool {
        self.has_empty_content || self.has_tileset_content
    }

    pub fn has_unloaded_content(&self) -> bool {
        !self.has_no_renderable_content() && self.state == ContentState::Unloaded
    }

    pub fn content_expired(&self) -> bool {
        self.state == ContentState::Expired
    }

    pub fn content_failed(&self) -> bool {
        self.state == ContentState::Failed
    }

    /// Ready renderable content, or expired content still standing in.
    pub fn content_available(&self) -> bool {
        (self.state == ContentState::Ready && self.content.is_some())
            || (self.expired_content.is_some() && self.state != ContentState::Failed)
    }

    /// In the frustum and in the request volume this frame.
    pub fn is_visible(&self) -> bool {
        self.frame.visible && self.frame.in_request_volume
    }

    pub fn content(&self) -> Option<&dyn TileContent> {
        match self.state {
            ContentState::Ready => self.content.as_deref(),
            _ => self.expired_content.as_deref(),
        }
    }

    pub(crate) fn content_mut(&mut self) -> Option<&mut (dyn TileContent + 'static)> {
        match self.state {
            ContentState::Ready => self.content.as_deref_mut(),
            _ => self.expired_content.as_deref_mut(),
        }
    }

    /// Distance from the camera to the bounding volume.
    pub fn distance_to_camera(&self, frame: &FrameState) -> f64 {
        self.bounding_volume.distance_to_camera(frame.camera.position)
    }

    /// Depth of the volume center along the view direction.
    pub fn distance_to_tile_center(&self, frame: &FrameState) -> f64 {
        let to_center = self.bounding_volume.center() - frame.camera.position;
        frame.camera.direction.dot(to_center)
    }

    /// Projected geometric error in pixels, using the distance from the last
    /// visibility update. `use_parent_error` swaps in the parent's error.
    pub fn screen_space_error(&self, frame: &FrameState, use_parent_error: bool, height_fraction: f64) -> f64 {
        let geometric_error = if use_parent_error {
            self.parent_geometric_error
        } else {
            self.geometric_error
        };
        if geometric_error == 0.0 {
            return 0.0;
        }
        let height = frame.viewport_height * height_fraction;
        let distance = self.frame.distance_to_camera.max(EPSILON7);
        geometric_error * height / (distance * frame.sse_denominator) / frame.pixel_ratio
    }

    /// Compose `parent_transform` with the local transform. Volumes are only
    /// re-derived when the result differs from the cached transform.
    pub fn update_transform(&mut self, parent_transform: &DMat4) -> bool {
        let computed = *parent_transform * self.local_transform;
        if computed == self.computed_transform {
            return false;
        }
        self.computed_transform = computed;
        self.bounding_volume.update_from(&self.local_volume, &computed);
        if let (Some(local), Some(world)) = (&self.local_content_volume, &mut self.content_volume) {
            world.update_from(local, &computed);
        }
        if let (Some(local), Some(world)) = (&self.local_request_volume, &mut self.request_volume) {
            world.update_from(local, &computed);
        }
        self.volume_updates += 1;
        true
    }

    /// Visibility of the content volume, assuming the tile volume is visible.
    pub fn content_visibility(&self, frame: &FrameState) -> Intersection {
        match &self.content_volume {
            None => Intersection::Inside,
            Some(_) if self.frame.plane_mask == PlaneMask::INSIDE => Intersection::Inside,
            Some(volume) => volume.compute_visible(&frame.culling_volume),
        }
    }

    /// Move ready content to `Expired` once its expiry time has passed.
    pub fn update_expiration(&mut self, time: f64) {
        if self.state != ContentState::Ready || self.has_no_renderable_content() {
            return;
        }
        if let Some(expire_at) = self.expire_at
            && expire_at < time
        {
            self.state = ContentState::Expired;
            self.expired_content = self.content.take();
            self.expire_at = None;
        }
    }

    pub(crate) fn priority_sample(&self, holder: &TileFrameState) -> PrioritySample {
        PrioritySample {
            depth: self.depth,
            distance: holder.distance_to_camera,
            foveated_factor: holder.foveated_factor,
            reverse_screen_space_error: self.frame.priority_reverse_screen_space_error,
            progressive_resolution: self.frame.priority_progressive_resolution,
            deferred: self.frame.priority_deferred,
        }
    }
}

/// Tiles of one tileset, addressed by [`TileId`].
#[derive(Default)]
pub struct TileArena {
    tiles: Vec<Tile>,
}

/// Where a subtree is attached and what it inherits.
pub(crate) struct SubtreeParent {
    pub id: Option<TileId>,
    pub transform: DMat4,
    pub geometric_error: f64,
    pub refine: Refine,
    pub depth: u32,
}

impl TileArena {
    pub fn len(&self) -> usize {
        self.tiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tiles.is_empty()
    }

    pub fn get(&self, id: TileId) -> Option<&Tile> {
        self.tiles.get(id.index())
    }

    pub fn iter(&self) -> impl Iterator<Item = &Tile> {
        self.tiles.iter()
    }

    pub(crate) fn iter_mut(&mut self) -> impl Iterator<Item = &mut Tile> {
        self.tiles.iter_mut()
    }

    /// Build the tiles for `header` and its descendants. On error nothing is
    /// added and the parent's children are left untouched.
    pub(crate) fn build_subtree(
        &mut self,
        header: &TileHeader,
        parent: SubtreeParent,
        base_url: &str,
    ) -> Result<TileId, TilesetError> {
        let start = self.tiles.len();
        let result = self.build_subtree_inner(header, &parent, base_url);
        if result.is_err() {
            self.tiles.truncate(start);
            if let Some(parent_id) = parent.id {
                self[parent_id].children.retain(|child| child.index() < start);
            }
        }
        result
    }

    fn build_subtree_inner(
        &mut self,
        header: &TileHeader,
        parent: &SubtreeParent,
        base_url: &str,
    ) -> Result<TileId, TilesetError> {
        let root = self.push_tile(header, parent, base_url)?;
        let mut stack = vec![(root, header)];
        while let Some((id, header)) = stack.pop() {
            let tile = &self[id];
            let inherited = SubtreeParent {
                id: Some(id),
                transform: tile.computed_transform,
                geometric_error: tile.geometric_error,
                refine: tile.refine,
                depth: tile.depth + 1,
            };
            for child_header in &header.children {
                let child = self.push_tile(child_header, &inherited, base_url)?;
                stack.push((child, child_header));
            }
        }
        for index in root.index()..self.tiles.len() {
            self.compute_children_within_parent(TileId(index as u32));
        }
        if let Some(parent_id) = parent.id {
            self.compute_children_within_parent(parent_id);
        }
        Ok(root)
    }

    fn push_tile(
        &mut self,
        header: &TileHeader,
        parent: &SubtreeParent,
        base_url: &str,
    ) -> Result<TileId, TilesetError> {
        let geometric_error = header
            .geometric_error
            .ok_or(TilesetError::MissingGeometricError)?;
        if !geometric_error.is_finite() || geometric_error < 0.0 {
            return Err(TilesetError::InvalidGeometricError(geometric_error));
        }

        let local_transform = header
            .transform
            .map(|columns| DMat4::from_cols_array(&columns))
            .unwrap_or(DMat4::IDENTITY);
        let computed_transform = parent.transform * local_transform;

        let local_volume = BoundingVolume::from_header_local(&header.bounding_volume)?;
        let local_content_volume = header
            .content
            .as_ref()
            .and_then(|content| content.bounding_volume.as_ref())
            .map(BoundingVolume::from_header_local)
            .transpose()?;
        let local_request_volume = header
            .viewer_request_volume
            .as_ref()
            .map(BoundingVolume::from_header_local)
            .transpose()?;

        let id = TileId(self.tiles.len() as u32);
        let content_url = header
            .content
            .as_ref()
            .map(|content| resolve_url(base_url, &content.uri));
        let has_empty_content = content_url.is_none();

        self.tiles.push(Tile {
            id,
            parent: parent.id,
            children: Vec::new(),
            depth: parent.depth,
            geometric_error,
            parent_geometric_error: parent.geometric_error,
            refine: header.refine.unwrap_or(parent.refine),
            local_transform,
            computed_transform,
            bounding_volume: local_volume.transformed(&computed_transform),
            local_volume,
            content_volume: local_content_volume.map(|v| v.transformed(&computed_transform)),
            local_content_volume,
            request_volume: local_request_volume.map(|v| v.transformed(&computed_transform)),
            local_request_volume,
            volume_updates: 0,
            content_url,
            state: if has_empty_content {
                ContentState::Ready
            } else {
                ContentState::Unloaded
            },
            content: None,
            expired_content: None,
            has_empty_content,
            has_tileset_content: false,
            children_within_parent: false,
            expire_duration: header.expire.as_ref().map(|expire| expire.duration),
            expire_at: None,
            cache_node: None,
            request: None,
            state_before_request: ContentState::Unloaded,
            frame: TileFrameState::new(id),
        });
        if let Some(parent_id) = parent.id {
            self[parent_id].children.push(id);
        }
        Ok(id)
    }

    /// Whether every child box extends less far from the parent's center
    /// than the parent box does, measured along the axis to the child.
    fn compute_children_within_parent(&mut self, id: TileId) {
        let tile = &self[id];
        let within = match tile.bounding_volume.as_oriented_box() {
            Some(parent_box) if !tile.children.is_empty() => tile.children.iter().all(|&child| {
                let Some(child_box) = self[child].bounding_volume.as_oriented_box() else {
                    return false;
                };
                let axis = child_box.center - parent_box.center;
                let axis_length = axis.length();
                if axis_length == 0.0 {
                    return true;
                }
                let axis = axis / axis_length;
                parent_box.projected_radius(axis) > child_box.projected_radius(axis) + axis_length
            }),
            _ => false,
        };
        self[id].children_within_parent = within;
    }
}

impl Index<TileId> for TileArena {
    type Output = Tile;

    fn index(&self, id: TileId) -> &Tile {
        &self.tiles[id.index()]
    }
}

impl IndexMut<TileId> for TileArena {
    fn index_mut(&mut self, id: TileId) -> &mut Tile {
        &mut self.tiles[id.index()]
    }
}

/// Resolve a content URI against the URL of the document that declared it.
pub(crate) fn resolve_url(base_url: &str, uri: &str) -> String {
    if base_url.is_empty() || uri.contains("://") || uri.starts_with('/') {
        return uri.to_owned();
    }
    match base_url.rfind('/') {
        Some(slash) => format!("{}{}", &base_url[..=slash], uri),
        None => uri.to_owned(),
    }
}

/// Everything visibility needs besides the tiles.
pub(crate) struct VisibilityContext<'a> {
    pub frame: &'a FrameState,
    pub options: &'a TilesetOptions,
    pub skip_level_of_detail: bool,
    pub model_matrix: DMat4,
    pub root: TileId,
}

#[derive(Clone, Copy)]
struct ParentSnapshot {
    transform: DMat4,
    plane_mask: PlaneMask,
    screen_space_error: f64,
    progressive_screen_space_error: f64,
    has_tileset_content: bool,
}

/// Recompute a tile's per-frame visibility, error and priority inputs.
pub(crate) fn update_visibility(tiles: &mut TileArena, id: TileId, ctx: &VisibilityContext<'_>) {
    let parent = tiles[id].parent.map(|parent_id| {
        let parent = &tiles[parent_id];
        ParentSnapshot {
            transform: parent.computed_transform,
            plane_mask: parent.frame.plane_mask,
            screen_space_error: parent.frame.screen_space_error,
            progressive_screen_space_error: parent.frame.progressive_screen_space_error,
            has_tileset_content: parent.has_tileset_content,
        }
    });
    let root_sse = (id != ctx.root).then(|| tiles[ctx.root].frame.screen_space_error);
    let frame = ctx.frame;
    let options = ctx.options;
    let tile = &mut tiles[id];

    tile.update_transform(&parent.map_or(ctx.model_matrix, |p| p.transform));
    tile.frame.distance_to_camera = tile.distance_to_camera(frame);
    tile.frame.center_z_depth = tile.distance_to_tile_center(frame);
    tile.frame.screen_space_error = tile.screen_space_error(frame, false, 1.0);
    tile.frame.progressive_screen_space_error =
        tile.screen_space_error(frame, false, options.progressive_resolution_height_fraction);

    let parent_mask = parent.map_or(PlaneMask::INDETERMINATE, |p| p.plane_mask);
    tile.frame.plane_mask = tile
        .bounding_volume
        .compute_visibility_with_plane_mask(&frame.culling_volume, parent_mask);
    tile.frame.visible = !tile.frame.plane_mask.is_outside();
    tile.frame.in_request_volume = tile
        .request_volume
        .as_ref()
        .is_none_or(|volume| volume.distance_to_camera(frame.camera.position) == 0.0);

    let sse = tile.frame.screen_space_error;
    let reverse_source = match parent {
        Some(p) if !ctx.skip_level_of_detail || sse == 0.0 || p.has_tileset_content => {
            p.screen_space_error
        }
        _ => sse,
    };
    tile.frame.priority_reverse_screen_space_error = root_sse.unwrap_or(sse) - reverse_source;

    update_progressive_resolution(tile, parent.map(|p| p.progressive_screen_space_error), options);
    tile.frame.foveated_factor = foveated_factor(tile, frame);
    tile.frame.priority_deferred = is_priority_deferred(
        tile,
        parent.map(|p| p.screen_space_error),
        frame,
        options,
        ctx.skip_level_of_detail,
    );
}

fn update_progressive_resolution(tile: &mut Tile, parent_progressive_sse: Option<f64>, options: &TilesetOptions) {
    tile.frame.progressive_resolution_leaf = false;
    let fraction = options.progressive_resolution_height_fraction;
    if fraction <= 0.0 || fraction > 0.5 {
        tile.frame.priority_progressive_resolution = false;
        return;
    }
    let maximum = options.maximum_screen_space_error;
    let progressive_sse = tile.frame.progressive_screen_space_error;
    let tile_passes = progressive_sse <= maximum;
    let parent_fails = parent_progressive_sse.is_some_and(|sse| sse > maximum);
    if tile_passes && parent_fails {
        tile.frame.progressive_resolution_leaf = true;
    }
    tile.frame.priority_progressive_resolution =
        progressive_sse > maximum || tile.frame.progressive_resolution_leaf;
}

/// One minus the cosine between the view direction and the nearest point of
/// the tile's bounding sphere to the view line. Zero when the line of sight
/// passes through the sphere.
fn foveated_factor(tile: &Tile, frame: &FrameState) -> f64 {
    let sphere = tile.bounding_volume.bounding_sphere();
    let camera = &frame.camera;
    let closest_on_line = camera.position + camera.direction * tile.frame.center_z_depth;
    let to_line = closest_on_line - sphere.center;
    if to_line.length() <= sphere.radius {
        return 0.0;
    }
    let closest_on_sphere = sphere.center + to_line.normalize() * sphere.radius;
    let to_closest: DVec3 = (closest_on_sphere - camera.position).normalize_or_zero();
    1.0 - camera.direction.dot(to_closest).abs()
}

fn is_priority_deferred(
    tile: &Tile,
    parent_sse: Option<f64>,
    frame: &FrameState,
    options: &TilesetOptions,
    skip_level_of_detail: bool,
) -> bool {
    let replace = tile.refine == Refine::Replace;
    if (replace && !skip_level_of_detail)
        || !options.foveated_screen_space_error
        || options.foveated_cone_size == 1.0
        || (tile.frame.priority_progressive_resolution && replace && skip_level_of_detail)
    {
        return false;
    }

    let maximum_foveated_factor = 1.0 - (frame.camera.fov_y * 0.5).cos();
    let cone_factor = options.foveated_cone_size * maximum_foveated_factor;
    if tile.frame.foveated_factor <= cone_factor {
        return false;
    }

    let range = maximum_foveated_factor - cone_factor;
    let t = if range > 0.0 {
        ((tile.frame.foveated_factor - cone_factor) / range).clamp(0.0, 1.0)
    } else {
        1.0
    };
    let minimum = options.foveated_minimum_screen_space_error_relaxation;
    let maximum = options.maximum_screen_space_error;
    let relaxation = minimum + (maximum - minimum) * t;
    let sse = match parent_sse {
        Some(parent_sse) if tile.frame.screen_space_error == 0.0 => parent_sse * 0.5,
        _ => tile.frame.screen_space_error,
    };
    maximum - relaxation <= sse
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::frame::CameraState;

    pub(crate) fn sphere_header(center: DVec3, radius: f64) -> BoundingVolumeHeader {
        BoundingVolumeHeader::from_sphere([center.x, center.y, center.z, radius])
    }

    pub(crate) fn box_header(center: DVec3, half: f64) -> BoundingVolumeHeader {
        BoundingVolumeHeader::from_box([
            center.x, center.y, center.z, half, 0.0, 0.0, 0.0, half, 0.0, 0.0, 0.0, half,
        ])
    }

    pub(crate) fn camera_frame(position: DVec3, target: DVec3) -> FrameState {
        let camera = CameraState::look_at(position, target, DVec3::Y, std::f64::consts::FRAC_PI_3);
        FrameState::from_camera(1, 0.0, camera, 1000.0)
    }

    fn root_parent() -> SubtreeParent {
        SubtreeParent {
            id: None,
            transform: DMat4::IDENTITY,
            geometric_error: 100.0,
            refine: Refine::Replace,
            depth: 0,
        }
    }

    fn build(header: &TileHeader) -> (TileArena, TileId) {
        let mut arena = TileArena::default();
        let root = arena.build_subtree(header, root_parent(), "data/tileset.json").unwrap();
        (arena, root)
    }

    fn context<'a>(frame: &'a FrameState, options: &'a TilesetOptions, root: TileId) -> VisibilityContext<'a> {
        VisibilityContext {
            frame,
            options,
            skip_level_of_detail: false,
            model_matrix: DMat4::IDENTITY,
            root,
        }
    }

    /// Zero geometric error yields zero SSE at any distance.
    #[test]
    fn test_zero_geometric_error_has_zero_sse() {
        let (mut arena, root) = build(&TileHeader::new(sphere_header(DVec3::ZERO, 1.0), 0.0));
        let frame = camera_frame(DVec3::new(0.0, 0.0, 0.5), DVec3::new(0.0, 0.0, -1.0));
        for distance in [0.0, 1e-9, 1.0, 1e6] {
            arena[root].frame.distance_to_camera = distance;
            assert_eq!(arena[root].screen_space_error(&frame, false, 1.0), 0.0);
            assert_eq!(arena[root].screen_space_error(&frame, false, 0.3), 0.0);
        }
    }

    /// SSE follows error * height / (distance * denominator).
    #[test]
    fn test_screen_space_error_formula() {
        let (mut arena, root) = build(&TileHeader::new(sphere_header(DVec3::ZERO, 1.0), 8.0));
        let frame = camera_frame(DVec3::new(0.0, 0.0, 101.0), DVec3::ZERO);
        let options = TilesetOptions::default();
        update_visibility(&mut arena, root, &context(&frame, &options, root));
        let tile = &arena[root];
        assert!((tile.frame.distance_to_camera - 100.0).abs() < 1e-9);
        let expected = 8.0 * 1000.0 / (100.0 * frame.sse_denominator);
        assert!((tile.frame.screen_space_error - expected).abs() < 1e-9);
        // Parent error substitution for the root uses the tileset error.
        let parent_sse = tile.screen_space_error(&frame, true, 1.0);
        assert!((parent_sse - expected * 100.0 / 8.0).abs() < 1e-6);
    }

    /// Dense displays see proportionally less error per device pixel.
    #[test]
    fn test_screen_space_error_pixel_ratio() {
        let (mut arena, root) = build(&TileHeader::new(sphere_header(DVec3::ZERO, 1.0), 8.0));
        let mut frame = camera_frame(DVec3::new(0.0, 0.0, 101.0), DVec3::ZERO);
        let options = TilesetOptions::default();
        update_visibility(&mut arena, root, &context(&frame, &options, root));
        let base = arena[root].screen_space_error(&frame, false, 1.0);
        frame.pixel_ratio = 2.0;
        let dense = arena[root].screen_space_error(&frame, false, 1.0);
        assert!((dense - base / 2.0).abs() < 1e-9);
    }

    /// An unchanged transform never re-derives the volumes.
    #[test]
    fn test_transform_update_is_idempotent() {
        let (mut arena, root) = build(&TileHeader::new(sphere_header(DVec3::ZERO, 1.0), 1.0));
        assert!(!arena[root].update_transform(&DMat4::IDENTITY));
        assert!(!arena[root].update_transform(&DMat4::IDENTITY));
        assert_eq!(arena[root].bounding_volume_updates(), 0);

        let moved = DMat4::from_translation(DVec3::new(5.0, 0.0, 0.0));
        assert!(arena[root].update_transform(&moved));
        assert!(!arena[root].update_transform(&moved));
        assert_eq!(arena[root].bounding_volume_updates(), 1);
        assert_eq!(arena[root].bounding_volume().center(), DVec3::new(5.0, 0.0, 0.0));
    }

    /// Refinement is inherited and transforms compose down the tree.
    #[test]
    fn test_build_inherits_refine_and_transform() {
        let mut child = TileHeader::new(sphere_header(DVec3::ZERO, 1.0), 1.0);
        child.transform = Some(DMat4::from_translation(DVec3::new(0.0, 2.0, 0.0)).to_cols_array());
        let mut root = TileHeader::new(sphere_header(DVec3::ZERO, 4.0), 4.0)
            .with_refine(Refine::Add)
            .with_child(child.with_content("child.b3dm"));
        root.transform = Some(DMat4::from_translation(DVec3::new(1.0, 0.0, 0.0)).to_cols_array());
        let (arena, root) = build(&root);

        let child = arena[root].children()[0];
        assert_eq!(arena[child].refine(), Refine::Add);
        assert_eq!(arena[child].depth(), 1);
        assert_eq!(arena[child].bounding_volume().center(), DVec3::new(1.0, 2.0, 0.0));
        assert_eq!(arena[child].content_url(), Some("data/child.b3dm"));
        assert_eq!(arena[child].content_state(), ContentState::Unloaded);
        assert_eq!(arena[root].content_state(), ContentState::Ready);
        assert!(arena[root].has_empty_content());
    }

    /// A broken child aborts the whole subtree.
    #[test]
    fn test_build_error_leaves_arena_unchanged() {
        let mut bad = TileHeader::new(sphere_header(DVec3::ZERO, 1.0), 1.0);
        bad.geometric_error = None;
        let header = TileHeader::new(sphere_header(DVec3::ZERO, 4.0), 4.0).with_child(bad);
        let mut arena = TileArena::default();
        let result = arena.build_subtree(&header, root_parent(), "");
        assert_eq!(result.err(), Some(TilesetError::MissingGeometricError));
        assert!(arena.is_empty());
    }

    #[test]
    fn test_negative_geometric_error_rejected() {
        let header = TileHeader::new(sphere_header(DVec3::ZERO, 4.0), -1.0);
        let mut arena = TileArena::default();
        assert_eq!(
            arena.build_subtree(&header, root_parent(), "").err(),
            Some(TilesetError::InvalidGeometricError(-1.0))
        );
    }

    /// Children strictly inside the parent box enable the children-bounds hint.
    #[test]
    fn test_children_within_parent_hint() {
        let inside = TileHeader::new(box_header(DVec3::new(1.0, 0.0, 0.0), 1.0), 1.0);
        let header = TileHeader::new(box_header(DVec3::ZERO, 4.0), 4.0).with_child(inside);
        let (arena, root) = build(&header);
        assert!(arena[root].children_within_parent);

        let flush = TileHeader::new(box_header(DVec3::new(2.0, 0.0, 0.0), 2.0), 1.0);
        let header = TileHeader::new(box_header(DVec3::ZERO, 4.0), 4.0).with_child(flush);
        let (arena, root) = build(&header);
        assert!(!arena[root].children_within_parent);

        let sphere_child = TileHeader::new(sphere_header(DVec3::ZERO, 1.0), 1.0);
        let header = TileHeader::new(box_header(DVec3::ZERO, 4.0), 4.0).with_child(sphere_child);
        let (arena, root) = build(&header);
        assert!(!arena[root].children_within_parent);
    }

    /// Tiles straight ahead have no foveated penalty; off-axis tiles do.
    #[test]
    fn test_foveated_factor() {
        let header = TileHeader::new(sphere_header(DVec3::ZERO, 1000.0), 10.0)
            .with_child(TileHeader::new(sphere_header(DVec3::new(0.0, 0.0, -10.0), 1.0), 1.0))
            .with_child(TileHeader::new(sphere_header(DVec3::new(30.0, 0.0, -10.0), 1.0), 1.0));
        let (mut arena, root) = build(&header);
        let frame = camera_frame(DVec3::new(0.0, 0.0, 50.0), DVec3::ZERO);
        let options = TilesetOptions::default();
        let ctx = context(&frame, &options, root);
        let children = arena[root].children().to_vec();
        update_visibility(&mut arena, root, &ctx);
        for &child in &children {
            update_visibility(&mut arena, child, &ctx);
        }
        assert_eq!(arena[children[0]].frame.foveated_factor, 0.0);
        assert!(arena[children[1]].frame.foveated_factor > 0.0);
    }

    /// Reverse SSE is measured from the root, using the parent's SSE outside
    /// skip traversal.
    #[test]
    fn test_reverse_screen_space_error() {
        let header = TileHeader::new(sphere_header(DVec3::ZERO, 10.0), 50.0)
            .with_child(TileHeader::new(sphere_header(DVec3::ZERO, 5.0), 10.0));
        let (mut arena, root) = build(&header);
        let frame = camera_frame(DVec3::new(0.0, 0.0, 100.0), DVec3::ZERO);
        let options = TilesetOptions::default();
        let ctx = context(&frame, &options, root);
        let child = arena[root].children()[0];
        update_visibility(&mut arena, root, &ctx);
        update_visibility(&mut arena, child, &ctx);
        assert_eq!(arena[root].frame.priority_reverse_screen_space_error, 0.0);
        assert_eq!(arena[child].frame.priority_reverse_screen_space_error, 0.0);

        let skip = VisibilityContext {
            skip_level_of_detail: true,
            ..context(&frame, &options, root)
        };
        update_visibility(&mut arena, child, &skip);
        let expected = arena[root].frame.screen_space_error - arena[child].frame.screen_space_error;
        assert!((arena[child].frame.priority_reverse_screen_space_error - expected).abs() < 1e-9);
        assert!(expected > 0.0);
    }

    /// A request volume gates visibility until the camera is inside it.
    #[test]
    fn test_viewer_request_volume() {
        let mut header = TileHeader::new(sphere_header(DVec3::ZERO, 10.0), 1.0);
        header.viewer_request_volume = Some(sphere_header(DVec3::ZERO, 50.0));
        let (mut arena, root) = build(&header);
        let options = TilesetOptions::default();

        let far = camera_frame(DVec3::new(0.0, 0.0, 100.0), DVec3::ZERO);
        update_visibility(&mut arena, root, &context(&far, &options, root));
        assert!(arena[root].frame.visible);
        assert!(!arena[root].is_visible());

        let near = camera_frame(DVec3::new(0.0, 0.0, 40.0), DVec3::ZERO);
        update_visibility(&mut arena, root, &context(&near, &options, root));
        assert!(arena[root].is_visible());
    }

    #[test]
    fn test_resolve_url() {
        assert_eq!(resolve_url("a/b/tileset.json", "c/d.b3dm"), "a/b/c/d.b3dm");
        assert_eq!(resolve_url("tileset.json", "d.b3dm"), "d.b3dm");
        assert_eq!(resolve_url("https://x/t.json", "https://y/z.pnts"), "https://y/z.pnts");
        assert_eq!(resolve_url("", "d.b3dm"), "d.b3dm");
    }

    /// Header JSON with the common field spellings parses.
    #[test]
    fn test_header_from_json() {
        let json = r#"{
            "boundingVolume": {"sphere": [0, 0, 0, 10]},
            "geometricError": 12.5,
            "refine": "add",
            "content": {"url": "root.pnts"},
            "expire": {"duration": 30},
            "children": [
                {"boundingVolume": {"sphere": [0, 0, 0, 5]}, "geometricError": 0}
            ]
        }"#;
        let header: TileHeader = serde_json::from_str(json).unwrap();
        assert_eq!(header.refine, Some(Refine::Add));
        assert_eq!(header.content.as_ref().map(|c| c.uri.as_str()), Some("root.pnts"));
        assert_eq!(header.children.len(), 1);
        assert_eq!(header.expire.as_ref().map(|e| e.duration), Some(30.0));
    }
}
