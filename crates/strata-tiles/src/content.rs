//! Content interfaces: what a tile holds once its payload is decoded.
//!
//! The streaming core never inspects payload bytes beyond the four-byte magic
//! used to tag a [`ContentPayload`]. Decoding is delegated to a
//! [`ContentFactory`], which resolves to either renderable content or the
//! header of an external tileset to attach under the tile.

use std::fmt;

use futures::future::BoxFuture;
use glam::DMat4;

use crate::error::ContentError;
use crate::frame::FrameState;
use crate::tile::TileHeader;

/// The closed set of payload kinds a tile can point at.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ContentVariant {
    /// Batched 3D model (`b3dm`).
    BatchedModel,
    /// Instanced 3D model (`i3dm`).
    InstancedModel,
    /// Point cloud (`pnts`).
    PointCloud,
    /// Composite of other variants (`cmpt`).
    Composite,
    /// Vector data (`vctr`).
    Vector,
    /// Geometry primitives (`geom`).
    Geometry,
    /// Binary glTF (`glTF`).
    Gltf,
    /// JSON document describing an external tileset.
    ExternalTileset,
}

impl ContentVariant {
    /// Identify a payload from its leading bytes.
    pub fn from_magic(bytes: &[u8]) -> Result<Self, ContentError> {
        if bytes.first() == Some(&b'{') {
            return Ok(Self::ExternalTileset);
        }
        let magic: [u8; 4] = bytes
            .get(..4)
            .and_then(|head| head.try_into().ok())
            .ok_or(ContentError::Truncated(bytes.len()))?;
        match &magic {
            b"b3dm" => Ok(Self::BatchedModel),
            b"i3dm" => Ok(Self::InstancedModel),
            b"pnts" => Ok(Self::PointCloud),
            b"cmpt" => Ok(Self::Composite),
            b"vctr" => Ok(Self::Vector),
            b"geom" => Ok(Self::Geometry),
            b"glTF" => Ok(Self::Gltf),
            _ => Err(ContentError::UnknownMagic(magic)),
        }
    }

    /// Variants that cannot be drawn alongside a substituted ancestor.
    pub fn disables_skip_level_of_detail(self) -> bool {
        matches!(self, Self::Vector | Self::Geometry)
    }
}

impl fmt::Display for ContentVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::BatchedModel => "b3dm",
            Self::InstancedModel => "i3dm",
            Self::PointCloud => "pnts",
            Self::Composite => "cmpt",
            Self::Vector => "vctr",
            Self::Geometry => "geom",
            Self::Gltf => "glTF",
            Self::ExternalTileset => "json",
        };
        f.write_str(name)
    }
}

/// Byte footprint of resident content.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ContentMemory {
    pub geometry_bytes: usize,
    pub texture_bytes: usize,
    pub auxiliary_table_bytes: usize,
}

impl ContentMemory {
    #[must_use]
    pub fn total(&self) -> usize {
        self.geometry_bytes + self.texture_bytes + self.auxiliary_table_bytes
    }
}

/// Feature, point and triangle counts of resident content.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ContentCounts {
    pub feature_count: u64,
    pub point_count: u64,
    pub triangle_count: u64,
}

/// Per-frame context handed to [`TileContent::update`].
#[derive(Clone, Copy, Debug)]
pub struct ContentUpdateContext {
    /// The tile's composed world transform.
    pub computed_transform: DMat4,
    /// False when the tile is a temporary stand-in for unloaded descendants.
    pub final_resolution: bool,
    /// Number of selected ancestors drawn beneath this tile.
    pub selection_depth: u32,
    /// Whether the tileset's root transform changed this frame.
    pub transform_changed: bool,
}

/// Decoded, renderable tile content.
///
/// Implementations live outside this crate (a renderer, or the demo's
/// synthetic content). All calls happen on the thread driving
/// [`Tileset::update`](crate::Tileset::update).
pub trait TileContent: Send {
    /// Which payload kind produced this content.
    fn variant(&self) -> ContentVariant;

    /// Called every frame the tile is selected, and for previously selected
    /// tiles when the tileset transform changes.
    fn update(&mut self, context: &ContentUpdateContext, frame: &FrameState);

    /// The tile is selected this frame. Called every frame it stays selected.
    fn show(&mut self);

    /// The tile was selected last frame but is not selected now.
    fn hide(&mut self);

    /// Release any resources. Called exactly once, before the content is dropped.
    fn destroy(&mut self);

    fn memory(&self) -> ContentMemory;

    fn counts(&self) -> ContentCounts;

    /// Whether feature `feature_id` carries a property called `name`.
    ///
    /// # Panics
    ///
    /// Implementations panic when `feature_id` is out of range; see
    /// [`check_feature_id`].
    fn has_property(&self, feature_id: u64, name: &str) -> bool;

    /// Look up a property value by feature id.
    ///
    /// # Panics
    ///
    /// Same contract as [`has_property`](TileContent::has_property).
    fn get_property(&self, feature_id: u64, name: &str) -> Option<String>;
}

/// Assert that a feature id addresses one of `feature_count` features.
///
/// An out-of-range id is a caller bug, not a runtime condition.
pub fn check_feature_id(feature_id: u64, feature_count: u64) {
    assert!(
        feature_id < feature_count,
        "feature id {feature_id} out of range for {feature_count} features"
    );
}

/// A fetched payload tagged with its variant, handed to the factory.
#[derive(Clone, Debug)]
pub struct ContentPayload {
    /// Resolved URL the bytes came from.
    pub url: String,
    pub variant: ContentVariant,
    pub bytes: Vec<u8>,
}

/// What a finished parse produces.
pub enum LoadedContent {
    Renderable(Box<dyn TileContent>),
    /// Root header of a subtree to attach beneath the requesting tile.
    ExternalTileset(TileHeader),
}

impl fmt::Debug for LoadedContent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Renderable(content) => f
                .debug_tuple("Renderable")
                .field(&content.variant())
                .finish(),
            Self::ExternalTileset(_) => f.write_str("ExternalTileset"),
        }
    }
}

pub type ContentFuture = BoxFuture<'static, Result<LoadedContent, ContentError>>;

/// Builds content from fetched payloads.
///
/// The returned future is the parse stage of a request. It is never
/// cancelled once started.
pub trait ContentFactory: Send + Sync {
    fn create(&self, payload: ContentPayload) -> ContentFuture;
}
