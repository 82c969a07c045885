//! Hierarchical tile streaming: per-frame selection, prioritized requests
//! and budgeted caching over a tree of bounded, error-rated tiles.

pub mod cache;
pub mod content;
mod error;
mod events;
mod frame;
mod options;
pub mod priority;
pub mod request;
mod statistics;
mod tile;
mod tileset;
mod traversal;

pub use cache::{CacheNodeId, TileCache};
pub use content::{
    ContentCounts, ContentFactory, ContentFuture, ContentMemory, ContentPayload, ContentUpdateContext,
    ContentVariant, LoadedContent, TileContent, check_feature_id,
};
pub use error::{ContentError, TilesetError};
pub use events::{TilesetEvent, TilesetEvents};
pub use frame::{CameraState, CameraTracker, FrameState};
pub use options::TilesetOptions;
pub use priority::{PriorityBounds, PriorityRange, PrioritySample, compute_priority};
pub use request::{ByteFetcher, ContentRequest, FetchError, FetchFuture, RequestProgress};
pub use statistics::Statistics;
pub use strata_bounds::{BoundingVolume, BoundingVolumeHeader};
pub use tile::{
    ContentHeader, ContentState, ExpireHeader, Refine, Tile, TileArena, TileFrameState, TileHeader, TileId,
};
pub use tileset::{Tileset, TilesetDescriptor};
pub use traversal::Selection;
