//! Stand-in renderable content for the demo.
//!
//! Nothing is drawn. The content tracks its visibility and reports a memory
//! footprint and triangle count derived from the payload size, which is
//! enough to exercise selection, budgeting and statistics.

use futures::FutureExt;
use futures::future;
use strata_tiles::{
    ContentCounts, ContentError, ContentFactory, ContentFuture, ContentMemory, ContentPayload,
    ContentUpdateContext, ContentVariant, FrameState, LoadedContent, TileContent, TilesetDescriptor,
    check_feature_id,
};
use tracing::trace;

/// Decoded geometry is assumed to be this many times larger than its payload.
const DECODE_EXPANSION: usize = 4;
const BYTES_PER_TRIANGLE: usize = 36;
const FEATURES_PER_TILE: u64 = 16;

pub struct SyntheticContent {
    url: String,
    variant: ContentVariant,
    payload_bytes: usize,
    visible: bool,
    last_selection_depth: u32,
}

impl TileContent for SyntheticContent {
    fn variant(&self) -> ContentVariant {
        self.variant
    }

    fn update(&mut self, context: &ContentUpdateContext, frame: &FrameState) {
        if context.selection_depth != self.last_selection_depth {
            trace!(
                url = %self.url,
                frame = frame.frame_number,
                depth = context.selection_depth,
                visible = self.visible,
                "selection depth changed"
            );
            self.last_selection_depth = context.selection_depth;
        }
    }

    fn show(&mut self) {
        self.visible = true;
    }

    fn hide(&mut self) {
        self.visible = false;
    }

    fn destroy(&mut self) {
        self.visible = false;
        self.payload_bytes = 0;
    }

    fn memory(&self) -> ContentMemory {
        ContentMemory {
            geometry_bytes: self.payload_bytes * DECODE_EXPANSION,
            texture_bytes: self.payload_bytes,
            auxiliary_table_bytes: FEATURES_PER_TILE as usize * 8,
        }
    }

    fn counts(&self) -> ContentCounts {
        ContentCounts {
            feature_count: FEATURES_PER_TILE,
            point_count: 0,
            triangle_count: (self.payload_bytes * DECODE_EXPANSION / BYTES_PER_TRIANGLE) as u64,
        }
    }

    fn has_property(&self, feature_id: u64, name: &str) -> bool {
        check_feature_id(feature_id, FEATURES_PER_TILE);
        name == "id"
    }

    fn get_property(&self, feature_id: u64, name: &str) -> Option<String> {
        self.has_property(feature_id, name)
            .then(|| format!("{}#{feature_id}", self.url))
    }
}

/// Turns payloads into [`SyntheticContent`], or into subtrees for JSON.
pub struct SyntheticFactory;

impl ContentFactory for SyntheticFactory {
    fn create(&self, payload: ContentPayload) -> ContentFuture {
        let loaded = match payload.variant {
            ContentVariant::ExternalTileset => TilesetDescriptor::from_json(&payload.bytes, payload.url)
                .map(|descriptor| LoadedContent::ExternalTileset(descriptor.root))
                .map_err(ContentError::from),
            variant => {
                let content: Box<dyn TileContent> = Box::new(SyntheticContent {
                    url: payload.url,
                    variant,
                    payload_bytes: payload.bytes.len(),
                    visible: false,
                    last_selection_depth: 0,
                });
                Ok(LoadedContent::Renderable(content))
            }
        };
        future::ready(loaded).boxed()
    }
}
