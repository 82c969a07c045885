//! Observer notifications raised by the tileset.

use tracing::warn;

use crate::tile::TileId;

/// Something that happened to a tile during [`Tileset::update`](crate::Tileset::update).
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TilesetEvent {
    /// Content finished loading and the tile is now resident.
    TileLoaded(TileId),
    /// A fetch or parse failed. The tile stays `Failed` until unloaded.
    TileFailed {
        tile: TileId,
        url: String,
        message: String,
    },
    /// Content was evicted.
    TileUnloaded(TileId),
    /// The tile is about to be updated as part of this frame's selection.
    TileVisible(TileId),
}

type Listener = Box<dyn FnMut(&TilesetEvent) + Send>;

/// Listener registry. Listeners run synchronously in registration order.
#[derive(Default)]
pub struct TilesetEvents {
    listeners: Vec<Listener>,
}

impl TilesetEvents {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&mut self, listener: impl FnMut(&TilesetEvent) + Send + 'static) {
        self.listeners.push(Box::new(listener));
    }

    pub fn has_listeners(&self) -> bool {
        !self.listeners.is_empty()
    }

    pub fn emit(&mut self, event: TilesetEvent) {
        if self.listeners.is_empty() {
            if let TilesetEvent::TileFailed { url, message, .. } = &event {
                warn!(url = url.as_str(), message = message.as_str(), "tile failed to load");
            }
            return;
        }
        for listener in &mut self.listeners {
            listener(&event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    /// Every listener sees every event in order.
    #[test]
    fn test_listeners_receive_events() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut events = TilesetEvents::new();
        for _ in 0..2 {
            let seen = Arc::clone(&seen);
            events.subscribe(move |event| seen.lock().unwrap().push(event.clone()));
        }
        events.emit(TilesetEvent::TileLoaded(TileId::new(3)));
        events.emit(TilesetEvent::TileUnloaded(TileId::new(3)));
        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 4);
        assert_eq!(seen[0], TilesetEvent::TileLoaded(TileId::new(3)));
        assert_eq!(seen[3], TilesetEvent::TileUnloaded(TileId::new(3)));
    }

    /// Failures with nobody listening are logged instead of dropped.
    #[test]
    fn test_failure_without_listeners_does_not_panic() {
        let mut events = TilesetEvents::new();
        assert!(!events.has_listeners());
        events.emit(TilesetEvent::TileFailed {
            tile: TileId::new(0),
            url: "a.b3dm".into(),
            message: "404".into(),
        });
    }
}
