//! LRU list of tiles with resident content.
//!
//! The list is split by a sentinel node. Every frame the sentinel may be
//! moved to the tail with [`TileCache::reset`]; tiles touched afterwards are
//! spliced in right after it. Everything left of the sentinel was not used
//! since the last reset and is ordered least- to most-recently used, which is
//! exactly the eviction order [`TileCache::unload_tiles`] walks.

use crate::tile::TileId;

/// Handle to a node in the cache list.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct CacheNodeId(usize);

#[derive(Clone, Copy, Debug)]
struct Node {
    /// `None` only for the sentinel and for free slots.
    tile: Option<TileId>,
    prev: Option<usize>,
    next: Option<usize>,
}

/// Index-linked doubly linked list with a movable sentinel.
#[derive(Debug)]
pub struct TileCache {
    nodes: Vec<Node>,
    free: Vec<usize>,
    head: usize,
    tail: usize,
    sentinel: usize,
    len: usize,
    trim_requested: bool,
}

impl Default for TileCache {
    fn default() -> Self {
        Self::new()
    }
}

impl TileCache {
    pub fn new() -> Self {
        let sentinel = Node {
            tile: None,
            prev: None,
            next: None,
        };
        Self {
            nodes: vec![sentinel],
            free: Vec::new(),
            head: 0,
            tail: 0,
            sentinel: 0,
            len: 0,
            trim_requested: false,
        }
    }

    /// Number of tiles in the cache.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Move the sentinel to the tail so every tile becomes an eviction
    /// candidate until touched again.
    pub fn reset(&mut self) {
        let tail = self.tail;
        self.splice_after(tail, self.sentinel);
    }

    /// Mark a resident tile as used this frame.
    pub fn touch(&mut self, node: CacheNodeId) {
        let sentinel = self.sentinel;
        self.splice_after(sentinel, node.0);
    }

    /// Append a newly resident tile. New tiles count as used this frame.
    pub fn add(&mut self, tile: TileId) -> CacheNodeId {
        let node = Node {
            tile: Some(tile),
            prev: Some(self.tail),
            next: None,
        };
        let index = match self.free.pop() {
            Some(index) => {
                self.nodes[index] = node;
                index
            }
            None => {
                self.nodes.push(node);
                self.nodes.len() - 1
            }
        };
        self.nodes[self.tail].next = Some(index);
        self.tail = index;
        self.len += 1;
        CacheNodeId(index)
    }

    /// Remove a tile's node. The caller clears the tile's back-reference.
    pub fn remove(&mut self, node: CacheNodeId) {
        let index = node.0;
        if index == self.sentinel || self.nodes[index].tile.is_none() {
            return;
        }
        self.unlink(index);
        self.nodes[index] = Node {
            tile: None,
            prev: None,
            next: None,
        };
        self.free.push(index);
        self.len -= 1;
    }

    /// Evict every candidate on the next [`unload_tiles`](Self::unload_tiles),
    /// regardless of the memory budget.
    pub fn trim(&mut self) {
        self.trim_requested = true;
    }

    /// Walk eviction candidates from least recently used while `over_budget`
    /// holds or a trim was requested. The node is removed before `unload`
    /// runs; `unload` returns whether memory is still over budget.
    pub fn unload_tiles(&mut self, mut over_budget: bool, mut unload: impl FnMut(TileId) -> bool) {
        let trim = std::mem::take(&mut self.trim_requested);
        let mut cursor = Some(self.head);
        while let Some(index) = cursor {
            if index == self.sentinel || !(over_budget || trim) {
                break;
            }
            cursor = self.nodes[index].next;
            let Some(tile) = self.nodes[index].tile else {
                continue;
            };
            self.remove(CacheNodeId(index));
            over_budget = unload(tile);
        }
    }

    /// Tiles left of the sentinel, least recently used first.
    pub fn eviction_candidates(&self) -> Vec<TileId> {
        self.iter_from(Some(self.head))
            .take_while(|&index| index != self.sentinel)
            .filter_map(|index| self.nodes[index].tile)
            .collect()
    }

    /// Tiles right of the sentinel, most recently touched first.
    pub fn used_this_frame(&self) -> Vec<TileId> {
        self.iter_from(self.nodes[self.sentinel].next)
            .filter_map(|index| self.nodes[index].tile)
            .collect()
    }

    fn iter_from(&self, start: Option<usize>) -> impl Iterator<Item = usize> + '_ {
        std::iter::successors(start, move |&index| self.nodes[index].next)
    }

    fn unlink(&mut self, index: usize) {
        let Node { prev, next, .. } = self.nodes[index];
        match prev {
            Some(prev) => self.nodes[prev].next = next,
            None => {
                if let Some(next) = next {
                    self.head = next;
                }
            }
        }
        match next {
            Some(next) => self.nodes[next].prev = prev,
            None => {
                if let Some(prev) = prev {
                    self.tail = prev;
                }
            }
        }
        self.nodes[index].prev = None;
        self.nodes[index].next = None;
    }

    /// Move `index` to sit immediately after `anchor`.
    fn splice_after(&mut self, anchor: usize, index: usize) {
        if anchor == index || self.nodes[anchor].next == Some(index) {
            return;
        }
        self.unlink(index);
        let next = self.nodes[anchor].next;
        self.nodes[index].prev = Some(anchor);
        self.nodes[index].next = next;
        self.nodes[anchor].next = Some(index);
        match next {
            Some(next) => self.nodes[next].prev = Some(index),
            None => self.tail = index,
        }
    }
}
