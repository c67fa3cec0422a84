//! # Node Cache
//!
//! A bounded LRU of decoded nodes keyed by logical offset, sitting between
//! the engine and the pager. Semantics are deliberately simple:
//!
//! - **Read-through**: a miss decodes from the pager and populates the cache.
//! - **Write-through**: every node store updates the cache and the pager
//!   together, so a hit is never stale.
//! - **Invalidate on free**: a recycled node block is dropped from the cache
//!   before its bytes are reused as a free-list link.
//!
//! Entries survive across calls; callers may rely on repeated reads of a hot
//! node being memory-speed.

use std::num::NonZeroUsize;

use lru::LruCache;

use crate::config::NODE_CACHE_CAPACITY;

use super::node::Node;

pub struct NodeCache {
    nodes: LruCache<u64, Box<Node>>,
}

impl std::fmt::Debug for NodeCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeCache")
            .field("len", &self.nodes.len())
            .field("cap", &self.nodes.cap())
            .finish()
    }
}

impl NodeCache {
    pub fn new() -> Self {
        Self {
            nodes: LruCache::new(
                NonZeroUsize::new(NODE_CACHE_CAPACITY).expect("cache capacity is nonzero"),
            ),
        }
    }

    pub fn get(&mut self, offset: u64) -> Option<Box<Node>> {
        self.nodes.get(&offset).cloned()
    }

    pub fn put(&mut self, offset: u64, node: Box<Node>) {
        self.nodes.put(offset, node);
    }

    pub fn invalidate(&mut self, offset: u64) {
        self.nodes.pop(&offset);
    }
}

impl Default for NodeCache {
    fn default() -> Self {
        Self::new()
    }
}
