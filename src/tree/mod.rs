//! # Tree Module
//!
//! The ordered on-disk tree and its two allocators. The engine keeps a
//! balanced tree of fixed-capacity nodes addressed by logical offset, stores
//! variable-length payloads in a blob heap, and carries per-record metadata
//! inside each entry.
//!
//! ## Component Split
//!
//! - `node`: fixed-layout big-endian node and entry codec
//! - `heap`: variable-length blob allocator with a bounded best-fit cache
//! - `alloc`: fixed-size node allocator with a LIFO free list
//! - `cache`: bounded write-through LRU of decoded nodes
//! - `engine`: the tree algorithms (insert/lookup/delete/purge/vacuum)
//!
//! ## Storage Contracts
//!
//! Every node read or write goes through the pager; node blocks come from
//! the index allocator and payload blocks from the heap allocator, both of
//! which fall back to fresh pager allocations when they hold no reusable
//! block. A data offset of 0 always means "no payload"; a child offset of 0
//! always means "no subtree". Offset 0 itself is occupied by the engine
//! super-block, so neither can collide with a real allocation.

mod alloc;
mod cache;
mod engine;
mod heap;
mod node;

pub use alloc::IndexAllocator;
pub use engine::Engine;
pub use heap::HeapAllocator;
pub use node::{Node, TreeEntry};
