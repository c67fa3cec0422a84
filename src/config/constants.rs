//! # Configuration Constants
//!
//! This module centralizes the layout and sizing constants of the storage
//! core. Interdependent values are co-located and cross-checked with
//! compile-time assertions so a change to one cannot silently break another.
//!
//! ## Dependency Graph
//!
//! ```text
//! KEY_LEN (16)
//!   └─> ENTRY_SIZE = KEY_LEN + 2 (metadata) + 8 (data) + 8 (child)
//!         └─> NODE_SIZE = TABLE_SIZE * ENTRY_SIZE + 8 (tail child) + 2 (count)
//!               Must fit one 4 KiB physical page.
//!
//! TABLE_SIZE (120)
//!   ├─> MAX_ENTRIES = TABLE_SIZE - 1
//!   │     A node reaching TABLE_SIZE entries is in the transient overflow
//!   │     state and must split; the on-disk node reserves the extra slot so
//!   │     the split can materialize in place.
//!   └─> MIN_ENTRIES = TABLE_SIZE / 2 - 1
//!         Largest minimum for which a merge still fits:
//!         (MIN-1) + MIN + 1 separator = 2*MIN - ... <= MAX_ENTRIES.
//!
//! BASE_PAGE_SIZE (4096) << DEFAULT_SIZE_EXPONENT (10) = 4 MiB page files
//!   └─> data region per file = page file size - PAGE_RECORD_SIZE
//! ```

use crate::types::KEY_LEN;

// ============================================================================
// NODE LAYOUT
// ============================================================================

/// Entry slots per node. A node holds at most `TABLE_SIZE - 1` entries; the
/// extra on-disk slot absorbs the transient overflow that triggers a split.
pub const TABLE_SIZE: usize = 120;

/// Serialized entry: key + packed metadata + data offset + child offset.
pub const ENTRY_SIZE: usize = KEY_LEN + 2 + 8 + 8;

/// Serialized node: entry slots, trailing child offset, entry count.
pub const NODE_SIZE: usize = TABLE_SIZE * ENTRY_SIZE + 8 + 2;

/// Maximum entries a node may hold between operations.
pub const MAX_ENTRIES: usize = TABLE_SIZE - 1;

/// Minimum entries for a non-root node; dropping below triggers borrow/merge.
pub const MIN_ENTRIES: usize = TABLE_SIZE / 2 - 1;

const _: () = assert!(NODE_SIZE <= 4096, "node must fit one physical page");

const _: () = assert!(
    2 * MIN_ENTRIES <= MAX_ENTRIES,
    "merging two minimum-occupancy nodes plus the separator must fit one node"
);

// ============================================================================
// PAGE GEOMETRY
// ============================================================================

/// Base unit of the page-file size computation.
pub const BASE_PAGE_SIZE: u64 = 4096;

/// Default size exponent: page file size = BASE_PAGE_SIZE << exponent = 4 MiB.
pub const DEFAULT_SIZE_EXPONENT: u8 = 10;

/// Bytes reserved at the head of each page file for its page record.
pub const PAGE_RECORD_SIZE: usize = 64;

/// Current on-disk format version, checked on open.
pub const FORMAT_VERSION: u16 = 1;

// ============================================================================
// SUPER-BLOCK PLACEMENT
// These two offsets are the contract with the base/config layer: the engine
// reads its super-blocks at these logical addresses on open.
// ============================================================================

/// Engine super-block {version, root offset, index free-list head}.
pub const ENGINE_SUPER_OFFSET: u64 = 0;
pub const ENGINE_SUPER_SIZE: usize = 4 + 8 + 8;

/// Heap super-block {version, most recent allocation offset}.
pub const HEAP_SUPER_OFFSET: u64 = ENGINE_SUPER_SIZE as u64;
pub const HEAP_SUPER_SIZE: usize = 4 + 8;

pub const ENGINE_VERSION: u32 = 1;
pub const HEAP_VERSION: u32 = 1;

// ============================================================================
// HEAP ALLOCATOR
// ============================================================================

/// Blob header: length + chain pointer + free flag.
pub const BLOB_HEADER_SIZE: usize = 4 + 8 + 1;

/// Capacity of the best-fit free-block cache. Freed blocks beyond this are
/// only reclaimable by vacuum.
pub const FREE_CACHE_CAPACITY: usize = 32;

/// A cached free block of length `c` is reused for a request of length `l`
/// when `l * 100 >= c * REUSE_DENSITY_PERCENT`.
pub const REUSE_DENSITY_PERCENT: u64 = 75;

// ============================================================================
// NODE CACHE
// ============================================================================

/// Decoded nodes held by the bounded LRU node cache.
pub const NODE_CACHE_CAPACITY: usize = 64;
