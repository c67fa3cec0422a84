//! # BurrowDB Storage Core
//!
//! An embedded, single-process key-value storage engine: a disk-resident
//! ordered index over fixed 16-byte identifiers, backed by a segmented heap
//! of variable-length payloads, with per-record metadata (lifecycle, locks,
//! type) and vacuum-based compaction.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────┐
//! │          Public API (Store)          │
//! ├──────────────────┬──────────────────┤
//! │   Engine (tree)  │  Metadata rules  │
//! ├─────────┬────────┴─┬────────────────┤
//! │  Index  │   Heap   │   Node cache   │
//! │  alloc  │   alloc  │   (LRU)        │
//! ├─────────┴──────────┴────────────────┤
//! │   Pager (logical address space)      │
//! ├─────────────────────────────────────┤
//! │   Fixed-size page files + CRC-64     │
//! └─────────────────────────────────────┘
//! ```
//!
//! The engine keeps a balanced tree of fixed-capacity nodes addressed by
//! 64-bit logical offsets. The pager maps those offsets onto a growing set
//! of fixed-size page files. Two allocators with different reuse strategies
//! sit in between: a LIFO free list for the identically-sized node blocks,
//! and a bounded best-fit cache for variable-length payload blobs.
//!
//! ## File Layout
//!
//! ```text
//! store_dir/
//! ├── page.000000      # super-blocks + first nodes and blobs
//! ├── page.000001
//! └── ...
//! ```
//!
//! ## Deletion Model
//!
//! Records die twice. A soft delete flips the lifecycle to RECYCLE: the
//! entry stays in the tree, invisible to filtered lookups but recoverable
//! through the force variant. A purge removes the entry structurally and
//! recycles its storage. Vacuuming into a fresh store drops tombstones and
//! fragmentation for good.
//!
//! ## Concurrency and Crash Model
//!
//! Single-threaded and synchronous; callers serialize access externally.
//! There is no write-ahead log: structural multi-node updates are not
//! atomic, and the recovery path for a crash is detection (exit-status
//! markers) plus a rebuild into a fresh store.
//!
//! ## What this crate is not
//!
//! Payload bytes are opaque — schema-aware serialization, key generation,
//! query parsing, and networking all live in other layers.

pub mod config;
pub mod error;
pub mod storage;
pub mod store;
pub mod tree;
pub mod types;

pub use error::{Error, Result};
pub use store::{rebuild, Options, Store};
pub use types::{Key, Lifecycle, Metadata, RecordType};
