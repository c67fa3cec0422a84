//! # Storage Module
//!
//! The storage layer virtualizes a single growing logical address space over
//! a set of fixed-size page files. Everything above it — the tree, the heap,
//! the allocators — addresses bytes by 64-bit logical offset and never
//! touches a file directly.
//!
//! ## Directory Layout
//!
//! ```text
//! store_dir/
//! ├── page.000000      # page file 0 (super-blocks live in its data region)
//! ├── page.000001      # created when file 0's data region fills
//! └── ...
//! ```
//!
//! Each file is exactly `BASE_PAGE_SIZE << size_exponent` bytes. The first
//! [`PAGE_RECORD_SIZE`](crate::config::PAGE_RECORD_SIZE) bytes hold the page
//! record (magic, version, sequence, exit-status marker, CRC-64); the rest is
//! the data region mapped into the logical address space.
//!
//! ## Address Translation
//!
//! ```text
//! file index      = offset / data_region_size
//! in-file offset  = PAGE_RECORD_SIZE + offset % data_region_size
//! ```
//!
//! A file index beyond the open-file table is a consistency error, not a
//! recoverable condition: offsets only enter the system through the pager's
//! own allocator.
//!
//! ## Crash Detection
//!
//! Page records are written lazily. The exit-status marker flips to OPEN
//! before the first data write after a checkpoint and back to CLEAN — along
//! with a freshly computed CRC-64 of the data region — only at sync/close.
//! A marker that reads anything but CLEAN on the next open therefore signals
//! an unflushed crash, and the CRC detects corruption only between
//! checkpoints, never in-flight.
//!
//! ## Module Organization
//!
//! - `page`: page-record codec and exit-status markers
//! - `pager`: file table, allocation, address translation, checkpointing

mod page;
mod pager;

pub use page::{ExitStatus, PageRecord, PAGE_MAGIC};
pub use pager::Pager;
