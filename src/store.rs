//! # Store Facade
//!
//! [`Store`] is the public surface of the storage core: it owns the pager,
//! the engine, and both allocators, and exposes the record operations the
//! rest of a database system builds on.
//!
//! ## Lifecycle
//!
//! ```ignore
//! let mut store = Store::create("./data")?;
//! store.insert(key, Metadata::default(), b"payload")?;
//! let offset = store.get(&key)?;
//! let bytes = store.read_blob(offset)?;
//! store.close()?;
//! ```
//!
//! Reopening goes through [`Store::open`]; if
//! [`Store::was_clean_shutdown`] then reports `false`, the previous process
//! died with unflushed state and the store should be vacuumed into a fresh
//! directory with [`rebuild`] before further writes are trusted.
//!
//! Dropping a `Store` without [`Store::close`] deliberately writes nothing:
//! the exit-status markers stay OPEN, which is exactly how the next open
//! detects the crash.
//!
//! ## What the facade does not do
//!
//! Payload bytes are stored and returned verbatim, never parsed. There is no
//! internal locking: callers in a threaded program must serialize access
//! themselves.

use std::path::Path;

use tracing::warn;

use crate::config::{DEFAULT_SIZE_EXPONENT, ENGINE_SUPER_OFFSET, HEAP_SUPER_OFFSET};
use crate::error::Result;
use crate::storage::Pager;
use crate::tree::Engine;
use crate::types::{Key, Metadata};

#[derive(Debug, Clone, Copy)]
pub struct Options {
    /// Page file size = 4096 << size_exponent.
    pub size_exponent: u8,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            size_exponent: DEFAULT_SIZE_EXPONENT,
        }
    }
}

#[derive(Debug)]
pub struct Store {
    engine: Engine,
}

impl Store {
    pub fn create<P: AsRef<Path>>(dir: P) -> Result<Self> {
        Self::create_with(dir, Options::default())
    }

    pub fn create_with<P: AsRef<Path>>(dir: P, options: Options) -> Result<Self> {
        let pager = Pager::create(dir, options.size_exponent)?;
        let engine = Engine::bootstrap(pager, ENGINE_SUPER_OFFSET, HEAP_SUPER_OFFSET)?;
        Ok(Self { engine })
    }

    pub fn open<P: AsRef<Path>>(dir: P) -> Result<Self> {
        let dir = dir.as_ref();
        let pager = Pager::open(dir)?;
        if !pager.was_clean() {
            warn!(
                dir = %dir.display(),
                "store was not cleanly closed; vacuum into a fresh store before trusting writes"
            );
        }
        let engine = Engine::open(pager, ENGINE_SUPER_OFFSET, HEAP_SUPER_OFFSET)?;
        Ok(Self { engine })
    }

    /// Whether the previous process checkpointed this store on its way out.
    pub fn was_clean_shutdown(&self) -> bool {
        self.engine.was_clean()
    }

    /// Checkpoint: recompute page CRCs and write CLEAN exit markers.
    pub fn sync(&mut self) -> Result<()> {
        self.engine.sync()
    }

    pub fn close(self) -> Result<()> {
        self.engine.close()
    }

    /// Makes the purge tie-break deterministic; intended for tests.
    pub fn seed_rng(&mut self, seed: u64) {
        self.engine.seed_rng(seed);
    }

    // ------------------------------------------------------------------
    // Record operations
    // ------------------------------------------------------------------

    pub fn insert(&mut self, key: Key, metadata: Metadata, payload: &[u8]) -> Result<()> {
        self.engine.insert(key, metadata, payload)
    }

    /// Data offset of a live record. Soft-deleted records read as absent.
    pub fn get(&mut self, key: &Key) -> Result<u64> {
        self.engine.get(key)
    }

    /// Data offset regardless of lifecycle state.
    pub fn get_force(&mut self, key: &Key) -> Result<u64> {
        self.engine.get_force(key)
    }

    pub fn get_metadata(&mut self, key: &Key) -> Result<Metadata> {
        self.engine.get_metadata(key)
    }

    pub fn set_metadata(&mut self, key: &Key, metadata: Metadata) -> Result<()> {
        self.engine.set_metadata(key, metadata)
    }

    /// Soft delete: marks the record RECYCLE, leaving it in the tree.
    pub fn delete(&mut self, key: &Key) -> Result<()> {
        self.engine.delete(key)
    }

    /// Hard delete: removes the entry and reclaims its storage.
    pub fn purge(&mut self, key: &Key) -> Result<()> {
        self.engine.purge(key)
    }

    /// Replaces a record's payload, leaving structure and metadata alone.
    pub fn update(&mut self, key: &Key, payload: &[u8]) -> Result<()> {
        self.engine.update(key, payload)
    }

    /// Reads the payload bytes at a heap offset returned by `get`.
    pub fn read_blob(&mut self, offset: u64) -> Result<Vec<u8>> {
        self.engine.read_blob(offset)
    }

    /// In-order key/metadata walk; diagnostic.
    pub fn keys_in_order(&mut self) -> Result<Vec<(Key, Metadata)>> {
        self.engine.keys_in_order()
    }

    /// Walks the heap's fresh-allocation chain, newest first; diagnostic.
    pub fn heap_chain(&mut self) -> Result<Vec<u64>> {
        self.engine.heap_chain()
    }

    /// Vacuums every live record into `dst`; see [`rebuild`].
    pub fn rebuild_into(&mut self, dst: &mut Store) -> Result<()> {
        self.engine.rebuild_into(&mut dst.engine)
    }
}

/// Full compaction pass: copies every FINITE record of `src` into the
/// freshly created `dst`, leaving tombstones, freed blobs, and fragmentation
/// behind. Also the designated recovery path after an unclean shutdown.
pub fn rebuild(src: &mut Store, dst: &mut Store) -> Result<()> {
    src.rebuild_into(dst)
}
