//! # Heap Allocator
//!
//! Variable-length payload blobs live in the heap: a sequence of
//! header-prefixed blocks carved out of the pager's logical address space.
//! Deleting a record marks its blob free but erases nothing; a bounded
//! best-fit cache of recently freed blocks satisfies later allocations of a
//! close-enough size, and everything the cache forgets waits for vacuum.
//!
//! ## Blob Layout
//!
//! ```text
//! Offset  Size  Field    Description
//! ------  ----  -------  ----------------------------------------
//! 0       4     length   Payload length in bytes
//! 4       8     chain    Previously most recent fresh allocation, 0 = end
//! 12      1     free     0 = live, 1 = freed
//! 13      n     payload  Raw bytes, returned verbatim
//! ```
//!
//! ## Best-Fit Cache
//!
//! The cache is a fixed-capacity array of (length, offset) pairs kept sorted
//! ascending by length — a hint table, not a complete free list. An
//! allocation reuses the smallest cached block that fits and is dense
//! enough: `len / cached_len >= 75%`. Reuse rewrites the header length to
//! the new payload length; the tail slack of the old block is unreachable
//! until vacuum. When the cache is full, the smallest entry is evicted (the
//! block stays marked free on disk).
//!
//! This bounds both the cache scan and the fragmentation from insert/delete
//! churn without tracking every free block.
//!
//! ## Allocation Chain
//!
//! Every fresh allocation records the previous chain head in its header and
//! becomes the new head, persisted in the heap super-block. The chain is a
//! diagnostic walk of all fresh allocations in reverse order; cache reuse
//! intentionally does not relink it.

use smallvec::SmallVec;
use zerocopy::big_endian::{U32, U64};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

use crate::config::{BLOB_HEADER_SIZE, FREE_CACHE_CAPACITY, HEAP_SUPER_SIZE, HEAP_VERSION,
    REUSE_DENSITY_PERCENT};
use crate::error::{Error, Result};
use crate::storage::Pager;

#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
struct BlobHeader {
    length: U32,
    chain: U64,
    free: u8,
}

const _: () = assert!(std::mem::size_of::<BlobHeader>() == BLOB_HEADER_SIZE);

#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
struct HeapSuper {
    version: U32,
    last_alloc: U64,
}

const _: () = assert!(std::mem::size_of::<HeapSuper>() == HEAP_SUPER_SIZE);

#[derive(Debug)]
pub struct HeapAllocator {
    super_offset: u64,
    /// Recently freed blocks, sorted ascending by length.
    free_cache: SmallVec<[(u32, u64); FREE_CACHE_CAPACITY]>,
    /// Head of the fresh-allocation chain.
    last_alloc: u64,
}

impl HeapAllocator {
    /// Claims the heap super-block in a fresh store. The caller controls
    /// where it lands by ordering the bootstrap allocations.
    pub fn bootstrap(pager: &mut Pager, super_offset: u64) -> Result<Self> {
        let allocated = pager.alloc(HEAP_SUPER_SIZE as u64)?;
        if allocated != super_offset {
            return Err(Error::corruption(format!(
                "heap super-block landed at {allocated}, expected {super_offset}"
            )));
        }

        let heap = Self {
            super_offset,
            free_cache: SmallVec::new(),
            last_alloc: 0,
        };
        heap.write_super(pager)?;
        Ok(heap)
    }

    /// Reads the heap super-block of an existing store. The free cache
    /// starts empty: it is a transient hint table, never persisted.
    pub fn open(pager: &mut Pager, super_offset: u64) -> Result<Self> {
        let mut buf = [0u8; HEAP_SUPER_SIZE];
        pager.read_at(super_offset, &mut buf)?;

        let sb = HeapSuper::read_from_bytes(&buf)
            .map_err(|e| Error::corruption(format!("unreadable heap super-block: {e:?}")))?;
        if sb.version.get() != HEAP_VERSION {
            return Err(Error::corruption(format!(
                "unsupported heap version {}",
                sb.version.get()
            )));
        }

        Ok(Self {
            super_offset,
            free_cache: SmallVec::new(),
            last_alloc: sb.last_alloc.get(),
        })
    }

    fn write_super(&self, pager: &mut Pager) -> Result<()> {
        let sb = HeapSuper {
            version: U32::new(HEAP_VERSION),
            last_alloc: U64::new(self.last_alloc),
        };
        pager.write_at(self.super_offset, sb.as_bytes())
    }

    fn read_header(pager: &mut Pager, offset: u64) -> Result<BlobHeader> {
        let mut buf = [0u8; BLOB_HEADER_SIZE];
        pager.read_at(offset, &mut buf)?;
        BlobHeader::read_from_bytes(&buf)
            .map_err(|e| Error::corruption(format!("unreadable blob header: {e:?}")))
    }

    /// Stores `payload` in a reused or fresh blob and returns its offset.
    pub fn alloc(&mut self, pager: &mut Pager, payload: &[u8]) -> Result<u64> {
        let len = payload.len() as u64;

        let hit = self.free_cache.iter().position(|(cached_len, _)| {
            len <= *cached_len as u64 && len * 100 >= *cached_len as u64 * REUSE_DENSITY_PERCENT
        });

        let offset = match hit {
            Some(pos) => {
                let (_, offset) = self.free_cache.remove(pos);
                let mut header = Self::read_header(pager, offset)?;
                header.length = U32::new(len as u32);
                header.free = 0;
                pager.write_at(offset, header.as_bytes())?;
                offset
            }
            None => {
                let offset = pager.alloc(BLOB_HEADER_SIZE as u64 + len)?;
                let header = BlobHeader {
                    length: U32::new(len as u32),
                    chain: U64::new(self.last_alloc),
                    free: 0,
                };
                pager.write_at(offset, header.as_bytes())?;
                self.last_alloc = offset;
                self.write_super(pager)?;
                offset
            }
        };

        if !payload.is_empty() {
            pager.write_at(offset + BLOB_HEADER_SIZE as u64, payload)?;
        }
        Ok(offset)
    }

    /// Marks the blob at `offset` free and registers it in the best-fit
    /// cache, evicting the smallest cached block when full.
    pub fn free(&mut self, pager: &mut Pager, offset: u64) -> Result<()> {
        let mut header = Self::read_header(pager, offset)?;
        if header.free != 0 {
            return Err(Error::corruption(format!(
                "double free of blob at offset {offset}"
            )));
        }

        header.free = 1;
        pager.write_at(offset, header.as_bytes())?;

        let len = header.length.get();
        let pos = self.free_cache.partition_point(|(l, _)| *l <= len);

        if self.free_cache.len() == FREE_CACHE_CAPACITY {
            if pos == 0 {
                // The new block would itself be the evicted smallest entry.
                return Ok(());
            }
            self.free_cache.remove(0);
            self.free_cache.insert(pos - 1, (len, offset));
        } else {
            self.free_cache.insert(pos, (len, offset));
        }
        Ok(())
    }

    /// Reads the payload of the blob at `offset`.
    pub fn read(&self, pager: &mut Pager, offset: u64) -> Result<Vec<u8>> {
        if offset == 0 {
            return Err(Error::corruption("read of null blob offset"));
        }

        let header = Self::read_header(pager, offset)?;
        let len = header.length.get() as u64;
        if len > pager.data_size() {
            return Err(Error::corruption(format!(
                "blob at {offset} claims impossible length {len}"
            )));
        }

        let mut payload = vec![0u8; len as usize];
        if len > 0 {
            pager.read_at(offset + BLOB_HEADER_SIZE as u64, &mut payload)?;
        }
        Ok(payload)
    }

    /// Walks the fresh-allocation chain from the most recent blob backwards.
    pub fn chain(&self, pager: &mut Pager) -> Result<Vec<u64>> {
        let mut offsets = Vec::new();
        let mut cursor = self.last_alloc;
        while cursor != 0 {
            offsets.push(cursor);
            cursor = Self::read_header(pager, cursor)?.chain.get();
        }
        Ok(offsets)
    }

    #[cfg(test)]
    fn cached(&self) -> &[(u32, u64)] {
        &self.free_cache
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn fresh_heap() -> (tempfile::TempDir, Pager, HeapAllocator) {
        let dir = tempdir().unwrap();
        let mut pager = Pager::create(dir.path(), 1).unwrap();
        let heap = HeapAllocator::bootstrap(&mut pager, 0).unwrap();
        (dir, pager, heap)
    }

    #[test]
    fn alloc_read_roundtrip() {
        let (_dir, mut pager, mut heap) = fresh_heap();

        let offset = heap.alloc(&mut pager, b"payload bytes").unwrap();

        assert_eq!(heap.read(&mut pager, offset).unwrap(), b"payload bytes");
    }

    #[test]
    fn empty_payload_allocates_header_only() {
        let (_dir, mut pager, mut heap) = fresh_heap();

        let offset = heap.alloc(&mut pager, b"").unwrap();

        assert_eq!(heap.read(&mut pager, offset).unwrap(), b"");
    }

    #[test]
    fn dense_enough_request_reuses_freed_block() {
        let (_dir, mut pager, mut heap) = fresh_heap();

        let offset = heap.alloc(&mut pager, &[7u8; 100]).unwrap();
        heap.free(&mut pager, offset).unwrap();

        // 80 / 100 = 80% >= 75%: the freed block is taken.
        let reused = heap.alloc(&mut pager, &[9u8; 80]).unwrap();

        assert_eq!(reused, offset);
        assert_eq!(heap.read(&mut pager, reused).unwrap(), vec![9u8; 80]);
    }

    #[test]
    fn sparse_request_leaves_freed_block_cached() {
        let (_dir, mut pager, mut heap) = fresh_heap();

        let offset = heap.alloc(&mut pager, &[7u8; 100]).unwrap();
        heap.free(&mut pager, offset).unwrap();

        // 60 / 100 = 60% < 75%: too sparse, allocate fresh.
        let fresh = heap.alloc(&mut pager, &[9u8; 60]).unwrap();

        assert_ne!(fresh, offset);
        assert_eq!(heap.cached(), &[(100, offset)]);
    }

    #[test]
    fn oversized_request_is_rejected() {
        let (_dir, mut pager, mut heap) = fresh_heap();
        let too_big = vec![0u8; pager.data_size() as usize];

        let result = heap.alloc(&mut pager, &too_big);

        assert!(matches!(result, Err(Error::OutOfMemory { .. })));
    }

    #[test]
    fn cache_is_sorted_and_evicts_smallest() {
        let (_dir, mut pager, mut heap) = fresh_heap();

        let mut offsets = Vec::new();
        for len in 1..=FREE_CACHE_CAPACITY as u32 + 1 {
            let offset = heap.alloc(&mut pager, &vec![0u8; len as usize * 10]).unwrap();
            offsets.push((len * 10, offset));
        }
        for (_, offset) in offsets.iter().rev() {
            heap.free(&mut pager, *offset).unwrap();
        }

        let cached = heap.cached();
        assert_eq!(cached.len(), FREE_CACHE_CAPACITY);
        assert!(cached.windows(2).all(|w| w[0].0 <= w[1].0));
        // The length-10 block fell off the small end.
        assert_eq!(cached[0].0, 20);
    }

    #[test]
    fn double_free_is_detected() {
        let (_dir, mut pager, mut heap) = fresh_heap();

        let offset = heap.alloc(&mut pager, b"x").unwrap();
        heap.free(&mut pager, offset).unwrap();

        assert!(matches!(
            heap.free(&mut pager, offset),
            Err(Error::Corruption { .. })
        ));
    }

    #[test]
    fn chain_walks_fresh_allocations_newest_first() {
        let (_dir, mut pager, mut heap) = fresh_heap();

        let a = heap.alloc(&mut pager, b"a").unwrap();
        let b = heap.alloc(&mut pager, b"b").unwrap();
        let c = heap.alloc(&mut pager, b"c").unwrap();

        assert_eq!(heap.chain(&mut pager).unwrap(), vec![c, b, a]);
    }

    #[test]
    fn chain_survives_reopen() {
        let dir = tempdir().unwrap();
        let a;
        let b;
        {
            let mut pager = Pager::create(dir.path(), 1).unwrap();
            let mut heap = HeapAllocator::bootstrap(&mut pager, 0).unwrap();
            a = heap.alloc(&mut pager, b"first").unwrap();
            b = heap.alloc(&mut pager, b"second").unwrap();
            pager.close().unwrap();
        }

        let mut pager = Pager::open(dir.path()).unwrap();
        let heap = HeapAllocator::open(&mut pager, 0).unwrap();

        assert_eq!(heap.chain(&mut pager).unwrap(), vec![b, a]);
        assert_eq!(heap.read(&mut pager, b).unwrap(), b"second");
    }
}
