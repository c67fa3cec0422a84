//! # Index Allocator
//!
//! Tree nodes are all the same size, so recycling them needs no fit logic at
//! all: freed node blocks form a LIFO free list whose links are threaded
//! through the freed node's own trailing child-pointer field. Allocation pops
//! the head in O(1); when the list is empty, the pager supplies a fresh
//! block.
//!
//! The list head lives in the engine super-block and is persisted by the
//! engine alongside the root offset.

use zerocopy::big_endian::U64;
use zerocopy::IntoBytes;

use crate::config::{ENTRY_SIZE, NODE_SIZE, TABLE_SIZE};
use crate::error::Result;
use crate::storage::Pager;

/// Position of the free-list link inside a recycled node block: the trailing
/// child-pointer field.
const LINK_OFFSET: u64 = (TABLE_SIZE * ENTRY_SIZE) as u64;

#[derive(Debug)]
pub struct IndexAllocator {
    free_head: u64,
}

impl IndexAllocator {
    pub fn new(free_head: u64) -> Self {
        Self { free_head }
    }

    pub fn free_head(&self) -> u64 {
        self.free_head
    }

    /// Pops a recycled node block, or reserves a fresh one from the pager.
    pub fn alloc(&mut self, pager: &mut Pager) -> Result<u64> {
        if self.free_head == 0 {
            return pager.alloc(NODE_SIZE as u64);
        }

        let offset = self.free_head;
        let mut link = [0u8; 8];
        pager.read_at(offset + LINK_OFFSET, &mut link)?;
        self.free_head = u64::from_be_bytes(link);
        Ok(offset)
    }

    /// Pushes an emptied node block onto the free list, overwriting its
    /// trailing child-pointer field with the list link.
    pub fn free(&mut self, pager: &mut Pager, offset: u64) -> Result<()> {
        let link = U64::new(self.free_head);
        pager.write_at(offset + LINK_OFFSET, link.as_bytes())?;
        self.free_head = offset;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn fresh_blocks_come_from_the_pager() {
        let dir = tempdir().unwrap();
        let mut pager = Pager::create(dir.path(), 1).unwrap();
        let mut alloc = IndexAllocator::new(0);

        let a = alloc.alloc(&mut pager).unwrap();
        let b = alloc.alloc(&mut pager).unwrap();

        assert_ne!(a, b);
        assert_eq!(alloc.free_head(), 0);
    }

    #[test]
    fn free_list_is_lifo() {
        let dir = tempdir().unwrap();
        let mut pager = Pager::create(dir.path(), 1).unwrap();
        let mut alloc = IndexAllocator::new(0);

        let a = alloc.alloc(&mut pager).unwrap();
        let b = alloc.alloc(&mut pager).unwrap();

        alloc.free(&mut pager, a).unwrap();
        alloc.free(&mut pager, b).unwrap();

        assert_eq!(alloc.alloc(&mut pager).unwrap(), b);
        assert_eq!(alloc.alloc(&mut pager).unwrap(), a);
        assert_eq!(alloc.free_head(), 0);
    }

    #[test]
    fn links_survive_reopen() {
        let dir = tempdir().unwrap();
        let a;
        let b;
        let head;
        {
            let mut pager = Pager::create(dir.path(), 1).unwrap();
            let mut alloc = IndexAllocator::new(0);
            a = alloc.alloc(&mut pager).unwrap();
            b = alloc.alloc(&mut pager).unwrap();
            alloc.free(&mut pager, a).unwrap();
            alloc.free(&mut pager, b).unwrap();
            head = alloc.free_head();
            pager.close().unwrap();
        }

        let mut pager = Pager::open(dir.path()).unwrap();
        let mut alloc = IndexAllocator::new(head);

        assert_eq!(alloc.alloc(&mut pager).unwrap(), b);
        assert_eq!(alloc.alloc(&mut pager).unwrap(), a);
    }
}
