//! # Engine
//!
//! The engine maintains the ordered tree of fixed-capacity nodes and drives
//! the two allocators. All structure lives on disk: nodes reference each
//! other by logical offset, every node read or write goes through the pager,
//! and the only persistent anchors are the two super-blocks.
//!
//! ## Insert
//!
//! Recursive descent by binary search. A duplicate anywhere on the path is
//! `AlreadyExists` before anything is allocated. At a leaf the payload blob
//! is allocated first, then the entry goes in at its sorted position. A node
//! that reaches `TABLE_SIZE` entries splits at the midpoint on the way back
//! up: the median entry is promoted into the parent, a fresh right sibling
//! takes the upper half, and a root split grows the tree by one level.
//!
//! ## Lookup
//!
//! Iterative descent. By default a match whose lifecycle is not FINITE is
//! reported as `NotFound` — soft-deleted records are structurally present
//! but invisible; the force variant bypasses the filter.
//!
//! ## Purge
//!
//! Structural removal. A leaf entry is shifted out directly. An internal
//! entry is overwritten by its in-order predecessor or successor — the side
//! is chosen at random per operation to spread structural load — and the
//! replacement is then removed from the subtree it came from. A node left
//! below minimum occupancy borrows one entry through the parent separator
//! (left sibling preferred) or, when neither sibling can spare one, merges
//! into its left sibling; the emptied node block goes back to the index free
//! list and the underflow propagates upward. A root left with zero entries
//! hands its single child the root role, shrinking the tree by one level.
//!
//! ## Vacuum
//!
//! `rebuild_into` walks the tree in pre-order and re-inserts every FINITE
//! entry into a brand-new engine/heap pair. Tombstones, freed blobs, and
//! unreachable page-file tails all stay behind; this is the engine's only
//! compaction mechanism and the designated recovery path after an unclean
//! shutdown.

use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use zerocopy::big_endian::{U32, U64};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

use crate::config::{
    ENGINE_SUPER_SIZE, ENGINE_VERSION, MIN_ENTRIES, NODE_SIZE, TABLE_SIZE,
};
use crate::error::{Error, Result};
use crate::storage::Pager;
use crate::types::{Key, Lifecycle, Metadata};

use super::alloc::IndexAllocator;
use super::cache::NodeCache;
use super::heap::HeapAllocator;
use super::node::{Node, TreeEntry};

#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
struct EngineSuper {
    version: U32,
    root: U64,
    free_head: U64,
}

const _: () = assert!(std::mem::size_of::<EngineSuper>() == ENGINE_SUPER_SIZE);

/// A split result travelling up the insert recursion: the median entry (its
/// child pointer is assigned by the receiving level) and the new right
/// sibling.
struct Promotion {
    entry: TreeEntry,
    right: u64,
}

#[derive(Debug)]
pub struct Engine {
    pager: Pager,
    index: IndexAllocator,
    heap: HeapAllocator,
    cache: NodeCache,
    rng: SmallRng,
    root: u64,
    super_offset: u64,
}

impl Engine {
    /// Lays out a fresh store: engine super-block, heap super-block, and an
    /// empty root leaf. The two super offsets come from the configuration
    /// layer; the bootstrap allocations must land exactly there.
    pub fn bootstrap(
        mut pager: Pager,
        engine_super_offset: u64,
        heap_super_offset: u64,
    ) -> Result<Self> {
        let allocated = pager.alloc(ENGINE_SUPER_SIZE as u64)?;
        if allocated != engine_super_offset {
            return Err(Error::corruption(format!(
                "engine super-block landed at {allocated}, expected {engine_super_offset}"
            )));
        }

        let heap = HeapAllocator::bootstrap(&mut pager, heap_super_offset)?;
        let mut index = IndexAllocator::new(0);
        let root = index.alloc(&mut pager)?;

        let mut engine = Self {
            pager,
            index,
            heap,
            cache: NodeCache::new(),
            rng: SmallRng::from_entropy(),
            root,
            super_offset: engine_super_offset,
        };
        engine.store_node(root, &Node::empty())?;
        engine.write_super()?;
        Ok(engine)
    }

    pub fn open(
        mut pager: Pager,
        engine_super_offset: u64,
        heap_super_offset: u64,
    ) -> Result<Self> {
        let mut buf = [0u8; ENGINE_SUPER_SIZE];
        pager.read_at(engine_super_offset, &mut buf)?;
        let sb = EngineSuper::read_from_bytes(&buf)
            .map_err(|e| Error::corruption(format!("unreadable engine super-block: {e:?}")))?;
        if sb.version.get() != ENGINE_VERSION {
            return Err(Error::corruption(format!(
                "unsupported engine version {}",
                sb.version.get()
            )));
        }

        let heap = HeapAllocator::open(&mut pager, heap_super_offset)?;

        Ok(Self {
            pager,
            index: IndexAllocator::new(sb.free_head.get()),
            heap,
            cache: NodeCache::new(),
            rng: SmallRng::from_entropy(),
            root: sb.root.get(),
            super_offset: engine_super_offset,
        })
    }

    /// Replaces the structural-load-balancing RNG with a seeded one, making
    /// the purge replacement choice deterministic.
    pub fn seed_rng(&mut self, seed: u64) {
        self.rng = SmallRng::seed_from_u64(seed);
    }

    pub fn was_clean(&self) -> bool {
        self.pager.was_clean()
    }

    pub fn sync(&mut self) -> Result<()> {
        self.pager.sync()
    }

    pub fn close(self) -> Result<()> {
        self.pager.close()
    }

    // ------------------------------------------------------------------
    // Node I/O
    // ------------------------------------------------------------------

    fn load_node(&mut self, offset: u64) -> Result<Box<Node>> {
        if let Some(node) = self.cache.get(offset) {
            return Ok(node);
        }

        let mut buf = vec![0u8; NODE_SIZE];
        self.pager.read_at(offset, &mut buf)?;
        let node = Node::decode(&buf)?;
        self.cache.put(offset, node.clone());
        Ok(node)
    }

    fn store_node(&mut self, offset: u64, node: &Node) -> Result<()> {
        self.pager.write_at(offset, node.encoded())?;
        self.cache.put(offset, Box::new(node.clone()));
        Ok(())
    }

    fn alloc_node(&mut self) -> Result<u64> {
        let offset = self.index.alloc(&mut self.pager)?;
        self.write_super()?;
        Ok(offset)
    }

    fn free_node(&mut self, offset: u64) -> Result<()> {
        self.cache.invalidate(offset);
        self.index.free(&mut self.pager, offset)?;
        self.write_super()
    }

    fn write_super(&mut self) -> Result<()> {
        let sb = EngineSuper {
            version: U32::new(ENGINE_VERSION),
            root: U64::new(self.root),
            free_head: U64::new(self.index.free_head()),
        };
        self.pager.write_at(self.super_offset, sb.as_bytes())
    }

    // ------------------------------------------------------------------
    // Lookup
    // ------------------------------------------------------------------

    fn find(&mut self, key: &Key, force: bool) -> Result<(u64, usize, TreeEntry)> {
        let mut offset = self.root;
        loop {
            let node = self.load_node(offset)?;
            match node.search(key) {
                Ok(index) => {
                    let entry = *node.entry(index);
                    if !force && !entry.metadata().is_live() {
                        return Err(Error::NotFound { key: *key });
                    }
                    return Ok((offset, index, entry));
                }
                Err(bracket) => {
                    let child = node.bracket(bracket);
                    if child == 0 {
                        return Err(Error::NotFound { key: *key });
                    }
                    offset = child;
                }
            }
        }
    }

    /// Data offset of a live record; tombstones read as absent.
    pub fn get(&mut self, key: &Key) -> Result<u64> {
        Ok(self.find(key, false)?.2.data())
    }

    /// Data offset regardless of lifecycle state.
    pub fn get_force(&mut self, key: &Key) -> Result<u64> {
        Ok(self.find(key, true)?.2.data())
    }

    pub fn get_metadata(&mut self, key: &Key) -> Result<Metadata> {
        Ok(self.find(key, false)?.2.metadata())
    }

    pub fn read_blob(&mut self, offset: u64) -> Result<Vec<u8>> {
        self.heap.read(&mut self.pager, offset)
    }

    pub fn heap_chain(&mut self) -> Result<Vec<u64>> {
        self.heap.chain(&mut self.pager)
    }

    // ------------------------------------------------------------------
    // Mutation
    // ------------------------------------------------------------------

    pub fn insert(&mut self, key: Key, metadata: Metadata, payload: &[u8]) -> Result<()> {
        let root = self.root;
        if let Some(promo) = self.insert_rec(root, key, metadata, payload)? {
            let mut new_root = Node::empty();
            let mut entry = promo.entry;
            entry.set_child(root);
            new_root.insert_entry(0, entry);
            new_root.set_tail_child(promo.right);

            let new_root_offset = self.alloc_node()?;
            self.store_node(new_root_offset, &new_root)?;
            self.root = new_root_offset;
            self.write_super()?;
        }
        Ok(())
    }

    fn insert_rec(
        &mut self,
        node_offset: u64,
        key: Key,
        metadata: Metadata,
        payload: &[u8],
    ) -> Result<Option<Promotion>> {
        let mut node = self.load_node(node_offset)?;

        let bracket = match node.search(&key) {
            Ok(_) => return Err(Error::AlreadyExists { key }),
            Err(bracket) => bracket,
        };

        let child = node.bracket(bracket);
        if child != 0 {
            let Some(promo) = self.insert_rec(child, key, metadata, payload)? else {
                return Ok(None);
            };
            // The promoted median lands where the descent branched: its left
            // subtree is the child we came from, and the bracket right of it
            // becomes the new sibling.
            let mut entry = promo.entry;
            entry.set_child(child);
            node.insert_entry(bracket, entry);
            node.set_bracket(bracket + 1, promo.right);
        } else {
            let data = if payload.is_empty() {
                0
            } else {
                self.heap.alloc(&mut self.pager, payload)?
            };
            node.insert_entry(bracket, TreeEntry::new(key, metadata, data, 0));
        }

        if node.entry_count() == TABLE_SIZE {
            let promo = self.split(&mut node)?;
            self.store_node(node_offset, &node)?;
            Ok(Some(promo))
        } else {
            self.store_node(node_offset, &node)?;
            Ok(None)
        }
    }

    /// Splits an overflowing node at the midpoint. The node keeps the lower
    /// half, a fresh sibling takes the upper half, and the median entry is
    /// returned for promotion.
    fn split(&mut self, node: &mut Node) -> Result<Promotion> {
        debug_assert_eq!(node.entry_count(), TABLE_SIZE);

        let mid = TABLE_SIZE / 2;
        let median = *node.entry(mid);

        let mut right = Node::empty();
        for i in mid + 1..TABLE_SIZE {
            let entry = *node.entry(i);
            right.insert_entry(right.entry_count(), entry);
        }
        right.set_tail_child(node.tail_child());

        node.truncate(mid);
        node.set_tail_child(median.child());

        let right_offset = self.alloc_node()?;
        self.store_node(right_offset, &right)?;

        Ok(Promotion {
            entry: median,
            right: right_offset,
        })
    }

    /// Rewrites a record's metadata. Refused with `Locked` while the current
    /// metadata has `syslock` set.
    pub fn set_metadata(&mut self, key: &Key, metadata: Metadata) -> Result<()> {
        let (offset, index, entry) = self.find(key, false)?;
        if entry.metadata().syslock {
            return Err(Error::Locked { key: *key });
        }

        let mut node = self.load_node(offset)?;
        node.entry_mut(index).set_metadata(metadata);
        self.store_node(offset, &node)
    }

    /// Soft delete: the entry stays in the tree, its lifecycle flips to
    /// RECYCLE through the metadata path (so `Locked` applies).
    pub fn delete(&mut self, key: &Key) -> Result<()> {
        let (_, _, entry) = self.find(key, false)?;
        let mut metadata = entry.metadata();
        metadata.lifecycle = Lifecycle::Recycle;
        self.set_metadata(key, metadata)
    }

    /// Data-only update: the old blob is freed, the new payload allocated,
    /// and only the offset field rewritten in place.
    pub fn update(&mut self, key: &Key, payload: &[u8]) -> Result<()> {
        let (offset, index, entry) = self.find(key, false)?;

        if entry.data() != 0 {
            self.heap.free(&mut self.pager, entry.data())?;
        }
        let data = if payload.is_empty() {
            0
        } else {
            self.heap.alloc(&mut self.pager, payload)?
        };

        let mut node = self.load_node(offset)?;
        node.entry_mut(index).set_data(data);
        self.store_node(offset, &node)
    }

    /// Hard delete: structural removal of the entry and reclamation of its
    /// storage. Finds tombstones too.
    pub fn purge(&mut self, key: &Key) -> Result<()> {
        let root = self.root;
        self.remove_rec(root, key, true)?;

        let node = self.load_node(self.root)?;
        if node.entry_count() == 0 && node.tail_child() != 0 {
            let old_root = self.root;
            self.root = node.tail_child();
            self.free_node(old_root)?;
            self.write_super()?;
        }
        Ok(())
    }

    /// Removes `key` from the subtree at `node_offset`; returns whether the
    /// node underflowed. `reclaim` is false while removing the replacement
    /// entry of an internal purge — its blob moved up with it.
    fn remove_rec(&mut self, node_offset: u64, key: &Key, reclaim: bool) -> Result<bool> {
        let mut node = self.load_node(node_offset)?;

        match node.search(key) {
            Ok(index) => {
                let entry = *node.entry(index);
                if reclaim && entry.data() != 0 {
                    self.heap.free(&mut self.pager, entry.data())?;
                }

                if node.is_leaf() {
                    node.remove_entry(index);
                    self.store_node(node_offset, &node)?;
                    return Ok(node.entry_count() < MIN_ENTRIES);
                }

                // Internal entry: overwrite it with its in-order predecessor
                // or successor, then remove that entry from the subtree it
                // came from. The side is randomized to spread structural
                // load across both subtrees.
                let from_left = self.rng.gen_bool(0.5);
                let bracket = if from_left { index } else { index + 1 };
                let subtree = node.bracket(bracket);
                let replacement = if from_left {
                    self.max_entry(subtree)?
                } else {
                    self.min_entry(subtree)?
                };

                node.entry_mut(index).replace_payload(&replacement);
                self.store_node(node_offset, &node)?;

                let underflow = self.remove_rec(subtree, &replacement.key(), false)?;
                if underflow {
                    self.rebalance(node_offset, bracket)
                } else {
                    Ok(false)
                }
            }
            Err(bracket) => {
                let child = node.bracket(bracket);
                if child == 0 {
                    return Err(Error::NotFound { key: *key });
                }

                let underflow = self.remove_rec(child, key, reclaim)?;
                if underflow {
                    self.rebalance(node_offset, bracket)
                } else {
                    Ok(false)
                }
            }
        }
    }

    fn max_entry(&mut self, mut offset: u64) -> Result<TreeEntry> {
        loop {
            let node = self.load_node(offset)?;
            if node.is_leaf() {
                return Ok(*node.entry(node.entry_count() - 1));
            }
            offset = node.tail_child();
        }
    }

    fn min_entry(&mut self, mut offset: u64) -> Result<TreeEntry> {
        loop {
            let node = self.load_node(offset)?;
            if node.is_leaf() {
                return Ok(*node.entry(0));
            }
            offset = node.bracket(0);
        }
    }

    /// Resolves an underflow at child bracket `j` of the node at
    /// `parent_offset`; returns whether the parent itself underflowed.
    fn rebalance(&mut self, parent_offset: u64, j: usize) -> Result<bool> {
        let mut parent = self.load_node(parent_offset)?;
        let n = parent.entry_count();

        if j > 0 {
            let left_offset = parent.bracket(j - 1);
            let left = self.load_node(left_offset)?;
            if left.entry_count() > MIN_ENTRIES {
                self.borrow_from_left(&mut parent, j, left_offset)?;
                self.store_node(parent_offset, &parent)?;
                return Ok(false);
            }
        }
        if j < n {
            let right_offset = parent.bracket(j + 1);
            let right = self.load_node(right_offset)?;
            if right.entry_count() > MIN_ENTRIES {
                self.borrow_from_right(&mut parent, j, right_offset)?;
                self.store_node(parent_offset, &parent)?;
                return Ok(false);
            }
        }

        let left_index = j.saturating_sub(1);
        self.merge_children(&mut parent, left_index)?;
        self.store_node(parent_offset, &parent)?;
        Ok(parent.entry_count() < MIN_ENTRIES)
    }

    /// Rotates one entry from the left sibling through the parent separator
    /// into the underflowed child.
    fn borrow_from_left(&mut self, parent: &mut Node, j: usize, left_offset: u64) -> Result<()> {
        let child_offset = parent.bracket(j);
        let mut left = self.load_node(left_offset)?;
        let mut child = self.load_node(child_offset)?;

        let lend_index = left.entry_count() - 1;
        let lend = *left.entry(lend_index);

        // The separator drops to the child's front; its left subtree is
        // whatever sat right of the lent entry.
        let mut dropped = *parent.entry(j - 1);
        dropped.set_child(left.tail_child());
        child.insert_entry(0, dropped);

        parent.entry_mut(j - 1).replace_payload(&lend);
        left.set_tail_child(lend.child());
        left.remove_entry(lend_index);

        self.store_node(left_offset, &left)?;
        self.store_node(child_offset, &child)
    }

    fn borrow_from_right(&mut self, parent: &mut Node, j: usize, right_offset: u64) -> Result<()> {
        let child_offset = parent.bracket(j);
        let mut right = self.load_node(right_offset)?;
        let mut child = self.load_node(child_offset)?;

        let lend = *right.entry(0);

        let mut dropped = *parent.entry(j);
        dropped.set_child(child.tail_child());
        let end = child.entry_count();
        child.insert_entry(end, dropped);
        child.set_tail_child(lend.child());

        parent.entry_mut(j).replace_payload(&lend);
        right.remove_entry(0);

        self.store_node(right_offset, &right)?;
        self.store_node(child_offset, &child)
    }

    /// Merges child bracket `left_index + 1` into bracket `left_index`,
    /// pulling the separator down, and recycles the emptied node.
    fn merge_children(&mut self, parent: &mut Node, left_index: usize) -> Result<()> {
        let left_offset = parent.bracket(left_index);
        let right_offset = parent.bracket(left_index + 1);
        let mut left = self.load_node(left_offset)?;
        let right = self.load_node(right_offset)?;

        let mut separator = *parent.entry(left_index);
        separator.set_child(left.tail_child());
        let end = left.entry_count();
        left.insert_entry(end, separator);

        for i in 0..right.entry_count() {
            let end = left.entry_count();
            left.insert_entry(end, *right.entry(i));
        }
        left.set_tail_child(right.tail_child());

        parent.remove_entry(left_index);
        // The shift left the dead sibling's pointer in the merged bracket.
        parent.set_bracket(left_index, left_offset);

        self.store_node(left_offset, &left)?;
        self.free_node(right_offset)
    }

    // ------------------------------------------------------------------
    // Walks
    // ------------------------------------------------------------------

    /// In-order key/metadata sequence. Diagnostic surface: the order
    /// property of the tree is exactly "this sequence is strictly
    /// increasing".
    pub fn keys_in_order(&mut self) -> Result<Vec<(Key, Metadata)>> {
        let mut out = Vec::new();
        let root = self.root;
        self.walk_in_order(root, &mut out)?;
        Ok(out)
    }

    fn walk_in_order(&mut self, offset: u64, out: &mut Vec<(Key, Metadata)>) -> Result<()> {
        let node = self.load_node(offset)?;
        for i in 0..node.entry_count() {
            let child = node.bracket(i);
            if child != 0 {
                self.walk_in_order(child, out)?;
            }
            let entry = node.entry(i);
            out.push((entry.key(), entry.metadata()));
        }
        let tail = node.tail_child();
        if tail != 0 {
            self.walk_in_order(tail, out)?;
        }
        Ok(())
    }

    /// Vacuum: re-inserts every FINITE record into `dst`, which is expected
    /// to be freshly bootstrapped. Tombstones and heap fragmentation do not
    /// survive the copy.
    pub fn rebuild_into(&mut self, dst: &mut Engine) -> Result<()> {
        let root = self.root;
        self.copy_live(root, dst)
    }

    fn copy_live(&mut self, offset: u64, dst: &mut Engine) -> Result<()> {
        let node = self.load_node(offset)?;

        for i in 0..node.entry_count() {
            let entry = *node.entry(i);
            if entry.metadata().is_live() {
                let payload = if entry.data() != 0 {
                    self.heap.read(&mut self.pager, entry.data())?
                } else {
                    Vec::new()
                };
                dst.insert(entry.key(), entry.metadata(), &payload)?;
            }
        }

        for i in 0..=node.entry_count() {
            let child = node.bracket(i);
            if child != 0 {
                self.copy_live(child, dst)?;
            }
        }
        Ok(())
    }

    #[cfg(test)]
    fn root_node(&mut self) -> Box<Node> {
        let root = self.root;
        self.load_node(root).unwrap()
    }
}
