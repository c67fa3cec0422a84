//! # Node and Entry Codec
//!
//! A node is a fixed-capacity sorted array of entries plus one trailing child
//! offset and an entry count. The on-disk form is exactly the in-memory form:
//! both structs are zerocopy types with big-endian fields and no padding, so
//! a node round-trips through the pager as a single [`NODE_SIZE`] read or
//! write.
//!
//! ## Entry Layout (34 bytes)
//!
//! ```text
//! Offset  Size  Field     Description
//! ------  ----  --------  ----------------------------------------
//! 0       16    key       Record identifier, compared byte-wise
//! 16      2     metadata  Packed bitfield (lifecycle, locks, type)
//! 18      8     data      Heap offset of the payload blob, 0 = none
//! 26      8     child     Offset of the left subtree, 0 = none
//! ```
//!
//! ## Node Layout (4090 bytes)
//!
//! ```text
//! entries[TABLE_SIZE]   120 * 34 bytes
//! tail_child            8 bytes    subtree right of the last entry
//! count                 2 bytes
//! ```
//!
//! ## Bracket Convention
//!
//! A node with `n` entries has `n + 1` child brackets: bracket `i < n` is
//! `entries[i].child` (keys below entry `i`), bracket `n` is `tail_child`
//! (keys above the last entry). Leaves have every bracket zero.

use zerocopy::big_endian::{U16, U64};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

use crate::config::{ENTRY_SIZE, NODE_SIZE, TABLE_SIZE};
use crate::error::{Error, Result};
use crate::types::{Key, Metadata, KEY_LEN};

#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
pub struct TreeEntry {
    key: [u8; KEY_LEN],
    metadata: U16,
    data: U64,
    child: U64,
}

const _: () = assert!(std::mem::size_of::<TreeEntry>() == ENTRY_SIZE);

impl TreeEntry {
    pub fn new(key: Key, metadata: Metadata, data: u64, child: u64) -> Self {
        Self {
            key: *key.as_bytes(),
            metadata: U16::new(metadata.pack()),
            data: U64::new(data),
            child: U64::new(child),
        }
    }

    pub fn key(&self) -> Key {
        Key::from_bytes(self.key)
    }

    pub fn metadata(&self) -> Metadata {
        Metadata::unpack(self.metadata.get())
    }

    pub fn set_metadata(&mut self, metadata: Metadata) {
        self.metadata = U16::new(metadata.pack());
    }

    pub fn data(&self) -> u64 {
        self.data.get()
    }

    pub fn set_data(&mut self, offset: u64) {
        self.data = U64::new(offset);
    }

    pub fn child(&self) -> u64 {
        self.child.get()
    }

    pub fn set_child(&mut self, offset: u64) {
        self.child = U64::new(offset);
    }

    /// Copies key, metadata, and data offset from `other`, keeping the child
    /// pointer. Used when a purged internal entry is overwritten by its
    /// predecessor or successor.
    pub fn replace_payload(&mut self, other: &TreeEntry) {
        self.key = other.key;
        self.metadata = other.metadata;
        self.data = other.data;
    }
}

#[repr(C)]
#[derive(Clone, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
pub struct Node {
    entries: [TreeEntry; TABLE_SIZE],
    tail_child: U64,
    count: U16,
}

const _: () = assert!(std::mem::size_of::<Node>() == NODE_SIZE);

impl Node {
    /// A fresh zeroed node: no entries, every bracket absent.
    pub fn empty() -> Box<Node> {
        // Zeroed bytes decode to count 0 and all-zero brackets.
        Node::read_from_bytes(&[0u8; NODE_SIZE])
            .map(Box::new)
            .expect("zeroed node must decode")
    }

    pub fn decode(bytes: &[u8]) -> Result<Box<Node>> {
        let node = Node::read_from_bytes(bytes)
            .map_err(|e| Error::corruption(format!("unreadable tree node: {e:?}")))?;
        if node.entry_count() > TABLE_SIZE {
            return Err(Error::corruption(format!(
                "node entry count {} exceeds table size",
                node.entry_count()
            )));
        }
        Ok(Box::new(node))
    }

    pub fn entry_count(&self) -> usize {
        self.count.get() as usize
    }

    pub fn entry(&self, index: usize) -> &TreeEntry {
        debug_assert!(index < self.entry_count());
        &self.entries[index]
    }

    pub fn entry_mut(&mut self, index: usize) -> &mut TreeEntry {
        debug_assert!(index < self.entry_count());
        &mut self.entries[index]
    }

    pub fn tail_child(&self) -> u64 {
        self.tail_child.get()
    }

    pub fn set_tail_child(&mut self, offset: u64) {
        self.tail_child = U64::new(offset);
    }

    /// Child bracket `i`: `entries[i].child` for `i < count`, the trailing
    /// child for `i == count`.
    pub fn bracket(&self, index: usize) -> u64 {
        debug_assert!(index <= self.entry_count());
        if index == self.entry_count() {
            self.tail_child.get()
        } else {
            self.entries[index].child()
        }
    }

    pub fn set_bracket(&mut self, index: usize, offset: u64) {
        debug_assert!(index <= self.entry_count());
        if index == self.entry_count() {
            self.tail_child = U64::new(offset);
        } else {
            self.entries[index].set_child(offset);
        }
    }

    pub fn is_leaf(&self) -> bool {
        self.bracket(0) == 0
    }

    /// Binary search over the sorted entry prefix. `Ok(i)` is an exact match
    /// at index `i`; `Err(i)` is the bracket to descend into (equivalently,
    /// the sorted insertion point).
    pub fn search(&self, key: &Key) -> std::result::Result<usize, usize> {
        self.entries[..self.entry_count()]
            .binary_search_by(|entry| entry.key.as_slice().cmp(key.as_bytes()))
    }

    /// Inserts at `index`, shifting later entries right. The node may end up
    /// holding `TABLE_SIZE` entries — the transient overflow state the caller
    /// must resolve with a split before writing back a final node.
    pub fn insert_entry(&mut self, index: usize, entry: TreeEntry) {
        let count = self.entry_count();
        debug_assert!(count < TABLE_SIZE);
        debug_assert!(index <= count);

        self.entries.copy_within(index..count, index + 1);
        self.entries[index] = entry;
        self.count = U16::new(count as u16 + 1);
    }

    /// Removes the entry at `index`, shifting later entries left, and returns
    /// it. Bracket pointers right of `index` shift with their entries; the
    /// caller owns any bracket fixup the structural operation requires.
    pub fn remove_entry(&mut self, index: usize) -> TreeEntry {
        let count = self.entry_count();
        debug_assert!(index < count);

        let removed = self.entries[index];
        self.entries.copy_within(index + 1..count, index);
        self.count = U16::new(count as u16 - 1);
        removed
    }

    /// Shrinks the entry count to `len`; slots past the count are ignored by
    /// every reader and overwritten by later inserts.
    pub fn truncate(&mut self, len: usize) {
        debug_assert!(len <= self.entry_count());
        self.count = U16::new(len as u16);
    }

    pub fn encoded(&self) -> &[u8] {
        self.as_bytes()
    }
}

impl std::fmt::Debug for Node {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Node")
            .field("count", &self.entry_count())
            .field("leaf", &self.is_leaf())
            .field("tail_child", &self.tail_child())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Lifecycle;

    fn entry(n: u64) -> TreeEntry {
        TreeEntry::new(Key::from_u64(n), Metadata::default(), 0, 0)
    }

    #[test]
    fn entry_size_is_34() {
        assert_eq!(std::mem::size_of::<TreeEntry>(), 34);
    }

    #[test]
    fn node_size_fits_a_physical_page() {
        assert_eq!(std::mem::size_of::<Node>(), NODE_SIZE);
        assert!(NODE_SIZE <= 4096);
    }

    #[test]
    fn entry_fields_are_big_endian() {
        let e = TreeEntry::new(Key::from_u64(1), Metadata::default(), 0x0102, 0x0304);
        let bytes = e.as_bytes();

        assert_eq!(&bytes[18..26], &0x0102u64.to_be_bytes());
        assert_eq!(&bytes[26..34], &0x0304u64.to_be_bytes());
    }

    #[test]
    fn fresh_leaf_is_empty() {
        let node = Node::empty();

        assert_eq!(node.entry_count(), 0);
        assert!(node.is_leaf());
        assert_eq!(node.tail_child(), 0);
    }

    #[test]
    fn insert_keeps_sorted_positions() {
        let mut node = Node::empty();
        for (pos, n) in [(0, 10u64), (0, 5), (2, 20), (2, 15)] {
            node.insert_entry(pos, entry(n));
        }

        let keys: Vec<Key> = (0..node.entry_count()).map(|i| node.entry(i).key()).collect();
        assert_eq!(
            keys,
            vec![
                Key::from_u64(5),
                Key::from_u64(10),
                Key::from_u64(15),
                Key::from_u64(20)
            ]
        );
    }

    #[test]
    fn search_finds_and_brackets() {
        let mut node = Node::empty();
        for (i, n) in [10u64, 20, 30].iter().enumerate() {
            node.insert_entry(i, entry(*n));
        }

        assert_eq!(node.search(&Key::from_u64(20)), Ok(1));
        assert_eq!(node.search(&Key::from_u64(5)), Err(0));
        assert_eq!(node.search(&Key::from_u64(25)), Err(2));
        assert_eq!(node.search(&Key::from_u64(99)), Err(3));
    }

    #[test]
    fn remove_shifts_left() {
        let mut node = Node::empty();
        for (i, n) in [10u64, 20, 30].iter().enumerate() {
            node.insert_entry(i, entry(*n));
        }

        let removed = node.remove_entry(1);

        assert_eq!(removed.key(), Key::from_u64(20));
        assert_eq!(node.entry_count(), 2);
        assert_eq!(node.entry(1).key(), Key::from_u64(30));
    }

    #[test]
    fn bracket_covers_tail_child() {
        let mut node = Node::empty();
        node.insert_entry(0, TreeEntry::new(Key::from_u64(1), Metadata::default(), 0, 77));
        node.set_tail_child(88);

        assert_eq!(node.bracket(0), 77);
        assert_eq!(node.bracket(1), 88);
        assert!(!node.is_leaf());

        node.set_bracket(1, 99);
        assert_eq!(node.tail_child(), 99);
    }

    #[test]
    fn codec_roundtrip() {
        let mut node = Node::empty();
        let mut meta = Metadata::default();
        meta.lifecycle = Lifecycle::Recycle;
        meta.syslock = true;
        node.insert_entry(0, TreeEntry::new(Key::from_u64(42), meta, 1000, 0));

        let decoded = Node::decode(node.encoded()).unwrap();

        assert_eq!(decoded.entry_count(), 1);
        assert_eq!(decoded.entry(0).key(), Key::from_u64(42));
        assert_eq!(decoded.entry(0).metadata(), meta);
        assert_eq!(decoded.entry(0).data(), 1000);
    }

    #[test]
    fn replace_payload_keeps_child() {
        let mut victim = TreeEntry::new(Key::from_u64(1), Metadata::default(), 111, 555);
        let replacement = TreeEntry::new(Key::from_u64(2), Metadata::default(), 222, 777);

        victim.replace_payload(&replacement);

        assert_eq!(victim.key(), Key::from_u64(2));
        assert_eq!(victim.data(), 222);
        assert_eq!(victim.child(), 555);
    }
}
