//! Core value types shared across the engine: the fixed-width record
//! identifier and the packed per-record metadata bitfield.
//!
//! Both are opaque to the storage layer below them: the pager and the
//! allocators move bytes, the tree compares keys and enforces metadata rules
//! on mutation. Key *generation* lives outside this crate; the engine only
//! requires the stable total order that [`Key`]'s byte-wise comparison
//! provides.

mod key;
mod meta;

pub use key::{Key, KEY_LEN};
pub use meta::{Lifecycle, Metadata, RecordType};
