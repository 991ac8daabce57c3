//! B-tree page layout on top of [`crate::page::Page`].
//!
//! Every B-tree page carries a [`BtPageOpaque`] in its special area. Block 0
//! is the metapage. A page that has a right sibling stores its high key at
//! [`P_HIKEY`](crate::P_HIKEY); its data keys start at
//! [`P_FIRSTKEY`](crate::P_FIRSTKEY).

mod meta;
mod opaque;
mod tuple;

pub use meta::{MetaPage, MetaSnapshot, BTREE_MAGIC, BTREE_VERSION};
pub use opaque::{
    BtPageOpaque, BTP_DELETED, BTP_HALF_DEAD, BTP_HAS_GARBAGE, BTP_LEAF, BTP_META, BTP_ROOT,
    BTP_SPLIT_END, BT_OPAQUE_SIZE,
};
pub use tuple::{IndexTuple, INDEX_SIZE_MASK, INDEX_TUPLE_HEADER};

use crate::page::Page;

/// Reinitializes `page` as an empty B-tree page with a zeroed opaque.
pub fn init_page(page: &mut Page) {
    page.init(BT_OPAQUE_SIZE);
}
