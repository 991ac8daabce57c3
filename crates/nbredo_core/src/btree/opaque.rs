//! Per-page B-tree metadata kept in the special area.

use crate::error::{CoreError, CoreResult};
use crate::page::Page;
use crate::types::{BlockNumber, OffsetNumber, TransactionId, P_FIRSTKEY, P_HIKEY, P_NONE};

/// Size of the encoded opaque.
pub const BT_OPAQUE_SIZE: usize = 16;

/// Leaf page.
pub const BTP_LEAF: u16 = 1 << 0;
/// Root page.
pub const BTP_ROOT: u16 = 1 << 1;
/// Page has been deleted from the tree.
pub const BTP_DELETED: u16 = 1 << 2;
/// The metapage.
pub const BTP_META: u16 = 1 << 3;
/// Page is empty but still linked from its parent.
pub const BTP_HALF_DEAD: u16 = 1 << 4;
/// Rightmost page of a split group (vacuum hint, not logged).
pub const BTP_SPLIT_END: u16 = 1 << 5;
/// Page may contain dead items (hint, not logged).
pub const BTP_HAS_GARBAGE: u16 = 1 << 6;

/// Sibling links, level and flags of a B-tree page.
///
/// `level_or_xact` holds the tree level, except on a `DELETED` page where it
/// holds the xid that deleted it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BtPageOpaque {
    /// Left sibling, or [`P_NONE`].
    pub prev: BlockNumber,
    /// Right sibling, or [`P_NONE`].
    pub next: BlockNumber,
    /// Level (0 = leaf), or deletion xid once deleted.
    pub level_or_xact: u32,
    /// `BTP_*` flags.
    pub flags: u16,
    /// Vacuum cycle id of the last split.
    pub cycle_id: u16,
}

impl BtPageOpaque {
    /// Reads the opaque from a page's special area.
    ///
    /// # Errors
    ///
    /// Returns `PageCorruption` if the special area is too small.
    pub fn read(page: &Page) -> CoreResult<Self> {
        let special = page.special();
        if special.len() < BT_OPAQUE_SIZE {
            return Err(CoreError::page_corruption(format!(
                "special area holds {} bytes, btree opaque needs {BT_OPAQUE_SIZE}",
                special.len()
            )));
        }
        let word = |i: usize| {
            u32::from_le_bytes([special[i], special[i + 1], special[i + 2], special[i + 3]])
        };
        Ok(Self {
            prev: word(0),
            next: word(4),
            level_or_xact: word(8),
            flags: u16::from_le_bytes([special[12], special[13]]),
            cycle_id: u16::from_le_bytes([special[14], special[15]]),
        })
    }

    /// Writes the opaque into a page's special area.
    ///
    /// # Errors
    ///
    /// Returns `PageCorruption` if the special area is too small.
    pub fn write(&self, page: &mut Page) -> CoreResult<()> {
        let special = page.special_mut();
        if special.len() < BT_OPAQUE_SIZE {
            return Err(CoreError::page_corruption(
                "special area too small for btree opaque",
            ));
        }
        special[0..4].copy_from_slice(&self.prev.to_le_bytes());
        special[4..8].copy_from_slice(&self.next.to_le_bytes());
        special[8..12].copy_from_slice(&self.level_or_xact.to_le_bytes());
        special[12..14].copy_from_slice(&self.flags.to_le_bytes());
        special[14..16].copy_from_slice(&self.cycle_id.to_le_bytes());
        Ok(())
    }

    /// Tree level; meaningless on a deleted page.
    #[must_use]
    pub const fn level(&self) -> u32 {
        self.level_or_xact
    }

    /// Xid that deleted the page, if it is deleted.
    #[must_use]
    pub fn deletion_xid(&self) -> Option<TransactionId> {
        self.is_deleted().then_some(TransactionId(self.level_or_xact))
    }

    /// Returns true for a leaf page.
    #[must_use]
    pub const fn is_leaf(&self) -> bool {
        self.flags & BTP_LEAF != 0
    }

    /// Returns true for the root page.
    #[must_use]
    pub const fn is_root(&self) -> bool {
        self.flags & BTP_ROOT != 0
    }

    /// Returns true for a deleted page.
    #[must_use]
    pub const fn is_deleted(&self) -> bool {
        self.flags & BTP_DELETED != 0
    }

    /// Returns true for a half-dead page.
    #[must_use]
    pub const fn is_half_dead(&self) -> bool {
        self.flags & BTP_HALF_DEAD != 0
    }

    /// Returns true for the metapage.
    #[must_use]
    pub const fn is_meta(&self) -> bool {
        self.flags & BTP_META != 0
    }

    /// Returns true if the page may carry dead items.
    #[must_use]
    pub const fn has_garbage(&self) -> bool {
        self.flags & BTP_HAS_GARBAGE != 0
    }

    /// Returns true if the page has no left sibling.
    #[must_use]
    pub const fn is_leftmost(&self) -> bool {
        self.prev == P_NONE
    }

    /// Returns true if the page has no right sibling (and so no high key).
    #[must_use]
    pub const fn is_rightmost(&self) -> bool {
        self.next == P_NONE
    }

    /// Offset of the first data key.
    #[must_use]
    pub const fn first_data_key(&self) -> OffsetNumber {
        if self.is_rightmost() {
            P_HIKEY
        } else {
            P_FIRSTKEY
        }
    }
}
