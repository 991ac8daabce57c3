//! Page masking for tolerant page comparison.
//!
//! Two copies of the same B-tree page, one written by the primary and one
//! rebuilt by replay, can legitimately differ in state that is never logged:
//! the LSN and checksum, hint bits, garbage left in free space, the vacuum
//! cycle id, and dead/redirect bits on leaf line pointers. [`mask_page`]
//! blanks all of it so the remaining bytes must match exactly.

use crate::btree::{BtPageOpaque, BTP_HAS_GARBAGE, BTP_SPLIT_END, BT_OPAQUE_SIZE};
use crate::page::{
    LpFlags, Page, BLCKSZ, PAGE_HEADER_SIZE, PD_ALL_VISIBLE, PD_HAS_FREE_LINES, PD_PAGE_FULL,
};
use crate::types::{Lsn, TransactionId};

/// Masks `page` in place. Idempotent.
pub fn mask_page(page: &mut Page) {
    page.set_lsn(Lsn::INVALID);
    page.set_checksum(0);
    if page.is_new() {
        return;
    }

    page.set_flags(page.flags() & !(PD_HAS_FREE_LINES | PD_PAGE_FULL | PD_ALL_VISIBLE));
    page.set_prune_xid(TransactionId::INVALID);
    mask_unused_space(page);

    // Pages without a btree special area only get the generic treatment.
    let Ok(opaque) = BtPageOpaque::read(page) else {
        return;
    };
    if opaque.is_deleted() {
        // Reinitialized before reuse, so nothing but the opaque matters.
        let special = page.special_offset().min(BLCKSZ);
        page.as_bytes_mut()[PAGE_HEADER_SIZE..special].fill(0);
        page.set_lower(0);
        page.set_upper(0);
    } else if opaque.is_leaf() {
        mask_lp_flags(page);
    }

    // Only the flags and cycle id change; the links and level are logged.
    let flags = opaque.flags & !(BTP_HAS_GARBAGE | BTP_SPLIT_END);
    if let Some(hints) = page.special_mut().get_mut(12..BT_OPAQUE_SIZE) {
        hints[..2].copy_from_slice(&flags.to_le_bytes());
        hints[2..].fill(0);
    }
}

/// Returns a masked copy of `page`.
#[must_use]
pub fn masked(page: &Page) -> Page {
    let mut copy = page.clone();
    mask_page(&mut copy);
    copy
}

/// Returns true if the two pages are equal once masked.
#[must_use]
pub fn equal_masked(a: &Page, b: &Page) -> bool {
    masked(a) == masked(b)
}

fn mask_unused_space(page: &mut Page) {
    let lower = page.lower();
    let upper = page.upper();
    let special = page.special_offset();
    if lower < PAGE_HEADER_SIZE || lower > upper || upper > special || special > BLCKSZ {
        return;
    }
    page.as_bytes_mut()[lower..upper].fill(0);
}

fn mask_lp_flags(page: &mut Page) {
    for offset in 1..=page.max_offset() {
        let id = page.item_id(offset);
        if id.is_used() {
            page.set_item_id(offset, id.with_flags(LpFlags::Unused));
        }
    }
}
