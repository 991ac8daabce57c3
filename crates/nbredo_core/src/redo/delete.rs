//! Single-page delete replay and the latest-removed-xid computation that
//! guards it on a hot standby.

use super::apply::{modify_page, LockMode};
use super::{BtreeRedo, StandbyConflicts};
use crate::btree::{BtPageOpaque, IndexTuple, BTP_HAS_GARBAGE};
use crate::buffer::{BufferPool, ReadMode};
use crate::error::{CoreError, CoreResult};
use crate::page::{HeapTupleHeader, ItemId, Page};
use crate::types::{Lsn, OffsetNumber, TransactionId};
use crate::wal::{DeleteRecord, WalRecord};

impl BtreeRedo {
    pub(super) fn redo_delete(&mut self, record: &WalRecord, rec: &DeleteRecord) -> CoreResult<()> {
        if record.has_backup(0) {
            return Ok(());
        }
        // Removing already-dead items is safe under concurrent forward scans,
        // so an exclusive lock is enough here.
        modify_page(&self.pool, rec.rel, rec.block, record.lsn, LockMode::Exclusive, |page| {
            page.remove_items(&rec.offsets)?;
            let mut opaque = BtPageOpaque::read(page)?;
            opaque.flags &= !BTP_HAS_GARBAGE;
            opaque.write(page)
        })?;
        Ok(())
    }
}

/// Newest transaction that created or expired a heap row the delete record
/// is about to make unreachable from the index.
///
/// Standby snapshots that may still need such a transaction conflict with
/// the record. Returns [`TransactionId::INVALID`] (no conflict) when there
/// are no backends in `database_id`, when the index page or a heap page is
/// missing, when the index page already carries the record at `lsn`, or
/// when every referenced row is already dead and gone. Index offsets with
/// no item are skipped.
///
/// # Errors
///
/// Returns `PageCorruption` if a heap offset points outside its page or a
/// redirect chain does not terminate.
pub fn latest_removed_xid(
    pool: &BufferPool,
    standby: &dyn StandbyConflicts,
    database_id: u32,
    lsn: Lsn,
    rec: &DeleteRecord,
) -> CoreResult<TransactionId> {
    if standby.active_backend_count(database_id) == 0 {
        return Ok(TransactionId::INVALID);
    }
    let Some(index_buffer) = pool.read_buffer(rec.rel, rec.block, ReadMode::Normal)? else {
        return Ok(TransactionId::INVALID);
    };
    let index_page = index_buffer.lock_shared();
    // The tuples are already gone, and so is any conflict they implied.
    if index_page.lsn() >= lsn {
        return Ok(TransactionId::INVALID);
    }

    let mut latest = TransactionId::INVALID;
    for &offset in &rec.offsets {
        let Some(tuple) = index_page.get_item(offset) else {
            continue;
        };
        let heap_block = IndexTuple::tid_block(tuple)?;
        let mut heap_offset = IndexTuple::tid_offset(tuple)?;

        let Some(heap_buffer) = pool.read_buffer(rec.heap_rel, heap_block, ReadMode::Normal)?
        else {
            return Ok(TransactionId::INVALID);
        };
        let heap_page = heap_buffer.lock_shared();

        let mut id = item_id_at(&heap_page, heap_offset)?;
        let mut hops = 0;
        while id.is_redirected() {
            hops += 1;
            if hops > heap_page.max_offset() {
                return Err(CoreError::page_corruption(format!(
                    "redirect loop in heap block {heap_block} of {}",
                    rec.heap_rel
                )));
            }
            heap_offset = id.redirect_target();
            id = item_id_at(&heap_page, heap_offset)?;
        }
        // A dead item keeps its xids readable until its storage is reclaimed.
        if !id.has_storage() {
            continue;
        }

        let header = HeapTupleHeader::read(heap_page.item(heap_offset)?)?;
        for xid in [header.xmin, header.xmax] {
            if xid.is_normal() && (!latest.is_valid() || xid.follows(latest)) {
                latest = xid;
            }
        }
    }
    Ok(latest)
}

fn item_id_at(page: &Page, offset: OffsetNumber) -> CoreResult<ItemId> {
    if offset == 0 || offset > page.max_offset() {
        return Err(CoreError::page_corruption(format!(
            "heap offset {offset} beyond max offset {}",
            page.max_offset()
        )));
    }
    Ok(page.item_id(offset))
}
