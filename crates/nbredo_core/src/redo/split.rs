//! Split replay.
//!
//! The right half is rebuilt from the items in the record. The left half is
//! trimmed in place: its old high key and everything from `first_right` on
//! are removed in one batch, the new item is re-added if it went left, and
//! the new high key goes in at `P_HIKEY`.

use super::apply::{modify_page, rebuild_page, restore_items, LockMode};
use super::BtreeRedo;
use crate::btree::{init_page, BtPageOpaque, BTP_LEAF};
use crate::error::{CoreError, CoreResult};
use crate::types::{OffsetNumber, P_FIRSTKEY, P_HIKEY, P_NONE};
use crate::wal::{SplitRecord, WalRecord};

impl BtreeRedo {
    pub(super) fn redo_split(&mut self, record: &WalRecord, rec: &SplitRecord) -> CoreResult<()> {
        let lsn = record.lsn;
        let level_flags = if rec.level == 0 { BTP_LEAF } else { 0 };

        if rec.level > 0 {
            let downlink = rec.downlink.ok_or_else(|| {
                CoreError::wal_corruption(format!("upper-level split at {lsn} has no downlink"))
            })?;
            self.ledger.forget_split(rec.rel, downlink, false);
        }

        rebuild_page(&self.pool, rec.rel, rec.right, lsn, |page| {
            init_page(page);
            BtPageOpaque {
                prev: rec.left,
                next: rec.rnext,
                level_or_xact: rec.level,
                flags: level_flags,
                cycle_id: 0,
            }
            .write(page)?;
            restore_items(page, rec.rel, rec.right, &rec.right_items)
        })?;

        if !record.has_backup(0) {
            let left_hikey = self.left_high_key(record, rec)?;
            let new_item = match rec.new_item_offset {
                Some(offset) => {
                    let item = rec.new_item.as_deref().ok_or_else(|| {
                        CoreError::wal_corruption(format!("left split at {lsn} has no new item"))
                    })?;
                    Some((offset, item))
                }
                None => None,
            };

            modify_page(&self.pool, rec.rel, rec.left, lsn, LockMode::Cleanup, |page| {
                let opaque = BtPageOpaque::read(page)?;
                let mut new_item = new_item;
                let mut doomed: Vec<OffsetNumber> = Vec::new();
                if !opaque.is_rightmost() {
                    doomed.push(P_HIKEY);
                    // The new item's offset counts the old high key.
                    new_item = match new_item {
                        Some((offset, item)) if offset > P_HIKEY => Some((offset - 1, item)),
                        Some((offset, _)) => {
                            return Err(CoreError::page_corruption(format!(
                                "new item offset {offset} collides with the high key"
                            )))
                        }
                        None => None,
                    };
                }
                doomed.extend(rec.first_right..=page.max_offset());
                page.remove_items(&doomed)?;

                if let Some((offset, item)) = new_item {
                    page.add_item(item, offset).ok_or_else(|| {
                        CoreError::page_capacity(
                            rec.rel,
                            rec.left,
                            format!("failed to re-add new item at offset {offset} after split"),
                        )
                    })?;
                }
                page.add_item(left_hikey, P_HIKEY).ok_or_else(|| {
                    CoreError::page_capacity(rec.rel, rec.left, "failed to add high key after split")
                })?;

                BtPageOpaque {
                    next: rec.right,
                    flags: level_flags,
                    cycle_id: 0,
                    ..opaque
                }
                .write(page)
            })?;
        }

        if rec.rnext != P_NONE && !record.has_backup(1) {
            modify_page(&self.pool, rec.rel, rec.rnext, lsn, LockMode::Exclusive, |page| {
                let mut opaque = BtPageOpaque::read(page)?;
                opaque.prev = rec.right;
                opaque.write(page)
            })?;
        }

        self.ledger.log_split(rec.rel, rec.left, rec.right, rec.is_root);
        Ok(())
    }

    /// On leaves the left page's new high key is the right page's first data
    /// key; above the leaves it is logged.
    fn left_high_key<'r>(&self, record: &WalRecord, rec: &'r SplitRecord) -> CoreResult<&'r [u8]> {
        if rec.level > 0 {
            return rec.left_hikey.as_deref().ok_or_else(|| {
                CoreError::wal_corruption(format!(
                    "upper-level split at {} has no left high key",
                    record.lsn
                ))
            });
        }
        let first_data = if rec.rnext == P_NONE { P_HIKEY } else { P_FIRSTKEY };
        rec.right_items
            .get(first_data as usize - 1)
            .map(Vec::as_slice)
            .ok_or_else(|| {
                CoreError::wal_corruption(format!(
                    "leaf split at {} leaves the right page without data",
                    record.lsn
                ))
            })
    }
}
