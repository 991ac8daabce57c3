//! Insert replay.

use super::apply::{modify_page, restore_meta, LockMode};
use super::BtreeRedo;
use crate::error::{CoreError, CoreResult};
use crate::wal::{InsertKind, InsertRecord, WalRecord};

impl BtreeRedo {
    pub(super) fn redo_insert(&mut self, record: &WalRecord, rec: &InsertRecord) -> CoreResult<()> {
        let lsn = record.lsn;

        if !record.has_backup(0) {
            let item = rec.item.as_deref().ok_or_else(|| {
                CoreError::wal_corruption(format!("insert at {lsn} has neither item nor image"))
            })?;
            modify_page(&self.pool, rec.rel, rec.block, lsn, LockMode::Exclusive, |page| {
                page.add_item(item, rec.offset).ok_or_else(|| {
                    CoreError::page_capacity(
                        rec.rel,
                        rec.block,
                        format!("failed to add {}-byte item at offset {}", item.len(), rec.offset),
                    )
                })?;
                Ok(())
            })?;
        }

        match rec.kind {
            InsertKind::Leaf => {}
            InsertKind::Upper { downlink } => {
                self.ledger.forget_split(rec.rel, downlink, false);
            }
            InsertKind::Meta { downlink, meta } => {
                restore_meta(&self.pool, rec.rel, lsn, &meta)?;
                self.ledger.forget_split(rec.rel, downlink, false);
            }
        }
        Ok(())
    }
}
