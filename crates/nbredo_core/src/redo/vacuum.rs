//! Bulk-delete (vacuum) replay.

use super::apply::{modify_page, LockMode};
use super::BtreeRedo;
use crate::btree::{BtPageOpaque, BTP_HAS_GARBAGE};
use crate::buffer::ReadMode;
use crate::error::CoreResult;
use crate::wal::{VacuumRecord, WalRecord};
use tracing::trace;

impl BtreeRedo {
    pub(super) fn redo_vacuum(&mut self, record: &WalRecord, rec: &VacuumRecord) -> CoreResult<()> {
        if self.config.hot_standby
            && self.standby.active_backend_count(self.config.database_id) > 0
        {
            self.unpin_barrier(rec)?;
        }

        if record.has_backup(0) {
            return Ok(());
        }
        modify_page(&self.pool, rec.rel, rec.block, record.lsn, LockMode::Cleanup, |page| {
            page.remove_items(&rec.offsets)?;
            let mut opaque = BtPageOpaque::read(page)?;
            opaque.flags &= !BTP_HAS_GARBAGE;
            opaque.write(page)
        })?;
        Ok(())
    }

    /// Waits until no standby reader is pinned on any block vacuum passed
    /// over without logging, so no scan can be left behind the removal.
    fn unpin_barrier(&self, rec: &VacuumRecord) -> CoreResult<()> {
        for block in rec.last_block_vacuumed.saturating_add(1)..rec.block {
            if let Some(buffer) = self.pool.read_buffer(rec.rel, block, ReadMode::Normal)? {
                drop(buffer.lock_cleanup());
                trace!(rel = %rec.rel, block, "unpin barrier passed");
            }
        }
        Ok(())
    }
}
