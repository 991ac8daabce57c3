//! B-tree redo: the resource manager that replays index WAL records.
//!
//! [`BtreeRedo`] owns the per-session [`PendingActions`] ledger and applies
//! one decoded [`WalRecord`] at a time. Every page touch follows the same
//! pattern: lock, compare the page LSN with the record LSN, apply the delta
//! only if the page is older, stamp the LSN, mark dirty. Replaying a record
//! twice therefore changes nothing the second time.
//!
//! Records run in strict log order on a single thread. Standby readers may
//! hold pins and shared locks concurrently; the handlers that shift offsets
//! under them take cleanup locks.

mod apply;
mod cleanup;
mod delete;
mod delete_page;
mod insert;
mod ledger;
mod newroot;
mod split;
mod standby;
mod vacuum;

#[cfg(test)]
pub(crate) mod test_support;

pub use cleanup::OnlineBtree;
pub use delete::latest_removed_xid;
pub use ledger::{IncompleteAction, PendingActions};
pub use standby::{NoStandby, StandbyConflicts};

use crate::buffer::BufferPool;
use crate::config::RedoConfig;
use crate::error::CoreResult;
use crate::wal::{BtreeRecord, WalRecord};
use apply::{restore_backup, LockMode};
use std::sync::Arc;
use tracing::{debug, info};

/// Replays B-tree WAL records into a buffer pool.
pub struct BtreeRedo {
    pool: Arc<BufferPool>,
    ledger: PendingActions,
    standby: Arc<dyn StandbyConflicts>,
    config: RedoConfig,
}

impl BtreeRedo {
    /// Creates a redo engine over `pool` with no standby readers attached.
    #[must_use]
    pub fn new(pool: Arc<BufferPool>, config: RedoConfig) -> Self {
        pool.set_verify_checksums(config.verify_checksums);
        Self {
            pool,
            ledger: PendingActions::new(),
            standby: Arc::new(NoStandby),
            config,
        }
    }

    /// Attaches the standby query side used for conflict resolution.
    #[must_use]
    pub fn with_standby(mut self, standby: Arc<dyn StandbyConflicts>) -> Self {
        self.standby = standby;
        self
    }

    /// The buffer pool records are replayed into.
    #[must_use]
    pub fn pool(&self) -> &Arc<BufferPool> {
        &self.pool
    }

    /// The engine configuration.
    #[must_use]
    pub fn config(&self) -> &RedoConfig {
        &self.config
    }

    /// Structural operations still waiting for their completion record.
    #[must_use]
    pub fn ledger(&self) -> &PendingActions {
        &self.ledger
    }

    /// Starts a recovery session: forgets anything pending from before.
    pub fn startup(&mut self) {
        if !self.ledger.is_empty() {
            info!(
                pending = self.ledger.len(),
                "discarding pending actions from previous session"
            );
        }
        self.ledger.clear();
    }

    /// True when no multi-record operation is in flight, so a restart point
    /// taken now would be self-consistent.
    #[must_use]
    pub fn safe_restartpoint(&self) -> bool {
        self.ledger.is_empty()
    }

    /// Replays one record.
    ///
    /// # Errors
    ///
    /// Any error is fatal to the recovery session.
    pub fn redo(&mut self, record: &WalRecord) -> CoreResult<()> {
        if self.config.trace_records {
            debug!(lsn = %record.lsn, kind = record.kind().name(), "redo {record}");
        }

        if self.config.hot_standby {
            match &record.record {
                BtreeRecord::Delete(rec) => {
                    let xid = latest_removed_xid(
                        &self.pool,
                        self.standby.as_ref(),
                        self.config.database_id,
                        record.lsn,
                        rec,
                    )?;
                    self.standby.resolve_conflict_with_snapshot(xid, rec.rel);
                }
                BtreeRecord::ReusePage(rec) => {
                    self.standby
                        .resolve_conflict_with_snapshot(rec.latest_removed_xid, rec.rel);
                }
                _ => {}
            }
        }
        if matches!(record.record, BtreeRecord::ReusePage(_)) {
            return Ok(());
        }

        let mode = if matches!(record.record, BtreeRecord::Vacuum(_)) {
            LockMode::Cleanup
        } else {
            LockMode::Exclusive
        };
        for backup in &record.backups {
            restore_backup(&self.pool, backup, record.lsn, mode)?;
        }

        match &record.record {
            BtreeRecord::Insert(rec) => self.redo_insert(record, rec),
            BtreeRecord::Split(rec) => self.redo_split(record, rec),
            BtreeRecord::Vacuum(rec) => self.redo_vacuum(record, rec),
            BtreeRecord::Delete(rec) => self.redo_delete(record, rec),
            BtreeRecord::DeletePage(rec) => self.redo_delete_page(record, rec),
            BtreeRecord::NewRoot(rec) => self.redo_newroot(record, rec),
            BtreeRecord::ReusePage(_) => Ok(()),
        }
    }
}

impl std::fmt::Debug for BtreeRedo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BtreeRedo")
            .field("ledger", &self.ledger)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
