//! Hooks into the replica's query side.

use crate::types::{RelFileId, TransactionId};

/// Lets replay cancel or wait out standby queries that could still see rows
/// a record is about to make unreachable.
pub trait StandbyConflicts: Send + Sync {
    /// Resolves conflicts with every snapshot that may still need
    /// transactions up to `latest_removed_xid` in `rel`. Returns once no
    /// such snapshot remains.
    fn resolve_conflict_with_snapshot(&self, latest_removed_xid: TransactionId, rel: RelFileId);

    /// Number of query backends connected to `database_id`.
    fn active_backend_count(&self, database_id: u32) -> usize;
}

/// A replica without queries: no backends, nothing to resolve.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoStandby;

impl StandbyConflicts for NoStandby {
    fn resolve_conflict_with_snapshot(&self, _latest_removed_xid: TransactionId, _rel: RelFileId) {}

    fn active_backend_count(&self, _database_id: u32) -> usize {
        0
    }
}
