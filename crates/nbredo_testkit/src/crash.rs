//! Crash/restart testing for B-tree replay.
//!
//! A log replayed in one pass must leave the same pages (modulo masking) as
//! the same log replayed up to some record, crashed, and resumed from the
//! last restart point.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use nbredo_testkit::crash::{restart_equivalence, CrashMode};
//!
//! let report = restart_equivalence(primary.wal(), 40, CrashMode::FlushEverything)?;
//! assert!(report.is_equivalent());
//! ```

use nbredo_core::mask::equal_masked;
use nbredo_core::{
    BackendPageStore, BasicOnlineBtree, BlockNumber, BtreeRedo, BufferPool, CoreResult, Lsn,
    RecoverySession, RedoConfig, RelFileId, ReplaySummary, WalWriter,
};
use std::collections::BTreeSet;
use std::sync::Arc;

/// What survives of the replica's buffers at the crash.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CrashMode {
    /// Only pages flushed by restart points survive.
    DiscardUnflushed,
    /// Every page is written out first, so the store is ahead of the
    /// restart point the second run resumes from.
    FlushEverything,
}

/// Outcome of one crash/restart comparison.
#[derive(Debug, Clone)]
pub struct RestartReport {
    /// Records replayed before the crash.
    pub crash_after: u64,
    /// Restart point the second run resumed from, if one was taken.
    pub restart_from: Option<Lsn>,
    /// Blocks whose masked contents differ between the two runs.
    pub differing: Vec<(RelFileId, BlockNumber)>,
}

impl RestartReport {
    /// True if both runs produced the same pages.
    #[must_use]
    pub fn is_equivalent(&self) -> bool {
        self.differing.is_empty()
    }
}

/// Replays all of `wal` into a fresh in-memory pool and runs end-of-recovery
/// cleanup.
pub fn replay_fresh(
    wal: &WalWriter,
    config: RedoConfig,
) -> CoreResult<(Arc<BufferPool>, ReplaySummary)> {
    let pool = Arc::new(BufferPool::new(BackendPageStore::in_memory()));
    let mut session = RecoverySession::new(wal, BtreeRedo::new(Arc::clone(&pool), config));
    session.replay()?;
    let summary = session.finish(&BasicOnlineBtree::default())?;
    Ok((pool, summary))
}

/// Compares replay of `wal` in one pass against replay that crashes after
/// `crash_after` records and restarts.
///
/// The crashing run asks for a restart point after every record; the last
/// one granted is where the second run resumes.
pub fn restart_equivalence(
    wal: &WalWriter,
    crash_after: u64,
    mode: CrashMode,
) -> CoreResult<RestartReport> {
    let (expected, _) = replay_fresh(wal, RedoConfig::default())?;

    let pool = Arc::new(BufferPool::new(BackendPageStore::in_memory()));
    let mut point = None;
    {
        let redo = BtreeRedo::new(Arc::clone(&pool), RedoConfig::default());
        let mut session = RecoverySession::new(wal, redo);
        for _ in 0..crash_after {
            if session.replay_records(1)? == 0 {
                break;
            }
            if let Some(granted) = session.create_restartpoint()? {
                point = Some(granted);
            }
        }
    }
    if mode == CrashMode::FlushEverything {
        pool.flush_all()?;
    }
    pool.discard_all();

    let redo = BtreeRedo::new(Arc::clone(&pool), RedoConfig::default());
    let mut session = match point {
        Some(point) => RecoverySession::resume(wal, redo, point),
        None => RecoverySession::new(wal, redo),
    };
    session.replay()?;
    session.finish(&BasicOnlineBtree::default())?;

    Ok(RestartReport {
        crash_after,
        restart_from: point.map(|point| point.lsn),
        differing: differing_blocks(&expected, &pool)?,
    })
}

/// Blocks of any relation in either pool whose masked contents differ.
/// A block present in only one pool counts as differing.
pub fn differing_blocks(
    a: &BufferPool,
    b: &BufferPool,
) -> CoreResult<Vec<(RelFileId, BlockNumber)>> {
    let mut rels: BTreeSet<RelFileId> = a.store().relations()?.into_iter().collect();
    rels.extend(b.store().relations()?);

    let mut differing = Vec::new();
    for rel in rels {
        let nblocks = a.nblocks(rel)?.max(b.nblocks(rel)?);
        for block in 0..nblocks {
            let same = match (a.page_copy(rel, block)?, b.page_copy(rel, block)?) {
                (Some(left), Some(right)) => equal_masked(&left, &right),
                (None, None) => true,
                _ => false,
            };
            if !same {
                differing.push((rel, block));
            }
        }
    }
    Ok(differing)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::PrimaryIndex;

    fn workload() -> PrimaryIndex {
        let mut primary = PrimaryIndex::in_memory();
        for n in 0..120 {
            primary.insert(n * 3).unwrap();
        }
        primary.vacuum_leaf(1).unwrap();
        for n in 0..60 {
            primary.insert(n * 3 + 1).unwrap();
        }
        primary
    }

    #[test]
    fn fresh_replay_matches_primary() {
        let primary = workload();
        let (replica, summary) = replay_fresh(primary.wal(), RedoConfig::default()).unwrap();
        assert_eq!(summary.pending_finished, 0);
        assert!(differing_blocks(primary.pool(), &replica).unwrap().is_empty());
    }

    #[test]
    fn restart_in_the_middle_is_equivalent() {
        let primary = workload();
        for mode in [CrashMode::DiscardUnflushed, CrashMode::FlushEverything] {
            let report = restart_equivalence(primary.wal(), 97, mode).unwrap();
            assert!(report.is_equivalent(), "{report:?}");
            assert!(report.restart_from.is_some());
        }
    }

    #[test]
    fn crash_before_first_record_replays_from_scratch() {
        let primary = workload();
        let report = restart_equivalence(primary.wal(), 0, CrashMode::DiscardUnflushed).unwrap();
        assert!(report.is_equivalent(), "{report:?}");
        assert_eq!(report.restart_from, None);
    }
}
