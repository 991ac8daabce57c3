//! Recovery session: drives a WAL stream through [`BtreeRedo`].

use crate::error::{CoreError, CoreResult};
use crate::redo::{BtreeRedo, OnlineBtree};
use crate::types::Lsn;
use crate::wal::{WalRecord, WalWriter};
use tracing::{debug, info};

/// A point replay can restart from after a crash: every page change up to
/// `lsn` is durable and nothing was in flight.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RestartPoint {
    /// LSN of the last record replayed before the point.
    pub lsn: Lsn,
    /// Log offset of the first record after the point.
    pub offset: u64,
}

/// Outcome of a finished recovery session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReplaySummary {
    /// Records replayed by this session.
    pub records: u64,
    /// LSN of the last record replayed.
    pub last_lsn: Lsn,
    /// Log offset just past the last record replayed.
    pub end_offset: u64,
    /// Incomplete actions completed by the cleanup pass.
    pub pending_finished: usize,
}

/// Replays a log in order, one record at a time.
///
/// The session owns the redo engine (and with it the pending-action ledger),
/// so two sessions never share state.
pub struct RecoverySession<'a> {
    wal: &'a WalWriter,
    redo: BtreeRedo,
    position: u64,
    last_lsn: Lsn,
    records: u64,
}

impl<'a> RecoverySession<'a> {
    /// Starts a session at the beginning of `wal`.
    pub fn new(wal: &'a WalWriter, redo: BtreeRedo) -> Self {
        Self::start(wal, redo, 0, Lsn::INVALID)
    }

    /// Starts a session at a restart point left by an earlier one.
    pub fn resume(wal: &'a WalWriter, redo: BtreeRedo, point: RestartPoint) -> Self {
        Self::start(wal, redo, point.offset, point.lsn)
    }

    fn start(wal: &'a WalWriter, mut redo: BtreeRedo, position: u64, last_lsn: Lsn) -> Self {
        redo.startup();
        info!(offset = position, after = %last_lsn, "starting btree recovery");
        Self {
            wal,
            redo,
            position,
            last_lsn,
            records: 0,
        }
    }

    /// The redo engine.
    #[must_use]
    pub fn redo(&self) -> &BtreeRedo {
        &self.redo
    }

    /// Log offset of the next record to replay.
    #[must_use]
    pub fn position(&self) -> u64 {
        self.position
    }

    /// LSN of the last record replayed.
    #[must_use]
    pub fn last_lsn(&self) -> Lsn {
        self.last_lsn
    }

    /// Replays every remaining record. Returns how many were replayed.
    ///
    /// # Errors
    ///
    /// Any read or redo error; the session cannot continue after one.
    pub fn replay(&mut self) -> CoreResult<u64> {
        self.replay_bounded(|_| true, u64::MAX)
    }

    /// Replays records up to and including `lsn`.
    ///
    /// # Errors
    ///
    /// See [`RecoverySession::replay`].
    pub fn replay_until(&mut self, lsn: Lsn) -> CoreResult<u64> {
        self.replay_bounded(|record| record.lsn <= lsn, u64::MAX)
    }

    /// Replays at most `count` records.
    ///
    /// # Errors
    ///
    /// See [`RecoverySession::replay`].
    pub fn replay_records(&mut self, count: u64) -> CoreResult<u64> {
        self.replay_bounded(|_| true, count)
    }

    fn replay_bounded<F>(&mut self, mut accept: F, limit: u64) -> CoreResult<u64>
    where
        F: FnMut(&WalRecord) -> bool,
    {
        let wal = self.wal;
        let mut reader = wal.reader(self.position)?;
        let mut applied = 0;

        while applied < limit {
            let Some(next) = reader.next() else {
                break;
            };
            let (offset, record) = next?;
            if !accept(&record) {
                self.position = offset;
                break;
            }
            if record.lsn <= self.last_lsn {
                return Err(CoreError::wal_corruption(format!(
                    "record at offset {offset} has LSN {} not after {}",
                    record.lsn, self.last_lsn
                )));
            }

            self.redo.redo(&record)?;
            self.last_lsn = record.lsn;
            self.position = reader.position();
            self.records += 1;
            applied += 1;
        }
        Ok(applied)
    }

    /// Flushes the pool and returns a restart point, or `None` while a
    /// multi-record operation is still in flight.
    ///
    /// # Errors
    ///
    /// Returns an error if the flush fails.
    pub fn create_restartpoint(&mut self) -> CoreResult<Option<RestartPoint>> {
        if !self.redo.safe_restartpoint() {
            debug!(
                pending = self.redo.ledger().len(),
                lsn = %self.last_lsn,
                "restart point refused: incomplete btree operations"
            );
            return Ok(None);
        }
        let written = self.redo.pool().flush_all()?;
        let point = RestartPoint {
            lsn: self.last_lsn,
            offset: self.position,
        };
        debug!(
            lsn = %point.lsn,
            pages = written,
            resident = self.redo.pool().resident_count(),
            "restart point created"
        );
        Ok(Some(point))
    }

    /// Ends the session: completes pending actions through `online` and
    /// flushes every dirty page.
    ///
    /// # Errors
    ///
    /// Returns the cleanup or flush error.
    pub fn finish(mut self, online: &dyn OnlineBtree) -> CoreResult<ReplaySummary> {
        let pending_finished = self.redo.cleanup(online)?;
        self.redo.pool().flush_all()?;
        let summary = ReplaySummary {
            records: self.records,
            last_lsn: self.last_lsn,
            end_offset: self.position,
            pending_finished,
        };
        info!(
            records = summary.records,
            last_lsn = %summary.last_lsn,
            pending_finished,
            "btree recovery complete"
        );
        Ok(summary)
    }
}
