//! End-of-recovery completion of structural operations whose last record
//! never arrived.

use super::{BtreeRedo, IncompleteAction};
use crate::btree::{BtPageOpaque, IndexTuple};
use crate::buffer::{BufferPool, ReadMode};
use crate::error::{CoreError, CoreResult};
use crate::types::{BlockNumber, RelFileId, P_HIKEY};
use tracing::info;

/// The online (non-replay) B-tree code the cleanup pass hands unfinished
/// work to. Its changes are ordinary page writes, not replay.
pub trait OnlineBtree {
    /// Inserts `downlink` (pointing at `right`) into the parent of `left`.
    ///
    /// `is_root` says the split page was the root; `is_only` says the two
    /// halves are the only pages on their level, in which case a new root
    /// may have to be created above them.
    ///
    /// # Errors
    ///
    /// Any error aborts the cleanup pass.
    #[allow(clippy::too_many_arguments)]
    fn insert_downlink(
        &self,
        pool: &BufferPool,
        rel: RelFileId,
        left: BlockNumber,
        right: BlockNumber,
        downlink: &IndexTuple,
        is_root: bool,
        is_only: bool,
    ) -> CoreResult<()>;

    /// Finishes deleting the half-dead page `block`. Returns the number of
    /// pages deleted, 0 meaning nothing could be done.
    ///
    /// # Errors
    ///
    /// Any error aborts the cleanup pass.
    fn continue_page_deletion(
        &self,
        pool: &BufferPool,
        rel: RelFileId,
        block: BlockNumber,
    ) -> CoreResult<usize>;
}

impl BtreeRedo {
    /// Completes every pending action through `online`. Returns the number
    /// of actions finished.
    ///
    /// Each action leaves the ledger as soon as it completes, so a retry
    /// after a failure only sees the work that is still outstanding.
    ///
    /// # Errors
    ///
    /// Returns `CleanupFailed` if a split half is missing or a pending
    /// deletion cannot proceed, or whatever `online` reports. The failed
    /// action and everything after it stay in the ledger.
    pub fn cleanup(&mut self, online: &dyn OnlineBtree) -> CoreResult<usize> {
        let pending: Vec<IncompleteAction> = self.ledger.iter().copied().collect();
        if pending.is_empty() {
            return Ok(0);
        }
        info!(pending = pending.len(), "completing unfinished btree operations");

        for action in &pending {
            match *action {
                IncompleteAction::Split {
                    rel,
                    left,
                    right,
                    is_root,
                } => {
                    self.finish_split(online, rel, left, right, is_root)?;
                    self.ledger.forget_split(rel, right, is_root);
                }
                IncompleteAction::Deletion { rel, block } => {
                    if self.pool.read_buffer(rel, block, ReadMode::Normal)?.is_some()
                        && online.continue_page_deletion(&self.pool, rel, block)? == 0
                    {
                        return Err(CoreError::cleanup_failed(format!(
                            "could not finish deleting half-dead block {block} of {rel}"
                        )));
                    }
                    self.ledger.forget_deletion(rel, block);
                }
            }
        }

        info!(finished = pending.len(), "btree cleanup complete");
        Ok(pending.len())
    }

    fn finish_split(
        &self,
        online: &dyn OnlineBtree,
        rel: RelFileId,
        left: BlockNumber,
        right: BlockNumber,
        is_root: bool,
    ) -> CoreResult<()> {
        let missing = |block: BlockNumber| {
            CoreError::cleanup_failed(format!("split half {block} of {rel} not found"))
        };
        let left_buffer = self
            .pool
            .read_buffer(rel, left, ReadMode::Normal)?
            .ok_or_else(|| missing(left))?;
        let right_buffer = self
            .pool
            .read_buffer(rel, right, ReadMode::Normal)?
            .ok_or_else(|| missing(right))?;

        let (is_only, downlink) = {
            let left_page = left_buffer.lock_shared();
            let right_page = right_buffer.lock_shared();
            let left_opaque = BtPageOpaque::read(&left_page)?;
            let right_opaque = BtPageOpaque::read(&right_page)?;
            let is_only = left_opaque.is_leftmost() && right_opaque.is_rightmost();

            // The parent separator is the left half's high key, pointing right.
            let mut downlink = IndexTuple::decode(left_page.item(P_HIKEY)?)?;
            downlink.block = right;
            downlink.offset = P_HIKEY;
            (is_only, downlink)
        };
        drop(left_buffer);
        drop(right_buffer);

        online.insert_downlink(&self.pool, rel, left, right, &downlink, is_root, is_only)
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use super::*;
    use crate::types::{Lsn, P_NONE};
    use crate::wal::{BtreeRecord, SplitRecord, WalRecord};
    use parking_lot::Mutex;

    #[derive(Default)]
    struct Recorder {
        downlinks: Mutex<Vec<(BlockNumber, BlockNumber, IndexTuple, bool, bool)>>,
        deletions: Mutex<Vec<BlockNumber>>,
        deleted_per_call: usize,
        fail_next_deletion: Mutex<bool>,
    }

    impl OnlineBtree for Recorder {
        fn insert_downlink(
            &self,
            _pool: &BufferPool,
            _rel: RelFileId,
            left: BlockNumber,
            right: BlockNumber,
            downlink: &IndexTuple,
            is_root: bool,
            is_only: bool,
        ) -> CoreResult<()> {
            self.downlinks
                .lock()
                .push((left, right, downlink.clone(), is_root, is_only));
            Ok(())
        }

        fn continue_page_deletion(
            &self,
            _pool: &BufferPool,
            _rel: RelFileId,
            block: BlockNumber,
        ) -> CoreResult<usize> {
            if std::mem::take(&mut *self.fail_next_deletion.lock()) {
                return Err(CoreError::cleanup_failed("deletion interrupted"));
            }
            self.deletions.lock().push(block);
            Ok(self.deleted_per_call)
        }
    }

    fn split_root_leaf(redo: &mut BtreeRedo) {
        let pool = std::sync::Arc::clone(redo.pool());
        let mut root = leaf_opaque(P_NONE, P_NONE);
        root.flags |= crate::btree::BTP_ROOT;
        put_btree_page(
            &pool,
            1,
            100,
            root,
            &[key_item(5, 1, "a"), key_item(5, 2, "b"), key_item(5, 3, "c")],
        );
        redo.redo(&WalRecord::new(
            Lsn::new(200),
            BtreeRecord::Split(SplitRecord {
                rel: REL,
                left: 1,
                right: 2,
                rnext: P_NONE,
                level: 0,
                first_right: 2,
                is_root: true,
                new_item_offset: None,
                downlink: None,
                left_hikey: None,
                new_item: None,
                right_items: vec![key_item(5, 2, "b"), key_item(5, 3, "c")],
            }),
        ))
        .unwrap();
    }

    #[test]
    fn pending_split_becomes_parent_insertion() {
        let pool = pool();
        let mut redo = engine(&pool);
        split_root_leaf(&mut redo);
        assert!(!redo.safe_restartpoint());

        let online = Recorder::default();
        assert_eq!(redo.cleanup(&online).unwrap(), 1);
        assert!(redo.safe_restartpoint());

        let calls = online.downlinks.lock();
        assert_eq!(calls.len(), 1);
        let (left, right, downlink, is_root, is_only) = &calls[0];
        assert_eq!((*left, *right, *is_root, *is_only), (1, 2, true, true));
        assert_eq!(downlink.block, 2);
        assert_eq!(downlink.offset, P_HIKEY);
        assert_eq!(downlink.key, b"b");
    }

    #[test]
    fn split_with_missing_half_is_fatal_and_keeps_ledger() {
        let pool = pool();
        let mut redo = engine(&pool);
        redo.ledger.log_split(REL, 1, 2, false);
        let err = redo.cleanup(&Recorder::default()).unwrap_err();
        assert!(matches!(err, CoreError::CleanupFailed { .. }));
        assert_eq!(redo.ledger().len(), 1);
    }

    #[test]
    fn deletions_continue_or_fail() {
        let pool = pool();
        put_btree_page(&pool, 40, 100, internal_opaque(P_NONE, P_NONE, 1), &[]);
        let mut redo = engine(&pool);

        redo.ledger.log_deletion(REL, 40);
        redo.ledger.log_deletion(REL, 41);
        let online = Recorder {
            deleted_per_call: 1,
            ..Recorder::default()
        };
        assert_eq!(redo.cleanup(&online).unwrap(), 2);
        // Block 41 does not exist, so only 40 reaches the collaborator.
        assert_eq!(*online.deletions.lock(), vec![40]);

        redo.ledger.log_deletion(REL, 40);
        let stuck = Recorder::default();
        assert!(matches!(
            redo.cleanup(&stuck),
            Err(CoreError::CleanupFailed { .. })
        ));
    }

    #[test]
    fn retry_after_failure_skips_finished_work() {
        let pool = pool();
        let mut redo = engine(&pool);
        split_root_leaf(&mut redo);
        put_btree_page(&pool, 40, 100, internal_opaque(P_NONE, P_NONE, 1), &[]);
        redo.ledger.log_deletion(REL, 40);

        let online = Recorder {
            deleted_per_call: 1,
            fail_next_deletion: Mutex::new(true),
            ..Recorder::default()
        };
        assert!(matches!(
            redo.cleanup(&online),
            Err(CoreError::CleanupFailed { .. })
        ));
        assert_eq!(
            redo.ledger().iter().copied().collect::<Vec<_>>(),
            vec![IncompleteAction::Deletion { rel: REL, block: 40 }]
        );

        assert_eq!(redo.cleanup(&online).unwrap(), 1);
        assert!(redo.safe_restartpoint());
        let inserted: Vec<BlockNumber> =
            online.downlinks.lock().iter().map(|call| call.1).collect();
        assert_eq!(inserted, vec![2]);
        assert_eq!(*online.deletions.lock(), vec![40]);
    }

    #[test]
    fn empty_ledger_needs_no_collaborator_calls() {
        let pool = pool();
        let mut redo = engine(&pool);
        let online = Recorder::default();
        assert_eq!(redo.cleanup(&online).unwrap(), 0);
        assert!(online.downlinks.lock().is_empty());
    }
}
