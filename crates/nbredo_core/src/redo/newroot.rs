//! New-root replay.

use super::apply::{rebuild_page, restore_items, restore_meta};
use super::BtreeRedo;
use crate::btree::{init_page, BtPageOpaque, IndexTuple, MetaSnapshot, BTP_LEAF, BTP_ROOT};
use crate::error::{CoreError, CoreResult};
use crate::types::{P_FIRSTKEY, P_NONE};
use crate::wal::{NewRootRecord, WalRecord};

impl BtreeRedo {
    pub(super) fn redo_newroot(&mut self, record: &WalRecord, rec: &NewRootRecord) -> CoreResult<()> {
        let lsn = record.lsn;

        // The downlink to the right half of the old root sits at P_FIRSTKEY.
        let downlink = match rec.items.len() {
            0 => None,
            1 => {
                return Err(CoreError::wal_corruption(format!(
                    "new root at {lsn} carries a single item"
                )))
            }
            _ => Some(IndexTuple::tid_block(&rec.items[P_FIRSTKEY as usize - 1])?),
        };

        let flags = if rec.level == 0 { BTP_ROOT | BTP_LEAF } else { BTP_ROOT };
        rebuild_page(&self.pool, rec.rel, rec.root, lsn, |page| {
            init_page(page);
            BtPageOpaque {
                prev: P_NONE,
                next: P_NONE,
                level_or_xact: rec.level,
                flags,
                cycle_id: 0,
            }
            .write(page)?;
            restore_items(page, rec.rel, rec.root, &rec.items)
        })?;

        restore_meta(
            &self.pool,
            rec.rel,
            lsn,
            &MetaSnapshot {
                root: rec.root,
                level: rec.level,
                fastroot: rec.root,
                fastlevel: rec.level,
            },
        )?;

        if let Some(downlink) = downlink {
            self.ledger.forget_split(rec.rel, downlink, true);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use crate::btree::{IndexTuple, MetaPage, BTP_LEAF, BTP_ROOT};
    use crate::types::{Lsn, BTREE_METAPAGE};
    use crate::wal::{BtreeRecord, NewRootRecord, WalRecord};

    fn newroot(root: u32, level: u32, items: Vec<Vec<u8>>) -> WalRecord {
        WalRecord::new(
            Lsn::new(400),
            BtreeRecord::NewRoot(NewRootRecord {
                rel: REL,
                root,
                level,
                items,
            }),
        )
    }

    #[test]
    fn new_root_completes_root_split() {
        let pool = pool();
        let mut redo = engine(&pool);
        redo.ledger.log_split(REL, 1, 2, true);

        let items = vec![
            IndexTuple::downlink(1, "").encode(),
            IndexTuple::downlink(2, "m").encode(),
        ];
        redo.redo(&newroot(3, 1, items.clone())).unwrap();

        assert!(redo.ledger().is_empty());
        assert_eq!(page_items(&pool, 3), items);
        let opaque = opaque_of(&pool, 3);
        assert_eq!((opaque.flags, opaque.level(), opaque.prev, opaque.next), (BTP_ROOT, 1, 0, 0));

        let meta = MetaPage::read(&pool.page_copy(REL, BTREE_METAPAGE).unwrap().unwrap()).unwrap();
        assert_eq!((meta.roots.root, meta.roots.level), (3, 1));
        assert_eq!((meta.roots.fastroot, meta.roots.fastlevel), (3, 1));
    }

    #[test]
    fn empty_leaf_root_for_a_new_index() {
        let pool = pool();
        let mut redo = engine(&pool);
        redo.redo(&newroot(1, 0, Vec::new())).unwrap();
        assert_eq!(opaque_of(&pool, 1).flags, BTP_ROOT | BTP_LEAF);
        assert!(page_items(&pool, 1).is_empty());
        assert!(redo.ledger().is_empty());
    }

    #[test]
    fn replay_over_newer_root_changes_nothing() {
        let pool = pool();
        let mut redo = engine(&pool);
        let items = vec![
            IndexTuple::downlink(1, "").encode(),
            IndexTuple::downlink(2, "m").encode(),
        ];
        redo.redo(&newroot(3, 1, items)).unwrap();
        let root = pool.page_copy(REL, 3).unwrap().unwrap();
        let meta = pool.page_copy(REL, BTREE_METAPAGE).unwrap().unwrap();
        redo.redo(&newroot(3, 1, Vec::new())).unwrap();
        assert_eq!(pool.page_copy(REL, 3).unwrap().unwrap(), root);
        assert_eq!(pool.page_copy(REL, BTREE_METAPAGE).unwrap().unwrap(), meta);
    }

    #[test]
    fn single_item_root_is_rejected() {
        let pool = pool();
        let mut redo = engine(&pool);
        assert!(redo
            .redo(&newroot(3, 1, vec![IndexTuple::downlink(1, "").encode()]))
            .is_err());
    }
}
