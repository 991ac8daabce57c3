//! Page-deletion replay.
//!
//! Four independent touches, each LSN-gated on its own page: the parent
//! loses its downlink to the dead page, both siblings are relinked around
//! it, and the dead page itself is reinitialized as `DELETED`.

use super::apply::{modify_page, rebuild_page, restore_meta, LockMode};
use super::BtreeRedo;
use crate::btree::{init_page, BtPageOpaque, IndexTuple, BTP_DELETED, BTP_HALF_DEAD};
use crate::error::{CoreError, CoreResult};
use crate::types::{P_HIKEY, P_NONE};
use crate::wal::{DeletePageKind, DeletePageRecord, WalRecord};

impl BtreeRedo {
    pub(super) fn redo_delete_page(
        &mut self,
        record: &WalRecord,
        rec: &DeletePageRecord,
    ) -> CoreResult<()> {
        let lsn = record.lsn;
        let half_dead = matches!(rec.kind, DeletePageKind::HalfDead);

        if !record.has_backup(0) {
            modify_page(&self.pool, rec.rel, rec.parent, lsn, LockMode::Exclusive, |page| {
                let poff = rec.parent_offset;
                let mut opaque = BtPageOpaque::read(page)?;
                if poff >= page.max_offset() {
                    // Last downlink on the parent: the parent empties out.
                    if !half_dead {
                        return Err(CoreError::page_corruption(format!(
                            "removing last downlink of block {} without marking it half-dead",
                            rec.parent
                        )));
                    }
                    page.delete_item(poff)?;
                    opaque.flags |= BTP_HALF_DEAD;
                    opaque.write(page)
                } else {
                    IndexTuple::set_tid(page.item_mut(poff)?, rec.right, P_HIKEY)?;
                    page.delete_item(poff + 1)
                }
            })?;
        }

        if !record.has_backup(1) {
            modify_page(&self.pool, rec.rel, rec.right, lsn, LockMode::Exclusive, |page| {
                let mut opaque = BtPageOpaque::read(page)?;
                opaque.prev = rec.left;
                opaque.write(page)
            })?;
        }

        if rec.left != P_NONE && !record.has_backup(2) {
            modify_page(&self.pool, rec.rel, rec.left, lsn, LockMode::Exclusive, |page| {
                let mut opaque = BtPageOpaque::read(page)?;
                opaque.next = rec.right;
                opaque.write(page)
            })?;
        }

        rebuild_page(&self.pool, rec.rel, rec.dead, lsn, |page| {
            init_page(page);
            BtPageOpaque {
                prev: rec.left,
                next: rec.right,
                level_or_xact: rec.xact.as_u32(),
                flags: BTP_DELETED,
                cycle_id: 0,
            }
            .write(page)
        })?;

        if let DeletePageKind::Meta(meta) = &rec.kind {
            restore_meta(&self.pool, rec.rel, lsn, meta)?;
        }

        self.ledger.forget_deletion(rec.rel, rec.dead);
        if half_dead {
            self.ledger.log_deletion(rec.rel, rec.parent);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use crate::btree::{IndexTuple, MetaPage, MetaSnapshot, BTP_HALF_DEAD, BTP_LEAF};
    use crate::error::CoreError;
    use crate::redo::IncompleteAction;
    use crate::types::{BlockNumber, Lsn, TransactionId, BTREE_METAPAGE, P_NONE};
    use crate::wal::{BtreeRecord, DeletePageKind, DeletePageRecord, WalRecord};

    fn downlink(child: BlockNumber, key: &str) -> Vec<u8> {
        IndexTuple::downlink(child, key).encode()
    }

    fn delete_page(
        parent: BlockNumber,
        parent_offset: u16,
        dead: BlockNumber,
        left: BlockNumber,
        right: BlockNumber,
        kind: DeletePageKind,
    ) -> BtreeRecord {
        BtreeRecord::DeletePage(DeletePageRecord {
            rel: REL,
            parent,
            parent_offset,
            dead,
            left,
            right,
            xact: TransactionId::new(777),
            kind,
        })
    }

    #[test]
    fn last_downlink_makes_parent_half_dead() {
        let pool = pool();
        put_btree_page(&pool, 29, 100, leaf_opaque(P_NONE, 30), &[key_item(1, 1, "a")]);
        put_btree_page(&pool, 30, 100, leaf_opaque(29, 31), &[key_item(1, 2, "b")]);
        put_btree_page(&pool, 31, 100, leaf_opaque(30, P_NONE), &[]);
        let hikey = key_item(0, 0, "z");
        put_btree_page(
            &pool,
            40,
            100,
            internal_opaque(39, 41, 1),
            &[hikey.clone(), downlink(30, "m")],
        );

        let mut redo = engine(&pool);
        redo.redo(&WalRecord::new(
            Lsn::new(300),
            delete_page(40, 2, 30, 29, 31, DeletePageKind::HalfDead),
        ))
        .unwrap();

        assert_eq!(page_items(&pool, 40), vec![hikey]);
        assert_ne!(opaque_of(&pool, 40).flags & BTP_HALF_DEAD, 0);
        assert_eq!(opaque_of(&pool, 29).next, 31);
        assert_eq!(opaque_of(&pool, 31).prev, 29);

        let dead = opaque_of(&pool, 30);
        assert!(dead.is_deleted());
        assert_eq!(dead.deletion_xid(), Some(TransactionId::new(777)));
        assert_eq!((dead.prev, dead.next, dead.cycle_id), (29, 31, 0));
        assert!(page_items(&pool, 30).is_empty());

        assert_eq!(
            redo.ledger().iter().copied().collect::<Vec<_>>(),
            vec![IncompleteAction::Deletion { rel: REL, block: 40 }]
        );
    }

    #[test]
    fn inner_downlink_is_redirected_to_right_sibling() {
        let pool = pool();
        put_btree_page(&pool, 29, 100, leaf_opaque(P_NONE, 30), &[]);
        put_btree_page(&pool, 30, 100, leaf_opaque(29, 31), &[]);
        put_btree_page(&pool, 31, 100, leaf_opaque(30, P_NONE), &[]);
        put_btree_page(
            &pool,
            40,
            100,
            internal_opaque(P_NONE, P_NONE, 1),
            &[downlink(29, ""), downlink(30, "m"), downlink(31, "t")],
        );

        let mut redo = engine(&pool);
        redo.redo(&WalRecord::new(
            Lsn::new(300),
            delete_page(40, 2, 30, 29, 31, DeletePageKind::Plain),
        ))
        .unwrap();

        let parent = page_items(&pool, 40);
        assert_eq!(parent.len(), 2);
        assert_eq!(IndexTuple::tid_block(&parent[0]).unwrap(), 29);
        let redirected = IndexTuple::decode(&parent[1]).unwrap();
        assert_eq!((redirected.block, redirected.key.as_slice()), (31, &b"m"[..]));
        assert_eq!(opaque_of(&pool, 40).flags & BTP_HALF_DEAD, 0);
        assert!(redo.ledger().is_empty());
    }

    #[test]
    fn leftmost_dead_page_only_fixes_right_sibling() {
        let pool = pool();
        put_btree_page(&pool, 30, 100, leaf_opaque(P_NONE, 31), &[]);
        put_btree_page(&pool, 31, 100, leaf_opaque(30, P_NONE), &[]);
        put_btree_page(
            &pool,
            40,
            100,
            internal_opaque(P_NONE, P_NONE, 1),
            &[downlink(30, ""), downlink(31, "t")],
        );
        let mut redo = engine(&pool);
        redo.redo(&WalRecord::new(
            Lsn::new(300),
            delete_page(40, 1, 30, P_NONE, 31, DeletePageKind::Plain),
        ))
        .unwrap();
        assert_eq!(opaque_of(&pool, 31).prev, P_NONE);
        assert_eq!(opaque_of(&pool, 31).flags, BTP_LEAF);
        assert_eq!(IndexTuple::tid_block(&page_items(&pool, 40)[0]).unwrap(), 31);
    }

    #[test]
    fn completing_deletion_and_rewriting_meta() {
        let pool = pool();
        put_btree_page(&pool, 40, 100, internal_opaque(P_NONE, P_NONE, 1), &[]);
        put_btree_page(&pool, 41, 100, internal_opaque(40, P_NONE, 1), &[]);
        put_btree_page(
            &pool,
            50,
            100,
            internal_opaque(P_NONE, P_NONE, 2),
            &[downlink(40, ""), downlink(41, "t")],
        );
        let mut redo = engine(&pool);
        redo.ledger.log_deletion(REL, 40);

        let meta = MetaSnapshot {
            root: 50,
            level: 2,
            fastroot: 41,
            fastlevel: 1,
        };
        redo.redo(&WalRecord::new(
            Lsn::new(400),
            delete_page(50, 1, 40, P_NONE, 41, DeletePageKind::Meta(meta)),
        ))
        .unwrap();

        assert!(redo.ledger().is_empty());
        assert!(opaque_of(&pool, 40).is_deleted());
        let metapage = pool.page_copy(REL, BTREE_METAPAGE).unwrap().unwrap();
        assert_eq!(MetaPage::read(&metapage).unwrap().roots, meta);
    }

    #[test]
    fn replay_is_idempotent() {
        let pool = pool();
        put_btree_page(&pool, 29, 100, leaf_opaque(P_NONE, 30), &[]);
        put_btree_page(&pool, 31, 100, leaf_opaque(30, P_NONE), &[]);
        put_btree_page(&pool, 40, 100, internal_opaque(P_NONE, P_NONE, 1), &[downlink(30, "")]);
        let record = WalRecord::new(
            Lsn::new(300),
            delete_page(40, 1, 30, 29, 31, DeletePageKind::HalfDead),
        );
        let mut redo = engine(&pool);
        redo.redo(&record).unwrap();
        let before: Vec<_> = [29, 30, 31, 40]
            .iter()
            .map(|b| pool.page_copy(REL, *b).unwrap().unwrap())
            .collect();
        redo.redo(&record).unwrap();
        for (block, page) in [29, 30, 31, 40].iter().zip(before) {
            assert_eq!(pool.page_copy(REL, *block).unwrap().unwrap(), page);
        }
    }

    #[test]
    fn half_dead_parent_is_deleted_by_the_next_record() {
        let pool = pool();
        put_btree_page(&pool, 29, 100, leaf_opaque(P_NONE, 30), &[key_item(1, 1, "a")]);
        put_btree_page(&pool, 30, 100, leaf_opaque(29, 31), &[]);
        put_btree_page(&pool, 31, 100, leaf_opaque(30, P_NONE), &[key_item(1, 3, "u")]);
        put_btree_page(
            &pool,
            39,
            100,
            internal_opaque(P_NONE, 40, 1),
            &[key_item(0, 0, "m"), downlink(29, "")],
        );
        put_btree_page(
            &pool,
            40,
            100,
            internal_opaque(39, 41, 1),
            &[key_item(0, 0, "t"), downlink(30, "m")],
        );
        put_btree_page(&pool, 41, 100, internal_opaque(40, P_NONE, 1), &[downlink(31, "t")]);
        put_btree_page(
            &pool,
            50,
            100,
            internal_opaque(P_NONE, P_NONE, 2),
            &[downlink(39, ""), downlink(40, "m"), downlink(41, "t")],
        );

        let mut redo = engine(&pool);
        redo.redo(&WalRecord::new(
            Lsn::new(300),
            delete_page(40, 2, 30, 29, 31, DeletePageKind::HalfDead),
        ))
        .unwrap();
        redo.redo(&WalRecord::new(
            Lsn::new(400),
            delete_page(50, 2, 40, 39, 41, DeletePageKind::Plain),
        ))
        .unwrap();

        assert!(opaque_of(&pool, 30).is_deleted());
        assert!(opaque_of(&pool, 40).is_deleted());
        assert_eq!(opaque_of(&pool, 29).next, 31);
        assert_eq!(opaque_of(&pool, 39).next, 41);
        assert_eq!(opaque_of(&pool, 41).prev, 39);

        let children: Vec<BlockNumber> = page_items(&pool, 50)
            .iter()
            .map(|item| IndexTuple::tid_block(item).unwrap())
            .collect();
        assert_eq!(children, vec![39, 41]);
        assert!(redo.ledger().is_empty());
    }

    #[test]
    fn missing_parent_is_fatal() {
        let pool = pool();
        let mut redo = engine(&pool);
        let err = redo
            .redo(&WalRecord::new(
                Lsn::new(300),
                delete_page(40, 1, 30, 29, 31, DeletePageKind::Plain),
            ))
            .unwrap_err();
        assert!(matches!(err, CoreError::MissingBlock { block: 40, .. }));
    }
}
