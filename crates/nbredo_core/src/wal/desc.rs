//! Human-readable rendering of records, for logs and `dump-wal`.

use crate::wal::record::{BtreeRecord, DeletePageKind, InsertKind, WalRecord};
use std::fmt;

impl fmt::Display for BtreeRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = self.kind().name();
        match self {
            Self::Insert(rec) => {
                write!(f, "{name}: rel {}; tid {}/{}", rec.rel, rec.block, rec.offset)?;
                match &rec.item {
                    Some(item) => write!(f, "; add length {} item", item.len())?,
                    None => write!(f, "; page {} from image", rec.block)?,
                }
                match rec.kind {
                    InsertKind::Leaf => Ok(()),
                    InsertKind::Upper { downlink } => {
                        write!(f, "; completes split of {downlink}")
                    }
                    InsertKind::Meta { downlink, meta } => write!(
                        f,
                        "; completes split of {downlink}; restore metadata (root {}, level {}, fastroot {}, fastlevel {})",
                        meta.root, meta.level, meta.fastroot, meta.fastlevel
                    ),
                }
            }
            Self::Split(rec) => write!(
                f,
                "{name}: rel {} left {}, right {}, next {}, level {}, firstright {}",
                rec.rel, rec.left, rec.right, rec.rnext, rec.level, rec.first_right
            ),
            Self::Vacuum(rec) => write!(
                f,
                "{name}: rel {}; blk {}, lastBlockVacuumed {}; {} items",
                rec.rel,
                rec.block,
                rec.last_block_vacuumed,
                rec.offsets.len()
            ),
            Self::Delete(rec) => write!(
                f,
                "{name}: index {}; iblk {}, heap {}; {} items",
                rec.rel,
                rec.block,
                rec.heap_rel,
                rec.offsets.len()
            ),
            Self::DeletePage(rec) => {
                write!(
                    f,
                    "{name}: rel {}; tid {}/{}; dead {}; left {}; right {}",
                    rec.rel, rec.parent, rec.parent_offset, rec.dead, rec.left, rec.right
                )?;
                match rec.kind {
                    DeletePageKind::Plain => Ok(()),
                    DeletePageKind::HalfDead => write!(f, "; parent half-dead"),
                    DeletePageKind::Meta(meta) => write!(
                        f,
                        "; update metadata (root {}, level {}, fastroot {}, fastlevel {})",
                        meta.root, meta.level, meta.fastroot, meta.fastlevel
                    ),
                }
            }
            Self::NewRoot(rec) => write!(
                f,
                "{name}: rel {}; root {} lev {}",
                rec.rel, rec.root, rec.level
            ),
            Self::ReusePage(rec) => write!(
                f,
                "{name}: rel {}; blk {}; latestRemovedXid {}",
                rec.rel,
                rec.block,
                rec.latest_removed_xid.as_u32()
            ),
        }
    }
}

impl fmt::Display for WalRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.lsn, self.record)?;
        if !self.backups.is_empty() {
            let slots: Vec<String> = self.backups.iter().map(|b| b.slot.to_string()).collect();
            write!(f, " [images {}]", slots.join(","))?;
        }
        Ok(())
    }
}

/// Short description of a record.
#[must_use]
pub fn describe(record: &BtreeRecord) -> String {
    record.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Lsn, RelFileId, TransactionId};
    use crate::wal::record::{InsertRecord, ReusePageRecord, SplitRecord};

    const REL: RelFileId = RelFileId::new(1, 2, 3);

    #[test]
    fn insert_description() {
        let rec = BtreeRecord::Insert(InsertRecord {
            rel: REL,
            block: 10,
            offset: 3,
            kind: InsertKind::Leaf,
            item: Some(vec![0; 12]),
        });
        assert_eq!(
            describe(&rec),
            "insert: rel 1/2/3; tid 10/3; add length 12 item"
        );
    }

    #[test]
    fn split_description() {
        let rec = BtreeRecord::Split(SplitRecord {
            rel: REL,
            left: 10,
            right: 11,
            rnext: 12,
            level: 0,
            first_right: 5,
            is_root: false,
            new_item_offset: Some(3),
            downlink: None,
            left_hikey: None,
            new_item: Some(vec![1]),
            right_items: Vec::new(),
        });
        assert_eq!(
            describe(&rec),
            "split_l: rel 1/2/3 left 10, right 11, next 12, level 0, firstright 5"
        );
    }

    #[test]
    fn wal_record_shows_lsn_and_images() {
        let rec = WalRecord::new(
            Lsn::new(0x1_0000_0010),
            BtreeRecord::ReusePage(ReusePageRecord {
                rel: REL,
                block: 4,
                latest_removed_xid: TransactionId::new(99),
            }),
        );
        assert_eq!(
            rec.to_string(),
            "1/00000010 reuse_page: rel 1/2/3; blk 4; latestRemovedXid 99"
        );
    }
}
