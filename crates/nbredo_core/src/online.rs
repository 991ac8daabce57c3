//! A basic online B-tree collaborator for the end-of-recovery cleanup pass.
//!
//! [`BasicOnlineBtree`] performs the two operations cleanup needs directly on
//! the buffer pool: inserting a missing downlink (creating a new root when an
//! only-page split reached the top) and finishing a half-dead page deletion.
//! These are ordinary page writes: buffers are marked dirty and page LSNs
//! are left alone.

use crate::btree::{
    init_page, BtPageOpaque, IndexTuple, MetaPage, MetaSnapshot, BTP_DELETED, BTP_HALF_DEAD,
    BTP_LEAF, BTP_ROOT,
};
use crate::buffer::{BufferPool, ReadMode};
use crate::error::{CoreError, CoreResult};
use crate::page::Page;
use crate::redo::OnlineBtree;
use crate::types::{
    BlockNumber, OffsetNumber, RelFileId, TransactionId, BTREE_METAPAGE, P_HIKEY, P_NONE,
};
use tracing::{debug, info};

/// Online downlink insertion and page deletion over a [`BufferPool`].
#[derive(Debug, Clone, Copy)]
pub struct BasicOnlineBtree {
    deletion_xid: TransactionId,
}

impl Default for BasicOnlineBtree {
    fn default() -> Self {
        Self::new(TransactionId::FIRST_NORMAL)
    }
}

impl BasicOnlineBtree {
    /// Creates a collaborator that stamps deleted pages with `deletion_xid`.
    #[must_use]
    pub const fn new(deletion_xid: TransactionId) -> Self {
        Self { deletion_xid }
    }

    /// The xid stamped on pages this collaborator deletes.
    #[must_use]
    pub const fn deletion_xid(&self) -> TransactionId {
        self.deletion_xid
    }

    fn create_root(
        &self,
        pool: &BufferPool,
        rel: RelFileId,
        left: BlockNumber,
        downlink: &IndexTuple,
        child_level: u32,
    ) -> CoreResult<()> {
        let root = pool.nblocks(rel)?.max(BTREE_METAPAGE + 1);
        let level = child_level + 1;
        let items = [IndexTuple::downlink(left, Vec::new()).encode(), downlink.encode()];

        with_new_page(pool, rel, root, |page| {
            init_page(page);
            BtPageOpaque {
                prev: P_NONE,
                next: P_NONE,
                level_or_xact: level,
                flags: BTP_ROOT,
                cycle_id: 0,
            }
            .write(page)?;
            for item in &items {
                page.add_item(item, 0).ok_or_else(|| {
                    CoreError::page_capacity(rel, root, "new root cannot hold its downlinks")
                })?;
            }
            Ok(())
        })?;

        with_new_page(pool, rel, BTREE_METAPAGE, |page| {
            MetaPage::write(
                page,
                &MetaSnapshot {
                    root,
                    level,
                    fastroot: root,
                    fastlevel: level,
                },
            )
        })?;

        with_page(pool, rel, left, |page| {
            let mut opaque = BtPageOpaque::read(page)?;
            opaque.flags &= !BTP_ROOT;
            opaque.write(page)
        })?;

        info!(%rel, root, level, "created new root during cleanup");
        Ok(())
    }
}

impl OnlineBtree for BasicOnlineBtree {
    fn insert_downlink(
        &self,
        pool: &BufferPool,
        rel: RelFileId,
        left: BlockNumber,
        right: BlockNumber,
        downlink: &IndexTuple,
        is_root: bool,
        is_only: bool,
    ) -> CoreResult<()> {
        let child_level = read_opaque(pool, rel, left)?.level();

        let Some((parent, offset)) = find_parent(pool, rel, left, child_level)? else {
            if is_root || is_only {
                return self.create_root(pool, rel, left, downlink, child_level);
            }
            return Err(CoreError::cleanup_failed(format!(
                "no parent of block {left} at level {} in {rel}",
                child_level + 1
            )));
        };

        let item = downlink.encode();
        with_page(pool, rel, parent, |page| {
            page.add_item(&item, offset + 1).ok_or_else(|| {
                CoreError::page_capacity(
                    rel,
                    parent,
                    format!("no room for downlink to block {right}"),
                )
            })?;
            Ok(())
        })?;
        debug!(%rel, left, right, parent, "inserted missing downlink");
        Ok(())
    }

    fn continue_page_deletion(
        &self,
        pool: &BufferPool,
        rel: RelFileId,
        block: BlockNumber,
    ) -> CoreResult<usize> {
        let (opaque, empty) = {
            let page = read_page(pool, rel, block)?;
            let opaque = BtPageOpaque::read(&page)?;
            (opaque, opaque.first_data_key() > page.max_offset())
        };
        if opaque.is_rightmost() || opaque.is_root() || opaque.is_deleted() || !empty {
            return Ok(0);
        }

        let Some((parent, poff)) = find_parent(pool, rel, block, opaque.level())? else {
            return Err(CoreError::cleanup_failed(format!(
                "no parent of half-dead block {block} in {rel}"
            )));
        };

        let (parent_opaque, parent_max) = {
            let page = read_page(pool, rel, parent)?;
            (BtPageOpaque::read(&page)?, page.max_offset())
        };
        let parent_half_dead = poff >= parent_max;
        if parent_half_dead
            && (poff != parent_opaque.first_data_key()
                || parent_opaque.is_rightmost()
                || parent_opaque.is_root())
        {
            return Ok(0);
        }

        with_page(pool, rel, parent, |page| {
            if parent_half_dead {
                page.delete_item(poff)?;
                let mut opaque = BtPageOpaque::read(page)?;
                opaque.flags |= BTP_HALF_DEAD;
                opaque.write(page)
            } else {
                IndexTuple::set_tid(page.item_mut(poff)?, opaque.next, P_HIKEY)?;
                page.delete_item(poff + 1)
            }
        })?;

        if opaque.prev != P_NONE {
            with_page(pool, rel, opaque.prev, |page| {
                let mut sibling = BtPageOpaque::read(page)?;
                sibling.next = opaque.next;
                sibling.write(page)
            })?;
        }
        with_page(pool, rel, opaque.next, |page| {
            let mut sibling = BtPageOpaque::read(page)?;
            sibling.prev = opaque.prev;
            sibling.write(page)
        })?;

        let xid = self.deletion_xid;
        with_page(pool, rel, block, |page| {
            init_page(page);
            BtPageOpaque {
                prev: opaque.prev,
                next: opaque.next,
                level_or_xact: xid.as_u32(),
                flags: BTP_DELETED | (opaque.flags & BTP_LEAF),
                cycle_id: 0,
            }
            .write(page)
        })?;
        info!(%rel, block, parent, "finished deleting half-dead page");

        if parent_half_dead {
            return Ok(1 + self.continue_page_deletion(pool, rel, parent)?);
        }
        Ok(1)
    }
}

fn read_page(pool: &BufferPool, rel: RelFileId, block: BlockNumber) -> CoreResult<Page> {
    pool.page_copy(rel, block)?
        .ok_or(CoreError::MissingBlock { rel, block })
}

fn read_opaque(pool: &BufferPool, rel: RelFileId, block: BlockNumber) -> CoreResult<BtPageOpaque> {
    BtPageOpaque::read(&read_page(pool, rel, block)?)
}

fn with_page<F>(pool: &BufferPool, rel: RelFileId, block: BlockNumber, change: F) -> CoreResult<()>
where
    F: FnOnce(&mut Page) -> CoreResult<()>,
{
    let buffer = pool
        .read_buffer(rel, block, ReadMode::Normal)?
        .ok_or(CoreError::MissingBlock { rel, block })?;
    change(&mut buffer.lock_exclusive())?;
    buffer.mark_dirty();
    Ok(())
}

fn with_new_page<F>(pool: &BufferPool, rel: RelFileId, block: BlockNumber, build: F) -> CoreResult<()>
where
    F: FnOnce(&mut Page) -> CoreResult<()>,
{
    let buffer = pool
        .read_buffer(rel, block, ReadMode::ZeroOnMiss)?
        .ok_or(CoreError::MissingBlock { rel, block })?;
    build(&mut buffer.lock_exclusive())?;
    buffer.mark_dirty();
    Ok(())
}

/// Finds the page one level above `child_level` holding the downlink to
/// `child`, and the downlink's offset. Descends from the metapage root along
/// leftmost downlinks, then walks right.
fn find_parent(
    pool: &BufferPool,
    rel: RelFileId,
    child: BlockNumber,
    child_level: u32,
) -> CoreResult<Option<(BlockNumber, OffsetNumber)>> {
    let Some(metapage) = pool.page_copy(rel, BTREE_METAPAGE)? else {
        return Ok(None);
    };
    let roots = MetaPage::read(&metapage)?.roots;
    if roots.level <= child_level {
        return Ok(None);
    }

    let limit = pool.nblocks(rel)?;
    let mut block = roots.root;
    let mut level = roots.level;
    while level > child_level + 1 {
        let page = read_page(pool, rel, block)?;
        let opaque = BtPageOpaque::read(&page)?;
        block = IndexTuple::tid_block(page.item(opaque.first_data_key())?)?;
        level -= 1;
    }

    for _ in 0..limit {
        let page = read_page(pool, rel, block)?;
        let opaque = BtPageOpaque::read(&page)?;
        for offset in opaque.first_data_key()..=page.max_offset() {
            if IndexTuple::tid_block(page.item(offset)?)? == child {
                return Ok(Some((block, offset)));
            }
        }
        if opaque.next == P_NONE {
            return Ok(None);
        }
        block = opaque.next;
    }
    Err(CoreError::page_corruption(format!(
        "sibling chain at level {} of {rel} does not end",
        child_level + 1
    )))
}
