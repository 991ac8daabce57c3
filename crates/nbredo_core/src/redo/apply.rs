//! The LSN-gated page mutation every handler goes through.
//!
//! The page is locked for the whole check-and-mutate, so concurrent readers
//! see it either entirely before or entirely after the record.

use crate::btree::{MetaPage, MetaSnapshot};
use crate::buffer::{BufferPool, PinnedBuffer, ReadMode};
use crate::error::{CoreError, CoreResult};
use crate::page::Page;
use crate::types::{BlockNumber, Lsn, RelFileId, BTREE_METAPAGE};
use crate::wal::BackupBlock;
use parking_lot::RwLockWriteGuard;

/// How a handler locks the page it mutates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum LockMode {
    /// Exclusive content lock.
    Exclusive,
    /// Exclusive content lock once no other backend holds a pin.
    Cleanup,
}

impl LockMode {
    fn lock(self, buffer: &PinnedBuffer) -> RwLockWriteGuard<'_, Page> {
        match self {
            Self::Exclusive => buffer.lock_exclusive(),
            Self::Cleanup => buffer.lock_cleanup(),
        }
    }
}

/// Applies `delta` to an existing page unless it already reflects `lsn`.
///
/// Returns `Ok(false)` when the page was already up to date. A missing or
/// never-initialized page is `MissingBlock`.
pub(crate) fn modify_page<F>(
    pool: &BufferPool,
    rel: RelFileId,
    block: BlockNumber,
    lsn: Lsn,
    mode: LockMode,
    delta: F,
) -> CoreResult<bool>
where
    F: FnOnce(&mut Page) -> CoreResult<()>,
{
    let buffer = pool
        .read_buffer(rel, block, ReadMode::Normal)?
        .ok_or(CoreError::MissingBlock { rel, block })?;
    let mut page = mode.lock(&buffer);
    if page.lsn() >= lsn {
        return Ok(false);
    }
    delta(&mut page)?;
    page.set_lsn(lsn);
    buffer.mark_dirty();
    Ok(true)
}

/// Rebuilds a page from scratch, creating the block if needed, unless it
/// already reflects `lsn`.
pub(crate) fn rebuild_page<F>(
    pool: &BufferPool,
    rel: RelFileId,
    block: BlockNumber,
    lsn: Lsn,
    build: F,
) -> CoreResult<bool>
where
    F: FnOnce(&mut Page) -> CoreResult<()>,
{
    let buffer = pool
        .read_buffer(rel, block, ReadMode::ZeroOnMiss)?
        .ok_or(CoreError::MissingBlock { rel, block })?;
    let mut page = buffer.lock_exclusive();
    if page.lsn() >= lsn {
        return Ok(false);
    }
    build(&mut page)?;
    page.set_lsn(lsn);
    buffer.mark_dirty();
    Ok(true)
}

/// Overwrites a page with its full-page image unless the page is already at
/// or past `lsn`.
pub(crate) fn restore_backup(
    pool: &BufferPool,
    backup: &BackupBlock,
    lsn: Lsn,
    mode: LockMode,
) -> CoreResult<bool> {
    let image = backup.to_page()?;
    let buffer = pool
        .read_buffer(backup.rel, backup.block, ReadMode::ZeroOnMiss)?
        .ok_or(CoreError::MissingBlock {
            rel: backup.rel,
            block: backup.block,
        })?;
    let mut page = mode.lock(&buffer);
    if page.lsn() >= lsn {
        return Ok(false);
    }
    *page = image;
    page.set_lsn(lsn);
    buffer.mark_dirty();
    Ok(true)
}

/// Overwrites the metapage with `roots`.
///
/// The rewrite is LSN-gated like any other page touch rather than forced.
/// Records replay in LSN order, so a metapage at or past `lsn` already holds
/// these roots or newer ones; forcing the write would only move the root
/// backwards until a later record moved it forward again.
pub(crate) fn restore_meta(
    pool: &BufferPool,
    rel: RelFileId,
    lsn: Lsn,
    roots: &MetaSnapshot,
) -> CoreResult<bool> {
    rebuild_page(pool, rel, BTREE_METAPAGE, lsn, |page| MetaPage::write(page, roots))
}

/// Appends `items` to a freshly initialized page in offset order.
pub(crate) fn restore_items(
    page: &mut Page,
    rel: RelFileId,
    block: BlockNumber,
    items: &[Vec<u8>],
) -> CoreResult<()> {
    for item in items {
        page.add_item(item, 0).ok_or_else(|| {
            CoreError::page_capacity(rel, block, format!("cannot restore {}-byte item", item.len()))
        })?;
    }
    Ok(())
}
