//! Test fixtures: a primary index that logs what it does, and helpers for
//! inspecting the tree a replica rebuilt.

use nbredo_core::btree::{BtPageOpaque, IndexTuple, MetaPage};
use nbredo_core::page::{maxalign, Page};
use nbredo_core::wal::{
    BackupBlock, DeleteRecord, InsertKind, InsertRecord, NewRootRecord, SplitRecord, VacuumRecord,
};
use nbredo_core::{
    BackendPageStore, BlockNumber, BtreeRecord, BtreeRedo, BufferPool, CoreError, CoreResult,
    Lsn, OffsetNumber, RedoConfig, RelFileId, StandbyConflicts, TransactionId, WalWriter,
    BTREE_METAPAGE, P_HIKEY, P_NONE,
};
use nbredo_storage::{FileBackend, InMemoryBackend};
use parking_lot::Mutex;
use std::path::PathBuf;
use std::sync::Arc;
use tempfile::TempDir;

/// Index relation used by fixtures.
pub const INDEX_REL: RelFileId = RelFileId::new(1663, 5, 16384);

/// Heap relation the fixture index points into.
pub const HEAP_REL: RelFileId = RelFileId::new(1663, 5, 16385);

/// Width fixture keys are padded to, so leaves split after a few dozen keys.
pub const KEY_WIDTH: usize = 120;

/// The padded key for `n`. Keys sort in numeric order.
pub fn index_key(n: u32) -> Vec<u8> {
    let mut key = format!("{n:010}").into_bytes();
    key.resize(KEY_WIDTH, b'.');
    key
}

/// The heap tuple id the fixture index stores for `n`.
pub fn heap_tid(n: u32) -> (BlockNumber, OffsetNumber) {
    (1 + n / 64, (n % 64) as OffsetNumber + 1)
}

/// A primary-side index of at most two levels.
///
/// Every change is first appended to the WAL and then applied to the
/// primary's own pool through the redo engine, so the primary's pages are
/// what a replica replaying the same log should end up with.
pub struct PrimaryIndex {
    wal: WalWriter,
    pool: Arc<BufferPool>,
    redo: BtreeRedo,
    rel: RelFileId,
    full_page_every: Option<u64>,
    inserts: u64,
    last_vacuumed: BlockNumber,
}

impl PrimaryIndex {
    /// Creates an empty index logging to an in-memory WAL.
    pub fn in_memory() -> Self {
        Self::with_wal(WalWriter::new(Box::new(InMemoryBackend::new()), false))
    }

    /// Creates an empty index logging to `wal`.
    pub fn with_wal(wal: WalWriter) -> Self {
        let pool = Arc::new(BufferPool::new(BackendPageStore::in_memory()));
        let redo = BtreeRedo::new(Arc::clone(&pool), RedoConfig::default());
        let mut index = Self {
            wal,
            pool,
            redo,
            rel: INDEX_REL,
            full_page_every: None,
            inserts: 0,
            last_vacuumed: P_NONE,
        };
        index
            .log(
                BtreeRecord::NewRoot(NewRootRecord {
                    rel: INDEX_REL,
                    root: 1,
                    level: 0,
                    items: Vec::new(),
                }),
                Vec::new(),
            )
            .expect("Failed to create fixture index");
        index
    }

    /// Logs every `every`-th leaf insert as a full-page image instead of an
    /// item.
    #[must_use]
    pub fn full_page_images(mut self, every: u64) -> Self {
        self.full_page_every = Some(every.max(1));
        self
    }

    /// The log written so far.
    pub fn wal(&self) -> &WalWriter {
        &self.wal
    }

    /// The primary's pages.
    pub fn pool(&self) -> &Arc<BufferPool> {
        &self.pool
    }

    /// Splits logged without their parent downlink.
    pub fn pending_splits(&self) -> usize {
        self.redo.ledger().len()
    }

    /// Inserts key `n`, splitting its leaf first if it is full.
    pub fn insert(&mut self, n: u32) -> CoreResult<Lsn> {
        let (block, offset) = heap_tid(n);
        self.insert_tuple(&IndexTuple::new(block, offset, index_key(n)))
    }

    fn insert_tuple(&mut self, tuple: &IndexTuple) -> CoreResult<Lsn> {
        let item = tuple.encode();
        let leaf = self.find_leaf(&tuple.key)?;
        let page = self.page(leaf)?;
        if page.free_space() < maxalign(item.len()) {
            self.split(leaf, true)?;
            return self.insert_tuple(tuple);
        }
        let offset = insert_offset(&page, &tuple.key)?;

        self.inserts += 1;
        let image_due = self
            .full_page_every
            .is_some_and(|every| self.inserts % every == 0);
        let (logged_item, backups) = if image_due {
            let mut image = page.clone();
            image.add_item(&item, offset).ok_or_else(|| {
                CoreError::page_capacity(self.rel, leaf, "fixture insert does not fit")
            })?;
            (None, vec![BackupBlock::from_page(0, self.rel, leaf, &image)])
        } else {
            (Some(item), Vec::new())
        };

        self.log(
            BtreeRecord::Insert(InsertRecord {
                rel: self.rel,
                block: leaf,
                offset,
                kind: InsertKind::Leaf,
                item: logged_item,
            }),
            backups,
        )
    }

    /// Splits the leaf that holds key `n` and logs only the split, as if the
    /// primary crashed before inserting the parent downlink. The log should
    /// end soon after: further inserts do not revisit the incomplete split.
    pub fn split_without_completion(&mut self, n: u32) -> CoreResult<BlockNumber> {
        let leaf = self.find_leaf(&index_key(n))?;
        self.split(leaf, false)
    }

    /// Removes every other data item of the `ordinal`-th leaf (mod the
    /// number of leaves) with a vacuum record.
    pub fn vacuum_leaf(&mut self, ordinal: usize) -> CoreResult<Option<Lsn>> {
        let leaves = self.leaves()?;
        let block = leaves[ordinal % leaves.len()];
        let page = self.page(block)?;
        let first = BtPageOpaque::read(&page)?.first_data_key();
        let offsets: Vec<OffsetNumber> = (first..=page.max_offset()).step_by(2).collect();
        if offsets.is_empty() {
            return Ok(None);
        }

        let last_block_vacuumed = if self.last_vacuumed < block {
            self.last_vacuumed
        } else {
            P_NONE
        };
        self.last_vacuumed = block;
        self.log(
            BtreeRecord::Vacuum(VacuumRecord {
                rel: self.rel,
                block,
                last_block_vacuumed,
                offsets,
            }),
            Vec::new(),
        )
        .map(Some)
    }

    /// Removes one data item of the `ordinal`-th leaf with a delete record.
    pub fn delete_from_leaf(&mut self, ordinal: usize, item: usize) -> CoreResult<Option<Lsn>> {
        let leaves = self.leaves()?;
        let block = leaves[ordinal % leaves.len()];
        let page = self.page(block)?;
        let first = BtPageOpaque::read(&page)?.first_data_key();
        let max = page.max_offset();
        if first > max {
            return Ok(None);
        }
        let offset = first + (item % usize::from(max - first + 1)) as OffsetNumber;
        self.log(
            BtreeRecord::Delete(DeleteRecord {
                rel: self.rel,
                heap_rel: HEAP_REL,
                block,
                offsets: vec![offset],
            }),
            Vec::new(),
        )
        .map(Some)
    }

    /// Leaf blocks in key order.
    pub fn leaves(&self) -> CoreResult<Vec<BlockNumber>> {
        leaf_chain(&self.pool, self.rel)
    }

    fn log(&mut self, record: BtreeRecord, backups: Vec<BackupBlock>) -> CoreResult<Lsn> {
        let logged = self.wal.append(record, backups)?;
        self.redo.redo(&logged)?;
        Ok(logged.lsn)
    }

    fn page(&self, block: BlockNumber) -> CoreResult<Page> {
        read_page(&self.pool, self.rel, block)
    }

    fn find_leaf(&self, key: &[u8]) -> CoreResult<BlockNumber> {
        let (mut block, level) = meta_root(&self.pool, self.rel)?;
        for _ in 0..level {
            block = choose_child(&self.page(block)?, key)?;
        }
        loop {
            let page = self.page(block)?;
            let opaque = BtPageOpaque::read(&page)?;
            if opaque.is_rightmost() || key < IndexTuple::decode(page.item(P_HIKEY)?)?.key.as_slice()
            {
                return Ok(block);
            }
            block = opaque.next;
        }
    }

    fn split(&mut self, leaf: BlockNumber, complete: bool) -> CoreResult<BlockNumber> {
        let page = self.page(leaf)?;
        let opaque = BtPageOpaque::read(&page)?;
        let first = opaque.first_data_key();
        let max = page.max_offset();
        if max <= first {
            return Err(CoreError::invalid_operation(format!(
                "leaf {leaf} has too few items to split"
            )));
        }
        let first_right = first + (max - first + 1) / 2;

        let mut right_items = Vec::new();
        if !opaque.is_rightmost() {
            right_items.push(page.item(P_HIKEY)?.to_vec());
        }
        for offset in first_right..=max {
            right_items.push(page.item(offset)?.to_vec());
        }
        let separator = IndexTuple::decode(page.item(first_right)?)?.key;
        let right = self.pool.nblocks(self.rel)?;
        let is_root = opaque.is_root();

        self.log(
            BtreeRecord::Split(SplitRecord {
                rel: self.rel,
                left: leaf,
                right,
                rnext: opaque.next,
                level: 0,
                first_right,
                is_root,
                new_item_offset: None,
                downlink: None,
                left_hikey: None,
                new_item: None,
                right_items,
            }),
            Vec::new(),
        )?;
        if complete {
            self.complete_split(leaf, right, separator, is_root)?;
        }
        Ok(right)
    }

    fn complete_split(
        &mut self,
        left: BlockNumber,
        right: BlockNumber,
        separator: Vec<u8>,
        is_root: bool,
    ) -> CoreResult<Lsn> {
        let downlink = IndexTuple::downlink(right, separator).encode();
        if is_root {
            let root = self.pool.nblocks(self.rel)?;
            return self.log(
                BtreeRecord::NewRoot(NewRootRecord {
                    rel: self.rel,
                    root,
                    level: 1,
                    items: vec![IndexTuple::downlink(left, Vec::new()).encode(), downlink],
                }),
                Vec::new(),
            );
        }

        let (root, level) = meta_root(&self.pool, self.rel)?;
        if level != 1 {
            return Err(CoreError::invalid_operation(
                "fixture index only grows to two levels",
            ));
        }
        let page = self.page(root)?;
        let Some((offset, _)) = page
            .items()
            .find(|(_, item)| IndexTuple::tid_block(item).ok() == Some(left))
        else {
            return Err(CoreError::invalid_operation(format!(
                "root {root} has no downlink to {left}"
            )));
        };
        if page.free_space() < maxalign(downlink.len()) {
            return Err(CoreError::invalid_operation("fixture index root is full"));
        }
        self.log(
            BtreeRecord::Insert(InsertRecord {
                rel: self.rel,
                block: root,
                offset: offset + 1,
                kind: InsertKind::Upper { downlink: right },
                item: Some(downlink),
            }),
            Vec::new(),
        )
    }
}

fn read_page(pool: &BufferPool, rel: RelFileId, block: BlockNumber) -> CoreResult<Page> {
    pool.page_copy(rel, block)?
        .ok_or(CoreError::MissingBlock { rel, block })
}

fn meta_root(pool: &BufferPool, rel: RelFileId) -> CoreResult<(BlockNumber, u32)> {
    let meta = MetaPage::read(&read_page(pool, rel, BTREE_METAPAGE)?)?;
    Ok((meta.roots.root, meta.roots.level))
}

fn data_items(page: &Page) -> CoreResult<Vec<(OffsetNumber, IndexTuple)>> {
    let first = BtPageOpaque::read(page)?.first_data_key();
    (first..=page.max_offset())
        .map(|offset| Ok((offset, IndexTuple::decode(page.item(offset)?)?)))
        .collect()
}

/// The child of an internal page whose key range covers `key`. The first
/// data item's key is minus infinity.
fn choose_child(page: &Page, key: &[u8]) -> CoreResult<BlockNumber> {
    let items = data_items(page)?;
    let mut child = items
        .first()
        .map(|(_, tuple)| tuple.block)
        .ok_or_else(|| CoreError::page_corruption("internal page without downlinks"))?;
    for (_, tuple) in items.iter().skip(1) {
        if tuple.key.as_slice() <= key {
            child = tuple.block;
        }
    }
    Ok(child)
}

fn insert_offset(page: &Page, key: &[u8]) -> CoreResult<OffsetNumber> {
    let items = data_items(page)?;
    let position = items.iter().find(|(_, tuple)| key < tuple.key.as_slice());
    Ok(match position {
        Some((offset, _)) => *offset,
        None => page.max_offset() + 1,
    })
}

/// Leaf blocks of `rel` in sibling order, starting from the leftmost leaf
/// under the metapage root.
pub fn leaf_chain(pool: &BufferPool, rel: RelFileId) -> CoreResult<Vec<BlockNumber>> {
    let (mut block, level) = meta_root(pool, rel)?;
    for _ in 0..level {
        let page = read_page(pool, rel, block)?;
        block = data_items(&page)?
            .first()
            .map(|(_, tuple)| tuple.block)
            .ok_or_else(|| CoreError::page_corruption(format!("no downlinks on block {block}")))?;
    }

    let limit = pool.nblocks(rel)?;
    let mut chain = vec![block];
    loop {
        let next = BtPageOpaque::read(&read_page(pool, rel, block)?)?.next;
        if next == P_NONE {
            return Ok(chain);
        }
        if chain.len() as BlockNumber > limit {
            return Err(CoreError::page_corruption("leaf sibling chain loops"));
        }
        chain.push(next);
        block = next;
    }
}

/// All leaf keys of `rel` in sibling order.
pub fn index_keys(pool: &BufferPool, rel: RelFileId) -> CoreResult<Vec<Vec<u8>>> {
    let mut keys = Vec::new();
    for block in leaf_chain(pool, rel)? {
        let page = read_page(pool, rel, block)?;
        keys.extend(data_items(&page)?.into_iter().map(|(_, tuple)| tuple.key));
    }
    Ok(keys)
}

/// Children of the metapage root, or nothing if the root is a leaf.
pub fn root_children(pool: &BufferPool, rel: RelFileId) -> CoreResult<Vec<BlockNumber>> {
    let (root, level) = meta_root(pool, rel)?;
    if level == 0 {
        return Ok(Vec::new());
    }
    let page = read_page(pool, rel, root)?;
    Ok(data_items(&page)?.into_iter().map(|(_, tuple)| tuple.block).collect())
}

/// True when every leaf's right sibling points back at it.
pub fn leaf_links_consistent(pool: &BufferPool, rel: RelFileId) -> CoreResult<bool> {
    let chain = leaf_chain(pool, rel)?;
    if BtPageOpaque::read(&read_page(pool, rel, chain[0])?)?.prev != P_NONE {
        return Ok(false);
    }
    for pair in chain.windows(2) {
        if BtPageOpaque::read(&read_page(pool, rel, pair[1])?)?.prev != pair[0] {
            return Ok(false);
        }
    }
    Ok(true)
}

/// Standby stand-in with a fixed number of backends that records every
/// conflict it is asked to resolve.
#[derive(Debug, Default)]
pub struct RecordingStandby {
    backends: usize,
    resolved: Mutex<Vec<(TransactionId, RelFileId)>>,
}

impl RecordingStandby {
    /// Creates a standby with `backends` connected query backends.
    pub fn new(backends: usize) -> Self {
        Self {
            backends,
            resolved: Mutex::new(Vec::new()),
        }
    }

    /// Conflicts resolved so far, in order.
    pub fn resolved(&self) -> Vec<(TransactionId, RelFileId)> {
        self.resolved.lock().clone()
    }
}

impl StandbyConflicts for RecordingStandby {
    fn resolve_conflict_with_snapshot(&self, latest_removed_xid: TransactionId, rel: RelFileId) {
        self.resolved.lock().push((latest_removed_xid, rel));
    }

    fn active_backend_count(&self, _database_id: u32) -> usize {
        self.backends
    }
}

/// A temporary directory holding a WAL file and page directories.
pub struct TempCluster {
    dir: TempDir,
}

impl TempCluster {
    /// Creates an empty cluster directory.
    pub fn new() -> Self {
        Self {
            dir: TempDir::new().expect("Failed to create temp directory"),
        }
    }

    /// Path of the WAL file.
    pub fn wal_path(&self) -> PathBuf {
        self.dir.path().join("btree.wal")
    }

    /// Path of the page directory called `name`.
    pub fn pages_path(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }

    /// Opens (creating if needed) the WAL file.
    pub fn open_wal(&self) -> WalWriter {
        let backend =
            FileBackend::open_with_create_dirs(&self.wal_path()).expect("Failed to open WAL file");
        WalWriter::new(Box::new(backend), false)
    }

    /// Opens a pool over the page directory called `name`.
    pub fn open_pool(&self, name: &str) -> Arc<BufferPool> {
        let store =
            BackendPageStore::open_dir(&self.pages_path(name)).expect("Failed to open page dir");
        Arc::new(BufferPool::new(store))
    }
}

impl Default for TempCluster {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn primary_grows_to_two_levels() {
        let mut primary = PrimaryIndex::in_memory();
        for n in 0..200 {
            primary.insert(n).unwrap();
        }
        let leaves = primary.leaves().unwrap();
        assert!(leaves.len() > 2);
        assert_eq!(root_children(primary.pool(), INDEX_REL).unwrap(), leaves);
        assert!(leaf_links_consistent(primary.pool(), INDEX_REL).unwrap());

        let keys = index_keys(primary.pool(), INDEX_REL).unwrap();
        let expected: Vec<Vec<u8>> = (0..200).map(index_key).collect();
        assert_eq!(keys, expected);
        assert_eq!(primary.pending_splits(), 0);
    }

    #[test]
    fn keys_land_in_order_regardless_of_insert_order() {
        let mut primary = PrimaryIndex::in_memory().full_page_images(7);
        for n in (0..150).rev() {
            primary.insert(n * 7 % 151).unwrap();
        }
        let keys = index_keys(primary.pool(), INDEX_REL).unwrap();
        let mut sorted = keys.clone();
        sorted.sort();
        assert_eq!(keys, sorted);
        assert_eq!(keys.len(), 150);
    }

    #[test]
    fn incomplete_split_is_visible_in_ledger() {
        let mut primary = PrimaryIndex::in_memory();
        for n in 0..30 {
            primary.insert(n).unwrap();
        }
        primary.split_without_completion(10).unwrap();
        assert_eq!(primary.pending_splits(), 1);
    }

    #[test]
    fn vacuum_and_delete_shrink_leaves() {
        let mut primary = PrimaryIndex::in_memory();
        for n in 0..20 {
            primary.insert(n).unwrap();
        }
        primary.vacuum_leaf(0).unwrap().unwrap();
        assert_eq!(index_keys(primary.pool(), INDEX_REL).unwrap().len(), 10);
        primary.delete_from_leaf(0, 3).unwrap().unwrap();
        assert_eq!(index_keys(primary.pool(), INDEX_REL).unwrap().len(), 9);
    }
}
