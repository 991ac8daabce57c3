//! Page fixtures shared by the handler tests.

use super::{BtreeRedo, StandbyConflicts};
use crate::btree::{init_page, BtPageOpaque, IndexTuple, BTP_LEAF};
use crate::buffer::{BackendPageStore, BufferPool, ReadMode};
use crate::config::RedoConfig;
use crate::types::{BlockNumber, Lsn, OffsetNumber, RelFileId, TransactionId};
use parking_lot::Mutex;
use std::sync::Arc;

pub const REL: RelFileId = RelFileId::new(1663, 5, 16384);
pub const HEAP: RelFileId = RelFileId::new(1663, 5, 16385);

pub fn pool() -> Arc<BufferPool> {
    Arc::new(BufferPool::new(BackendPageStore::in_memory()))
}

pub fn engine(pool: &Arc<BufferPool>) -> BtreeRedo {
    BtreeRedo::new(Arc::clone(pool), RedoConfig::default())
}

pub fn key_item(block: BlockNumber, offset: OffsetNumber, key: &str) -> Vec<u8> {
    IndexTuple::new(block, offset, key.as_bytes()).encode()
}

pub fn leaf_opaque(prev: BlockNumber, next: BlockNumber) -> BtPageOpaque {
    BtPageOpaque {
        prev,
        next,
        level_or_xact: 0,
        flags: BTP_LEAF,
        cycle_id: 0,
    }
}

pub fn internal_opaque(prev: BlockNumber, next: BlockNumber, level: u32) -> BtPageOpaque {
    BtPageOpaque {
        prev,
        next,
        level_or_xact: level,
        flags: 0,
        cycle_id: 0,
    }
}

/// Writes a B-tree page straight into the pool, bypassing replay.
pub fn put_btree_page(
    pool: &BufferPool,
    block: BlockNumber,
    lsn: u64,
    opaque: BtPageOpaque,
    items: &[Vec<u8>],
) {
    let buffer = pool.read_buffer(REL, block, ReadMode::ZeroOnMiss).unwrap().unwrap();
    let mut page = buffer.lock_exclusive();
    init_page(&mut page);
    opaque.write(&mut page).unwrap();
    for item in items {
        page.add_item(item, 0).unwrap();
    }
    page.set_lsn(Lsn::new(lsn));
    buffer.mark_dirty();
}

pub fn opaque_of(pool: &BufferPool, block: BlockNumber) -> BtPageOpaque {
    BtPageOpaque::read(&pool.page_copy(REL, block).unwrap().unwrap()).unwrap()
}

pub fn page_items(pool: &BufferPool, block: BlockNumber) -> Vec<Vec<u8>> {
    pool.page_copy(REL, block)
        .unwrap()
        .unwrap()
        .items()
        .map(|(_, item)| item.to_vec())
        .collect()
}

pub fn page_lsn(pool: &BufferPool, block: BlockNumber) -> Lsn {
    pool.page_copy(REL, block).unwrap().unwrap().lsn()
}

/// Standby stand-in that records every conflict it is asked to resolve.
#[derive(Default)]
pub struct RecordingStandby {
    pub backends: usize,
    pub resolved: Mutex<Vec<(TransactionId, RelFileId)>>,
}

impl RecordingStandby {
    pub fn with_backends(backends: usize) -> Arc<Self> {
        Arc::new(Self {
            backends,
            resolved: Mutex::new(Vec::new()),
        })
    }

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
