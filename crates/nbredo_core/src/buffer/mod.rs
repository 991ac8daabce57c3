//! Shared page buffers with pins, content locks and cleanup locks.
//!
//! Replay and standby readers meet here. A reader pins a buffer and takes a
//! shared content lock while it looks at the page; replay takes an exclusive
//! content lock for the whole of each page mutation, so readers only ever see
//! a page fully before or fully after a record. Mutations that move items a
//! reader may be positioned on take a *cleanup lock*: exclusive, and only
//! once every other pin has been dropped.

mod store;

pub use store::{BackendPageStore, PageStore};

use crate::error::{CoreError, CoreResult};
use crate::page::Page;
use crate::types::{BlockNumber, RelFileId};
use parking_lot::{Condvar, Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Identity of a buffered page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BufferTag {
    /// Relation.
    pub rel: RelFileId,
    /// Block number.
    pub block: BlockNumber,
}

/// How to treat a block that does not exist yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadMode {
    /// Missing or never-initialized blocks yield `None`.
    Normal,
    /// Missing blocks are created as zeroed pages; the caller reinitializes
    /// them.
    ZeroOnMiss,
}

struct BufferSlot {
    tag: BufferTag,
    page: RwLock<Page>,
    pins: Mutex<u32>,
    unpinned: Condvar,
    dirty: AtomicBool,
}

impl BufferSlot {
    fn new(tag: BufferTag, page: Page) -> Self {
        Self {
            tag,
            page: RwLock::new(page),
            pins: Mutex::new(0),
            unpinned: Condvar::new(),
            dirty: AtomicBool::new(false),
        }
    }
}

/// A pinned buffer. The pin is released on drop.
pub struct PinnedBuffer {
    slot: Arc<BufferSlot>,
}

impl PinnedBuffer {
    fn pin(slot: &Arc<BufferSlot>) -> Self {
        *slot.pins.lock() += 1;
        Self {
            slot: Arc::clone(slot),
        }
    }

    /// Identity of the buffered page.
    #[must_use]
    pub fn tag(&self) -> BufferTag {
        self.slot.tag
    }

    /// Block number of the buffered page.
    #[must_use]
    pub fn block(&self) -> BlockNumber {
        self.slot.tag.block
    }

    /// Takes a shared content lock.
    pub fn lock_shared(&self) -> RwLockReadGuard<'_, Page> {
        self.slot.page.read()
    }

    /// Takes an exclusive content lock.
    pub fn lock_exclusive(&self) -> RwLockWriteGuard<'_, Page> {
        self.slot.page.write()
    }

    /// Takes an exclusive content lock once this is the only pin.
    ///
    /// Blocks until every other holder has dropped its pin. There is no
    /// timeout; bounding the wait is up to whoever owns the readers.
    pub fn lock_cleanup(&self) -> RwLockWriteGuard<'_, Page> {
        loop {
            let guard = self.slot.page.write();
            let mut pins = self.slot.pins.lock();
            if *pins <= 1 {
                return guard;
            }
            drop(guard);
            self.slot.unpinned.wait(&mut pins);
        }
    }

    /// Marks the page as needing to be written back.
    pub fn mark_dirty(&self) {
        self.slot.dirty.store(true, Ordering::Release);
    }

    /// Returns true if the page has unwritten changes.
    #[must_use]
    pub fn is_dirty(&self) -> bool {
        self.slot.dirty.load(Ordering::Acquire)
    }

    /// Current number of pins, this one included.
    #[must_use]
    pub fn pin_count(&self) -> u32 {
        *self.slot.pins.lock()
    }
}

impl Clone for PinnedBuffer {
    fn clone(&self) -> Self {
        Self::pin(&self.slot)
    }
}

impl Drop for PinnedBuffer {
    fn drop(&mut self) {
        let mut pins = self.slot.pins.lock();
        *pins = pins.saturating_sub(1);
        self.slot.unpinned.notify_all();
    }
}

/// Page cache in front of a [`PageStore`].
///
/// This is a replay collaborator, not a bounded cache: slots are never
/// evicted, so every page a session touches stays resident until
/// [`discard_all`](Self::discard_all). Size replays accordingly.
pub struct BufferPool {
    store: Box<dyn PageStore>,
    slots: Mutex<HashMap<BufferTag, Arc<BufferSlot>>>,
    verify_checksums: AtomicBool,
}

impl BufferPool {
    /// Creates a pool over `store`. Checksums are verified on read.
    pub fn new(store: impl PageStore + 'static) -> Self {
        Self {
            store: Box::new(store),
            slots: Mutex::new(HashMap::new()),
            verify_checksums: AtomicBool::new(true),
        }
    }

    /// Enables or disables checksum verification on read.
    pub fn set_verify_checksums(&self, verify: bool) {
        self.verify_checksums.store(verify, Ordering::Relaxed);
    }

    /// The underlying page store.
    #[must_use]
    pub fn store(&self) -> &dyn PageStore {
        self.store.as_ref()
    }

    /// Reads and pins a block.
    ///
    /// In [`ReadMode::Normal`] a block past the end of the relation, or one
    /// that was never initialized, yields `None`.
    ///
    /// # Errors
    ///
    /// Returns an error on I/O failure or checksum mismatch.
    pub fn read_buffer(
        &self,
        rel: RelFileId,
        block: BlockNumber,
        mode: ReadMode,
    ) -> CoreResult<Option<PinnedBuffer>> {
        let tag = BufferTag { rel, block };
        let mut slots = self.slots.lock();

        let slot = match slots.get(&tag) {
            Some(slot) => Arc::clone(slot),
            None => {
                let page = match self.store.read_block(rel, block)? {
                    Some(page) => {
                        self.verify(&page, block)?;
                        page
                    }
                    None if mode == ReadMode::ZeroOnMiss => Page::new_zeroed(),
                    None => return Ok(None),
                };
                let slot = Arc::new(BufferSlot::new(tag, page));
                slots.insert(tag, Arc::clone(&slot));
                slot
            }
        };
        let buffer = PinnedBuffer::pin(&slot);
        drop(slots);

        if mode == ReadMode::Normal && buffer.lock_shared().is_new() {
            return Ok(None);
        }
        Ok(Some(buffer))
    }

    fn verify(&self, page: &Page, block: BlockNumber) -> CoreResult<()> {
        if !self.verify_checksums.load(Ordering::Relaxed) || page.checksum() == 0 {
            return Ok(());
        }
        let actual = page.compute_checksum(block);
        if actual != page.checksum() {
            return Err(CoreError::ChecksumMismatch {
                expected: u32::from(page.checksum()),
                actual: u32::from(actual),
            });
        }
        Ok(())
    }

    /// Number of blocks in the relation, counting blocks only in the cache.
    ///
    /// # Errors
    ///
    /// Returns an error on I/O failure.
    pub fn nblocks(&self, rel: RelFileId) -> CoreResult<BlockNumber> {
        let stored = self.store.nblocks(rel)?;
        let cached = self
            .slots
            .lock()
            .keys()
            .filter(|tag| tag.rel == rel)
            .map(|tag| tag.block + 1)
            .max()
            .unwrap_or(0);
        Ok(stored.max(cached))
    }

    /// Writes every dirty page to the store with a fresh checksum, then syncs
    /// the store. Returns the number of pages written.
    ///
    /// # Errors
    ///
    /// Returns an error on I/O failure.
    pub fn flush_all(&self) -> CoreResult<usize> {
        let mut dirty: Vec<Arc<BufferSlot>> = self
            .slots
            .lock()
            .values()
            .filter(|slot| slot.dirty.load(Ordering::Acquire))
            .cloned()
            .collect();
        dirty.sort_by_key(|slot| slot.tag);

        for slot in &dirty {
            let page = slot.page.read();
            let mut image = page.clone();
            image.set_checksum(image.compute_checksum(slot.tag.block));
            self.store.write_block(slot.tag.rel, slot.tag.block, &image)?;
            slot.dirty.store(false, Ordering::Release);
        }
        self.store.sync()?;
        Ok(dirty.len())
    }

    /// Drops every cached page, flushed or not, as a crash would. This is
    /// also the only way cached pages leave the pool.
    pub fn discard_all(&self) {
        self.slots.lock().clear();
    }

    /// Number of cached pages with unwritten changes.
    #[must_use]
    pub fn dirty_count(&self) -> usize {
        self.slots
            .lock()
            .values()
            .filter(|slot| slot.dirty.load(Ordering::Acquire))
            .count()
    }

    /// Number of cached pages, clean or dirty.
    #[must_use]
    pub fn resident_count(&self) -> usize {
        self.slots.lock().len()
    }

    /// Copy of a block's current contents, if it exists and is initialized.
    ///
    /// # Errors
    ///
    /// Returns an error on I/O failure or checksum mismatch.
    pub fn page_copy(&self, rel: RelFileId, block: BlockNumber) -> CoreResult<Option<Page>> {
        Ok(self
            .read_buffer(rel, block, ReadMode::Normal)?
            .map(|buffer| buffer.lock_shared().clone()))
    }
}
