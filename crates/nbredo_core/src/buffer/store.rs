//! Relation files as sequences of pages.

use crate::error::CoreResult;
use crate::page::{Page, BLCKSZ};
use crate::types::{BlockNumber, RelFileId};
use nbredo_storage::{FileBackend, InMemoryBackend, StorageBackend};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Durable home of relation pages, addressed by `(relation, block)`.
pub trait PageStore: Send + Sync {
    /// Reads a block, or `None` if it lies past the end of the relation.
    ///
    /// # Errors
    ///
    /// Returns an error on I/O failure.
    fn read_block(&self, rel: RelFileId, block: BlockNumber) -> CoreResult<Option<Page>>;

    /// Writes a block, extending the relation if needed.
    ///
    /// # Errors
    ///
    /// Returns an error on I/O failure.
    fn write_block(&self, rel: RelFileId, block: BlockNumber, page: &Page) -> CoreResult<()>;

    /// Number of blocks in the relation (0 if it does not exist).
    ///
    /// # Errors
    ///
    /// Returns an error on I/O failure.
    fn nblocks(&self, rel: RelFileId) -> CoreResult<BlockNumber>;

    /// Relations known to the store.
    ///
    /// # Errors
    ///
    /// Returns an error on I/O failure.
    fn relations(&self) -> CoreResult<Vec<RelFileId>>;

    /// Makes all written blocks durable.
    ///
    /// # Errors
    ///
    /// Returns an error on I/O failure.
    fn sync(&self) -> CoreResult<()>;
}

/// A [`PageStore`] keeping one [`StorageBackend`] per relation.
///
/// In-memory stores create [`InMemoryBackend`]s on demand; directory stores
/// create one [`FileBackend`] per relation named by
/// [`RelFileId::file_name`].
pub struct BackendPageStore {
    files: Mutex<HashMap<RelFileId, Box<dyn StorageBackend>>>,
    dir: Option<PathBuf>,
}

impl BackendPageStore {
    /// Creates an empty in-memory store.
    #[must_use]
    pub fn in_memory() -> Self {
        Self {
            files: Mutex::new(HashMap::new()),
            dir: None,
        }
    }

    /// Opens a directory of relation files, creating it if missing.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory or its files cannot be opened.
    pub fn open_dir(dir: &Path) -> CoreResult<Self> {
        std::fs::create_dir_all(dir)?;
        let mut files: HashMap<RelFileId, Box<dyn StorageBackend>> = HashMap::new();
        for entry in std::fs::read_dir(dir)? {
            let entry = entry?;
            let name = entry.file_name();
            let Some(rel) = name.to_str().and_then(RelFileId::parse_file_name) else {
                continue;
            };
            files.insert(rel, Box::new(FileBackend::open(&entry.path())?));
        }
        Ok(Self {
            files: Mutex::new(files),
            dir: Some(dir.to_path_buf()),
        })
    }

    /// Registers an existing backend for `rel`, replacing any previous one.
    pub fn attach(&self, rel: RelFileId, backend: Box<dyn StorageBackend>) {
        self.files.lock().insert(rel, backend);
    }

    fn open_backend(&self, rel: RelFileId) -> CoreResult<Box<dyn StorageBackend>> {
        Ok(match &self.dir {
            Some(dir) => Box::new(FileBackend::open(&dir.join(rel.file_name()))?),
            None => Box::new(InMemoryBackend::new()),
        })
    }
}

impl PageStore for BackendPageStore {
    fn read_block(&self, rel: RelFileId, block: BlockNumber) -> CoreResult<Option<Page>> {
        let files = self.files.lock();
        let Some(backend) = files.get(&rel) else {
            return Ok(None);
        };
        let offset = u64::from(block) * BLCKSZ as u64;
        if offset + BLCKSZ as u64 > backend.size()? {
            return Ok(None);
        }
        let bytes = backend.read_at(offset, BLCKSZ)?;
        Page::from_bytes(&bytes).map(Some)
    }

    fn write_block(&self, rel: RelFileId, block: BlockNumber, page: &Page) -> CoreResult<()> {
        let mut files = self.files.lock();
        if !files.contains_key(&rel) {
            let backend = self.open_backend(rel)?;
            files.insert(rel, backend);
        }
        if let Some(backend) = files.get_mut(&rel) {
            backend.write_at(u64::from(block) * BLCKSZ as u64, page.as_bytes())?;
        }
        Ok(())
    }

    fn nblocks(&self, rel: RelFileId) -> CoreResult<BlockNumber> {
        let files = self.files.lock();
        match files.get(&rel) {
            Some(backend) => Ok((backend.size()? / BLCKSZ as u64) as BlockNumber),
            None => Ok(0),
        }
    }

    fn relations(&self) -> CoreResult<Vec<RelFileId>> {
        let mut rels: Vec<RelFileId> = self.files.lock().keys().copied().collect();
        rels.sort();
        Ok(rels)
    }

    fn sync(&self) -> CoreResult<()> {
        for backend in self.files.lock().values_mut() {
            backend.flush()?;
            backend.sync()?;
        }
        Ok(())
    }
}
