//! In-memory storage backend.

use crate::backend::StorageBackend;
use crate::error::{StorageError, StorageResult};
use parking_lot::RwLock;
use std::sync::Arc;

/// An in-memory byte store.
///
/// Clones share the same underlying buffer, so a test can keep a handle on
/// a relation file while the buffer pool owns another one and inspect what
/// was actually flushed.
///
/// # Example
///
/// ```rust
/// use nbredo_storage::{InMemoryBackend, StorageBackend};
///
/// let mut backend = InMemoryBackend::new();
/// let offset = backend.append(b"record").unwrap();
/// assert_eq!(offset, 0);
/// assert_eq!(backend.size().unwrap(), 6);
/// ```
#[derive(Debug, Default, Clone)]
pub struct InMemoryBackend {
    data: Arc<RwLock<Vec<u8>>>,
}

impl InMemoryBackend {
    /// Creates a new empty in-memory backend.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a backend holding pre-existing bytes.
    #[must_use]
    pub fn with_data(data: Vec<u8>) -> Self {
        Self {
            data: Arc::new(RwLock::new(data)),
        }
    }

    /// Returns a copy of all stored bytes.
    #[must_use]
    pub fn data(&self) -> Vec<u8> {
        self.data.read().clone()
    }
}

impl StorageBackend for InMemoryBackend {
    fn read_at(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>> {
        let data = self.data.read();
        let size = data.len() as u64;
        let start = offset as usize;
        let end = start.saturating_add(len);

        if offset > size || end > data.len() {
            return Err(StorageError::ReadPastEnd { offset, len, size });
        }

        Ok(data[start..end].to_vec())
    }

    fn write_at(&mut self, offset: u64, bytes: &[u8]) -> StorageResult<()> {
        let mut data = self.data.write();
        let start = offset as usize;
        let end = start + bytes.len();
        if end > data.len() {
            data.resize(end, 0);
        }
        data[start..end].copy_from_slice(bytes);
        Ok(())
    }

    fn append(&mut self, bytes: &[u8]) -> StorageResult<u64> {
        let mut data = self.data.write();
        let offset = data.len() as u64;
        data.extend_from_slice(bytes);
        Ok(offset)
    }

    fn flush(&mut self) -> StorageResult<()> {
        Ok(())
    }

    fn size(&self) -> StorageResult<u64> {
        Ok(self.data.read().len() as u64)
    }

    fn sync(&mut self) -> StorageResult<()> {
        Ok(())
    }

    fn truncate(&mut self, new_size: u64) -> StorageResult<()> {
        let mut data = self.data.write();
        let size = data.len() as u64;
        if new_size > size {
            return Err(StorageError::InvalidTruncate {
                requested: new_size,
                size,
            });
        }
        data.truncate(new_size as usize);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn append_returns_offsets() {
        let mut backend = InMemoryBackend::new();
        assert_eq!(backend.append(b"abc").unwrap(), 0);
        assert_eq!(backend.append(b"de").unwrap(), 3);
        assert_eq!(backend.read_at(0, 5).unwrap(), b"abcde");
    }

    #[test]
    fn write_at_zero_fills_gap() {
        let mut backend = InMemoryBackend::new();
        backend.write_at(8, b"xy").unwrap();
        assert_eq!(backend.size().unwrap(), 10);
        assert_eq!(backend.read_at(0, 8).unwrap(), vec![0u8; 8]);
        assert_eq!(backend.read_at(8, 2).unwrap(), b"xy");
    }

    #[test]
    fn write_at_overwrites_in_place() {
        let mut backend = InMemoryBackend::with_data(b"hello world".to_vec());
        backend.write_at(6, b"WORLD").unwrap();
        assert_eq!(backend.data(), b"hello WORLD");
    }

    #[test]
    fn read_past_end_fails() {
        let backend = InMemoryBackend::with_data(vec![1, 2, 3]);
        assert!(matches!(
            backend.read_at(2, 5),
            Err(StorageError::ReadPastEnd { size: 3, .. })
        ));
    }

    #[test]
    fn clones_share_storage() {
        let mut a = InMemoryBackend::new();
        let b = a.clone();
        a.append(b"shared").unwrap();
        assert_eq!(b.data(), b"shared");
    }

    #[test]
    fn truncate_cannot_grow() {
        let mut backend = InMemoryBackend::with_data(vec![0; 4]);
        assert!(matches!(
            backend.truncate(10),
            Err(StorageError::InvalidTruncate { .. })
        ));
        backend.truncate(1).unwrap();
        assert_eq!(backend.size().unwrap(), 1);
    }

    proptest! {
        #[test]
        fn last_write_wins(writes in proptest::collection::vec((0u64..64, proptest::collection::vec(any::<u8>(), 1..16)), 1..20)) {
            let mut backend = InMemoryBackend::new();
            let mut model: Vec<u8> = Vec::new();
            for (offset, bytes) in &writes {
                backend.write_at(*offset, bytes).unwrap();
                let end = *offset as usize + bytes.len();
                if end > model.len() {
                    model.resize(end, 0);
                }
                model[*offset as usize..end].copy_from_slice(bytes);
            }
            prop_assert_eq!(backend.data(), model);
        }
    }
}
