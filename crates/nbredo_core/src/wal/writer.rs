//! WAL writer.

use crate::error::{CoreError, CoreResult};
use crate::types::Lsn;
use crate::wal::backup::BackupBlock;
use crate::wal::iterator::WalReader;
use crate::wal::record::{
    compute_crc32, BtreeRecord, WalRecord, MAX_BACKUP_BLOCKS, WAL_MAGIC, WAL_VERSION,
};
use crate::wal::{CRC_SIZE, HEADER_SIZE};
use nbredo_storage::StorageBackend;
use parking_lot::Mutex;
use std::sync::Arc;

/// Appends B-tree records to a log and hands out readers over it.
///
/// Each appended record is stamped with its LSN: the byte position just
/// past its end. LSNs are therefore strictly increasing in log order.
pub struct WalWriter {
    backend: Arc<Mutex<Box<dyn StorageBackend>>>,
    sync_on_write: bool,
}

impl WalWriter {
    /// Creates a writer over `backend`, appending after its current end.
    pub fn new(backend: Box<dyn StorageBackend>, sync_on_write: bool) -> Self {
        Self {
            backend: Arc::new(Mutex::new(backend)),
            sync_on_write,
        }
    }

    /// Appends a record with its full-page images.
    ///
    /// Returns the record as stamped with its LSN.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - two images claim the same slot, or a slot is out of range
    /// - the record lacks a field its format requires
    /// - I/O errors occur during write
    pub fn append(&self, record: BtreeRecord, backups: Vec<BackupBlock>) -> CoreResult<WalRecord> {
        let mut rec = WalRecord {
            lsn: Lsn::INVALID,
            record,
            backups,
        };
        rec.backups.sort_by_key(|b| b.slot);
        for pair in rec.backups.windows(2) {
            if pair[0].slot == pair[1].slot {
                return Err(CoreError::invalid_operation(format!(
                    "two backup images for slot {}",
                    pair[0].slot
                )));
            }
        }
        if rec
            .backups
            .iter()
            .any(|b| b.slot as usize >= MAX_BACKUP_BLOCKS)
        {
            return Err(CoreError::invalid_operation("backup image slot out of range"));
        }

        let mask = rec.bkp_mask();
        let payload = rec.record.encode_payload(mask)?;
        let mut images = Vec::new();
        for backup in &rec.backups {
            backup.encode_into(&mut images);
        }
        let main_len = u32::try_from(payload.len())
            .map_err(|_| CoreError::invalid_operation("WAL record payload too large"))?;
        let total_len = u32::try_from(payload.len() + images.len())
            .map_err(|_| CoreError::invalid_operation("WAL record too large"))?;
        let record_len = HEADER_SIZE + total_len as usize + CRC_SIZE;

        let mut backend = self.backend.lock();
        rec.lsn = Lsn::new(backend.size()? + record_len as u64);

        let mut data = Vec::with_capacity(record_len);
        data.extend_from_slice(&WAL_MAGIC);
        data.extend_from_slice(&WAL_VERSION.to_le_bytes());
        data.push(rec.kind().as_byte());
        data.push(mask);
        data.extend_from_slice(&rec.lsn.as_u64().to_le_bytes());
        data.extend_from_slice(&main_len.to_le_bytes());
        data.extend_from_slice(&total_len.to_le_bytes());
        data.extend_from_slice(&payload);
        data.extend_from_slice(&images);
        let crc = compute_crc32(&data);
        data.extend_from_slice(&crc.to_le_bytes());

        backend.append(&data)?;
        if self.sync_on_write {
            backend.flush()?;
        }

        Ok(rec)
    }

    /// Appends a record without full-page images and returns its LSN.
    ///
    /// # Errors
    ///
    /// See [`WalWriter::append`].
    pub fn log(&self, record: BtreeRecord) -> CoreResult<Lsn> {
        Ok(self.append(record, Vec::new())?.lsn)
    }

    /// Flushes all pending writes to durable storage.
    pub fn flush(&self) -> CoreResult<()> {
        let mut backend = self.backend.lock();
        backend.flush()?;
        backend.sync()?;
        Ok(())
    }

    /// Returns the current log size, which is also the LSN of the last
    /// record.
    pub fn size(&self) -> CoreResult<u64> {
        Ok(self.backend.lock().size()?)
    }

    /// Returns a streaming reader starting at byte `offset`, which must be
    /// a record boundary.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot be accessed.
    pub fn reader(&self, offset: u64) -> CoreResult<WalReader<'_>> {
        WalReader::new(self.backend.lock(), offset)
    }

    /// Reads every record from the start of the log.
    ///
    /// # Errors
    ///
    /// Returns the first read or decode error.
    pub fn read_all(&self) -> CoreResult<Vec<(u64, WalRecord)>> {
        self.reader(0)?.collect()
    }

    /// Truncates the log to `offset`, discarding everything after it.
    pub fn truncate(&self, offset: u64) -> CoreResult<()> {
        self.backend.lock().truncate(offset)?;
        Ok(())
    }

    #[cfg(test)]
    pub(crate) fn backend_for_testing(&self) -> Arc<Mutex<Box<dyn StorageBackend>>> {
        Arc::clone(&self.backend)
    }
}
