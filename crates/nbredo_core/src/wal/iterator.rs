//! Streaming WAL reader.

use crate::error::{CoreError, CoreResult};
use crate::types::Lsn;
use crate::wal::backup::BackupBlock;
use crate::wal::record::{
    compute_crc32, BtreeRecord, RecordKind, WalRecord, MAX_BACKUP_BLOCKS, WAL_MAGIC, WAL_VERSION,
};
use crate::wal::{CRC_SIZE, HEADER_SIZE};
use nbredo_storage::StorageBackend;
use parking_lot::MutexGuard;

/// A streaming iterator over WAL records, yielding `(offset, record)`.
///
/// Records are read one at a time, so memory use is bounded by the largest
/// record. A record cut short by the end of the log is treated as a clean
/// end; anything malformed inside the log is an error, after which the
/// reader yields nothing more.
pub struct WalReader<'a> {
    backend: MutexGuard<'a, Box<dyn StorageBackend>>,
    total_size: u64,
    offset: u64,
    finished: bool,
}

impl<'a> WalReader<'a> {
    /// Creates a reader starting at `offset`.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend size cannot be determined.
    pub fn new(backend: MutexGuard<'a, Box<dyn StorageBackend>>, offset: u64) -> CoreResult<Self> {
        let total_size = backend.size()?;
        Ok(Self {
            backend,
            total_size,
            offset,
            finished: false,
        })
    }

    /// Offset of the next record to be read, i.e. the end of the last one.
    #[must_use]
    pub fn position(&self) -> u64 {
        self.offset
    }

    fn read_next_record(&mut self) -> CoreResult<Option<(u64, WalRecord)>> {
        if self.finished {
            return Ok(None);
        }
        let start = self.offset;

        if start + HEADER_SIZE as u64 > self.total_size {
            self.finished = true;
            return Ok(None);
        }
        let header = self.backend.read_at(start, HEADER_SIZE)?;

        if header[0..4] != WAL_MAGIC {
            return Err(CoreError::wal_corruption(format!(
                "invalid magic at offset {start}"
            )));
        }
        let version = u16::from_le_bytes([header[4], header[5]]);
        if version > WAL_VERSION {
            return Err(CoreError::wal_corruption(format!(
                "unsupported version {version} at offset {start}"
            )));
        }
        let info = header[6];
        let mask = header[7];
        let mut lsn_bytes = [0u8; 8];
        lsn_bytes.copy_from_slice(&header[8..16]);
        let lsn = Lsn::new(u64::from_le_bytes(lsn_bytes));
        let main_len = u32::from_le_bytes([header[16], header[17], header[18], header[19]]) as usize;
        let total_len = u32::from_le_bytes([header[20], header[21], header[22], header[23]]) as usize;

        if main_len > total_len {
            return Err(CoreError::wal_corruption(format!(
                "payload length {main_len} exceeds record length {total_len} at offset {start}"
            )));
        }
        let record_len = (HEADER_SIZE + total_len + CRC_SIZE) as u64;
        if start + record_len > self.total_size {
            // Torn write at the tail.
            self.finished = true;
            return Ok(None);
        }

        let data = self.backend.read_at(start, record_len as usize)?;
        let crc_at = data.len() - CRC_SIZE;
        let stored = u32::from_le_bytes([
            data[crc_at],
            data[crc_at + 1],
            data[crc_at + 2],
            data[crc_at + 3],
        ]);
        let computed = compute_crc32(&data[..crc_at]);
        if stored != computed {
            return Err(CoreError::ChecksumMismatch {
                expected: stored,
                actual: computed,
            });
        }

        if lsn.as_u64() != start + record_len {
            return Err(CoreError::wal_corruption(format!(
                "record at offset {start} claims LSN {lsn}, expected {}",
                Lsn::new(start + record_len)
            )));
        }
        let kind = RecordKind::from_byte(info).ok_or(CoreError::UnknownRecordType { info, lsn })?;
        if mask >> MAX_BACKUP_BLOCKS != 0 {
            return Err(CoreError::wal_corruption(format!(
                "invalid backup mask {mask:#04x} at offset {start}"
            )));
        }

        let main = &data[HEADER_SIZE..HEADER_SIZE + main_len];
        let record = BtreeRecord::decode_payload(kind, mask, main)?;

        let mut images = &data[HEADER_SIZE + main_len..crc_at];
        let mut backups = Vec::new();
        for slot in 0..MAX_BACKUP_BLOCKS as u8 {
            if mask & (1 << slot) == 0 {
                continue;
            }
            let (backup, used) = BackupBlock::decode(slot, images)?;
            backups.push(backup);
            images = &images[used..];
        }
        if !images.is_empty() {
            return Err(CoreError::wal_corruption(format!(
                "{} unexpected bytes after backup images at offset {start}",
                images.len()
            )));
        }

        self.offset = start + record_len;
        Ok(Some((
            start,
            WalRecord {
                lsn,
                record,
                backups,
            },
        )))
    }
}

impl Iterator for WalReader<'_> {
    type Item = CoreResult<(u64, WalRecord)>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.read_next_record() {
            Ok(Some(item)) => Some(Ok(item)),
            Ok(None) => None,
            Err(e) => {
                self.finished = true;
                Some(Err(e))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::error::CoreError;
    use crate::types::{RelFileId, TransactionId};
    use crate::wal::record::{BtreeRecord, ReusePageRecord};
    use crate::wal::WalWriter;
    use nbredo_storage::InMemoryBackend;

    const REL: RelFileId = RelFileId::new(1663, 1, 16384);

    fn reuse(block: u32) -> BtreeRecord {
        BtreeRecord::ReusePage(ReusePageRecord {
            rel: REL,
            block,
            latest_removed_xid: TransactionId::new(7),
        })
    }

    fn wal_with(n: u32) -> WalWriter {
        let wal = WalWriter::new(Box::new(InMemoryBackend::new()), false);
        for block in 1..=n {
            wal.log(reuse(block)).unwrap();
        }
        wal
    }

    #[test]
    fn reads_from_any_record_boundary() {
        let wal = wal_with(3);
        let all = wal.read_all().unwrap();
        assert_eq!(all.len(), 3);

        let second = all[1].0;
        let rest: Vec<_> = wal.reader(second).unwrap().map(Result::unwrap).collect();
        assert_eq!(rest.len(), 2);
        assert_eq!(rest[0].1, all[1].1);
    }

    #[test]
    fn position_tracks_end_of_last_record() {
        let wal = wal_with(2);
        let mut reader = wal.reader(0).unwrap();
        let (_, first) = reader.next().unwrap().unwrap();
        assert_eq!(reader.position(), first.lsn.as_u64());
    }

    #[test]
    fn torn_tail_is_clean_end() {
        let wal = wal_with(2);
        let size = wal.size().unwrap();
        wal.truncate(size - 3).unwrap();
        assert_eq!(wal.read_all().unwrap().len(), 1);
    }

    #[test]
    fn flipped_bit_is_checksum_error() {
        let wal = wal_with(1);
        let backend = wal.backend_for_testing();
        {
            let mut guard = backend.lock();
            let mut byte = guard.read_at(30, 1).unwrap();
            byte[0] ^= 0x01;
            guard.write_at(30, &byte).unwrap();
        }
        let mut reader = wal.reader(0).unwrap();
        assert!(matches!(
            reader.next(),
            Some(Err(CoreError::ChecksumMismatch { .. }))
        ));
        assert!(reader.next().is_none());
    }

    #[test]
    fn bad_magic_is_corruption() {
        let wal = wal_with(1);
        wal.backend_for_testing().lock().write_at(0, b"XXXX").unwrap();
        assert!(matches!(
            wal.read_all(),
            Err(CoreError::WalCorruption { .. })
        ));
    }

    #[test]
    fn unknown_info_is_protocol_fatal() {
        let wal = wal_with(1);
        let backend = wal.backend_for_testing();
        {
            let mut guard = backend.lock();
            let size = guard.size().unwrap() as usize;
            let mut data = guard.read_at(0, size).unwrap();
            data[6] = 0xE0;
            let crc_at = size - 4;
            let crc = crate::wal::compute_crc32(&data[..crc_at]);
            data[crc_at..].copy_from_slice(&crc.to_le_bytes());
            guard.write_at(0, &data).unwrap();
        }
        assert!(matches!(
            wal.read_all(),
            Err(CoreError::UnknownRecordType { info: 0xE0, .. })
        ));
    }
}
