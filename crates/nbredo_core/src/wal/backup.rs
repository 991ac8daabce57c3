//! Full-page images carried by WAL records.
//!
//! An image stores the whole page except its free-space "hole" between
//! `lower` and `upper`, which is all zeros on a well-formed page.

use crate::error::{CoreError, CoreResult};
use crate::page::{Page, BLCKSZ, PAGE_HEADER_SIZE};
use crate::types::{BlockNumber, RelFileId};

/// Encoded size of an image header: relation, block, hole offset and length.
pub const BACKUP_HEADER_SIZE: usize = RelFileId::ENCODED_LEN + 8;

/// A full-page image for one block slot of a record.
#[derive(Clone, PartialEq, Eq)]
pub struct BackupBlock {
    /// Which of the record's blocks this image covers (0..4).
    pub slot: u8,
    /// Relation of the imaged page.
    pub rel: RelFileId,
    /// Block of the imaged page.
    pub block: BlockNumber,
    /// Start of the omitted hole.
    pub hole_offset: u16,
    /// Length of the omitted hole.
    pub hole_length: u16,
    data: Vec<u8>,
}

impl std::fmt::Debug for BackupBlock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackupBlock")
            .field("slot", &self.slot)
            .field("rel", &self.rel)
            .field("block", &self.block)
            .field("hole_offset", &self.hole_offset)
            .field("hole_length", &self.hole_length)
            .finish_non_exhaustive()
    }
}

impl BackupBlock {
    /// Captures `page` as the image for `slot`.
    #[must_use]
    pub fn from_page(slot: u8, rel: RelFileId, block: BlockNumber, page: &Page) -> Self {
        let (lower, upper) = (page.lower(), page.upper());
        let (hole_offset, hole_length) =
            if lower >= PAGE_HEADER_SIZE && lower <= upper && upper <= BLCKSZ {
                (lower, upper - lower)
            } else {
                (0, 0)
            };

        let bytes = page.as_bytes();
        let mut data = Vec::with_capacity(BLCKSZ - hole_length);
        data.extend_from_slice(&bytes[..hole_offset]);
        data.extend_from_slice(&bytes[hole_offset + hole_length..]);

        Self {
            slot,
            rel,
            block,
            hole_offset: hole_offset as u16,
            hole_length: hole_length as u16,
            data,
        }
    }

    /// Rebuilds the page image.
    ///
    /// # Errors
    ///
    /// Returns `WalCorruption` if the stored bytes and hole do not add up to
    /// a page.
    pub fn to_page(&self) -> CoreResult<Page> {
        let hole_offset = self.hole_offset as usize;
        let hole_length = self.hole_length as usize;
        if self.data.len() + hole_length != BLCKSZ || hole_offset > self.data.len() {
            return Err(CoreError::wal_corruption(format!(
                "backup image of {} bytes with hole {}+{} is not a page",
                self.data.len(),
                hole_offset,
                hole_length
            )));
        }
        let mut bytes = vec![0u8; BLCKSZ];
        bytes[..hole_offset].copy_from_slice(&self.data[..hole_offset]);
        bytes[hole_offset + hole_length..].copy_from_slice(&self.data[hole_offset..]);
        Page::from_bytes(&bytes)
    }

    /// Encoded size in bytes.
    #[must_use]
    pub fn encoded_len(&self) -> usize {
        BACKUP_HEADER_SIZE + self.data.len()
    }

    /// Appends the encoding to `buf`. The slot is implied by the record's
    /// image mask.
    pub fn encode_into(&self, buf: &mut Vec<u8>) {
        self.rel.encode_into(buf);
        buf.extend_from_slice(&self.block.to_le_bytes());
        buf.extend_from_slice(&self.hole_offset.to_le_bytes());
        buf.extend_from_slice(&self.hole_length.to_le_bytes());
        buf.extend_from_slice(&self.data);
    }

    /// Decodes one image from the front of `bytes`, returning it and the
    /// number of bytes consumed.
    ///
    /// # Errors
    ///
    /// Returns `WalCorruption` if `bytes` is too short or the hole is
    /// impossible.
    pub fn decode(slot: u8, bytes: &[u8]) -> CoreResult<(Self, usize)> {
        if bytes.len() < BACKUP_HEADER_SIZE {
            return Err(CoreError::wal_corruption("truncated backup block header"));
        }
        let mut rel = [0u8; RelFileId::ENCODED_LEN];
        rel.copy_from_slice(&bytes[..RelFileId::ENCODED_LEN]);
        let at = RelFileId::ENCODED_LEN;
        let block = u32::from_le_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]]);
        let hole_offset = u16::from_le_bytes([bytes[at + 4], bytes[at + 5]]);
        let hole_length = u16::from_le_bytes([bytes[at + 6], bytes[at + 7]]);

        let data_len = BLCKSZ
            .checked_sub(hole_length as usize)
            .filter(|_| hole_offset as usize + hole_length as usize <= BLCKSZ)
            .ok_or_else(|| {
                CoreError::wal_corruption(format!(
                    "backup block hole {hole_offset}+{hole_length} exceeds page size"
                ))
            })?;
        let end = BACKUP_HEADER_SIZE + data_len;
        if bytes.len() < end {
            return Err(CoreError::wal_corruption("truncated backup block image"));
        }

        Ok((
            Self {
                slot,
                rel: RelFileId::from_bytes(rel),
                block,
                hole_offset,
                hole_length,
                data: bytes[BACKUP_HEADER_SIZE..end].to_vec(),
            },
            end,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Lsn;

    const REL: RelFileId = RelFileId::new(1663, 1, 16384);

    #[test]
    fn image_skips_hole_and_restores_exactly() {
        let mut page = Page::initialized(16);
        page.add_item(b"alpha", 0).unwrap();
        page.add_item(b"beta", 0).unwrap();
        page.set_lsn(Lsn::new(77));

        let image = BackupBlock::from_page(1, REL, 9, &page);
        assert_eq!(image.hole_offset as usize, page.lower());
        assert!(image.encoded_len() < BLCKSZ);
        assert_eq!(image.to_page().unwrap(), page);

        let mut buf = Vec::new();
        image.encode_into(&mut buf);
        buf.extend_from_slice(b"trailing");
        let (decoded, used) = BackupBlock::decode(1, &buf).unwrap();
        assert_eq!(used, image.encoded_len());
        assert_eq!(decoded, image);
    }

    #[test]
    fn uninitialized_page_is_stored_whole() {
        let page = Page::new_zeroed();
        let image = BackupBlock::from_page(0, REL, 3, &page);
        assert_eq!(image.hole_length, 0);
        assert_eq!(image.to_page().unwrap(), page);
    }

    #[test]
    fn truncated_image_is_corruption() {
        let image = BackupBlock::from_page(0, REL, 3, &Page::initialized(16));
        let mut buf = Vec::new();
        image.encode_into(&mut buf);
        buf.truncate(buf.len() - 1);
        assert!(matches!(
            BackupBlock::decode(0, &buf),
            Err(CoreError::WalCorruption { .. })
        ));
    }
}
