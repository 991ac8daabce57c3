//! Index tuples.
//!
//! ```text
//! | tid block (4) | tid offset (2) | info (2) | key (N) |
//! ```
//!
//! `info` holds the total tuple size in its low 13 bits. On a leaf the tid
//! points at a heap row; on an internal page the tid block is the downlink
//! to a child page.

use crate::error::{CoreError, CoreResult};
use crate::types::{BlockNumber, OffsetNumber, P_HIKEY};

/// Size of the fixed tuple header.
pub const INDEX_TUPLE_HEADER: usize = 8;

/// Mask for the size bits of `info`.
pub const INDEX_SIZE_MASK: u16 = 0x1FFF;

/// A decoded index tuple.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct IndexTuple {
    /// Referenced block (heap block on a leaf, child block above).
    pub block: BlockNumber,
    /// Referenced offset.
    pub offset: OffsetNumber,
    /// Key bytes.
    pub key: Vec<u8>,
}

impl IndexTuple {
    /// Creates a tuple.
    #[must_use]
    pub fn new(block: BlockNumber, offset: OffsetNumber, key: impl Into<Vec<u8>>) -> Self {
        Self {
            block,
            offset,
            key: key.into(),
        }
    }

    /// Creates an internal-page tuple pointing at `child`.
    #[must_use]
    pub fn downlink(child: BlockNumber, key: impl Into<Vec<u8>>) -> Self {
        Self::new(child, P_HIKEY, key)
    }

    /// Encoded size in bytes.
    #[must_use]
    pub fn size(&self) -> usize {
        INDEX_TUPLE_HEADER + self.key.len()
    }

    /// Encodes the tuple.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.size());
        buf.extend_from_slice(&self.block.to_le_bytes());
        buf.extend_from_slice(&self.offset.to_le_bytes());
        buf.extend_from_slice(&((self.size() as u16) & INDEX_SIZE_MASK).to_le_bytes());
        buf.extend_from_slice(&self.key);
        buf
    }

    /// Decodes a tuple from item bytes.
    ///
    /// # Errors
    ///
    /// Returns `PageCorruption` if the bytes are shorter than the header or
    /// than the size recorded in `info`.
    pub fn decode(bytes: &[u8]) -> CoreResult<Self> {
        let size = Self::stored_size(bytes)?;
        Ok(Self {
            block: Self::tid_block(bytes)?,
            offset: u16::from_le_bytes([bytes[4], bytes[5]]),
            key: bytes[INDEX_TUPLE_HEADER..size].to_vec(),
        })
    }

    /// Size recorded in the tuple header.
    ///
    /// # Errors
    ///
    /// Returns `PageCorruption` if the recorded size is inconsistent with
    /// the available bytes.
    pub fn stored_size(bytes: &[u8]) -> CoreResult<usize> {
        if bytes.len() < INDEX_TUPLE_HEADER {
            return Err(CoreError::page_corruption(format!(
                "index tuple of {} bytes is shorter than its header",
                bytes.len()
            )));
        }
        let size = (u16::from_le_bytes([bytes[6], bytes[7]]) & INDEX_SIZE_MASK) as usize;
        if size < INDEX_TUPLE_HEADER || size > bytes.len() {
            return Err(CoreError::page_corruption(format!(
                "index tuple claims {size} bytes, {} available",
                bytes.len()
            )));
        }
        Ok(size)
    }

    /// Reads the tid block (the downlink on internal pages) from item bytes.
    ///
    /// # Errors
    ///
    /// Returns `PageCorruption` if the bytes are shorter than the header.
    pub fn tid_block(bytes: &[u8]) -> CoreResult<BlockNumber> {
        if bytes.len() < INDEX_TUPLE_HEADER {
            return Err(CoreError::page_corruption("index tuple too short for tid"));
        }
        Ok(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    /// Reads the tid offset from item bytes.
    ///
    /// # Errors
    ///
    /// Returns `PageCorruption` if the bytes are shorter than the header.
    pub fn tid_offset(bytes: &[u8]) -> CoreResult<OffsetNumber> {
        if bytes.len() < INDEX_TUPLE_HEADER {
            return Err(CoreError::page_corruption("index tuple too short for tid"));
        }
        Ok(u16::from_le_bytes([bytes[4], bytes[5]]))
    }

    /// Rewrites the tid of an encoded tuple in place.
    ///
    /// # Errors
    ///
    /// Returns `PageCorruption` if the bytes are shorter than the header.
    pub fn set_tid(bytes: &mut [u8], block: BlockNumber, offset: OffsetNumber) -> CoreResult<()> {
        if bytes.len() < INDEX_TUPLE_HEADER {
            return Err(CoreError::page_corruption("index tuple too short for tid"));
        }
        bytes[0..4].copy_from_slice(&block.to_le_bytes());
        bytes[4..6].copy_from_slice(&offset.to_le_bytes());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_records_size() {
        let tuple = IndexTuple::new(42, 3, b"key".to_vec());
        let bytes = tuple.encode();
        assert_eq!(bytes.len(), 11);
        assert_eq!(IndexTuple::stored_size(&bytes).unwrap(), 11);
        assert_eq!(IndexTuple::decode(&bytes).unwrap(), tuple);
    }

    #[test]
    fn decode_ignores_alignment_padding() {
        let mut bytes = IndexTuple::new(1, 1, b"abc".to_vec()).encode();
        bytes.extend_from_slice(&[0, 0, 0, 0, 0]);
        assert_eq!(IndexTuple::decode(&bytes).unwrap().key, b"abc");
    }

    #[test]
    fn set_tid_rewrites_downlink() {
        let mut bytes = IndexTuple::downlink(4, b"sep".to_vec()).encode();
        IndexTuple::set_tid(&mut bytes, 9, P_HIKEY).unwrap();
        assert_eq!(IndexTuple::tid_block(&bytes).unwrap(), 9);
        assert_eq!(IndexTuple::decode(&bytes).unwrap().key, b"sep");
    }

    #[test]
    fn truncated_tuple_is_corruption() {
        let bytes = IndexTuple::new(1, 1, b"abcdef".to_vec()).encode();
        assert!(IndexTuple::decode(&bytes[..10]).is_err());
        assert!(IndexTuple::decode(&bytes[..4]).is_err());
    }
}
