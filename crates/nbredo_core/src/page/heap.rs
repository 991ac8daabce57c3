//! Heap tuple headers, as far as replay needs to read them.

use crate::error::{CoreError, CoreResult};
use crate::types::TransactionId;

/// Size of the part of a heap tuple header replay reads.
pub const HEAP_TUPLE_HEADER_SIZE: usize = 8;

/// Creating and expiring transactions of a heap row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct HeapTupleHeader {
    /// Inserting transaction.
    pub xmin: TransactionId,
    /// Deleting or locking transaction, or invalid.
    pub xmax: TransactionId,
}

impl HeapTupleHeader {
    /// Reads the header from the front of heap item bytes.
    ///
    /// # Errors
    ///
    /// Returns `PageCorruption` if the item is shorter than the header.
    pub fn read(item: &[u8]) -> CoreResult<Self> {
        if item.len() < HEAP_TUPLE_HEADER_SIZE {
            return Err(CoreError::page_corruption(format!(
                "heap tuple of {} bytes is shorter than its header",
                item.len()
            )));
        }
        Ok(Self {
            xmin: TransactionId::new(u32::from_le_bytes([item[0], item[1], item[2], item[3]])),
            xmax: TransactionId::new(u32::from_le_bytes([item[4], item[5], item[6], item[7]])),
        })
    }

    /// Encodes a heap tuple: this header followed by `data`.
    #[must_use]
    pub fn encode_with(&self, data: &[u8]) -> Vec<u8> {
        let mut buf = Vec::with_capacity(HEAP_TUPLE_HEADER_SIZE + data.len());
        buf.extend_from_slice(&self.xmin.as_u32().to_le_bytes());
        buf.extend_from_slice(&self.xmax.as_u32().to_le_bytes());
        buf.extend_from_slice(data);
        buf
    }
}
