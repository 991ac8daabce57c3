//! Error types for the redo engine.
//!
//! Every error surfaced from replay is fatal to the recovery session: a
//! skipped structural step would leave the tree permanently inconsistent.
//! Non-fatal sanity problems are reported through `tracing::warn!` instead.

use crate::types::{BlockNumber, Lsn, RelFileId};
use std::io;
use thiserror::Error;

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors that can occur in the redo engine.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Storage backend error.
    #[error("storage error: {0}")]
    Storage(#[from] nbredo_storage::StorageError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// WAL is corrupted or invalid.
    #[error("WAL corruption: {message}")]
    WalCorruption {
        /// Description of the corruption.
        message: String,
    },

    /// A record carries an operation code this engine does not know.
    #[error("unknown btree record type 0x{info:02X} at {lsn}")]
    UnknownRecordType {
        /// The raw operation code.
        info: u8,
        /// LSN of the offending record.
        lsn: Lsn,
    },

    /// An item the original operation proved would fit no longer does.
    #[error("page {rel}/{block} cannot hold item: {message}")]
    PageCapacity {
        /// Relation.
        rel: RelFileId,
        /// Block.
        block: BlockNumber,
        /// What was being added.
        message: String,
    },

    /// A block a record needs is absent and no full-page image covered it.
    #[error("block {block} of relation {rel} is missing")]
    MissingBlock {
        /// Relation.
        rel: RelFileId,
        /// Block.
        block: BlockNumber,
    },

    /// A page's structure is inconsistent with what replay expects.
    #[error("page corruption: {message}")]
    PageCorruption {
        /// Description of the inconsistency.
        message: String,
    },

    /// Checksum mismatch detected.
    #[error("checksum mismatch: expected {expected:08x}, got {actual:08x}")]
    ChecksumMismatch {
        /// Expected checksum.
        expected: u32,
        /// Actual checksum.
        actual: u32,
    },

    /// Finishing an incomplete action at end of recovery failed.
    #[error("cleanup failed: {message}")]
    CleanupFailed {
        /// Description of the failure.
        message: String,
    },

    /// Operation not permitted in current state.
    #[error("invalid operation: {message}")]
    InvalidOperation {
        /// Description of why operation is invalid.
        message: String,
    },
}

impl CoreError {
    /// Creates a WAL corruption error.
    pub fn wal_corruption(message: impl Into<String>) -> Self {
        Self::WalCorruption {
            message: message.into(),
        }
    }

    /// Creates a page capacity error.
    pub fn page_capacity(rel: RelFileId, block: BlockNumber, message: impl Into<String>) -> Self {
        Self::PageCapacity {
            rel,
            block,
            message: message.into(),
        }
    }

    /// Creates a page corruption error.
    pub fn page_corruption(message: impl Into<String>) -> Self {
        Self::PageCorruption {
            message: message.into(),
        }
    }

    /// Creates a cleanup failure.
    pub fn cleanup_failed(message: impl Into<String>) -> Self {
        Self::CleanupFailed {
            message: message.into(),
        }
    }

    /// Creates an invalid operation error.
    pub fn invalid_operation(message: impl Into<String>) -> Self {
        Self::InvalidOperation {
            message: message.into(),
        }
    }
}
