//! Write-ahead log of B-tree structural changes.
//!
//! ## Record Format
//!
//! ```text
//! | magic (4) | version (2) | info (1) | image mask (1) | lsn (8) |
//! | main length (4) | total length (4) | main payload | images | crc32 (4) |
//! ```
//!
//! `info` is the [`RecordKind`]. Bit `i` of the image mask says the record
//! carries a full-page image for its `i`th block; images follow the main
//! payload in slot order. The CRC covers everything before it.
//!
//! Some payload fields are present only under conditions that are part of
//! the format: an insert's downlink only on internal pages, a split's new
//! item only when it went left and its left page has no image, and so on.
//! [`BtreeRecord`] decodes them once into typed fields.
//!
//! ## Recovery Policy
//!
//! - A truncated record at the end of the log is a clean end of log.
//! - Bad magic, version, CRC, LSN or image layout is `WalCorruption` or
//!   `ChecksumMismatch`.
//! - An unknown `info` byte is `UnknownRecordType`; replay cannot guess the
//!   intent and must stop.

mod backup;
mod desc;
mod iterator;
mod record;
mod writer;

pub use backup::{BackupBlock, BACKUP_HEADER_SIZE};
pub use desc::describe;
pub use iterator::WalReader;
pub use record::{
    compute_crc32, BtreeRecord, DeletePageKind, DeletePageRecord, DeleteRecord, InsertKind,
    InsertRecord, NewRootRecord, RecordKind, ReusePageRecord, SplitRecord, VacuumRecord, WalRecord,
    MAX_BACKUP_BLOCKS, WAL_MAGIC, WAL_VERSION,
};
pub use writer::WalWriter;

/// Envelope header size.
pub(crate) const HEADER_SIZE: usize = 24;

/// Trailing CRC size.
pub(crate) const CRC_SIZE: usize = 4;
