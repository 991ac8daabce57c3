//! # nbredo core
//!
//! Crash-recovery and replica replay of B+tree index WAL records.
//!
//! This crate provides:
//! - A slotted page model and the B-tree page layout on top of it
//! - A buffer pool with exclusive and cleanup locks
//! - The B-tree WAL record model, codec, writer and streaming reader
//! - Idempotent redo handlers and the record dispatcher
//! - The pending-action ledger, end-of-recovery cleanup and restart-point gate
//! - Page masking for primary/replica comparison
//!
//! ## Replay
//!
//! ```ignore
//! let pool = Arc::new(BufferPool::new(BackendPageStore::open_dir(pages_dir)?));
//! let wal = WalWriter::new(Box::new(FileBackend::open(wal_path)?), false);
//! let redo = BtreeRedo::new(Arc::clone(&pool), RedoConfig::default());
//!
//! let mut session = RecoverySession::new(&wal, redo);
//! session.replay()?;
//! let summary = session.finish(&BasicOnlineBtree::default())?;
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod btree;
pub mod buffer;
mod config;
mod error;
pub mod mask;
pub mod online;
pub mod page;
mod recovery;
pub mod redo;
mod types;
pub mod wal;

pub use buffer::{BackendPageStore, BufferPool, PageStore, PinnedBuffer, ReadMode};
pub use config::RedoConfig;
pub use error::{CoreError, CoreResult};
pub use online::BasicOnlineBtree;
pub use recovery::{RecoverySession, ReplaySummary, RestartPoint};
pub use redo::{
    BtreeRedo, IncompleteAction, NoStandby, OnlineBtree, PendingActions, StandbyConflicts,
};
pub use types::{
    BlockNumber, Lsn, OffsetNumber, RelFileId, TransactionId, BTREE_METAPAGE, FIRST_OFFSET,
    INVALID_BLOCK, P_FIRSTKEY, P_HIKEY, P_NONE,
};
pub use wal::{BtreeRecord, WalReader, WalRecord, WalWriter};

/// Crate version, reported by the CLI.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
