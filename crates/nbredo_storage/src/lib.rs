//! # nbredo storage
//!
//! Byte-store backends underneath the B-tree redo engine.
//!
//! A backend is an **opaque, addressable byte store**. It is used in two
//! shapes by the rest of the workspace:
//!
//! - append-only, for WAL files (`append`, `read_at`, `truncate`)
//! - block-addressed, for relation files (`write_at` at `block * BLCKSZ`)
//!
//! Backends know nothing about pages, line pointers or log records.
//!
//! ## Available Backends
//!
//! - [`InMemoryBackend`] - tests and ephemeral replicas
//! - [`FileBackend`] - OS files
//!
//! ## Example
//!
//! ```rust
//! use nbredo_storage::{InMemoryBackend, StorageBackend};
//!
//! let mut backend = InMemoryBackend::new();
//! backend.write_at(4, b"page").unwrap();
//! assert_eq!(backend.size().unwrap(), 8);
//! assert_eq!(backend.read_at(4, 4).unwrap(), b"page");
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod backend;
mod error;
mod file;
mod memory;

pub use backend::StorageBackend;
pub use error::{StorageError, StorageResult};
pub use file::FileBackend;
pub use memory::InMemoryBackend;
