//! # nbredo testkit
//!
//! Test utilities for the B-tree redo engine.
//!
//! This crate provides:
//! - A primary-side index that logs every change it makes ([`PrimaryIndex`])
//! - Tree inspection helpers for replayed page sets
//! - Property-based workload generators using proptest
//! - A crash/restart harness comparing single-pass and restarted replay
//!
//! ## Usage
//!
//! ```rust,ignore
//! use nbredo_testkit::prelude::*;
//!
//! let mut primary = PrimaryIndex::in_memory();
//! for n in 0..200 {
//!     primary.insert(n).unwrap();
//! }
//! let report = restart_equivalence(primary.wal(), 150, CrashMode::DiscardUnflushed).unwrap();
//! assert!(report.is_equivalent(), "{report:?}");
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod crash;
pub mod fixtures;
pub mod generators;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::crash::*;
    pub use crate::fixtures::*;
    pub use crate::generators::*;
}

pub use crash::*;
pub use fixtures::*;
pub use generators::*;
