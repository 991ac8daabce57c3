//! CLI command implementations.

pub mod dump_wal;
pub mod mask_compare;
pub mod replay;

use std::path::{Path, PathBuf};
use thiserror::Error;

/// Failures reported by the commands themselves.
#[derive(Debug, Error)]
pub enum CliError {
    /// An input path does not exist.
    #[error("{0} not found")]
    NotFound(PathBuf),

    /// Masked comparison found differences.
    #[error("{count} page(s) differ")]
    PagesDiffer {
        /// Number of differing pages.
        count: usize,
    },
}

/// Returns `path` if it exists.
pub fn existing(path: &Path) -> Result<&Path, CliError> {
    if path.exists() {
        Ok(path)
    } else {
        Err(CliError::NotFound(path.to_path_buf()))
    }
}
