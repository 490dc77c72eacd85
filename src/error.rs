//! Error surface of the crate.
//!
//! Argument and mode mismatches (bad path, wrong open mode, missing file)
//! are not errors: the facade reports them as `None` handles or zero-byte
//! transfers. `VfsError` covers construction failures, host I/O failures
//! and container corruption, all of which are fatal to the operation.

use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, VfsError>;

#[derive(Error, Debug)]
pub enum VfsError {
    #[error("no container files supplied")]
    NoFiles,

    #[error("too many container files (limit {max})")]
    TooManyFiles { max: usize },

    #[error("root path exists and is not a directory: {}", path.display())]
    RootIsNotDirectory { path: PathBuf },

    #[error("container path supplied twice: {}", path.display())]
    DuplicateContainer { path: PathBuf },

    #[error("page size {page_size} does not leave room for a payload")]
    PageSizeTooSmall { page_size: usize },

    #[error("short read at offset {offset} of {container}")]
    ShortRead { container: String, offset: u64 },

    #[error("short write at offset {offset} of {container}")]
    ShortWrite { container: String, offset: u64 },

    #[error("corrupted container: {detail}")]
    CorruptedContainer { detail: String },

    // Index double-inserts indicate a broken walker or a path stored in two
    // containers; both violate the single-writer construction rules.
    #[error("directory already present in the index: {path}")]
    DirAlreadyExists { path: String },

    #[error("file already present in the index: {path}")]
    FileAlreadyExists { path: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl VfsError {
    pub(crate) fn corrupted(detail: impl Into<String>) -> Self {
        VfsError::CorruptedContainer {
            detail: detail.into(),
        }
    }
}
