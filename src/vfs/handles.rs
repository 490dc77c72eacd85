//! In-memory handle table: directory descriptors and open-file state.

use crate::error::{Result, VfsError};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use std::sync::Arc;
use std::sync::Mutex as StdMutex;
use std::sync::atomic::AtomicU64;

/// Open mode of a file descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileStatus {
    OpenRead,
    OpenWrite,
    Closed,
}

/// Where a directory lives: its container and the first page of its
/// record chain. Immutable once inserted.
#[derive(Debug, Clone, Copy)]
pub(crate) struct DirNode {
    pub(crate) container: usize,
    pub(crate) first_page: u64,
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct FileState {
    pub(crate) status: FileStatus,
    pub(crate) data_len: u64,
}

/// Shared state of one open logical file.
#[derive(Debug)]
pub(crate) struct FileNode {
    pub(crate) name: String,
    pub(crate) container: usize,
    pub(crate) first_page: u64,
    pub(crate) state: StdMutex<FileState>,
    pub(crate) readers: AtomicU64,
}

impl FileNode {
    pub(crate) fn snapshot(&self) -> FileState {
        *self.state.lock().unwrap()
    }

    pub(crate) fn set_status(&self, status: FileStatus) {
        self.state.lock().unwrap().status = status;
    }

    pub(crate) fn set_data_len(&self, data_len: u64) {
        self.state.lock().unwrap().data_len = data_len;
    }
}

/// Handle returned to clients for an open logical file. Not `Clone`:
/// every successful `open`/`create` hands out one handle, and `close`
/// consumes it.
pub struct FileHandle {
    pub(crate) node: Arc<FileNode>,
}

impl FileHandle {
    /// Absolute virtual path of the file.
    pub fn path(&self) -> &str {
        &self.node.name
    }

    /// Logical length in bytes.
    pub fn len(&self) -> u64 {
        self.node.snapshot().data_len
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn status(&self) -> FileStatus {
        self.node.snapshot().status
    }
}

impl std::fmt::Debug for FileHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileHandle")
            .field("path", &self.node.name)
            .field("state", &self.node.snapshot())
            .finish()
    }
}

/// Directory and file indexes, keyed by absolute virtual path. The file
/// index only holds currently-open files; the directory index grows
/// monotonically as paths are resolved.
pub(crate) struct HandleTable {
    dirs: DashMap<String, DirNode>,
    files: DashMap<String, Arc<FileNode>>,
}

impl HandleTable {
    pub(crate) fn new() -> Self {
        Self {
            dirs: DashMap::new(),
            files: DashMap::new(),
        }
    }

    pub(crate) fn dir(&self, path: &str) -> Option<DirNode> {
        self.dirs.get(path).map(|d| *d)
    }

    /// Double insertion means a path was found in two containers or the
    /// walker raced itself; both are fatal logic errors.
    pub(crate) fn insert_dir(&self, path: String, node: DirNode) -> Result<()> {
        match self.dirs.entry(path) {
            Entry::Occupied(occupied) => Err(VfsError::DirAlreadyExists {
                path: occupied.key().clone(),
            }),
            Entry::Vacant(vacant) => {
                vacant.insert(node);
                Ok(())
            }
        }
    }

    pub(crate) fn file(&self, path: &str) -> Option<Arc<FileNode>> {
        self.files.get(path).map(|f| Arc::clone(&f))
    }

    pub(crate) fn insert_file(&self, node: Arc<FileNode>) -> Result<()> {
        match self.files.entry(node.name.clone()) {
            Entry::Occupied(occupied) => Err(VfsError::FileAlreadyExists {
                path: occupied.key().clone(),
            }),
            Entry::Vacant(vacant) => {
                vacant.insert(node);
                Ok(())
            }
        }
    }

    pub(crate) fn remove_file(&self, path: &str) {
        self.files.remove(path);
    }

    pub(crate) fn dir_paths(&self) -> Vec<String> {
        let mut paths: Vec<String> = self.dirs.iter().map(|e| e.key().clone()).collect();
        paths.sort();
        paths
    }
}
