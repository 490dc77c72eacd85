//! Storage backends for containers: positioned byte I/O over one backing
//! store (implements [`ContainerBackend`]).

use crate::error::{Result, VfsError};
use async_trait::async_trait;
use std::os::unix::fs::FileExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::RwLock;

fn join_failed(err: tokio::task::JoinError) -> VfsError {
    VfsError::Io(std::io::Error::other(format!("blocking task failed: {err}")))
}

/// Positioned I/O over one backing store. Reads clipped by end-of-file
/// return the number of bytes actually read; writes past end-of-file grow
/// the store. Serialization is the caller's job ([`super::Container`]
/// wraps every backend in a per-container lock).
#[async_trait]
pub trait ContainerBackend: Send + Sync + 'static {
    async fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<usize>;
    async fn write_at(&self, offset: u64, data: &[u8]) -> Result<usize>;
    async fn size(&self) -> Result<u64>;
}

/// Host-file backend. The file is created when missing; positioned reads
/// and writes go through `FileExt` off the runtime via `spawn_blocking`.
pub struct FileBackend {
    path: PathBuf,
    file: Arc<std::fs::File>,
}

impl FileBackend {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = std::fs::OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)?;
        Ok(Self {
            path,
            file: Arc::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl ContainerBackend for FileBackend {
    #[tracing::instrument(level = "trace", skip(self, buf), fields(path = %self.path.display(), len = buf.len()))]
    async fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        let file = Arc::clone(&self.file);
        let len = buf.len();
        let data = tokio::task::spawn_blocking(move || -> std::io::Result<Vec<u8>> {
            let mut local = vec![0u8; len];
            let mut read = 0usize;
            while read < len {
                let n = file.read_at(&mut local[read..], offset + read as u64)?;
                if n == 0 {
                    break;
                }
                read += n;
            }
            local.truncate(read);
            Ok(local)
        })
        .await
        .map_err(join_failed)??;

        buf[..data.len()].copy_from_slice(&data);
        Ok(data.len())
    }

    #[tracing::instrument(level = "trace", skip(self, data), fields(path = %self.path.display(), len = data.len()))]
    async fn write_at(&self, offset: u64, data: &[u8]) -> Result<usize> {
        if data.is_empty() {
            return Ok(0);
        }
        let file = Arc::clone(&self.file);
        let owned = data.to_vec();
        tokio::task::spawn_blocking(move || -> std::io::Result<usize> {
            file.write_all_at(&owned, offset)?;
            Ok(owned.len())
        })
        .await
        .map_err(join_failed)?
        .map_err(VfsError::from)
    }

    async fn size(&self) -> Result<u64> {
        Ok(self.file.metadata()?.len())
    }
}

/// Vec-backed backend for tests and demos.
#[derive(Default)]
pub struct InMemoryBackend {
    data: RwLock<Vec<u8>>,
}

impl InMemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ContainerBackend for InMemoryBackend {
    async fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<usize> {
        let guard = self.data.read().await;
        let start = offset as usize;
        if start >= guard.len() {
            return Ok(0);
        }
        let end = (start + buf.len()).min(guard.len());
        let n = end - start;
        buf[..n].copy_from_slice(&guard[start..end]);
        Ok(n)
    }

    async fn write_at(&self, offset: u64, data: &[u8]) -> Result<usize> {
        let mut guard = self.data.write().await;
        let start = offset as usize;
        let end = start + data.len();
        if guard.len() < end {
            guard.resize(end, 0);
        }
        guard[start..end].copy_from_slice(data);
        Ok(data.len())
    }

    async fn size(&self) -> Result<u64> {
        Ok(self.data.read().await.len() as u64)
    }
}
