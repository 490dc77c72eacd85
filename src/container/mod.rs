//! Container handles: one backing store per container, all I/O on it
//! serialized by a single async lock.
//!
//! [`Container::lock`] yields the [`ContainerIo`] guard; holding the guard
//! is holding the container's I/O lock, and every compound operation
//! (record creation, chained writes, whole-file reads) keeps it for the
//! duration instead of re-acquiring per access. The guard also caches the
//! container size so append targets do not re-query the host.

pub mod backend;

pub use backend::{ContainerBackend, FileBackend, InMemoryBackend};

use crate::error::{Result, VfsError};
use crate::page::{PageLayout, WORD};
use tokio::sync::{Mutex, MutexGuard};

pub struct Container<B> {
    label: String,
    io: Mutex<ContainerIo<B>>,
}

/// The locked side of a container: positioned I/O plus the size cache.
pub(crate) struct ContainerIo<B> {
    label: String,
    backend: B,
    size: u64,
}

impl<B: ContainerBackend> Container<B> {
    pub(crate) async fn new(label: String, backend: B) -> Result<Self> {
        let size = backend.size().await?;
        Ok(Self {
            io: Mutex::new(ContainerIo {
                label: label.clone(),
                backend,
                size,
            }),
            label,
        })
    }

    pub(crate) fn label(&self) -> &str {
        &self.label
    }

    pub(crate) async fn lock(&self) -> MutexGuard<'_, ContainerIo<B>> {
        self.io.lock().await
    }

    pub(crate) async fn size(&self) -> u64 {
        self.io.lock().await.size
    }

    /// Bootstrap an empty container: a zeroed file-count header followed
    /// by a zeroed root directory page.
    pub(crate) async fn format_if_empty(&self, layout: PageLayout) -> Result<()> {
        let mut io = self.io.lock().await;
        if io.size == 0 {
            io.append(&[0u8; WORD]).await?;
            io.append(&layout.zero_page()).await?;
            tracing::debug!(container = %self.label, "formatted empty container");
        }
        Ok(())
    }
}

impl<B: ContainerBackend> ContainerIo<B> {
    pub(crate) fn size(&self) -> u64 {
        self.size
    }

    pub(crate) async fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<usize> {
        self.backend.read_at(offset, buf).await
    }

    /// Read that must deliver the full buffer; anything less means the
    /// container lost bytes.
    pub(crate) async fn read_exact_at(&self, offset: u64, buf: &mut [u8]) -> Result<()> {
        let n = self.backend.read_at(offset, buf).await?;
        if n != buf.len() {
            return Err(VfsError::ShortRead {
                container: self.label.clone(),
                offset,
            });
        }
        Ok(())
    }

    pub(crate) async fn write_at(&mut self, offset: u64, data: &[u8]) -> Result<usize> {
        let n = self.backend.write_at(offset, data).await?;
        if n != data.len() {
            return Err(VfsError::ShortWrite {
                container: self.label.clone(),
                offset,
            });
        }
        self.size = self.size.max(offset + n as u64);
        Ok(n)
    }

    /// Write at the current end of the container.
    pub(crate) async fn append(&mut self, data: &[u8]) -> Result<usize> {
        self.write_at(self.size, data).await
    }

    /// Read one whole page.
    pub(crate) async fn read_page(&self, layout: PageLayout, page: u64) -> Result<Vec<u8>> {
        let mut buf = vec![0u8; layout.page_size];
        self.read_exact_at(layout.page_offset(page), &mut buf).await?;
        Ok(buf)
    }

    /// The container's file-count header.
    pub(crate) async fn file_count(&self) -> Result<u64> {
        let mut word = [0u8; WORD];
        self.read_exact_at(0, &mut word).await?;
        Ok(u64::from_le_bytes(word))
    }

    pub(crate) async fn set_file_count(&mut self, count: u64) -> Result<()> {
        self.write_at(0, &count.to_le_bytes()).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::page::HEADER_SIZE;

    #[tokio::test]
    async fn test_format_if_empty_writes_header_and_root_page() {
        let layout = PageLayout::default();
        let container = Container::new("mem".into(), InMemoryBackend::new())
            .await
            .unwrap();
        container.format_if_empty(layout).await.unwrap();
        assert_eq!(container.size().await, HEADER_SIZE + layout.page_size as u64);

        // Idempotent: a second call leaves the size alone.
        container.format_if_empty(layout).await.unwrap();
        assert_eq!(container.size().await, HEADER_SIZE + layout.page_size as u64);

        let io = container.lock().await;
        assert_eq!(io.file_count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_append_tracks_size() {
        let layout = PageLayout::default();
        let container = Container::new("mem".into(), InMemoryBackend::new())
            .await
            .unwrap();
        container.format_if_empty(layout).await.unwrap();

        let mut io = container.lock().await;
        io.append(&layout.zero_page()).await.unwrap();
        assert_eq!(io.size(), HEADER_SIZE + 2 * layout.page_size as u64);
        assert_eq!(layout.page_count(io.size()), 2);
    }

    #[tokio::test]
    async fn test_read_exact_past_eof_is_an_error() {
        let container = Container::new("mem".into(), InMemoryBackend::new())
            .await
            .unwrap();
        let io = container.lock().await;
        let mut buf = [0u8; 4];
        assert!(matches!(
            io.read_exact_at(100, &mut buf).await,
            Err(VfsError::ShortRead { .. })
        ));
    }
}
