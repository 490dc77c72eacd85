//! Path-based VFS facade: construct over a set of containers, then
//! open/create/read/write/close logical files.

use crate::container::{Container, ContainerBackend, FileBackend};
use crate::error::{Result, VfsError};
use crate::page::record::{self, Record, RecordKind};
use crate::page::{MAX_CONTAINERS, PageLayout, WORD};
use crate::vfs::handles::{DirNode, FileHandle, FileNode, FileState, FileStatus, HandleTable};
use crate::vfs::path as vpath;
use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;
use std::sync::Mutex as StdMutex;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::Mutex;
use tokio::task::JoinSet;

/// A virtual file system packing logical files and directory trees into a
/// small fixed set of paged container files.
///
/// Concurrency model: one `edit` lock serializes handle-table transitions
/// (open/create/close), each container serializes its own I/O, and the
/// single-writer-or-many-readers rule applies per logical file. Reads and
/// writes on files in different containers run in parallel.
pub struct Vfs<B: ContainerBackend = FileBackend> {
    pub(crate) layout: PageLayout,
    pub(crate) containers: Vec<Arc<Container<B>>>,
    pub(crate) table: Arc<HandleTable>,
    pub(crate) edit: Mutex<()>,
    pub(crate) files_total: AtomicU64,
}

fn validate(layout: PageLayout, containers: usize) -> Result<()> {
    if !layout.is_valid() {
        return Err(VfsError::PageSizeTooSmall {
            page_size: layout.page_size,
        });
    }
    if containers == 0 {
        return Err(VfsError::NoFiles);
    }
    if containers > MAX_CONTAINERS {
        return Err(VfsError::TooManyFiles {
            max: MAX_CONTAINERS,
        });
    }
    Ok(())
}

impl Vfs<FileBackend> {
    /// Construct over host container files with the default page size.
    /// Relative container paths resolve against `root`; missing files and
    /// directories are created, fresh containers are formatted, and every
    /// container is scanned before this returns.
    pub async fn new<P: AsRef<Path>>(containers: &[P], root: impl AsRef<Path>) -> Result<Self> {
        Self::with_layout(PageLayout::default(), containers, root).await
    }

    pub async fn with_layout<P: AsRef<Path>>(
        layout: PageLayout,
        containers: &[P],
        root: impl AsRef<Path>,
    ) -> Result<Self> {
        validate(layout, containers.len())?;

        let root = root.as_ref();
        if !root.exists() {
            std::fs::create_dir_all(root)?;
        }
        if !root.is_dir() {
            return Err(VfsError::RootIsNotDirectory {
                path: root.to_path_buf(),
            });
        }

        let mut seen = HashSet::new();
        let mut built = Vec::new();
        for path in containers {
            let mut path = path.as_ref().to_path_buf();
            if path.is_relative() {
                path = root.join(path);
            }
            if let Some(dir) = path.parent()
                && !dir.as_os_str().is_empty()
                && !dir.exists()
            {
                std::fs::create_dir_all(dir)?;
            }
            if !seen.insert(path.clone()) {
                return Err(VfsError::DuplicateContainer { path });
            }
            let backend = FileBackend::open(&path)?;
            built.push(Container::new(path.display().to_string(), backend).await?);
        }

        Self::assemble(layout, built).await
    }
}

impl<B: ContainerBackend> Vfs<B> {
    /// Construct over arbitrary labelled backends (tests use the
    /// in-memory one).
    pub async fn from_backends(layout: PageLayout, backends: Vec<(String, B)>) -> Result<Self> {
        validate(layout, backends.len())?;
        let mut built = Vec::new();
        for (label, backend) in backends {
            built.push(Container::new(label, backend).await?);
        }
        Self::assemble(layout, built).await
    }

    async fn assemble(layout: PageLayout, containers: Vec<Container<B>>) -> Result<Self> {
        let containers: Vec<Arc<Container<B>>> = containers.into_iter().map(Arc::new).collect();
        for container in &containers {
            container.format_if_empty(layout).await?;
        }

        // One scan task per container; each container has its own I/O
        // lock, so the scans proceed in parallel.
        let table = Arc::new(HandleTable::new());
        let mut scans = JoinSet::new();
        for (idx, container) in containers.iter().enumerate() {
            scans.spawn(scan_container(
                layout,
                idx,
                Arc::clone(container),
                Arc::clone(&table),
            ));
        }
        let mut total = 0u64;
        while let Some(joined) = scans.join_next().await {
            total += joined
                .map_err(|e| VfsError::Io(std::io::Error::other(format!("scan task failed: {e}"))))??;
        }

        Ok(Self {
            layout,
            containers,
            table,
            edit: Mutex::new(()),
            files_total: AtomicU64::new(total),
        })
    }

    pub fn layout(&self) -> PageLayout {
        self.layout
    }

    /// Total number of logical files stored across all containers.
    pub fn file_count(&self) -> u64 {
        self.files_total.load(Ordering::Relaxed)
    }

    /// Absolute paths of every directory known to the index, sorted.
    pub fn directories(&self) -> Vec<String> {
        self.table.dir_paths()
    }

    /// Open a file for reading. Returns `None` when the path is the root
    /// or a direct child of it, does not exist, or is currently open for
    /// writing. Any number of readers may share a file.
    #[tracing::instrument(level = "debug", skip(self))]
    pub async fn open(&self, name: &str) -> Result<Option<FileHandle>> {
        let Some(path) = vpath::normalize_file_path(name) else {
            return Ok(None);
        };

        let _edit = self.edit.lock().await;

        if let Some(node) = self.table.file(&path) {
            if node.snapshot().status != FileStatus::OpenRead {
                return Ok(None);
            }
            node.readers.fetch_add(1, Ordering::AcqRel);
            return Ok(Some(FileHandle { node }));
        }

        let resolved = self.resolve_dirs(vpath::parent(&path)).await?;
        if !resolved.missing.is_empty() {
            return Ok(None);
        }
        let Some(parent) = resolved.anchor else {
            return Ok(None);
        };

        let Some(first_page) = self
            .find_record_in_chain(parent.container, parent.first_page, &path, RecordKind::File)
            .await?
        else {
            return Ok(None);
        };

        let data_len = self.load_data_len(parent.container, first_page).await?;
        let node = Arc::new(FileNode {
            name: path,
            container: parent.container,
            first_page,
            state: StdMutex::new(FileState {
                status: FileStatus::OpenRead,
                data_len,
            }),
            readers: AtomicU64::new(1),
        });
        self.table.insert_file(Arc::clone(&node))?;
        Ok(Some(FileHandle { node }))
    }

    /// Open or create a file for writing, materializing any missing
    /// parent directories. Returns `None` when the path is the root or a
    /// direct child of it, or when the file is already open (there can be
    /// only one writer, and writers exclude readers).
    #[tracing::instrument(level = "debug", skip(self))]
    pub async fn create(&self, name: &str) -> Result<Option<FileHandle>> {
        let Some(path) = vpath::normalize_file_path(name) else {
            return Ok(None);
        };

        let _edit = self.edit.lock().await;

        if self.table.file(&path).is_some() {
            return Ok(None);
        }

        let resolved = self.resolve_dirs(vpath::parent(&path)).await?;

        // A brand-new top-level directory may land anywhere; spread the
        // fan-out by picking the smallest container. Everything else
        // inherits the container of its closest existing ancestor.
        let container = match &resolved.anchor {
            Some(anchor) => anchor.container,
            None => self.smallest_container().await,
        };

        let existing = match &resolved.anchor {
            Some(anchor) if resolved.missing.is_empty() => {
                self.find_record_in_chain(
                    anchor.container,
                    anchor.first_page,
                    &path,
                    RecordKind::File,
                )
                .await?
            }
            _ => None,
        };

        let mut io = self.containers[container].lock().await;

        let mut parent_page = match &resolved.anchor {
            Some(anchor) => anchor.first_page,
            None => 0,
        };
        for dir_path in &resolved.missing {
            parent_page = self
                .create_record(&mut io, container, parent_page, dir_path, RecordKind::Directory)
                .await?;
        }

        let (first_page, data_len) = match existing {
            Some(first_page) => {
                let buf = io.read_page(self.layout, first_page).await?;
                (first_page, record::file_len(&buf))
            }
            None => {
                let first_page = self
                    .create_record(&mut io, container, parent_page, &path, RecordKind::File)
                    .await?;
                (first_page, 0)
            }
        };
        drop(io);

        let node = Arc::new(FileNode {
            name: path,
            container,
            first_page,
            state: StdMutex::new(FileState {
                status: FileStatus::OpenWrite,
                data_len,
            }),
            readers: AtomicU64::new(0),
        });
        self.table.insert_file(Arc::clone(&node))?;
        Ok(Some(FileHandle { node }))
    }

    /// Read from the beginning of the file into `buf`; at most
    /// `min(buf.len(), data_len)` bytes. Returns 0 when the handle is not
    /// open for reading. There is no read cursor: every call returns the
    /// leading bytes.
    pub async fn read(&self, handle: &FileHandle, buf: &mut [u8]) -> Result<usize> {
        let node = &handle.node;
        let state = node.snapshot();
        if state.status != FileStatus::OpenRead || buf.is_empty() {
            return Ok(0);
        }
        let len = (buf.len() as u64).min(state.data_len) as usize;
        if len == 0 {
            return Ok(0);
        }

        let io = self.containers[node.container].lock().await;
        let first_capacity = self.layout.first_page_capacity();
        if len <= first_capacity {
            io.read_exact_at(
                self.layout.page_offset(node.first_page) + WORD as u64,
                &mut buf[..len],
            )
            .await?;
            return Ok(len);
        }

        let payload = self.layout.payload_size();
        let mut page_buf = io.read_page(self.layout, node.first_page).await?;
        buf[..first_capacity].copy_from_slice(&page_buf[WORD..WORD + first_capacity]);
        let mut done = first_capacity;
        while done < len {
            let next = record::next_page(&page_buf, self.layout);
            if next == 0 {
                return Err(VfsError::corrupted(format!(
                    "chain of {} ends after {done} of {len} bytes",
                    node.name
                )));
            }
            page_buf = io.read_page(self.layout, next).await?;
            let take = payload.min(len - done);
            buf[done..done + take].copy_from_slice(&page_buf[..take]);
            done += take;
        }
        Ok(len)
    }

    /// Append `data` at the logical end of the file. Returns 0 when the
    /// handle is not open for writing.
    pub async fn write(&self, handle: &FileHandle, data: &[u8]) -> Result<usize> {
        let node = &handle.node;
        if node.snapshot().status != FileStatus::OpenWrite || data.is_empty() {
            return Ok(0);
        }

        let mut io = self.containers[node.container].lock().await;
        let data_len = node.snapshot().data_len;
        let (page, pos) = self
            .append_position(&io, node.first_page, data_len)
            .await?;
        let written = self.chained_write(&mut io, data, page, pos, true).await?;

        let new_len = data_len + written as u64;
        io.write_at(
            self.layout.page_offset(node.first_page),
            &new_len.to_le_bytes(),
        )
        .await?;
        node.set_data_len(new_len);
        Ok(written)
    }

    /// Close a handle. A writer leaves the file index immediately; a
    /// reader leaves when the last reader closes.
    pub async fn close(&self, handle: FileHandle) {
        let node = handle.node;
        let _edit = self.edit.lock().await;
        match node.snapshot().status {
            FileStatus::OpenWrite => {
                node.set_status(FileStatus::Closed);
                self.table.remove_file(&node.name);
            }
            FileStatus::OpenRead => {
                if node.readers.fetch_sub(1, Ordering::AcqRel) == 1 {
                    node.set_status(FileStatus::Closed);
                    self.table.remove_file(&node.name);
                }
            }
            FileStatus::Closed => {}
        }
    }

    async fn load_data_len(&self, container: usize, first_page: u64) -> Result<u64> {
        let io = self.containers[container].lock().await;
        let buf = io.read_page(self.layout, first_page).await?;
        Ok(record::file_len(&buf))
    }

    /// Container with the smallest current size; ties go to the lowest
    /// index so the choice is deterministic.
    pub(crate) async fn smallest_container(&self) -> usize {
        let mut best = 0;
        let mut best_size = u64::MAX;
        for (idx, container) in self.containers.iter().enumerate() {
            let size = container.size().await;
            if size < best_size {
                best = idx;
                best_size = size;
            }
        }
        best
    }
}

/// Index every top-level directory recorded in the container's root
/// chain; returns the container's file count. Deeper directories are
/// resolved lazily when paths are first used.
async fn scan_container<B: ContainerBackend>(
    layout: PageLayout,
    idx: usize,
    container: Arc<Container<B>>,
    table: Arc<HandleTable>,
) -> Result<u64> {
    let io = container.lock().await;
    let count = io.file_count().await?;
    // Files are never deleted, so a zero count means no records at all.
    if count == 0 {
        return Ok(0);
    }

    let mut page = 0u64;
    loop {
        let buf = io.read_page(layout, page).await?;
        let mut pos = 0usize;
        loop {
            let (rec, next_pos) = record::decode(&buf, layout, pos)?;
            match rec {
                Record::Directory { name, first_page } => {
                    table.insert_dir(
                        name,
                        DirNode {
                            container: idx,
                            first_page,
                        },
                    )?;
                }
                Record::File { .. } | Record::End => {}
            }
            pos = next_pos;
            if pos == 0 || pos >= layout.payload_size() {
                break;
            }
        }
        page = record::next_page(&buf, layout);
        if page == 0 {
            break;
        }
    }

    tracing::debug!(container = container.label(), count, "scanned container");
    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::InMemoryBackend;
    use crate::page::HEADER_SIZE;

    async fn mem_vfs(n: usize) -> Vfs<InMemoryBackend> {
        let backends = (0..n)
            .map(|i| (format!("{i}.vfs"), InMemoryBackend::new()))
            .collect();
        Vfs::from_backends(PageLayout::default(), backends)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_construct_rejects_bad_inputs() {
        let none: Vec<(String, InMemoryBackend)> = Vec::new();
        assert!(matches!(
            Vfs::from_backends(PageLayout::default(), none).await,
            Err(VfsError::NoFiles)
        ));

        let too_many = (0..MAX_CONTAINERS + 1)
            .map(|i| (format!("{i}.vfs"), InMemoryBackend::new()))
            .collect();
        assert!(matches!(
            Vfs::from_backends(PageLayout::default(), too_many).await,
            Err(VfsError::TooManyFiles { .. })
        ));

        let one = vec![("0.vfs".to_string(), InMemoryBackend::new())];
        assert!(matches!(
            Vfs::from_backends(PageLayout::new(16), one).await,
            Err(VfsError::PageSizeTooSmall { .. })
        ));
    }

    #[tokio::test]
    async fn test_fresh_containers_hold_one_empty_page() {
        let fs = mem_vfs(3).await;
        for container in &fs.containers {
            assert_eq!(
                container.size().await,
                HEADER_SIZE + fs.layout.page_size as u64
            );
        }
        assert_eq!(fs.file_count(), 0);
    }

    #[tokio::test]
    async fn test_create_write_read_roundtrip() {
        let fs = mem_vfs(2).await;

        let v = fs.create("/new_dir/new_file").await.unwrap().unwrap();
        assert_eq!(fs.write(&v, b"Hello world!").await.unwrap(), 12);
        fs.close(v).await;

        let v = fs.open("/new_dir/new_file").await.unwrap().unwrap();
        assert_eq!(v.len(), 12);
        let mut buf = [0u8; 12];
        assert_eq!(fs.read(&v, &mut buf).await.unwrap(), 12);
        assert_eq!(&buf, b"Hello world!");
        fs.close(v).await;

        assert_eq!(fs.file_count(), 1);
    }

    #[tokio::test]
    async fn test_root_and_top_level_paths_rejected() {
        let fs = mem_vfs(2).await;
        assert!(fs.create("/").await.unwrap().is_none());
        assert!(fs.create("/a").await.unwrap().is_none());
        assert!(fs.open("/a").await.unwrap().is_none());
        // no container was touched
        for container in &fs.containers {
            assert_eq!(
                container.size().await,
                HEADER_SIZE + fs.layout.page_size as u64
            );
        }
    }

    #[tokio::test]
    async fn test_single_writer_exclusion() {
        let fs = mem_vfs(2).await;
        let v = fs.create("/d/f").await.unwrap().unwrap();
        // second writer while the first is open
        assert!(fs.create("/d/f").await.unwrap().is_none());
        // readers are excluded too
        assert!(fs.open("/d/f").await.unwrap().is_none());
        fs.close(v).await;

        // after close the file reopens in either mode
        let r = fs.open("/d/f").await.unwrap().unwrap();
        assert!(fs.create("/d/f").await.unwrap().is_none());
        fs.close(r).await;
        let w = fs.create("/d/f").await.unwrap().unwrap();
        fs.close(w).await;
    }

    #[tokio::test]
    async fn test_many_readers_share_a_file() {
        let fs = mem_vfs(2).await;
        let v = fs.create("/d/f").await.unwrap().unwrap();
        fs.write(&v, b"abc").await.unwrap();
        fs.close(v).await;

        let r1 = fs.open("/d/f").await.unwrap().unwrap();
        let r2 = fs.open("/d/f").await.unwrap().unwrap();
        let mut buf = [0u8; 3];
        assert_eq!(fs.read(&r2, &mut buf).await.unwrap(), 3);
        fs.close(r1).await;
        // still open through r2
        assert_eq!(fs.read(&r2, &mut buf).await.unwrap(), 3);
        assert_eq!(&buf, b"abc");
        fs.close(r2).await;
        assert!(fs.table.file("/d/f").is_none());
    }

    #[tokio::test]
    async fn test_open_missing_sibling_is_none() {
        let fs = mem_vfs(2).await;
        let v = fs.create("/d/f").await.unwrap().unwrap();
        fs.close(v).await;
        assert!(fs.open("/d/g").await.unwrap().is_none());
        assert!(fs.open("/other/g").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_wrong_mode_transfers_zero_bytes() {
        let fs = mem_vfs(2).await;
        let w = fs.create("/d/f").await.unwrap().unwrap();
        let mut buf = [0u8; 4];
        // reading a write handle
        assert_eq!(fs.read(&w, &mut buf).await.unwrap(), 0);
        fs.write(&w, b"data").await.unwrap();
        fs.close(w).await;

        let r = fs.open("/d/f").await.unwrap().unwrap();
        // writing a read handle
        assert_eq!(fs.write(&r, b"nope").await.unwrap(), 0);
        assert_eq!(fs.read(&r, &mut buf).await.unwrap(), 4);
        assert_eq!(&buf, b"data");
        fs.close(r).await;
    }

    #[tokio::test]
    async fn test_multi_page_content_roundtrip() {
        let fs = mem_vfs(2).await;
        let len = fs.layout.page_size * 3 + 123;
        let mut data = vec![0u8; len];
        for (i, b) in data.iter_mut().enumerate() {
            *b = (i % 251) as u8;
        }

        let v = fs.create("/big/file").await.unwrap().unwrap();
        assert_eq!(fs.write(&v, &data).await.unwrap(), len);
        fs.close(v).await;

        let v = fs.open("/big/file").await.unwrap().unwrap();
        assert_eq!(v.len(), len as u64);
        let mut out = vec![0u8; len];
        assert_eq!(fs.read(&v, &mut out).await.unwrap(), len);
        assert_eq!(out, data);
        fs.close(v).await;
    }

    #[tokio::test]
    async fn test_reopening_for_write_appends() {
        let fs = mem_vfs(2).await;
        let v = fs.create("/d/f").await.unwrap().unwrap();
        fs.write(&v, b"Hello ").await.unwrap();
        fs.close(v).await;

        let v = fs.create("/d/f").await.unwrap().unwrap();
        assert_eq!(v.len(), 6);
        fs.write(&v, b"world!").await.unwrap();
        fs.close(v).await;

        let v = fs.open("/d/f").await.unwrap().unwrap();
        let mut buf = [0u8; 12];
        assert_eq!(fs.read(&v, &mut buf).await.unwrap(), 12);
        assert_eq!(&buf, b"Hello world!");
        fs.close(v).await;

        // the second create reused the record
        assert_eq!(fs.file_count(), 1);
    }

    #[tokio::test]
    async fn test_smallest_container_takes_new_top_level_dirs() {
        let fs = mem_vfs(3).await;

        // Grow container 0 by creating the first tree inside it.
        let v = fs.create("/one/f").await.unwrap().unwrap();
        fs.write(&v, &[7u8; 5000]).await.unwrap();
        fs.close(v).await;

        let sizes_before: Vec<u64> = [
            fs.containers[0].size().await,
            fs.containers[1].size().await,
            fs.containers[2].size().await,
        ]
        .into();
        assert!(sizes_before[0] > sizes_before[1]);
        assert_eq!(fs.smallest_container().await, 1);

        // The next new top-level dir must land in container 1.
        let v = fs.create("/two/f").await.unwrap().unwrap();
        fs.close(v).await;
        assert!(fs.containers[1].size().await > sizes_before[1]);
        assert_eq!(fs.containers[2].size().await, sizes_before[2]);

        // A child of an existing tree inherits its container.
        let v = fs.create("/one/deeper/f").await.unwrap().unwrap();
        fs.close(v).await;
        assert_eq!(fs.containers[2].size().await, sizes_before[2]);
    }

    #[tokio::test]
    async fn test_directories_index_after_creates() {
        let fs = mem_vfs(2).await;
        let v = fs.create("/a/b/c/f").await.unwrap().unwrap();
        fs.close(v).await;
        assert_eq!(fs.directories(), vec!["/a", "/a/b", "/a/b/c"]);
    }

    #[tokio::test]
    async fn test_cross_container_parallel_writes() {
        let fs = Arc::new(mem_vfs(4).await);
        let mut tasks = JoinSet::new();
        for i in 0..4 {
            let fs = Arc::clone(&fs);
            tasks.spawn(async move {
                let path = format!("/tree{i}/file");
                let v = fs.create(&path).await.unwrap().unwrap();
                let chunk = vec![i as u8; 1500];
                for _ in 0..5 {
                    assert_eq!(fs.write(&v, &chunk).await.unwrap(), chunk.len());
                }
                fs.close(v).await;
            });
        }
        while let Some(joined) = tasks.join_next().await {
            joined.unwrap();
        }

        for i in 0..4 {
            let path = format!("/tree{i}/file");
            let v = fs.open(&path).await.unwrap().unwrap();
            assert_eq!(v.len(), 7500);
            let mut buf = vec![0u8; 7500];
            assert_eq!(fs.read(&v, &mut buf).await.unwrap(), 7500);
            assert!(buf.iter().all(|&b| b == i as u8));
            fs.close(v).await;
        }
        assert_eq!(fs.file_count(), 4);
    }
}
