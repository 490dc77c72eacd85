//! Directory tree navigation and record materialization.
//!
//! Resolution climbs from the requested directory toward root until it
//! hits a path the index already knows, then walks back down scanning
//! page chains on disk, caching every directory it proves to exist.
//! Creation appends the new entry's first page at the container tail and
//! writes its record at the end of the parent's chain, growing the chain
//! with fresh pages when the record does not fit.

use crate::container::{ContainerBackend, ContainerIo};
use crate::error::{Result, VfsError};
use crate::page::record::{self, RecordKind};
use crate::vfs::fs::Vfs;
use crate::vfs::handles::DirNode;
use crate::vfs::path as vpath;
use std::sync::atomic::Ordering;

/// Outcome of resolving a directory path.
///
/// `anchor` is the deepest directory proven to exist (`None` means the
/// resolution bottomed out at root); `missing` holds the absolute paths
/// of the components below it, outermost first.
pub(crate) struct Resolution {
    pub(crate) anchor: Option<DirNode>,
    pub(crate) missing: Vec<String>,
}

impl<B: ContainerBackend> Vfs<B> {
    /// Resolve `dir_path` against the directory index, then against the
    /// on-container chains. Directories found on disk are inserted into
    /// the index as a side effect.
    pub(crate) async fn resolve_dirs(&self, dir_path: &str) -> Result<Resolution> {
        let mut missing: Vec<String> = Vec::new();
        let mut cur = dir_path;
        let mut found: Option<DirNode> = None;
        while cur != "/" {
            if let Some(dir) = self.table.dir(cur) {
                found = Some(dir);
                break;
            }
            missing.push(cur.to_string());
            cur = vpath::parent(cur);
        }
        missing.reverse();

        // The initial scan indexed every top-level directory, so a climb
        // that reaches root cannot be helped by reading chains.
        let Some(mut anchor) = found else {
            return Ok(Resolution {
                anchor: None,
                missing,
            });
        };

        let mut resolved = 0;
        for want in &missing {
            let hit = self
                .find_record_in_chain(
                    anchor.container,
                    anchor.first_page,
                    want,
                    RecordKind::Directory,
                )
                .await?;
            let Some(first_page) = hit else { break };
            let node = DirNode {
                container: anchor.container,
                first_page,
            };
            self.table.insert_dir(want.clone(), node)?;
            anchor = node;
            resolved += 1;
        }
        missing.drain(..resolved);

        Ok(Resolution {
            anchor: Some(anchor),
            missing,
        })
    }

    /// Scan the page chain starting at `first_page` for a record of
    /// `kind` named `name`.
    pub(crate) async fn find_record_in_chain(
        &self,
        container: usize,
        first_page: u64,
        name: &str,
        kind: RecordKind,
    ) -> Result<Option<u64>> {
        let io = self.containers[container].lock().await;
        let mut page = first_page;
        loop {
            let buf = io.read_page(self.layout, page).await?;
            if let Some(hit) = record::find(&buf, self.layout, name, kind)? {
                return Ok(Some(hit));
            }
            page = record::next_page(&buf, self.layout);
            if page == 0 {
                return Ok(None);
            }
        }
    }

    /// Create a record for `name` under the directory chain rooted at
    /// `parent_first_page`, in the container whose guard is held. Returns
    /// the new entry's first page.
    pub(crate) async fn create_record(
        &self,
        io: &mut ContainerIo<B>,
        container: usize,
        parent_first_page: u64,
        name: &str,
        kind: RecordKind,
    ) -> Result<u64> {
        // Last page of the parent's chain.
        let mut page = parent_first_page;
        let mut buf = io.read_page(self.layout, page).await?;
        loop {
            let next = record::next_page(&buf, self.layout);
            if next == 0 {
                break;
            }
            page = next;
            buf = io.read_page(self.layout, next).await?;
        }
        let pos = record::page_end(&buf, self.layout);

        // The entry's first page goes at the container tail.
        let first_page = self.layout.page_count(io.size());
        io.append(&self.layout.zero_page()).await?;

        let bytes = record::encode(kind, name, first_page);
        self.chained_write(io, &bytes, page, pos, false).await?;

        match kind {
            RecordKind::File => {
                let count = io.file_count().await?;
                io.set_file_count(count + 1).await?;
                self.files_total.fetch_add(1, Ordering::Relaxed);
            }
            RecordKind::Directory => {
                self.table.insert_dir(
                    name.to_string(),
                    DirNode {
                        container,
                        first_page,
                    },
                )?;
            }
        }

        tracing::debug!(name, first_page, ?kind, "created record");
        Ok(first_page)
    }

    /// Write `data` into the chain at (`page`, `pos`), growing the chain
    /// with freshly appended pages as batches overflow the payload
    /// window. With `carry` unset, nothing lands in the starting page
    /// unless the whole buffer fits there. Returns payload bytes written.
    pub(crate) async fn chained_write(
        &self,
        io: &mut ContainerIo<B>,
        data: &[u8],
        mut page: u64,
        pos: usize,
        carry: bool,
    ) -> Result<usize> {
        let payload = self.layout.payload_size();
        let room = payload.saturating_sub(pos);

        if data.len() <= room {
            return io
                .write_at(self.layout.page_offset(page) + pos as u64, data)
                .await;
        }

        let mut written = 0;
        if carry && room > 0 {
            written = io
                .write_at(self.layout.page_offset(page) + pos as u64, &data[..room])
                .await?;
        }

        while written < data.len() {
            // Appending a zero page keeps the container page-aligned and
            // leaves the new page's next-slot already terminated.
            let next = self.layout.page_count(io.size());
            io.append(&self.layout.zero_page()).await?;
            io.write_at(self.layout.next_slot_offset(page), &next.to_le_bytes())
                .await?;

            let batch = (data.len() - written).min(payload);
            io.write_at(
                self.layout.page_offset(next),
                &data[written..written + batch],
            )
            .await?;
            written += batch;
            page = next;
        }

        Ok(written)
    }

    /// Locate the write position for appending to a file whose chain
    /// starts at `first_page` with `data_len` bytes of content: the
    /// current last page and the first free payload offset within it.
    pub(crate) async fn append_position(
        &self,
        io: &ContainerIo<B>,
        first_page: u64,
        data_len: u64,
    ) -> Result<(u64, usize)> {
        let payload = self.layout.payload_size() as u64;
        // Payload laid out so far: the length header plus the content.
        let laid_out = crate::page::WORD as u64 + data_len;
        let (hops, pos) = if laid_out % payload == 0 {
            (laid_out / payload - 1, payload)
        } else {
            (laid_out / payload, laid_out % payload)
        };

        let mut page = first_page;
        for _ in 0..hops {
            let buf = io.read_page(self.layout, page).await?;
            let next = record::next_page(&buf, self.layout);
            if next == 0 {
                return Err(VfsError::corrupted(format!(
                    "page chain of page {first_page} ends before its {data_len} content bytes"
                )));
            }
            page = next;
        }
        Ok((page, pos as usize))
    }
}
