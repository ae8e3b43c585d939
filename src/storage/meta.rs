//! Per-page metadata: MBRs, Voronoi-union MBRs, and inter-page links.
//!
//! The serialized metadata entry (also embedded in seed-tree leaves) is
//!
//! ```text
//! f32 x 6   page_mbr (low xyz, high xyz)
//! u32       page_id
//! u32       num_links
//! u32 x n   link page ids
//! ```
//!
//! The metadata store file holds one such entry per graph page, prefixed
//! with the page's partition MBR, packed into fixed-size pages in ascending
//! page-id order. A table region after the header records the first graph
//! page id of every entry page, so a crawl-time lookup is a binary search
//! plus a single page read.

use std::convert::TryInto;
use std::path::Path;

use crate::geometry::{Box3, Vertex};
use crate::primitives::pagefile::PageFile;
use crate::types::{DiasError, PageId, Result};

const META_MAGIC: [u8; 4] = *b"DIAM";
const META_VERSION: u32 = 1;
const HEADER_CRC_OFFSET: usize = 24;

/// Size of a serialized entry body (without links, without the partition
/// MBR prefix).
pub const ENTRY_FIXED_LEN: usize = 6 * 4 + 4 + 4;
const MBR_LEN: usize = 6 * 4;

/// Everything the crawler needs to know about one graph page.
#[derive(Clone, Debug, PartialEq)]
pub struct MetadataEntry {
    pub page_id: PageId,
    pub page_mbr: Box3,
    /// Union of the Voronoi MBRs and coordinates of the page's vertices;
    /// the pruning key used during the crawl.
    pub partition_mbr: Box3,
    /// Distinct page ids holding a cross-page neighbour of some vertex on
    /// this page; never contains the page itself.
    pub links: Vec<PageId>,
}

impl MetadataEntry {
    /// Serialized entry body per the on-disk layout (partition MBR not
    /// included; the seed tree keys its leaf entries with it instead).
    pub fn encode_body(&self, dst: &mut Vec<u8>) {
        put_mbr(dst, &self.page_mbr);
        dst.extend_from_slice(&self.page_id.0.to_le_bytes());
        dst.extend_from_slice(&(self.links.len() as u32).to_le_bytes());
        for link in &self.links {
            dst.extend_from_slice(&link.0.to_le_bytes());
        }
    }

    pub fn body_len(&self) -> usize {
        ENTRY_FIXED_LEN + self.links.len() * 4
    }

    /// Decodes an entry body; the partition MBR must be supplied by the
    /// container (store page or seed leaf).
    pub fn decode_body(buf: &[u8], partition_mbr: Box3) -> Result<(Self, usize)> {
        if buf.len() < ENTRY_FIXED_LEN {
            return Err(DiasError::Corruption("metadata entry truncated".into()));
        }
        let page_mbr = get_mbr(buf, 0);
        let page_id = PageId(read_u32(buf, MBR_LEN));
        let n_links = read_u32(buf, MBR_LEN + 4) as usize;
        let total = ENTRY_FIXED_LEN + n_links * 4;
        if buf.len() < total {
            return Err(DiasError::Corruption(format!(
                "metadata entry of page {page_id} claims {n_links} links beyond buffer"
            )));
        }
        let mut links = Vec::with_capacity(n_links);
        for i in 0..n_links {
            links.push(PageId(read_u32(buf, ENTRY_FIXED_LEN + i * 4)));
        }
        Ok((
            Self {
                page_id,
                page_mbr,
                partition_mbr,
                links,
            },
            total,
        ))
    }
}

/// Writes the metadata store. Entries must arrive in ascending page-id
/// order (the rewrite pass produces them that way).
pub struct MetaStoreWriter {
    page_size: usize,
    entry_pages: Vec<Vec<u8>>,
    table: Vec<u32>,
    current: Vec<u8>,
    current_count: u32,
    current_first: Option<u32>,
    next_expected: u32,
}

impl MetaStoreWriter {
    pub fn new(page_size: usize) -> Self {
        Self {
            page_size,
            entry_pages: Vec::new(),
            table: Vec::new(),
            current: Vec::new(),
            current_count: 0,
            current_first: None,
            next_expected: 0,
        }
    }

    pub fn push(&mut self, entry: &MetadataEntry) -> Result<()> {
        if entry.page_id.0 != self.next_expected {
            return Err(DiasError::Corruption(format!(
                "metadata entry for page {} out of order (expected {})",
                entry.page_id, self.next_expected
            )));
        }
        let encoded_len = MBR_LEN + entry.body_len();
        if 4 + encoded_len > self.page_size {
            return Err(DiasError::Corruption(format!(
                "metadata entry of page {} does not fit one page",
                entry.page_id
            )));
        }
        if 4 + self.current.len() + encoded_len > self.page_size {
            self.flush_current();
        }
        if self.current_first.is_none() {
            self.current_first = Some(entry.page_id.0);
        }
        put_mbr(&mut self.current, &entry.partition_mbr);
        entry.encode_body(&mut self.current);
        self.current_count += 1;
        self.next_expected += 1;
        Ok(())
    }

    fn flush_current(&mut self) {
        if self.current_count == 0 {
            return;
        }
        let mut page = Vec::with_capacity(self.page_size);
        page.extend_from_slice(&self.current_count.to_le_bytes());
        page.append(&mut self.current);
        page.resize(self.page_size, 0);
        self.entry_pages.push(page);
        self.table
            .push(self.current_first.take().expect("first id set with count"));
        self.current_count = 0;
    }

    /// Writes header, table region, and entry pages.
    pub fn finish(mut self, path: impl AsRef<Path>) -> Result<()> {
        self.flush_current();
        let num_entries = self.next_expected;
        let num_entry_pages = self.entry_pages.len() as u32;
        let ids_per_page = self.page_size / 4;
        let num_table_pages = self.table.len().div_ceil(ids_per_page.max(1)) as u32;

        let mut file = PageFile::create(path, self.page_size)?;
        let mut header = vec![0u8; self.page_size];
        header[0..4].copy_from_slice(&META_MAGIC);
        header[4..8].copy_from_slice(&META_VERSION.to_le_bytes());
        header[8..12].copy_from_slice(&(self.page_size as u32).to_le_bytes());
        header[12..16].copy_from_slice(&num_entries.to_le_bytes());
        header[16..20].copy_from_slice(&num_entry_pages.to_le_bytes());
        header[20..24].copy_from_slice(&num_table_pages.to_le_bytes());
        let crc = crc32fast::hash(&header[..HEADER_CRC_OFFSET]);
        header[HEADER_CRC_OFFSET..HEADER_CRC_OFFSET + 4].copy_from_slice(&crc.to_le_bytes());
        file.append_page(&header)?;

        for chunk in self.table.chunks(ids_per_page.max(1)) {
            let mut page = Vec::with_capacity(self.page_size);
            for first in chunk {
                page.extend_from_slice(&first.to_le_bytes());
            }
            page.resize(self.page_size, 0);
            file.append_page(&page)?;
        }
        for page in &self.entry_pages {
            file.append_page(page)?;
        }
        file.sync()
    }
}

/// Read side of the metadata store. The table is held in memory; entry
/// pages are read on demand so the caller can count metadata I/Os.
pub struct MetaStore {
    file: PageFile,
    table: Vec<u32>,
    num_entries: u32,
    first_entry_page: u32,
}

impl MetaStore {
    /// Reads the page size out of the store header without knowing it in
    /// advance, so an index can be opened from its stem alone.
    pub fn sniff_page_size(path: impl AsRef<Path>) -> Result<usize> {
        use std::io::Read;
        let mut file = std::fs::File::open(path)?;
        let mut prefix = [0u8; 12];
        file.read_exact(&mut prefix)?;
        if prefix[0..4] != META_MAGIC {
            return Err(DiasError::Corruption("metadata store: bad magic".into()));
        }
        let page_size = read_u32(&prefix, 8) as usize;
        if page_size < 8 {
            return Err(DiasError::Corruption(format!(
                "metadata store: implausible page size {page_size}"
            )));
        }
        Ok(page_size)
    }

    pub fn open(path: impl AsRef<Path>, page_size: usize) -> Result<Self> {
        let file = PageFile::open(path, page_size, false)?;
        let mut header = vec![0u8; page_size];
        file.read_page(PageId(0), &mut header)?;
        if header[0..4] != META_MAGIC {
            return Err(DiasError::Corruption("metadata store: bad magic".into()));
        }
        let version = read_u32(&header, 4);
        if version != META_VERSION {
            return Err(DiasError::Corruption(format!(
                "metadata store: unsupported version {version}"
            )));
        }
        let stored_page_size = read_u32(&header, 8) as usize;
        if stored_page_size != page_size {
            return Err(DiasError::Corruption(format!(
                "metadata store: page size mismatch (file {stored_page_size}, expected {page_size})"
            )));
        }
        let num_entries = read_u32(&header, 12);
        let num_entry_pages = read_u32(&header, 16);
        let num_table_pages = read_u32(&header, 20);
        let crc = read_u32(&header, HEADER_CRC_OFFSET);
        if crc != crc32fast::hash(&header[..HEADER_CRC_OFFSET]) {
            return Err(DiasError::Corruption(
                "metadata store: header checksum mismatch".into(),
            ));
        }

        let mut table = Vec::with_capacity(num_entry_pages as usize);
        let ids_per_page = page_size / 4;
        let mut buf = vec![0u8; page_size];
        for t in 0..num_table_pages {
            file.read_page(PageId(1 + t), &mut buf)?;
            let remaining = num_entry_pages as usize - table.len();
            for i in 0..remaining.min(ids_per_page) {
                table.push(read_u32(&buf, i * 4));
            }
        }
        if table.len() != num_entry_pages as usize {
            return Err(DiasError::Corruption(
                "metadata store: table shorter than entry-page count".into(),
            ));
        }
        Ok(Self {
            file,
            table,
            num_entries,
            first_entry_page: 1 + num_table_pages,
        })
    }

    /// Number of graph pages described by the store.
    pub fn num_entries(&self) -> u32 {
        self.num_entries
    }

    /// Index of the entry page holding `page_id`'s metadata.
    pub fn locate(&self, page_id: PageId) -> Result<u32> {
        if page_id.0 >= self.num_entries {
            return Err(DiasError::Corruption(format!(
                "metadata requested for non-existent page {page_id}"
            )));
        }
        let idx = self.table.partition_point(|&first| first <= page_id.0);
        if idx == 0 {
            return Err(DiasError::Corruption(
                "metadata store: table does not start at page 0".into(),
            ));
        }
        Ok((idx - 1) as u32)
    }

    /// Reads and decodes one entry page (exactly one page I/O).
    pub fn read_entry_page(&self, entry_page: u32) -> Result<Vec<MetadataEntry>> {
        let mut buf = vec![0u8; self.file.page_size()];
        self.file
            .read_page(PageId(self.first_entry_page + entry_page), &mut buf)?;
        let count = read_u32(&buf, 0) as usize;
        let mut entries = Vec::with_capacity(count);
        let mut off = 4;
        for _ in 0..count {
            if off + MBR_LEN > buf.len() {
                return Err(DiasError::Corruption(
                    "metadata store: entry page truncated".into(),
                ));
            }
            let partition_mbr = get_mbr(&buf, off);
            off += MBR_LEN;
            let (entry, consumed) = MetadataEntry::decode_body(&buf[off..], partition_mbr)?;
            off += consumed;
            entries.push(entry);
        }
        Ok(entries)
    }

    /// Convenience lookup for tools and tests; queries should go through
    /// [`MetaStore::locate`] and a caller-side page cache instead.
    pub fn lookup(&self, page_id: PageId) -> Result<MetadataEntry> {
        let entry_page = self.locate(page_id)?;
        let entries = self.read_entry_page(entry_page)?;
        entries
            .into_iter()
            .find(|e| e.page_id == page_id)
            .ok_or_else(|| {
                DiasError::Corruption(format!(
                    "metadata store: page {page_id} missing from its entry page"
                ))
            })
    }
}

fn put_mbr(dst: &mut Vec<u8>, mbr: &Box3) {
    for i in 0..3 {
        dst.extend_from_slice(&mbr.low[i].to_le_bytes());
    }
    for i in 0..3 {
        dst.extend_from_slice(&mbr.high[i].to_le_bytes());
    }
}

fn get_mbr(buf: &[u8], off: usize) -> Box3 {
    Box3::new(
        Vertex([
            read_f32(buf, off),
            read_f32(buf, off + 4),
            read_f32(buf, off + 8),
        ]),
        Vertex([
            read_f32(buf, off + 12),
            read_f32(buf, off + 16),
            read_f32(buf, off + 20),
        ]),
    )
}

fn read_u32(buf: &[u8], off: usize) -> u32 {
    u32::from_le_bytes(buf[off..off + 4].try_into().unwrap())
}

fn read_f32(buf: &[u8], off: usize) -> f32 {
    f32::from_le_bytes(buf[off..off + 4].try_into().unwrap())
}
