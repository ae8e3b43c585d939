#![forbid(unsafe_code)]
//! The seed index: an R-tree over page metadata, keyed by partition MBR.
//!
//! Two independent constructions exist behind one contract: a
//! sort-tile-recursive bulk loader ([`str_tree::StrTree`]) and an
//! insertion-based tree with quadratic splits ([`rins_tree::RinsTree`]).
//! Both emit the same node format, so an index built by either opens the
//! same way; a header flag records the builder. The rest of the crate
//! depends only on the [`SeedIndex`] trait.

pub mod rins_tree;
pub mod str_tree;

use std::convert::TryInto;
use std::path::Path;

use rustc_hash::FxHashSet;

use crate::geometry::{Box3, Vertex};
use crate::primitives::pagefile::PageFile;
use crate::query::stats::QueryStats;
use crate::storage::meta::MetadataEntry;
use crate::storage::page::decode_page;
use crate::types::{DiasError, PageId, Result};

const SEED_MAGIC: [u8; 4] = *b"DIAS";
const SEED_VERSION: u32 = 1;
const HEADER_CRC_OFFSET: usize = 28;

const KIND_LEAF: u8 = 1;
const KIND_INTERNAL: u8 = 2;
const NODE_HEADER_LEN: usize = 4;
const INTERNAL_ENTRY_LEN: usize = 28;
const MBR_LEN: usize = 24;

pub const BUILDER_STR: u8 = 1;
pub const BUILDER_RINS: u8 = 2;

/// One bulk-load input: a partition MBR plus the serialized metadata entry
/// destined for the leaf payload.
#[derive(Clone, Debug)]
pub struct SeedRecord {
    pub mbr: Box3,
    pub body: Vec<u8>,
}

impl SeedRecord {
    /// Bytes this record occupies inside a leaf page.
    pub fn leaf_len(&self) -> usize {
        MBR_LEN + 4 + self.body.len()
    }
}

/// Result of a successful seeding: the first page known to contain at
/// least one vertex inside the query, with its metadata.
#[derive(Clone, Debug)]
pub struct SeedHit {
    pub page: PageId,
    pub entry: MetadataEntry,
}

/// Contract every seed-index implementation satisfies. The query engine
/// depends on this trait alone and never touches R-tree internals.
pub trait SeedIndex {
    /// Finds the first leaf entry whose page holds a vertex inside
    /// `query`, reading candidate graph pages to check. `None` means the
    /// query result is empty.
    fn seed(&self, query: &Box3, graph: &PageFile, stats: &mut QueryStats)
        -> Result<Option<SeedHit>>;

    /// Visits every leaf entry whose partition MBR intersects `query`.
    /// The visitor returns `false` to stop early.
    fn intersects(
        &self,
        query: &Box3,
        visitor: &mut dyn FnMut(&MetadataEntry) -> Result<bool>,
    ) -> Result<()>;

    /// Number of leaf entries (= graph pages) indexed.
    fn num_entries(&self) -> u32;
}

/// Opens a seed file built by either construction.
pub fn open_seed_index(
    path: impl AsRef<Path>,
    page_size: usize,
) -> Result<Box<dyn SeedIndex>> {
    let tree = SeedTreeFile::open(path, page_size)?;
    match tree.builder {
        BUILDER_STR => Ok(Box::new(str_tree::StrTree::from_tree(tree))),
        BUILDER_RINS => Ok(Box::new(rins_tree::RinsTree::from_tree(tree))),
        other => Err(DiasError::Corruption(format!(
            "seed index: unknown builder tag {other}"
        ))),
    }
}

/// A decoded seed-tree node.
pub(crate) enum SeedNode {
    Internal(Vec<(Box3, u32)>),
    Leaf(Vec<MetadataEntry>),
}

/// Read side of the shared node format.
pub(crate) struct SeedTreeFile {
    file: PageFile,
    root: u32,
    num_entries: u32,
    builder: u8,
}

impl SeedTreeFile {
    pub(crate) fn open(path: impl AsRef<Path>, page_size: usize) -> Result<Self> {
        let file = PageFile::open(path, page_size, false)?;
        let mut header = vec![0u8; page_size];
        file.read_page(PageId(0), &mut header)?;
        if header[0..4] != SEED_MAGIC {
            return Err(DiasError::Corruption("seed index: bad magic".into()));
        }
        let version = read_u32(&header, 4);
        if version != SEED_VERSION {
            return Err(DiasError::Corruption(format!(
                "seed index: unsupported version {version}"
            )));
        }
        let stored_page_size = read_u32(&header, 8) as usize;
        if stored_page_size != page_size {
            return Err(DiasError::Corruption(format!(
                "seed index: page size mismatch (file {stored_page_size}, expected {page_size})"
            )));
        }
        let root = read_u32(&header, 12);
        let height = read_u32(&header, 16);
        let num_entries = read_u32(&header, 20);
        let builder = header[24];
        let crc = read_u32(&header, HEADER_CRC_OFFSET);
        if crc != crc32fast::hash(&header[..HEADER_CRC_OFFSET]) {
            return Err(DiasError::Corruption(
                "seed index: header checksum mismatch".into(),
            ));
        }
        if height == 0 || root >= file.num_pages() {
            return Err(DiasError::Corruption(
                "seed index: header root or height out of range".into(),
            ));
        }
        Ok(Self {
            file,
            root,
            num_entries,
            builder,
        })
    }

    pub(crate) fn num_entries(&self) -> u32 {
        self.num_entries
    }

    fn read_node(&self, page: u32) -> Result<SeedNode> {
        let mut buf = vec![0u8; self.file.page_size()];
        self.file.read_page(PageId(page), &mut buf)?;
        decode_node(&buf)
    }

    /// Depth-first descent by overlap; leaf entries go to the visitor in
    /// stored order until it asks to stop.
    pub(crate) fn walk_intersects(
        &self,
        query: &Box3,
        visitor: &mut dyn FnMut(&MetadataEntry) -> Result<bool>,
    ) -> Result<()> {
        let mut stack = vec![self.root];
        while let Some(page) = stack.pop() {
            match self.read_node(page)? {
                SeedNode::Internal(children) => {
                    for (mbr, child) in children.iter().rev() {
                        if Box3::overlap(mbr, query) {
                            stack.push(*child);
                        }
                    }
                }
                SeedNode::Leaf(entries) => {
                    for entry in &entries {
                        if Box3::overlap(&entry.partition_mbr, query) && !visitor(entry)? {
                            return Ok(());
                        }
                    }
                }
            }
        }
        Ok(())
    }

    /// Descends by overlap and probes candidate graph pages until one is
    /// proven to hold a result point.
    pub(crate) fn walk_seed(
        &self,
        query: &Box3,
        graph: &PageFile,
        stats: &mut QueryStats,
    ) -> Result<Option<SeedHit>> {
        let mut probed: FxHashSet<u32> = FxHashSet::default();
        let mut page_buf = vec![0u8; graph.page_size()];
        let mut stack = vec![self.root];
        while let Some(page) = stack.pop() {
            stats.seed_ios += 1;
            match self.read_node(page)? {
                SeedNode::Internal(children) => {
                    for (mbr, child) in children.iter().rev() {
                        if Box3::overlap(mbr, query) {
                            stack.push(*child);
                        }
                    }
                }
                SeedNode::Leaf(entries) => {
                    for entry in entries {
                        if !Box3::overlap(&entry.partition_mbr, query) {
                            continue;
                        }
                        if !probed.insert(entry.page_id.0) {
                            continue;
                        }
                        graph.read_page(entry.page_id, &mut page_buf)?;
                        stats.seed_ios += 1;
                        let records = decode_page(&page_buf)?;
                        if records
                            .iter()
                            .any(|r| Box3::contains_point(query, &r.coords))
                        {
                            return Ok(Some(SeedHit {
                                page: entry.page_id,
                                entry,
                            }));
                        }
                    }
                }
            }
        }
        Ok(None)
    }
}

/// Append-only writer for the shared node format. Page 0 is reserved for
/// the header, which `finish` fills in.
pub(crate) struct NodeWriter {
    file: PageFile,
    page_size: usize,
}

impl NodeWriter {
    pub(crate) fn create(path: impl AsRef<Path>, page_size: usize) -> Result<Self> {
        let mut file = PageFile::create(path, page_size)?;
        file.append_page(&vec![0u8; page_size])?;
        Ok(Self { file, page_size })
    }

    /// Largest number of children an internal node can carry.
    pub(crate) fn internal_capacity(page_size: usize) -> usize {
        (page_size - NODE_HEADER_LEN) / INTERNAL_ENTRY_LEN
    }

    /// Byte budget available to leaf entries.
    pub(crate) fn leaf_budget(page_size: usize) -> usize {
        page_size - NODE_HEADER_LEN
    }

    pub(crate) fn append_leaf(&mut self, entries: &[SeedRecord]) -> Result<(u32, Box3)> {
        let mut out = Vec::with_capacity(self.page_size);
        out.push(KIND_LEAF);
        out.push(0);
        out.extend_from_slice(&(entries.len() as u16).to_le_bytes());
        let mut mbr = Box3::EMPTY;
        for entry in entries {
            put_mbr(&mut out, &entry.mbr);
            out.extend_from_slice(&(entry.body.len() as u32).to_le_bytes());
            out.extend_from_slice(&entry.body);
            mbr.union_in_place(&entry.mbr);
        }
        if out.len() > self.page_size {
            return Err(DiasError::Corruption(
                "seed index: leaf node exceeds page size".into(),
            ));
        }
        out.resize(self.page_size, 0);
        let page = self.file.append_page(&out)?;
        Ok((page.0, mbr))
    }

    pub(crate) fn append_internal(&mut self, children: &[(Box3, u32)]) -> Result<(u32, Box3)> {
        let mut out = Vec::with_capacity(self.page_size);
        out.push(KIND_INTERNAL);
        out.push(0);
        out.extend_from_slice(&(children.len() as u16).to_le_bytes());
        let mut mbr = Box3::EMPTY;
        for (child_mbr, child) in children {
            put_mbr(&mut out, child_mbr);
            out.extend_from_slice(&child.to_le_bytes());
            mbr.union_in_place(child_mbr);
        }
        if out.len() > self.page_size {
            return Err(DiasError::Corruption(
                "seed index: internal node exceeds page size".into(),
            ));
        }
        out.resize(self.page_size, 0);
        let page = self.file.append_page(&out)?;
        Ok((page.0, mbr))
    }

    /// Writes the header and syncs the file.
    pub(crate) fn finish(
        mut self,
        root: u32,
        height: u32,
        num_entries: u32,
        builder: u8,
    ) -> Result<()> {
        let mut header = vec![0u8; self.page_size];
        header[0..4].copy_from_slice(&SEED_MAGIC);
        header[4..8].copy_from_slice(&SEED_VERSION.to_le_bytes());
        header[8..12].copy_from_slice(&(self.page_size as u32).to_le_bytes());
        header[12..16].copy_from_slice(&root.to_le_bytes());
        header[16..20].copy_from_slice(&height.to_le_bytes());
        header[20..24].copy_from_slice(&num_entries.to_le_bytes());
        header[24] = builder;
        let crc = crc32fast::hash(&header[..HEADER_CRC_OFFSET]);
        header[HEADER_CRC_OFFSET..HEADER_CRC_OFFSET + 4].copy_from_slice(&crc.to_le_bytes());
        self.file.write_page(PageId(0), &header)?;
        self.file.sync()
    }
}

fn decode_node(buf: &[u8]) -> Result<SeedNode> {
    let kind = buf[0];
    let count = u16::from_le_bytes(buf[2..4].try_into().unwrap()) as usize;
    let mut off = NODE_HEADER_LEN;
    match kind {
        KIND_INTERNAL => {
            if NODE_HEADER_LEN + count * INTERNAL_ENTRY_LEN > buf.len() {
                return Err(DiasError::Corruption(
                    "seed index: internal node overruns page".into(),
                ));
            }
            let mut children = Vec::with_capacity(count);
            for _ in 0..count {
                let mbr = get_mbr(buf, off);
                let child = read_u32(buf, off + MBR_LEN);
                children.push((mbr, child));
                off += INTERNAL_ENTRY_LEN;
            }
            Ok(SeedNode::Internal(children))
        }
        KIND_LEAF => {
            let mut entries = Vec::with_capacity(count);
            for _ in 0..count {
                if off + MBR_LEN + 4 > buf.len() {
                    return Err(DiasError::Corruption(
                        "seed index: leaf node overruns page".into(),
                    ));
                }
                let mbr = get_mbr(buf, off);
                let len = read_u32(buf, off + MBR_LEN) as usize;
                off += MBR_LEN + 4;
                if off + len > buf.len() {
                    return Err(DiasError::Corruption(
                        "seed index: leaf payload overruns page".into(),
                    ));
                }
                let (entry, consumed) = MetadataEntry::decode_body(&buf[off..off + len], mbr)?;
                if consumed != len {
                    return Err(DiasError::Corruption(
                        "seed index: leaf payload length mismatch".into(),
                    ));
                }
                off += len;
                entries.push(entry);
            }
            Ok(SeedNode::Leaf(entries))
        }
        other => Err(DiasError::Corruption(format!(
            "seed index: unknown node kind {other}"
        ))),
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
