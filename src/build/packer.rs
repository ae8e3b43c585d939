//! Packing Hilbert-ordered vertices into graph pages.
//!
//! Before a page is written, neighbour ids pointing at vertices stored on
//! the same page are elided ("shrinking"); the page must fit its budget
//! with the surviving cross-page links. The FLAT variant packs greedily in
//! arrival order; the HALT variant first partitions each chunk along the
//! induced neighbour graph for better locality.

use rustc_hash::FxHashSet;

use crate::storage::idmap::IdMap;
use crate::storage::page::{self, VertexRecord, PAGE_HEADER_LEN, RECORD_HEADER_LEN};
use crate::primitives::pagefile::PageFile;
use crate::types::{DiasError, Result};

use super::partition;

/// Packing strategy for the graph file.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum PackerKind {
    /// Greedy arrival-order packing with shrinking.
    Flat,
    /// Chunk-level graph partitioning before packing.
    Halt,
}

/// Streams sorted vertices into graph pages and the id map.
pub struct PagePacker<'a> {
    kind: PackerKind,
    page_size: usize,
    chunk_size: usize,
    buffer: Vec<VertexRecord>,
    graph: &'a mut PageFile,
    idmap: &'a mut IdMap,
    vertices_written: u64,
}

impl<'a> PagePacker<'a> {
    pub fn new(
        kind: PackerKind,
        chunk_size: usize,
        graph: &'a mut PageFile,
        idmap: &'a mut IdMap,
    ) -> Self {
        let page_size = graph.page_size();
        Self {
            kind,
            page_size,
            chunk_size: chunk_size.max(1),
            buffer: Vec::new(),
            graph,
            idmap,
            vertices_written: 0,
        }
    }

    pub fn push(&mut self, record: VertexRecord) -> Result<()> {
        self.buffer.push(record);
        if self.buffer.len() >= self.chunk_size {
            self.flush_chunk(false)?;
        }
        Ok(())
    }

    /// Flushes the remainder and returns the number of vertices written.
    pub fn finish(mut self) -> Result<u64> {
        self.flush_chunk(true)?;
        Ok(self.vertices_written)
    }

    fn flush_chunk(&mut self, force: bool) -> Result<()> {
        match self.kind {
            PackerKind::Flat => {
                let records = std::mem::take(&mut self.buffer);
                let consumed = self.pack_ordered(&records, force)?;
                // The unfinished tail carries over into the next chunk.
                self.buffer = records[consumed..].to_vec();
            }
            PackerKind::Halt => {
                // HALT works on whole chunks; nothing carries over.
                let records = std::mem::take(&mut self.buffer);
                if records.is_empty() {
                    return Ok(());
                }
                let parts = partition::partition_chunk(&records, self.page_size);
                let mut leftovers: Vec<VertexRecord> = Vec::new();
                for part in parts {
                    let members: Vec<VertexRecord> =
                        part.iter().map(|&i| records[i].clone()).collect();
                    let fitting = self.fitting_prefix(&members)?;
                    self.emit_page(&members[..fitting])?;
                    leftovers.extend_from_slice(&members[fitting..]);
                }
                let consumed = self.pack_ordered(&leftovers, true)?;
                debug_assert_eq!(consumed, leftovers.len());
            }
        }
        Ok(())
    }

    /// Greedy packing in the given order. With `force`, everything is
    /// written; otherwise the last partial page is left to the caller.
    /// Returns how many records were consumed.
    fn pack_ordered(&mut self, records: &[VertexRecord], force: bool) -> Result<usize> {
        let mut start = 0;
        while start < records.len() {
            let end = start + self.fitting_prefix(&records[start..])?;
            if end == records.len() && !force {
                return Ok(start);
            }
            self.emit_page(&records[start..end])?;
            start = end;
        }
        Ok(start)
    }

    /// Length of the longest prefix whose shrunk form fits one page.
    /// A single vertex that cannot fit is a packing invariant violation.
    fn fitting_prefix(&self, records: &[VertexRecord]) -> Result<usize> {
        if records.is_empty() {
            return Ok(0);
        }
        if shrunk_size(&records[..1]) > self.page_size {
            return Err(DiasError::Corruption(format!(
                "vertex {} needs {} bytes shrunk, page size is {}",
                records[0].id,
                shrunk_size(&records[..1]),
                self.page_size
            )));
        }
        let mut end = 1;
        while end < records.len() && shrunk_size(&records[..end + 1]) <= self.page_size {
            end += 1;
        }
        Ok(end)
    }

    /// Shrinks intra-page links, writes the page, and records the id-map
    /// entries for every member vertex.
    fn emit_page(&mut self, records: &[VertexRecord]) -> Result<()> {
        if records.is_empty() {
            return Ok(());
        }
        let members: FxHashSet<u32> = records.iter().map(|r| r.id.0).collect();
        let shrunk: Vec<VertexRecord> = records
            .iter()
            .map(|r| {
                let mut copy = r.clone();
                copy.links.retain(|l| !members.contains(l));
                copy
            })
            .collect();
        let bytes = page::encode_page(&shrunk, self.page_size)?;
        let page_id = self.graph.append_page(&bytes)?;
        for record in records {
            self.idmap.insert(record.id, page_id)?;
        }
        self.vertices_written += records.len() as u64;
        Ok(())
    }
}

/// Serialized size of these records with all intra-group links elided.
pub fn shrunk_size(records: &[VertexRecord]) -> usize {
    let members: FxHashSet<u32> = records.iter().map(|r| r.id.0).collect();
    let mut size = PAGE_HEADER_LEN;
    for record in records {
        size += RECORD_HEADER_LEN;
        size += 4 * record.links.iter().filter(|l| !members.contains(l)).count();
    }
    size
}
