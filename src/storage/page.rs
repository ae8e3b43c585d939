//! Graph-page byte layout.
//!
//! A graph page is exactly one page long:
//!
//! ```text
//! u32 num_vertices
//! repeat num_vertices:
//!   u32 record_size            // bytes, including this field
//!   u32 vertex_id
//!   f32 x, y, z
//!   f32 vmbr low x,y,z / high x,y,z
//!   u32 link                   // x (record_size - 44) / 4
//! zero padding to page size
//! ```
//!
//! Before the rewrite pass a link slot holds a neighbour *vertex* id; after
//! it, the neighbour's *page* id. Intra-page neighbour ids are elided when
//! the page is first packed ("shrinking"), so every surviving slot is a
//! cross-page reference.

use std::convert::TryInto;

use smallvec::SmallVec;

use crate::geometry::{Box3, Vertex};
use crate::types::{DiasError, Result, VertexId};

/// Bytes of the per-page header (`num_vertices`).
pub const PAGE_HEADER_LEN: usize = 4;
/// Bytes of a vertex record before its link slots.
pub const RECORD_HEADER_LEN: usize = 44;
/// Bytes per link slot.
pub const LINK_LEN: usize = 4;

/// One vertex as stored on a graph page. The `links` hold raw `u32` slots:
/// vertex ids until the rewrite pass, page ids afterwards.
#[derive(Clone, Debug, PartialEq)]
pub struct VertexRecord {
    pub id: VertexId,
    pub coords: Vertex,
    pub vmbr: Box3,
    pub links: SmallVec<[u32; 16]>,
}

impl VertexRecord {
    pub fn new(id: VertexId, coords: Vertex, vmbr: Box3) -> Self {
        Self {
            id,
            coords,
            vmbr,
            links: SmallVec::new(),
        }
    }

    /// Serialized size of this record with all of its links.
    pub fn encoded_len(&self) -> usize {
        encoded_len_with_links(self.links.len())
    }

    pub fn encode(&self, dst: &mut Vec<u8>) {
        let size = self.encoded_len() as u32;
        dst.extend_from_slice(&size.to_le_bytes());
        dst.extend_from_slice(&self.id.0.to_le_bytes());
        for i in 0..3 {
            dst.extend_from_slice(&self.coords[i].to_le_bytes());
        }
        for i in 0..3 {
            dst.extend_from_slice(&self.vmbr.low[i].to_le_bytes());
        }
        for i in 0..3 {
            dst.extend_from_slice(&self.vmbr.high[i].to_le_bytes());
        }
        for link in &self.links {
            dst.extend_from_slice(&link.to_le_bytes());
        }
    }

    /// Decodes one record from the front of `buf`, returning it together
    /// with the number of bytes consumed.
    pub fn decode(buf: &[u8]) -> Result<(Self, usize)> {
        if buf.len() < RECORD_HEADER_LEN {
            return Err(DiasError::Corruption(
                "vertex record shorter than header".into(),
            ));
        }
        let size = read_u32(buf, 0) as usize;
        if size < RECORD_HEADER_LEN || size > buf.len() || (size - RECORD_HEADER_LEN) % LINK_LEN != 0
        {
            return Err(DiasError::Corruption(format!(
                "vertex record size {size} malformed"
            )));
        }
        let id = VertexId(read_u32(buf, 4));
        let coords = Vertex([read_f32(buf, 8), read_f32(buf, 12), read_f32(buf, 16)]);
        let vmbr = Box3::new(
            Vertex([read_f32(buf, 20), read_f32(buf, 24), read_f32(buf, 28)]),
            Vertex([read_f32(buf, 32), read_f32(buf, 36), read_f32(buf, 40)]),
        );
        let n_links = (size - RECORD_HEADER_LEN) / LINK_LEN;
        let mut links = SmallVec::with_capacity(n_links);
        for i in 0..n_links {
            links.push(read_u32(buf, RECORD_HEADER_LEN + i * LINK_LEN));
        }
        Ok((
            Self {
                id,
                coords,
                vmbr,
                links,
            },
            size,
        ))
    }
}

/// Serialized size of a record carrying `n_links` link slots.
pub fn encoded_len_with_links(n_links: usize) -> usize {
    RECORD_HEADER_LEN + n_links * LINK_LEN
}

/// Encodes a full page. Fails with `Corruption` if the records do not fit
/// the page budget; the caller (the packer) is responsible for shrinking.
pub fn encode_page(records: &[VertexRecord], page_size: usize) -> Result<Vec<u8>> {
    let payload: usize = PAGE_HEADER_LEN + records.iter().map(VertexRecord::encoded_len).sum::<usize>();
    if payload > page_size {
        return Err(DiasError::Corruption(format!(
            "page overflow: {payload} bytes of records exceed page size {page_size}"
        )));
    }
    let mut out = Vec::with_capacity(page_size);
    out.extend_from_slice(&(records.len() as u32).to_le_bytes());
    for record in records {
        record.encode(&mut out);
    }
    out.resize(page_size, 0);
    Ok(out)
}

/// Decodes every vertex record of a page.
pub fn decode_page(buf: &[u8]) -> Result<Vec<VertexRecord>> {
    if buf.len() < PAGE_HEADER_LEN {
        return Err(DiasError::Corruption("page shorter than header".into()));
    }
    let n = read_u32(buf, 0) as usize;
    let mut records = Vec::with_capacity(n);
    let mut off = PAGE_HEADER_LEN;
    for _ in 0..n {
        let (record, consumed) = VertexRecord::decode(&buf[off..])?;
        off += consumed;
        records.push(record);
    }
    Ok(records)
}

/// Applies `map` to every link slot of the page buffer in place, leaving
/// the rest of the layout untouched. Used by the rewrite pass to replace
/// neighbour vertex ids with page ids without re-encoding.
pub fn rewrite_links_in_place(
    buf: &mut [u8],
    mut map: impl FnMut(u32) -> Result<u32>,
) -> Result<()> {
    if buf.len() < PAGE_HEADER_LEN {
        return Err(DiasError::Corruption("page shorter than header".into()));
    }
    let n = read_u32(buf, 0) as usize;
    let mut off = PAGE_HEADER_LEN;
    for _ in 0..n {
        if off + RECORD_HEADER_LEN > buf.len() {
            return Err(DiasError::Corruption("vertex record truncated".into()));
        }
        let size = read_u32(buf, off) as usize;
        if size < RECORD_HEADER_LEN || off + size > buf.len() {
            return Err(DiasError::Corruption(format!(
                "vertex record size {size} malformed"
            )));
        }
        let mut slot = off + RECORD_HEADER_LEN;
        while slot < off + size {
            let mapped = map(read_u32(buf, slot))?;
            buf[slot..slot + LINK_LEN].copy_from_slice(&mapped.to_le_bytes());
            slot += LINK_LEN;
        }
        off += size;
    }
    Ok(())
}

fn read_u32(buf: &[u8], off: usize) -> u32 {
    u32::from_le_bytes(buf[off..off + 4].try_into().unwrap())
}

fn read_f32(buf: &[u8], off: usize) -> f32 {
    f32::from_le_bytes(buf[off..off + 4].try_into().unwrap())
}
