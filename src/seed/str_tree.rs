//! Sort-tile-recursive bulk loading of the seed tree.
//!
//! Entries are sorted by partition-MBR center along x, tiled into slabs,
//! re-sorted along y and z inside each tile, and emitted as leaves in tile
//! order. Upper levels group consecutive nodes until a single root
//! remains, so spatially adjacent leaves share parents.

use std::path::Path;

use crate::geometry::Box3;
use crate::primitives::pagefile::PageFile;
use crate::query::stats::QueryStats;
use crate::storage::meta::MetadataEntry;
use crate::types::Result;

use super::{
    NodeWriter, SeedHit, SeedIndex, SeedRecord, SeedTreeFile, BUILDER_STR,
};

/// Bulk-loaded seed tree.
pub struct StrTree {
    tree: SeedTreeFile,
}

impl StrTree {
    /// Builds the tree from the full metadata stream and opens it.
    pub fn bulk_load(
        path: impl AsRef<Path>,
        page_size: usize,
        mut records: Vec<SeedRecord>,
    ) -> Result<Self> {
        let mut writer = NodeWriter::create(&path, page_size)?;
        let num_entries = records.len() as u32;

        if records.is_empty() {
            let (root, _) = writer.append_leaf(&[])?;
            writer.finish(root, 1, 0, BUILDER_STR)?;
            return Self::open(path, page_size);
        }

        let leaf_budget = NodeWriter::leaf_budget(page_size);
        let total_bytes: usize = records.iter().map(SeedRecord::leaf_len).sum();
        let avg = (total_bytes / records.len()).max(1);
        let cap = (leaf_budget / avg).max(1);

        let n = records.len();
        let leaves_needed = n.div_ceil(cap);
        let slabs = (leaves_needed as f64).cbrt().ceil() as usize;

        // Tile: x slabs, then y runs inside each slab, then z order inside
        // each run.
        records.sort_by(|a, b| center(a, 0).total_cmp(&center(b, 0)));
        let slab_len = n.div_ceil(slabs);
        let mut ordered: Vec<SeedRecord> = Vec::with_capacity(n);
        for slab in records.chunks_mut(slab_len) {
            slab.sort_by(|a, b| center(a, 1).total_cmp(&center(b, 1)));
            let run_len = slab.len().div_ceil(slabs);
            for run in slab.chunks_mut(run_len) {
                run.sort_by(|a, b| center(a, 2).total_cmp(&center(b, 2)));
                ordered.extend_from_slice(run);
            }
        }

        // Emit leaves greedily under the byte budget, targeting `cap`
        // entries per leaf.
        let mut nodes: Vec<(Box3, u32)> = Vec::new();
        let mut start = 0;
        while start < ordered.len() {
            let mut end = start;
            let mut bytes = 0usize;
            while end < ordered.len() && end - start < cap {
                let len = ordered[end].leaf_len();
                if bytes + len > leaf_budget && end > start {
                    break;
                }
                bytes += len;
                end += 1;
            }
            let (page, mbr) = writer.append_leaf(&ordered[start..end])?;
            nodes.push((mbr, page));
            start = end;
        }

        // Group consecutive nodes upward until a single root remains.
        let internal_cap = NodeWriter::internal_capacity(page_size);
        let mut height = 1u32;
        while nodes.len() > 1 {
            let mut upper: Vec<(Box3, u32)> = Vec::with_capacity(nodes.len().div_ceil(internal_cap));
            for group in nodes.chunks(internal_cap) {
                let (page, mbr) = writer.append_internal(group)?;
                upper.push((mbr, page));
            }
            nodes = upper;
            height += 1;
        }

        let root = nodes[0].1;
        writer.finish(root, height, num_entries, BUILDER_STR)?;
        Self::open(path, page_size)
    }

    pub fn open(path: impl AsRef<Path>, page_size: usize) -> Result<Self> {
        let tree = SeedTreeFile::open(path, page_size)?;
        Ok(Self::from_tree(tree))
    }

    pub(crate) fn from_tree(tree: SeedTreeFile) -> Self {
        Self { tree }
    }
}

impl SeedIndex for StrTree {
    fn seed(
        &self,
        query: &Box3,
        graph: &PageFile,
        stats: &mut QueryStats,
    ) -> Result<Option<SeedHit>> {
        self.tree.walk_seed(query, graph, stats)
    }

    fn intersects(
        &self,
        query: &Box3,
        visitor: &mut dyn FnMut(&MetadataEntry) -> Result<bool>,
    ) -> Result<()> {
        self.tree.walk_intersects(query, visitor)
    }

    fn num_entries(&self) -> u32 {
        self.tree.num_entries()
    }
}

fn center(record: &SeedRecord, axis: usize) -> f32 {
    (record.mbr.low[axis] + record.mbr.high[axis]) * 0.5
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::Vertex;
    use crate::storage::meta::MetadataEntry;
    use crate::types::PageId;
    use tempfile::tempdir;

    fn grid_records(side: u32) -> Vec<SeedRecord> {
        let mut out = Vec::new();
        let mut page = 0u32;
        for x in 0..side {
            for y in 0..side {
                for z in 0..side {
                    let low = Vertex::new(x as f32, y as f32, z as f32);
                    let high = Vertex::new(x as f32 + 1.0, y as f32 + 1.0, z as f32 + 1.0);
                    let mbr = Box3::new(low, high);
                    let entry = MetadataEntry {
                        page_id: PageId(page),
                        page_mbr: mbr,
                        partition_mbr: mbr,
                        links: vec![],
                    };
                    let mut body = Vec::new();
                    entry.encode_body(&mut body);
                    out.push(SeedRecord { mbr, body });
                    page += 1;
                }
            }
        }
        out
    }

    #[test]
    fn intersects_visits_exactly_the_overlapping_entries() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("idx_seed");
        let records = grid_records(5);
        let tree = StrTree::bulk_load(&path, 512, records).unwrap();
        assert_eq!(tree.num_entries(), 125);

        let query = Box3::new(Vertex::new(0.2, 0.2, 0.2), Vertex::new(1.8, 0.8, 0.8));
        let mut visited = Vec::new();
        tree.intersects(&query, &mut |e| {
            visited.push(e.page_id);
            Ok(true)
        })
        .unwrap();
        // Cells x in {0,1}, y = 0, z = 0.
        assert_eq!(visited.len(), 2);
    }

    #[test]
    fn early_stop_halts_the_walk() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("idx_seed");
        let tree = StrTree::bulk_load(&path, 512, grid_records(4)).unwrap();
        let query = Box3::new(Vertex::new(0.0, 0.0, 0.0), Vertex::new(4.0, 4.0, 4.0));
        let mut count = 0;
        tree.intersects(&query, &mut |_| {
            count += 1;
            Ok(count < 3)
        })
        .unwrap();
        assert_eq!(count, 3);
    }

    #[test]
    fn empty_tree_loads_and_answers() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("idx_seed");
        let tree = StrTree::bulk_load(&path, 512, Vec::new()).unwrap();
        assert_eq!(tree.num_entries(), 0);
        let query = Box3::new(Vertex::new(0.0, 0.0, 0.0), Vertex::new(1.0, 1.0, 1.0));
        let mut visited = 0;
        tree.intersects(&query, &mut |_| {
            visited += 1;
            Ok(true)
        })
        .unwrap();
        assert_eq!(visited, 0);
    }
}
