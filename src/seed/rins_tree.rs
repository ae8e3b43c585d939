//! Insertion-based seed tree (Guttman quadratic splits).
//!
//! The second, independent construction required by the seed-index
//! contract: entries are inserted one at a time into an in-memory R-tree
//! (least-enlargement descent, quadratic node splits), which is then
//! serialized bottom-up into the shared node format. Queries cannot tell
//! the two constructions apart.

use std::path::Path;

use crate::geometry::Box3;
use crate::primitives::pagefile::PageFile;
use crate::query::stats::QueryStats;
use crate::storage::meta::MetadataEntry;
use crate::types::{DiasError, Result};

use super::{
    NodeWriter, SeedHit, SeedIndex, SeedRecord, SeedTreeFile, BUILDER_RINS,
};

/// Minimum fill after a split, as a fraction of the overflowing count.
const MIN_FILL: f64 = 0.4;

/// Insertion-built seed tree.
pub struct RinsTree {
    tree: SeedTreeFile,
}

impl RinsTree {
    /// Inserts every record into a fresh tree, then persists it.
    pub fn bulk_load(
        path: impl AsRef<Path>,
        page_size: usize,
        records: Vec<SeedRecord>,
    ) -> Result<Self> {
        let leaf_budget = NodeWriter::leaf_budget(page_size);
        let internal_cap = NodeWriter::internal_capacity(page_size);
        if internal_cap < 2 {
            return Err(DiasError::Invalid("page size too small for seed nodes"));
        }
        let num_entries = records.len() as u32;

        let mut root = MemNode::Leaf(Vec::new());
        for record in records {
            if record.leaf_len() > leaf_budget {
                return Err(DiasError::Corruption(format!(
                    "seed entry of {} bytes cannot fit one page",
                    record.leaf_len()
                )));
            }
            if let Some(sibling) = insert(&mut root, record, leaf_budget, internal_cap) {
                let old = std::mem::replace(&mut root, MemNode::Internal(Vec::new()));
                root = MemNode::Internal(vec![
                    (old.mbr(), old),
                    (sibling.mbr(), sibling),
                ]);
            }
        }

        let mut writer = NodeWriter::create(&path, page_size)?;
        let (root_page, _, height) = write_node(&root, &mut writer)?;
        writer.finish(root_page, height, num_entries, BUILDER_RINS)?;
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

impl SeedIndex for RinsTree {
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

enum MemNode {
    Leaf(Vec<SeedRecord>),
    Internal(Vec<(Box3, MemNode)>),
}

impl MemNode {
    fn mbr(&self) -> Box3 {
        match self {
            MemNode::Leaf(entries) => {
                let mut mbr = Box3::EMPTY;
                for e in entries {
                    mbr.union_in_place(&e.mbr);
                }
                mbr
            }
            MemNode::Internal(children) => {
                let mut mbr = Box3::EMPTY;
                for (child_mbr, _) in children {
                    mbr.union_in_place(child_mbr);
                }
                mbr
            }
        }
    }
}

/// Recursive insert; a returned node is a split-off sibling the caller
/// must adopt.
fn insert(
    node: &mut MemNode,
    record: SeedRecord,
    leaf_budget: usize,
    internal_cap: usize,
) -> Option<MemNode> {
    match node {
        MemNode::Leaf(entries) => {
            entries.push(record);
            let bytes: usize = entries.iter().map(SeedRecord::leaf_len).sum();
            if bytes <= leaf_budget {
                return None;
            }
            let (left, right) = quadratic_split(std::mem::take(entries), |e| e.mbr);
            *entries = left;
            Some(MemNode::Leaf(right))
        }
        MemNode::Internal(children) => {
            let slot = choose_subtree(children, &record.mbr);
            let (child_mbr, child) = &mut children[slot];
            child_mbr.union_in_place(&record.mbr);
            if let Some(sibling) = insert(child, record, leaf_budget, internal_cap) {
                // Recompute the split child's bounds after the move.
                *child_mbr = child.mbr();
                children.push((sibling.mbr(), sibling));
                if children.len() > internal_cap {
                    let (left, right) = quadratic_split(std::mem::take(children), |c| c.0);
                    *children = left;
                    return Some(MemNode::Internal(right));
                }
            }
            None
        }
    }
}

/// Least-enlargement descent; volume, then first-listed, breaks ties.
fn choose_subtree(children: &[(Box3, MemNode)], mbr: &Box3) -> usize {
    let mut best = 0;
    let mut best_enlargement = f64::INFINITY;
    let mut best_volume = f64::INFINITY;
    for (i, (child_mbr, _)) in children.iter().enumerate() {
        let volume = Box3::volume(child_mbr);
        let enlargement = Box3::volume(&Box3::union(child_mbr, mbr)) - volume;
        if enlargement < best_enlargement
            || (enlargement == best_enlargement && volume < best_volume)
        {
            best = i;
            best_enlargement = enlargement;
            best_volume = volume;
        }
    }
    best
}

/// Guttman's quadratic split over any entry type with an MBR accessor.
fn quadratic_split<T>(mut entries: Vec<T>, mbr_of: impl Fn(&T) -> Box3) -> (Vec<T>, Vec<T>) {
    let total = entries.len();
    let min_fill = ((total as f64 * MIN_FILL).ceil() as usize).max(1);

    // Seed pair: the two entries wasting the most volume together.
    let (mut seed_a, mut seed_b, mut worst) = (0usize, 1usize, f64::NEG_INFINITY);
    for i in 0..total {
        for j in i + 1..total {
            let a = mbr_of(&entries[i]);
            let b = mbr_of(&entries[j]);
            let dead = Box3::volume(&Box3::union(&a, &b)) - Box3::volume(&a) - Box3::volume(&b);
            if dead > worst {
                worst = dead;
                seed_a = i;
                seed_b = j;
            }
        }
    }

    // Remove the later index first so the earlier one stays valid.
    let entry_b = entries.remove(seed_b);
    let entry_a = entries.remove(seed_a);
    let mut group_a = vec![entry_a];
    let mut group_b = vec![entry_b];
    let mut mbr_a = mbr_of(&group_a[0]);
    let mut mbr_b = mbr_of(&group_b[0]);

    while let Some(entry) = entries.pop() {
        let remaining = entries.len() + 1;
        if group_a.len() + remaining <= min_fill {
            mbr_a.union_in_place(&mbr_of(&entry));
            group_a.push(entry);
            continue;
        }
        if group_b.len() + remaining <= min_fill {
            mbr_b.union_in_place(&mbr_of(&entry));
            group_b.push(entry);
            continue;
        }
        let mbr = mbr_of(&entry);
        let grow_a = Box3::volume(&Box3::union(&mbr_a, &mbr)) - Box3::volume(&mbr_a);
        let grow_b = Box3::volume(&Box3::union(&mbr_b, &mbr)) - Box3::volume(&mbr_b);
        if grow_a <= grow_b {
            mbr_a.union_in_place(&mbr);
            group_a.push(entry);
        } else {
            mbr_b.union_in_place(&mbr);
            group_b.push(entry);
        }
    }
    (group_a, group_b)
}

/// Serializes the tree depth-first; children pages precede their parent.
/// Returns `(page, mbr, height)` of the subtree.
fn write_node(node: &MemNode, writer: &mut NodeWriter) -> Result<(u32, Box3, u32)> {
    match node {
        MemNode::Leaf(entries) => {
            let (page, mbr) = writer.append_leaf(entries)?;
            Ok((page, mbr, 1))
        }
        MemNode::Internal(children) => {
            let mut persisted = Vec::with_capacity(children.len());
            let mut height = 0;
            for (_, child) in children {
                let (page, mbr, child_height) = write_node(child, writer)?;
                persisted.push((mbr, page));
                height = height.max(child_height);
            }
            let (page, mbr) = writer.append_internal(&persisted)?;
            Ok((page, mbr, height + 1))
        }
    }
}
