//! Chunk partitioning for the HALT packer.
//!
//! A chunk is split into `k` balanced parts along its induced neighbour
//! graph so that tightly connected vertices land on the same page and the
//! shrunk pages stay small. Parts are grown by greedy BFS accretion:
//! each part starts from the first unassigned vertex (the chunk arrives in
//! Hilbert order, so that seed is spatially coherent) and repeatedly pulls
//! in the frontier vertex with the most edges into the part, until the
//! balanced weight target is reached.

use rustc_hash::FxHashMap;

use crate::storage::page::{VertexRecord, PAGE_HEADER_LEN};

use super::packer::shrunk_size;

/// Starting point for the page-count estimate: aim for pages about 60%
/// full before shrinking, then refine.
const FILL_ESTIMATE: f64 = 0.6;

/// Splits `records` into parts whose average shrunk size fits a page.
/// Every index appears in exactly one part; parts preserve relative order
/// internally.
pub fn partition_chunk(records: &[VertexRecord], page_size: usize) -> Vec<Vec<usize>> {
    if records.is_empty() {
        return Vec::new();
    }
    let weights: Vec<usize> = records.iter().map(VertexRecord::encoded_len).collect();
    let total: usize = weights.iter().sum::<usize>() + PAGE_HEADER_LEN;
    let adjacency = induced_adjacency(records);

    let budget = (page_size as f64 * FILL_ESTIMATE).max(1.0);
    let mut k = ((total as f64) / budget).ceil() as usize;
    k = k.clamp(1, records.len());

    loop {
        let parts = grow_parts(records, &weights, &adjacency, k);
        let avg: f64 = parts
            .iter()
            .map(|part| {
                let members: Vec<VertexRecord> =
                    part.iter().map(|&i| records[i].clone()).collect();
                shrunk_size(&members) as f64
            })
            .sum::<f64>()
            / parts.len() as f64;
        if avg <= page_size as f64 || k >= records.len() {
            return parts;
        }
        k += 1;
    }
}

/// Undirected adjacency restricted to the chunk, by index.
fn induced_adjacency(records: &[VertexRecord]) -> Vec<Vec<usize>> {
    let by_id: FxHashMap<u32, usize> = records
        .iter()
        .enumerate()
        .map(|(i, r)| (r.id.0, i))
        .collect();
    let mut adjacency = vec![Vec::new(); records.len()];
    for (i, record) in records.iter().enumerate() {
        for link in &record.links {
            if let Some(&j) = by_id.get(link) {
                adjacency[i].push(j);
                adjacency[j].push(i);
            }
        }
    }
    for list in &mut adjacency {
        list.sort_unstable();
        list.dedup();
    }
    adjacency
}

fn grow_parts(
    records: &[VertexRecord],
    weights: &[usize],
    adjacency: &[Vec<usize>],
    k: usize,
) -> Vec<Vec<usize>> {
    let total: usize = weights.iter().sum();
    let target = total.div_ceil(k);
    let mut assigned = vec![false; records.len()];
    let mut next_seed = 0usize;
    let mut parts: Vec<Vec<usize>> = Vec::with_capacity(k);

    for part_no in 0..k {
        let mut part = Vec::new();
        let mut part_weight = 0usize;
        // Edges from the growing part into each unassigned vertex.
        let mut gain: FxHashMap<usize, usize> = FxHashMap::default();
        let last = part_no + 1 == k;

        loop {
            while next_seed < records.len() && assigned[next_seed] {
                next_seed += 1;
            }
            let candidate = gain
                .iter()
                .max_by_key(|&(&v, &g)| (g, std::cmp::Reverse(v)))
                .map(|(&v, _)| v)
                .or_else(|| (next_seed < records.len()).then_some(next_seed));
            let Some(v) = candidate else { break };
            if !last && !part.is_empty() && part_weight + weights[v] > target {
                break;
            }
            assigned[v] = true;
            gain.remove(&v);
            part_weight += weights[v];
            part.push(v);
            for &n in &adjacency[v] {
                if !assigned[n] {
                    *gain.entry(n).or_insert(0) += 1;
                }
            }
            if !last && part_weight >= target {
                break;
            }
        }
        if !part.is_empty() {
            part.sort_unstable();
            parts.push(part);
        }
    }
    parts
}
