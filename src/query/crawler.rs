//! The exact crawler: seed, then breadth-first search over graph pages
//! with partition-MBR pruning.
//!
//! Soundness rests on two build invariants: a result point's Voronoi MBR
//! is contained in its page's partition MBR, and the Delaunay graph
//! connects the result page to the seed page through pages whose partition
//! MBRs all intersect the query. The crawl therefore prunes only pages
//! disjoint from the query and never adds any other condition.

use std::collections::VecDeque;
use std::time::Instant;

use rustc_hash::FxHashSet;

use crate::geometry::Box3;
use crate::seed::SeedHit;
use crate::storage::meta::MetadataEntry;
use crate::storage::page::decode_page;
use crate::types::{PageId, Result};

use super::stats::QueryStats;
use super::{CrawlOutcome, FlatIndex, MetaCache};

/// Stateless exact range evaluation.
pub struct ExactCrawler;

impl ExactCrawler {
    /// Reports every indexed point inside `query`. `seed_hint` carries the
    /// visited frontier of a preceding overlapping query (moving
    /// workloads); it is probed before the seed index is consulted.
    pub fn run(
        index: &FlatIndex,
        query: &Box3,
        stats: &mut QueryStats,
        seed_hint: &[(PageId, MetadataEntry)],
    ) -> Result<CrawlOutcome> {
        let started = Instant::now();
        let hit = seed_with_hint(index, query, stats, seed_hint)?;
        stats.seeding_time = started.elapsed();

        let crawl_started = Instant::now();
        let mut results = Vec::new();
        let mut visited_list = Vec::new();

        if let Some(hit) = hit {
            let mut meta_cache = MetaCache::new(&index.meta);
            let mut visited: FxHashSet<u32> = FxHashSet::default();
            let mut queue: VecDeque<(PageId, MetadataEntry)> = VecDeque::new();
            visited.insert(hit.page.0);
            queue.push_back((hit.page, hit.entry));

            let mut buf = vec![0u8; index.graph.page_size()];
            while let Some((page, entry)) = queue.pop_front() {
                index.graph.read_page(page, &mut buf)?;
                stats.payload_ios += 1;
                for record in decode_page(&buf)? {
                    if Box3::contains_point(query, &record.coords) {
                        stats.result_points += 1;
                        results.push((record.id, record.coords));
                    } else {
                        stats.useless_points += 1;
                    }
                }
                for &link in &entry.links {
                    if visited.contains(&link.0) {
                        continue;
                    }
                    let neighbour = meta_cache.entry(link, stats)?;
                    if Box3::overlap(query, &neighbour.partition_mbr) {
                        visited.insert(link.0);
                        queue.push_back((link, neighbour));
                    }
                }
                visited_list.push((page, entry));
            }
        }
        stats.crawling_time = crawl_started.elapsed();
        stats.total_time = started.elapsed();
        Ok(CrawlOutcome {
            results,
            visited: visited_list,
        })
    }
}

/// Probes the previous frontier for a page that provably holds a result
/// point, falling back to the seed index. Frontier probes are charged as
/// seeding I/O, like the probes `SeedIndex::seed` itself performs.
pub(crate) fn seed_with_hint(
    index: &FlatIndex,
    query: &Box3,
    stats: &mut QueryStats,
    seed_hint: &[(PageId, MetadataEntry)],
) -> Result<Option<SeedHit>> {
    let mut buf = vec![0u8; index.graph.page_size()];
    for (page, entry) in seed_hint {
        if !Box3::overlap(query, &entry.partition_mbr) {
            continue;
        }
        index.graph.read_page(*page, &mut buf)?;
        stats.seed_ios += 1;
        let records = decode_page(&buf)?;
        if records
            .iter()
            .any(|r| Box3::contains_point(query, &r.coords))
        {
            return Ok(Some(SeedHit {
                page: *page,
                entry: entry.clone(),
            }));
        }
    }
    index.seed.seed(query, &index.graph, stats)
}
