//! The prefetching crawler.
//!
//! Same BFS as the exact crawler, with two additions that never change the
//! result multiset: a bounded LRU cache of decoded pages, and a
//! session-lived model scoring each page-to-page edge by the fraction of
//! past queries in which following it paid off. After every page read the
//! top-scored unvisited links are fetched speculatively; a prefetched page
//! that the crawl later consumes is a prefetch hit, one that falls out of
//! the cache unused is simply discarded.

use std::collections::VecDeque;
use std::num::NonZeroUsize;
use std::time::Instant;

use lru::LruCache;
use rustc_hash::{FxHashMap, FxHashSet};

use crate::geometry::Box3;
use crate::storage::meta::MetadataEntry;
use crate::storage::page::{decode_page, VertexRecord};
use crate::types::{PageId, Result};

use super::crawler::seed_with_hint;
use super::stats::QueryStats;
use super::{CrawlOutcome, FlatIndex, MetaCache};

/// Default number of cached pages.
pub const DEFAULT_CACHE_PAGES: usize = 1024;
/// Default number of speculative reads issued per visited page.
pub const DEFAULT_PREFETCH_FANOUT: usize = 2;

#[derive(Clone)]
struct CachedPage {
    records: Vec<VertexRecord>,
    prefetched: bool,
}

#[derive(Default, Clone, Copy)]
struct EdgeStat {
    predictions: u32,
    hits: u32,
}

impl EdgeStat {
    fn score(self) -> f64 {
        if self.predictions == 0 {
            0.0
        } else {
            f64::from(self.hits) / f64::from(self.predictions)
        }
    }
}

/// Crawler with speculative page fetching. The cache and the edge model
/// live as long as the crawler, so a workload session keeps learning.
pub struct PrefetchCrawler {
    cache: LruCache<u32, CachedPage>,
    model: FxHashMap<(u32, u32), EdgeStat>,
    fanout: usize,
}

impl PrefetchCrawler {
    pub fn new(cache_pages: usize, fanout: usize) -> Self {
        let capacity = NonZeroUsize::new(cache_pages.max(1)).expect("max(1) is non-zero");
        Self {
            cache: LruCache::new(capacity),
            model: FxHashMap::default(),
            fanout,
        }
    }

    /// Identical results to [`super::crawler::ExactCrawler::run`];
    /// prefetching is a performance policy, not a semantic one.
    pub fn run(
        &mut self,
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
        // Raw material for the post-query model update.
        let mut considered_edges: Vec<(u32, u32)> = Vec::new();
        let mut page_results: FxHashMap<u32, u64> = FxHashMap::default();

        if let Some(hit) = hit {
            let mut meta_cache = MetaCache::new(&index.meta);
            let mut visited: FxHashSet<u32> = FxHashSet::default();
            let mut queue: VecDeque<(PageId, MetadataEntry)> = VecDeque::new();
            visited.insert(hit.page.0);
            queue.push_back((hit.page, hit.entry));

            while let Some((page, entry)) = queue.pop_front() {
                let records = self.fetch(index, page, stats, false)?;
                let mut in_query = 0u64;
                for record in &records {
                    if Box3::contains_point(query, &record.coords) {
                        stats.result_points += 1;
                        in_query += 1;
                        results.push((record.id, record.coords));
                    } else {
                        stats.useless_points += 1;
                    }
                }
                page_results.insert(page.0, in_query);

                for &link in &entry.links {
                    considered_edges.push((page.0, link.0));
                    if visited.contains(&link.0) {
                        continue;
                    }
                    let neighbour = meta_cache.entry(link, stats)?;
                    if Box3::overlap(query, &neighbour.partition_mbr) {
                        visited.insert(link.0);
                        queue.push_back((link, neighbour));
                    }
                }

                self.prefetch_links(index, page, &entry, &visited, stats)?;
                visited_list.push((page, entry));
            }
        }

        self.absorb(&considered_edges, &page_results, stats);
        stats.crawling_time = crawl_started.elapsed();
        stats.total_time = started.elapsed();
        Ok(CrawlOutcome {
            results,
            visited: visited_list,
        })
    }

    /// Reads a page through the cache. A hit on a speculatively loaded
    /// page counts as a prefetch hit; a real read costs one payload I/O.
    fn fetch(
        &mut self,
        index: &FlatIndex,
        page: PageId,
        stats: &mut QueryStats,
        speculative: bool,
    ) -> Result<Vec<VertexRecord>> {
        if let Some(cached) = self.cache.get_mut(&page.0) {
            if cached.prefetched && !speculative {
                stats.prefetch_hits += 1;
                cached.prefetched = false;
            }
            return Ok(cached.records.clone());
        }
        let mut buf = vec![0u8; index.graph.page_size()];
        index.graph.read_page(page, &mut buf)?;
        stats.payload_ios += 1;
        if speculative {
            stats.prefetch_issued += 1;
        }
        let records = decode_page(&buf)?;
        self.cache.put(
            page.0,
            CachedPage {
                records: records.clone(),
                prefetched: speculative,
            },
        );
        Ok(records)
    }

    /// Scores the out-edges of `page` and eagerly reads the most promising
    /// neighbours into the cache.
    fn prefetch_links(
        &mut self,
        index: &FlatIndex,
        page: PageId,
        entry: &MetadataEntry,
        visited: &FxHashSet<u32>,
        stats: &mut QueryStats,
    ) -> Result<()> {
        if self.fanout == 0 {
            return Ok(());
        }
        let mut candidates: Vec<(f64, u32)> = Vec::new();
        for &link in &entry.links {
            stats.prefetch_edges += 1;
            if visited.contains(&link.0) || self.cache.contains(&link.0) {
                continue;
            }
            let score = self
                .model
                .get(&(page.0, link.0))
                .copied()
                .unwrap_or_default()
                .score();
            if score > 0.0 {
                candidates.push((score, link.0));
            }
        }
        stats.prefetch_entry_candidates += candidates.len() as u64;
        stats.prefetch_prediction_comparisons += candidates.len() as u64;
        candidates.sort_by(|a, b| b.0.total_cmp(&a.0).then(a.1.cmp(&b.1)));
        for &(_, target) in candidates.iter().take(self.fanout) {
            self.fetch(index, PageId(target), stats, true)?;
        }
        Ok(())
    }

    /// Folds this query's outcome into the edge model.
    fn absorb(
        &mut self,
        considered: &[(u32, u32)],
        page_results: &FxHashMap<u32, u64>,
        stats: &mut QueryStats,
    ) {
        for &(from, to) in considered {
            let edge = self.model.entry((from, to)).or_default();
            edge.predictions += 1;
            if page_results.get(&to).copied().unwrap_or(0) > 0 {
                edge.hits += 1;
            }
            stats.prefetch_prediction_comparisons += 1;
        }
    }
}
