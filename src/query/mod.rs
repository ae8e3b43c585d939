#![forbid(unsafe_code)]
//! Query evaluation: seeding, graph crawling, workloads, statistics.

pub mod crawler;
pub mod prefetch;
pub mod stats;
pub mod workload;

use rustc_hash::FxHashMap;

use crate::geometry::Vertex;
use crate::primitives::pagefile::PageFile;
use crate::seed::{open_seed_index, SeedIndex};
use crate::storage::meta::{MetaStore, MetadataEntry};
use crate::storage::IndexPaths;
use crate::types::{PageId, Result, VertexId};

use self::crawler::ExactCrawler;
use self::prefetch::PrefetchCrawler;
use self::stats::QueryStats;
use self::workload::{QueryKind, SpatialQuery};

/// One reported point.
pub type ResultPoint = (VertexId, Vertex);

/// A read-only index opened for querying: graph pages, metadata store, and
/// the seed tree. Queries never mutate any of the three files.
pub struct FlatIndex {
    pub(crate) graph: PageFile,
    pub(crate) meta: MetaStore,
    pub(crate) seed: Box<dyn SeedIndex>,
}

impl FlatIndex {
    /// Opens the three files of an index. The page size is sniffed from
    /// the metadata-store header.
    pub fn open(paths: &IndexPaths) -> Result<Self> {
        let page_size = MetaStore::sniff_page_size(paths.meta())?;
        let graph = PageFile::open(paths.graph(), page_size, false)?;
        let meta = MetaStore::open(paths.meta(), page_size)?;
        let seed = open_seed_index(paths.seed(), page_size)?;
        Ok(Self { graph, meta, seed })
    }

    pub fn page_size(&self) -> usize {
        self.graph.page_size()
    }

    pub fn num_pages(&self) -> u32 {
        self.graph.num_pages()
    }
}

/// Per-query memo of decoded metadata pages. Every metadata-store page is
/// read at most once per query; reads are what the statistics count.
pub(crate) struct MetaCache<'a> {
    store: &'a MetaStore,
    pages: FxHashMap<u32, Vec<MetadataEntry>>,
}

impl<'a> MetaCache<'a> {
    pub(crate) fn new(store: &'a MetaStore) -> Self {
        Self {
            store,
            pages: FxHashMap::default(),
        }
    }

    pub(crate) fn entry(&mut self, page: PageId, stats: &mut QueryStats) -> Result<MetadataEntry> {
        stats.metadata_entry_lookups += 1;
        let entry_page = self.store.locate(page)?;
        if !self.pages.contains_key(&entry_page) {
            let entries = self.store.read_entry_page(entry_page)?;
            stats.metadata_ios += 1;
            self.pages.insert(entry_page, entries);
        }
        let entries = self.pages.get(&entry_page).expect("present after insert");
        entries
            .iter()
            .find(|e| e.page_id == page)
            .cloned()
            .ok_or_else(|| {
                crate::types::DiasError::Corruption(format!(
                    "metadata for page {page} missing from its entry page"
                ))
            })
    }
}

/// Which crawler evaluates queries.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum EngineKind {
    Exact,
    Prefetch,
}

/// Executes workload queries against one open index, sequentially.
pub struct QueryRunner {
    index: FlatIndex,
    engine: EngineKind,
    prefetcher: PrefetchCrawler,
}

impl QueryRunner {
    pub fn new(index: FlatIndex, engine: EngineKind, cache_pages: usize, fanout: usize) -> Self {
        Self {
            index,
            engine,
            prefetcher: PrefetchCrawler::new(cache_pages, fanout),
        }
    }

    pub fn index(&self) -> &FlatIndex {
        &self.index
    }

    /// Runs one workload query. Moving queries execute as a sequence of
    /// range queries with the crawl frontier of the previous step offered
    /// as a seeding shortcut; results are concatenated in step order.
    pub fn execute(&mut self, query: &SpatialQuery) -> Result<(Vec<ResultPoint>, QueryStats)> {
        let mut stats = QueryStats::default();
        let mut results = Vec::new();
        match query.kind {
            QueryKind::Range | QueryKind::Point => {
                let q = &query.boxes[0];
                let outcome = match self.engine {
                    EngineKind::Exact => ExactCrawler::run(&self.index, q, &mut stats, &[])?,
                    EngineKind::Prefetch => {
                        self.prefetcher.run(&self.index, q, &mut stats, &[])?
                    }
                };
                results = outcome.results;
            }
            QueryKind::Moving => {
                let mut prev_frontier: Vec<(PageId, MetadataEntry)> = Vec::new();
                for q in &query.boxes {
                    let mut step_stats = QueryStats::default();
                    let outcome = match self.engine {
                        EngineKind::Exact => {
                            ExactCrawler::run(&self.index, q, &mut step_stats, &prev_frontier)?
                        }
                        EngineKind::Prefetch => {
                            self.prefetcher
                                .run(&self.index, q, &mut step_stats, &prev_frontier)?
                        }
                    };
                    results.extend(outcome.results);
                    prev_frontier = outcome.visited;
                    stats.add(&step_stats);
                }
            }
        }
        Ok((results, stats))
    }
}

/// What a single range crawl produced: the result points plus the visited
/// frontier, which a following overlapping query may seed from.
pub struct CrawlOutcome {
    pub results: Vec<ResultPoint>,
    pub visited: Vec<(PageId, MetadataEntry)>,
}
