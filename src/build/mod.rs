#![forbid(unsafe_code)]
//! The bulk-build pipeline.
//!
//! One pass over the Delaunay stream funnels finalized vertices into the
//! external sort; the sort output is packed into graph pages while the id
//! map fills; a final sequential pass rewrites neighbour vertex ids into
//! page ids, derives per-page metadata, and bulk-loads the seed tree.
//! Memory is bounded by the live-vertex table, the sort buffer, and one
//! page of state at a time.

pub mod extsort;
pub mod packer;
pub mod partition;
pub mod stream;

use std::io::BufReader;
use std::path::Path;

use rustc_hash::{FxHashMap, FxHashSet};
use tracing::info;

use crate::geometry::Box3;
use crate::hilbert::{HilbertMapper, DEFAULT_BITS_PER_DIM};
use crate::primitives::pagefile::{PageFile, DEFAULT_PAGE_SIZE};
use crate::seed::{rins_tree::RinsTree, str_tree::StrTree, SeedRecord};
use crate::storage::idmap::IdMap;
use crate::storage::meta::{MetaStoreWriter, MetadataEntry};
use crate::storage::page::{decode_page, rewrite_links_in_place};
use crate::storage::IndexPaths;
use crate::types::{DiasError, PageId, Result, VertexId};

pub use self::packer::PackerKind;
use self::extsort::ExternalSorter;
use self::packer::PagePacker;
use self::stream::DelaunayParser;

/// Default chunk of vertices handed to the packer at a time.
pub const DEFAULT_CHUNK_SIZE: usize = 500_000;
/// Default external-sort buffer, in records.
pub const DEFAULT_SORT_BUDGET: usize = 4_000_000;

/// Bound on the memo in front of the id map during the rewrite pass.
const PAGE_ID_MEMO_LIMIT: usize = 1 << 20;

/// Which construction builds the seed tree.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum SeedBuilderKind {
    Str,
    Rins,
}

/// Knobs of a bulk build.
#[derive(Clone, Debug)]
pub struct BuildOptions {
    pub page_size: usize,
    pub packer: PackerKind,
    pub chunk_size: usize,
    pub sort_budget: usize,
    pub hilbert_bits: u32,
    pub seed_builder: SeedBuilderKind,
}

impl Default for BuildOptions {
    fn default() -> Self {
        Self {
            page_size: DEFAULT_PAGE_SIZE,
            packer: PackerKind::Flat,
            chunk_size: DEFAULT_CHUNK_SIZE,
            sort_budget: DEFAULT_SORT_BUDGET,
            hilbert_bits: DEFAULT_BITS_PER_DIM,
            seed_builder: SeedBuilderKind::Str,
        }
    }
}

/// What a finished build produced.
#[derive(Clone, Copy, Debug, Default)]
pub struct BuildSummary {
    pub vertices: u64,
    pub tetrahedra: u64,
    pub pages: u32,
    /// Total inter-page links over all metadata entries.
    pub links: u64,
}

/// Runs the whole pipeline: parse, sort, pack, rewrite, seed.
pub fn build_index(
    input: impl AsRef<Path>,
    paths: &IndexPaths,
    opts: &BuildOptions,
) -> Result<BuildSummary> {
    let input = input.as_ref();
    let mapper = HilbertMapper::new(opts.hilbert_bits);

    // Pass 1: parse the stream, funnel finalized vertices into the sorter.
    info!(input = %input.display(), "parsing Delaunay stream");
    let file = std::fs::File::open(input)?;
    let mut sorter = ExternalSorter::new(mapper, opts.sort_budget);
    let parse_summary =
        DelaunayParser::new().parse(BufReader::new(file), |record| sorter.insert(record))?;
    info!(
        vertices = parse_summary.vertices,
        tetrahedra = parse_summary.tetrahedra,
        "stream parsed"
    );

    // Pass 2: drain the sort in Hilbert order into graph pages.
    let mut graph = PageFile::create(paths.graph(), opts.page_size)?;
    let mut idmap = IdMap::create(paths.btree(), opts.page_size)?;
    let packed = {
        let mut pagepacker =
            PagePacker::new(opts.packer, opts.chunk_size, &mut graph, &mut idmap);
        sorter.finish(|record| pagepacker.push(record))?;
        pagepacker.finish()?
    };
    graph.sync()?;
    if packed != u64::from(parse_summary.vertices) {
        return Err(DiasError::Corruption(format!(
            "packed {packed} vertices, stream had {}",
            parse_summary.vertices
        )));
    }
    info!(pages = graph.num_pages(), vertices = packed, "graph pages written");

    // Pass 3: rewrite links to page ids, derive metadata, build the seed.
    let summary = rewrite_and_seed(&mut graph, &mut idmap, paths, opts, parse_summary)?;
    idmap.flush()?;
    info!(
        pages = summary.pages,
        links = summary.links,
        "metadata and seed index written"
    );
    Ok(summary)
}

fn rewrite_and_seed(
    graph: &mut PageFile,
    idmap: &mut IdMap,
    paths: &IndexPaths,
    opts: &BuildOptions,
    parse_summary: stream::ParseSummary,
) -> Result<BuildSummary> {
    let num_pages = graph.num_pages();
    let mut meta_writer = MetaStoreWriter::new(opts.page_size);
    let mut seed_records: Vec<SeedRecord> = Vec::with_capacity(num_pages as usize);
    let mut total_links = 0u64;

    // Small memo in front of the B+-tree, cleared when it grows too big.
    let mut page_of: FxHashMap<u32, u32> = FxHashMap::default();
    let mut buf = vec![0u8; opts.page_size];

    for p in 0..num_pages {
        let page_id = PageId(p);
        graph.read_page(page_id, &mut buf)?;
        let records = decode_page(&buf)?;

        let mut page_mbr = Box3::EMPTY;
        let mut partition_mbr = Box3::EMPTY;
        for record in &records {
            page_mbr.expand(&record.coords);
            partition_mbr.expand(&record.coords);
            partition_mbr.union_in_place(&record.vmbr);
        }

        let mut links: FxHashSet<u32> = FxHashSet::default();
        rewrite_links_in_place(&mut buf, |vertex_id| {
            let owner = match page_of.get(&vertex_id) {
                Some(&cached) => cached,
                None => {
                    let resolved = idmap.point_query(VertexId(vertex_id))?.0;
                    if page_of.len() >= PAGE_ID_MEMO_LIMIT {
                        page_of.clear();
                    }
                    page_of.insert(vertex_id, resolved);
                    resolved
                }
            };
            if owner >= num_pages {
                return Err(DiasError::Corruption(format!(
                    "vertex {vertex_id} maps to non-existent page {owner}"
                )));
            }
            if owner != p {
                links.insert(owner);
            }
            Ok(owner)
        })?;
        graph.write_page(page_id, &buf)?;

        let mut links: Vec<PageId> = links.into_iter().map(PageId).collect();
        links.sort_unstable();
        total_links += links.len() as u64;

        let entry = MetadataEntry {
            page_id,
            page_mbr,
            partition_mbr,
            links,
        };
        meta_writer.push(&entry)?;
        let mut body = Vec::with_capacity(entry.body_len());
        entry.encode_body(&mut body);
        seed_records.push(SeedRecord {
            mbr: partition_mbr,
            body,
        });
    }

    graph.sync()?;
    meta_writer.finish(paths.meta())?;
    match opts.seed_builder {
        SeedBuilderKind::Str => {
            StrTree::bulk_load(paths.seed(), opts.page_size, seed_records)?;
        }
        SeedBuilderKind::Rins => {
            RinsTree::bulk_load(paths.seed(), opts.page_size, seed_records)?;
        }
    }

    Ok(BuildSummary {
        vertices: u64::from(parse_summary.vertices),
        tetrahedra: parse_summary.tetrahedra,
        pages: num_pages,
        links: total_links,
    })
}
