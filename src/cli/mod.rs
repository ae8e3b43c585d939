#![forbid(unsafe_code)]
//! Command bodies behind the `flat` binary: build, query, workload
//! generation. The binary owns argument parsing; these functions own the
//! work and the report formatting.

use std::path::Path;
use std::time::Instant;

use serde::Serialize;
use tracing::info;

use crate::build::{build_index, BuildOptions};
use crate::geometry::{Box3, Vertex};
use crate::query::stats::QueryStats;
use crate::query::workload::{self, QueryKind, SpatialQuery};
use crate::query::{EngineKind, FlatIndex, QueryRunner};
use crate::storage::IndexPaths;
use crate::types::Result;

/// Report format for query runs.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ReportFormat {
    Text,
    Json,
}

/// `flat build`: runs the pipeline and prints a one-line summary.
pub fn build_command(input: &Path, stem: &Path, opts: &BuildOptions) -> Result<()> {
    let paths = IndexPaths::new(stem);
    let started = Instant::now();
    let summary = build_index(input, &paths, opts)?;
    println!(
        "built {}: {} vertices, {} tetrahedra, {} pages, {} links, {:.2}s",
        paths.stem().display(),
        summary.vertices,
        summary.tetrahedra,
        summary.pages,
        summary.links,
        started.elapsed().as_secs_f64()
    );
    Ok(())
}

#[derive(Serialize)]
struct QueryReportRow<'a> {
    query: usize,
    kind: &'a str,
    results: usize,
    #[serde(flatten)]
    stats: &'a QueryStats,
}

/// `flat query`: runs a workload file and prints per-query statistics plus
/// an aggregate footer.
pub fn query_command(
    stem: &Path,
    queries_file: &Path,
    engine: EngineKind,
    cache_pages: usize,
    fanout: usize,
    format: ReportFormat,
) -> Result<()> {
    let paths = IndexPaths::new(stem);
    let index = FlatIndex::open(&paths)?;
    info!(
        pages = index.num_pages(),
        page_size = index.page_size(),
        "index opened"
    );
    let queries = workload::read_queries(queries_file)?;
    let mut runner = QueryRunner::new(index, engine, cache_pages, fanout);

    let mut aggregate = QueryStats::default();
    if format == ReportFormat::Text {
        println!("query\tkind\tresults\t{}", QueryStats::header());
    }
    for (i, query) in queries.iter().enumerate() {
        let (points, stats) = runner.execute(query)?;
        match format {
            ReportFormat::Text => {
                println!("{}\t{}\t{}\t{}", i, query.kind, points.len(), stats.row());
            }
            ReportFormat::Json => {
                let row = QueryReportRow {
                    query: i,
                    kind: match query.kind {
                        QueryKind::Range => "range",
                        QueryKind::Point => "point",
                        QueryKind::Moving => "moving",
                    },
                    results: points.len(),
                    stats: &stats,
                };
                println!("{}", serde_json::to_string(&row)?);
            }
        }
        aggregate.add(&stats);
    }
    match format {
        ReportFormat::Text => {
            println!("total\t-\t{}\t{}", aggregate.result_points, aggregate.row());
        }
        ReportFormat::Json => {
            println!(
                "{}",
                serde_json::to_string(&serde_json::json!({
                    "queries": queries.len(),
                    "aggregate": aggregate,
                }))?
            );
        }
    }
    Ok(())
}

/// `flat gen-queries`: writes a reproducible workload file.
#[allow(clippy::too_many_arguments)]
pub fn gen_queries_command(
    out: &Path,
    world: [f32; 6],
    count: usize,
    volume: f64,
    kind: QueryKind,
    steps: usize,
    rng_seed: u64,
) -> Result<()> {
    let world = Box3::new(
        Vertex::new(world[0], world[1], world[2]),
        Vertex::new(world[3], world[4], world[5]),
    );
    let queries: Vec<SpatialQuery> = workload::generate(&world, volume, count, kind, steps, rng_seed);
    workload::write_queries(out, kind, &queries)?;
    println!("wrote {} {kind} queries to {}", queries.len(), out.display());
    Ok(())
}
