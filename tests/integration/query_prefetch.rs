//! Prefetching-crawler equivalence: identical result multisets to the
//! exact crawler on every query, with prefetch telemetry accumulating.
#![allow(missing_docs)]

mod common;

use dias::build::{BuildOptions, PackerKind, SeedBuilderKind};
use dias::geometry::{Box3, Vertex};
use dias::query::workload::SpatialQuery;
use dias::query::{EngineKind, FlatIndex, QueryRunner};

use common::{build_fixture, grid_stream, sorted_ids};

fn workload() -> Vec<SpatialQuery> {
    let mut queries = Vec::new();
    for step in 0..6 {
        let s = step as f32;
        queries.push(SpatialQuery::range(Box3::new(
            Vertex::new(s * 0.8, 0.5, 0.5),
            Vertex::new(s * 0.8 + 2.5, 4.5, 5.0),
        )));
    }
    // Re-run the same region: the second pass exercises the learned model
    // and the warm cache.
    let mut twice = queries.clone();
    twice.extend(queries);
    twice
}

#[test]
fn prefetching_crawler_matches_exact_crawler() {
    let n = 8;
    let configs = [
        (PackerKind::Flat, SeedBuilderKind::Str),
        (PackerKind::Halt, SeedBuilderKind::Rins),
    ];
    for (packer, seed_builder) in configs {
        let opts = BuildOptions {
            page_size: 512,
            packer,
            seed_builder,
            chunk_size: 150,
            sort_budget: 100,
            ..BuildOptions::default()
        };
        let (_dir, paths, _) = build_fixture(&grid_stream(n), &opts).unwrap();

        let mut exact = QueryRunner::new(FlatIndex::open(&paths).unwrap(), EngineKind::Exact, 64, 2);
        let mut prefetch =
            QueryRunner::new(FlatIndex::open(&paths).unwrap(), EngineKind::Prefetch, 64, 2);

        for (i, query) in workload().iter().enumerate() {
            let (expected, _) = exact.execute(query).unwrap();
            let (got, _) = prefetch.execute(query).unwrap();
            assert_eq!(
                sorted_ids(&got),
                sorted_ids(&expected),
                "query {i} diverged under {packer:?}/{seed_builder:?}"
            );
        }
    }
}

#[test]
fn prefetch_telemetry_accumulates_on_repeated_queries() {
    let n = 8;
    let opts = BuildOptions {
        page_size: 512,
        chunk_size: 150,
        sort_budget: 100,
        ..BuildOptions::default()
    };
    let (_dir, paths, _) = build_fixture(&grid_stream(n), &opts).unwrap();
    let mut runner =
        QueryRunner::new(FlatIndex::open(&paths).unwrap(), EngineKind::Prefetch, 64, 2);

    let query = SpatialQuery::range(Box3::new(
        Vertex::new(1.0, 1.0, 1.0),
        Vertex::new(6.0, 6.0, 6.0),
    ));
    let (_, first) = runner.execute(&query).unwrap();
    assert!(first.prefetch_edges > 0, "edges must be considered");
    // Everything the second run needs is in the cache already, so the
    // crawl itself costs no payload reads.
    let (_, second) = runner.execute(&query).unwrap();
    assert!(second.payload_ios <= first.payload_ios);
    assert_eq!(second.result_points, first.result_points);
}

#[test]
fn tiny_cache_still_yields_exact_results() {
    let n = 7;
    let opts = BuildOptions {
        page_size: 512,
        chunk_size: 120,
        sort_budget: 80,
        ..BuildOptions::default()
    };
    let (_dir, paths, _) = build_fixture(&grid_stream(n), &opts).unwrap();
    let mut exact = QueryRunner::new(FlatIndex::open(&paths).unwrap(), EngineKind::Exact, 64, 2);
    // A one-page cache forces constant eviction of prefetched pages.
    let mut prefetch =
        QueryRunner::new(FlatIndex::open(&paths).unwrap(), EngineKind::Prefetch, 1, 4);

    for lo in 0..5 {
        let f = lo as f32;
        let query = SpatialQuery::range(Box3::new(
            Vertex::new(f, f, 0.0),
            Vertex::new(f + 2.0, f + 2.0, 6.0),
        ));
        let (expected, _) = exact.execute(&query).unwrap();
        let (got, _) = prefetch.execute(&query).unwrap();
        assert_eq!(sorted_ids(&got), sorted_ids(&expected));
    }
}
