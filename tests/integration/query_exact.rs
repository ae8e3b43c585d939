//! Exact-crawler behaviour: the S1-S4 scenarios, brute-force equivalence,
//! and determinism across repeated queries.
#![allow(missing_docs)]

mod common;

use dias::build::{BuildOptions, PackerKind, SeedBuilderKind};
use dias::geometry::{Box3, Vertex};
use dias::query::workload::SpatialQuery;
use dias::query::{EngineKind, FlatIndex, QueryRunner};

use common::{brute_force, build_fixture, grid_points, grid_stream, sorted_ids, two_vertex_stream};

fn runner(paths: &dias::storage::IndexPaths) -> QueryRunner {
    let index = FlatIndex::open(paths).unwrap();
    QueryRunner::new(index, EngineKind::Exact, 64, 2)
}

#[test]
fn s1_unit_query_finds_origin_only() {
    let (_dir, paths, _) =
        build_fixture(two_vertex_stream(), &BuildOptions::default()).unwrap();
    let mut runner = runner(&paths);
    let query = SpatialQuery::range(Box3::new(
        Vertex::new(-0.5, -0.5, -0.5),
        Vertex::new(0.5, 0.5, 0.5),
    ));
    let (results, stats) = runner.execute(&query).unwrap();
    assert_eq!(sorted_ids(&results), vec![1]);
    // The whole fixture fits one page: exactly one page read after seeding.
    assert_eq!(stats.payload_ios, 1);
}

#[test]
fn s2_world_query_finds_both_near_vertices() {
    let (_dir, paths, summary) =
        build_fixture(two_vertex_stream(), &BuildOptions::default()).unwrap();
    let mut runner = runner(&paths);
    let query = SpatialQuery::range(Box3::new(
        Vertex::new(-10.0, -10.0, -10.0),
        Vertex::new(10.0, 10.0, 10.0),
    ));
    let (results, stats) = runner.execute(&query).unwrap();
    assert_eq!(sorted_ids(&results), vec![1, 2]);
    // All graph pages are visited.
    assert_eq!(stats.payload_ios, u64::from(summary.pages));
}

#[test]
fn s3_disjoint_query_is_empty_with_no_page_reads() {
    let (_dir, paths, _) =
        build_fixture(two_vertex_stream(), &BuildOptions::default()).unwrap();
    let mut runner = runner(&paths);
    let query = SpatialQuery::range(Box3::new(
        Vertex::new(2.0, 2.0, 2.0),
        Vertex::new(3.0, 3.0, 3.0),
    ));
    let (results, stats) = runner.execute(&query).unwrap();
    assert!(results.is_empty(), "empty result is a normal outcome");
    assert_eq!(stats.payload_ios, 0, "no crawl page reads on a seed miss");
    assert_eq!(stats.result_points, 0);
}

#[test]
fn s4_grid_corner_query_returns_the_27_corner_points() {
    let n = 10;
    let opts = BuildOptions {
        page_size: 1024,
        chunk_size: 300,
        sort_budget: 256,
        ..BuildOptions::default()
    };
    let (_dir, paths, _) = build_fixture(&grid_stream(n), &opts).unwrap();
    let mut runner = runner(&paths);
    let query = SpatialQuery::range(Box3::new(
        Vertex::new(0.0, 0.0, 0.0),
        Vertex::new(2.0, 2.0, 2.0),
    ));
    let (results, _) = runner.execute(&query).unwrap();
    let expected = brute_force(&grid_points(n), &query.boxes[0]);
    assert_eq!(expected.len(), 27);
    assert_eq!(sorted_ids(&results), expected);
}

#[test]
fn random_boxes_match_brute_force_on_both_packers_and_seeds() {
    let n = 8;
    let points = grid_points(n);
    let configs = [
        (PackerKind::Flat, SeedBuilderKind::Str),
        (PackerKind::Flat, SeedBuilderKind::Rins),
        (PackerKind::Halt, SeedBuilderKind::Str),
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
        let mut runner = runner(&paths);

        let queries = [
            Box3::new(Vertex::new(1.5, 1.5, 1.5), Vertex::new(4.5, 3.5, 6.0)),
            Box3::new(Vertex::new(-3.0, -3.0, -3.0), Vertex::new(0.0, 0.0, 0.0)),
            Box3::new(Vertex::new(6.2, 0.0, 0.0), Vertex::new(7.9, 7.9, 7.9)),
            Box3::new(Vertex::new(3.0, 3.0, 3.0), Vertex::new(3.0, 3.0, 3.0)),
            Box3::new(Vertex::new(9.5, 9.5, 9.5), Vertex::new(11.0, 11.0, 11.0)),
        ];
        for q in queries {
            let (results, _) = runner.execute(&SpatialQuery::range(q)).unwrap();
            assert_eq!(
                sorted_ids(&results),
                brute_force(&points, &q),
                "mismatch for {q:?} with {packer:?}/{seed_builder:?}"
            );
        }
    }
}

#[test]
fn point_queries_hit_exact_coordinates_only() {
    let n = 6;
    let opts = BuildOptions {
        page_size: 512,
        chunk_size: 100,
        sort_budget: 64,
        ..BuildOptions::default()
    };
    let (_dir, paths, _) = build_fixture(&grid_stream(n), &opts).unwrap();
    let mut runner = runner(&paths);

    let (results, _) = runner
        .execute(&SpatialQuery::point(Vertex::new(2.0, 3.0, 4.0)))
        .unwrap();
    assert_eq!(sorted_ids(&results), vec![common::grid_id(n, 2, 3, 4)]);

    let (results, _) = runner
        .execute(&SpatialQuery::point(Vertex::new(2.5, 3.0, 4.0)))
        .unwrap();
    assert!(results.is_empty());
}

#[test]
fn repeated_queries_are_deterministic() {
    let n = 7;
    let opts = BuildOptions {
        page_size: 512,
        chunk_size: 120,
        sort_budget: 90,
        ..BuildOptions::default()
    };
    let (_dir, paths, _) = build_fixture(&grid_stream(n), &opts).unwrap();
    let mut runner = runner(&paths);
    let query = SpatialQuery::range(Box3::new(
        Vertex::new(1.0, 1.0, 1.0),
        Vertex::new(5.0, 5.0, 5.0),
    ));
    let (first, first_stats) = runner.execute(&query).unwrap();
    for _ in 0..3 {
        let (again, stats) = runner.execute(&query).unwrap();
        assert_eq!(sorted_ids(&again), sorted_ids(&first));
        assert_eq!(stats.payload_ios, first_stats.payload_ios);
        assert_eq!(stats.result_points, first_stats.result_points);
    }
}

#[test]
fn moving_query_steps_return_step_results_in_order() {
    let n = 8;
    let opts = BuildOptions {
        page_size: 512,
        chunk_size: 150,
        sort_budget: 100,
        ..BuildOptions::default()
    };
    let (_dir, paths, _) = build_fixture(&grid_stream(n), &opts).unwrap();
    let points = grid_points(n);
    let mut runner = runner(&paths);

    let steps = vec![
        Box3::new(Vertex::new(0.0, 0.0, 0.0), Vertex::new(1.0, 1.0, 1.0)),
        Box3::new(Vertex::new(1.0, 0.0, 0.0), Vertex::new(2.0, 1.0, 1.0)),
        Box3::new(Vertex::new(2.0, 0.0, 0.0), Vertex::new(3.0, 1.0, 1.0)),
    ];
    let expected: Vec<u32> = steps
        .iter()
        .flat_map(|b| brute_force(&points, b))
        .collect();
    let (results, _) = runner
        .execute(&SpatialQuery::moving(steps))
        .unwrap();
    let mut got: Vec<u32> = results.iter().map(|(id, _)| id.0).collect();
    let mut expected_sorted = expected;
    got.sort_unstable();
    expected_sorted.sort_unstable();
    assert_eq!(got, expected_sorted);
}
