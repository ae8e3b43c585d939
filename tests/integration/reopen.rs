//! Reopening a built index: a fresh open must answer exactly like the
//! process that built it, and the CLI round trip must agree with the
//! library API.
#![allow(missing_docs)]

mod common;

use assert_cmd::Command;
use predicates::prelude::*;

use dias::build::BuildOptions;
use dias::geometry::{Box3, Vertex};
use dias::query::workload::{self, QueryKind, SpatialQuery};
use dias::query::{EngineKind, FlatIndex, QueryRunner};

use common::{brute_force, build_fixture, grid_points, grid_stream, sorted_ids};

fn scenario_queries() -> Vec<SpatialQuery> {
    vec![
        SpatialQuery::range(Box3::new(
            Vertex::new(-0.5, -0.5, -0.5),
            Vertex::new(0.5, 0.5, 0.5),
        )),
        SpatialQuery::range(Box3::new(
            Vertex::new(-10.0, -10.0, -10.0),
            Vertex::new(10.0, 10.0, 10.0),
        )),
        SpatialQuery::range(Box3::new(
            Vertex::new(20.0, 20.0, 20.0),
            Vertex::new(30.0, 30.0, 30.0),
        )),
        SpatialQuery::range(Box3::new(
            Vertex::new(0.0, 0.0, 0.0),
            Vertex::new(2.0, 2.0, 2.0),
        )),
    ]
}

#[test]
fn fresh_open_reproduces_results() {
    let n = 6;
    let opts = BuildOptions {
        page_size: 512,
        chunk_size: 100,
        sort_budget: 64,
        ..BuildOptions::default()
    };
    let (_dir, paths, _) = build_fixture(&grid_stream(n), &opts).unwrap();

    let first: Vec<Vec<u32>> = {
        let mut runner =
            QueryRunner::new(FlatIndex::open(&paths).unwrap(), EngineKind::Exact, 64, 2);
        scenario_queries()
            .iter()
            .map(|q| sorted_ids(&runner.execute(q).unwrap().0))
            .collect()
    };

    // A brand-new open of the same files sees identical answers.
    let mut reopened =
        QueryRunner::new(FlatIndex::open(&paths).unwrap(), EngineKind::Exact, 64, 2);
    for (q, expected) in scenario_queries().iter().zip(&first) {
        let (results, _) = reopened.execute(q).unwrap();
        assert_eq!(&sorted_ids(&results), expected);
    }

    // And the answers are the ground truth.
    let points = grid_points(n);
    for (q, expected) in scenario_queries().iter().zip(&first) {
        assert_eq!(&brute_force(&points, &q.boxes[0]), expected);
    }
}

fn result_columns(stdout: &str) -> Vec<(String, String)> {
    stdout
        .lines()
        .skip(1) // header
        .map(|line| {
            let mut cols = line.split('\t');
            let query = cols.next().unwrap_or_default().to_string();
            let _kind = cols.next();
            let results = cols.next().unwrap_or_default().to_string();
            (query, results)
        })
        .collect()
}

#[test]
fn cli_build_then_query_in_fresh_processes() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("grid.sva");
    std::fs::write(&input, grid_stream(5)).unwrap();
    let stem = dir.path().join("idx");
    let queries_file = dir.path().join("queries.txt");
    let queries: Vec<SpatialQuery> = vec![
        SpatialQuery::range(Box3::new(
            Vertex::new(0.0, 0.0, 0.0),
            Vertex::new(2.0, 2.0, 2.0),
        )),
        SpatialQuery::range(Box3::new(
            Vertex::new(3.5, 3.5, 3.5),
            Vertex::new(10.0, 10.0, 10.0),
        )),
    ];
    workload::write_queries(&queries_file, QueryKind::Range, &queries).unwrap();

    Command::cargo_bin("flat")
        .unwrap()
        .args(["build"])
        .arg(&input)
        .arg(&stem)
        .args(["--page-size", "512", "--chunk-size", "64", "--sort-buffer", "64"])
        .assert()
        .success()
        .stdout(predicate::str::contains("built"));

    // Two separate query processes: identical result columns, and the
    // counts match the brute-force oracle.
    let points = grid_points(5);
    let expected: Vec<usize> = queries
        .iter()
        .map(|q| brute_force(&points, &q.boxes[0]).len())
        .collect();

    let mut outputs = Vec::new();
    for _ in 0..2 {
        let assert = Command::cargo_bin("flat")
            .unwrap()
            .args(["query"])
            .arg(&stem)
            .arg(&queries_file)
            .assert()
            .success();
        let stdout = String::from_utf8(assert.get_output().stdout.clone()).unwrap();
        outputs.push(result_columns(&stdout));
    }
    assert_eq!(outputs[0], outputs[1], "query processes disagree");
    for (i, expected_count) in expected.iter().enumerate() {
        let (query, results) = &outputs[0][i];
        assert_eq!(query, &i.to_string());
        assert_eq!(results, &expected_count.to_string());
    }
}

#[test]
fn cli_reports_fatal_errors_on_stderr() {
    let dir = tempfile::tempdir().unwrap();
    Command::cargo_bin("flat")
        .unwrap()
        .args(["query"])
        .arg(dir.path().join("missing"))
        .arg(dir.path().join("nope.txt"))
        .assert()
        .failure()
        .stderr(predicate::str::contains("error:"));

    // A malformed stream is a parse error, also fatal.
    let bad = dir.path().join("bad.sva");
    std::fs::write(&bad, "v 1 2\n").unwrap();
    Command::cargo_bin("flat")
        .unwrap()
        .args(["build"])
        .arg(&bad)
        .arg(dir.path().join("out"))
        .assert()
        .failure()
        .stderr(predicate::str::contains("error: parse error"));
}
