//! Shared fixtures for the integration suite: structured tetrahedral
//! streams, index builds into temp dirs, brute-force oracles.
#![allow(dead_code)]

use std::fmt::Write as _;

use dias::build::{build_index, BuildOptions, BuildSummary};
use dias::geometry::{Box3, Vertex};
use dias::storage::IndexPaths;
use dias::types::Result;
use tempfile::TempDir;

/// Vertex id of grid point `(x, y, z)` in the stream emitted by
/// [`grid_stream`], 1-based.
pub fn grid_id(n: u32, x: u32, y: u32, z: u32) -> u32 {
    1 + x * n * n + y * n + z
}

/// An `n x n x n` integer grid, each unit cube decomposed into the six
/// Kuhn tetrahedra. Every tetrahedron of a unit cube has its circumcenter
/// at the cube center, so interior vertices end up with Voronoi MBRs equal
/// to their true Voronoi cells.
pub fn grid_stream(n: u32) -> String {
    let mut out = String::new();
    for x in 0..n {
        for y in 0..n {
            for z in 0..n {
                writeln!(out, "v {x} {y} {z}").unwrap();
            }
        }
    }
    // Kuhn decomposition: walk the cube diagonal in every axis order.
    const PERMS: [[usize; 3]; 6] = [
        [0, 1, 2],
        [0, 2, 1],
        [1, 0, 2],
        [1, 2, 0],
        [2, 0, 1],
        [2, 1, 0],
    ];
    for x in 0..n - 1 {
        for y in 0..n - 1 {
            for z in 0..n - 1 {
                let base = [x, y, z];
                for perm in PERMS {
                    let mut corner = base;
                    let mut ids = vec![grid_id(n, corner[0], corner[1], corner[2])];
                    for axis in perm {
                        corner[axis] += 1;
                        ids.push(grid_id(n, corner[0], corner[1], corner[2]));
                    }
                    writeln!(out, "c {} {} {} {}", ids[0], ids[1], ids[2], ids[3]).unwrap();
                }
            }
        }
    }
    out
}

/// All points of the grid emitted by [`grid_stream`], with their ids.
pub fn grid_points(n: u32) -> Vec<(u32, Vertex)> {
    let mut out = Vec::new();
    for x in 0..n {
        for y in 0..n {
            for z in 0..n {
                out.push((
                    grid_id(n, x, y, z),
                    Vertex::new(x as f32, y as f32, z as f32),
                ));
            }
        }
    }
    out
}

/// The S1-S3 fixture: v1 at the origin and v2 at (1,1,1) share one
/// tetrahedron; the two remaining corners are parked far away so queries
/// around the origin see exactly v1 and v2.
pub fn two_vertex_stream() -> &'static str {
    "v 0 0 0\n\
     v 1 1 1\n\
     v 60 0 0\n\
     v 0 60 0\n\
     c 1 2 3 4\n"
}

/// Writes `stream` to disk and builds an index from it.
pub fn build_fixture(
    stream: &str,
    opts: &BuildOptions,
) -> Result<(TempDir, IndexPaths, BuildSummary)> {
    let dir = TempDir::new()?;
    let input = dir.path().join("input.sva");
    std::fs::write(&input, stream)?;
    let paths = IndexPaths::new(dir.path().join("idx"));
    let summary = build_index(&input, &paths, opts)?;
    Ok((dir, paths, summary))
}

/// Brute-force oracle over the raw points.
pub fn brute_force(points: &[(u32, Vertex)], query: &Box3) -> Vec<u32> {
    let mut hits: Vec<u32> = points
        .iter()
        .filter(|(_, p)| Box3::contains_point(query, p))
        .map(|(id, _)| *id)
        .collect();
    hits.sort_unstable();
    hits
}

/// Sorted result ids from a crawl outcome.
pub fn sorted_ids(results: &[(dias::types::VertexId, Vertex)]) -> Vec<u32> {
    let mut ids: Vec<u32> = results.iter().map(|(id, _)| id.0).collect();
    ids.sort_unstable();
    ids
}
