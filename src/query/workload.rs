//! Workload queries: file format, generation, and the query value type.
//!
//! Query files are line-oriented: the first line is the query-type integer
//! (0 = range, 1 = point, 2 = moving). Range rows carry six floats, point
//! rows three. Moving workloads encode a trajectory count, then per
//! trajectory a step count followed by that many box rows.

use std::fmt;
use std::io::{BufRead, BufReader, Write};
use std::path::Path;

use rand::Rng;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

use crate::geometry::{Box3, Vertex};
use crate::types::{DiasError, Result};

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum QueryKind {
    Range,
    Point,
    Moving,
}

impl QueryKind {
    pub fn code(self) -> u32 {
        match self {
            QueryKind::Range => 0,
            QueryKind::Point => 1,
            QueryKind::Moving => 2,
        }
    }

    pub fn from_code(code: u32) -> Result<Self> {
        match code {
            0 => Ok(QueryKind::Range),
            1 => Ok(QueryKind::Point),
            2 => Ok(QueryKind::Moving),
            other => Err(DiasError::Parse(format!("unknown query type {other}"))),
        }
    }
}

impl fmt::Display for QueryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            QueryKind::Range => "range",
            QueryKind::Point => "point",
            QueryKind::Moving => "moving",
        };
        write!(f, "{name}")
    }
}

/// One workload query. Range and point queries hold a single box (a point
/// query's box is degenerate: low equals high); moving queries hold the
/// trajectory steps in order.
#[derive(Clone, Debug, PartialEq)]
pub struct SpatialQuery {
    pub kind: QueryKind,
    pub boxes: Vec<Box3>,
}

impl SpatialQuery {
    pub fn range(b: Box3) -> Self {
        Self {
            kind: QueryKind::Range,
            boxes: vec![b],
        }
    }

    pub fn point(p: Vertex) -> Self {
        Self {
            kind: QueryKind::Point,
            boxes: vec![Box3::new(p, p)],
        }
    }

    pub fn moving(steps: Vec<Box3>) -> Self {
        Self {
            kind: QueryKind::Moving,
            boxes: steps,
        }
    }
}

/// Reads a query file.
pub fn read_queries(path: impl AsRef<Path>) -> Result<Vec<SpatialQuery>> {
    let file = std::fs::File::open(path)?;
    let mut lines = BufReader::new(file)
        .lines()
        .collect::<std::io::Result<Vec<String>>>()?
        .into_iter()
        .filter(|l| !l.trim().is_empty());

    let type_line = lines
        .next()
        .ok_or_else(|| DiasError::Parse("query file is empty".into()))?;
    let code: u32 = type_line
        .trim()
        .parse()
        .map_err(|_| DiasError::Parse(format!("bad query-type line {type_line:?}")))?;
    let kind = QueryKind::from_code(code)?;

    let mut queries = Vec::new();
    match kind {
        QueryKind::Range => {
            for line in lines {
                queries.push(SpatialQuery::range(parse_box(&line)?));
            }
        }
        QueryKind::Point => {
            for line in lines {
                let v = parse_floats::<3>(&line)?;
                queries.push(SpatialQuery::point(Vertex(v)));
            }
        }
        QueryKind::Moving => {
            let count_line = lines
                .next()
                .ok_or_else(|| DiasError::Parse("moving workload missing count".into()))?;
            let count: usize = count_line
                .trim()
                .parse()
                .map_err(|_| DiasError::Parse(format!("bad trajectory count {count_line:?}")))?;
            for _ in 0..count {
                let steps_line = lines
                    .next()
                    .ok_or_else(|| DiasError::Parse("trajectory missing step count".into()))?;
                let steps: usize = steps_line.trim().parse().map_err(|_| {
                    DiasError::Parse(format!("bad step count {steps_line:?}"))
                })?;
                let mut boxes = Vec::with_capacity(steps);
                for _ in 0..steps {
                    let line = lines.next().ok_or_else(|| {
                        DiasError::Parse("trajectory shorter than its step count".into())
                    })?;
                    boxes.push(parse_box(&line)?);
                }
                queries.push(SpatialQuery::moving(boxes));
            }
        }
    }
    Ok(queries)
}

/// Writes a query file in the same format. All queries must share `kind`.
pub fn write_queries(
    path: impl AsRef<Path>,
    kind: QueryKind,
    queries: &[SpatialQuery],
) -> Result<()> {
    let mut out = std::io::BufWriter::new(std::fs::File::create(path)?);
    writeln!(out, "{}", kind.code())?;
    match kind {
        QueryKind::Range => {
            for q in queries {
                write_box(&mut out, &q.boxes[0])?;
            }
        }
        QueryKind::Point => {
            for q in queries {
                let p = q.boxes[0].low;
                writeln!(out, "{} {} {}", p[0], p[1], p[2])?;
            }
        }
        QueryKind::Moving => {
            writeln!(out, "{}", queries.len())?;
            for q in queries {
                writeln!(out, "{}", q.boxes.len())?;
                for b in &q.boxes {
                    write_box(&mut out, b)?;
                }
            }
        }
    }
    out.flush()?;
    Ok(())
}

/// Reproducible workload generation: uniform boxes of the target volume
/// inside the world box; moving trajectories drift one quarter edge per
/// step along a random axis-aligned direction.
pub fn generate(
    world: &Box3,
    volume: f64,
    count: usize,
    kind: QueryKind,
    steps: usize,
    rng_seed: u64,
) -> Vec<SpatialQuery> {
    let mut rng = ChaCha8Rng::seed_from_u64(rng_seed);
    let mut queries = Vec::with_capacity(count);
    for _ in 0..count {
        match kind {
            QueryKind::Range => {
                queries.push(SpatialQuery::range(Box3::random_box(world, volume, &mut rng)));
            }
            QueryKind::Point => {
                let b = Box3::random_box(world, 0.0, &mut rng);
                queries.push(SpatialQuery::point(b.low));
            }
            QueryKind::Moving => {
                let mut current = Box3::random_box(world, volume, &mut rng);
                let edge = (current.high[0] - current.low[0]).max(f32::EPSILON);
                let axis = rng.gen_range(0..3usize);
                let sign = if rng.gen_bool(0.5) { 1.0 } else { -1.0 };
                let mut boxes = Vec::with_capacity(steps.max(1));
                for _ in 0..steps.max(1) {
                    boxes.push(current);
                    let mut low = current.low;
                    let mut high = current.high;
                    low.0[axis] += sign * edge * 0.25;
                    high.0[axis] += sign * edge * 0.25;
                    current = Box3::new(low, high);
                }
                queries.push(SpatialQuery::moving(boxes));
            }
        }
    }
    queries
}

fn parse_floats<const N: usize>(line: &str) -> Result<[f32; N]> {
    let mut out = [0.0f32; N];
    let mut tokens = line.split_whitespace();
    for slot in &mut out {
        let token = tokens
            .next()
            .ok_or_else(|| DiasError::Parse(format!("query row too short: {line:?}")))?;
        *slot = token
            .parse()
            .map_err(|_| DiasError::Parse(format!("bad number {token:?}")))?;
    }
    Ok(out)
}

fn parse_box(line: &str) -> Result<Box3> {
    let v = parse_floats::<6>(line)?;
    Ok(Box3::new(
        Vertex([v[0], v[1], v[2]]),
        Vertex([v[3], v[4], v[5]]),
    ))
}

fn write_box(out: &mut impl Write, b: &Box3) -> Result<()> {
    writeln!(
        out,
        "{} {} {} {} {} {}",
        b.low[0], b.low[1], b.low[2], b.high[0], b.high[1], b.high[2]
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn range_file_roundtrip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("queries.txt");
        let queries = vec![
            SpatialQuery::range(Box3::new(
                Vertex::new(0.0, 0.0, 0.0),
                Vertex::new(1.0, 2.0, 3.0),
            )),
            SpatialQuery::range(Box3::new(
                Vertex::new(-5.5, 0.25, 9.0),
                Vertex::new(-1.0, 0.5, 10.0),
            )),
        ];
        write_queries(&path, QueryKind::Range, &queries).unwrap();
        assert_eq!(read_queries(&path).unwrap(), queries);
    }

    #[test]
    fn point_file_roundtrip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("queries.txt");
        let queries = vec![
            SpatialQuery::point(Vertex::new(1.0, 2.0, 3.0)),
            SpatialQuery::point(Vertex::new(-0.5, 0.0, 12.5)),
        ];
        write_queries(&path, QueryKind::Point, &queries).unwrap();
        let read = read_queries(&path).unwrap();
        assert_eq!(read, queries);
        assert_eq!(read[0].boxes[0].low, read[0].boxes[0].high);
    }

    #[test]
    fn moving_file_roundtrip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("queries.txt");
        let world = Box3::new(Vertex::new(0.0, 0.0, 0.0), Vertex::new(100.0, 100.0, 100.0));
        let queries = generate(&world, 64.0, 3, QueryKind::Moving, 5, 42);
        write_queries(&path, QueryKind::Moving, &queries).unwrap();
        let read = read_queries(&path).unwrap();
        assert_eq!(read.len(), 3);
        for (a, b) in read.iter().zip(&queries) {
            assert_eq!(a.kind, QueryKind::Moving);
            assert_eq!(a.boxes.len(), b.boxes.len());
        }
    }

    #[test]
    fn generation_is_reproducible() {
        let world = Box3::new(Vertex::new(0.0, 0.0, 0.0), Vertex::new(10.0, 10.0, 10.0));
        let a = generate(&world, 1.0, 5, QueryKind::Range, 0, 7);
        let b = generate(&world, 1.0, 5, QueryKind::Range, 0, 7);
        assert_eq!(a, b);
        for q in &a {
            assert!(Box3::contains(&world, &q.boxes[0]) || Box3::overlap(&world, &q.boxes[0]));
        }
    }

    #[test]
    fn unknown_type_is_parse_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("queries.txt");
        std::fs::write(&path, "9\n1 2 3\n").unwrap();
        assert!(matches!(read_queries(&path), Err(DiasError::Parse(_))));
    }
}
