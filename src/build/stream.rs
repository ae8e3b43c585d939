//! Parser for the textual Delaunay tetrahedralization stream (`.sva`).
//!
//! Two record kinds: `v x y z` introduces the next vertex (ids assigned
//! sequentially from 1) and `c a b c d` introduces one tetrahedron. A
//! tetrahedron reference `k <= 0` resolves to `next_id + k` and marks that
//! vertex as finalized: it will never appear in a later tetrahedron, so it
//! can be handed downstream and evicted from the live table immediately.

use std::io::BufRead;

use rustc_hash::FxHashMap;
use smallvec::SmallVec;

use crate::geometry::{tet_circumcenter, Box3, Vertex};
use crate::storage::page::VertexRecord;
use crate::types::{DiasError, Result, VertexId};

/// Counters reported after a parse.
#[derive(Clone, Copy, Debug, Default)]
pub struct ParseSummary {
    pub vertices: u32,
    pub tetrahedra: u64,
}

/// Streaming parser holding the RAM-resident live-vertex table.
pub struct DelaunayParser {
    live: FxHashMap<u32, VertexRecord>,
    next_id: u32,
    tetrahedra: u64,
}

impl DelaunayParser {
    pub fn new() -> Self {
        Self {
            live: FxHashMap::default(),
            next_id: 1,
            tetrahedra: 0,
        }
    }

    /// Drives `reader` to end of stream, invoking `sink` once per finalized
    /// vertex and once more per remaining live vertex at the end.
    pub fn parse<R: BufRead>(
        mut self,
        reader: R,
        mut sink: impl FnMut(VertexRecord) -> Result<()>,
    ) -> Result<ParseSummary> {
        for (line_no, line) in reader.lines().enumerate() {
            let line = line?;
            self.process_line(&line, line_no + 1, &mut sink)?;
        }
        self.finish(&mut sink)
    }

    fn process_line(
        &mut self,
        line: &str,
        line_no: usize,
        sink: &mut impl FnMut(VertexRecord) -> Result<()>,
    ) -> Result<()> {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            return Ok(());
        }
        let mut tokens = trimmed.split_whitespace();
        let tag = tokens.next().expect("non-empty line has a first token");
        match tag {
            "v" => {
                let coords = parse_coords(&mut tokens, line_no)?;
                let id = self.next_id;
                self.next_id = self.next_id.checked_add(1).ok_or(DiasError::Invalid(
                    "vertex id space exhausted",
                ))?;
                self.live
                    .insert(id, VertexRecord::new(VertexId(id), coords, Box3::EMPTY));
                trailing_tokens_check(tokens, line_no)?;
                Ok(())
            }
            "c" => {
                let (ids, finalized) = self.parse_tetrahedron(&mut tokens, line_no)?;
                trailing_tokens_check(tokens, line_no)?;
                self.absorb_tetrahedron(&ids, line_no)?;
                for id in finalized {
                    let record = self.live.remove(&id).ok_or_else(|| {
                        DiasError::Parse(format!(
                            "line {line_no}: vertex {id} finalized more than once"
                        ))
                    })?;
                    sink(record)?;
                }
                Ok(())
            }
            other => Err(DiasError::Parse(format!(
                "line {line_no}: unknown record tag {other:?}"
            ))),
        }
    }

    /// Flushes every still-live vertex downstream in id order.
    fn finish(mut self, sink: &mut impl FnMut(VertexRecord) -> Result<()>) -> Result<ParseSummary> {
        let mut remaining: Vec<u32> = self.live.keys().copied().collect();
        remaining.sort_unstable();
        for id in remaining {
            let record = self.live.remove(&id).expect("key drawn from the table");
            sink(record)?;
        }
        Ok(ParseSummary {
            vertices: self.next_id - 1,
            tetrahedra: self.tetrahedra,
        })
    }

    fn parse_tetrahedron<'a>(
        &self,
        tokens: &mut impl Iterator<Item = &'a str>,
        line_no: usize,
    ) -> Result<([u32; 4], SmallVec<[u32; 4]>)> {
        let mut ids = [0u32; 4];
        let mut finalized = SmallVec::new();
        for slot in &mut ids {
            let token = tokens.next().ok_or_else(|| {
                DiasError::Parse(format!("line {line_no}: tetrahedron needs 4 vertex refs"))
            })?;
            let raw: i64 = token.parse().map_err(|_| {
                DiasError::Parse(format!("line {line_no}: bad vertex reference {token:?}"))
            })?;
            let id = if raw > 0 {
                raw
            } else {
                i64::from(self.next_id) + raw
            };
            if id < 1 || id >= i64::from(self.next_id) {
                return Err(DiasError::Parse(format!(
                    "line {line_no}: vertex reference {raw} resolves outside the stream"
                )));
            }
            *slot = id as u32;
            if raw <= 0 && !finalized.contains(slot) {
                finalized.push(*slot);
            }
        }
        Ok((ids, finalized))
    }

    fn absorb_tetrahedron(&mut self, ids: &[u32; 4], line_no: usize) -> Result<()> {
        let mut coords = [Vertex::new(0.0, 0.0, 0.0); 4];
        for (i, id) in ids.iter().enumerate() {
            let vertex = self.live.get(id).ok_or_else(|| {
                DiasError::NotFound(format!(
                    "line {line_no}: vertex {id} referenced after finalization"
                ))
            })?;
            coords[i] = vertex.coords;
        }
        let center = tet_circumcenter(&coords[0], &coords[1], &coords[2], &coords[3]);

        for (i, id) in ids.iter().enumerate() {
            let vertex = self.live.get_mut(id).expect("presence checked above");
            vertex.vmbr.expand(&center);
            for (j, other) in ids.iter().enumerate() {
                if i == j || *other == *id {
                    continue;
                }
                if !vertex.links.contains(other) {
                    vertex.links.push(*other);
                }
            }
        }
        self.tetrahedra += 1;
        Ok(())
    }
}

impl Default for DelaunayParser {
    fn default() -> Self {
        Self::new()
    }
}

fn parse_coords<'a>(
    tokens: &mut impl Iterator<Item = &'a str>,
    line_no: usize,
) -> Result<Vertex> {
    let mut out = [0.0f32; 3];
    for slot in &mut out {
        let token = tokens
            .next()
            .ok_or_else(|| DiasError::Parse(format!("line {line_no}: vertex needs 3 coordinates")))?;
        *slot = token.parse().map_err(|_| {
            DiasError::Parse(format!("line {line_no}: bad coordinate {token:?}"))
        })?;
    }
    Ok(Vertex(out))
}

fn trailing_tokens_check<'a>(
    mut tokens: impl Iterator<Item = &'a str>,
    line_no: usize,
) -> Result<()> {
    match tokens.next() {
        None => Ok(()),
        Some(extra) => Err(DiasError::Parse(format!(
            "line {line_no}: trailing token {extra:?}"
        ))),
    }
}
