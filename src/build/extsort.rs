//! External sort of the finalized vertex stream by Hilbert key.
//!
//! Vertices are buffered up to a record budget; a full buffer is sorted and
//! spilled as a run into an anonymous temporary file. `finish` merges the
//! runs with a k-way heap and delivers every vertex exactly once in global
//! order. Runs live in unlinked temp files, so they disappear when the
//! sorter is dropped, error paths included.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::io::{BufReader, BufWriter, Read, Seek, SeekFrom, Write};

use crate::hilbert::HilbertMapper;
use crate::storage::page::VertexRecord;
use crate::types::{DiasError, Result};

const KEY_LEN: usize = 16;

/// External sorter keyed by `(hilbert_key, vertex_id)`.
pub struct ExternalSorter {
    mapper: HilbertMapper,
    budget: usize,
    buffer: Vec<(u128, VertexRecord)>,
    runs: Vec<BufReader<std::fs::File>>,
}

impl ExternalSorter {
    /// `records_in_memory` bounds the buffered run size; the original build
    /// used buckets of four million records.
    pub fn new(mapper: HilbertMapper, records_in_memory: usize) -> Self {
        Self {
            mapper,
            budget: records_in_memory.max(1),
            buffer: Vec::new(),
            runs: Vec::new(),
        }
    }

    pub fn insert(&mut self, record: VertexRecord) -> Result<()> {
        let key = self.mapper.key(&record.coords);
        self.buffer.push((key, record));
        if self.buffer.len() >= self.budget {
            self.spill_run()?;
        }
        Ok(())
    }

    /// Merges all runs and feeds `sink` in sorted order. Consumes the
    /// sorter; run files are released on return.
    pub fn finish(mut self, mut sink: impl FnMut(VertexRecord) -> Result<()>) -> Result<u64> {
        let mut count = 0u64;

        if self.runs.is_empty() {
            // Everything fit in memory: no merge needed.
            self.sort_buffer();
            for (_, record) in self.buffer.drain(..) {
                sink(record)?;
                count += 1;
            }
            return Ok(count);
        }

        if !self.buffer.is_empty() {
            self.spill_run()?;
        }

        let mut heap: BinaryHeap<HeapEntry> = BinaryHeap::with_capacity(self.runs.len());
        for (run, reader) in self.runs.iter_mut().enumerate() {
            if let Some((key, record)) = read_run_record(reader)? {
                heap.push(HeapEntry { key, record, run });
            }
        }
        while let Some(HeapEntry { key: _, record, run }) = heap.pop() {
            sink(record)?;
            count += 1;
            if let Some((key, record)) = read_run_record(&mut self.runs[run])? {
                heap.push(HeapEntry { key, record, run });
            }
        }
        Ok(count)
    }

    fn sort_buffer(&mut self) {
        self.buffer
            .sort_unstable_by(|a, b| a.0.cmp(&b.0).then(a.1.id.cmp(&b.1.id)));
    }

    fn spill_run(&mut self) -> Result<()> {
        self.sort_buffer();
        let file = tempfile::tempfile()?;
        let mut writer = BufWriter::new(file);
        let mut scratch = Vec::new();
        for (key, record) in self.buffer.drain(..) {
            writer.write_all(&key.to_le_bytes())?;
            scratch.clear();
            record.encode(&mut scratch);
            writer.write_all(&scratch)?;
        }
        let mut file = writer
            .into_inner()
            .map_err(|e| DiasError::Io(e.into_error()))?;
        file.seek(SeekFrom::Start(0))?;
        self.runs.push(BufReader::new(file));
        Ok(())
    }
}

struct HeapEntry {
    key: u128,
    record: VertexRecord,
    run: usize,
}

impl PartialEq for HeapEntry {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key && self.record.id == other.record.id
    }
}

impl Eq for HeapEntry {}

impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for HeapEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // BinaryHeap is a max-heap; invert for ascending delivery.
        self.key
            .cmp(&other.key)
            .then(self.record.id.cmp(&other.record.id))
            .reverse()
    }
}

/// Reads one `key + record` frame from a run, `None` at end of run.
fn read_run_record(reader: &mut BufReader<std::fs::File>) -> Result<Option<(u128, VertexRecord)>> {
    let mut key_buf = [0u8; KEY_LEN];
    match reader.read_exact(&mut key_buf) {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(DiasError::Io(e)),
    }
    let key = u128::from_le_bytes(key_buf);

    let mut size_buf = [0u8; 4];
    reader.read_exact(&mut size_buf)?;
    let size = u32::from_le_bytes(size_buf) as usize;
    if size < 4 {
        return Err(DiasError::Corruption("sort run: record size underflow".into()));
    }
    let mut record_buf = vec![0u8; size];
    record_buf[..4].copy_from_slice(&size_buf);
    reader.read_exact(&mut record_buf[4..])?;
    let (record, consumed) = VertexRecord::decode(&record_buf)?;
    debug_assert_eq!(consumed, size);
    Ok(Some((key, record)))
}
