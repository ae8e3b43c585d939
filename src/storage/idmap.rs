//! External B+-tree mapping vertex ids to graph page ids.
//!
//! Populated while pages are packed and consulted heavily during the link
//! rewrite pass. Keys are unique `u32` vertex ids; values are page ids
//! widened to `u64` so the map can address any offset of the graph file.
//! The header lives on page 0; reopening reconstructs the tree from the
//! header alone.

use std::convert::TryInto;
use std::path::Path;

use rustc_hash::FxHashMap;

use crate::primitives::pagefile::PageFile;
use crate::types::{DiasError, PageId, Result, VertexId};

const MAP_MAGIC: [u8; 4] = *b"DIAB";
const MAP_VERSION: u32 = 1;
const HEADER_CRC_OFFSET: usize = 28;

const KIND_LEAF: u8 = 1;
const KIND_BRANCH: u8 = 2;
const NODE_HEADER_LEN: usize = 8;
const LEAF_ENTRY_LEN: usize = 12; // u32 key + u64 value
const BRANCH_ENTRY_LEN: usize = 8; // u32 separator + u32 child
const NO_LEAF: u32 = u32::MAX;

/// Decoded nodes are memoized in a small map that is simply cleared when it
/// grows past this bound; every modification is written through, so the
/// cache is never dirty.
const NODE_CACHE_LIMIT: usize = 4096;

#[derive(Clone, Debug)]
enum Node {
    Leaf {
        keys: Vec<u32>,
        values: Vec<u64>,
        next: u32,
    },
    Branch {
        keys: Vec<u32>,
        children: Vec<u32>,
    },
}

/// The persistent vertex-id → page-id map.
#[derive(Debug)]
pub struct IdMap {
    file: PageFile,
    root: u32,
    height: u32,
    key_count: u64,
    leaf_cap: usize,
    branch_cap: usize,
    cache: FxHashMap<u32, Node>,
}

impl IdMap {
    pub fn create(path: impl AsRef<Path>, page_size: usize) -> Result<Self> {
        let (leaf_cap, branch_cap) = capacities(page_size)?;
        let mut file = PageFile::create(path, page_size)?;
        file.append_page(&vec![0u8; page_size])?; // header, rewritten by flush
        let mut map = Self {
            file,
            root: 0,
            height: 1,
            key_count: 0,
            leaf_cap,
            branch_cap,
            cache: FxHashMap::default(),
        };
        let root = map.append_node(&Node::Leaf {
            keys: Vec::new(),
            values: Vec::new(),
            next: NO_LEAF,
        })?;
        map.root = root;
        map.flush()?;
        Ok(map)
    }

    pub fn open(path: impl AsRef<Path>, page_size: usize, writable: bool) -> Result<Self> {
        let (leaf_cap, branch_cap) = capacities(page_size)?;
        let file = PageFile::open(path, page_size, writable)?;
        let mut header = vec![0u8; page_size];
        file.read_page(PageId(0), &mut header)?;
        if header[0..4] != MAP_MAGIC {
            return Err(DiasError::Corruption("id map: bad magic".into()));
        }
        let version = read_u32(&header, 4);
        if version != MAP_VERSION {
            return Err(DiasError::Corruption(format!(
                "id map: unsupported version {version}"
            )));
        }
        let stored_page_size = read_u32(&header, 8) as usize;
        if stored_page_size != page_size {
            return Err(DiasError::Corruption(format!(
                "id map: page size mismatch (file {stored_page_size}, expected {page_size})"
            )));
        }
        let root = read_u32(&header, 12);
        let height = read_u32(&header, 16);
        let key_count = u64::from_le_bytes(header[20..28].try_into().unwrap());
        let crc = read_u32(&header, HEADER_CRC_OFFSET);
        if crc != crc32fast::hash(&header[..HEADER_CRC_OFFSET]) {
            return Err(DiasError::Corruption("id map: header checksum mismatch".into()));
        }
        Ok(Self {
            file,
            root,
            height,
            key_count,
            leaf_cap,
            branch_cap,
            cache: FxHashMap::default(),
        })
    }

    pub fn key_count(&self) -> u64 {
        self.key_count
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// Persists the header and syncs the file.
    pub fn flush(&mut self) -> Result<()> {
        let page_size = self.file.page_size();
        let mut header = vec![0u8; page_size];
        header[0..4].copy_from_slice(&MAP_MAGIC);
        header[4..8].copy_from_slice(&MAP_VERSION.to_le_bytes());
        header[8..12].copy_from_slice(&(page_size as u32).to_le_bytes());
        header[12..16].copy_from_slice(&self.root.to_le_bytes());
        header[16..20].copy_from_slice(&self.height.to_le_bytes());
        header[20..28].copy_from_slice(&self.key_count.to_le_bytes());
        let crc = crc32fast::hash(&header[..HEADER_CRC_OFFSET]);
        header[HEADER_CRC_OFFSET..HEADER_CRC_OFFSET + 4].copy_from_slice(&crc.to_le_bytes());
        self.file.write_page(PageId(0), &header)?;
        self.file.sync()
    }

    /// Inserts a mapping. Keys are unique by construction; a duplicate
    /// insert means the packer placed one vertex on two pages.
    pub fn insert(&mut self, vertex: VertexId, page: PageId) -> Result<()> {
        if let Some((sep, right)) = self.insert_into(self.root, self.height, vertex.0, page.as_u64())? {
            let new_root = self.append_node(&Node::Branch {
                keys: vec![sep],
                children: vec![self.root, right],
            })?;
            self.root = new_root;
            self.height += 1;
        }
        self.key_count += 1;
        Ok(())
    }

    /// Returns the page id owning `vertex`.
    pub fn point_query(&mut self, vertex: VertexId) -> Result<PageId> {
        let mut page = self.root;
        let mut level = self.height;
        loop {
            let node = self.read_node(page)?;
            match node {
                Node::Branch { keys, children } => {
                    if level <= 1 {
                        return Err(DiasError::Corruption(
                            "id map: branch node at leaf level".into(),
                        ));
                    }
                    let idx = keys.partition_point(|&k| k <= vertex.0);
                    page = children[idx];
                    level -= 1;
                }
                Node::Leaf { keys, values, .. } => {
                    if level != 1 {
                        return Err(DiasError::Corruption(
                            "id map: leaf node above leaf level".into(),
                        ));
                    }
                    return match keys.binary_search(&vertex.0) {
                        Ok(i) => PageId::from_u64(values[i]),
                        Err(_) => Err(DiasError::NotFound(format!(
                            "vertex {vertex} not in id map"
                        ))),
                    };
                }
            }
        }
    }

    /// Ordered key-value pairs with `lo <= key <= hi`.
    pub fn range_query(&mut self, lo: VertexId, hi: VertexId) -> Result<Vec<(VertexId, PageId)>> {
        let mut out = Vec::new();
        if lo > hi {
            return Ok(out);
        }
        // Descend to the leaf that would contain `lo`.
        let mut page = self.root;
        let mut level = self.height;
        while level > 1 {
            match self.read_node(page)? {
                Node::Branch { keys, children } => {
                    let idx = keys.partition_point(|&k| k <= lo.0);
                    page = children[idx];
                    level -= 1;
                }
                Node::Leaf { .. } => {
                    return Err(DiasError::Corruption(
                        "id map: leaf node above leaf level".into(),
                    ))
                }
            }
        }
        let mut current = page;
        loop {
            let (keys, values, next) = match self.read_node(current)? {
                Node::Leaf { keys, values, next } => (keys, values, next),
                Node::Branch { .. } => {
                    return Err(DiasError::Corruption(
                        "id map: branch node at leaf level".into(),
                    ))
                }
            };
            let start = keys.partition_point(|&k| k < lo.0);
            for i in start..keys.len() {
                if keys[i] > hi.0 {
                    return Ok(out);
                }
                out.push((VertexId(keys[i]), PageId::from_u64(values[i])?));
            }
            if next == NO_LEAF {
                return Ok(out);
            }
            current = next;
        }
    }

    fn insert_into(
        &mut self,
        page: u32,
        level: u32,
        key: u32,
        value: u64,
    ) -> Result<Option<(u32, u32)>> {
        let node = self.read_node(page)?;
        match node {
            Node::Leaf {
                mut keys,
                mut values,
                next,
            } => {
                if level != 1 {
                    return Err(DiasError::Corruption(
                        "id map: leaf node above leaf level".into(),
                    ));
                }
                let idx = match keys.binary_search(&key) {
                    Ok(_) => {
                        return Err(DiasError::Corruption(format!(
                            "id map: duplicate insert of vertex {key}"
                        )))
                    }
                    Err(i) => i,
                };
                keys.insert(idx, key);
                values.insert(idx, value);
                if keys.len() <= self.leaf_cap {
                    self.write_node(page, &Node::Leaf { keys, values, next })?;
                    return Ok(None);
                }
                let mid = keys.len() / 2;
                let right_keys = keys.split_off(mid);
                let right_values = values.split_off(mid);
                let sep = right_keys[0];
                let right = self.append_node(&Node::Leaf {
                    keys: right_keys,
                    values: right_values,
                    next,
                })?;
                self.write_node(
                    page,
                    &Node::Leaf {
                        keys,
                        values,
                        next: right,
                    },
                )?;
                Ok(Some((sep, right)))
            }
            Node::Branch {
                mut keys,
                mut children,
            } => {
                if level <= 1 {
                    return Err(DiasError::Corruption(
                        "id map: branch node at leaf level".into(),
                    ));
                }
                let idx = keys.partition_point(|&k| k <= key);
                let child = children[idx];
                let split = self.insert_into(child, level - 1, key, value)?;
                let Some((sep, right)) = split else {
                    return Ok(None);
                };
                keys.insert(idx, sep);
                children.insert(idx + 1, right);
                if keys.len() <= self.branch_cap {
                    self.write_node(page, &Node::Branch { keys, children })?;
                    return Ok(None);
                }
                let mid = keys.len() / 2;
                let promoted = keys[mid];
                let right_keys = keys.split_off(mid + 1);
                keys.pop(); // the promoted separator moves up
                let right_children = children.split_off(mid + 1);
                let right_page = self.append_node(&Node::Branch {
                    keys: right_keys,
                    children: right_children,
                })?;
                self.write_node(page, &Node::Branch { keys, children })?;
                Ok(Some((promoted, right_page)))
            }
        }
    }

    fn read_node(&mut self, page: u32) -> Result<Node> {
        if let Some(node) = self.cache.get(&page) {
            return Ok(node.clone());
        }
        let mut buf = vec![0u8; self.file.page_size()];
        self.file.read_page(PageId(page), &mut buf)?;
        let node = decode_node(&buf, self.leaf_cap.max(self.branch_cap))?;
        self.remember(page, node.clone());
        Ok(node)
    }

    fn write_node(&mut self, page: u32, node: &Node) -> Result<()> {
        let buf = encode_node(node, self.file.page_size())?;
        self.file.write_page(PageId(page), &buf)?;
        self.remember(page, node.clone());
        Ok(())
    }

    fn append_node(&mut self, node: &Node) -> Result<u32> {
        let buf = encode_node(node, self.file.page_size())?;
        let page = self.file.append_page(&buf)?;
        self.remember(page.0, node.clone());
        Ok(page.0)
    }

    fn remember(&mut self, page: u32, node: Node) {
        if self.cache.len() >= NODE_CACHE_LIMIT {
            self.cache.clear();
        }
        self.cache.insert(page, node);
    }
}

fn capacities(page_size: usize) -> Result<(usize, usize)> {
    let leaf_cap = page_size.saturating_sub(NODE_HEADER_LEN) / LEAF_ENTRY_LEN;
    let branch_cap = page_size.saturating_sub(NODE_HEADER_LEN + 4) / BRANCH_ENTRY_LEN;
    if leaf_cap < 2 || branch_cap < 2 {
        return Err(DiasError::Invalid("page size too small for id map nodes"));
    }
    Ok((leaf_cap, branch_cap))
}

fn encode_node(node: &Node, page_size: usize) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(page_size);
    match node {
        Node::Leaf { keys, values, next } => {
            out.push(KIND_LEAF);
            out.push(0);
            out.extend_from_slice(&(keys.len() as u16).to_le_bytes());
            out.extend_from_slice(&next.to_le_bytes());
            for (k, v) in keys.iter().zip(values) {
                out.extend_from_slice(&k.to_le_bytes());
                out.extend_from_slice(&v.to_le_bytes());
            }
        }
        Node::Branch { keys, children } => {
            out.push(KIND_BRANCH);
            out.push(0);
            out.extend_from_slice(&(keys.len() as u16).to_le_bytes());
            out.extend_from_slice(&children[0].to_le_bytes());
            for (k, c) in keys.iter().zip(&children[1..]) {
                out.extend_from_slice(&k.to_le_bytes());
                out.extend_from_slice(&c.to_le_bytes());
            }
        }
    }
    if out.len() > page_size {
        return Err(DiasError::Corruption(
            "id map: node exceeds page size".into(),
        ));
    }
    out.resize(page_size, 0);
    Ok(out)
}

fn decode_node(buf: &[u8], cap_bound: usize) -> Result<Node> {
    let kind = buf[0];
    let count = u16::from_le_bytes(buf[2..4].try_into().unwrap()) as usize;
    if count > cap_bound + 1 {
        return Err(DiasError::Corruption(format!(
            "id map: node entry count {count} exceeds capacity"
        )));
    }
    match kind {
        KIND_LEAF => {
            let next = read_u32(buf, 4);
            let mut keys = Vec::with_capacity(count);
            let mut values = Vec::with_capacity(count);
            let mut off = NODE_HEADER_LEN;
            if NODE_HEADER_LEN + count * LEAF_ENTRY_LEN > buf.len() {
                return Err(DiasError::Corruption("id map: leaf overruns page".into()));
            }
            for _ in 0..count {
                keys.push(read_u32(buf, off));
                values.push(u64::from_le_bytes(buf[off + 4..off + 12].try_into().unwrap()));
                off += LEAF_ENTRY_LEN;
            }
            Ok(Node::Leaf { keys, values, next })
        }
        KIND_BRANCH => {
            if NODE_HEADER_LEN + count * BRANCH_ENTRY_LEN > buf.len() {
                return Err(DiasError::Corruption("id map: branch overruns page".into()));
            }
            let mut keys = Vec::with_capacity(count);
            let mut children = Vec::with_capacity(count + 1);
            children.push(read_u32(buf, 4));
            let mut off = NODE_HEADER_LEN;
            for _ in 0..count {
                keys.push(read_u32(buf, off));
                children.push(read_u32(buf, off + 4));
                off += BRANCH_ENTRY_LEN;
            }
            Ok(Node::Branch { keys, children })
        }
        other => Err(DiasError::Corruption(format!(
            "id map: unknown node kind {other}"
        ))),
    }
}

fn read_u32(buf: &[u8], off: usize) -> u32 {
    u32::from_le_bytes(buf[off..off + 4].try_into().unwrap())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::collections::BTreeMap;
    use tempfile::tempdir;

    #[test]
    fn insert_and_point_query() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("idx_btree");
        let mut map = IdMap::create(&path, 256).unwrap();
        for i in 1..=500u32 {
            map.insert(VertexId(i), PageId(i * 3)).unwrap();
        }
        map.flush().unwrap();
        for i in 1..=500u32 {
            assert_eq!(map.point_query(VertexId(i)).unwrap(), PageId(i * 3));
        }
        assert!(matches!(
            map.point_query(VertexId(501)),
            Err(DiasError::NotFound(_))
        ));
        assert_eq!(map.key_count(), 500);
        assert!(map.height() > 1, "small pages must have forced splits");
    }

    #[test]
    fn duplicate_insert_is_corruption() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("idx_btree");
        let mut map = IdMap::create(&path, 256).unwrap();
        map.insert(VertexId(7), PageId(1)).unwrap();
        assert!(matches!(
            map.insert(VertexId(7), PageId(2)),
            Err(DiasError::Corruption(_))
        ));
    }

    #[test]
    fn range_query_is_ordered_and_bounded() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("idx_btree");
        let mut map = IdMap::create(&path, 256).unwrap();
        // Insert in a scrambled order.
        for i in (1..=300u32).rev() {
            map.insert(VertexId(i * 2), PageId(i)).unwrap();
        }
        let got = map.range_query(VertexId(100), VertexId(140)).unwrap();
        let expected: Vec<(VertexId, PageId)> = (50..=70u32)
            .map(|i| (VertexId(i * 2), PageId(i)))
            .collect();
        assert_eq!(got, expected);
        assert!(map
            .range_query(VertexId(10), VertexId(5))
            .unwrap()
            .is_empty());
    }

    #[test]
    fn reopen_reconstructs_from_header() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("idx_btree");
        {
            let mut map = IdMap::create(&path, 512).unwrap();
            for i in 1..=2000u32 {
                map.insert(VertexId(i), PageId(i % 97)).unwrap();
            }
            map.flush().unwrap();
        }
        let mut reopened = IdMap::open(&path, 512, false).unwrap();
        assert_eq!(reopened.key_count(), 2000);
        for i in (1..=2000u32).step_by(37) {
            assert_eq!(reopened.point_query(VertexId(i)).unwrap(), PageId(i % 97));
        }
    }

    #[test]
    fn open_rejects_wrong_page_size() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("idx_btree");
        {
            let mut map = IdMap::create(&path, 512).unwrap();
            map.insert(VertexId(1), PageId(1)).unwrap();
            map.flush().unwrap();
        }
        assert!(IdMap::open(&path, 512, false).is_ok());
        // A different page size fails fast: either the length check or the
        // header check trips.
        assert!(IdMap::open(&path, 256, false).is_err());
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(16))]
        #[test]
        fn matches_btreemap_model(
            keys in proptest::collection::hash_set(1u32..100_000, 1..400)
        ) {
            let dir = tempdir().unwrap();
            let path = dir.path().join("idx_btree");
            let mut map = IdMap::create(&path, 256).unwrap();
            let mut model = BTreeMap::new();
            for &k in &keys {
                map.insert(VertexId(k), PageId(k.wrapping_mul(7))).unwrap();
                model.insert(k, k.wrapping_mul(7));
            }
            let got = map.range_query(VertexId(0), VertexId(u32::MAX)).unwrap();
            let expected: Vec<(VertexId, PageId)> =
                model.iter().map(|(&k, &v)| (VertexId(k), PageId(v))).collect();
            prop_assert_eq!(got, expected);
        }
    }
}
