//! Structural invariants of a finished build: page budgets, single-page
//! containment, link closure, Voronoi-MBR dominance, id-map bijection,
//! and byte-identical page round trips.
#![allow(missing_docs)]

mod common;

use dias::build::{BuildOptions, PackerKind};
use dias::geometry::Box3;
use dias::primitives::pagefile::PageFile;
use dias::storage::idmap::IdMap;
use dias::storage::meta::MetaStore;
use dias::storage::page::{decode_page, encode_page};
use dias::types::{PageId, VertexId};
use rustc_hash::FxHashSet;

use common::{build_fixture, grid_stream};

const PAGE_SIZE: usize = 512;

fn small_grid_options(packer: PackerKind) -> BuildOptions {
    BuildOptions {
        page_size: PAGE_SIZE,
        packer,
        chunk_size: 200,
        sort_budget: 128,
        ..BuildOptions::default()
    }
}

fn check_build(packer: PackerKind) {
    let n = 6;
    let (_dir, paths, summary) =
        build_fixture(&grid_stream(n), &small_grid_options(packer)).unwrap();
    assert_eq!(summary.vertices, u64::from(n * n * n));
    assert!(summary.pages > 1, "grid must span several pages");

    let graph = PageFile::open(paths.graph(), PAGE_SIZE, false).unwrap();
    let mut idmap = IdMap::open(paths.btree(), PAGE_SIZE, false).unwrap();
    let meta = MetaStore::open(paths.meta(), PAGE_SIZE).unwrap();
    assert_eq!(graph.num_pages(), summary.pages);
    assert_eq!(meta.num_entries(), summary.pages);
    assert_eq!(idmap.key_count(), summary.vertices);

    let mut buf = vec![0u8; PAGE_SIZE];
    let mut seen_vertices: FxHashSet<u32> = FxHashSet::default();
    for p in 0..graph.num_pages() {
        graph.read_page(PageId(p), &mut buf).unwrap();
        let records = decode_page(&buf).unwrap();
        assert!(!records.is_empty(), "page {p} is empty");

        // Page-size invariant: records plus header fit the budget.
        let used: usize = 4 + records.iter().map(|r| r.encoded_len()).sum::<usize>();
        assert!(used <= PAGE_SIZE, "page {p} overflows: {used}");

        // Round-trip: decode then re-encode reproduces the page bytes.
        let reencoded = encode_page(&records, PAGE_SIZE).unwrap();
        assert_eq!(reencoded, buf, "page {p} does not round-trip");

        let entry = meta.lookup(PageId(p)).unwrap();
        assert_eq!(entry.page_id, PageId(p));
        assert!(
            Box3::contains(&entry.partition_mbr, &entry.page_mbr),
            "partition MBR of page {p} does not dominate its page MBR"
        );

        let link_set: FxHashSet<u32> = entry.links.iter().map(|l| l.0).collect();
        for record in &records {
            // Single-page containment + id-map bijection.
            assert!(
                seen_vertices.insert(record.id.0),
                "vertex {} stored twice",
                record.id
            );
            assert_eq!(idmap.point_query(record.id).unwrap(), PageId(p));

            // Voronoi-MBR dominance.
            if !record.vmbr.is_empty() {
                assert!(
                    Box3::contains(&entry.partition_mbr, &record.vmbr),
                    "voronoi MBR of vertex {} escapes partition MBR of page {p}",
                    record.id
                );
            }

            // After the rewrite pass every link slot holds a page id of
            // another page, and it is in the metadata link set.
            for &link in &record.links {
                assert_ne!(link, p, "self link on page {p}");
                assert!(link < graph.num_pages(), "dangling link {link}");
                assert!(link_set.contains(&link), "link {link} missing from metadata");
            }
        }

        // Link closure: every metadata link exists and is not the page itself.
        for &link in &link_set {
            assert_ne!(link, p);
            assert!(link < graph.num_pages());
        }
    }
    assert_eq!(seen_vertices.len() as u64, summary.vertices);

    // Id-map totality: ids 1..=N resolve, 0 and N+1 do not.
    let n_total = summary.vertices as u32;
    assert!(idmap.point_query(VertexId(0)).is_err());
    assert!(idmap.point_query(VertexId(n_total + 1)).is_err());
    let all = idmap.range_query(VertexId(1), VertexId(n_total)).unwrap();
    assert_eq!(all.len() as u64, summary.vertices);
}

#[test]
fn flat_build_upholds_structural_invariants() {
    check_build(PackerKind::Flat);
}

#[test]
fn halt_build_upholds_structural_invariants() {
    check_build(PackerKind::Halt);
}

#[test]
fn build_reports_tetrahedra_and_links() {
    let n = 4;
    let (_dir, _paths, summary) =
        build_fixture(&grid_stream(n), &small_grid_options(PackerKind::Flat)).unwrap();
    let cubes = u64::from((n - 1) * (n - 1) * (n - 1));
    assert_eq!(summary.tetrahedra, cubes * 6);
    assert!(summary.links > 0, "a multi-page graph must have links");
}
