//! A vertex whose shrunk record cannot fit one page must fail the build
//! with a corruption error at pack time, not silent truncation.
#![allow(missing_docs)]

mod common;

use std::fmt::Write as _;

use dias::build::{BuildOptions, PackerKind};
use dias::types::DiasError;

use common::build_fixture;

/// One hub vertex sharing a tetrahedron with `3 * tets` distinct partners:
/// the hub collects three new neighbours per tetrahedron.
fn hub_stream(tets: u32) -> String {
    let mut out = String::new();
    writeln!(out, "v 0 0 0").unwrap();
    let partners = 3 * tets;
    for i in 0..partners {
        let angle = f64::from(i) * 0.7;
        writeln!(
            out,
            "v {:.3} {:.3} {:.3}",
            angle.cos() * 50.0,
            angle.sin() * 50.0,
            f64::from(i) * 0.1
        )
        .unwrap();
    }
    for t in 0..tets {
        let a = 2 + 3 * t;
        writeln!(out, "c 1 {} {} {}", a, a + 1, a + 2).unwrap();
    }
    out
}

#[test]
fn oversized_record_fails_flat_packing() {
    // 200 neighbours cannot shrink below 44 + 200 * 4 bytes even with a
    // generous share of them elided; a 256-byte page can never take it.
    let opts = BuildOptions {
        page_size: 256,
        packer: PackerKind::Flat,
        chunk_size: 100,
        sort_budget: 100,
        ..BuildOptions::default()
    };
    let err = build_fixture(&hub_stream(67), &opts).unwrap_err();
    assert!(
        matches!(err, DiasError::Corruption(_)),
        "expected pack-time corruption, got {err:?}"
    );
}

#[test]
fn oversized_record_fails_halt_packing() {
    let opts = BuildOptions {
        page_size: 256,
        packer: PackerKind::Halt,
        chunk_size: 100,
        sort_budget: 100,
        ..BuildOptions::default()
    };
    let err = build_fixture(&hub_stream(67), &opts).unwrap_err();
    assert!(
        matches!(err, DiasError::Corruption(_)),
        "expected pack-time corruption, got {err:?}"
    );
}

#[test]
fn moderate_hub_still_builds() {
    // A dozen neighbours fit comfortably: the same shape below the
    // threshold must build cleanly.
    let opts = BuildOptions {
        page_size: 256,
        packer: PackerKind::Flat,
        chunk_size: 100,
        sort_budget: 100,
        ..BuildOptions::default()
    };
    let (_dir, _paths, summary) = build_fixture(&hub_stream(4), &opts).unwrap();
    assert_eq!(summary.vertices, 13);
}
