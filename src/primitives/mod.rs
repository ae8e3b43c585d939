//! Low-level file plumbing shared by every on-disk structure.
//!
//! The index is read-only after a bulk build, so this layer is deliberately
//! small: positioned file I/O and a fixed-size page file on top of it.

pub mod io;
pub mod pagefile;
