//! # dias: external-memory spatial range queries over 3D point sets
//!
//! `dias` bulk-builds a two-structure spatial access method over massive
//! Delaunay-tetrahedralized point clouds (neuron-morphology scale): a small
//! seed R-tree plus a paginated neighbourhood graph whose pages carry
//! per-vertex Voronoi MBRs and inter-page links. A range query "seeds"
//! into the graph through the R-tree, then crawls adjacent pages, pruning
//! every page whose Voronoi-union MBR misses the query box.
//!
//! ## Quick start
//!
//! ```no_run
//! use dias::build::{build_index, BuildOptions};
//! use dias::query::workload::SpatialQuery;
//! use dias::query::{EngineKind, FlatIndex, QueryRunner};
//! use dias::geometry::{Box3, Vertex};
//! use dias::storage::IndexPaths;
//!
//! let paths = IndexPaths::new("/data/circuit");
//! build_index("/data/circuit.sva", &paths, &BuildOptions::default())?;
//!
//! let index = FlatIndex::open(&paths)?;
//! let mut runner = QueryRunner::new(index, EngineKind::Exact, 1024, 2);
//! let query = SpatialQuery::range(Box3::new(
//!     Vertex::new(0.0, 0.0, 0.0),
//!     Vertex::new(10.0, 10.0, 10.0),
//! ));
//! let (points, stats) = runner.execute(&query)?;
//! println!("{} points, {} page reads", points.len(), stats.total_ios());
//! # Ok::<(), dias::types::DiasError>(())
//! ```
//!
//! ## Architecture
//!
//! - **Build** (`build`): stream parse → external Hilbert sort → page
//!   packing with intra-page link shrinking → link rewrite + metadata +
//!   seed-tree bulk load. Three sequential passes, bounded memory.
//! - **Storage** (`storage`, `primitives`): fixed-size page files; the
//!   graph page format, the id-map B+-tree, the paged metadata store.
//! - **Query** (`query`, `seed`): seeding through either of two R-tree
//!   constructions, then a breadth-first page crawl with Voronoi-MBR
//!   pruning; an optional prefetching crawler with identical results.

pub mod build;
pub mod cli;
pub mod geometry;
pub mod hilbert;
pub mod primitives;
pub mod query;
pub mod seed;
pub mod storage;
pub mod types;

pub use crate::build::{build_index, BuildOptions, BuildSummary, PackerKind, SeedBuilderKind};
pub use crate::query::{EngineKind, FlatIndex, QueryRunner};
pub use crate::storage::IndexPaths;
pub use crate::types::{DiasError, PageId, Result, VertexId};
