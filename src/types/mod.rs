#![forbid(unsafe_code)]
//! Shared identifiers and the crate-wide error type.

use std::fmt;

use thiserror::Error;

/// Identifier of a vertex in the Delaunay stream, assigned in stream order
/// starting at 1.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug)]
pub struct VertexId(pub u32);

/// Identifier of a fixed-size page in one of the index files. Graph pages
/// are numbered densely from 0 in write order.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug)]
pub struct PageId(pub u32);

#[derive(Error, Debug)]
pub enum DiasError {
    #[error("I/O: {0}")]
    Io(#[from] std::io::Error),
    #[error("parse error: {0}")]
    Parse(String),
    #[error("corruption: {0}")]
    Corruption(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("invalid argument: {0}")]
    Invalid(&'static str),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, DiasError>;

impl fmt::Display for VertexId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for PageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u32> for VertexId {
    fn from(value: u32) -> Self {
        VertexId(value)
    }
}

impl From<VertexId> for u32 {
    fn from(value: VertexId) -> Self {
        value.0
    }
}

impl From<u32> for PageId {
    fn from(value: u32) -> Self {
        PageId(value)
    }
}

impl From<PageId> for u32 {
    fn from(value: PageId) -> Self {
        value.0
    }
}

impl PageId {
    /// Widened form stored as the value type of the id map, large enough to
    /// address any offset of the graph file.
    pub fn as_u64(self) -> u64 {
        u64::from(self.0)
    }

    /// Narrows an id-map value back to a page id, rejecting values that
    /// cannot refer to a page of the graph file.
    pub fn from_u64(raw: u64) -> Result<Self> {
        u32::try_from(raw)
            .map(PageId)
            .map_err(|_| DiasError::Corruption(format!("page id {raw} out of range")))
    }
}
