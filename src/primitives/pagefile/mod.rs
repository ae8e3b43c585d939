#![forbid(unsafe_code)]
//! Fixed-size page file: the storage unit under the graph file, the id map,
//! the metadata store, and the seed tree.

use std::path::Path;

use crate::types::{DiasError, PageId, Result};

use super::io::{FileIo, StdFileIo};

/// Default page size in bytes, shared by every index file.
pub const DEFAULT_PAGE_SIZE: usize = 4096;

/// A file made of equally sized pages addressed by [`PageId`].
///
/// Pages are appended densely from id 0; nothing in this layer interprets
/// the page contents.
#[derive(Debug)]
pub struct PageFile {
    io: StdFileIo,
    page_size: usize,
    num_pages: u32,
}

impl PageFile {
    /// Creates a new, empty page file, truncating any previous content.
    pub fn create(path: impl AsRef<Path>, page_size: usize) -> Result<Self> {
        if page_size < 8 {
            return Err(DiasError::Invalid("page size too small"));
        }
        let io = StdFileIo::create(path)?;
        Ok(Self {
            io,
            page_size,
            num_pages: 0,
        })
    }

    /// Opens an existing page file and validates its length.
    pub fn open(path: impl AsRef<Path>, page_size: usize, writable: bool) -> Result<Self> {
        let io = if writable {
            StdFileIo::open_rw(&path)?
        } else {
            StdFileIo::open_ro(&path)?
        };
        let len = io.len()?;
        if page_size < 8 {
            return Err(DiasError::Invalid("page size too small"));
        }
        if len % page_size as u64 != 0 {
            return Err(DiasError::Corruption(format!(
                "file length {len} is not a multiple of page size {page_size}"
            )));
        }
        let num_pages = u32::try_from(len / page_size as u64)
            .map_err(|_| DiasError::Corruption("page count exceeds u32".into()))?;
        Ok(Self {
            io,
            page_size,
            num_pages,
        })
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    /// Number of pages currently in the file.
    pub fn num_pages(&self) -> u32 {
        self.num_pages
    }

    fn offset_of(&self, page: PageId) -> Result<u64> {
        if page.0 >= self.num_pages {
            return Err(DiasError::Corruption(format!(
                "page {page} beyond end of file ({} pages)",
                self.num_pages
            )));
        }
        Ok(u64::from(page.0) * self.page_size as u64)
    }

    /// Reads one page into `dst`, which must be exactly one page long.
    pub fn read_page(&self, page: PageId, dst: &mut [u8]) -> Result<()> {
        if dst.len() != self.page_size {
            return Err(DiasError::Invalid("read buffer is not one page"));
        }
        let off = self.offset_of(page)?;
        self.io.read_at(off, dst)
    }

    /// Overwrites an existing page in place.
    pub fn write_page(&mut self, page: PageId, src: &[u8]) -> Result<()> {
        if src.len() != self.page_size {
            return Err(DiasError::Invalid("write buffer is not one page"));
        }
        let off = self.offset_of(page)?;
        self.io.write_at(off, src)
    }

    /// Appends a new page and returns its id.
    pub fn append_page(&mut self, src: &[u8]) -> Result<PageId> {
        if src.len() != self.page_size {
            return Err(DiasError::Invalid("write buffer is not one page"));
        }
        let page = PageId(self.num_pages);
        let off = u64::from(page.0) * self.page_size as u64;
        self.io.write_at(off, src)?;
        self.num_pages += 1;
        Ok(page)
    }

    pub fn sync(&self) -> Result<()> {
        self.io.sync_all()
    }
}
