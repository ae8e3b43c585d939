#![forbid(unsafe_code)]

use std::{fs::File, path::Path, sync::Arc};

use crate::types::{DiasError, Result};

/// Trait for performing positioned file I/O operations.
pub trait FileIo {
    /// Reads bytes from the file at the specified offset into the buffer.
    fn read_at(&self, off: u64, dst: &mut [u8]) -> Result<()>;
    /// Writes bytes to the file at the specified offset from the buffer.
    fn write_at(&self, off: u64, src: &[u8]) -> Result<()>;
    /// Synchronizes all file data and metadata to disk.
    fn sync_all(&self) -> Result<()>;
    /// Returns the current length of the file in bytes.
    fn len(&self) -> Result<u64>;
    /// Returns true if the file is empty.
    fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }
}

#[cfg(unix)]
mod stdio {
    use std::{
        fs::File,
        io::{self, ErrorKind},
        os::unix::fs::FileExt,
    };

    pub fn read_exact(file: &File, mut off: u64, mut dst: &mut [u8]) -> io::Result<()> {
        while !dst.is_empty() {
            let read = file.read_at(dst, off)?;
            if read == 0 {
                return Err(io::Error::new(
                    ErrorKind::UnexpectedEof,
                    "read_at reached EOF",
                ));
            }
            let (_, tail) = dst.split_at_mut(read);
            dst = tail;
            off += read as u64;
        }
        Ok(())
    }

    pub fn write_all(file: &File, mut off: u64, mut src: &[u8]) -> io::Result<()> {
        while !src.is_empty() {
            let written = file.write_at(src, off)?;
            if written == 0 {
                return Err(io::Error::new(
                    ErrorKind::WriteZero,
                    "write_at wrote zero bytes",
                ));
            }
            src = &src[written..];
            off += written as u64;
        }
        Ok(())
    }
}

#[cfg(windows)]
mod stdio {
    use std::{
        fs::File,
        io::{self, ErrorKind},
        os::windows::fs::FileExt,
    };

    pub fn read_exact(file: &File, mut off: u64, mut dst: &mut [u8]) -> io::Result<()> {
        while !dst.is_empty() {
            let read = file.seek_read(dst, off)?;
            if read == 0 {
                return Err(io::Error::new(
                    ErrorKind::UnexpectedEof,
                    "seek_read reached EOF",
                ));
            }
            let (_, tail) = dst.split_at_mut(read);
            dst = tail;
            off += read as u64;
        }
        Ok(())
    }

    pub fn write_all(file: &File, mut off: u64, mut src: &[u8]) -> io::Result<()> {
        while !src.is_empty() {
            let written = file.seek_write(src, off)?;
            if written == 0 {
                return Err(io::Error::new(
                    ErrorKind::WriteZero,
                    "seek_write wrote zero bytes",
                ));
            }
            src = &src[written..];
            off += written as u64;
        }
        Ok(())
    }
}

/// Standard file I/O implementation using `Arc<File>`.
#[derive(Clone, Debug)]
pub struct StdFileIo {
    inner: Arc<File>,
}

impl StdFileIo {
    /// Creates a new `StdFileIo` from an existing file handle.
    pub fn new(file: File) -> Self {
        Self {
            inner: Arc::new(file),
        }
    }

    /// Creates the file, truncating any previous content.
    pub fn create(path: impl AsRef<Path>) -> Result<Self> {
        let file = std::fs::OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)
            .map_err(DiasError::from)?;
        Ok(Self::new(file))
    }

    /// Opens an existing file for read-write access.
    pub fn open_rw(path: impl AsRef<Path>) -> Result<Self> {
        let file = std::fs::OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .map_err(DiasError::from)?;
        Ok(Self::new(file))
    }

    /// Opens an existing file read-only.
    pub fn open_ro(path: impl AsRef<Path>) -> Result<Self> {
        let file = File::open(path).map_err(DiasError::from)?;
        Ok(Self::new(file))
    }

    fn file(&self) -> &File {
        &self.inner
    }
}

impl FileIo for StdFileIo {
    fn read_at(&self, off: u64, dst: &mut [u8]) -> Result<()> {
        stdio::read_exact(self.file(), off, dst).map_err(DiasError::from)
    }

    fn write_at(&self, off: u64, src: &[u8]) -> Result<()> {
        stdio::write_all(self.file(), off, src).map_err(DiasError::from)
    }

    fn sync_all(&self) -> Result<()> {
        self.file().sync_all().map_err(DiasError::from)
    }

    fn len(&self) -> Result<u64> {
        Ok(self.file().metadata().map_err(DiasError::from)?.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::ErrorKind;
    use tempfile::tempdir;

    #[test]
    fn write_read_roundtrip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("io.bin");
        let io = StdFileIo::create(&path).unwrap();

        let payload = b"voronoi";
        io.write_at(0, payload).unwrap();
        io.sync_all().unwrap();

        let mut buf = vec![0u8; payload.len()];
        io.read_at(0, &mut buf).unwrap();
        assert_eq!(&buf, payload);
        assert!(io.len().unwrap() >= payload.len() as u64);
    }

    #[test]
    fn read_past_eof_returns_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("io.bin");
        let io = StdFileIo::create(&path).unwrap();
        let mut buf = [0u8; 8];
        let err = io.read_at(0, &mut buf).unwrap_err();
        match err {
            DiasError::Io(inner) => assert_eq!(inner.kind(), ErrorKind::UnexpectedEof),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn reopen_read_only_sees_content() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("io_ro.bin");
        {
            let io = StdFileIo::create(&path).unwrap();
            io.write_at(0, &vec![7u8; 4096]).unwrap();
            io.sync_all().unwrap();
        }
        let ro = StdFileIo::open_ro(&path).unwrap();
        let mut buf = vec![0u8; 4096];
        ro.read_at(0, &mut buf).unwrap();
        assert!(buf.iter().all(|&b| b == 7));
    }
}
