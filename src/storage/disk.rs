//! # Positional File Gate
//!
//! `PagedFile` is the lowest layer of the engine: a thin, thread-safe
//! wrapper around one random-access file that exposes whole-page positional
//! reads and writes plus size/flush. Every call supplies its own file
//! offset, so there is no shared cursor to serialize on: concurrent reads
//! proceed in parallel and interleaved writers cannot corrupt each other's
//! position.
//!
//! ## Contract
//!
//! - `read_page` returns a short count when the page extends past
//!   end-of-file; reading entirely past the end yields `0`, never an error.
//! - `write_page` delivers the full page or fails; partial page writes are
//!   never surfaced to callers.
//! - `flush` asks the OS to persist its buffers (`fsync`).
//!
//! The file handle is closed on drop. All fallible operations return
//! `eyre::Result` with path context.

use std::fs::{File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};

use eyre::{ensure, Result, WrapErr};

use super::PAGE_SIZE;

#[cfg(unix)]
use std::os::unix::fs::FileExt;
#[cfg(windows)]
use std::os::windows::fs::FileExt;

#[derive(Debug)]
pub struct PagedFile {
    file: File,
    path: PathBuf,
    read_only: bool,
}

impl PagedFile {
    /// Opens `path` for paged access. A missing file is created when the
    /// gate is writable and refused when it is read-only.
    pub fn open<P: AsRef<Path>>(path: P, read_only: bool) -> Result<Self> {
        let path = path.as_ref();

        if read_only {
            ensure!(
                path.exists(),
                "cannot open missing file '{}' read-only",
                path.display()
            );
        }

        let file = OpenOptions::new()
            .read(true)
            .write(!read_only)
            .create(!read_only)
            .open(path)
            .wrap_err_with(|| format!("failed to open storage file '{}'", path.display()))?;

        Ok(Self {
            file,
            path: path.to_path_buf(),
            read_only,
        })
    }

    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reads page `page_no` into `buf`. Returns the number of bytes
    /// actually read: `PAGE_SIZE` for a fully resident page, less (possibly
    /// zero) when the page crosses or lies past end-of-file.
    pub fn read_page(&self, page_no: u64, buf: &mut [u8]) -> Result<usize> {
        ensure!(
            buf.len() == PAGE_SIZE,
            "page buffer is {} bytes, expected {}",
            buf.len(),
            PAGE_SIZE
        );

        let offset = page_no * PAGE_SIZE as u64;
        let mut filled = 0usize;

        while filled < PAGE_SIZE {
            match read_at(&self.file, &mut buf[filled..], offset + filled as u64) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    return Err(e).wrap_err_with(|| {
                        format!(
                            "failed to read page {} of '{}'",
                            page_no,
                            self.path.display()
                        )
                    })
                }
            }
        }

        Ok(filled)
    }

    /// Writes the full page `page_no` from `buf`. Either all `PAGE_SIZE`
    /// bytes reach the OS or an error is returned.
    pub fn write_page(&self, page_no: u64, buf: &[u8]) -> Result<()> {
        ensure!(!self.read_only, "storage file is opened read-only");
        ensure!(
            buf.len() == PAGE_SIZE,
            "page buffer is {} bytes, expected {}",
            buf.len(),
            PAGE_SIZE
        );

        let offset = page_no * PAGE_SIZE as u64;
        let mut written = 0usize;

        while written < PAGE_SIZE {
            match write_at(&self.file, &buf[written..], offset + written as u64) {
                Ok(0) => {
                    return Err(io::Error::from(io::ErrorKind::WriteZero)).wrap_err_with(|| {
                        format!(
                            "failed to write page {} of '{}'",
                            page_no,
                            self.path.display()
                        )
                    })
                }
                Ok(n) => written += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    return Err(e).wrap_err_with(|| {
                        format!(
                            "failed to write page {} of '{}'",
                            page_no,
                            self.path.display()
                        )
                    })
                }
            }
        }

        Ok(())
    }

    /// Current file size in bytes.
    pub fn size(&self) -> Result<u64> {
        let metadata = self
            .file
            .metadata()
            .wrap_err_with(|| format!("failed to stat '{}'", self.path.display()))?;
        Ok(metadata.len())
    }

    /// Asks the OS to persist buffered writes to the storage device.
    pub fn flush(&self) -> Result<()> {
        if self.read_only {
            return Ok(());
        }
        self.file
            .sync_all()
            .wrap_err_with(|| format!("failed to sync '{}'", self.path.display()))
    }
}

#[cfg(unix)]
fn read_at(file: &File, buf: &mut [u8], offset: u64) -> io::Result<usize> {
    file.read_at(buf, offset)
}

#[cfg(unix)]
fn write_at(file: &File, buf: &[u8], offset: u64) -> io::Result<usize> {
    file.write_at(buf, offset)
}

#[cfg(windows)]
fn read_at(file: &File, buf: &mut [u8], offset: u64) -> io::Result<usize> {
    file.seek_read(buf, offset)
}

#[cfg(windows)]
fn write_at(file: &File, buf: &[u8], offset: u64) -> io::Result<usize> {
    file.seek_write(buf, offset)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn write_then_read_page_roundtrip() {
        let dir = tempdir().unwrap();
        let file = PagedFile::open(dir.path().join("pages.db"), false).unwrap();

        let mut page = vec![0u8; PAGE_SIZE];
        for (i, byte) in page.iter_mut().enumerate() {
            *byte = (i % 251) as u8;
        }
        file.write_page(3, &page).unwrap();

        let mut out = vec![0u8; PAGE_SIZE];
        let n = file.read_page(3, &mut out).unwrap();
        assert_eq!(n, PAGE_SIZE);
        assert_eq!(out, page);
    }

    #[test]
    fn read_past_end_returns_short_count() {
        let dir = tempdir().unwrap();
        let file = PagedFile::open(dir.path().join("pages.db"), false).unwrap();

        let page = vec![7u8; PAGE_SIZE];
        file.write_page(0, &page).unwrap();

        let mut out = vec![0u8; PAGE_SIZE];
        assert_eq!(file.read_page(1, &mut out).unwrap(), 0);
        assert_eq!(file.read_page(9, &mut out).unwrap(), 0);
    }

    #[test]
    fn writing_a_later_page_leaves_a_gap_of_zeroes() {
        let dir = tempdir().unwrap();
        let file = PagedFile::open(dir.path().join("pages.db"), false).unwrap();

        let page = vec![0xAB; PAGE_SIZE];
        file.write_page(2, &page).unwrap();
        assert_eq!(file.size().unwrap(), 3 * PAGE_SIZE as u64);

        let mut out = vec![0xFF; PAGE_SIZE];
        let n = file.read_page(1, &mut out).unwrap();
        assert_eq!(n, PAGE_SIZE);
        assert!(out.iter().all(|&b| b == 0));
    }

    #[test]
    fn read_only_open_of_missing_file_fails() {
        let dir = tempdir().unwrap();
        assert!(PagedFile::open(dir.path().join("absent.db"), true).is_err());
    }

    #[test]
    fn write_rejected_on_read_only_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("pages.db");

        let writable = PagedFile::open(&path, false).unwrap();
        writable.write_page(0, &vec![1u8; PAGE_SIZE]).unwrap();
        drop(writable);

        let readonly = PagedFile::open(&path, true).unwrap();
        assert!(readonly.is_read_only());
        assert!(readonly.write_page(0, &vec![2u8; PAGE_SIZE]).is_err());

        let mut out = vec![0u8; PAGE_SIZE];
        assert_eq!(readonly.read_page(0, &mut out).unwrap(), PAGE_SIZE);
        assert!(out.iter().all(|&b| b == 1));
    }
}
