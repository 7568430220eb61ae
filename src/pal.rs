//! Platform abstraction layer (C2): file open/size/map/write.
//!
//! Everything here is invoked at database-open time or during commit, never per-page-lookup.
//! The mapping handed back by [`Mapping::open`] is read-only from the core's point of view;
//! writes always go through [`FileHandle::write_at`], keeping reads (via the mapping) and
//! writes (via a positional file write) on separate paths over the same file.
use std::fs::{File, OpenOptions};
use std::path::Path;

use memmap2::Mmap;

use crate::error::PalError;
use crate::page::PAGE_SIZE;

/// An open database file, positioned for positional writes.
#[derive(Debug)]
pub struct FileHandle {
    file: File,
}

impl FileHandle {
    /// Opens `path`, creating it if it doesn't exist.
    pub fn open(path: &Path) -> Result<Self, PalError> {
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(path)?;
        Ok(Self { file })
    }

    pub fn len(&self) -> Result<u64, PalError> {
        Ok(self.file.metadata()?.len())
    }

    /// Idempotent, atomic extension: grows the file to at least `bytes`, never shrinks it.
    pub fn ensure_minimum_size(&self, bytes: u64) -> Result<(), PalError> {
        if self.len()? < bytes {
            self.file.set_len(bytes)?;
        }
        Ok(())
    }

    /// Positional write; no implicit sync (commit does not fsync).
    pub fn write_at(&self, offset: u64, buf: &[u8]) -> Result<(), PalError> {
        #[cfg(unix)]
        {
            use std::os::unix::fs::FileExt;
            self.file.write_all_at(buf, offset)?;
            Ok(())
        }
        #[cfg(not(unix))]
        {
            use std::io::{Seek, SeekFrom};
            let mut file = self.file.try_clone()?;
            file.seek(SeekFrom::Start(offset))?;
            file.write_all(buf)?;
            Ok(())
        }
    }

    pub fn file(&self) -> &File {
        &self.file
    }
}

/// A read-only memory mapping of the whole database file.
#[derive(Debug)]
pub struct Mapping {
    mmap: Mmap,
}

impl Mapping {
    /// Maps the entirety of `handle`'s current length.
    pub fn open(handle: &FileHandle) -> Result<Self, PalError> {
        // SAFETY: the mapping is only read through while the backing file outlives it (the
        // `Database` owns both the `FileHandle` and the `Mapping` for its whole lifetime), and
        // writes to the file only ever happen through `FileHandle::write_at`, which this module
        // serialises with commits via the database's writer guard (see `db.rs`).
        let mmap = unsafe { Mmap::map(handle.file())? };
        Ok(Self { mmap })
    }

    pub fn len(&self) -> usize {
        self.mmap.len()
    }

    pub fn page_count(&self) -> u64 {
        (self.mmap.len() / PAGE_SIZE) as u64
    }

    /// `pages_get`: returns the bytes for `page_num..page_num + page_count` pages, or an
    /// out-of-range error if any of them fall outside the mapping.
    pub fn pages_get(&self, page_num: u64, page_count: u64) -> Result<&[u8], PalError> {
        let start = page_num as usize * PAGE_SIZE;
        let end = start + page_count as usize * PAGE_SIZE;
        self.mmap.get(start..end).ok_or(PalError::OutOfRange {
            page_num,
            file_pages: self.page_count(),
        })
    }
}
