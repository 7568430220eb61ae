//! The database handle (C7): opens a file through the PAL, owns the mapping, and exposes the
//! `pages_get`/`pages_write` primitives transactions are built on.
//!
//! Mirrors a "write metadata if the file is empty, else read it" open routine, generalised
//! from a single engine-wide metadata page to the mmap-based page access layer below.
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};

use log::info;

use crate::error::{GavranError, PalError};
use crate::metadata;
use crate::pal::{FileHandle, Mapping};
use crate::page::PAGE_SIZE;

/// Configuration for [`Database::open`].
#[derive(Debug, Clone)]
pub struct DatabaseOptions {
    pub path: PathBuf,
    /// Minimum file size, in bytes, to ensure on open. Rounded up to a whole number of pages.
    /// Ignored (the file is left as-is) if the file already exists and is non-empty.
    pub initial_size: u64,
}

impl DatabaseOptions {
    pub fn new(path: impl Into<PathBuf>, initial_size: u64) -> Self {
        Self {
            path: path.into(),
            initial_size,
        }
    }
}

/// The opened database: a file handle, its read-only mapping, and the mutex that serialises
/// commits (this core has no multi-writer concurrency, but guards against two write
/// transactions interleaving their `pages_write` calls).
#[derive(Debug)]
pub struct Database {
    handle: FileHandle,
    mapping: Mapping,
    commit_guard: Mutex<()>,
}

impl Database {
    /// Opens (creating if necessary) the database file described by `options`.
    pub fn open(options: DatabaseOptions) -> Result<Arc<Self>, GavranError> {
        let handle = FileHandle::open(&options.path)?;
        let existing_len = handle.len()?;
        let is_new = existing_len == 0;

        let min_bytes = options.initial_size.max(PAGE_SIZE as u64).div_ceil(PAGE_SIZE as u64)
            * PAGE_SIZE as u64;
        handle.ensure_minimum_size(min_bytes)?;

        if is_new {
            let mut page = vec![0u8; PAGE_SIZE];
            metadata::init_metadata_page(&mut page);
            handle.write_at(0, &page)?;
        }

        // Safe to map after the initial write above: a MAP_SHARED mapping of a regular file
        // and positional writes through the same file descriptor share the same page cache,
        // so the freshly written page 0 is visible through `mapping` immediately.
        let mapping = Mapping::open(&handle)?;

        info!(
            "opened database {:?}: {} pages",
            options.path,
            mapping.page_count()
        );

        Ok(Arc::new(Self {
            handle,
            mapping,
            commit_guard: Mutex::new(()),
        }))
    }

    pub fn page_count(&self) -> u64 {
        self.mapping.page_count()
    }

    pub(crate) fn pages_get(&self, page_num: u64, page_count: u64) -> Result<&[u8], PalError> {
        self.mapping.pages_get(page_num, page_count)
    }

    pub(crate) fn write_page(&self, page_num: u64, bytes: &[u8]) -> Result<(), PalError> {
        self.handle.write_at(page_num * PAGE_SIZE as u64, bytes)
    }

    pub(crate) fn lock_for_commit(&self) -> MutexGuard<'_, ()> {
        self.commit_guard.lock().expect("commit guard poisoned")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::METADATA_PAGE_TAG;
    use tempdir::TempDir;

    #[test]
    fn open_initialises_page_zero_once() {
        let dir = TempDir::new("db").unwrap();
        let path = dir.path().join("gavran.db");
        let db = Database::open(DatabaseOptions::new(&path, 128 * 1024)).unwrap();
        assert_eq!(db.page_count(), 16);
        assert_eq!(db.pages_get(0, 1).unwrap()[0], METADATA_PAGE_TAG);

        drop(db);
        let db = Database::open(DatabaseOptions::new(&path, 128 * 1024)).unwrap();
        assert_eq!(db.page_count(), 16, "must not grow an existing file");
    }
}
