//! The transaction (C4): the scope object holding a reference to the database, a flags word,
//! and the modified-page table, implementing `get_page`/`modify_page`/`commit`/`close`.
//!
//! Its shape mirrors a page-cache-backed reader/writer with resource-release-on-drop, adapted
//! into a copy-on-write dirty-page table with explicit commit/rollback.
use std::sync::Arc;

use log::info;

use crate::db::Database;
use crate::error::diagnostics::{self, Code};
use crate::error::{GavranError, MetadataError};
use crate::metadata::{self, MetadataEntry, METADATA_PAGE_TAG};
use crate::page::{buffer_len_for, page_count_for, PageMut, PageView, PAGE_ALIGNMENT, PAGE_SIZE};
use crate::table::ModifiedPageTable;
use crate::alloc::AlignedBuffer;

/// Reserved flags word for `Transaction::create`. No bits are defined in this core revision;
/// any nonzero value is rejected to keep forward compatibility explicit.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TxnFlags(u32);

impl TxnFlags {
    pub const NONE: Self = Self(0);

    fn validate(self) -> Result<(), GavranError> {
        if self.0 != 0 {
            diagnostics::push(
                Code::InvalidArgument,
                format!("unrecognised transaction flags: {:#x}", self.0),
            );
            return Err(GavranError::InvalidArgument {
                message: format!("unrecognised transaction flags: {:#x}", self.0),
            });
        }
        Ok(())
    }
}

impl From<u32> for TxnFlags {
    fn from(bits: u32) -> Self {
        Self(bits)
    }
}

/// A short-lived, single-threaded scope owning every dirty page buffer produced within it.
/// `commit` publishes them to the database; `close` (or dropping the transaction) discards
/// whatever wasn't committed.
#[derive(Debug)]
pub struct Transaction {
    db: Arc<Database>,
    #[allow(dead_code)] // reserved for future flag bits
    flags: TxnFlags,
    table: ModifiedPageTable,
    closed: bool,
}

impl Transaction {
    /// `txn_create`.
    pub fn create(db: Arc<Database>, flags: TxnFlags) -> Result<Self, GavranError> {
        diagnostics::assert_empty();
        flags.validate()?;
        Ok(Self {
            db,
            flags,
            table: ModifiedPageTable::new(),
            closed: false,
        })
    }

    /// Number of pages with a dirty buffer in this transaction.
    pub fn modified_pages(&self) -> usize {
        self.table.len()
    }

    /// `txn_get_page`: resolves first against this transaction's dirty pages, then falls back
    /// to the database's memory-mapped file. The returned view is read-only even when the
    /// underlying bytes happen to be a dirty buffer this transaction owns.
    pub fn get_page(&self, page_num: u64) -> Result<PageView<'_>, GavranError> {
        diagnostics::assert_empty();

        if let Some(bucket) = self.table.lookup(page_num) {
            return Ok(PageView::new(
                page_num,
                bucket.overflow_size,
                bucket.buffer.as_slice(),
            ));
        }

        let overflow_size = self.resolve_overflow_size(page_num)?;
        let page_count = page_count_for(overflow_size);
        let bytes = self.db.pages_get(page_num, page_count).map_err(|cause| {
            diagnostics::push_with_context(
                Code::InvalidArgument,
                "page out of range",
                &[("page_num", page_num.to_string())],
            );
            GavranError::from(cause)
        })?;
        Ok(PageView::new(page_num, overflow_size, bytes))
    }

    /// `txn_modify_page`. `requested_overflow_size == 0` defaults to `PAGE_SIZE`. Idempotent
    /// within one transaction: calling it twice for the same page returns the same buffer.
    pub fn modify_page(
        &mut self,
        page_num: u64,
        requested_overflow_size: u64,
    ) -> Result<PageMut<'_>, GavranError> {
        diagnostics::assert_empty();

        if self.table.lookup(page_num).is_some() {
            let bucket = self.table.lookup_mut(page_num).expect("just checked Some");
            return Ok(PageMut::new(
                page_num,
                bucket.overflow_size,
                bucket.buffer.as_mut_slice(),
            ));
        }

        let requested = if requested_overflow_size == 0 {
            PAGE_SIZE as u64
        } else {
            requested_overflow_size
        };
        let original_overflow = self.resolve_overflow_size(page_num)?;
        let effective_overflow = requested.max(original_overflow);
        let page_count = page_count_for(effective_overflow);
        let buf_len = buffer_len_for(effective_overflow);

        let original_bytes = self.db.pages_get(page_num, page_count).map_err(|cause| {
            diagnostics::push_with_context(
                Code::InvalidArgument,
                "page out of range",
                &[("page_num", page_num.to_string())],
            );
            GavranError::from(cause)
        })?;

        let mut buffer = AlignedBuffer::alloc_zeroed(buf_len, PAGE_ALIGNMENT).ok_or_else(|| {
            diagnostics::push_with_context(
                Code::OutOfMemory,
                "failed to allocate dirty page buffer",
                &[
                    ("page_num", page_num.to_string()),
                    ("size", buf_len.to_string()),
                ],
            );
            GavranError::from(crate::error::TableError::BufferOutOfMemory { size: buf_len })
        })?;
        buffer.as_mut_slice().copy_from_slice(original_bytes);

        self.table
            .insert(page_num, effective_overflow, buffer)
            .map_err(|cause| {
                diagnostics::push_with_context(
                    Code::InvalidArgument,
                    "modified-page table insert failed",
                    &[("page_num", page_num.to_string())],
                );
                GavranError::from(cause)
            })?;

        let bucket = self
            .table
            .lookup_mut(page_num)
            .expect("just inserted into the table");
        Ok(PageMut::new(
            page_num,
            bucket.overflow_size,
            bucket.buffer.as_mut_slice(),
        ))
    }

    /// `txn_get_metadata`: resolves the metadata entry for `page_num`, routing through
    /// whichever metadata page groups it (first checking this transaction's dirty pages).
    pub fn get_metadata(&self, page_num: u64) -> Result<MetadataEntry, GavranError> {
        diagnostics::assert_empty();
        let meta_num = metadata::meta_page_num(page_num);

        let bytes: &[u8] = match self.table.lookup(meta_num) {
            Some(bucket) => bucket.buffer.as_slice(),
            None => self.db.pages_get(meta_num, 1).map_err(|cause| {
                diagnostics::push_with_context(
                    Code::InvalidArgument,
                    "metadata page out of range",
                    &[("meta_num", meta_num.to_string())],
                );
                GavranError::from(cause)
            })?,
        };

        let tag = MetadataEntry::read(bytes, 0).page_type;
        if tag != METADATA_PAGE_TAG {
            diagnostics::push_with_context(
                Code::InvalidArgument,
                "page is not tagged as a metadata page",
                &[("meta_num", meta_num.to_string()), ("found_type", tag.to_string())],
            );
            return Err(GavranError::from(MetadataError::NotAMetadataPage {
                page_num: meta_num,
                found: tag,
            }));
        }

        let index = metadata::index_in_metadata(page_num);
        Ok(MetadataEntry::read(bytes, index))
    }

    /// `txn_modify_metadata`: ensures the metadata page is a dirty page in this transaction,
    /// then writes `entry` into `page_num`'s slot so it is persisted at commit.
    pub fn modify_metadata(&mut self, page_num: u64, entry: MetadataEntry) -> Result<(), GavranError> {
        diagnostics::assert_empty();
        let meta_num = metadata::meta_page_num(page_num);
        let index = metadata::index_in_metadata(page_num);

        let mut meta_page = self.modify_page(meta_num, PAGE_SIZE as u64)?;
        entry.write(meta_page.bytes_mut(), index);
        Ok(())
    }

    /// Resolves the overflow size to use for `page_num`: one page if it's itself a metadata
    /// page (a metadata page describing itself stays one page wide), else whatever its
    /// metadata entry declares.
    fn resolve_overflow_size(&self, page_num: u64) -> Result<u64, GavranError> {
        if metadata::is_metadata_page(page_num) {
            return Ok(PAGE_SIZE as u64);
        }
        let entry = self.get_metadata(page_num)?;
        Ok(if entry.overflow_size == 0 {
            PAGE_SIZE as u64
        } else {
            entry.overflow_size
        })
    }

    /// `txn_commit`: writes every dirty buffer to the file. Stops at the first I/O failure,
    /// leaving the transaction open (and its remaining dirty buffers intact) so the caller can
    /// still `close` it.
    pub fn commit(&mut self) -> Result<(), GavranError> {
        diagnostics::assert_empty();
        let _guard = self.db.lock_for_commit();

        let page_nums: Vec<u64> = self.table.page_numbers().collect();
        let mut pages_written = 0usize;
        let mut bytes_written = 0usize;

        for page_num in page_nums {
            let bucket = self.table.lookup(page_num).expect("page_num came from this table");
            match self.db.write_page(page_num, bucket.buffer.as_slice()) {
                Ok(()) => {
                    bytes_written += bucket.buffer.len();
                    self.table.remove(page_num);
                    pages_written += 1;
                }
                Err(cause) => {
                    diagnostics::push_with_context(
                        Code::Io,
                        "commit failed writing a dirty page",
                        &[("page_num", page_num.to_string())],
                    );
                    return Err(GavranError::from(cause));
                }
            }
        }

        info!("committed transaction: {pages_written} pages, {bytes_written} bytes written");
        Ok(())
    }

    /// `txn_close`: idempotent. Releases every remaining dirty buffer without writing it
    /// (rollback of whatever wasn't committed). Never re-tries I/O and does not clear the
    /// diagnostics stack.
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.table = ModifiedPageTable::new();
    }
}

impl Drop for Transaction {
    fn drop(&mut self) {
        self.close();
    }
}
