//! Paging and transaction core of an embedded storage engine.
//!
//! `gavran` exposes a file as a sequence of fixed-size pages and lets callers read, modify,
//! allocate, and free pages within the scope of a [`Transaction`] that provides copy-on-write
//! isolation. See `DESIGN.md` in the repository root for the module-by-module design notes.
//!
//! # Example
//! ```rust
//! use gavran::{Database, DatabaseOptions, TxnFlags};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let dir = tempdir::TempDir::new("gavran-doctest")?;
//! let db = Database::open(DatabaseOptions::new(dir.path().join("example.db"), 128 * 1024))?;
//!
//! let mut txn = db.clone().create_transaction(TxnFlags::NONE)?;
//! txn.modify_page(1, 0)?.bytes_mut()[..5].copy_from_slice(b"hello");
//! txn.commit()?;
//! txn.close();
//!
//! let txn = db.create_transaction(TxnFlags::NONE)?;
//! assert_eq!(&txn.get_page(1)?.bytes()[..5], b"hello");
//! # Ok(())
//! # }
//! ```
pub mod alloc;
pub mod db;
pub mod error;
pub mod metadata;
pub mod pal;
pub mod page;
pub mod table;
pub mod txn;

pub use db::{Database, DatabaseOptions};
pub use error::GavranError;
pub use metadata::MetadataEntry;
pub use page::{PageMut, PageView, PAGE_ALIGNMENT, PAGE_SIZE};
pub use txn::{Transaction, TxnFlags};

impl Database {
    /// Convenience wrapper around `Transaction::create` so callers don't need to import
    /// `txn::Transaction` directly for the common case.
    pub fn create_transaction(
        self: std::sync::Arc<Self>,
        flags: TxnFlags,
    ) -> Result<Transaction, GavranError> {
        Transaction::create(self, flags)
    }
}
