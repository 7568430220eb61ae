//! End-to-end scenarios driven entirely through the public API, exercising a real file on
//! disk via `tempdir`.
use std::sync::Arc;

use gavran::error::diagnostics;
use gavran::{Database, DatabaseOptions, PAGE_SIZE, TxnFlags};
use tempdir::TempDir;

fn init_logging() {
    let _ = env_logger::try_init();
}

fn open_db(dir: &TempDir, size: u64) -> Arc<Database> {
    Database::open(DatabaseOptions::new(dir.path().join("gavran.db"), size)).unwrap()
}

#[test]
fn basic_write_read() {
    init_logging();
    let dir = TempDir::new("basic").unwrap();
    let db = open_db(&dir, 128 * 1024);

    let mut txn = Arc::clone(&db).create_transaction(TxnFlags::NONE).unwrap();
    {
        let mut page = txn.modify_page(0, 0).unwrap();
        page.bytes_mut()[..13].copy_from_slice(b"Hello Gavran\0");
    }
    txn.commit().unwrap();
    txn.close();

    let txn = db.create_transaction(TxnFlags::NONE).unwrap();
    let page = txn.get_page(0).unwrap();
    assert_eq!(&page.bytes()[..13], b"Hello Gavran\0");
    assert!(page.bytes()[13..].iter().all(|&b| b == 0));
}

/// Closing without committing must leave the file untouched.
#[test]
fn rollback_discards_modifications() {
    init_logging();
    let dir = TempDir::new("rollback").unwrap();
    let db = open_db(&dir, 128 * 1024);

    let mut txn = Arc::clone(&db).create_transaction(TxnFlags::NONE).unwrap();
    txn.modify_page(0, 0).unwrap().bytes_mut()[..5].copy_from_slice(b"nope!");
    txn.close();

    let txn = db.create_transaction(TxnFlags::NONE).unwrap();
    let page = txn.get_page(0).unwrap();
    assert!(page.bytes().iter().all(|&b| b == 0));
}

/// Modifying the same page twice in one transaction returns the same buffer and does not
/// re-copy.
#[test]
fn duplicate_modify_returns_same_buffer() {
    init_logging();
    let dir = TempDir::new("duplicate").unwrap();
    let db = open_db(&dir, 128 * 1024);
    let mut txn = db.create_transaction(TxnFlags::NONE).unwrap();

    txn.modify_page(5, 0).unwrap().bytes_mut()[0] = 0x7;
    let second = txn.modify_page(5, 0).unwrap();
    assert_eq!(second.bytes()[0], 0x7);
    assert_eq!(txn.modified_pages(), 1);
}

/// A 128 KiB file has 16 pages; modifying page 100 must fail with invalid-argument and leave
/// the transaction usable.
#[test]
fn out_of_range_page_is_invalid_argument() {
    init_logging();
    let dir = TempDir::new("out-of-range").unwrap();
    let db = open_db(&dir, 128 * 1024);
    let mut txn = db.create_transaction(TxnFlags::NONE).unwrap();

    let err = txn.modify_page(100, 0).unwrap_err();
    assert_eq!(err.kind(), diagnostics::Code::InvalidArgument);
    let records = diagnostics::drain();
    assert!(!records.is_empty());

    // The transaction must remain usable after the failure.
    txn.modify_page(1, 0).unwrap();
    assert_eq!(txn.modified_pages(), 1);
}

/// A page declared with `overflow_size = 20000` occupies 3 pages; the whole run round-trips
/// through commit and a fresh open.
#[test]
fn overflow_run_round_trips() {
    init_logging();
    let dir = TempDir::new("overflow").unwrap();
    let db = open_db(&dir, 1024 * 1024);

    let pattern: Vec<u8> = (0u8..=255).cycle().take(3 * PAGE_SIZE).collect();

    let mut txn = Arc::clone(&db).create_transaction(TxnFlags::NONE).unwrap();
    {
        let mut page = txn.modify_page(4, 20000).unwrap();
        assert_eq!(page.bytes().len(), 3 * PAGE_SIZE);
        page.bytes_mut().copy_from_slice(&pattern);
    }
    txn.commit().unwrap();
    txn.close();

    let txn = db.create_transaction(TxnFlags::NONE).unwrap();
    // The metadata for page 4 was never updated by this test, so a fresh transaction falls
    // back to the default one-page overflow size for reads; verify the raw bytes on disk
    // instead by reading each of the three physical pages the write touched.
    for i in 0..3u64 {
        let page = txn.get_page(4 + i).unwrap();
        let expected = &pattern[i as usize * PAGE_SIZE..(i as usize + 1) * PAGE_SIZE];
        assert_eq!(&page.bytes()[..PAGE_SIZE.min(page.bytes().len())], expected);
    }
}

/// Committed writes must survive a full close-and-reopen of the database file, not just a new
/// transaction on the same handle.
#[test]
fn commit_survives_database_reopen() {
    init_logging();
    let dir = TempDir::new("reopen").unwrap();
    let path = dir.path().join("gavran.db");

    {
        let db = Database::open(DatabaseOptions::new(&path, 128 * 1024)).unwrap();
        let mut txn = db.create_transaction(TxnFlags::NONE).unwrap();
        txn.modify_page(2, 0).unwrap().bytes_mut()[..4].copy_from_slice(b"ABCD");
        txn.commit().unwrap();
        txn.close();
    }

    let db = Database::open(DatabaseOptions::new(&path, 128 * 1024)).unwrap();
    let txn = db.create_transaction(TxnFlags::NONE).unwrap();
    assert_eq!(&txn.get_page(2).unwrap().bytes()[..4], b"ABCD");
}
