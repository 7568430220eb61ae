//! Structured error types and the thread-local diagnostics stack.
//!
//! [`GavranError`] is the sentinel every fallible entry point returns. Alongside it, the
//! [`diagnostics`] module keeps a per-thread stack of [`Record`]s that components push extra
//! key/value context onto before returning; callers that want more than the top-level error
//! message can `diagnostics::drain()` after a failing call.
use std::io;

use thiserror::Error;

/// Top-level error returned by every public entry point.
#[derive(Debug, Error)]
pub enum GavranError {
    #[error("invalid argument: {message}")]
    InvalidArgument { message: String },

    #[error("modified-page table error: {cause}")]
    Table { cause: TableError },

    #[error("platform adapter error: {cause}")]
    Pal { cause: PalError },

    #[error("metadata error: {cause}")]
    Metadata { cause: MetadataError },
}

#[derive(Debug, Error)]
pub enum TableError {
    #[error("page {page_num} is already allocated in this transaction")]
    AlreadyAllocated { page_num: u64 },
    #[error("out of memory while expanding the modified-page table")]
    OutOfMemory,
    #[error("out of memory allocating a {size}-byte page buffer")]
    BufferOutOfMemory { size: usize },
}

#[derive(Debug, Error)]
pub enum PalError {
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("page {page_num} is out of range for a file of {file_pages} pages")]
    OutOfRange { page_num: u64, file_pages: u64 },
}

#[derive(Debug, Error)]
pub enum MetadataError {
    #[error("page {page_num} is not tagged as a metadata page (found type {found})")]
    NotAMetadataPage { page_num: u64, found: u8 },
}

impl From<TableError> for GavranError {
    fn from(cause: TableError) -> Self {
        GavranError::Table { cause }
    }
}

impl From<PalError> for GavranError {
    fn from(cause: PalError) -> Self {
        GavranError::Pal { cause }
    }
}

impl From<MetadataError> for GavranError {
    fn from(cause: MetadataError) -> Self {
        GavranError::Metadata { cause }
    }
}

impl GavranError {
    /// Classifies this error into the three kinds the error channel distinguishes, regardless
    /// of which wrapper variant carries it. A page number out of range or a mis-tagged
    /// metadata page are caller mistakes (invalid-argument) even though they're reported
    /// through the `Pal`/`Metadata` wrappers alongside genuine I/O and allocation failures.
    pub fn kind(&self) -> diagnostics::Code {
        match self {
            GavranError::InvalidArgument { .. } => diagnostics::Code::InvalidArgument,
            GavranError::Table { cause } => match cause {
                TableError::AlreadyAllocated { .. } => diagnostics::Code::InvalidArgument,
                TableError::OutOfMemory | TableError::BufferOutOfMemory { .. } => {
                    diagnostics::Code::OutOfMemory
                }
            },
            GavranError::Pal { cause } => match cause {
                PalError::Io(_) => diagnostics::Code::Io,
                PalError::OutOfRange { .. } => diagnostics::Code::InvalidArgument,
            },
            GavranError::Metadata { cause } => match cause {
                MetadataError::NotAMetadataPage { .. } => diagnostics::Code::InvalidArgument,
            },
        }
    }
}

/// The thread-local structured error stack.
///
/// Entry points assert the stack is empty on entry (a caller that doesn't drain after a
/// failing call has a bug, not a recoverable condition), and push a [`Record`] alongside
/// every `Err` they return.
pub mod diagnostics {
    use std::cell::RefCell;

    /// One structured diagnostic: an error code, a human message, and free-form context.
    #[derive(Debug, Clone)]
    pub struct Record {
        pub code: Code,
        pub message: String,
        pub context: Vec<(&'static str, String)>,
    }

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub enum Code {
        InvalidArgument,
        OutOfMemory,
        Io,
    }

    thread_local! {
        static STACK: RefCell<Vec<Record>> = const { RefCell::new(Vec::new()) };
    }

    /// Precondition at every entry point: the previous operation's diagnostics were drained.
    pub fn assert_empty() {
        STACK.with(|stack| {
            debug_assert!(
                stack.borrow().is_empty(),
                "error channel must be drained before the next entry point call"
            );
        });
    }

    /// Push a diagnostic record with no extra context.
    pub fn push(code: Code, message: impl Into<String>) {
        push_with_context(code, message, &[]);
    }

    /// Push a diagnostic record carrying key/value context (e.g. page numbers, sizes).
    pub fn push_with_context(code: Code, message: impl Into<String>, context: &[(&'static str, String)]) {
        STACK.with(|stack| {
            stack.borrow_mut().push(Record {
                code,
                message: message.into(),
                context: context.to_vec(),
            });
        });
    }

    /// Drain and return every diagnostic accumulated so far, in push order.
    pub fn drain() -> Vec<Record> {
        STACK.with(|stack| stack.borrow_mut().drain(..).collect())
    }

    /// True if no diagnostics are pending.
    pub fn is_empty() -> bool {
        STACK.with(|stack| stack.borrow().is_empty())
    }
}
