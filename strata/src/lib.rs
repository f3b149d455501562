//! # Strata Storage Engine
//! The storage engine for MiniDB.
//! This crate owns the on-disk and in-memory representation of data: the
//! page file, the buffer pool, the write-ahead log, MVCC transaction state,
//! ARIES crash recovery, table heaps, the persisted catalog and the B-tree
//! index.

/// The B-Tree index implementation.
pub mod btree;
/// The buffer pool manager.
pub mod buffer_pool;
/// The persisted table/column/index directory.
pub mod catalog;
/// SQL values, schemas and the row codec.
pub mod datum;
/// Error types shared across the engine.
pub mod error;
/// Fail-point hooks for crash-ordering tests.
pub mod failpoint;
/// The table heap: a forward-linked chain of data pages.
pub mod heap;
/// The slotted page layout.
pub mod page;
/// The disk manager for reading and writing pages.
pub mod pager;
/// ARIES Analysis/Redo/Undo recovery.
pub mod recovery;
/// The transaction manager and MVCC snapshots.
pub mod transaction;
/// Tuple layout and codec.
pub mod tuple;
/// The Write-Ahead Log.
pub mod wal;

/// The size of a single page in bytes.
pub const PAGE_SIZE: usize = 4096;

/// A unique identifier for a page in the database file.
pub type PageId = u32;

/// A transaction identifier. IDs are handed out from a monotonic counter
/// starting at 1; 0 is reserved for "no transaction".
pub type TxnId = u64;

/// A Log Sequence Number: the position of a record in the WAL.
pub type Lsn = u64;

/// The order of operations within one transaction.
pub type CommandId = u32;

/// A page id that never refers to a real page.
pub const INVALID_PAGE_ID: PageId = 0xFFFF_FFFF;

/// The reserved "no transaction" id.
pub const INVALID_TXN_ID: TxnId = 0;

/// The LSN of "no record".
pub const INVALID_LSN: Lsn = 0;

pub use buffer_pool::PageGuard;
pub use error::StorageError;
pub use page::Page;

/// Shorthand for fallible storage operations.
pub type Result<T> = std::result::Result<T, StorageError>;
