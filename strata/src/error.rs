use crate::{PageId, TxnId};
use thiserror::Error;

/// Errors surfaced by the storage engine.
#[derive(Debug, Error)]
pub enum StorageError {
    /// A file header, record or page layout did not match what was written.
    #[error("corruption: {0}")]
    Corruption(String),

    /// Not enough free space on the page for the requested insert/update.
    #[error("page is full")]
    PageFull,

    /// Every cached page is pinned; nothing can be evicted.
    #[error("all pages are pinned, cannot evict")]
    AllPinned,

    /// The slot does not exist or has been tombstoned.
    #[error("slot not found")]
    SlotNotFound,

    /// A page id past the end of the data file.
    #[error("page {0} does not exist")]
    PageOutOfRange(PageId),

    /// The named table is already present in the catalog.
    #[error("table {0} already exists")]
    TableExists(String),

    /// A commit/rollback was issued for a transaction that is not running.
    #[error("transaction {0} is not running")]
    TransactionNotRunning(TxnId),

    /// A value could not be encoded or decoded against its schema.
    #[error("serialization: {0}")]
    Serialization(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
