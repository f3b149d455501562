use strata::StorageError;
use thiserror::Error;

/// Errors surfaced by statement execution and the engine API.
#[derive(Debug, Error)]
pub enum ExecutionError {
    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("table {0} does not exist")]
    TableNotFound(String),

    #[error("table {0} already exists")]
    TableExists(String),

    #[error("column {0} does not exist")]
    ColumnNotFound(String),

    #[error("index already exists for table {0}")]
    IndexExists(String),

    #[error("column count mismatch: {expected} columns, {got} values")]
    ColumnCountMismatch { expected: usize, got: usize },

    #[error("type mismatch for column {column}: {detail}")]
    TypeMismatch { column: String, detail: String },

    #[error("column {0} is NOT NULL")]
    NullViolation(String),

    /// Another still-open transaction already modified the tuple. First
    /// writer wins; the caller must ROLLBACK.
    #[error("write-write conflict with transaction {0}")]
    WriteConflict(strata::TxnId),

    #[error("no transaction in progress")]
    NoActiveTransaction,

    #[error("transaction already in progress")]
    TransactionInProgress,

    #[error("parse error: {0}")]
    Parse(String),
}
