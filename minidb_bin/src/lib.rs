//! # MiniDB
//! A disk-based SQL database built on the [`strata`] storage engine:
//! write-ahead logging, MVCC snapshot isolation, ARIES crash recovery,
//! vacuum and a per-table B-tree index, driven by a minimal SQL surface.

pub mod engine;
pub mod errors;
pub mod eval;
pub mod executor;
pub mod parser;
pub mod types;

pub use engine::{Engine, DEFAULT_BUFFER_POOL_PAGES};
pub use errors::ExecutionError;
pub use types::{EngineStats, QueryResult, VacuumReport};
