use strata::datum::Value;

/// The outcome of one successful statement.
#[derive(Debug, Clone, Default)]
pub struct QueryResult {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
    pub message: String,
}

impl QueryResult {
    pub fn message(message: impl Into<String>) -> Self {
        QueryResult {
            columns: Vec::new(),
            rows: Vec::new(),
            message: message.into(),
        }
    }
}

/// Buffer pool, WAL and storage counters exposed by the engine.
#[derive(Debug, Clone)]
pub struct EngineStats {
    pub buffer_hits: u64,
    pub buffer_misses: u64,
    pub buffer_cached: usize,
    pub active_txns: usize,
    pub wal_current_lsn: u64,
    pub wal_flushed_lsn: u64,
    pub disk_pages: u32,
    pub tables: usize,
}

impl EngineStats {
    pub fn hit_rate(&self) -> f64 {
        let total = self.buffer_hits + self.buffer_misses;
        if total == 0 {
            0.0
        } else {
            self.buffer_hits as f64 / total as f64 * 100.0
        }
    }
}

/// Per-table dead-version reclamation counters.
#[derive(Debug, Clone)]
pub struct VacuumTableStats {
    pub table_name: String,
    pub scanned: usize,
    pub removed: usize,
}

/// The outcome of one vacuum pass over every table.
#[derive(Debug, Clone, Default)]
pub struct VacuumReport {
    pub tables: Vec<VacuumTableStats>,
}

impl VacuumReport {
    pub fn total_removed(&self) -> usize {
        self.tables.iter().map(|t| t.removed).sum()
    }
}
