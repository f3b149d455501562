//! Engine composition: wires the WAL, disk manager, buffer pool, catalog,
//! transaction manager and indexes together, and owns the maintenance
//! operations (recovery bootstrap, checkpoint, vacuum, index build).

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::info;

use strata::btree::{encode_key, BTree, Rid, BTREE_KEY_SIZE};
use strata::buffer_pool::BufferPoolManager;
use strata::catalog::Catalog;
use strata::datum::deserialize_row;
use strata::pager::Pager;
use strata::recovery::RecoveryManager;
use strata::transaction::TransactionManager;
use strata::tuple::{decode_row_id, Tuple};
use strata::wal::{LogRecord, LogRecordType, WalManager};
use strata::{Lsn, Page, PageId, StorageError, TxnId, INVALID_LSN, INVALID_TXN_ID};

use crate::errors::ExecutionError;
use crate::types::{EngineStats, VacuumReport, VacuumTableStats};

/// 1024 pages = 4 MiB of cache.
pub const DEFAULT_BUFFER_POOL_PAGES: usize = 1024;

const DATA_FILE: &str = "data.db";
const WAL_FILE: &str = "wal.log";
const META_FILE: &str = "minidb.meta";

pub struct Engine {
    data_dir: PathBuf,
    pub(crate) wal: Arc<WalManager>,
    pager: Arc<Pager>,
    pub(crate) bpm: Arc<BufferPoolManager>,
    pub(crate) catalog: Catalog,
    pub(crate) tm: TransactionManager,
    pub(crate) indexes: HashMap<u32, BTree>,
    pub(crate) current_txn: Option<TxnId>,
}

impl Engine {
    /// Opens or creates the database under `data_dir` and runs crash
    /// recovery against whatever the WAL holds.
    pub fn new<P: AsRef<Path>>(
        data_dir: P,
        buffer_pool_pages: usize,
    ) -> Result<Engine, ExecutionError> {
        let data_dir = data_dir.as_ref().to_path_buf();
        fs::create_dir_all(&data_dir).map_err(StorageError::from)?;

        let capacity = if buffer_pool_pages == 0 {
            DEFAULT_BUFFER_POOL_PAGES
        } else {
            buffer_pool_pages.max(2)
        };

        let wal = Arc::new(WalManager::open(data_dir.join(WAL_FILE))?);
        let pager = Arc::new(Pager::open(data_dir.join(DATA_FILE))?);
        let bpm = Arc::new(BufferPoolManager::with_wal(
            pager.clone(),
            capacity,
            wal.clone(),
        ));

        let meta_path = data_dir.join(META_FILE);
        let catalog = if meta_path.exists() {
            let page_id = load_meta(&meta_path)?;
            Catalog::load(bpm.clone(), page_id)?
        } else {
            let catalog = Catalog::create(bpm.clone())?;
            save_meta(&meta_path, catalog.page_id())?;
            bpm.flush(catalog.page_id())?;
            catalog
        };

        let tm = TransactionManager::new(wal.clone());
        tm.set_next_txn_id(wal.max_txn_id() + 1);

        let mut engine = Engine {
            data_dir,
            wal,
            pager,
            bpm,
            catalog,
            tm,
            indexes: HashMap::new(),
            current_txn: None,
        };

        engine.recover()?;
        engine.load_indexes();
        Ok(engine)
    }

    /// ARIES Analysis/Redo/Undo over the log, then a full page flush and a
    /// transaction-counter bump past everything the WAL has seen.
    fn recover(&mut self) -> Result<(), ExecutionError> {
        let wal_path = self.data_dir.join(WAL_FILE);
        let mut rm = RecoveryManager::new(&wal_path);

        let bpm = self.bpm.clone();
        let redo_bpm = bpm.clone();
        let undo_bpm = bpm.clone();
        rm.recover(
            &self.wal,
            move |record| apply_redo(&redo_bpm, record),
            move |record| apply_undo(&undo_bpm, record),
            move |page_id| match bpm.fetch(page_id) {
                Ok(guard) => guard.read().lsn(),
                Err(_) => INVALID_LSN,
            },
        )?;

        self.bpm.flush_all()?;

        let mut next_txn_id = self.wal.max_txn_id();
        for txn_id in rm.active_txn_table().keys() {
            next_txn_id = next_txn_id.max(*txn_id);
        }
        self.tm.set_next_txn_id(next_txn_id + 1);
        Ok(())
    }

    fn load_indexes(&mut self) {
        for name in self.catalog.table_names() {
            let Some(table_id) = self.catalog.table_id(&name) else {
                continue;
            };
            if let Some(root) = self.catalog.index_root(table_id) {
                self.indexes
                    .insert(table_id, BTree::load(self.bpm.clone(), root, BTREE_KEY_SIZE));
            }
        }
    }

    /// Builds a B-tree over the column's existing rows.
    pub fn create_index(&mut self, table_name: &str, column: &str) -> Result<(), ExecutionError> {
        let table_id = self
            .catalog
            .table_id(table_name)
            .ok_or_else(|| ExecutionError::TableNotFound(table_name.to_string()))?;
        if self.indexes.contains_key(&table_id) {
            return Err(ExecutionError::IndexExists(table_name.to_string()));
        }

        let schema = self
            .catalog
            .schema(table_name)
            .expect("table id implies schema")
            .clone();
        let column_idx = schema
            .column_index(column)
            .ok_or_else(|| ExecutionError::ColumnNotFound(column.to_string()))?;

        let mut btree = BTree::create(self.bpm.clone(), BTREE_KEY_SIZE)?;
        let tuples = self
            .catalog
            .heap(table_id)
            .expect("table id implies heap")
            .scan()?;
        for entry in tuples {
            let values = deserialize_row(&entry.tuple.data, &schema)?;
            let value = &values[column_idx];
            if value.is_null() {
                continue;
            }
            btree.insert(
                &encode_key(value, BTREE_KEY_SIZE),
                Rid {
                    page_id: entry.page_id,
                    slot_num: entry.slot_num,
                    table_id,
                },
            )?;
        }

        self.catalog
            .set_index(table_id, btree.root_page_id(), column)?;
        self.bpm.flush_all()?;
        self.indexes.insert(table_id, btree);
        info!(table = table_name, column, "index created");
        Ok(())
    }

    /// Exact-key index lookup; returns the heap location when present.
    pub fn index_lookup(
        &self,
        table_name: &str,
        key: &strata::datum::Value,
    ) -> Result<Option<Rid>, ExecutionError> {
        let table_id = self
            .catalog
            .table_id(table_name)
            .ok_or_else(|| ExecutionError::TableNotFound(table_name.to_string()))?;
        let Some(btree) = self.indexes.get(&table_id) else {
            return Ok(None);
        };
        Ok(btree.search(&encode_key(key, BTREE_KEY_SIZE))?)
    }

    /// Fuzzy checkpoint: snapshot the dirty set and the running set, make
    /// the log durable, flush the pages, then force a Checkpoint record so
    /// Analysis can skip everything before it.
    pub fn checkpoint(&mut self) -> Result<(), ExecutionError> {
        self.catalog.save()?;
        let dirty_pages = self.bpm.dirty_pages();
        let active_txns = self.tm.active_txns();

        self.wal.flush()?;
        self.bpm.flush_all()?;

        let lsn = self.wal.log_checkpoint(active_txns, dirty_pages)?;
        info!(lsn, "checkpoint written");
        Ok(())
    }

    /// Reclaims versions no snapshot can need again: xmax set, older than
    /// the global xmin, and committed. Tables with an index get it rebuilt
    /// from the survivors so no stale RID outlives the pass.
    pub fn vacuum(&mut self) -> Result<VacuumReport, ExecutionError> {
        let global_xmin = self.tm.global_xmin();
        let mut report = VacuumReport::default();

        for table_name in self.catalog.table_names() {
            let Some(table_id) = self.catalog.table_id(&table_name) else {
                continue;
            };
            let heap = self.catalog.heap(table_id).expect("table id implies heap");
            let tuples = heap.scan()?;

            let mut stats = VacuumTableStats {
                table_name: table_name.clone(),
                scanned: tuples.len(),
                removed: 0,
            };

            for entry in &tuples {
                let xmax = entry.tuple.xmax;
                if xmax != INVALID_TXN_ID
                    && xmax < global_xmin
                    && self.tm.is_committed(xmax)
                {
                    heap.delete(entry.page_id, entry.slot_num)?;
                    stats.removed += 1;
                }
            }

            self.rebuild_index(&table_name, table_id)?;
            report.tables.push(stats);
        }

        self.bpm.flush_all()?;
        self.tm.prune_committed_before(global_xmin);
        info!(removed = report.total_removed(), "vacuum complete");
        Ok(report)
    }

    /// Replaces a table's index with one built from its current live
    /// tuples. No-op for unindexed tables.
    fn rebuild_index(&mut self, table_name: &str, table_id: u32) -> Result<(), ExecutionError> {
        if !self.indexes.contains_key(&table_id) {
            return Ok(());
        }
        let column = self
            .catalog
            .index_column(table_id)
            .unwrap_or_default()
            .to_string();
        let schema = self
            .catalog
            .schema(table_name)
            .expect("indexed table has a schema")
            .clone();
        let Some(column_idx) = schema.column_index(&column) else {
            return Ok(());
        };

        let mut btree = BTree::create(self.bpm.clone(), BTREE_KEY_SIZE)?;
        let tuples = self.catalog.heap(table_id).expect("heap").scan()?;
        for entry in tuples {
            let values = deserialize_row(&entry.tuple.data, &schema)?;
            let value = &values[column_idx];
            if value.is_null() {
                continue;
            }
            btree.insert(
                &encode_key(value, BTREE_KEY_SIZE),
                Rid {
                    page_id: entry.page_id,
                    slot_num: entry.slot_num,
                    table_id,
                },
            )?;
        }

        self.catalog
            .set_index(table_id, btree.root_page_id(), &column)?;
        self.indexes.insert(table_id, btree);
        Ok(())
    }

    /// Flushes the WAL and every dirty page, then syncs the data file.
    pub fn close(self) -> Result<(), ExecutionError> {
        self.wal.flush()?;
        self.catalog.save()?;
        self.bpm.flush_all()?;
        self.pager.sync()?;
        Ok(())
    }

    pub fn stats(&self) -> EngineStats {
        let (buffer_hits, buffer_misses, buffer_cached) = self.bpm.stats();
        EngineStats {
            buffer_hits,
            buffer_misses,
            buffer_cached,
            active_txns: self.tm.active_count(),
            wal_current_lsn: self.wal.current_lsn(),
            wal_flushed_lsn: self.wal.flushed_lsn(),
            disk_pages: self.pager.num_pages(),
            tables: self.catalog.table_count(),
        }
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    pub fn in_transaction(&self) -> bool {
        self.current_txn.is_some()
    }
}

/// Overwrite-or-append: redo of an Insert must land the image in exactly
/// the slot the original got.
fn redo_write_slot(page: &mut Page, slot_num: u16, data: &[u8]) -> strata::Result<()> {
    if slot_num < page.slot_count() {
        return page.update_tuple(slot_num, data);
    }
    let assigned = page.insert_tuple(data)?;
    if assigned != slot_num {
        return Err(StorageError::Corruption(format!(
            "redo expected slot {slot_num} on page {} but got {assigned}",
            page.id
        )));
    }
    Ok(())
}

fn apply_redo(bpm: &BufferPoolManager, record: &LogRecord) -> strata::Result<()> {
    match record.kind {
        LogRecordType::Insert => {
            let guard = bpm.fetch(record.page_id)?;
            let mut page = guard.write();
            redo_write_slot(&mut page, record.slot_num, &record.after_image)?;
            stamp(&mut page, record.lsn);
        }
        LogRecordType::Update => {
            {
                let guard = bpm.fetch(record.page_id)?;
                let mut page = guard.write();
                redo_write_slot(&mut page, record.slot_num, &record.after_image)?;
                stamp(&mut page, record.lsn);
            }
            // The old version lives at the location packed into row_id;
            // re-mark its deletion when it is a different slot.
            let (old_page, old_slot) = decode_row_id(record.row_id);
            if (old_page, old_slot) != (record.page_id, record.slot_num) {
                let guard = bpm.fetch(old_page)?;
                let mut page = guard.write();
                if let Ok(data) = page.get_tuple(old_slot) {
                    let mut tuple = Tuple::deserialize(&data)?;
                    tuple.xmax = record.txn_id;
                    page.update_tuple(old_slot, &tuple.serialize())?;
                }
                stamp(&mut page, record.lsn);
            }
        }
        LogRecordType::Delete => {
            let guard = bpm.fetch(record.page_id)?;
            let mut page = guard.write();
            if let Ok(data) = page.get_tuple(record.slot_num) {
                let mut tuple = Tuple::deserialize(&data)?;
                tuple.xmax = record.txn_id;
                page.update_tuple(record.slot_num, &tuple.serialize())?;
            }
            stamp(&mut page, record.lsn);
        }
        LogRecordType::Clr => {
            let guard = bpm.fetch(record.page_id)?;
            let mut page = guard.write();
            if !record.after_image.is_empty() {
                redo_write_slot(&mut page, record.slot_num, &record.after_image)?;
            }
            stamp(&mut page, record.lsn);
        }
        _ => {}
    }
    Ok(())
}

fn apply_undo(bpm: &BufferPoolManager, record: &LogRecord) -> strata::Result<()> {
    match record.kind {
        LogRecordType::Insert => {
            let guard = bpm.fetch(record.page_id)?;
            guard.write().delete_tuple(record.slot_num)?;
        }
        LogRecordType::Update => {
            {
                let guard = bpm.fetch(record.page_id)?;
                guard.write().delete_tuple(record.slot_num)?;
            }
            let (old_page, old_slot) = decode_row_id(record.row_id);
            if (old_page, old_slot) != (record.page_id, record.slot_num) {
                clear_xmax(bpm, old_page, old_slot)?;
            }
        }
        LogRecordType::Delete => {
            clear_xmax(bpm, record.page_id, record.slot_num)?;
        }
        _ => {}
    }
    Ok(())
}

fn clear_xmax(bpm: &BufferPoolManager, page_id: PageId, slot_num: u16) -> strata::Result<()> {
    let guard = bpm.fetch(page_id)?;
    let mut page = guard.write();
    if let Ok(data) = page.get_tuple(slot_num) {
        let mut tuple = Tuple::deserialize(&data)?;
        tuple.xmax = INVALID_TXN_ID;
        page.update_tuple(slot_num, &tuple.serialize())?;
    }
    Ok(())
}

fn stamp(page: &mut Page, lsn: Lsn) {
    page.set_lsn(lsn);
    page.is_dirty = true;
}

fn save_meta(path: &Path, page_id: PageId) -> Result<(), ExecutionError> {
    fs::write(path, format!("{page_id}\n")).map_err(StorageError::from)?;
    Ok(())
}

fn load_meta(path: &Path) -> Result<PageId, ExecutionError> {
    let text = fs::read_to_string(path).map_err(StorageError::from)?;
    text.trim()
        .parse::<PageId>()
        .map_err(|_| StorageError::Corruption(format!("bad meta file {}", path.display())).into())
}
