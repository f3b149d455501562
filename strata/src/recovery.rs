//! ARIES-style crash recovery: Analysis, Redo (repeating history), Undo
//! (with compensation log records).
//!
//! The driver owns the Active Transaction Table and Dirty Page Table; the
//! engine supplies callbacks that re-execute or revert individual records
//! against the buffer pool, plus a page-LSN probe for the redo skip check.

use std::collections::{BinaryHeap, HashMap};
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::error::StorageError;
use crate::transaction::TxnStatus;
use crate::wal::{LogRecord, LogRecordType, WalManager};
use crate::{Lsn, PageId, Result, TxnId, INVALID_LSN};

/// One Active Transaction Table entry.
#[derive(Debug, Clone)]
pub struct TxnEntry {
    pub txn_id: TxnId,
    pub status: TxnStatus,
    pub last_lsn: Lsn,
    /// Set by CLRs: the next LSN of this transaction still needing undo.
    pub undo_next: Lsn,
}

pub struct RecoveryManager {
    wal_path: PathBuf,
    active_txn_table: HashMap<TxnId, TxnEntry>,
    dirty_page_table: HashMap<PageId, Lsn>,
}

impl RecoveryManager {
    pub fn new<P: AsRef<Path>>(wal_path: P) -> Self {
        RecoveryManager {
            wal_path: wal_path.as_ref().to_path_buf(),
            active_txn_table: HashMap::new(),
            dirty_page_table: HashMap::new(),
        }
    }

    pub fn active_txn_table(&self) -> &HashMap<TxnId, TxnEntry> {
        &self.active_txn_table
    }

    pub fn dirty_page_table(&self) -> &HashMap<PageId, Lsn> {
        &self.dirty_page_table
    }

    /// Runs the three phases. `redo` and `undo` re-execute/revert one
    /// record; `page_lsn` reports a page's current on-disk LSN. CLRs and
    /// the final Abort records are appended through `wal`.
    pub fn recover<R, U, L>(
        &mut self,
        wal: &WalManager,
        mut redo: R,
        mut undo: U,
        mut page_lsn: L,
    ) -> Result<()>
    where
        R: FnMut(&LogRecord) -> Result<()>,
        U: FnMut(&LogRecord) -> Result<()>,
        L: FnMut(PageId) -> Lsn,
    {
        let records = WalManager::read_records(&self.wal_path)?;
        if records.is_empty() {
            return Ok(());
        }

        let checkpoint_lsn = self.analysis(&records);
        info!(
            checkpoint_lsn,
            active_txns = self.active_txn_table.len(),
            dirty_pages = self.dirty_page_table.len(),
            "analysis complete"
        );

        self.redo_phase(&records, &mut redo, &mut page_lsn)?;
        self.undo_phase(&records, wal, &mut undo)?;
        Ok(())
    }

    /// Seeds ATT/DPT from the last checkpoint, then replays everything
    /// after it.
    fn analysis(&mut self, records: &[LogRecord]) -> Lsn {
        let mut checkpoint_lsn = INVALID_LSN;
        for record in records {
            if record.kind == LogRecordType::Checkpoint {
                checkpoint_lsn = record.lsn;
                self.active_txn_table = record
                    .active_txns
                    .iter()
                    .map(|txn_id| {
                        (
                            *txn_id,
                            TxnEntry {
                                txn_id: *txn_id,
                                status: TxnStatus::Running,
                                last_lsn: INVALID_LSN,
                                undo_next: INVALID_LSN,
                            },
                        )
                    })
                    .collect();
                self.dirty_page_table = record.dirty_pages.iter().copied().collect();
            }
        }

        for record in records {
            if checkpoint_lsn != INVALID_LSN && record.lsn <= checkpoint_lsn {
                continue;
            }

            match record.kind {
                LogRecordType::Begin => {
                    self.active_txn_table.insert(
                        record.txn_id,
                        TxnEntry {
                            txn_id: record.txn_id,
                            status: TxnStatus::Running,
                            last_lsn: record.lsn,
                            undo_next: INVALID_LSN,
                        },
                    );
                }
                LogRecordType::Commit => {
                    self.active_txn_table.remove(&record.txn_id);
                }
                LogRecordType::Abort => {
                    if let Some(entry) = self.active_txn_table.get_mut(&record.txn_id) {
                        entry.status = TxnStatus::Aborted;
                        entry.last_lsn = record.lsn;
                    }
                }
                LogRecordType::Insert | LogRecordType::Update | LogRecordType::Delete => {
                    if let Some(entry) = self.active_txn_table.get_mut(&record.txn_id) {
                        entry.last_lsn = record.lsn;
                    }
                    self.dirty_page_table
                        .entry(record.page_id)
                        .or_insert(record.lsn);
                }
                LogRecordType::Clr => {
                    if let Some(entry) = self.active_txn_table.get_mut(&record.txn_id) {
                        entry.last_lsn = record.lsn;
                        entry.undo_next = record.undo_next_lsn;
                    }
                    self.dirty_page_table
                        .entry(record.page_id)
                        .or_insert(record.lsn);
                }
                LogRecordType::Checkpoint => {}
            }
        }

        checkpoint_lsn
    }

    /// Repeats history from the minimum rec-LSN. A record is applied only
    /// when its page is in the DPT, at or past that page's rec-LSN, and
    /// newer than the page's current LSN; the page-LSN check makes replay
    /// idempotent.
    fn redo_phase<R, L>(&self, records: &[LogRecord], redo: &mut R, page_lsn: &mut L) -> Result<()>
    where
        R: FnMut(&LogRecord) -> Result<()>,
        L: FnMut(PageId) -> Lsn,
    {
        let Some(min_rec_lsn) = self.dirty_page_table.values().min().copied() else {
            info!("no dirty pages, skipping redo");
            return Ok(());
        };

        let mut applied = 0usize;
        for record in records {
            if record.lsn < min_rec_lsn || !record.kind.is_data_mutation() {
                continue;
            }
            let Some(rec_lsn) = self.dirty_page_table.get(&record.page_id) else {
                continue;
            };
            if record.lsn < *rec_lsn {
                continue;
            }
            if page_lsn(record.page_id) >= record.lsn {
                continue;
            }

            debug!(lsn = record.lsn, kind = ?record.kind, page_id = record.page_id, "redo");
            redo(record).map_err(|e| {
                StorageError::Corruption(format!("redo failed at LSN {}: {e}", record.lsn))
            })?;
            applied += 1;
        }

        info!(applied, "redo complete");
        Ok(())
    }

    /// Rolls back every transaction left in the ATT, largest LSN first,
    /// logging a CLR per reverted record so a crash during undo never
    /// compensates twice.
    fn undo_phase<U>(&self, records: &[LogRecord], wal: &WalManager, undo: &mut U) -> Result<()>
    where
        U: FnMut(&LogRecord) -> Result<()>,
    {
        if self.active_txn_table.is_empty() {
            info!("no incomplete transactions, skipping undo");
            return Ok(());
        }

        let record_map: HashMap<Lsn, &LogRecord> =
            records.iter().map(|record| (record.lsn, record)).collect();

        let mut to_undo = BinaryHeap::new();
        for entry in self.active_txn_table.values() {
            if entry.undo_next != INVALID_LSN {
                to_undo.push(entry.undo_next);
            } else if entry.last_lsn != INVALID_LSN {
                to_undo.push(entry.last_lsn);
            } else if let Some(lsn) = wal.txn_last_lsn(entry.txn_id) {
                // Seeded from a checkpoint's ATT snapshot, which carries no
                // chain head; the writer rebuilt one from its open scan.
                to_undo.push(lsn);
            }
        }

        let mut reverted = 0usize;
        while let Some(lsn) = to_undo.pop() {
            let Some(record) = record_map.get(&lsn) else {
                continue;
            };

            match record.kind {
                LogRecordType::Insert | LogRecordType::Update | LogRecordType::Delete => {
                    debug!(lsn = record.lsn, kind = ?record.kind, "undo");
                    undo(record).map_err(|e| {
                        StorageError::Corruption(format!("undo failed at LSN {}: {e}", record.lsn))
                    })?;
                    reverted += 1;

                    wal.log_clr(
                        record.txn_id,
                        record.table_id,
                        record.row_id,
                        record.page_id,
                        record.slot_num,
                        record.prev_lsn,
                        record.before_image.clone(),
                    )?;

                    if record.prev_lsn != INVALID_LSN {
                        to_undo.push(record.prev_lsn);
                    }
                }
                LogRecordType::Clr => {
                    // Skip over everything this CLR already compensated.
                    if record.undo_next_lsn != INVALID_LSN {
                        to_undo.push(record.undo_next_lsn);
                    }
                }
                _ => {
                    if record.prev_lsn != INVALID_LSN {
                        to_undo.push(record.prev_lsn);
                    }
                }
            }
        }

        for txn_id in self.active_txn_table.keys() {
            wal.log_abort(*txn_id)?;
        }
        wal.flush()?;

        info!(reverted, "undo complete");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    /// Builds a WAL with one committed and one incomplete transaction and
    /// checks the tables that analysis derives from it.
    #[test]
    fn analysis_builds_att_and_dpt() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("wal.log");
        {
            let wal = WalManager::open(&path).unwrap();
            wal.log_begin(1).unwrap();
            wal.log_insert(1, 1, 0x0002_0000, 2, 0, b"a".to_vec()).unwrap();
            wal.log_commit(1).unwrap();
            wal.log_begin(2).unwrap();
            wal.log_insert(2, 1, 0x0002_0001, 2, 1, b"b".to_vec()).unwrap();
            wal.log_insert(2, 1, 0x0003_0000, 3, 0, b"c".to_vec()).unwrap();
            wal.flush().unwrap();
        }

        let mut rm = RecoveryManager::new(&path);
        let records = WalManager::read_records(&path).unwrap();
        rm.analysis(&records);

        assert!(!rm.active_txn_table().contains_key(&1));
        let entry = rm.active_txn_table().get(&2).expect("txn 2 incomplete");
        assert_eq!(entry.status, TxnStatus::Running);
        assert_eq!(entry.last_lsn, 6);

        // First dirtier of each page wins the rec-LSN.
        assert_eq!(rm.dirty_page_table().get(&2), Some(&2));
        assert_eq!(rm.dirty_page_table().get(&3), Some(&6));
    }

    #[test]
    fn analysis_seeds_from_last_checkpoint() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("wal.log");
        {
            let wal = WalManager::open(&path).unwrap();
            wal.log_begin(1).unwrap();
            wal.log_insert(1, 1, 0, 5, 0, b"x".to_vec()).unwrap();
            wal.log_checkpoint(vec![1], vec![(5, 2)]).unwrap();
            wal.log_begin(2).unwrap();
            wal.log_commit(2).unwrap();
            wal.flush().unwrap();
        }

        let mut rm = RecoveryManager::new(&path);
        let records = WalManager::read_records(&path).unwrap();
        let checkpoint_lsn = rm.analysis(&records);

        assert_eq!(checkpoint_lsn, 3);
        assert!(rm.active_txn_table().contains_key(&1));
        assert!(!rm.active_txn_table().contains_key(&2));
        assert_eq!(rm.dirty_page_table().get(&5), Some(&2));
    }

    #[test]
    fn undo_walks_largest_lsn_first_and_logs_clrs() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("wal.log");
        {
            let wal = WalManager::open(&path).unwrap();
            wal.log_begin(1).unwrap();
            wal.log_insert(1, 1, 0x0002_0000, 2, 0, b"a".to_vec()).unwrap();
            wal.log_insert(1, 1, 0x0002_0001, 2, 1, b"b".to_vec()).unwrap();
            wal.flush().unwrap();
        }

        let wal = WalManager::open(&path).unwrap();
        let mut rm = RecoveryManager::new(&path);
        let mut undone = Vec::new();
        rm.recover(
            &wal,
            |_| Ok(()),
            |record| {
                undone.push(record.lsn);
                Ok(())
            },
            |_| 0,
        )
        .unwrap();

        assert_eq!(undone, vec![3, 2]);

        let records = WalManager::read_records(&path).unwrap();
        let clrs: Vec<&LogRecord> = records
            .iter()
            .filter(|r| r.kind == LogRecordType::Clr)
            .collect();
        assert_eq!(clrs.len(), 2);
        // CLR for LSN 3 skips back past it to LSN 2, the one for LSN 2 to
        // the Begin.
        assert_eq!(clrs[0].undo_next_lsn, 2);
        assert_eq!(clrs[1].undo_next_lsn, 1);
        assert_eq!(
            records.last().unwrap().kind,
            LogRecordType::Abort,
            "undo finishes each incomplete txn with an Abort"
        );
    }

    #[test]
    fn redo_skips_pages_with_newer_lsn() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("wal.log");
        {
            let wal = WalManager::open(&path).unwrap();
            wal.log_begin(1).unwrap();
            wal.log_insert(1, 1, 0x0002_0000, 2, 0, b"a".to_vec()).unwrap();
            wal.log_commit(1).unwrap();
            wal.flush().unwrap();
        }

        let wal = WalManager::open(&path).unwrap();
        let mut rm = RecoveryManager::new(&path);
        let mut redone = 0;
        rm.recover(&wal, |_| { redone += 1; Ok(()) }, |_| Ok(()), |_| Lsn::MAX)
            .unwrap();
        assert_eq!(redone, 0, "page already carries the change");

        let mut rm = RecoveryManager::new(&path);
        let mut redone = 0;
        rm.recover(&wal, |_| { redone += 1; Ok(()) }, |_| Ok(()), |_| 0)
            .unwrap();
        assert_eq!(redone, 1, "stale page gets the change replayed");
    }

    #[test]
    fn recovery_of_empty_wal_is_a_no_op() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("wal.log");
        let wal = WalManager::open(&path).unwrap();

        let mut rm = RecoveryManager::new(&path);
        rm.recover(&wal, |_| panic!("no redo"), |_| panic!("no undo"), |_| 0)
            .unwrap();
    }
}
