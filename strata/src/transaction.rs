//! Transaction lifecycle and MVCC snapshot visibility.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

use crate::error::StorageError;
use crate::tuple::Tuple;
use crate::wal::WalManager;
use crate::{CommandId, Result, TxnId, INVALID_TXN_ID};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxnStatus {
    Running,
    Committed,
    Aborted,
}

/// A point-in-time view of the database, captured at transaction begin.
#[derive(Debug, Clone)]
pub struct Snapshot {
    /// Smallest TxnID that was running at capture.
    pub xmin: TxnId,
    /// Next TxnID to be assigned; ids at or past this are invisible.
    pub xmax: TxnId,
    /// Transactions running at capture.
    pub active_txns: Arc<HashSet<TxnId>>,
    /// Transactions known to have aborted in this process. A runtime abort
    /// leaves its heap mutations in place; they stay invisible through this
    /// set until the next restart physically undoes them.
    pub aborted_txns: Arc<HashSet<TxnId>>,
}

/// Outcome of checking a tuple for an UPDATE/DELETE.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateCheck {
    /// Not visible to the snapshot at all.
    Invisible,
    /// Visible but already modified by the given still-open transaction.
    Conflict(TxnId),
    /// Safe to modify.
    Updatable,
}

impl Snapshot {
    /// A transaction's effects are visible iff it is a real id below the
    /// snapshot horizon and neither running at capture nor aborted.
    pub fn is_txn_visible(&self, txn_id: TxnId) -> bool {
        if txn_id == INVALID_TXN_ID {
            return false;
        }
        if txn_id >= self.xmax {
            return false;
        }
        if self.active_txns.contains(&txn_id) {
            return false;
        }
        !self.aborted_txns.contains(&txn_id)
    }

    /// A tuple version is visible iff its creator is visible and its
    /// deletion, if any, is not.
    pub fn is_visible(&self, tuple: &Tuple) -> bool {
        if !self.is_txn_visible(tuple.xmin) {
            return false;
        }
        if tuple.xmax == INVALID_TXN_ID {
            return true;
        }
        !self.is_txn_visible(tuple.xmax)
    }

    /// Visibility check for writers: a visible tuple whose xmax belongs to
    /// another transaction that is still in flight (or began after this
    /// snapshot) is a write-write conflict. First writer wins.
    pub fn check_update(&self, tuple: &Tuple, my_txn_id: TxnId) -> UpdateCheck {
        if !self.is_visible(tuple) {
            return UpdateCheck::Invisible;
        }
        if tuple.xmax != INVALID_TXN_ID && tuple.xmax != my_txn_id {
            if self.active_txns.contains(&tuple.xmax) || tuple.xmax >= self.xmax {
                return UpdateCheck::Conflict(tuple.xmax);
            }
        }
        UpdateCheck::Updatable
    }
}

/// A running transaction.
#[derive(Debug, Clone)]
pub struct Transaction {
    pub id: TxnId,
    pub status: TxnStatus,
    pub snapshot: Snapshot,
    command_id: CommandId,
}

struct TmInner {
    active: HashMap<TxnId, Transaction>,
    /// Consulted by vacuum: only a committed xmax makes a version dead.
    committed: HashSet<TxnId>,
    /// Consulted by visibility: see `Snapshot::aborted_txns`.
    aborted: HashSet<TxnId>,
    global_xmin: TxnId,
}

pub struct TransactionManager {
    wal: Arc<WalManager>,
    next_txn_id: AtomicU64,
    inner: Mutex<TmInner>,
}

impl TransactionManager {
    pub fn new(wal: Arc<WalManager>) -> Self {
        TransactionManager {
            wal,
            next_txn_id: AtomicU64::new(1),
            inner: Mutex::new(TmInner {
                active: HashMap::new(),
                committed: HashSet::new(),
                aborted: HashSet::new(),
                global_xmin: TxnId::MAX,
            }),
        }
    }

    /// Starts a transaction: assigns an id, captures the snapshot from the
    /// running set before installing, installs, and logs Begin.
    pub fn begin(&self) -> Result<TxnId> {
        let txn_id = self.next_txn_id.fetch_add(1, Ordering::SeqCst);

        let mut inner = self.inner.lock();
        let active: HashSet<TxnId> = inner.active.keys().copied().collect();
        let xmax = self.next_txn_id.load(Ordering::SeqCst);
        let xmin = active.iter().min().copied().unwrap_or(xmax);
        let snapshot = Snapshot {
            xmin,
            xmax,
            active_txns: Arc::new(active),
            aborted_txns: Arc::new(inner.aborted.clone()),
        };

        inner.active.insert(
            txn_id,
            Transaction {
                id: txn_id,
                status: TxnStatus::Running,
                snapshot,
                command_id: 0,
            },
        );
        inner.recompute_global_xmin();

        if let Err(e) = self.wal.log_begin(txn_id) {
            inner.active.remove(&txn_id);
            inner.recompute_global_xmin();
            return Err(e);
        }

        debug!(txn_id, "begin");
        Ok(txn_id)
    }

    /// Commits: the Commit record is forced before the transaction leaves
    /// the running set, so commit returning implies durability.
    pub fn commit(&self, txn_id: TxnId) -> Result<()> {
        let mut inner = self.inner.lock();
        match inner.active.get(&txn_id) {
            Some(txn) if txn.status == TxnStatus::Running => {}
            _ => return Err(StorageError::TransactionNotRunning(txn_id)),
        }

        self.wal.log_commit(txn_id)?;

        inner.active.remove(&txn_id);
        inner.committed.insert(txn_id);
        inner.recompute_global_xmin();
        debug!(txn_id, "commit");
        Ok(())
    }

    /// Aborts. Heap mutations are not reversed here; visibility hides them
    /// through the aborted set and the next restart undoes them physically.
    pub fn rollback(&self, txn_id: TxnId) -> Result<()> {
        let mut inner = self.inner.lock();
        match inner.active.get(&txn_id) {
            Some(txn) if txn.status == TxnStatus::Running => {}
            _ => return Err(StorageError::TransactionNotRunning(txn_id)),
        }

        self.wal.log_abort(txn_id)?;

        inner.active.remove(&txn_id);
        inner.aborted.insert(txn_id);
        inner.recompute_global_xmin();
        debug!(txn_id, "rollback");
        Ok(())
    }

    pub fn snapshot_of(&self, txn_id: TxnId) -> Option<Snapshot> {
        self.inner
            .lock()
            .active
            .get(&txn_id)
            .map(|txn| txn.snapshot.clone())
    }

    /// Pre-incremented per-transaction command id: a sub-statement can tell
    /// its own writes apart from earlier ones in the same transaction.
    pub fn next_command_id(&self, txn_id: TxnId) -> Result<CommandId> {
        let mut inner = self.inner.lock();
        let txn = inner
            .active
            .get_mut(&txn_id)
            .ok_or(StorageError::TransactionNotRunning(txn_id))?;
        txn.command_id += 1;
        Ok(txn.command_id)
    }

    /// Oldest running TxnID, or `TxnId::MAX` when nothing runs.
    pub fn global_xmin(&self) -> TxnId {
        self.inner.lock().global_xmin
    }

    pub fn active_txns(&self) -> Vec<TxnId> {
        self.inner.lock().active.keys().copied().collect()
    }

    pub fn active_count(&self) -> usize {
        self.inner.lock().active.len()
    }

    pub fn is_active(&self, txn_id: TxnId) -> bool {
        self.inner.lock().active.contains_key(&txn_id)
    }

    pub fn is_committed(&self, txn_id: TxnId) -> bool {
        self.inner.lock().committed.contains(&txn_id)
    }

    /// Drops committed-set entries below the cutoff; nothing can ask about
    /// them once every snapshot sees past them.
    pub fn prune_committed_before(&self, cutoff: TxnId) {
        self.inner.lock().committed.retain(|id| *id >= cutoff);
    }

    /// Recovery bootstrap: continue numbering past everything in the WAL.
    pub fn set_next_txn_id(&self, next: TxnId) {
        self.next_txn_id.store(next.max(1), Ordering::SeqCst);
    }
}

impl TmInner {
    fn recompute_global_xmin(&mut self) {
        self.global_xmin = self
            .active
            .keys()
            .min()
            .copied()
            .unwrap_or(TxnId::MAX);
    }
}
