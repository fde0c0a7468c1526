//! Transaction manager.

use crate::error::CoreResult;
use crate::storage::{Catalog, RowIdAllocator};
use crate::transaction::state::Transaction;
use crate::types::{SequenceNumber, TransactionId};
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Hands out transactions and installs their results.
///
/// The manager provides:
/// - Snapshot isolation: each transaction reads the catalog committed at
///   its begin plus its own writes
/// - Atomic commit: a transaction's writes become visible all at once
/// - Lost update detection: when another transaction committed in between,
///   the write log is replayed on the newer catalog and rows this
///   transaction changed must still hold the values it read
///
/// Commits are serialized by a single lock. Readers never block.
pub struct TransactionManager {
    /// Latest committed catalog.
    committed: RwLock<Arc<Catalog>>,
    /// Next transaction ID.
    next_txid: AtomicU64,
    /// Next sequence number.
    next_seq: AtomicU64,
    /// Current committed sequence (for snapshots).
    committed_seq: AtomicU64,
    /// Commit lock - one installer at a time.
    commit_lock: Mutex<()>,
    /// Active transactions.
    active_txns: RwLock<Vec<TransactionId>>,
    row_ids: RowIdAllocator,
    enforce_fk: bool,
}

impl TransactionManager {
    /// Creates a manager over an empty store.
    #[must_use]
    pub fn new(enforce_fk: bool) -> Self {
        Self {
            committed: RwLock::new(Arc::new(Catalog::new())),
            next_txid: AtomicU64::new(1),
            next_seq: AtomicU64::new(1),
            committed_seq: AtomicU64::new(0),
            commit_lock: Mutex::new(()),
            active_txns: RwLock::new(Vec::new()),
            row_ids: RowIdAllocator::new(),
            enforce_fk,
        }
    }

    /// Begins a new transaction on the current committed catalog.
    pub fn begin(&self) -> Transaction {
        let txid = TransactionId::new(self.next_txid.fetch_add(1, Ordering::SeqCst));
        let (base, snapshot_seq) = {
            let committed = self.committed.read();
            let seq = SequenceNumber::new(self.committed_seq.load(Ordering::SeqCst));
            (Arc::clone(&*committed), seq)
        };

        self.active_txns.write().push(txid);
        tracing::trace!(txid = %txid, snapshot = %snapshot_seq, "transaction started");

        Transaction::new(
            txid,
            snapshot_seq,
            base,
            self.row_ids.clone(),
            self.enforce_fk,
        )
    }

    /// Commits a transaction.
    ///
    /// A transaction that had a failing statement cannot commit and stays
    /// active so that it can still be rolled back. A transaction without
    /// writes commits without producing a new sequence number.
    ///
    /// If replaying onto a newer catalog fails, the transaction is rolled
    /// back and the error returned.
    pub fn commit(&self, txn: &mut Transaction) -> CoreResult<SequenceNumber> {
        txn.ensure_writable()?;

        let txid = txn.id();
        if txn.write_count() == 0 {
            txn.mark_committed();
            self.remove_active(txid);
            return Ok(self.committed_seq());
        }

        let _guard = self.commit_lock.lock();
        let current = Arc::clone(&*self.committed.read());
        let next = if txn.based_on(&current) {
            txn.take_working()
        } else {
            match txn.replay_onto(&current) {
                Ok(next) => next,
                Err(e) => {
                    tracing::debug!(txid = %txid, error = %e, "commit replay failed");
                    txn.mark_rolled_back();
                    self.remove_active(txid);
                    return Err(e);
                }
            }
        };

        let sequence = SequenceNumber::new(self.next_seq.fetch_add(1, Ordering::SeqCst));
        {
            let mut committed = self.committed.write();
            *committed = Arc::new(next);
            self.committed_seq.store(sequence.as_u64(), Ordering::SeqCst);
        }

        txn.mark_committed();
        self.remove_active(txid);
        tracing::trace!(txid = %txid, seq = %sequence, "transaction committed");
        Ok(sequence)
    }

    /// Rolls back a transaction, discarding its writes.
    pub fn rollback(&self, txn: &mut Transaction) -> CoreResult<()> {
        txn.ensure_active()?;
        let txid = txn.id();
        txn.mark_rolled_back();
        self.remove_active(txid);
        tracing::trace!(txid = %txid, "transaction rolled back");
        Ok(())
    }

    /// Returns the current committed sequence number.
    pub fn committed_seq(&self) -> SequenceNumber {
        SequenceNumber::new(self.committed_seq.load(Ordering::SeqCst))
    }

    /// Returns the latest committed catalog.
    pub fn snapshot(&self) -> Arc<Catalog> {
        Arc::clone(&*self.committed.read())
    }

    /// Returns the number of active transactions.
    pub fn active_count(&self) -> usize {
        self.active_txns.read().len()
    }

    fn remove_active(&self, txid: TransactionId) {
        self.active_txns.write().retain(|&id| id != txid);
    }
}

impl std::fmt::Debug for TransactionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransactionManager")
            .field("next_txid", &self.next_txid.load(Ordering::SeqCst))
            .field("committed_seq", &self.committed_seq.load(Ordering::SeqCst))
            .field("active_count", &self.active_count())
            .finish_non_exhaustive()
    }
}
