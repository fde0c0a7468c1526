//! Transaction state.

use crate::error::{CoreError, CoreResult};
use crate::schema::TableSchema;
use crate::storage::{Catalog, RowIdAllocator};
use crate::types::{RowId, SequenceNumber, TransactionId};
use crate::value::Value;
use std::sync::Arc;

/// State of a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    /// Transaction is active and can perform operations.
    Active,
    /// Transaction has been committed.
    Committed,
    /// Transaction has been rolled back.
    RolledBack,
}

/// A write recorded by a transaction, replayed at commit when the store
/// moved on since the transaction began.
#[derive(Debug, Clone)]
pub enum PendingWrite {
    /// Create a table.
    CreateTable(Arc<TableSchema>),
    /// Drop a table.
    DropTable {
        /// Table name.
        table: String,
    },
    /// Insert a row.
    Insert {
        /// Table name.
        table: String,
        /// New row ID.
        row_id: RowId,
        /// Row as stored.
        row: Vec<Value>,
    },
    /// Replace a row.
    Update {
        /// Table name.
        table: String,
        /// Row ID.
        row_id: RowId,
        /// Row as this transaction saw it.
        before: Vec<Value>,
        /// Row as stored.
        after: Vec<Value>,
    },
    /// Delete a row.
    Delete {
        /// Table name.
        table: String,
        /// Row ID.
        row_id: RowId,
        /// Row as this transaction saw it.
        before: Vec<Value>,
    },
}

impl PendingWrite {
    /// Name of the table the write touches.
    #[must_use]
    pub fn table(&self) -> &str {
        match self {
            Self::CreateTable(schema) => schema.name(),
            Self::DropTable { table }
            | Self::Insert { table, .. }
            | Self::Update { table, .. }
            | Self::Delete { table, .. } => table,
        }
    }

    /// Applies the write to `catalog`, detecting lost updates.
    pub(crate) fn apply(&self, catalog: &mut Catalog, enforce_fk: bool) -> CoreResult<()> {
        match self {
            Self::CreateTable(schema) => {
                catalog.create_table(schema.as_ref().clone())?;
            }
            Self::DropTable { table } => {
                catalog.drop_table(table, enforce_fk)?;
            }
            Self::Insert { table, row_id, row } => {
                catalog.insert(table, *row_id, row.clone(), enforce_fk)?;
            }
            Self::Update {
                table,
                row_id,
                before,
                after,
            } => {
                ensure_unchanged(catalog, table, *row_id, before)?;
                catalog.update(table, *row_id, after.clone(), enforce_fk)?;
            }
            Self::Delete {
                table,
                row_id,
                before,
            } => {
                ensure_unchanged(catalog, table, *row_id, before)?;
                catalog.delete(table, *row_id, enforce_fk)?;
            }
        }
        Ok(())
    }
}

fn ensure_unchanged(catalog: &Catalog, table: &str, id: RowId, before: &[Value]) -> CoreResult<()> {
    let current = catalog
        .table(table)
        .and_then(|t| t.get(id))
        .ok_or_else(|| CoreError::conflict(table))?;
    if current == before {
        Ok(())
    } else {
        Err(CoreError::conflict(table))
    }
}

/// An active transaction.
///
/// Reads see the store as of [`begin`](super::TransactionManager::begin)
/// plus this transaction's own writes. Writes are applied to a private
/// working copy immediately, with full constraint checks, and recorded in
/// order for replay at commit. Nothing is visible to other transactions
/// until commit.
#[derive(Debug)]
pub struct Transaction {
    /// Transaction ID.
    id: TransactionId,
    /// Snapshot sequence number (reads see this point in time).
    snapshot_seq: SequenceNumber,
    /// Current state.
    state: TransactionState,
    /// Committed catalog at begin.
    base: Arc<Catalog>,
    /// Base plus own writes.
    working: Catalog,
    /// Writes in execution order.
    writes: Vec<PendingWrite>,
    /// Set once a statement fails; the transaction can then only roll back.
    failure: Option<String>,
    row_ids: RowIdAllocator,
    enforce_fk: bool,
}

impl Transaction {
    /// Creates a new transaction over a committed snapshot.
    pub(crate) fn new(
        id: TransactionId,
        snapshot_seq: SequenceNumber,
        base: Arc<Catalog>,
        row_ids: RowIdAllocator,
        enforce_fk: bool,
    ) -> Self {
        let working = base.as_ref().clone();
        Self {
            id,
            snapshot_seq,
            state: TransactionState::Active,
            base,
            working,
            writes: Vec::new(),
            failure: None,
            row_ids,
            enforce_fk,
        }
    }

    /// Returns the transaction ID.
    #[must_use]
    pub fn id(&self) -> TransactionId {
        self.id
    }

    /// Returns the snapshot sequence number.
    #[must_use]
    pub fn snapshot_seq(&self) -> SequenceNumber {
        self.snapshot_seq
    }

    /// Returns the current state.
    #[must_use]
    pub fn state(&self) -> TransactionState {
        self.state
    }

    /// Checks if the transaction is still active.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.state == TransactionState::Active
    }

    /// Returns the failure that made this transaction uncommittable.
    #[must_use]
    pub fn failure(&self) -> Option<&str> {
        self.failure.as_deref()
    }

    /// Returns true if a statement failed inside this transaction.
    #[must_use]
    pub fn is_failed(&self) -> bool {
        self.failure.is_some()
    }

    /// The catalog as seen by this transaction.
    #[must_use]
    pub fn catalog(&self) -> &Catalog {
        &self.working
    }

    /// Returns all pending writes in execution order.
    pub fn pending_writes(&self) -> impl Iterator<Item = &PendingWrite> {
        self.writes.iter()
    }

    /// Returns the number of pending writes.
    #[must_use]
    pub fn write_count(&self) -> usize {
        self.writes.len()
    }

    /// Marks the transaction as failed. Only the first reason is kept.
    pub fn mark_failed(&mut self, reason: impl Into<String>) {
        if self.failure.is_none() {
            self.failure = Some(reason.into());
        }
    }

    /// Creates a table.
    pub fn create_table(&mut self, schema: TableSchema) -> CoreResult<()> {
        self.ensure_writable()?;
        let schema = self.working.create_table(schema)?;
        self.writes.push(PendingWrite::CreateTable(schema));
        Ok(())
    }

    /// Drops a table.
    pub fn drop_table(&mut self, name: &str) -> CoreResult<()> {
        self.ensure_writable()?;
        let schema = self.working.drop_table(name, self.enforce_fk)?;
        self.writes.push(PendingWrite::DropTable {
            table: schema.name().to_string(),
        });
        Ok(())
    }

    /// Inserts a row, returning its ID and the row as stored.
    pub fn insert(&mut self, table: &str, row: Vec<Value>) -> CoreResult<(RowId, Vec<Value>)> {
        self.ensure_writable()?;
        let row_id = self.row_ids.allocate();
        let row = self.working.insert(table, row_id, row, self.enforce_fk)?;
        self.writes.push(PendingWrite::Insert {
            table: table.to_string(),
            row_id,
            row: row.clone(),
        });
        Ok((row_id, row))
    }

    /// Replaces a row.
    pub fn update(&mut self, table: &str, row_id: RowId, row: Vec<Value>) -> CoreResult<()> {
        self.ensure_writable()?;
        let (before, after) = self.working.update(table, row_id, row, self.enforce_fk)?;
        self.writes.push(PendingWrite::Update {
            table: table.to_string(),
            row_id,
            before,
            after,
        });
        Ok(())
    }

    /// Deletes a row.
    pub fn delete(&mut self, table: &str, row_id: RowId) -> CoreResult<()> {
        self.ensure_writable()?;
        let before = self.working.delete(table, row_id, self.enforce_fk)?;
        self.writes.push(PendingWrite::Delete {
            table: table.to_string(),
            row_id,
            before,
        });
        Ok(())
    }

    /// Returns true if the committed store is still the one this
    /// transaction started from.
    pub(crate) fn based_on(&self, committed: &Arc<Catalog>) -> bool {
        Arc::ptr_eq(&self.base, committed)
    }

    /// Takes the working catalog for installation as the new committed one.
    pub(crate) fn take_working(&mut self) -> Catalog {
        std::mem::take(&mut self.working)
    }

    /// Replays the write log on top of `catalog`.
    pub(crate) fn replay_onto(&self, catalog: &Catalog) -> CoreResult<Catalog> {
        let mut next = catalog.clone();
        for write in &self.writes {
            write.apply(&mut next, self.enforce_fk)?;
        }
        Ok(next)
    }

    /// Marks the transaction as committed.
    pub(crate) fn mark_committed(&mut self) {
        self.state = TransactionState::Committed;
    }

    /// Marks the transaction as rolled back and discards its writes.
    pub(crate) fn mark_rolled_back(&mut self) {
        self.state = TransactionState::RolledBack;
        self.writes.clear();
        self.working = Catalog::default();
    }

    /// Ensures the transaction is active.
    pub(crate) fn ensure_active(&self) -> CoreResult<()> {
        match self.state {
            TransactionState::Active => Ok(()),
            TransactionState::Committed => Err(CoreError::invalid_operation(
                "transaction already committed",
            )),
            TransactionState::RolledBack => Err(CoreError::invalid_operation(
                "transaction already rolled back",
            )),
        }
    }

    /// Ensures the transaction is active and has not failed.
    pub(crate) fn ensure_writable(&self) -> CoreResult<()> {
        self.ensure_active()?;
        match &self.failure {
            Some(reason) => Err(CoreError::transaction_aborted(reason.clone())),
            None => Ok(()),
        }
    }
}
