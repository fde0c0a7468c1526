//! Connections and transaction scopes.

use crate::engine::Engine;
use crate::error::{CoreError, CoreResult};
use crate::executor;
use crate::params::{Execute, Params};
use crate::result::ResultSet;
use crate::schema::TableSchema;
use crate::transaction::Transaction;
use crate::types::TransactionId;
use reldb_sql::Statement;
use std::ops::{Deref, DerefMut};

/// A single-owner session with the store.
///
/// A connection runs at most one transaction at a time. The first
/// statement begins one implicitly ("commit as you go"); nothing it writes
/// is visible elsewhere until [`commit`](Self::commit). A connection that
/// is closed or dropped with a transaction still open rolls it back,
/// exactly once.
///
/// Any failing statement poisons the open transaction: later statements
/// and `commit` fail with [`CoreError::TransactionAborted`] until the
/// transaction is rolled back.
pub struct Connection {
    engine: Engine,
    txn: Option<Transaction>,
    closed: bool,
}

impl Connection {
    pub(crate) fn new(engine: Engine) -> Self {
        Self {
            engine,
            txn: None,
            closed: false,
        }
    }

    /// The engine this connection belongs to.
    #[must_use]
    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    /// Parses and executes one statement.
    ///
    /// `params` is anything convertible to [`Execute`]: `()`, a single
    /// [`Params`], or a `Vec<Params>` to run the statement once per entry.
    /// `BEGIN`, `COMMIT` and `ROLLBACK` are routed to the matching methods.
    ///
    /// # Errors
    ///
    /// Syntax errors, constraint violations and all other statement
    /// failures are returned and mark the open transaction as failed.
    /// Connection errors are returned when the connection or the store is
    /// closed.
    pub fn execute(&mut self, sql: &str, params: impl Into<Execute>) -> CoreResult<ResultSet> {
        self.ensure_usable()?;
        let statement = match reldb_sql::parse(sql) {
            Ok(statement) => statement,
            Err(e) => {
                let error = CoreError::from(e);
                self.fail(&error);
                return Err(error);
            }
        };
        self.run(&statement, sql, params.into())
    }

    /// Executes one statement once per parameter set.
    pub fn execute_many(&mut self, sql: &str, batch: Vec<Params>) -> CoreResult<ResultSet> {
        self.execute(sql, Execute::Batch(batch))
    }

    /// Executes an already parsed statement.
    pub fn execute_statement(
        &mut self,
        statement: &Statement,
        params: impl Into<Execute>,
    ) -> CoreResult<ResultSet> {
        self.ensure_usable()?;
        self.run(statement, &statement.to_string(), params.into())
    }

    fn run(&mut self, statement: &Statement, sql: &str, params: Execute) -> CoreResult<ResultSet> {
        match statement {
            Statement::Begin => return self.begin().map(|()| ResultSet::written(0, None)),
            Statement::Commit => return self.commit().map(|()| ResultSet::written(0, None)),
            Statement::Rollback => return self.rollback().map(|()| ResultSet::written(0, None)),
            _ => {}
        }

        if self.txn.is_none() {
            self.engine.log_event("BEGIN (implicit)");
            self.txn = Some(self.engine.txn_manager().begin());
        }
        self.engine.log_statement(sql, &params);

        let Some(txn) = self.txn.as_mut() else {
            return Err(CoreError::invalid_operation("no transaction is active"));
        };
        if let Some(reason) = txn.failure() {
            return Err(CoreError::transaction_aborted(reason));
        }
        let result = match &params {
            Execute::Single(params) => executor::execute(txn, statement, params),
            Execute::Batch(batch) => executor::execute_batch(txn, statement, batch),
        };
        if let Err(e) = &result {
            tracing::debug!("statement failed in {}: {}", txn.id(), e);
            txn.mark_failed(e.to_string());
        }
        result
    }

    /// Marks the open transaction as failed, if there is one.
    fn fail(&mut self, error: &CoreError) {
        if let Some(txn) = self.txn.as_mut() {
            txn.mark_failed(error.to_string());
        }
    }

    /// Begins a transaction explicitly.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidOperation`] if a transaction is already
    /// open on this connection.
    pub fn begin(&mut self) -> CoreResult<()> {
        self.ensure_usable()?;
        if self.txn.is_some() {
            return Err(CoreError::invalid_operation(
                "a transaction is already begun on this connection",
            ));
        }
        self.engine.log_event("BEGIN");
        self.txn = Some(self.engine.txn_manager().begin());
        Ok(())
    }

    /// Commits the open transaction. Does nothing when none is open.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::TransactionAborted`] if a statement failed in
    /// the transaction; it then stays open until rolled back. Returns a
    /// constraint violation or conflict if the writes no longer apply to
    /// the store; the transaction is then already rolled back.
    pub fn commit(&mut self) -> CoreResult<()> {
        self.ensure_usable()?;
        let Some(mut txn) = self.txn.take() else {
            return Ok(());
        };
        self.engine.log_event("COMMIT");
        match self.engine.txn_manager().commit(&mut txn) {
            Ok(_) => Ok(()),
            Err(e) => {
                if txn.is_active() {
                    self.txn = Some(txn);
                }
                Err(e)
            }
        }
    }

    /// Rolls back the open transaction. Does nothing when none is open.
    ///
    /// Rolling back works even after the engine was disposed.
    pub fn rollback(&mut self) -> CoreResult<()> {
        if self.closed {
            return Err(CoreError::ConnectionClosed);
        }
        self.release_transaction()
    }

    fn release_transaction(&mut self) -> CoreResult<()> {
        match self.txn.take() {
            Some(mut txn) => {
                self.engine.log_event("ROLLBACK");
                self.engine.txn_manager().rollback(&mut txn)
            }
            None => Ok(()),
        }
    }

    /// Returns true while a transaction is open.
    #[must_use]
    pub fn in_transaction(&self) -> bool {
        self.txn.is_some()
    }

    /// ID of the open transaction.
    #[must_use]
    pub fn transaction_id(&self) -> Option<TransactionId> {
        self.txn.as_ref().map(Transaction::id)
    }

    /// Returns true once the connection is closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Returns true if the table exists as seen by this connection.
    pub fn has_table(&self, name: &str) -> CoreResult<bool> {
        self.ensure_usable()?;
        Ok(match &self.txn {
            Some(txn) => txn.catalog().contains(name),
            None => self.engine.txn_manager().snapshot().contains(name),
        })
    }

    /// Names of the tables seen by this connection, sorted.
    pub fn table_names(&self) -> CoreResult<Vec<String>> {
        self.ensure_usable()?;
        Ok(match &self.txn {
            Some(txn) => txn.catalog().table_names(),
            None => self.engine.txn_manager().snapshot().table_names(),
        })
    }

    /// Creates a table from a schema by issuing its `CREATE TABLE`.
    pub fn create_table(&mut self, schema: &TableSchema) -> CoreResult<()> {
        self.execute(&schema.to_create_sql(), ()).map(|_| ())
    }

    /// Drops a table.
    pub fn drop_table(&mut self, name: &str) -> CoreResult<()> {
        let statement = Statement::DropTable {
            name: name.to_string(),
            if_exists: false,
        };
        self.execute_statement(&statement, ()).map(|_| ())
    }

    /// Closes the connection, rolling back any open transaction.
    pub fn close(mut self) -> CoreResult<()> {
        self.release()
    }

    fn release(&mut self) -> CoreResult<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.release_transaction()
    }

    fn ensure_usable(&self) -> CoreResult<()> {
        if self.closed {
            return Err(CoreError::ConnectionClosed);
        }
        self.engine.ensure_open()
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        let _ = self.release();
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("transaction", &self.transaction_id())
            .field("closed", &self.closed)
            .finish_non_exhaustive()
    }
}

/// A connection with a transaction begun, as returned by
/// [`Engine::begin`].
///
/// Dereferences to the [`Connection`]. Dropping the scope without calling
/// [`commit`](Self::commit) rolls the transaction back.
#[derive(Debug)]
pub struct TransactionScope {
    conn: Connection,
}

impl TransactionScope {
    pub(crate) fn new(conn: Connection) -> Self {
        Self { conn }
    }

    /// Commits and releases the connection.
    pub fn commit(mut self) -> CoreResult<()> {
        self.conn.commit()
    }

    /// Rolls back and releases the connection.
    pub fn rollback(mut self) -> CoreResult<()> {
        self.conn.rollback()
    }
}

impl Deref for TransactionScope {
    type Target = Connection;

    fn deref(&self) -> &Connection {
        &self.conn
    }
}

impl DerefMut for TransactionScope {
    fn deref_mut(&mut self) -> &mut Connection {
        &mut self.conn
    }
}
