//! Error types for RelDB core.

use reldb_sql::SqlError;
use std::fmt;
use thiserror::Error;

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Coarse classification of a [`CoreError`].
///
/// Callers branch on the kind to decide whether to retry or give up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Malformed statement text.
    Syntax,
    /// Data violates a schema rule.
    Constraint,
    /// Store unreachable or closed.
    Connection,
    /// Commit attempted after a statement in the transaction failed.
    TransactionAborted,
    /// Statement is well formed but cannot be carried out.
    Operational,
    /// Bad parameters or value conversions supplied by the caller.
    Argument,
    /// API used in a state that does not allow it.
    InvalidOperation,
}

/// Which schema rule a write violated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConstraintKind {
    /// A `NOT NULL` column received NULL.
    NotNull,
    /// Duplicate primary key.
    PrimaryKey,
    /// Duplicate value in a `UNIQUE` column set.
    Unique,
    /// Reference to a missing parent, or removal of a referenced parent.
    ForeignKey,
    /// Value cannot be stored in the column's declared type.
    Type,
}

impl fmt::Display for ConstraintKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::NotNull => "NOT NULL",
            Self::PrimaryKey => "PRIMARY KEY",
            Self::Unique => "UNIQUE",
            Self::ForeignKey => "FOREIGN KEY",
            Self::Type => "TYPE",
        })
    }
}

/// Errors that can occur in RelDB core operations.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Statement text failed to parse.
    #[error(transparent)]
    Syntax(#[from] SqlError),

    /// A write violated a schema constraint.
    #[error("{kind} constraint failed on {table}: {message}")]
    ConstraintViolation {
        /// Violated rule.
        kind: ConstraintKind,
        /// Table the write targeted.
        table: String,
        /// Description of the offending data.
        message: String,
    },

    /// The store address could not be resolved.
    #[error("connection error: {message}")]
    Connection {
        /// Description of the failure.
        message: String,
    },

    /// The engine has been disposed.
    #[error("store is closed")]
    StoreClosed,

    /// The connection has been closed.
    #[error("connection is closed")]
    ConnectionClosed,

    /// The transaction can no longer commit.
    #[error("transaction aborted: {reason}")]
    TransactionAborted {
        /// The statement failure that poisoned the transaction.
        reason: String,
    },

    /// A concurrent commit touched the same rows or tables.
    #[error("transaction conflict on table {table}")]
    TransactionConflict {
        /// The table where the conflict occurred.
        table: String,
    },

    /// Table not found.
    #[error("no such table: {name}")]
    UnknownTable {
        /// Name of the table.
        name: String,
    },

    /// Table already present.
    #[error("table {name} already exists")]
    TableExists {
        /// Name of the table.
        name: String,
    },

    /// Column not found.
    #[error("no such column: {name}")]
    UnknownColumn {
        /// Name of the column as written.
        name: String,
    },

    /// Table definition is not acceptable.
    #[error("invalid schema: {message}")]
    InvalidSchema {
        /// Description of the problem.
        message: String,
    },

    /// Runtime failure while evaluating a statement.
    #[error("execution error: {message}")]
    Execution {
        /// Description of the failure.
        message: String,
    },

    /// Parameters do not match the statement's placeholders.
    #[error("parameter error: {message}")]
    Parameter {
        /// Description of the mismatch.
        message: String,
    },

    /// A value could not be converted to the requested Rust type.
    #[error("conversion error: {message}")]
    Conversion {
        /// Description of the mismatch.
        message: String,
    },

    /// Operation not permitted in current state.
    #[error("invalid operation: {message}")]
    InvalidOperation {
        /// Description of why operation is invalid.
        message: String,
    },

    /// Exactly one row was required but none was returned.
    #[error("no row was found when one was required")]
    NoRows,

    /// At most one row was required but several were returned.
    #[error("multiple rows were found when one was required")]
    MultipleRows,
}

impl CoreError {
    /// Returns the coarse classification of this error.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Syntax(_) => ErrorKind::Syntax,
            Self::ConstraintViolation { .. } => ErrorKind::Constraint,
            Self::Connection { .. } | Self::StoreClosed | Self::ConnectionClosed => {
                ErrorKind::Connection
            }
            Self::TransactionAborted { .. } => ErrorKind::TransactionAborted,
            Self::TransactionConflict { .. }
            | Self::UnknownTable { .. }
            | Self::TableExists { .. }
            | Self::UnknownColumn { .. }
            | Self::InvalidSchema { .. }
            | Self::Execution { .. } => ErrorKind::Operational,
            Self::Parameter { .. } | Self::Conversion { .. } => ErrorKind::Argument,
            Self::InvalidOperation { .. } | Self::NoRows | Self::MultipleRows => {
                ErrorKind::InvalidOperation
            }
        }
    }

    /// Returns true if retrying the unit of work may succeed.
    ///
    /// Only connection failures qualify.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        self.kind() == ErrorKind::Connection
    }

    /// Creates a constraint violation error.
    pub fn constraint(
        kind: ConstraintKind,
        table: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::ConstraintViolation {
            kind,
            table: table.into(),
            message: message.into(),
        }
    }

    /// Creates a connection error.
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
        }
    }

    /// Creates a transaction aborted error.
    pub fn transaction_aborted(reason: impl Into<String>) -> Self {
        Self::TransactionAborted {
            reason: reason.into(),
        }
    }

    /// Creates a transaction conflict error.
    pub fn conflict(table: impl Into<String>) -> Self {
        Self::TransactionConflict {
            table: table.into(),
        }
    }

    /// Creates an unknown table error.
    pub fn unknown_table(name: impl Into<String>) -> Self {
        Self::UnknownTable { name: name.into() }
    }

    /// Creates an unknown column error.
    pub fn unknown_column(name: impl Into<String>) -> Self {
        Self::UnknownColumn { name: name.into() }
    }

    /// Creates an invalid schema error.
    pub fn invalid_schema(message: impl Into<String>) -> Self {
        Self::InvalidSchema {
            message: message.into(),
        }
    }

    /// Creates an execution error.
    pub fn execution(message: impl Into<String>) -> Self {
        Self::Execution {
            message: message.into(),
        }
    }

    /// Creates a parameter error.
    pub fn parameter(message: impl Into<String>) -> Self {
        Self::Parameter {
            message: message.into(),
        }
    }

    /// Creates a conversion error.
    pub fn conversion(message: impl Into<String>) -> Self {
        Self::Conversion {
            message: message.into(),
        }
    }

    /// Creates an invalid operation error.
    pub fn invalid_operation(message: impl Into<String>) -> Self {
        Self::InvalidOperation {
            message: message.into(),
        }
    }
}
