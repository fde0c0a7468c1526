//! # RelDB SQL
//!
//! Syntax tree and parser for the SQL subset understood by RelDB.
//!
//! Statement text is parsed with [`sqlparser`] using its SQLite dialect and
//! then lowered to the smaller tree in [`ast`] that the executor runs.
//! Valid SQL outside that subset fails with [`SqlError::Unsupported`].
//!
//! The supported statements are `CREATE TABLE`, `DROP TABLE`, `INSERT`,
//! `SELECT` over a single table, `UPDATE`, `DELETE` and the transaction
//! control statements `BEGIN`, `COMMIT` and `ROLLBACK`. Parameters are
//! written as `:name` or `?`; a single statement may not mix the two.
//!
//! ## Usage
//!
//! ```
//! use reldb_sql::{parse, Statement};
//!
//! let stmt = parse("SELECT x, y FROM some_table WHERE y > :y").unwrap();
//! assert!(matches!(stmt, Statement::Select(_)));
//! assert_eq!(stmt.placeholders().len(), 1);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod ast;
mod error;
mod lower;
mod parser;

pub use ast::{Expr, Placeholder, Statement};
pub use error::{SqlError, SqlResult};
pub use parser::{parse, parse_script};
