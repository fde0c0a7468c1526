//! # RelDB Core
//!
//! In-process relational store for RelDB.
//!
//! This crate provides:
//! - An in-memory store of typed tables with primary key, unique, `NOT NULL`
//!   and foreign key enforcement
//! - Transactions with snapshot isolation and atomic commit
//! - A statement executor for the SQL subset parsed by `reldb_sql`
//! - Engines, connections and transaction scopes
//! - Table metadata that can be created in dependency order
//!
//! ## Usage
//!
//! ```
//! use reldb_core::{params, Engine};
//!
//! let engine = Engine::in_memory();
//! let mut conn = engine.connect()?;
//! conn.execute("CREATE TABLE some_table (x int, y int)", ())?;
//! conn.execute(
//!     "INSERT INTO some_table (x, y) VALUES (:x, :y)",
//!     vec![params! { "x" => 1, "y" => 1 }, params! { "x" => 2, "y" => 4 }],
//! )?;
//! conn.commit()?;
//!
//! let result = conn.execute("SELECT x, y FROM some_table WHERE y > :y", params! { "y" => 2 })?;
//! for row in result {
//!     assert_eq!(row.to_string(), "(2, 4)");
//! }
//! # Ok::<(), reldb_core::CoreError>(())
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod config;
mod connection;
mod engine;
mod error;
pub mod executor;
mod metadata;
mod params;
mod result;
mod schema;
pub mod storage;
pub mod transaction;
mod types;
mod value;

pub use config::Config;
pub use connection::{Connection, TransactionScope};
pub use engine::Engine;
pub use error::{ConstraintKind, CoreError, CoreResult, ErrorKind};
pub use metadata::MetaData;
pub use params::{Execute, Params};
pub use result::{ResultSet, Row};
pub use schema::{Column, ForeignKey, SqlType, TableSchema, TableSchemaBuilder};
pub use types::{RowId, SequenceNumber, TransactionId};
pub use value::{FromValue, Value};

pub use reldb_sql::{parse, parse_script, SqlError, Statement};
