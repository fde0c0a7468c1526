//! # RelDB ORM
//!
//! Entity mapper for RelDB.
//!
//! Plain Rust records implement [`Entity`] and are bound to tables through a
//! [`Mapping`] held in a [`Registry`]. A [`Session`] is the unit of work:
//!
//! - every primary key resolves to one shared [`EntityRef`] per session
//! - added, changed and deleted entities are written on flush, parents
//!   before children, only changed columns in updates
//! - relationships load lazily on first access and stay cached
//!
//! ## Usage
//!
//! ```
//! use std::sync::Arc;
//! use reldb_core::{Column, Engine, SqlType, TableSchema, Value};
//! use reldb_orm::{col, Attributes, Entity, Mapping, OrmResult, Registry, Session};
//!
//! #[derive(Debug)]
//! struct User {
//!     id: Option<i64>,
//!     name: String,
//! }
//!
//! impl Entity for User {
//!     fn attributes(&self) -> Vec<(&'static str, Value)> {
//!         vec![("id", self.id.into()), ("name", self.name.clone().into())]
//!     }
//!
//!     fn from_attributes(attrs: &Attributes) -> OrmResult<Self> {
//!         Ok(Self { id: attrs.get("id")?, name: attrs.get("name")? })
//!     }
//! }
//!
//! let table = TableSchema::builder("user_account")
//!     .column(Column::new("id", SqlType::Integer).primary_key())
//!     .column(Column::new("name", SqlType::Text).not_null())
//!     .build()?;
//! let registry = Registry::new().with::<User>(Mapping::new(table))?;
//!
//! let engine = Engine::in_memory();
//! registry.metadata()?.create_all(&engine)?;
//!
//! let mut session = Session::new(&engine, Arc::new(registry))?;
//! let sandy = session.add(User { id: None, name: "sandy".into() })?;
//! session.commit()?;
//! assert_eq!(sandy.borrow().id, Some(1));
//!
//! let found = session.query::<User>().filter(col("name").eq("sandy")).one()?;
//! assert!(reldb_orm::EntityRef::ptr_eq(&found, &sandy));
//! # Ok::<(), reldb_orm::OrmError>(())
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod entity;
mod error;
mod filter;
mod mapping;
mod query;
mod session;

pub use entity::{Attributes, Entity, EntityRef};
pub use error::{OrmError, OrmResult};
pub use filter::{col, Attr, CompareOp, Filter, Order};
pub use mapping::{Mapping, Registry, Relationship, RelationshipKind};
pub use query::Query;
pub use session::{Session, SessionConfig};
