//! Test fixtures and store helpers.
//!
//! Provides the tables and entities of the user/address walkthrough so
//! test suites do not each redefine them.

use reldb_core::{
    Column, Config, Connection, Engine, Execute, MetaData, SqlType, TableSchema, Value,
};
use reldb_orm::{Attributes, Entity, Mapping, OrmResult, Registry, Relationship, Session};
use std::sync::Arc;

/// `CREATE TABLE` for the ad hoc point table.
pub const POINTS_DDL: &str = "CREATE TABLE some_table (x int, y int)";

/// A user account mapped onto `user_account`.
#[derive(Debug, Clone, PartialEq)]
pub struct User {
    /// Primary key; `None` until flushed.
    pub id: Option<i64>,
    /// Login name.
    pub name: String,
    /// Display name.
    pub fullname: String,
}

impl User {
    /// A new, unsaved user.
    pub fn new(name: &str, fullname: &str) -> Self {
        Self {
            id: None,
            name: name.to_string(),
            fullname: fullname.to_string(),
        }
    }
}

impl Entity for User {
    fn attributes(&self) -> Vec<(&'static str, Value)> {
        vec![
            ("id", self.id.into()),
            ("name", self.name.clone().into()),
            ("fullname", self.fullname.clone().into()),
        ]
    }

    fn from_attributes(attrs: &Attributes) -> OrmResult<Self> {
        Ok(Self {
            id: attrs.get("id")?,
            name: attrs.get("name")?,
            fullname: attrs.get("fullname")?,
        })
    }
}

/// An email address mapped onto `address`.
#[derive(Debug, Clone, PartialEq)]
pub struct Address {
    /// Primary key; `None` until flushed.
    pub id: Option<i64>,
    /// Owning user's key.
    pub user_id: Option<i64>,
    /// The address itself.
    pub email_address: String,
}

impl Address {
    /// A new, unsaved address without an owner.
    pub fn new(email_address: &str) -> Self {
        Self {
            id: None,
            user_id: None,
            email_address: email_address.to_string(),
        }
    }

    /// A new, unsaved address owned by `user_id`.
    pub fn owned_by(user_id: i64, email_address: &str) -> Self {
        Self {
            user_id: Some(user_id),
            ..Self::new(email_address)
        }
    }
}

impl Entity for Address {
    fn attributes(&self) -> Vec<(&'static str, Value)> {
        vec![
            ("id", self.id.into()),
            ("user_id", self.user_id.into()),
            ("email_address", self.email_address.clone().into()),
        ]
    }

    fn from_attributes(attrs: &Attributes) -> OrmResult<Self> {
        Ok(Self {
            id: attrs.get("id")?,
            user_id: attrs.get("user_id")?,
            email_address: attrs.get("email_address")?,
        })
    }
}

/// `user_account(id PK, name NOT NULL, fullname NOT NULL)`.
pub fn user_account_table() -> TableSchema {
    TableSchema::builder("user_account")
        .column(Column::new("id", SqlType::Integer).primary_key())
        .column(Column::new("name", SqlType::Text).length(30).not_null())
        .column(Column::new("fullname", SqlType::Text).not_null())
        .build()
        .expect("user_account schema is valid")
}

/// `address(id PK, user_id FK -> user_account.id NOT NULL, email_address NOT NULL)`.
pub fn address_table() -> TableSchema {
    TableSchema::builder("address")
        .column(Column::new("id", SqlType::Integer).primary_key())
        .column(
            Column::new("user_id", SqlType::Integer)
                .not_null()
                .references("user_account", "id"),
        )
        .column(Column::new("email_address", SqlType::Text).not_null())
        .build()
        .expect("address schema is valid")
}

/// Metadata holding both mapped tables.
pub fn user_metadata() -> MetaData {
    let mut metadata = MetaData::new();
    metadata
        .add_table(address_table())
        .expect("address is added once");
    metadata
        .add_table(user_account_table())
        .expect("user_account is added once");
    metadata
}

/// Registry mapping [`User`] (with `addresses`) and [`Address`] (with
/// `user`). Address is registered first so flush order cannot lean on
/// registration order.
pub fn user_registry() -> Registry {
    Registry::new()
        .with::<Address>(
            Mapping::new(address_table())
                .relationship("user", Relationship::many_to_one::<User>("user_id")),
        )
        .expect("Address mapping is valid")
        .with::<User>(
            Mapping::new(user_account_table())
                .relationship("addresses", Relationship::one_to_many::<Address>("user_id")),
        )
        .expect("User mapping is valid")
}

/// A store for one test, cleaned up on drop.
pub struct TestStore {
    /// The engine.
    pub engine: Engine,
    /// Registry shared by sessions opened through [`TestStore::session`].
    pub registry: Arc<Registry>,
}

impl TestStore {
    /// An empty in-memory store.
    pub fn memory() -> Self {
        Self::with_config(Config::default())
    }

    /// An empty in-memory store with custom configuration.
    pub fn with_config(config: Config) -> Self {
        Self {
            engine: Engine::in_memory_with_config(config),
            registry: Arc::new(user_registry()),
        }
    }

    /// A store with `user_account` and `address` created.
    pub fn users() -> Self {
        let store = Self::memory();
        store
            .registry
            .metadata()
            .expect("registry metadata is valid")
            .create_all(&store.engine)
            .expect("Failed to create user tables");
        store
    }

    /// A store with `some_table` created and committed rows.
    pub fn with_points(rows: &[(i64, i64)]) -> Self {
        let store = Self::memory();
        let mut conn = store.connect().expect("Failed to connect");
        conn.execute(POINTS_DDL, ()).expect("Failed to create some_table");
        if !rows.is_empty() {
            conn.execute(
                "INSERT INTO some_table (x, y) VALUES (:x, :y)",
                point_params(rows),
            )
            .expect("Failed to insert points");
        }
        conn.commit().expect("Failed to commit points");
        store
    }

    /// Opens a session over this store.
    pub fn session(&self) -> Session {
        Session::new(&self.engine, Arc::clone(&self.registry)).expect("Failed to open session")
    }
}

impl std::ops::Deref for TestStore {
    type Target = Engine;

    fn deref(&self) -> &Self::Target {
        &self.engine
    }
}

impl Drop for TestStore {
    fn drop(&mut self) {
        self.engine.dispose();
    }
}

/// Runs a test with a temporary in-memory engine.
pub fn with_engine<F, R>(f: F) -> R
where
    F: FnOnce(&Engine) -> R,
{
    let store = TestStore::memory();
    f(&store.engine)
}

/// Batch parameters for inserting `(x, y)` pairs.
pub fn point_params(rows: &[(i64, i64)]) -> Execute {
    Execute::Batch(
        rows.iter()
            .map(|&(x, y)| reldb_core::params! { "x" => x, "y" => y })
            .collect(),
    )
}

/// Runs a query selecting `x, y` and collects the pairs in result order.
pub fn points(conn: &mut Connection, sql: &str, params: impl Into<Execute>) -> Vec<(i64, i64)> {
    conn.execute(sql, params)
        .expect("query failed")
        .map(|row| {
            (
                row.try_get::<i64>("x").expect("x is an integer"),
                row.try_get::<i64>("y").expect("y is an integer"),
            )
        })
        .collect()
}

/// Row count of `table` as seen by `conn`.
pub fn count_rows(conn: &mut Connection, table: &str) -> i64 {
    conn.execute(&format!("SELECT count(*) FROM {table}"), ())
        .and_then(|result| result.scalar())
        .ok()
        .and_then(|value| value.as_i64())
        .expect("count(*) returns an integer")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn users_store_has_both_tables() {
        let store = TestStore::users();
        assert_eq!(
            store.table_names().unwrap(),
            vec!["address".to_string(), "user_account".to_string()]
        );
    }

    #[test]
    fn points_come_back_in_insert_order() {
        let store = TestStore::with_points(&[(3, 1), (1, 2)]);
        let mut conn = store.connect().unwrap();
        assert_eq!(
            points(&mut conn, "SELECT x, y FROM some_table", ()),
            vec![(3, 1), (1, 2)]
        );
        assert_eq!(count_rows(&mut conn, "some_table"), 2);
    }

    #[test]
    fn metadata_sorts_parents_first() {
        let names: Vec<String> = user_metadata()
            .sorted_tables()
            .unwrap()
            .iter()
            .map(|t| t.name().to_string())
            .collect();
        assert_eq!(names, vec!["user_account", "address"]);
    }

    #[test]
    fn with_engine_hands_out_an_open_engine() {
        assert!(with_engine(|engine| engine.is_open()));
    }
}
