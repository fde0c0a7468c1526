//! Tutorial command implementation.
//!
//! Walks through the store the way a new user would meet it: raw
//! statements on connections, the two transaction styles, a session
//! running textual SQL, table metadata, and finally mapped entities with
//! a lazily loaded relationship.

use super::STORE_URL;
use reldb_core::{params, Column, Config, Engine, ResultSet, SqlType, TableSchema, Value};
use reldb_orm::{
    col, Attributes, Entity, EntityRef, Mapping, OrmResult, Registry, Relationship, Session,
};
use std::error::Error;
use std::fmt;
use std::io::Write;
use std::sync::Arc;
use tracing::info;

/// A row of `user_account`.
#[derive(Debug, Clone, PartialEq)]
pub struct User {
    /// Primary key, assigned on insert.
    pub id: Option<i64>,
    /// Login name.
    pub name: String,
    /// Display name.
    pub fullname: String,
}

/// A row of `address`, owned by a [`User`].
#[derive(Debug, Clone, PartialEq)]
pub struct Address {
    /// Primary key, assigned on insert.
    pub id: Option<i64>,
    /// Owning user.
    pub user_id: Option<i64>,
    /// Email address.
    pub email_address: String,
}

impl User {
    fn new(name: &str, fullname: &str) -> Self {
        Self {
            id: None,
            name: name.to_string(),
            fullname: fullname.to_string(),
        }
    }
}

impl Address {
    fn new(email_address: &str) -> Self {
        Self {
            id: None,
            user_id: None,
            email_address: email_address.to_string(),
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

impl fmt::Display for User {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "User(id={}, name={:?}, fullname={:?})",
            Value::from(self.id),
            self.name,
            self.fullname
        )
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Address(id={}, email_address={:?})",
            Value::from(self.id),
            self.email_address
        )
    }
}

/// Table definitions for users and their addresses.
pub fn user_tables() -> reldb_core::CoreResult<(TableSchema, TableSchema)> {
    let user_account = TableSchema::builder("user_account")
        .column(Column::new("id", SqlType::Integer).primary_key())
        .column(Column::new("name", SqlType::Text).length(30).not_null())
        .column(Column::new("fullname", SqlType::Text).not_null())
        .build()?;
    let address = TableSchema::builder("address")
        .column(Column::new("id", SqlType::Integer).primary_key())
        .column(
            Column::new("user_id", SqlType::Integer)
                .not_null()
                .references("user_account", "id"),
        )
        .column(Column::new("email_address", SqlType::Text).not_null())
        .build()?;
    Ok((user_account, address))
}

/// Registry mapping [`User`] and [`Address`].
pub fn user_registry() -> OrmResult<Registry> {
    let (user_account, address) = user_tables()?;
    Registry::new()
        .with::<User>(
            Mapping::new(user_account)
                .relationship("addresses", Relationship::one_to_many::<Address>("user_id")),
        )?
        .with::<Address>(
            Mapping::new(address).relationship("user", Relationship::many_to_one::<User>("user_id")),
        )
}

/// Runs the tutorial command.
pub fn run(echo: bool) -> Result<(), Box<dyn Error>> {
    walkthrough(&mut std::io::stdout().lock(), echo)
}

/// Runs every tutorial step against a fresh store, writing to `out`.
pub fn walkthrough(out: &mut dyn Write, echo: bool) -> Result<(), Box<dyn Error>> {
    let engine = Engine::create(STORE_URL, Config::new().echo(echo))?;
    info!("Connected to {}", engine.url());

    connections(out, &engine)?;
    session_statements(out, &engine)?;
    let registry = Arc::new(user_registry()?);
    registry.metadata()?.create_all(&engine)?;
    writeln!(out, "✓ created tables: {}", engine.table_names()?.join(", "))?;
    entities(out, &engine, &registry)?;

    engine.dispose();
    Ok(())
}

fn print_points(out: &mut dyn Write, result: ResultSet) -> Result<(), Box<dyn Error>> {
    for row in result {
        let x: i64 = row.try_get("x")?;
        let y: i64 = row.try_get("y")?;
        writeln!(out, "x: {x} y: {y}")?;
    }
    Ok(())
}

/// Raw statements and both transaction styles.
fn connections(out: &mut dyn Write, engine: &Engine) -> Result<(), Box<dyn Error>> {
    writeln!(out, "== connections ==")?;
    let mut conn = engine.connect()?;
    let rows = conn.execute("SELECT 'Hello World'", ())?.all();
    let rendered: Vec<String> = rows.iter().map(ToString::to_string).collect();
    writeln!(out, "[{}]", rendered.join(", "))?;
    conn.close()?;

    // Commit as you go.
    let mut conn = engine.connect()?;
    conn.execute("CREATE TABLE some_table (x int, y int)", ())?;
    conn.execute(
        "INSERT INTO some_table (x, y) VALUES (:x, :y)",
        vec![params! { "x" => 1, "y" => 1 }, params! { "x" => 2, "y" => 4 }],
    )?;
    conn.commit()?;
    conn.close()?;

    // Begin once: the block commits when it returns Ok.
    engine.transaction(|conn| {
        conn.execute(
            "INSERT INTO some_table (x, y) VALUES (:x, :y)",
            vec![params! { "x" => 6, "y" => 8 }, params! { "x" => 9, "y" => 10 }],
        )
        .map(|_| ())
    })?;

    let mut conn = engine.connect()?;
    print_points(out, conn.execute("SELECT x, y FROM some_table", ())?)?;
    writeln!(out, "-- where y > 6")?;
    print_points(
        out,
        conn.execute(
            "SELECT x, y FROM some_table WHERE y > :y",
            params! { "y" => 6 },
        )?,
    )?;
    conn.close()?;
    Ok(())
}

/// Textual SQL through a session.
fn session_statements(out: &mut dyn Write, engine: &Engine) -> Result<(), Box<dyn Error>> {
    writeln!(out, "== session ==")?;
    let registry = Arc::new(Registry::new());
    let mut session = Session::new(engine, Arc::clone(&registry))?;
    let result = session.execute(
        "SELECT x, y FROM some_table WHERE y > :y ORDER BY x, y",
        params! { "y" => 6 },
    )?;
    print_points(out, result)?;
    session.close()?;

    let mut session = Session::new(engine, registry)?;
    let result = session.execute(
        "UPDATE some_table SET y=:y WHERE x=:x",
        vec![params! { "x" => 9, "y" => 11 }],
    )?;
    session.commit()?;
    writeln!(out, "✓ updated {} row(s)", result.rows_affected())?;
    session.close()?;
    Ok(())
}

/// Mapped entities, identity map and lazy relationships.
fn entities(
    out: &mut dyn Write,
    engine: &Engine,
    registry: &Arc<Registry>,
) -> Result<(), Box<dyn Error>> {
    writeln!(out, "== entities ==")?;
    let mut session = Session::new(engine, Arc::clone(registry))?;
    let spongebob = session.add(User::new("spongebob", "Spongebob Squarepants"))?;
    let sandy = session.add(User::new("sandy", "Sandy Cheeks"))?;
    session.add(User::new("patrick", "Patrick Star"))?;
    session.append_related(&spongebob, "addresses", Address::new("spongebob@sqlalchemy.org"))?;
    session.append_related(&sandy, "addresses", Address::new("sandy@sqlalchemy.org"))?;
    session.append_related(&sandy, "addresses", Address::new("sandy@squirrelpower.org"))?;
    session.commit()?;
    writeln!(out, "✓ inserted {}", spongebob.borrow())?;
    session.close()?;

    let mut session = Session::new(engine, Arc::clone(registry))?;
    let found = session
        .query::<User>()
        .filter(col("name").eq("spongebob"))
        .one()?;
    writeln!(out, "{}", found.borrow())?;
    let id = found.borrow().id;
    if let Some(again) = session.get::<User>(id)? {
        writeln!(out, "same instance: {}", EntityRef::ptr_eq(&found, &again))?;
    }

    let users = session.query::<User>().order_by("id").all()?;
    for user in &users {
        let addresses: Vec<EntityRef<Address>> = session.related(user, "addresses")?;
        let emails: Vec<String> = addresses
            .iter()
            .map(|a| a.borrow().email_address.clone())
            .collect();
        writeln!(out, "{}: [{}]", user.borrow().name, emails.join(", "))?;
    }

    sandy_renames(&mut session)?;
    session.commit()?;
    let sandy = session
        .query::<User>()
        .filter(col("name").eq("sandy"))
        .one()?;
    writeln!(out, "{}", sandy.borrow())?;
    session.close()?;
    Ok(())
}

fn sandy_renames(session: &mut Session) -> OrmResult<()> {
    if let Some(sandy) = session
        .query::<User>()
        .filter(col("name").eq("sandy"))
        .first()?
    {
        sandy.borrow_mut().fullname = "Sandy Squirrel".to_string();
        session.save(&sandy)?;
    }
    Ok(())
}
