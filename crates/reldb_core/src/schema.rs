//! Table schemas.
//!
//! A [`TableSchema`] is immutable once built. Schemas come either from a
//! parsed `CREATE TABLE` statement or from [`TableSchema::builder`].

use crate::error::{ConstraintKind, CoreError, CoreResult};
use crate::value::Value;
use reldb_sql::ast::{CreateTable, TableConstraint, TypeName};
use std::fmt;

/// Storage type of a column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SqlType {
    /// 64-bit integer.
    Integer,
    /// Double precision float.
    Real,
    /// UTF-8 text.
    Text,
    /// Boolean.
    Boolean,
    /// Raw bytes.
    Blob,
}

impl SqlType {
    /// Maps a declared type name to a storage type.
    pub fn from_type_name(type_name: &TypeName) -> CoreResult<Self> {
        let name = type_name.name.to_ascii_uppercase();
        let ty = match name.as_str() {
            "INT" | "INTEGER" | "BIGINT" | "SMALLINT" | "TINYINT" => Self::Integer,
            "REAL" | "FLOAT" | "DOUBLE" | "DOUBLE PRECISION" | "NUMERIC" | "DECIMAL" => Self::Real,
            "TEXT" | "VARCHAR" | "CHAR" | "CHARACTER" | "NVARCHAR" | "STRING" | "CLOB" => {
                Self::Text
            }
            "BOOL" | "BOOLEAN" => Self::Boolean,
            "BLOB" | "BYTES" | "BINARY" | "VARBINARY" => Self::Blob,
            _ => {
                return Err(CoreError::invalid_schema(format!(
                    "unknown column type {type_name}"
                )))
            }
        };
        Ok(ty)
    }

    /// Converts `value` for storage in a column of this type.
    ///
    /// Integral reals and booleans are accepted by integer columns,
    /// integers by real columns, and 0/1 by boolean columns. NULL passes
    /// through. Returns `None` when the value cannot be stored.
    #[must_use]
    pub fn coerce(self, value: Value) -> Option<Value> {
        match (self, value) {
            (_, Value::Null) => Some(Value::Null),
            (Self::Integer, v @ Value::Integer(_)) => Some(v),
            (Self::Integer, Value::Bool(b)) => Some(Value::Integer(i64::from(b))),
            (Self::Integer, Value::Real(r))
                if r.fract() == 0.0 && r >= i64::MIN as f64 && r < i64::MAX as f64 =>
            {
                Some(Value::Integer(r as i64))
            }
            (Self::Real, v @ Value::Real(_)) => Some(v),
            (Self::Real, Value::Integer(n)) => Some(Value::Real(n as f64)),
            (Self::Text, v @ Value::Text(_)) => Some(v),
            (Self::Boolean, v @ Value::Bool(_)) => Some(v),
            (Self::Boolean, Value::Integer(0)) => Some(Value::Bool(false)),
            (Self::Boolean, Value::Integer(1)) => Some(Value::Bool(true)),
            (Self::Blob, v @ Value::Blob(_)) => Some(v),
            _ => None,
        }
    }
}

/// Target of a foreign key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForeignKey {
    /// Referenced table.
    pub table: String,
    /// Referenced column.
    pub column: String,
}

impl ForeignKey {
    /// Creates a foreign key target.
    pub fn new(table: impl Into<String>, column: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            column: column.into(),
        }
    }
}

impl fmt::Display for ForeignKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.table, self.column)
    }
}

/// A column definition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Column {
    /// Column name.
    pub name: String,
    /// Storage type.
    pub sql_type: SqlType,
    /// Declared length, rendered in DDL but not enforced.
    pub length: Option<i64>,
    /// Whether NULL is accepted.
    pub nullable: bool,
    /// Part of the primary key.
    pub primary_key: bool,
    /// Single-column `UNIQUE`.
    pub unique: bool,
    /// Referenced parent column.
    pub foreign_key: Option<ForeignKey>,
}

impl Column {
    /// Creates a nullable column without constraints.
    pub fn new(name: impl Into<String>, sql_type: SqlType) -> Self {
        Self {
            name: name.into(),
            sql_type,
            length: None,
            nullable: true,
            primary_key: false,
            unique: false,
            foreign_key: None,
        }
    }

    /// Sets the declared length.
    #[must_use]
    pub fn length(mut self, length: i64) -> Self {
        self.length = Some(length);
        self
    }

    /// Marks the column `NOT NULL`.
    #[must_use]
    pub fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }

    /// Marks the column as (part of) the primary key.
    #[must_use]
    pub fn primary_key(mut self) -> Self {
        self.primary_key = true;
        self.nullable = false;
        self
    }

    /// Marks the column `UNIQUE`.
    #[must_use]
    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    /// Adds a foreign key to `table.column`.
    #[must_use]
    pub fn references(mut self, table: impl Into<String>, column: impl Into<String>) -> Self {
        self.foreign_key = Some(ForeignKey::new(table, column));
        self
    }

    fn type_sql(&self) -> String {
        match (self.sql_type, self.length) {
            (SqlType::Integer, _) => "INTEGER".into(),
            (SqlType::Real, _) => "REAL".into(),
            (SqlType::Text, Some(n)) => format!("VARCHAR({n})"),
            (SqlType::Text, None) => "TEXT".into(),
            (SqlType::Boolean, _) => "BOOLEAN".into(),
            (SqlType::Blob, _) => "BLOB".into(),
        }
    }
}

/// An immutable table definition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableSchema {
    name: String,
    columns: Vec<Column>,
    primary_key: Vec<usize>,
    unique: Vec<Vec<usize>>,
}

impl TableSchema {
    /// Starts building a schema for table `name`.
    pub fn builder(name: impl Into<String>) -> TableSchemaBuilder {
        TableSchemaBuilder {
            name: name.into(),
            columns: Vec::new(),
            primary_key: None,
            unique: Vec::new(),
            foreign_keys: Vec::new(),
        }
    }

    /// Builds a schema from a parsed `CREATE TABLE`.
    ///
    /// `primary_key_of` resolves the primary key column of a referenced
    /// table when a foreign key omits the column. References to the table
    /// itself are resolved locally.
    pub fn from_create(
        create: &CreateTable,
        primary_key_of: impl Fn(&str) -> CoreResult<String>,
    ) -> CoreResult<Self> {
        let mut builder = Self::builder(&create.name);
        let table_pk: Vec<String> = create
            .constraints
            .iter()
            .find_map(|c| match c {
                TableConstraint::PrimaryKey(cols) => Some(cols.clone()),
                _ => None,
            })
            .unwrap_or_default();
        let own_pk = || -> CoreResult<String> {
            let inline: Vec<&str> = create
                .columns
                .iter()
                .filter(|c| c.primary_key)
                .map(|c| c.name.as_str())
                .collect();
            match (inline.as_slice(), table_pk.as_slice()) {
                ([single], []) => Ok((*single).to_string()),
                ([], [single]) => Ok(single.clone()),
                _ => Err(CoreError::invalid_schema(format!(
                    "table {} has no single-column primary key to reference",
                    create.name
                ))),
            }
        };
        let resolve = |target: &reldb_sql::ast::ForeignKeyRef| -> CoreResult<ForeignKey> {
            let column = match &target.column {
                Some(column) => column.clone(),
                None if target.table.eq_ignore_ascii_case(&create.name) => own_pk()?,
                None => primary_key_of(&target.table)?,
            };
            Ok(ForeignKey::new(&target.table, column))
        };

        for def in &create.columns {
            let mut column = Column::new(&def.name, SqlType::from_type_name(&def.type_name)?);
            if let Some(length) = def.type_name.args.first() {
                column = column.length(*length);
            }
            if def.not_null {
                column = column.not_null();
            }
            if def.primary_key {
                column = column.primary_key();
            }
            if def.unique {
                column = column.unique();
            }
            if let Some(target) = &def.references {
                column.foreign_key = Some(resolve(target)?);
            }
            builder = builder.column(column);
        }

        for constraint in &create.constraints {
            builder = match constraint {
                TableConstraint::PrimaryKey(cols) => builder.primary_key(cols.iter()),
                TableConstraint::Unique(cols) => builder.unique(cols.iter()),
                TableConstraint::ForeignKey { column, references } => {
                    builder.foreign_key(column, resolve(references)?)
                }
            };
        }
        builder.build()
    }

    /// Table name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Columns in declaration order.
    #[must_use]
    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    /// Column names in declaration order.
    #[must_use]
    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }

    /// Finds a column index by name, ignoring ASCII case.
    #[must_use]
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns
            .iter()
            .position(|c| c.name.eq_ignore_ascii_case(name))
    }

    /// Finds a column by name, ignoring ASCII case.
    #[must_use]
    pub fn column(&self, name: &str) -> Option<&Column> {
        self.column_index(name).map(|i| &self.columns[i])
    }

    /// Indices of the primary key columns; empty if the table has none.
    #[must_use]
    pub fn primary_key(&self) -> &[usize] {
        &self.primary_key
    }

    /// Names of the primary key columns.
    #[must_use]
    pub fn primary_key_columns(&self) -> Vec<&str> {
        self.primary_key
            .iter()
            .map(|&i| self.columns[i].name.as_str())
            .collect()
    }

    /// Column sets that must be unique, excluding the primary key.
    #[must_use]
    pub fn unique_constraints(&self) -> &[Vec<usize>] {
        &self.unique
    }

    /// Foreign keys as `(column index, target)` pairs.
    pub fn foreign_keys(&self) -> impl Iterator<Item = (usize, &ForeignKey)> {
        self.columns
            .iter()
            .enumerate()
            .filter_map(|(i, c)| c.foreign_key.as_ref().map(|fk| (i, fk)))
    }

    /// Tables this table references, excluding itself.
    #[must_use]
    pub fn referenced_tables(&self) -> Vec<&str> {
        let mut out: Vec<&str> = Vec::new();
        for (_, fk) in self.foreign_keys() {
            if !fk.table.eq_ignore_ascii_case(&self.name)
                && !out.iter().any(|t| t.eq_ignore_ascii_case(&fk.table))
            {
                out.push(&fk.table);
            }
        }
        out
    }

    /// The single `INTEGER` primary key column, which is filled with
    /// `max + 1` when an insert leaves it NULL.
    #[must_use]
    pub fn auto_increment_column(&self) -> Option<usize> {
        match self.primary_key.as_slice() {
            [i] if self.columns[*i].sql_type == SqlType::Integer => Some(*i),
            _ => None,
        }
    }

    /// Checks and converts a full row for storage.
    ///
    /// Enforces column count, declared types and `NOT NULL`.
    pub fn coerce_row(&self, row: Vec<Value>) -> CoreResult<Vec<Value>> {
        if row.len() != self.columns.len() {
            return Err(CoreError::execution(format!(
                "table {} has {} columns but {} values were supplied",
                self.name,
                self.columns.len(),
                row.len()
            )));
        }
        row.into_iter()
            .zip(&self.columns)
            .map(|(value, column)| {
                if value.is_null() && !column.nullable {
                    return Err(CoreError::constraint(
                        ConstraintKind::NotNull,
                        &self.name,
                        format!("{}.{} may not be NULL", self.name, column.name),
                    ));
                }
                let found = value.type_name();
                column.sql_type.coerce(value).ok_or_else(|| {
                    CoreError::constraint(
                        ConstraintKind::Type,
                        &self.name,
                        format!(
                            "cannot store {found} value in {}.{} of type {}",
                            self.name,
                            column.name,
                            column.type_sql()
                        ),
                    )
                })
            })
            .collect()
    }

    /// Renders the schema as a `CREATE TABLE` statement.
    #[must_use]
    pub fn to_create_sql(&self) -> String {
        let mut lines: Vec<String> = self
            .columns
            .iter()
            .map(|c| {
                let mut line = format!("\t{} {}", c.name, c.type_sql());
                if !c.nullable {
                    line.push_str(" NOT NULL");
                }
                line
            })
            .collect();
        if !self.primary_key.is_empty() {
            lines.push(format!(
                "\tPRIMARY KEY ({})",
                self.primary_key_columns().join(", ")
            ));
        }
        for set in &self.unique {
            let names: Vec<&str> = set.iter().map(|&i| self.columns[i].name.as_str()).collect();
            lines.push(format!("\tUNIQUE ({})", names.join(", ")));
        }
        for (i, fk) in self.foreign_keys() {
            lines.push(format!(
                "\tFOREIGN KEY({}) REFERENCES {} ({})",
                self.columns[i].name, fk.table, fk.column
            ));
        }
        format!("\nCREATE TABLE {} (\n{}\n)\n", self.name, lines.join(",\n"))
    }
}

/// Builder for [`TableSchema`].
#[derive(Debug, Clone)]
pub struct TableSchemaBuilder {
    name: String,
    columns: Vec<Column>,
    primary_key: Option<Vec<String>>,
    unique: Vec<Vec<String>>,
    foreign_keys: Vec<(String, ForeignKey)>,
}

impl TableSchemaBuilder {
    /// Appends a column.
    #[must_use]
    pub fn column(mut self, column: Column) -> Self {
        self.columns.push(column);
        self
    }

    /// Declares a table-level primary key.
    #[must_use]
    pub fn primary_key<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.primary_key = Some(columns.into_iter().map(|c| c.as_ref().to_string()).collect());
        self
    }

    /// Declares a table-level unique constraint.
    #[must_use]
    pub fn unique<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.unique
            .push(columns.into_iter().map(|c| c.as_ref().to_string()).collect());
        self
    }

    /// Adds a foreign key to an already declared column.
    ///
    /// Unknown columns are reported by [`build`](Self::build).
    #[must_use]
    pub fn foreign_key(mut self, column: &str, target: ForeignKey) -> Self {
        self.foreign_keys.push((column.to_string(), target));
        self
    }

    /// Validates and builds the schema.
    pub fn build(self) -> CoreResult<TableSchema> {
        let Self {
            name,
            mut columns,
            primary_key,
            unique,
            foreign_keys,
        } = self;

        if name.is_empty() {
            return Err(CoreError::invalid_schema("table name is empty"));
        }
        if columns.is_empty() {
            return Err(CoreError::invalid_schema(format!(
                "table {name} has no columns"
            )));
        }
        let index_of = |columns: &[Column], wanted: &str| -> CoreResult<usize> {
            columns
                .iter()
                .position(|c| c.name.eq_ignore_ascii_case(wanted))
                .ok_or_else(|| CoreError::unknown_column(format!("{name}.{wanted}")))
        };

        for (column, target) in foreign_keys {
            let i = index_of(&columns, &column)?;
            columns[i].foreign_key = Some(target);
        }

        for (i, column) in columns.iter().enumerate() {
            if columns[..i]
                .iter()
                .any(|c| c.name.eq_ignore_ascii_case(&column.name))
            {
                return Err(CoreError::invalid_schema(format!(
                    "duplicate column {} in table {name}",
                    column.name
                )));
            }
            if let Some(fk) = &column.foreign_key {
                if fk.table.is_empty() || fk.column.is_empty() {
                    return Err(CoreError::invalid_schema(format!(
                        "foreign key on {name}.{} has no target",
                        column.name
                    )));
                }
            }
        }

        let inline_pk: Vec<usize> = columns
            .iter()
            .enumerate()
            .filter(|(_, c)| c.primary_key)
            .map(|(i, _)| i)
            .collect();
        let pk = match primary_key {
            Some(_) if !inline_pk.is_empty() => {
                return Err(CoreError::invalid_schema(format!(
                    "table {name} has more than one primary key"
                )))
            }
            Some(cols) => {
                let mut pk = Vec::with_capacity(cols.len());
                for col in &cols {
                    pk.push(index_of(&columns, col)?);
                }
                pk
            }
            None => inline_pk,
        };
        for &i in &pk {
            columns[i].primary_key = true;
            columns[i].nullable = false;
        }

        let mut unique_sets: Vec<Vec<usize>> = Vec::new();
        for (i, column) in columns.iter().enumerate() {
            if column.unique && pk != [i] {
                unique_sets.push(vec![i]);
            }
        }
        for set in &unique {
            let mut indices = Vec::with_capacity(set.len());
            for col in set {
                indices.push(index_of(&columns, col)?);
            }
            if indices != pk && !unique_sets.contains(&indices) {
                unique_sets.push(indices);
            }
        }

        Ok(TableSchema {
            name,
            columns,
            primary_key: pk,
            unique: unique_sets,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reldb_sql::{parse, Statement};

    fn user_account() -> TableSchema {
        TableSchema::builder("user_account")
            .column(Column::new("id", SqlType::Integer).primary_key())
            .column(Column::new("name", SqlType::Text).length(30).not_null())
            .column(Column::new("fullname", SqlType::Text))
            .build()
            .unwrap()
    }

    fn create(text: &str) -> CreateTable {
        match parse(text).unwrap() {
            Statement::CreateTable(create) => create,
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn builder_sets_primary_key() {
        let schema = user_account();
        assert_eq!(schema.primary_key(), &[0]);
        assert_eq!(schema.auto_increment_column(), Some(0));
        assert!(!schema.columns()[0].nullable);
        assert_eq!(schema.column_index("NAME"), Some(1));
    }

    #[test]
    fn duplicate_columns_rejected() {
        let err = TableSchema::builder("t")
            .column(Column::new("a", SqlType::Integer))
            .column(Column::new("A", SqlType::Text))
            .build()
            .unwrap_err();
        assert!(matches!(err, CoreError::InvalidSchema { .. }));
    }

    #[test]
    fn empty_table_rejected() {
        assert!(TableSchema::builder("t").build().is_err());
    }

    #[test]
    fn two_primary_keys_rejected() {
        let err = TableSchema::builder("t")
            .column(Column::new("a", SqlType::Integer).primary_key())
            .column(Column::new("b", SqlType::Integer))
            .primary_key(["b"])
            .build()
            .unwrap_err();
        assert!(matches!(err, CoreError::InvalidSchema { .. }));
    }

    #[test]
    fn from_create_resolves_foreign_keys() {
        let schema = TableSchema::from_create(
            &create(
                "CREATE TABLE address (id INTEGER PRIMARY KEY, \
                 user_id INTEGER NOT NULL REFERENCES user_account, \
                 email_address VARCHAR NOT NULL)",
            ),
            |table| {
                assert_eq!(table, "user_account");
                Ok("id".to_string())
            },
        )
        .unwrap();
        let fks: Vec<_> = schema.foreign_keys().collect();
        assert_eq!(fks, vec![(1, &ForeignKey::new("user_account", "id"))]);
        assert_eq!(schema.referenced_tables(), vec!["user_account"]);
    }

    #[test]
    fn from_create_resolves_self_reference() {
        let schema = TableSchema::from_create(
            &create("CREATE TABLE node (id INT PRIMARY KEY, parent INT REFERENCES node)"),
            |_| panic!("self reference resolved locally"),
        )
        .unwrap();
        assert_eq!(
            schema.columns()[1].foreign_key,
            Some(ForeignKey::new("node", "id"))
        );
        assert!(schema.referenced_tables().is_empty());
    }

    #[test]
    fn coerce_row_checks_types_and_nulls() {
        let schema = user_account();
        let row = schema
            .coerce_row(vec![Value::Real(1.0), "spongebob".into(), Value::Null])
            .unwrap();
        assert!(matches!(row[0], Value::Integer(1)));

        let err = schema
            .coerce_row(vec![Value::Integer(2), Value::Null, Value::Null])
            .unwrap_err();
        assert!(matches!(
            err,
            CoreError::ConstraintViolation {
                kind: ConstraintKind::NotNull,
                ..
            }
        ));

        let err = schema
            .coerce_row(vec![Value::from("x"), "a".into(), Value::Null])
            .unwrap_err();
        assert!(matches!(
            err,
            CoreError::ConstraintViolation {
                kind: ConstraintKind::Type,
                ..
            }
        ));
    }

    #[test]
    fn create_sql_round_trips() {
        let schema = TableSchema::builder("address")
            .column(Column::new("id", SqlType::Integer).primary_key())
            .column(
                Column::new("user_id", SqlType::Integer)
                    .not_null()
                    .references("user_account", "id"),
            )
            .column(Column::new("email_address", SqlType::Text).not_null())
            .build()
            .unwrap();
        let sql = schema.to_create_sql();
        assert!(sql.contains("FOREIGN KEY(user_id) REFERENCES user_account (id)"));
        let reparsed = TableSchema::from_create(&create(&sql), |_| unreachable!()).unwrap();
        assert_eq!(reparsed, schema);
    }

    #[test]
    fn unknown_foreign_key_column_reported() {
        let err = TableSchema::builder("t")
            .column(Column::new("a", SqlType::Integer))
            .foreign_key("missing", ForeignKey::new("p", "id"))
            .build()
            .unwrap_err();
        assert!(matches!(err, CoreError::UnknownColumn { .. }));
    }
}
