//! The set of tables making up one version of the store.

use crate::error::{ConstraintKind, CoreError, CoreResult};
use crate::schema::{ForeignKey, TableSchema};
use crate::storage::table::Table;
use crate::types::RowId;
use crate::value::Value;
use std::collections::BTreeMap;
use std::sync::Arc;

/// A version of the store: every table with its rows.
///
/// Tables are shared between versions through `Arc` and copied on first
/// write, so cloning a catalog is cheap. Table names are matched without
/// regard to ASCII case.
///
/// Every write method enforces the schema: declared types, `NOT NULL`,
/// primary key and unique constraints, and (when `enforce_fk` is set)
/// foreign key existence and restriction.
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    tables: BTreeMap<String, Arc<Table>>,
}

fn key(name: &str) -> String {
    name.to_ascii_lowercase()
}

impl Catalog {
    /// Creates an empty catalog.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Looks up a table.
    #[must_use]
    pub fn table(&self, name: &str) -> Option<&Table> {
        self.tables.get(&key(name)).map(AsRef::as_ref)
    }

    /// Returns true if the table exists.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.tables.contains_key(&key(name))
    }

    /// Names of all tables, sorted.
    #[must_use]
    pub fn table_names(&self) -> Vec<String> {
        self.tables
            .values()
            .map(|t| t.schema().name().to_string())
            .collect()
    }

    /// Looks up a table, failing if it does not exist.
    pub fn require(&self, name: &str) -> CoreResult<&Table> {
        self.table(name)
            .ok_or_else(|| CoreError::unknown_table(name))
    }

    fn table_mut(&mut self, name: &str) -> CoreResult<&mut Table> {
        self.tables
            .get_mut(&key(name))
            .map(Arc::make_mut)
            .ok_or_else(|| CoreError::unknown_table(name))
    }

    /// Adds a table.
    ///
    /// Foreign keys must target an existing table (or the table itself) and
    /// a column that is that table's whole primary key or a unique column.
    pub fn create_table(&mut self, schema: TableSchema) -> CoreResult<Arc<TableSchema>> {
        if self.contains(schema.name()) {
            return Err(CoreError::TableExists {
                name: schema.name().to_string(),
            });
        }
        for (i, fk) in schema.foreign_keys() {
            let target = if fk.table.eq_ignore_ascii_case(schema.name()) {
                &schema
            } else {
                self.table(&fk.table)
                    .map(|t| t.schema().as_ref())
                    .ok_or_else(|| {
                        CoreError::invalid_schema(format!(
                            "{}.{} references unknown table {}",
                            schema.name(),
                            schema.columns()[i].name,
                            fk.table
                        ))
                    })?
            };
            let Some(col) = target.column_index(&fk.column) else {
                return Err(CoreError::invalid_schema(format!(
                    "{}.{} references unknown column {fk}",
                    schema.name(),
                    schema.columns()[i].name
                )));
            };
            let keyed = target.primary_key() == [col]
                || target.unique_constraints().iter().any(|set| set == &[col]);
            if !keyed {
                return Err(CoreError::invalid_schema(format!(
                    "{fk} is neither a primary key nor a unique column"
                )));
            }
        }

        let schema = Arc::new(schema);
        self.tables.insert(
            key(schema.name()),
            Arc::new(Table::new(Arc::clone(&schema))),
        );
        Ok(schema)
    }

    /// Removes a table.
    ///
    /// With `enforce_fk`, a table referenced by another table cannot be
    /// dropped.
    pub fn drop_table(&mut self, name: &str, enforce_fk: bool) -> CoreResult<Arc<TableSchema>> {
        let schema = Arc::clone(self.require(name)?.schema());
        if enforce_fk {
            if let Some((child, _, _)) = self
                .referencing(name)
                .into_iter()
                .find(|(child, _, _)| !child.name().eq_ignore_ascii_case(name))
            {
                return Err(CoreError::constraint(
                    ConstraintKind::ForeignKey,
                    schema.name(),
                    format!("table {} is referenced by {}", schema.name(), child.name()),
                ));
            }
        }
        self.tables.remove(&key(name));
        Ok(schema)
    }

    /// Inserts a row, returning it as stored.
    pub fn insert(
        &mut self,
        table: &str,
        id: RowId,
        row: Vec<Value>,
        enforce_fk: bool,
    ) -> CoreResult<Vec<Value>> {
        let schema = Arc::clone(self.require(table)?.schema());
        let row = schema.coerce_row(row)?;
        if enforce_fk {
            self.check_parents(&schema, &row, None)?;
        }
        self.table_mut(table)?.insert(id, row.clone())?;
        Ok(row)
    }

    /// Replaces a row, returning `(old, new)` as stored.
    ///
    /// A missing row means another transaction removed it and is reported
    /// as a conflict.
    pub fn update(
        &mut self,
        table: &str,
        id: RowId,
        row: Vec<Value>,
        enforce_fk: bool,
    ) -> CoreResult<(Vec<Value>, Vec<Value>)> {
        let current = self.require(table)?;
        let schema = Arc::clone(current.schema());
        let old = current
            .get(id)
            .map(<[Value]>::to_vec)
            .ok_or_else(|| CoreError::conflict(schema.name()))?;
        let row = schema.coerce_row(row)?;
        if enforce_fk {
            self.check_parents(&schema, &row, Some(&old))?;
            self.check_children(&schema, id, &old, Some(&row))?;
        }
        self.table_mut(table)?.update(id, row.clone())?;
        Ok((old, row))
    }

    /// Deletes a row, returning it.
    pub fn delete(&mut self, table: &str, id: RowId, enforce_fk: bool) -> CoreResult<Vec<Value>> {
        let current = self.require(table)?;
        let schema = Arc::clone(current.schema());
        let old = current
            .get(id)
            .map(<[Value]>::to_vec)
            .ok_or_else(|| CoreError::conflict(schema.name()))?;
        if enforce_fk {
            self.check_children(&schema, id, &old, None)?;
        }
        self.table_mut(table)?.delete(id);
        Ok(old)
    }

    /// Foreign keys pointing at `parent`, as `(child schema, column, target)`.
    fn referencing(&self, parent: &str) -> Vec<(Arc<TableSchema>, usize, ForeignKey)> {
        let mut out = Vec::new();
        for table in self.tables.values() {
            for (col, fk) in table.schema().foreign_keys() {
                if fk.table.eq_ignore_ascii_case(parent) {
                    out.push((Arc::clone(table.schema()), col, fk.clone()));
                }
            }
        }
        out
    }

    /// Every non-NULL foreign key value in `row` must exist in its parent.
    fn check_parents(
        &self,
        schema: &TableSchema,
        row: &[Value],
        old: Option<&[Value]>,
    ) -> CoreResult<()> {
        for (col, fk) in schema.foreign_keys() {
            let value = &row[col];
            if value.is_null() || old.is_some_and(|old| old[col] == *value) {
                continue;
            }
            let self_reference = fk.table.eq_ignore_ascii_case(schema.name());
            let found = match self.table(&fk.table) {
                Some(parent) => {
                    let Some(parent_col) = parent.schema().column_index(&fk.column) else {
                        return Err(CoreError::unknown_column(fk.to_string()));
                    };
                    (self_reference && row[parent_col] == *value)
                        || parent.contains_value(parent_col, value, None)
                }
                None => false,
            };
            if !found {
                return Err(CoreError::constraint(
                    ConstraintKind::ForeignKey,
                    schema.name(),
                    format!(
                        "{}.{} = {} has no matching {fk}",
                        schema.name(),
                        schema.columns()[col].name,
                        value.to_sql_literal()
                    ),
                ));
            }
        }
        Ok(())
    }

    /// No child row may reference a key value of `old` that is going away.
    fn check_children(
        &self,
        schema: &TableSchema,
        id: RowId,
        old: &[Value],
        new: Option<&[Value]>,
    ) -> CoreResult<()> {
        for (child_schema, child_col, fk) in self.referencing(schema.name()) {
            let Some(parent_col) = schema.column_index(&fk.column) else {
                continue;
            };
            let value = &old[parent_col];
            if value.is_null() || new.is_some_and(|new| new[parent_col] == *value) {
                continue;
            }
            let Some(child) = self.table(child_schema.name()) else {
                continue;
            };
            let except = child_schema
                .name()
                .eq_ignore_ascii_case(schema.name())
                .then_some(id);
            if child.contains_value(child_col, value, except) {
                return Err(CoreError::constraint(
                    ConstraintKind::ForeignKey,
                    schema.name(),
                    format!(
                        "{fk} = {} is still referenced by {}.{}",
                        value.to_sql_literal(),
                        child_schema.name(),
                        child_schema.columns()[child_col].name
                    ),
                ));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{Column, SqlType};

    fn users() -> TableSchema {
        TableSchema::builder("user_account")
            .column(Column::new("id", SqlType::Integer).primary_key())
            .column(Column::new("name", SqlType::Text).not_null())
            .build()
            .unwrap()
    }

    fn addresses() -> TableSchema {
        TableSchema::builder("address")
            .column(Column::new("id", SqlType::Integer).primary_key())
            .column(
                Column::new("user_id", SqlType::Integer)
                    .not_null()
                    .references("user_account", "id"),
            )
            .build()
            .unwrap()
    }

    fn catalog() -> Catalog {
        let mut catalog = Catalog::new();
        catalog.create_table(users()).unwrap();
        catalog.create_table(addresses()).unwrap();
        catalog
            .insert(
                "user_account",
                RowId::new(1),
                vec![Value::Integer(1), Value::from("spongebob")],
                true,
            )
            .unwrap();
        catalog
    }

    #[test]
    fn table_lookup_ignores_case() {
        let catalog = catalog();
        assert!(catalog.contains("USER_ACCOUNT"));
        assert_eq!(catalog.table_names(), vec!["address", "user_account"]);
    }

    #[test]
    fn duplicate_table_rejected() {
        let mut catalog = catalog();
        assert!(matches!(
            catalog.create_table(users()),
            Err(CoreError::TableExists { .. })
        ));
    }

    #[test]
    fn foreign_key_to_unknown_table_rejected() {
        let mut catalog = Catalog::new();
        assert!(matches!(
            catalog.create_table(addresses()),
            Err(CoreError::InvalidSchema { .. })
        ));
    }

    #[test]
    fn insert_with_missing_parent_rejected() {
        let mut catalog = catalog();
        let err = catalog
            .insert(
                "address",
                RowId::new(2),
                vec![Value::Integer(1), Value::Integer(99)],
                true,
            )
            .unwrap_err();
        assert!(matches!(
            err,
            CoreError::ConstraintViolation {
                kind: ConstraintKind::ForeignKey,
                ..
            }
        ));
        assert!(catalog.table("address").unwrap().is_empty());
    }

    #[test]
    fn foreign_keys_can_be_disabled() {
        let mut catalog = catalog();
        catalog
            .insert(
                "address",
                RowId::new(2),
                vec![Value::Integer(1), Value::Integer(99)],
                false,
            )
            .unwrap();
    }

    #[test]
    fn referenced_parent_cannot_be_deleted() {
        let mut catalog = catalog();
        catalog
            .insert(
                "address",
                RowId::new(2),
                vec![Value::Integer(1), Value::Integer(1)],
                true,
            )
            .unwrap();
        let err = catalog.delete("user_account", RowId::new(1), true).unwrap_err();
        assert!(matches!(
            err,
            CoreError::ConstraintViolation {
                kind: ConstraintKind::ForeignKey,
                ..
            }
        ));
        let err = catalog
            .update(
                "user_account",
                RowId::new(1),
                vec![Value::Integer(5), Value::from("spongebob")],
                true,
            )
            .unwrap_err();
        assert!(matches!(err, CoreError::ConstraintViolation { .. }));

        catalog.delete("address", RowId::new(2), true).unwrap();
        catalog.delete("user_account", RowId::new(1), true).unwrap();
    }

    #[test]
    fn referenced_table_cannot_be_dropped() {
        let mut catalog = catalog();
        assert!(catalog.drop_table("user_account", true).is_err());
        catalog.drop_table("address", true).unwrap();
        catalog.drop_table("user_account", true).unwrap();
        assert!(catalog.table_names().is_empty());
    }

    #[test]
    fn clones_share_until_written() {
        let base = catalog();
        let mut working = base.clone();
        working
            .insert(
                "user_account",
                RowId::new(3),
                vec![Value::Integer(2), Value::from("sandy")],
                true,
            )
            .unwrap();
        assert_eq!(base.table("user_account").unwrap().len(), 1);
        assert_eq!(working.table("user_account").unwrap().len(), 2);
    }

    #[test]
    fn missing_row_is_a_conflict() {
        let mut catalog = catalog();
        let err = catalog.delete("user_account", RowId::new(42), true).unwrap_err();
        assert!(matches!(err, CoreError::TransactionConflict { .. }));
    }
}
