//! Row storage for a single table.

use crate::error::{ConstraintKind, CoreError, CoreResult};
use crate::schema::TableSchema;
use crate::types::RowId;
use crate::value::Value;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Rows of one table plus its key indexes.
///
/// Rows are keyed by [`RowId`], so iteration follows insertion order.
/// The primary key index and one index per unique constraint map key
/// values to row IDs. Keys containing NULL are never indexed.
#[derive(Debug, Clone)]
pub struct Table {
    schema: Arc<TableSchema>,
    rows: BTreeMap<RowId, Vec<Value>>,
    primary_index: BTreeMap<Vec<Value>, RowId>,
    unique_indexes: Vec<BTreeMap<Vec<Value>, RowId>>,
}

fn key_of(row: &[Value], columns: &[usize]) -> Option<Vec<Value>> {
    let key: Vec<Value> = columns.iter().map(|&i| row[i].clone()).collect();
    if key.iter().any(Value::is_null) {
        None
    } else {
        Some(key)
    }
}

impl Table {
    /// Creates an empty table.
    #[must_use]
    pub fn new(schema: Arc<TableSchema>) -> Self {
        let unique_indexes = vec![BTreeMap::new(); schema.unique_constraints().len()];
        Self {
            schema,
            rows: BTreeMap::new(),
            primary_index: BTreeMap::new(),
            unique_indexes,
        }
    }

    /// The table definition.
    #[must_use]
    pub fn schema(&self) -> &Arc<TableSchema> {
        &self.schema
    }

    /// Number of rows.
    #[must_use]
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Returns true if the table holds no rows.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Rows in insertion order.
    pub fn rows(&self) -> impl Iterator<Item = (RowId, &[Value])> {
        self.rows.iter().map(|(id, row)| (*id, row.as_slice()))
    }

    /// Fetches a row.
    #[must_use]
    pub fn get(&self, id: RowId) -> Option<&[Value]> {
        self.rows.get(&id).map(Vec::as_slice)
    }

    /// Finds a row by primary key value.
    #[must_use]
    pub fn find_by_primary_key(&self, key: &[Value]) -> Option<RowId> {
        self.primary_index.get(key).copied()
    }

    /// Returns true if some row holds `value` in column `column`.
    ///
    /// Uses the primary key index when `column` is the whole key.
    #[must_use]
    pub fn contains_value(&self, column: usize, value: &Value, except: Option<RowId>) -> bool {
        if self.schema.primary_key() == [column] {
            return self
                .primary_index
                .get(std::slice::from_ref(value))
                .is_some_and(|id| Some(*id) != except);
        }
        self.rows
            .iter()
            .any(|(id, row)| Some(*id) != except && row[column] == *value)
    }

    /// Largest integer stored in `column`, if any.
    #[must_use]
    pub fn max_integer(&self, column: usize) -> Option<i64> {
        if self.schema.primary_key() == [column] {
            return self
                .primary_index
                .keys()
                .next_back()
                .and_then(|key| key[0].as_i64());
        }
        self.rows.values().filter_map(|row| row[column].as_i64()).max()
    }

    fn check_keys(&self, row: &[Value], except: Option<RowId>) -> CoreResult<()> {
        let name = self.schema.name();
        let pk = self.schema.primary_key();
        if !pk.is_empty() {
            if let Some(key) = key_of(row, pk) {
                if let Some(existing) = self.primary_index.get(&key) {
                    if Some(*existing) != except {
                        return Err(CoreError::constraint(
                            ConstraintKind::PrimaryKey,
                            name,
                            format!(
                                "duplicate key ({}) = ({})",
                                self.schema.primary_key_columns().join(", "),
                                render(&key)
                            ),
                        ));
                    }
                }
            }
        }
        for (set, index) in self.schema.unique_constraints().iter().zip(&self.unique_indexes) {
            if let Some(key) = key_of(row, set) {
                if let Some(existing) = index.get(&key) {
                    if Some(*existing) != except {
                        let cols: Vec<&str> = set
                            .iter()
                            .map(|&i| self.schema.columns()[i].name.as_str())
                            .collect();
                        return Err(CoreError::constraint(
                            ConstraintKind::Unique,
                            name,
                            format!("duplicate value ({}) = ({})", cols.join(", "), render(&key)),
                        ));
                    }
                }
            }
        }
        Ok(())
    }

    fn index(&mut self, id: RowId, row: &[Value]) {
        if !self.schema.primary_key().is_empty() {
            if let Some(key) = key_of(row, self.schema.primary_key()) {
                self.primary_index.insert(key, id);
            }
        }
        let schema = Arc::clone(&self.schema);
        for (set, index) in schema.unique_constraints().iter().zip(&mut self.unique_indexes) {
            if let Some(key) = key_of(row, set) {
                index.insert(key, id);
            }
        }
    }

    fn unindex(&mut self, row: &[Value]) {
        if !self.schema.primary_key().is_empty() {
            if let Some(key) = key_of(row, self.schema.primary_key()) {
                self.primary_index.remove(&key);
            }
        }
        let schema = Arc::clone(&self.schema);
        for (set, index) in schema.unique_constraints().iter().zip(&mut self.unique_indexes) {
            if let Some(key) = key_of(row, set) {
                index.remove(&key);
            }
        }
    }

    /// Stores a new row after checking key uniqueness.
    ///
    /// The row must already be coerced to the schema.
    pub fn insert(&mut self, id: RowId, row: Vec<Value>) -> CoreResult<()> {
        self.check_keys(&row, None)?;
        self.index(id, &row);
        self.rows.insert(id, row);
        Ok(())
    }

    /// Replaces a row after checking key uniqueness, returning the old row.
    pub fn update(&mut self, id: RowId, row: Vec<Value>) -> CoreResult<Vec<Value>> {
        let old = self
            .rows
            .get(&id)
            .cloned()
            .ok_or_else(|| CoreError::conflict(self.schema.name()))?;
        self.check_keys(&row, Some(id))?;
        self.unindex(&old);
        self.index(id, &row);
        self.rows.insert(id, row);
        Ok(old)
    }

    /// Removes a row, returning it.
    pub fn delete(&mut self, id: RowId) -> Option<Vec<Value>> {
        let old = self.rows.remove(&id)?;
        self.unindex(&old);
        Some(old)
    }
}

fn render(values: &[Value]) -> String {
    values
        .iter()
        .map(Value::to_sql_literal)
        .collect::<Vec<_>>()
        .join(", ")
}
