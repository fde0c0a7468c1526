//! Statement results.

use crate::error::{CoreError, CoreResult};
use crate::value::{FromValue, Value};
use serde::ser::{Serialize, SerializeMap, Serializer};
use std::fmt;
use std::sync::Arc;

/// One result row.
///
/// Values are positional and can also be looked up by column name. Column
/// names are shared between all rows of a result.
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    columns: Arc<[String]>,
    values: Vec<Value>,
}

impl Row {
    /// Column names, in order.
    #[must_use]
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// Values, in column order.
    #[must_use]
    pub fn values(&self) -> &[Value] {
        &self.values
    }

    /// Takes the values out of the row.
    #[must_use]
    pub fn into_values(self) -> Vec<Value> {
        self.values
    }

    /// Number of values.
    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Returns true for a row without columns.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Value at `index`.
    #[must_use]
    pub fn get(&self, index: usize) -> Option<&Value> {
        self.values.get(index)
    }

    /// Value of the first column named `name`, ignoring ASCII case.
    #[must_use]
    pub fn get_named(&self, name: &str) -> Option<&Value> {
        self.columns
            .iter()
            .position(|c| c.eq_ignore_ascii_case(name))
            .map(|i| &self.values[i])
    }

    /// Converts the value of column `name`.
    pub fn try_get<T: FromValue>(&self, name: &str) -> CoreResult<T> {
        let value = self
            .get_named(name)
            .ok_or_else(|| CoreError::unknown_column(name))?;
        T::from_value(value)
    }

    /// Converts the value at `index`.
    pub fn try_get_at<T: FromValue>(&self, index: usize) -> CoreResult<T> {
        let value = self.get(index).ok_or_else(|| {
            CoreError::unknown_column(format!("#{index} of {} columns", self.len()))
        })?;
        T::from_value(value)
    }
}

impl fmt::Display for Row {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("(")?;
        for (i, value) in self.values.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            f.write_str(&value.to_sql_literal())?;
        }
        if self.values.len() == 1 {
            f.write_str(",")?;
        }
        f.write_str(")")
    }
}

impl Serialize for Row {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.values.len()))?;
        for (column, value) in self.columns.iter().zip(&self.values) {
            map.serialize_entry(column, value)?;
        }
        map.end()
    }
}

/// Outcome of executing a statement.
///
/// For queries this is an iterator over the rows, consumed once; running
/// the statement again is the only way to read them again. For writes it
/// carries the affected row count and, after an insert, the key of the
/// last inserted row.
#[derive(Debug)]
pub struct ResultSet {
    columns: Arc<[String]>,
    rows: std::vec::IntoIter<Vec<Value>>,
    rows_affected: u64,
    last_insert_id: Option<i64>,
    is_query: bool,
}

impl ResultSet {
    pub(crate) fn rows(columns: Vec<String>, rows: Vec<Vec<Value>>) -> Self {
        Self {
            columns: columns.into(),
            rows: rows.into_iter(),
            rows_affected: 0,
            last_insert_id: None,
            is_query: true,
        }
    }

    pub(crate) fn written(rows_affected: u64, last_insert_id: Option<i64>) -> Self {
        Self {
            columns: Arc::from(Vec::new()),
            rows: Vec::new().into_iter(),
            rows_affected,
            last_insert_id,
            is_query: false,
        }
    }

    /// Column names; empty for writes.
    #[must_use]
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// Returns true if the statement was a query.
    #[must_use]
    pub fn is_query(&self) -> bool {
        self.is_query
    }

    /// Rows changed by a write.
    #[must_use]
    pub fn rows_affected(&self) -> u64 {
        self.rows_affected
    }

    /// Key of the last row inserted: the integer primary key when the
    /// table has one, otherwise the row ID.
    #[must_use]
    pub fn last_insert_id(&self) -> Option<i64> {
        self.last_insert_id
    }

    /// Collects the remaining rows.
    #[must_use]
    pub fn all(self) -> Vec<Row> {
        self.collect()
    }

    /// The next row, discarding the rest.
    #[must_use]
    pub fn first(mut self) -> Option<Row> {
        self.next()
    }

    /// Exactly one row.
    pub fn one(self) -> CoreResult<Row> {
        self.one_or_none()?.ok_or(CoreError::NoRows)
    }

    /// At most one row.
    pub fn one_or_none(mut self) -> CoreResult<Option<Row>> {
        let first = self.next();
        if first.is_some() && !self.rows.as_slice().is_empty() {
            return Err(CoreError::MultipleRows);
        }
        Ok(first)
    }

    /// First column of the first row; NULL when there are no rows.
    pub fn scalar(self) -> CoreResult<Value> {
        if !self.is_query {
            return Err(CoreError::invalid_operation(
                "statement does not return rows",
            ));
        }
        Ok(self
            .first()
            .and_then(|row| row.into_values().into_iter().next())
            .unwrap_or(Value::Null))
    }
}

impl Iterator for ResultSet {
    type Item = Row;

    fn next(&mut self) -> Option<Row> {
        self.rows.next().map(|values| Row {
            columns: Arc::clone(&self.columns),
            values,
        })
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.rows.size_hint()
    }
}

impl ExactSizeIterator for ResultSet {}

#[cfg(test)]
mod tests {
    use super::*;

    fn result() -> ResultSet {
        ResultSet::rows(
            vec!["x".into(), "y".into()],
            vec![
                vec![Value::Integer(6), Value::Integer(8)],
                vec![Value::Integer(9), Value::Integer(10)],
            ],
        )
    }

    #[test]
    fn rows_are_consumed_once() {
        let mut rs = result();
        assert_eq!(rs.len(), 2);
        assert!(rs.next().is_some());
        assert_eq!(rs.all().len(), 1);
    }

    #[test]
    fn named_access() {
        let row = result().first().unwrap();
        assert_eq!(row.get_named("Y"), Some(&Value::Integer(8)));
        assert_eq!(row.try_get::<i64>("x").unwrap(), 6);
        assert_eq!(row.try_get_at::<i64>(1).unwrap(), 8);
        assert!(matches!(
            row.try_get::<i64>("z"),
            Err(CoreError::UnknownColumn { .. })
        ));
    }

    #[test]
    fn row_displays_as_tuple() {
        let row = result().first().unwrap();
        assert_eq!(row.to_string(), "(6, 8)");
        let text = ResultSet::rows(vec!["s".into()], vec![vec![Value::from("hello world")]]);
        assert_eq!(text.first().unwrap().to_string(), "('hello world',)");
    }

    #[test]
    fn one_requires_exactly_one() {
        assert!(matches!(result().one(), Err(CoreError::MultipleRows)));
        let empty = ResultSet::rows(vec!["x".into()], Vec::new());
        assert!(matches!(empty.one(), Err(CoreError::NoRows)));
        let empty = ResultSet::rows(vec!["x".into()], Vec::new());
        assert!(empty.one_or_none().unwrap().is_none());
    }

    #[test]
    fn scalar_reads_first_column() {
        assert_eq!(result().scalar().unwrap(), Value::Integer(6));
        assert!(ResultSet::written(1, None).scalar().is_err());
    }

    #[test]
    fn row_serializes_as_map() {
        let row = result().first().unwrap();
        let json = serde_json::to_string(&row).unwrap();
        assert_eq!(json, r#"{"x":6,"y":8}"#);
    }
}
