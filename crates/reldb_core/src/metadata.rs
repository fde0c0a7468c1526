//! Collections of table definitions.

use crate::engine::Engine;
use crate::error::{CoreError, CoreResult};
use crate::schema::TableSchema;

/// An ordered set of table definitions that can be created or dropped
/// together.
///
/// Tables are created parents first, following foreign keys, and dropped
/// in the reverse order.
#[derive(Debug, Clone, Default)]
pub struct MetaData {
    tables: Vec<TableSchema>,
}

impl MetaData {
    /// Creates an empty collection.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a table definition.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::TableExists`] if a table of the same name was
    /// already added.
    pub fn add_table(&mut self, schema: TableSchema) -> CoreResult<()> {
        if self.table(schema.name()).is_some() {
            return Err(CoreError::TableExists {
                name: schema.name().to_string(),
            });
        }
        self.tables.push(schema);
        Ok(())
    }

    /// Looks up a table definition by name.
    #[must_use]
    pub fn table(&self, name: &str) -> Option<&TableSchema> {
        self.tables
            .iter()
            .find(|t| t.name().eq_ignore_ascii_case(name))
    }

    /// Table definitions in the order they were added.
    #[must_use]
    pub fn tables(&self) -> &[TableSchema] {
        &self.tables
    }

    /// Table definitions ordered so that every table comes after the
    /// tables it references. Ties keep the order tables were added in.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidSchema`] when foreign keys form a cycle.
    pub fn sorted_tables(&self) -> CoreResult<Vec<&TableSchema>> {
        let mut placed = vec![false; self.tables.len()];
        let mut sorted = Vec::with_capacity(self.tables.len());
        while sorted.len() < self.tables.len() {
            let ready = self.tables.iter().enumerate().find(|(i, table)| {
                !placed[*i]
                    && table.referenced_tables().iter().all(|parent| {
                        self.tables
                            .iter()
                            .enumerate()
                            .all(|(j, t)| placed[j] || !t.name().eq_ignore_ascii_case(parent))
                    })
            });
            match ready {
                Some((i, table)) => {
                    placed[i] = true;
                    sorted.push(table);
                }
                None => {
                    let remaining: Vec<&str> = self
                        .tables
                        .iter()
                        .enumerate()
                        .filter(|(i, _)| !placed[*i])
                        .map(|(_, t)| t.name())
                        .collect();
                    return Err(CoreError::invalid_schema(format!(
                        "foreign keys form a cycle between {}",
                        remaining.join(", ")
                    )));
                }
            }
        }
        Ok(sorted)
    }

    /// Creates every table that does not exist yet, in one transaction.
    pub fn create_all(&self, engine: &Engine) -> CoreResult<()> {
        let sorted = self.sorted_tables()?;
        engine.transaction(|conn| {
            for table in sorted {
                if !conn.has_table(table.name())? {
                    conn.create_table(table)?;
                }
            }
            Ok(())
        })
    }

    /// Drops every table that exists, children first, in one transaction.
    pub fn drop_all(&self, engine: &Engine) -> CoreResult<()> {
        let sorted = self.sorted_tables()?;
        engine.transaction(|conn| {
            for table in sorted.into_iter().rev() {
                if conn.has_table(table.name())? {
                    conn.drop_table(table.name())?;
                }
            }
            Ok(())
        })
    }
}
