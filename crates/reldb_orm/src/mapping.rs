//! Entity-to-table mappings and the registry that holds them.

use crate::entity::{entity_name, Entity};
use crate::error::{OrmError, OrmResult};
use reldb_core::{CoreError, MetaData, TableSchema, Value};
use std::any::TypeId;
use std::collections::HashMap;

/// Direction of a relationship between two entity kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelationshipKind {
    /// The target holds a foreign key to the source's primary key.
    OneToMany,
    /// The source holds a foreign key to the target's primary key.
    ManyToOne,
}

/// A foreign-key relationship from one entity kind to another.
#[derive(Debug, Clone)]
pub struct Relationship {
    kind: RelationshipKind,
    target: TypeId,
    target_name: &'static str,
    foreign_key: String,
}

impl Relationship {
    /// A collection of `C` entities whose `fk_attribute` holds the owner's
    /// primary key.
    #[must_use]
    pub fn one_to_many<C: Entity>(fk_attribute: &str) -> Self {
        Self {
            kind: RelationshipKind::OneToMany,
            target: TypeId::of::<C>(),
            target_name: entity_name::<C>(),
            foreign_key: fk_attribute.to_string(),
        }
    }

    /// The single `P` entity whose primary key is held in the owner's
    /// `fk_attribute`.
    #[must_use]
    pub fn many_to_one<P: Entity>(fk_attribute: &str) -> Self {
        Self {
            kind: RelationshipKind::ManyToOne,
            target: TypeId::of::<P>(),
            target_name: entity_name::<P>(),
            foreign_key: fk_attribute.to_string(),
        }
    }

    /// Relationship direction.
    #[must_use]
    pub fn kind(&self) -> RelationshipKind {
        self.kind
    }

    /// Attribute holding the foreign key.
    #[must_use]
    pub fn foreign_key(&self) -> &str {
        &self.foreign_key
    }

    /// Name of the target entity kind.
    #[must_use]
    pub fn target_name(&self) -> &'static str {
        self.target_name
    }

    pub(crate) fn target(&self) -> TypeId {
        self.target
    }
}

/// Binds an entity kind to a table.
///
/// Every column starts out mapped to an attribute of the same name.
///
/// # Example
///
/// ```
/// use reldb_core::{Column, SqlType, TableSchema};
/// use reldb_orm::Mapping;
///
/// let table = TableSchema::builder("user_account")
///     .column(Column::new("id", SqlType::Integer).primary_key())
///     .column(Column::new("fullname", SqlType::Text))
///     .build()?;
/// let mapping = Mapping::new(table).attribute("full_name", "fullname");
/// assert_eq!(mapping.column_for("full_name"), Some("fullname"));
/// assert_eq!(mapping.column_for("fullname"), None);
/// # Ok::<(), reldb_core::CoreError>(())
/// ```
#[derive(Debug, Clone)]
pub struct Mapping {
    schema: TableSchema,
    /// Attribute name per column, in column order.
    attributes: Vec<Option<String>>,
    relationships: Vec<(String, Relationship)>,
    unknown_columns: Vec<String>,
    entity: &'static str,
}

impl Mapping {
    /// Maps every column of `schema` to an attribute of the same name.
    #[must_use]
    pub fn new(schema: TableSchema) -> Self {
        let attributes = schema
            .columns()
            .iter()
            .map(|c| Some(c.name.clone()))
            .collect();
        Self {
            schema,
            attributes,
            relationships: Vec::new(),
            unknown_columns: Vec::new(),
            entity: "",
        }
    }

    /// Maps the attribute `attribute` to `column`, replacing the default
    /// same-name attribute.
    #[must_use]
    pub fn attribute(mut self, attribute: &str, column: &str) -> Self {
        match self.schema.column_index(column) {
            Some(idx) => self.attributes[idx] = Some(attribute.to_string()),
            None => self.unknown_columns.push(column.to_string()),
        }
        self
    }

    /// Leaves `column` without an attribute. It is written as NULL or its
    /// generated value and never read back into the entity.
    #[must_use]
    pub fn exclude(mut self, column: &str) -> Self {
        match self.schema.column_index(column) {
            Some(idx) => self.attributes[idx] = None,
            None => self.unknown_columns.push(column.to_string()),
        }
        self
    }

    /// Adds a named relationship.
    #[must_use]
    pub fn relationship(mut self, name: &str, relationship: Relationship) -> Self {
        self.relationships.push((name.to_string(), relationship));
        self
    }

    /// The mapped table.
    #[must_use]
    pub fn schema(&self) -> &TableSchema {
        &self.schema
    }

    /// Name of the mapped table.
    #[must_use]
    pub fn table(&self) -> &str {
        self.schema.name()
    }

    /// Name of the entity kind; empty until registered.
    #[must_use]
    pub fn entity(&self) -> &'static str {
        self.entity
    }

    /// Column holding `attribute`.
    #[must_use]
    pub fn column_for(&self, attribute: &str) -> Option<&str> {
        self.column_index_for(attribute)
            .map(|idx| self.schema.columns()[idx].name.as_str())
    }

    /// Attribute stored in `column`.
    #[must_use]
    pub fn attribute_for(&self, column: &str) -> Option<&str> {
        self.schema
            .column_index(column)
            .and_then(|idx| self.attributes[idx].as_deref())
    }

    /// Looks up a relationship by name.
    #[must_use]
    pub fn relationship_named(&self, name: &str) -> Option<&Relationship> {
        self.relationships
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, r)| r)
    }

    /// Relationships, in the order they were added.
    pub fn relationships(&self) -> impl Iterator<Item = (&str, &Relationship)> {
        self.relationships.iter().map(|(n, r)| (n.as_str(), r))
    }

    pub(crate) fn column_index_for(&self, attribute: &str) -> Option<usize> {
        self.attributes
            .iter()
            .position(|a| a.as_deref() == Some(attribute))
    }

    pub(crate) fn attribute_at(&self, idx: usize) -> Option<&str> {
        self.attributes.get(idx).and_then(|a| a.as_deref())
    }

    /// Column-ordered values for a list of attributes. Columns without an
    /// attribute stay NULL.
    pub(crate) fn row_of(
        &self,
        attributes: Vec<(&'static str, Value)>,
    ) -> OrmResult<Vec<Value>> {
        let mut row = vec![Value::Null; self.schema.columns().len()];
        for (attribute, value) in attributes {
            let idx = self
                .column_index_for(attribute)
                .ok_or_else(|| OrmError::unmapped_attribute(self.entity, attribute))?;
            row[idx] = value;
        }
        Ok(row)
    }

    /// Primary key values taken from a column-ordered row.
    pub(crate) fn key_of(&self, row: &[Value]) -> Vec<Value> {
        self.schema
            .primary_key()
            .iter()
            .map(|&idx| row[idx].clone())
            .collect()
    }

    /// `SELECT <all columns> FROM <table>`.
    pub(crate) fn select_sql(&self) -> String {
        format!(
            "SELECT {} FROM {}",
            self.schema.column_names().join(", "),
            self.schema.name()
        )
    }

    /// `pk1 = :k0 AND pk2 = :k1 ...`.
    pub(crate) fn key_predicate(&self) -> String {
        self.schema
            .primary_key_columns()
            .iter()
            .enumerate()
            .map(|(i, column)| format!("{column} = :k{i}"))
            .collect::<Vec<_>>()
            .join(" AND ")
    }

    fn validate(&self) -> OrmResult<()> {
        if let Some(column) = self.unknown_columns.first() {
            return Err(
                CoreError::unknown_column(format!("{}.{column}", self.schema.name())).into(),
            );
        }
        if self.schema.primary_key().is_empty() {
            return Err(CoreError::invalid_schema(format!(
                "table {} has no primary key and cannot be mapped",
                self.schema.name()
            ))
            .into());
        }
        for (i, attribute) in self.attributes.iter().enumerate() {
            if let Some(attribute) = attribute {
                if self.attributes[..i].iter().any(|a| a.as_deref() == Some(attribute)) {
                    return Err(CoreError::invalid_schema(format!(
                        "attribute {attribute:?} is mapped to more than one column of {}",
                        self.schema.name()
                    ))
                    .into());
                }
            }
        }
        Ok(())
    }
}

/// The set of registered mappings, keyed by entity kind.
///
/// Registries are built once, then shared between sessions.
#[derive(Debug, Default)]
pub struct Registry {
    mappings: HashMap<TypeId, Mapping>,
    order: Vec<TypeId>,
}

impl Registry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers the mapping for `T`.
    ///
    /// # Errors
    ///
    /// Returns an invalid operation error if `T` is already registered, and
    /// a schema error if the mapping names unknown columns, repeats an
    /// attribute, or its table has no primary key.
    pub fn register<T: Entity>(&mut self, mut mapping: Mapping) -> OrmResult<()> {
        let type_id = TypeId::of::<T>();
        if self.mappings.contains_key(&type_id) {
            return Err(OrmError::invalid_operation(format!(
                "{} is already registered",
                entity_name::<T>()
            )));
        }
        mapping.entity = entity_name::<T>();
        mapping.validate()?;
        tracing::debug!("registered {} -> {}", mapping.entity, mapping.table());
        self.mappings.insert(type_id, mapping);
        self.order.push(type_id);
        Ok(())
    }

    /// Builder form of [`register`](Self::register).
    pub fn with<T: Entity>(mut self, mapping: Mapping) -> OrmResult<Self> {
        self.register::<T>(mapping)?;
        Ok(self)
    }

    /// Mapping for `T`.
    ///
    /// # Errors
    ///
    /// Returns [`OrmError::UnmappedEntity`] if `T` was never registered.
    pub fn mapping<T: Entity>(&self) -> OrmResult<&Mapping> {
        self.mappings
            .get(&TypeId::of::<T>())
            .ok_or_else(|| OrmError::UnmappedEntity {
                entity: entity_name::<T>().to_string(),
            })
    }

    pub(crate) fn mapping_by_id(&self, type_id: TypeId) -> OrmResult<&Mapping> {
        self.mappings
            .get(&type_id)
            .ok_or_else(|| OrmError::invalid_operation("instance kind is not registered"))
    }

    /// Returns true if `T` is registered.
    #[must_use]
    pub fn contains<T: Entity>(&self) -> bool {
        self.mappings.contains_key(&TypeId::of::<T>())
    }

    /// Number of registered kinds.
    #[must_use]
    pub fn len(&self) -> usize {
        self.order.len()
    }

    /// Returns true if nothing is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Metadata holding every mapped table once, in registration order.
    pub fn metadata(&self) -> OrmResult<MetaData> {
        let mut metadata = MetaData::new();
        for type_id in &self.order {
            let schema = self.mappings[type_id].schema();
            if metadata.table(schema.name()).is_none() {
                metadata.add_table(schema.clone())?;
            }
        }
        Ok(metadata)
    }

    /// Flush rank of every kind: kinds whose tables are referenced come
    /// first.
    pub(crate) fn flush_ranks(&self) -> OrmResult<HashMap<TypeId, usize>> {
        let metadata = self.metadata()?;
        let sorted = metadata.sorted_tables()?;
        let ranks = self
            .order
            .iter()
            .map(|type_id| {
                let table = self.mappings[type_id].table();
                let rank = sorted
                    .iter()
                    .position(|t| t.name().eq_ignore_ascii_case(table))
                    .unwrap_or(sorted.len());
                (*type_id, rank)
            })
            .collect();
        Ok(ranks)
    }
}
