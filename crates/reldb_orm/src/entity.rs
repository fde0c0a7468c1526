//! Entity trait, attribute maps and shared entity handles.

use crate::error::{OrmError, OrmResult};
use reldb_core::{FromValue, Value};
use std::cell::{Ref, RefCell, RefMut};
use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;

/// A plain record that can be mapped to a table.
///
/// Implementors list their attributes by name and rebuild themselves from
/// an [`Attributes`] map. Attribute names are translated to column names by
/// the entity's [`Mapping`](crate::Mapping).
///
/// # Example
///
/// ```
/// use reldb_core::Value;
/// use reldb_orm::{Attributes, Entity, OrmResult};
///
/// struct User {
///     id: Option<i64>,
///     name: String,
/// }
///
/// impl Entity for User {
///     fn attributes(&self) -> Vec<(&'static str, Value)> {
///         vec![("id", self.id.into()), ("name", self.name.clone().into())]
///     }
///
///     fn from_attributes(attrs: &Attributes) -> OrmResult<Self> {
///         Ok(Self {
///             id: attrs.get("id")?,
///             name: attrs.get("name")?,
///         })
///     }
/// }
/// ```
pub trait Entity: Sized + 'static {
    /// Current attribute values, by attribute name.
    fn attributes(&self) -> Vec<(&'static str, Value)>;

    /// Builds an entity from attribute values read from a row.
    fn from_attributes(attrs: &Attributes) -> OrmResult<Self>;
}

/// Short name of an entity kind, for messages.
pub(crate) fn entity_name<T: 'static>() -> &'static str {
    let full = std::any::type_name::<T>();
    full.rsplit("::").next().unwrap_or(full)
}

/// Attribute values of one entity, by name.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Attributes {
    values: BTreeMap<String, Value>,
}

impl Attributes {
    /// Creates an empty map.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Converts the attribute `name`.
    ///
    /// # Errors
    ///
    /// Returns [`OrmError::Decode`] if the attribute is missing or has the
    /// wrong type.
    pub fn get<T: FromValue>(&self, name: &str) -> OrmResult<T> {
        let value = self
            .values
            .get(name)
            .ok_or_else(|| OrmError::decode(format!("missing attribute {name:?}")))?;
        T::from_value(value).map_err(|e| OrmError::decode(format!("attribute {name:?}: {e}")))
    }

    /// Raw value of the attribute `name`.
    #[must_use]
    pub fn value(&self, name: &str) -> Option<&Value> {
        self.values.get(name)
    }

    /// Sets an attribute.
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        self.values.insert(name.into(), value.into());
    }

    /// Iterates over attributes in name order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Number of attributes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Returns true if no attribute is set.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl<K: Into<String>> FromIterator<(K, Value)> for Attributes {
    fn from_iter<I: IntoIterator<Item = (K, Value)>>(iter: I) -> Self {
        Self {
            values: iter.into_iter().map(|(k, v)| (k.into(), v)).collect(),
        }
    }
}

/// Shared handle to an entity instance.
///
/// A session hands out one handle per primary key; clones refer to the same
/// instance, so a change made through one is seen through all of them.
/// Handles are single-threaded, like the session that tracks them.
pub struct EntityRef<T> {
    cell: Rc<RefCell<T>>,
}

impl<T> EntityRef<T> {
    /// Wraps a new, untracked instance.
    pub fn new(value: T) -> Self {
        Self {
            cell: Rc::new(RefCell::new(value)),
        }
    }

    /// Borrows the instance.
    ///
    /// # Panics
    ///
    /// Panics if the instance is mutably borrowed.
    #[must_use]
    pub fn borrow(&self) -> Ref<'_, T> {
        self.cell.borrow()
    }

    /// Mutably borrows the instance. Changes are written on the next flush.
    ///
    /// # Panics
    ///
    /// Panics if the instance is already borrowed.
    #[must_use]
    pub fn borrow_mut(&self) -> RefMut<'_, T> {
        self.cell.borrow_mut()
    }

    /// Returns true if both handles refer to the same instance.
    #[must_use]
    pub fn ptr_eq(a: &Self, b: &Self) -> bool {
        Rc::ptr_eq(&a.cell, &b.cell)
    }

    /// Address of the instance, stable while any handle is alive.
    pub(crate) fn addr(&self) -> usize {
        Rc::as_ptr(&self.cell).cast::<()>() as usize
    }

    pub(crate) fn from_cell(cell: Rc<RefCell<T>>) -> Self {
        Self { cell }
    }

    pub(crate) fn cell(&self) -> &Rc<RefCell<T>> {
        &self.cell
    }
}

impl<T> Clone for EntityRef<T> {
    fn clone(&self) -> Self {
        Self {
            cell: Rc::clone(&self.cell),
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for EntityRef<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.cell.try_borrow() {
            Ok(value) => fmt::Debug::fmt(&*value, f),
            Err(_) => f.write_str("EntityRef(<borrowed>)"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clones_share_the_instance() {
        let a = EntityRef::new(String::from("spongebob"));
        let b = a.clone();
        b.borrow_mut().push_str(" squarepants");
        assert_eq!(*a.borrow(), "spongebob squarepants");
        assert!(EntityRef::ptr_eq(&a, &b));
        assert!(!EntityRef::ptr_eq(&a, &EntityRef::new(String::new())));
    }

    #[test]
    fn attributes_convert_values() {
        let attrs: Attributes = [
            ("id", Value::Integer(1)),
            ("fullname", Value::Null),
            ("name", Value::from("sandy")),
        ]
        .into_iter()
        .collect();
        assert_eq!(attrs.get::<i64>("id").unwrap(), 1);
        assert_eq!(attrs.get::<Option<String>>("fullname").unwrap(), None);
        assert_eq!(attrs.get::<String>("name").unwrap(), "sandy");
        assert!(matches!(attrs.get::<i64>("name"), Err(OrmError::Decode { .. })));
        assert!(matches!(attrs.get::<i64>("age"), Err(OrmError::Decode { .. })));
    }

    #[test]
    fn entity_names_drop_the_module_path() {
        struct Address;
        assert_eq!(entity_name::<Address>(), "Address");
    }
}
