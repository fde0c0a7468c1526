//! Statement parameters.

use crate::error::{CoreError, CoreResult};
use crate::value::Value;
use reldb_sql::Placeholder;
use std::collections::BTreeMap;
use std::fmt;

/// Values bound to a statement's placeholders.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum Params {
    /// No parameters.
    #[default]
    None,
    /// Values for `:name` placeholders.
    Named(BTreeMap<String, Value>),
    /// Values for `?` placeholders, in order of appearance.
    Positional(Vec<Value>),
}

impl Params {
    /// Builds named parameters from `(name, value)` pairs.
    pub fn named<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Value>,
    {
        Self::Named(
            pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }

    /// Builds positional parameters.
    pub fn positional<I, V>(values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        Self::Positional(values.into_iter().map(Into::into).collect())
    }

    /// Returns true if no values are bound.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        match self {
            Self::None => true,
            Self::Named(map) => map.is_empty(),
            Self::Positional(values) => values.is_empty(),
        }
    }

    /// Looks up the value for a placeholder.
    pub fn resolve(&self, placeholder: &Placeholder) -> CoreResult<Value> {
        let found = match (self, placeholder) {
            (Self::Named(map), Placeholder::Named(name)) => map.get(name),
            (Self::Positional(values), Placeholder::Positional(index)) => values.get(*index),
            _ => None,
        };
        found.cloned().ok_or_else(|| {
            CoreError::parameter(format!("a value is required for placeholder {placeholder}"))
        })
    }
}

impl fmt::Display for Params {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => f.write_str("()"),
            Self::Named(map) => {
                f.write_str("{")?;
                for (i, (name, value)) in map.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "'{name}': {}", value.to_sql_literal())?;
                }
                f.write_str("}")
            }
            Self::Positional(values) => {
                f.write_str("(")?;
                for (i, value) in values.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    f.write_str(&value.to_sql_literal())?;
                }
                if values.len() == 1 {
                    f.write_str(",")?;
                }
                f.write_str(")")
            }
        }
    }
}

impl From<()> for Params {
    fn from((): ()) -> Self {
        Self::None
    }
}

impl From<BTreeMap<String, Value>> for Params {
    fn from(map: BTreeMap<String, Value>) -> Self {
        Self::Named(map)
    }
}

impl From<Vec<Value>> for Params {
    fn from(values: Vec<Value>) -> Self {
        Self::Positional(values)
    }
}

impl<K: Into<String>, V: Into<Value>, const N: usize> From<[(K, V); N]> for Params {
    fn from(pairs: [(K, V); N]) -> Self {
        Self::named(pairs)
    }
}

/// How often a statement runs: once, or once per parameter set.
#[derive(Debug, Clone, PartialEq)]
pub enum Execute {
    /// Run once.
    Single(Params),
    /// Run once per entry; an empty batch runs nothing.
    Batch(Vec<Params>),
}

impl Default for Execute {
    fn default() -> Self {
        Self::Single(Params::None)
    }
}

impl fmt::Display for Execute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Single(params) => params.fmt(f),
            Self::Batch(sets) => {
                f.write_str("[")?;
                for (i, params) in sets.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    params.fmt(f)?;
                }
                f.write_str("]")
            }
        }
    }
}

impl From<()> for Execute {
    fn from((): ()) -> Self {
        Self::Single(Params::None)
    }
}

impl From<Params> for Execute {
    fn from(params: Params) -> Self {
        Self::Single(params)
    }
}

impl From<Vec<Params>> for Execute {
    fn from(sets: Vec<Params>) -> Self {
        Self::Batch(sets)
    }
}

impl From<Vec<Value>> for Execute {
    fn from(values: Vec<Value>) -> Self {
        Self::Single(Params::Positional(values))
    }
}

impl From<BTreeMap<String, Value>> for Execute {
    fn from(map: BTreeMap<String, Value>) -> Self {
        Self::Single(Params::Named(map))
    }
}

impl<K: Into<String>, V: Into<Value>, const N: usize> From<[(K, V); N]> for Execute {
    fn from(pairs: [(K, V); N]) -> Self {
        Self::Single(Params::named(pairs))
    }
}

/// Builds [`Params`].
///
/// ```
/// use reldb_core::{params, Params, Value};
///
/// let named = params! { "x" => 1, "y" => "two" };
/// assert!(matches!(named, Params::Named(_)));
///
/// let positional = params![1, 2.5, Value::Null];
/// assert!(matches!(positional, Params::Positional(ref v) if v.len() == 3));
///
/// assert_eq!(params!(), Params::None);
/// ```
#[macro_export]
macro_rules! params {
    () => {
        $crate::Params::None
    };
    ($($name:literal => $value:expr),+ $(,)?) => {
        $crate::Params::Named(
            [$((::std::string::String::from($name), $crate::Value::from($value))),+]
                .into_iter()
                .collect(),
        )
    };
    ($($value:expr),+ $(,)?) => {
        $crate::Params::Positional(::std::vec![$($crate::Value::from($value)),+])
    };
}
