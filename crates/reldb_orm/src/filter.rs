//! Query filters and orderings written against entity attributes.
//!
//! Filters name attributes, not columns. They are compiled to a `WHERE`
//! clause with named parameters when the query runs, at which point every
//! attribute is translated through the entity's mapping.

use crate::error::{OrmError, OrmResult};
use crate::mapping::Mapping;
use reldb_core::Value;
use std::collections::BTreeMap;
use std::ops::Not;

/// Comparison operator of a filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    /// `=`
    Eq,
    /// `<>`
    Ne,
    /// `<`
    Lt,
    /// `<=`
    Le,
    /// `>`
    Gt,
    /// `>=`
    Ge,
}

impl CompareOp {
    fn as_sql(self) -> &'static str {
        match self {
            Self::Eq => "=",
            Self::Ne => "<>",
            Self::Lt => "<",
            Self::Le => "<=",
            Self::Gt => ">",
            Self::Ge => ">=",
        }
    }
}

/// A boolean condition on entity attributes.
#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    /// `attribute <op> value`
    Compare {
        /// Attribute name.
        attribute: String,
        /// Operator.
        op: CompareOp,
        /// Right-hand value.
        value: Value,
    },
    /// `attribute IS [NOT] NULL`
    IsNull {
        /// Attribute name.
        attribute: String,
        /// `IS NOT NULL` when true.
        negated: bool,
    },
    /// `attribute LIKE pattern`
    Like {
        /// Attribute name.
        attribute: String,
        /// Pattern with `%` and `_` wildcards.
        pattern: String,
    },
    /// `attribute IN (values)`
    InList {
        /// Attribute name.
        attribute: String,
        /// Candidate values.
        values: Vec<Value>,
    },
    /// Both conditions hold.
    And(Box<Filter>, Box<Filter>),
    /// Either condition holds.
    Or(Box<Filter>, Box<Filter>),
    /// The condition does not hold.
    Not(Box<Filter>),
    /// Literal SQL over column names, with its own named parameters.
    Raw {
        /// SQL boolean expression.
        sql: String,
        /// Values for the `:name` placeholders in `sql`.
        params: BTreeMap<String, Value>,
    },
}

/// Starts a filter or ordering on `attribute`.
///
/// ```
/// use reldb_orm::col;
///
/// let filter = col("name").eq("spongebob").or(col("name").like("sandy%"));
/// let _ = filter;
/// ```
#[must_use]
pub fn col(attribute: &str) -> Attr {
    Attr {
        name: attribute.to_string(),
    }
}

/// An attribute reference, the left-hand side of a filter.
#[derive(Debug, Clone)]
pub struct Attr {
    name: String,
}

impl Attr {
    fn compare(self, op: CompareOp, value: impl Into<Value>) -> Filter {
        let value = value.into();
        match (op, value.is_null()) {
            (CompareOp::Eq, true) => self.is_null(),
            (CompareOp::Ne, true) => self.is_not_null(),
            _ => Filter::Compare {
                attribute: self.name,
                op,
                value,
            },
        }
    }

    /// `attribute = value`; comparing with NULL becomes `IS NULL`.
    #[must_use]
    pub fn eq(self, value: impl Into<Value>) -> Filter {
        self.compare(CompareOp::Eq, value)
    }

    /// `attribute <> value`; comparing with NULL becomes `IS NOT NULL`.
    #[must_use]
    pub fn ne(self, value: impl Into<Value>) -> Filter {
        self.compare(CompareOp::Ne, value)
    }

    /// `attribute < value`
    #[must_use]
    pub fn lt(self, value: impl Into<Value>) -> Filter {
        self.compare(CompareOp::Lt, value)
    }

    /// `attribute <= value`
    #[must_use]
    pub fn le(self, value: impl Into<Value>) -> Filter {
        self.compare(CompareOp::Le, value)
    }

    /// `attribute > value`
    #[must_use]
    pub fn gt(self, value: impl Into<Value>) -> Filter {
        self.compare(CompareOp::Gt, value)
    }

    /// `attribute >= value`
    #[must_use]
    pub fn ge(self, value: impl Into<Value>) -> Filter {
        self.compare(CompareOp::Ge, value)
    }

    /// `attribute LIKE pattern`
    #[must_use]
    pub fn like(self, pattern: impl Into<String>) -> Filter {
        Filter::Like {
            attribute: self.name,
            pattern: pattern.into(),
        }
    }

    /// `attribute IS NULL`
    #[must_use]
    pub fn is_null(self) -> Filter {
        Filter::IsNull {
            attribute: self.name,
            negated: false,
        }
    }

    /// `attribute IS NOT NULL`
    #[must_use]
    pub fn is_not_null(self) -> Filter {
        Filter::IsNull {
            attribute: self.name,
            negated: true,
        }
    }

    /// `attribute IN (values)`; an empty list matches nothing.
    #[must_use]
    pub fn in_list<I, V>(self, values: I) -> Filter
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        Filter::InList {
            attribute: self.name,
            values: values.into_iter().map(Into::into).collect(),
        }
    }

    /// Ascending order on this attribute.
    #[must_use]
    pub fn asc(self) -> Order {
        Order {
            attribute: self.name,
            descending: false,
        }
    }

    /// Descending order on this attribute.
    #[must_use]
    pub fn desc(self) -> Order {
        Order {
            attribute: self.name,
            descending: true,
        }
    }
}

impl Filter {
    /// Literal SQL over column names with named parameters.
    #[must_use]
    pub fn raw<I, K, V>(sql: impl Into<String>, params: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Value>,
    {
        Self::Raw {
            sql: sql.into(),
            params: params
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }

    /// Both `self` and `other` hold.
    #[must_use]
    pub fn and(self, other: Filter) -> Self {
        Self::And(Box::new(self), Box::new(other))
    }

    /// Either `self` or `other` holds.
    #[must_use]
    pub fn or(self, other: Filter) -> Self {
        Self::Or(Box::new(self), Box::new(other))
    }

    /// Compiles to SQL, adding bound values to `params`.
    pub(crate) fn to_sql(
        &self,
        mapping: &Mapping,
        params: &mut BTreeMap<String, Value>,
    ) -> OrmResult<String> {
        let column = |attribute: &str| {
            mapping
                .column_for(attribute)
                .map(str::to_string)
                .ok_or_else(|| OrmError::unmapped_attribute(mapping.entity(), attribute))
        };
        Ok(match self {
            Self::Compare {
                attribute,
                op,
                value,
            } => {
                let placeholder = bind(params, value.clone());
                format!("{} {} {placeholder}", column(attribute)?, op.as_sql())
            }
            Self::IsNull { attribute, negated } => {
                let not = if *negated { " NOT" } else { "" };
                format!("{} IS{not} NULL", column(attribute)?)
            }
            Self::Like { attribute, pattern } => {
                let placeholder = bind(params, Value::from(pattern.as_str()));
                format!("{} LIKE {placeholder}", column(attribute)?)
            }
            Self::InList { attribute, values } => {
                let column = column(attribute)?;
                if values.is_empty() {
                    "1 = 0".to_string()
                } else {
                    let placeholders: Vec<String> =
                        values.iter().map(|v| bind(params, v.clone())).collect();
                    format!("{column} IN ({})", placeholders.join(", "))
                }
            }
            Self::And(a, b) => format!(
                "({}) AND ({})",
                a.to_sql(mapping, params)?,
                b.to_sql(mapping, params)?
            ),
            Self::Or(a, b) => format!(
                "({}) OR ({})",
                a.to_sql(mapping, params)?,
                b.to_sql(mapping, params)?
            ),
            Self::Not(inner) => format!("NOT ({})", inner.to_sql(mapping, params)?),
            Self::Raw { sql, params: raw } => {
                let mut renames = BTreeMap::new();
                for name in raw.keys() {
                    if params.contains_key(name) {
                        let fresh = fresh_name(|n| {
                            params.contains_key(n)
                                || raw.contains_key(n)
                                || renames.values().any(|taken: &String| taken == n)
                        });
                        renames.insert(name.as_str(), fresh);
                    }
                }
                for (name, value) in raw {
                    let name = renames.get(name.as_str()).unwrap_or(name);
                    params.insert(name.clone(), value.clone());
                }
                if renames.is_empty() {
                    sql.clone()
                } else {
                    rename_placeholders(sql, &renames)
                }
            }
        })
    }
}

impl Not for Filter {
    type Output = Filter;

    fn not(self) -> Filter {
        Filter::Not(Box::new(self))
    }
}

/// Adds `value` under a fresh generated name and returns its placeholder.
fn bind(params: &mut BTreeMap<String, Value>, value: Value) -> String {
    let name = fresh_name(|n| params.contains_key(n));
    params.insert(name.clone(), value);
    format!(":{name}")
}

/// First `f0, f1, ...` name for which `taken` is false.
fn fresh_name(taken: impl Fn(&str) -> bool) -> String {
    (0..)
        .map(|n| format!("f{n}"))
        .find(|name| !taken(name))
        .unwrap_or_default()
}

/// Rewrites whole `:name` placeholders outside string literals.
fn rename_placeholders(sql: &str, renames: &BTreeMap<&str, String>) -> String {
    let is_ident = |c: char| c.is_ascii_alphanumeric() || c == '_';
    let mut out = String::with_capacity(sql.len());
    let mut chars = sql.char_indices().peekable();
    let mut in_string = false;
    while let Some((i, c)) = chars.next() {
        out.push(c);
        if c == '\'' {
            in_string = !in_string;
            continue;
        }
        if in_string || c != ':' {
            continue;
        }
        let start = i + 1;
        let mut end = start;
        while let Some(&(j, next)) = chars.peek() {
            if !is_ident(next) {
                break;
            }
            end = j + next.len_utf8();
            chars.next();
        }
        let name = &sql[start..end];
        match renames.get(name) {
            Some(fresh) => out.push_str(fresh),
            None => out.push_str(name),
        }
    }
    out
}

/// Sort key of a query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Order {
    attribute: String,
    descending: bool,
}

impl Order {
    pub(crate) fn to_sql(&self, mapping: &Mapping) -> OrmResult<String> {
        let column = mapping
            .column_for(&self.attribute)
            .ok_or_else(|| OrmError::unmapped_attribute(mapping.entity(), &self.attribute))?;
        Ok(if self.descending {
            format!("{column} DESC")
        } else {
            column.to_string()
        })
    }
}

impl From<&str> for Order {
    fn from(attribute: &str) -> Self {
        col(attribute).asc()
    }
}

impl From<Attr> for Order {
    fn from(attr: Attr) -> Self {
        attr.asc()
    }
}
