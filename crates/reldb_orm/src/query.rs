//! Typed entity queries.

use crate::entity::{Entity, EntityRef};
use crate::error::{OrmError, OrmResult};
use crate::filter::{Filter, Order};
use crate::session::Session;
use reldb_core::{Params, Value};
use std::collections::BTreeMap;
use std::marker::PhantomData;
use std::sync::Arc;
use tracing::trace;

/// A query for entities of kind `T`, built up and then run once.
///
/// Results go through the session's identity map, so a row already loaded
/// comes back as the same [`EntityRef`].
///
/// ```
/// # use reldb_orm::{col, Session};
/// # fn run<T: reldb_orm::Entity>(session: &mut Session) -> reldb_orm::OrmResult<()> {
/// let found = session
///     .query::<T>()
///     .filter(col("name").eq("spongebob"))
///     .order_by("id")
///     .limit(10)
///     .all()?;
/// # let _ = found;
/// # Ok(())
/// # }
/// ```
pub struct Query<'s, T> {
    session: &'s mut Session,
    filter: Option<Filter>,
    order: Vec<Order>,
    limit: Option<u64>,
    offset: Option<u64>,
    _marker: PhantomData<fn() -> T>,
}

impl<'s, T: Entity> Query<'s, T> {
    pub(crate) fn new(session: &'s mut Session) -> Self {
        Self {
            session,
            filter: None,
            order: Vec::new(),
            limit: None,
            offset: None,
            _marker: PhantomData,
        }
    }

    /// Adds a condition; several conditions must all hold.
    #[must_use]
    pub fn filter(mut self, filter: Filter) -> Self {
        self.filter = Some(match self.filter.take() {
            Some(existing) => existing.and(filter),
            None => filter,
        });
        self
    }

    /// Adds a sort key after any already given.
    #[must_use]
    pub fn order_by(mut self, order: impl Into<Order>) -> Self {
        self.order.push(order.into());
        self
    }

    /// Returns at most `n` entities.
    #[must_use]
    pub fn limit(mut self, n: u64) -> Self {
        self.limit = Some(n);
        self
    }

    /// Skips the first `n` matches.
    #[must_use]
    pub fn offset(mut self, n: u64) -> Self {
        self.offset = Some(n);
        self
    }

    /// Runs the query and returns every match.
    pub fn all(self) -> OrmResult<Vec<EntityRef<T>>> {
        let Query {
            session,
            filter,
            order,
            limit,
            offset,
            ..
        } = self;
        session.flush_if_autoflush()?;
        let registry = Arc::clone(session.registry_arc());
        let mapping = registry.mapping::<T>()?;

        let mut sql = mapping.select_sql();
        let mut params = BTreeMap::new();
        if let Some(filter) = &filter {
            sql.push_str(" WHERE ");
            sql.push_str(&filter.to_sql(mapping, &mut params)?);
        }
        if !order.is_empty() {
            let keys = order
                .iter()
                .map(|o| o.to_sql(mapping))
                .collect::<OrmResult<Vec<_>>>()?;
            sql.push_str(" ORDER BY ");
            sql.push_str(&keys.join(", "));
        }
        match (limit, offset) {
            (Some(limit), Some(offset)) => sql.push_str(&format!(" LIMIT {limit} OFFSET {offset}")),
            (Some(limit), None) => sql.push_str(&format!(" LIMIT {limit}")),
            (None, Some(offset)) => sql.push_str(&format!(" LIMIT -1 OFFSET {offset}")),
            (None, None) => {}
        }
        trace!("query for {}: {}", mapping.entity(), sql);

        let rows = session
            .connection()
            .execute(&sql, Params::Named(params))?
            .all();
        let mut found = Vec::with_capacity(rows.len());
        for row in &rows {
            found.push(session.load_row::<T>(mapping, row)?.1);
        }
        Ok(found)
    }

    /// The first match, if any.
    pub fn first(self) -> OrmResult<Option<EntityRef<T>>> {
        Ok(self.limit(1).all()?.into_iter().next())
    }

    /// Exactly one match.
    ///
    /// # Errors
    ///
    /// Returns [`OrmError::NoResult`] or [`OrmError::MultipleResults`].
    pub fn one(self) -> OrmResult<EntityRef<T>> {
        self.one_or_none()?.ok_or(OrmError::NoResult)
    }

    /// At most one match.
    ///
    /// # Errors
    ///
    /// Returns [`OrmError::MultipleResults`] if more than one row matches.
    pub fn one_or_none(self) -> OrmResult<Option<EntityRef<T>>> {
        let mut found = self.limit(2).all()?;
        if found.len() > 1 {
            return Err(OrmError::MultipleResults);
        }
        Ok(found.pop())
    }

    /// Number of matches, ignoring order, limit and offset.
    pub fn count(self) -> OrmResult<u64> {
        let Query {
            session, filter, ..
        } = self;
        session.flush_if_autoflush()?;
        let registry = Arc::clone(session.registry_arc());
        let mapping = registry.mapping::<T>()?;
        let mut sql = format!("SELECT count(*) FROM {}", mapping.table());
        let mut params = BTreeMap::new();
        if let Some(filter) = &filter {
            sql.push_str(" WHERE ");
            sql.push_str(&filter.to_sql(mapping, &mut params)?);
        }
        let count = session
            .connection()
            .execute(&sql, Params::Named(params))?
            .scalar()?;
        match count {
            Value::Integer(n) => Ok(u64::try_from(n).unwrap_or(0)),
            other => Err(OrmError::decode(format!(
                "count returned a {} value",
                other.type_name()
            ))),
        }
    }
}
