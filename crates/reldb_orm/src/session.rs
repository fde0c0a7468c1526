//! Sessions: identity map, unit of work and lazy relationships.

use crate::entity::{entity_name, Attributes, Entity, EntityRef};
use crate::error::{OrmError, OrmResult};
use crate::mapping::{Mapping, Registry, RelationshipKind};
use crate::query::Query;
use reldb_core::{Connection, CoreError, Engine, Execute, Params, ResultSet, Row, Value};
use std::any::{Any, TypeId};
use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap};
use std::rc::Rc;
use std::sync::Arc;
use tracing::{debug, trace};

/// Session configuration.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Flush pending changes before every query.
    pub autoflush: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self { autoflush: true }
    }
}

impl SessionConfig {
    /// Creates the default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets whether queries flush pending changes first.
    #[must_use]
    pub const fn autoflush(mut self, autoflush: bool) -> Self {
        self.autoflush = autoflush;
        self
    }
}

/// Position of an instance in the session's bookkeeping.
type InstanceId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Status {
    /// Added, not yet inserted.
    Pending,
    /// Backed by a row.
    Persistent,
    /// Row will be deleted on flush.
    Deleted,
}

/// Type-erased access to a tracked `RefCell<T>`.
#[derive(Clone, Copy)]
struct EntityOps {
    attributes: fn(&dyn Any) -> OrmResult<Vec<(&'static str, Value)>>,
    replace: fn(&dyn Any, &Attributes) -> OrmResult<()>,
}

impl EntityOps {
    fn of<T: Entity>() -> Self {
        Self {
            attributes: attributes_of::<T>,
            replace: replace_with::<T>,
        }
    }
}

fn cell_of<T: 'static>(any: &dyn Any) -> OrmResult<&RefCell<T>> {
    any.downcast_ref::<RefCell<T>>()
        .ok_or_else(|| OrmError::invalid_operation("tracked instance has an unexpected type"))
}

fn borrowed(name: &str) -> OrmError {
    OrmError::invalid_operation(format!("{name} instance is borrowed during flush"))
}

fn attributes_of<T: Entity>(any: &dyn Any) -> OrmResult<Vec<(&'static str, Value)>> {
    let value = cell_of::<T>(any)?
        .try_borrow()
        .map_err(|_| borrowed(entity_name::<T>()))?;
    Ok(value.attributes())
}

fn replace_with<T: Entity>(any: &dyn Any, attrs: &Attributes) -> OrmResult<()> {
    let rebuilt = T::from_attributes(attrs)?;
    let mut value = cell_of::<T>(any)?
        .try_borrow_mut()
        .map_err(|_| borrowed(entity_name::<T>()))?;
    *value = rebuilt;
    Ok(())
}

/// Session-side state of one instance.
struct Tracked {
    type_id: TypeId,
    handle: Rc<dyn Any>,
    addr: usize,
    ops: EntityOps,
    status: Status,
    /// Column values as last written or read; empty while pending.
    snapshot: Vec<Value>,
    key: Option<Vec<Value>>,
    /// Owner whose key fills the given foreign-key attribute on insert.
    parent: Option<(InstanceId, String)>,
}

/// Formats a primary key for messages: `1` or `(1, 'a')`.
fn key_display(key: &[Value]) -> String {
    let parts: Vec<String> = key.iter().map(Value::to_sql_literal).collect();
    if parts.len() == 1 {
        parts.join("")
    } else {
        format!("({})", parts.join(", "))
    }
}

/// Named parameters `k0, k1, ...` for a primary key.
fn key_params(key: &[Value], params: &mut BTreeMap<String, Value>) {
    for (i, value) in key.iter().enumerate() {
        params.insert(format!("k{i}"), value.clone());
    }
}

/// A unit of work over one connection.
///
/// The session tracks every entity it loads or is given. Within one
/// session, a primary key maps to exactly one [`EntityRef`] (the identity
/// map). Changes are collected and written by [`flush`](Self::flush), which
/// [`commit`](Self::commit) and, with autoflush on, every query call first.
///
/// Dropping a session rolls back anything not committed.
pub struct Session {
    conn: Connection,
    registry: Arc<Registry>,
    config: SessionConfig,
    next_id: InstanceId,
    tracked: BTreeMap<InstanceId, Tracked>,
    by_addr: HashMap<usize, InstanceId>,
    identity: HashMap<(TypeId, Vec<Value>), InstanceId>,
    collections: HashMap<(InstanceId, String), Vec<InstanceId>>,
}

impl Session {
    /// Opens a session on a new connection with default configuration.
    pub fn new(engine: &Engine, registry: Arc<Registry>) -> OrmResult<Self> {
        Self::with_config(engine, registry, SessionConfig::default())
    }

    /// Opens a session on a new connection.
    pub fn with_config(
        engine: &Engine,
        registry: Arc<Registry>,
        config: SessionConfig,
    ) -> OrmResult<Self> {
        let conn = engine.connect()?;
        Ok(Self {
            conn,
            registry,
            config,
            next_id: 0,
            tracked: BTreeMap::new(),
            by_addr: HashMap::new(),
            identity: HashMap::new(),
            collections: HashMap::new(),
        })
    }

    /// The registry the session maps with.
    #[must_use]
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub(crate) fn registry_arc(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// The session's connection.
    pub fn connection(&mut self) -> &mut Connection {
        &mut self.conn
    }

    /// Returns true if a transaction is open.
    #[must_use]
    pub fn in_transaction(&self) -> bool {
        self.conn.in_transaction()
    }

    /// Runs a raw statement on the session's connection, flushing first
    /// when autoflush is on.
    pub fn execute(&mut self, sql: &str, params: impl Into<Execute>) -> OrmResult<ResultSet> {
        self.flush_if_autoflush()?;
        Ok(self.conn.execute(sql, params)?)
    }

    /// Adds a new entity. It is inserted on the next flush.
    ///
    /// # Errors
    ///
    /// Returns [`OrmError::UnmappedEntity`] if `T` is not registered and
    /// [`OrmError::UnmappedAttribute`] if an attribute has no column.
    pub fn add<T: Entity>(&mut self, entity: T) -> OrmResult<EntityRef<T>> {
        let registry = Arc::clone(&self.registry);
        registry.mapping::<T>()?.row_of(entity.attributes())?;
        let handle = EntityRef::new(entity);
        self.track(&handle, Status::Pending, Vec::new(), None);
        Ok(handle)
    }

    /// Makes `entity` part of the unit of work: an untracked instance is
    /// inserted on the next flush, a loaded one has its changes written.
    ///
    /// An untracked instance whose primary key matches an existing row is
    /// attached to that row instead, so the flush updates it.
    ///
    /// # Errors
    ///
    /// Returns an invalid-operation error if another instance with the same
    /// key is already tracked or `entity` is marked for deletion.
    pub fn save<T: Entity>(&mut self, entity: &EntityRef<T>) -> OrmResult<()> {
        let registry = Arc::clone(&self.registry);
        let mapping = registry.mapping::<T>()?;
        let attributes = entity
            .cell()
            .try_borrow()
            .map_err(|_| borrowed(entity_name::<T>()))?
            .attributes();
        let row = mapping.row_of(attributes)?;
        match self.by_addr.get(&entity.addr()).copied() {
            None => self.attach(mapping, entity, mapping.key_of(&row)),
            Some(id) if self.status(id)? == Status::Deleted => Err(OrmError::invalid_operation(
                format!("{} instance is marked for deletion", mapping.entity()),
            )),
            Some(_) => Ok(()),
        }
    }

    /// Tracks an untracked instance, as persistent when a row with its key
    /// exists and as pending otherwise.
    fn attach<T: Entity>(
        &mut self,
        mapping: &Mapping,
        entity: &EntityRef<T>,
        key: Vec<Value>,
    ) -> OrmResult<()> {
        if key.iter().any(Value::is_null) {
            self.track(entity, Status::Pending, Vec::new(), None);
            return Ok(());
        }
        self.flush_if_autoflush()?;
        let identity_key = (TypeId::of::<T>(), key);
        if self.identity.contains_key(&identity_key) {
            return Err(OrmError::invalid_operation(format!(
                "another {} instance with key {} is already in the session",
                mapping.entity(),
                key_display(&identity_key.1)
            )));
        }
        let sql = format!("{} WHERE {}", mapping.select_sql(), mapping.key_predicate());
        let mut params = BTreeMap::new();
        key_params(&identity_key.1, &mut params);
        match self.conn.execute(&sql, Params::Named(params))?.one_or_none()? {
            Some(found) => {
                debug!(
                    "attaching {} {} to its existing row",
                    mapping.entity(),
                    key_display(&identity_key.1)
                );
                let id = self.track(entity, Status::Persistent, found.into_values(), None);
                if let Some(tracked) = self.tracked.get_mut(&id) {
                    tracked.key = Some(identity_key.1.clone());
                }
                self.identity.insert(identity_key, id);
            }
            None => {
                self.track(entity, Status::Pending, Vec::new(), None);
            }
        }
        Ok(())
    }

    /// Marks `entity` for deletion. A pending instance is simply dropped
    /// from the session.
    pub fn delete<T: Entity>(&mut self, entity: &EntityRef<T>) -> OrmResult<()> {
        let id = self.instance_id(entity)?;
        match self.status(id)? {
            Status::Pending => self.untrack(id),
            Status::Persistent => {
                if let Some(tracked) = self.tracked.get_mut(&id) {
                    tracked.status = Status::Deleted;
                }
            }
            Status::Deleted => {}
        }
        Ok(())
    }

    /// Returns true if `entity` is tracked by this session.
    #[must_use]
    pub fn contains<T: Entity>(&self, entity: &EntityRef<T>) -> bool {
        self.by_addr.contains_key(&entity.addr())
    }

    /// Number of tracked instances.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tracked.len()
    }

    /// Returns true if nothing is tracked.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tracked.is_empty()
    }

    /// Loads the entity with primary key `key`, from the identity map when
    /// it is already present.
    pub fn get<T: Entity>(&mut self, key: impl Into<Value>) -> OrmResult<Option<EntityRef<T>>> {
        self.get_by_key(vec![key.into()])
    }

    /// Loads the entity with a composite primary key.
    pub fn get_by_key<T: Entity>(&mut self, key: Vec<Value>) -> OrmResult<Option<EntityRef<T>>> {
        if let Some(found) = self.lookup::<T>(&key)? {
            return Ok(found);
        }
        self.flush_if_autoflush()?;
        if let Some(found) = self.lookup::<T>(&key)? {
            return Ok(found);
        }
        let registry = Arc::clone(&self.registry);
        let mapping = registry.mapping::<T>()?;
        let pk_len = mapping.schema().primary_key().len();
        if key.len() != pk_len {
            return Err(CoreError::parameter(format!(
                "{} has a {pk_len}-column primary key, got {} values",
                mapping.entity(),
                key.len()
            ))
            .into());
        }
        let sql = format!("{} WHERE {}", mapping.select_sql(), mapping.key_predicate());
        let mut params = BTreeMap::new();
        key_params(&key, &mut params);
        match self.conn.execute(&sql, Params::Named(params))?.one_or_none()? {
            Some(row) => Ok(Some(self.load_row::<T>(mapping, &row)?.1)),
            None => Ok(None),
        }
    }

    /// Identity map lookup. `Some(None)` means the instance is marked for
    /// deletion.
    fn lookup<T: Entity>(&self, key: &[Value]) -> OrmResult<Option<Option<EntityRef<T>>>> {
        let Some(&id) = self.identity.get(&(TypeId::of::<T>(), key.to_vec())) else {
            return Ok(None);
        };
        if self.status(id)? == Status::Deleted {
            return Ok(Some(None));
        }
        trace!("identity map hit for {} {}", entity_name::<T>(), key_display(key));
        Ok(Some(Some(self.handle_of::<T>(id)?)))
    }

    /// Starts a query for `T`.
    pub fn query<T: Entity>(&mut self) -> Query<'_, T> {
        Query::new(self)
    }

    /// Entities related to `parent` through the relationship `name`.
    ///
    /// The first access runs a query and caches the result; later calls
    /// return the cached instances for the lifetime of the session.
    pub fn related<P: Entity, C: Entity>(
        &mut self,
        parent: &EntityRef<P>,
        name: &str,
    ) -> OrmResult<Vec<EntityRef<C>>> {
        let parent_id = self.instance_id(parent)?;
        let ids = self.load_related::<P, C>(parent_id, name)?;
        ids.into_iter().map(|id| self.handle_of::<C>(id)).collect()
    }

    /// The single entity related to `owner` through a many-to-one
    /// relationship, if the foreign key is set.
    pub fn related_one<P: Entity, C: Entity>(
        &mut self,
        owner: &EntityRef<P>,
        name: &str,
    ) -> OrmResult<Option<EntityRef<C>>> {
        Ok(self.related::<P, C>(owner, name)?.into_iter().next())
    }

    /// Adds `child` to the one-to-many collection `name` of `parent`. The
    /// child's foreign key is filled from the parent's key at flush time.
    pub fn append_related<P: Entity, C: Entity>(
        &mut self,
        parent: &EntityRef<P>,
        name: &str,
        child: C,
    ) -> OrmResult<EntityRef<C>> {
        let registry = Arc::clone(&self.registry);
        let relationship = registry
            .mapping::<P>()?
            .relationship_named(name)
            .ok_or_else(|| unknown_relationship::<P>(name))?;
        if relationship.kind() != RelationshipKind::OneToMany {
            return Err(OrmError::invalid_operation(format!(
                "relationship {name:?} of {} is not a collection",
                entity_name::<P>()
            )));
        }
        let parent_id = self.instance_id(parent)?;
        self.load_related::<P, C>(parent_id, name)?;

        registry.mapping::<C>()?.row_of(child.attributes())?;
        let handle = EntityRef::new(child);
        let child_id = self.track(
            &handle,
            Status::Pending,
            Vec::new(),
            Some((parent_id, relationship.foreign_key().to_string())),
        );
        self.collections
            .entry((parent_id, name.to_string()))
            .or_default()
            .push(child_id);
        Ok(handle)
    }

    fn load_related<P: Entity, C: Entity>(
        &mut self,
        parent_id: InstanceId,
        name: &str,
    ) -> OrmResult<Vec<InstanceId>> {
        let registry = Arc::clone(&self.registry);
        let parent_mapping = registry.mapping::<P>()?;
        let relationship = parent_mapping
            .relationship_named(name)
            .ok_or_else(|| unknown_relationship::<P>(name))?;
        if relationship.target() != TypeId::of::<C>() {
            return Err(OrmError::invalid_operation(format!(
                "relationship {name:?} of {} targets {}, not {}",
                parent_mapping.entity(),
                relationship.target_name(),
                entity_name::<C>()
            )));
        }
        let cache_key = (parent_id, name.to_string());
        if let Some(ids) = self.collections.get(&cache_key) {
            trace!("{}.{} served from session cache", parent_mapping.entity(), name);
            return Ok(ids.clone());
        }

        let target_mapping = registry.mapping::<C>()?;
        let ids = match relationship.kind() {
            RelationshipKind::OneToMany => {
                let fk_column = target_mapping
                    .column_for(relationship.foreign_key())
                    .ok_or_else(|| {
                        OrmError::unmapped_attribute(
                            target_mapping.entity(),
                            relationship.foreign_key(),
                        )
                    })?;
                self.flush_if_autoflush()?;
                match self.tracked_ref(parent_id)?.key.clone() {
                    None => Vec::new(),
                    Some(key) => {
                        debug!(
                            "lazy loading {}.{} for key {}",
                            parent_mapping.entity(),
                            name,
                            key_display(&key)
                        );
                        let parent_key = key.into_iter().next().unwrap_or(Value::Null);
                        let sql = format!(
                            "{} WHERE {fk_column} = :k0 ORDER BY {}",
                            target_mapping.select_sql(),
                            target_mapping.schema().primary_key_columns().join(", ")
                        );
                        let rows = self
                            .conn
                            .execute(&sql, Params::named([("k0", parent_key)]))?
                            .all();
                        let mut ids = Vec::with_capacity(rows.len());
                        for row in &rows {
                            ids.push(self.load_row::<C>(target_mapping, row)?.0);
                        }
                        ids
                    }
                }
            }
            RelationshipKind::ManyToOne => {
                let tracked = self.tracked_ref(parent_id)?;
                let attributes = (tracked.ops.attributes)(&*tracked.handle)?;
                let fk = attributes
                    .into_iter()
                    .find(|(attribute, _)| *attribute == relationship.foreign_key())
                    .map(|(_, value)| value)
                    .ok_or_else(|| {
                        OrmError::unmapped_attribute(
                            parent_mapping.entity(),
                            relationship.foreign_key(),
                        )
                    })?;
                if fk.is_null() {
                    Vec::new()
                } else {
                    debug!("lazy loading {}.{}", parent_mapping.entity(), name);
                    match self.get::<C>(fk)? {
                        Some(target) => vec![self.instance_id(&target)?],
                        None => Vec::new(),
                    }
                }
            }
        };
        self.collections.insert(cache_key, ids.clone());
        Ok(ids)
    }

    /// Reloads `entity` from its row, discarding unflushed changes.
    ///
    /// # Errors
    ///
    /// Returns [`OrmError::StaleEntity`] if the row no longer exists.
    pub fn refresh<T: Entity>(&mut self, entity: &EntityRef<T>) -> OrmResult<()> {
        let id = self.instance_id(entity)?;
        let key = self
            .tracked_ref(id)?
            .key
            .clone()
            .ok_or_else(|| OrmError::invalid_operation("pending instance cannot be refreshed"))?;
        let registry = Arc::clone(&self.registry);
        let mapping = registry.mapping::<T>()?;
        let sql = format!("{} WHERE {}", mapping.select_sql(), mapping.key_predicate());
        let mut params = BTreeMap::new();
        key_params(&key, &mut params);
        let row = self
            .conn
            .execute(&sql, Params::Named(params))?
            .one_or_none()?
            .ok_or_else(|| stale(mapping, &key))?;
        let values = row.into_values();
        let rebuilt = T::from_attributes(&attributes_from(mapping, &values))?;
        *entity
            .cell()
            .try_borrow_mut()
            .map_err(|_| borrowed(mapping.entity()))? = rebuilt;
        if let Some(tracked) = self.tracked.get_mut(&id) {
            tracked.snapshot = values;
        }
        Ok(())
    }

    /// Writes pending changes: inserts parents before children, then
    /// updates of changed columns, then deletes children before parents.
    ///
    /// # Errors
    ///
    /// Returns [`OrmError::StaleEntity`] when an update or delete matches
    /// no row. Any error leaves the transaction failed; roll back before
    /// continuing.
    pub fn flush(&mut self) -> OrmResult<()> {
        let registry = Arc::clone(&self.registry);
        let ranks = registry.flush_ranks()?;
        let rank = |t: &Tracked| ranks.get(&t.type_id).copied().unwrap_or(usize::MAX);

        let mut inserts = Vec::new();
        let mut updates = Vec::new();
        let mut deletes = Vec::new();
        for (&id, tracked) in &self.tracked {
            let entry = (rank(tracked), id);
            match tracked.status {
                Status::Pending => inserts.push(entry),
                Status::Persistent => updates.push(entry),
                Status::Deleted => deletes.push(entry),
            }
        }
        inserts.sort_unstable();
        updates.sort_unstable();
        deletes.sort_unstable_by(|a, b| b.cmp(a));
        if inserts.is_empty() && deletes.is_empty() && !self.any_dirty(&registry)? {
            return Ok(());
        }
        debug!(
            "flushing {} new, {} loaded, {} deleted instances",
            inserts.len(),
            updates.len(),
            deletes.len()
        );

        for (_, id) in inserts {
            self.flush_insert(&registry, id)?;
        }
        for (_, id) in updates {
            self.flush_update(&registry, id)?;
        }
        for (_, id) in deletes {
            self.flush_delete(&registry, id)?;
        }
        Ok(())
    }

    fn any_dirty(&self, registry: &Registry) -> OrmResult<bool> {
        for tracked in self.tracked.values() {
            if tracked.status == Status::Persistent {
                let mapping = registry.mapping_by_id(tracked.type_id)?;
                let current = mapping.row_of((tracked.ops.attributes)(&*tracked.handle)?)?;
                if current != tracked.snapshot {
                    return Ok(true);
                }
            }
        }
        Ok(false)
    }

    fn flush_insert(&mut self, registry: &Registry, id: InstanceId) -> OrmResult<()> {
        let tracked = self.tracked_ref(id)?;
        let type_id = tracked.type_id;
        let mapping = registry.mapping_by_id(type_id)?;
        let ops = tracked.ops;
        let handle = Rc::clone(&tracked.handle);
        let mut attributes = (ops.attributes)(&*handle)?;

        if let Some((parent_id, fk_attribute)) = tracked.parent.clone() {
            let parent_key = self
                .tracked_ref(parent_id)?
                .key
                .clone()
                .and_then(|key| key.into_iter().next())
                .ok_or_else(|| {
                    OrmError::invalid_operation(format!(
                        "owner of pending {} has no key",
                        mapping.entity()
                    ))
                })?;
            for (attribute, value) in &mut attributes {
                if *attribute == fk_attribute {
                    *value = parent_key.clone();
                }
            }
            (ops.replace)(&*handle, &attributes.iter().cloned().collect())?;
        }

        let mut row = mapping.row_of(attributes)?;
        let columns = mapping.schema().column_names();
        let placeholders: Vec<String> = (0..columns.len()).map(|i| format!(":c{i}")).collect();
        let sql = format!(
            "INSERT INTO {} ({}) VALUES ({})",
            mapping.table(),
            columns.join(", "),
            placeholders.join(", ")
        );
        let params = Params::named(
            row.iter()
                .enumerate()
                .map(|(i, v)| (format!("c{i}"), v.clone())),
        );
        let result = self.conn.execute(&sql, params)?;

        if let (Some(idx), Some(generated)) =
            (mapping.schema().auto_increment_column(), result.last_insert_id())
        {
            if row[idx].is_null() {
                row[idx] = Value::Integer(generated);
                if mapping.attribute_at(idx).is_some() {
                    (ops.replace)(&*handle, &attributes_from(mapping, &row))?;
                }
            }
        }
        let key = mapping.key_of(&row);
        trace!("inserted {} {}", mapping.entity(), key_display(&key));
        self.identity.insert((type_id, key.clone()), id);
        if let Some(tracked) = self.tracked.get_mut(&id) {
            tracked.status = Status::Persistent;
            tracked.snapshot = row;
            tracked.key = Some(key);
            tracked.parent = None;
        }
        Ok(())
    }

    fn flush_update(&mut self, registry: &Registry, id: InstanceId) -> OrmResult<()> {
        let tracked = self.tracked_ref(id)?;
        let mapping = registry.mapping_by_id(tracked.type_id)?;
        let current = mapping.row_of((tracked.ops.attributes)(&*tracked.handle)?)?;
        let changed: Vec<usize> = (0..current.len())
            .filter(|&i| current[i] != tracked.snapshot[i])
            .collect();
        if changed.is_empty() {
            return Ok(());
        }
        let old_key = tracked.key.clone().unwrap_or_default();
        let type_id = tracked.type_id;

        let columns = mapping.schema().columns();
        let assignments: Vec<String> = changed
            .iter()
            .map(|&i| format!("{} = :c{i}", columns[i].name))
            .collect();
        let sql = format!(
            "UPDATE {} SET {} WHERE {}",
            mapping.table(),
            assignments.join(", "),
            mapping.key_predicate()
        );
        let mut params: BTreeMap<String, Value> = changed
            .iter()
            .map(|&i| (format!("c{i}"), current[i].clone()))
            .collect();
        key_params(&old_key, &mut params);
        let result = self.conn.execute(&sql, Params::Named(params))?;
        if result.rows_affected() == 0 {
            return Err(stale(mapping, &old_key));
        }
        trace!(
            "updated {} {}: {} column(s)",
            mapping.entity(),
            key_display(&old_key),
            changed.len()
        );

        let new_key = mapping.key_of(&current);
        if new_key != old_key {
            self.identity.remove(&(type_id, old_key));
            self.identity.insert((type_id, new_key.clone()), id);
        }
        if let Some(tracked) = self.tracked.get_mut(&id) {
            tracked.snapshot = current;
            tracked.key = Some(new_key);
        }
        Ok(())
    }

    fn flush_delete(&mut self, registry: &Registry, id: InstanceId) -> OrmResult<()> {
        let tracked = self.tracked_ref(id)?;
        let mapping = registry.mapping_by_id(tracked.type_id)?;
        let key = tracked.key.clone().unwrap_or_default();
        let sql = format!(
            "DELETE FROM {} WHERE {}",
            mapping.table(),
            mapping.key_predicate()
        );
        let mut params = BTreeMap::new();
        key_params(&key, &mut params);
        let result = self.conn.execute(&sql, Params::Named(params))?;
        if result.rows_affected() == 0 {
            return Err(stale(mapping, &key));
        }
        trace!("deleted {} {}", mapping.entity(), key_display(&key));
        self.untrack(id);
        Ok(())
    }

    /// Flushes, then commits the transaction.
    ///
    /// If the commit itself fails and the transaction is gone, every
    /// tracked instance is forgotten as with [`rollback`](Self::rollback),
    /// since the rows they were loaded from or written to no longer exist.
    pub fn commit(&mut self) -> OrmResult<()> {
        self.flush()?;
        if let Err(e) = self.conn.commit() {
            if !self.conn.in_transaction() {
                debug!("commit failed, expunging {} instances", self.tracked.len());
                self.expunge_all();
            }
            return Err(e.into());
        }
        Ok(())
    }

    /// Rolls back the transaction and forgets every tracked instance.
    /// Handles obtained earlier keep their values but are no longer
    /// tracked.
    pub fn rollback(&mut self) -> OrmResult<()> {
        self.conn.rollback()?;
        self.expunge_all();
        Ok(())
    }

    /// Forgets every tracked instance without touching the transaction.
    pub fn expunge_all(&mut self) {
        self.tracked.clear();
        self.by_addr.clear();
        self.identity.clear();
        self.collections.clear();
    }

    /// Closes the session, rolling back anything not committed.
    pub fn close(self) -> OrmResult<()> {
        Ok(self.conn.close()?)
    }

    pub(crate) fn flush_if_autoflush(&mut self) -> OrmResult<()> {
        if self.config.autoflush {
            self.flush()
        } else {
            Ok(())
        }
    }

    fn track<T: Entity>(
        &mut self,
        handle: &EntityRef<T>,
        status: Status,
        snapshot: Vec<Value>,
        parent: Option<(InstanceId, String)>,
    ) -> InstanceId {
        let id = self.next_id;
        self.next_id += 1;
        let addr = handle.addr();
        let any: Rc<dyn Any> = Rc::clone(handle.cell()) as Rc<dyn Any>;
        self.tracked.insert(
            id,
            Tracked {
                type_id: TypeId::of::<T>(),
                handle: any,
                addr,
                ops: EntityOps::of::<T>(),
                status,
                snapshot,
                key: None,
                parent,
            },
        );
        self.by_addr.insert(addr, id);
        id
    }

    fn untrack(&mut self, id: InstanceId) {
        if let Some(tracked) = self.tracked.remove(&id) {
            self.by_addr.remove(&tracked.addr);
            if let Some(key) = tracked.key {
                self.identity.remove(&(tracked.type_id, key));
            }
            self.collections.retain(|(owner, _), _| *owner != id);
            for ids in self.collections.values_mut() {
                ids.retain(|member| *member != id);
            }
        }
    }

    fn tracked_ref(&self, id: InstanceId) -> OrmResult<&Tracked> {
        self.tracked
            .get(&id)
            .ok_or_else(|| OrmError::invalid_operation("instance is no longer tracked"))
    }

    fn status(&self, id: InstanceId) -> OrmResult<Status> {
        Ok(self.tracked_ref(id)?.status)
    }

    fn instance_id<T: Entity>(&self, entity: &EntityRef<T>) -> OrmResult<InstanceId> {
        self.by_addr.get(&entity.addr()).copied().ok_or_else(|| {
            OrmError::invalid_operation(format!(
                "{} instance is not tracked by this session",
                entity_name::<T>()
            ))
        })
    }

    fn handle_of<T: Entity>(&self, id: InstanceId) -> OrmResult<EntityRef<T>> {
        let any = Rc::clone(&self.tracked_ref(id)?.handle);
        any.downcast::<RefCell<T>>()
            .map(EntityRef::from_cell)
            .map_err(|_| OrmError::invalid_operation("tracked instance has an unexpected type"))
    }

    /// Turns a row selected with [`Mapping::select_sql`] into the tracked
    /// instance for its key, creating it on first sight. An instance that
    /// is already tracked keeps its in-memory state.
    pub(crate) fn load_row<T: Entity>(
        &mut self,
        mapping: &Mapping,
        row: &Row,
    ) -> OrmResult<(InstanceId, EntityRef<T>)> {
        let values = row.values().to_vec();
        let key = mapping.key_of(&values);
        if let Some(&id) = self.identity.get(&(TypeId::of::<T>(), key.clone())) {
            trace!("identity map hit for {} {}", mapping.entity(), key_display(&key));
            return Ok((id, self.handle_of::<T>(id)?));
        }
        let entity = T::from_attributes(&attributes_from(mapping, &values))?;
        let handle = EntityRef::new(entity);
        let id = self.track(&handle, Status::Persistent, values, None);
        if let Some(tracked) = self.tracked.get_mut(&id) {
            tracked.key = Some(key.clone());
        }
        self.identity.insert((TypeId::of::<T>(), key), id);
        Ok((id, handle))
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("conn", &self.conn)
            .field("config", &self.config)
            .field("tracked", &self.tracked.len())
            .field("identity", &self.identity.len())
            .finish_non_exhaustive()
    }
}

/// Attribute map for a column-ordered row.
fn attributes_from(mapping: &Mapping, values: &[Value]) -> Attributes {
    values
        .iter()
        .enumerate()
        .filter_map(|(i, value)| mapping.attribute_at(i).map(|a| (a, value.clone())))
        .collect()
}

fn stale(mapping: &Mapping, key: &[Value]) -> OrmError {
    OrmError::StaleEntity {
        entity: mapping.entity().to_string(),
        table: mapping.table().to_string(),
        key: key_display(key),
    }
}

fn unknown_relationship<P: Entity>(name: &str) -> OrmError {
    OrmError::UnknownRelationship {
        entity: entity_name::<P>().to_string(),
        name: name.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::col;
    use crate::mapping::Relationship;
    use reldb_core::{Column, SqlType, TableSchema};

    #[derive(Debug, Clone, PartialEq)]
    struct User {
        id: Option<i64>,
        name: String,
        fullname: String,
    }

    #[derive(Debug, Clone, PartialEq)]
    struct Address {
        id: Option<i64>,
        user_id: Option<i64>,
        email_address: String,
    }

    impl Entity for User {
        fn attributes(&self) -> Vec<(&'static str, Value)> {
            vec![
                ("id", self.id.into()),
                ("name", self.name.clone().into()),
                ("fullname", self.fullname.clone().into()),
            ]
        }

        fn from_attributes(attrs: &Attributes) -> OrmResult<Self> {
            Ok(Self {
                id: attrs.get("id")?,
                name: attrs.get("name")?,
                fullname: attrs.get("fullname")?,
            })
        }
    }

    impl Entity for Address {
        fn attributes(&self) -> Vec<(&'static str, Value)> {
            vec![
                ("id", self.id.into()),
                ("user_id", self.user_id.into()),
                ("email_address", self.email_address.clone().into()),
            ]
        }

        fn from_attributes(attrs: &Attributes) -> OrmResult<Self> {
            Ok(Self {
                id: attrs.get("id")?,
                user_id: attrs.get("user_id")?,
                email_address: attrs.get("email_address")?,
            })
        }
    }

    fn user(name: &str, fullname: &str) -> User {
        User {
            id: None,
            name: name.into(),
            fullname: fullname.into(),
        }
    }

    fn address(email: &str) -> Address {
        Address {
            id: None,
            user_id: None,
            email_address: email.into(),
        }
    }

    fn setup() -> (Engine, Arc<Registry>) {
        let users = TableSchema::builder("user_account")
            .column(Column::new("id", SqlType::Integer).primary_key())
            .column(Column::new("name", SqlType::Text).length(30).not_null())
            .column(Column::new("fullname", SqlType::Text).not_null())
            .build()
            .unwrap();
        let addresses = TableSchema::builder("address")
            .column(Column::new("id", SqlType::Integer).primary_key())
            .column(
                Column::new("user_id", SqlType::Integer)
                    .not_null()
                    .references("user_account", "id"),
            )
            .column(Column::new("email_address", SqlType::Text).not_null())
            .build()
            .unwrap();
        let registry = Registry::new()
            .with::<Address>(
                Mapping::new(addresses)
                    .relationship("user", Relationship::many_to_one::<User>("user_id")),
            )
            .unwrap()
            .with::<User>(
                Mapping::new(users)
                    .relationship("addresses", Relationship::one_to_many::<Address>("user_id")),
            )
            .unwrap();
        let engine = Engine::in_memory();
        registry.metadata().unwrap().create_all(&engine).unwrap();
        (engine, Arc::new(registry))
    }

    #[test]
    fn commit_writes_generated_keys_back() {
        let (engine, registry) = setup();
        let mut session = Session::new(&engine, registry).unwrap();
        let spongebob = session.add(user("spongebob", "Spongebob Squarepants")).unwrap();
        let sandy = session.add(user("sandy", "Sandy Cheeks")).unwrap();
        assert_eq!(spongebob.borrow().id, None);
        session.commit().unwrap();
        assert_eq!(spongebob.borrow().id, Some(1));
        assert_eq!(sandy.borrow().id, Some(2));

        let mut conn = engine.connect().unwrap();
        let count = conn
            .execute("SELECT count(*) FROM user_account", ())
            .unwrap()
            .scalar()
            .unwrap();
        assert_eq!(count, Value::Integer(2));
    }

    #[test]
    fn same_key_yields_same_instance() {
        let (engine, registry) = setup();
        let mut session = Session::new(&engine, registry).unwrap();
        let added = session.add(user("patrick", "Patrick Star")).unwrap();
        session.commit().unwrap();

        let by_get = session.get::<User>(1).unwrap().unwrap();
        let by_query = session
            .query::<User>()
            .filter(col("name").eq("patrick"))
            .one()
            .unwrap();
        assert!(EntityRef::ptr_eq(&added, &by_get));
        assert!(EntityRef::ptr_eq(&by_get, &by_query));
        assert_eq!(session.len(), 1);
        session.flush().unwrap();
        assert_eq!(session.len(), 1);
    }

    #[test]
    fn a_fresh_session_loads_its_own_instances() {
        let (engine, registry) = setup();
        let mut first = Session::new(&engine, Arc::clone(&registry)).unwrap();
        first.add(user("sandy", "Sandy Cheeks")).unwrap();
        first.commit().unwrap();

        let mut second = Session::new(&engine, registry).unwrap();
        let a = second.get::<User>(1).unwrap().unwrap();
        let b = second.get::<User>(1).unwrap().unwrap();
        assert!(EntityRef::ptr_eq(&a, &b));
        assert_eq!(a.borrow().fullname, "Sandy Cheeks");
        assert!(second.get::<User>(99).unwrap().is_none());
    }

    #[test]
    fn parents_are_inserted_before_children() {
        let (engine, registry) = setup();
        let mut session = Session::new(&engine, registry).unwrap();
        // Children added first still flush after their owner.
        let orphan_first = session
            .add(Address {
                id: None,
                user_id: Some(1),
                email_address: "squidward@sqlalchemy.org".into(),
            })
            .unwrap();
        let squidward = session.add(user("squidward", "Squidward Tentacles")).unwrap();
        session.commit().unwrap();
        assert_eq!(squidward.borrow().id, Some(1));
        assert_eq!(orphan_first.borrow().id, Some(1));
    }

    #[test]
    fn appended_children_get_the_owner_key() {
        let (engine, registry) = setup();
        let mut session = Session::new(&engine, registry).unwrap();
        session.add(user("spongebob", "Spongebob Squarepants")).unwrap();
        let sandy = session.add(user("sandy", "Sandy Cheeks")).unwrap();
        let a = session
            .append_related(&sandy, "addresses", address("sandy@sqlalchemy.org"))
            .unwrap();
        let b = session
            .append_related(&sandy, "addresses", address("sandy@squirrelpower.org"))
            .unwrap();
        session.commit().unwrap();

        assert_eq!(a.borrow().user_id, Some(2));
        assert_eq!(b.borrow().user_id, Some(2));
        let related: Vec<EntityRef<Address>> = session.related(&sandy, "addresses").unwrap();
        assert_eq!(related.len(), 2);
        assert!(EntityRef::ptr_eq(&related[0], &a));
        let owner: Option<EntityRef<User>> = session.related_one(&a, "user").unwrap();
        assert!(EntityRef::ptr_eq(&owner.unwrap(), &sandy));
    }

    #[test]
    fn relationships_load_once_per_session() {
        let (engine, registry) = setup();
        let mut session = Session::new(&engine, Arc::clone(&registry)).unwrap();
        let patrick = session.add(user("patrick", "Patrick Star")).unwrap();
        session
            .append_related(&patrick, "addresses", address("patrick@sqlalchemy.org"))
            .unwrap();
        session.commit().unwrap();

        let mut reader = Session::new(&engine, registry).unwrap();
        let patrick = reader.get::<User>(1).unwrap().unwrap();
        let first: Vec<EntityRef<Address>> = reader.related(&patrick, "addresses").unwrap();
        assert_eq!(first.len(), 1);

        let mut conn = engine.connect().unwrap();
        conn.execute(
            "INSERT INTO address (user_id, email_address) VALUES (1, 'p2@sqlalchemy.org')",
            (),
        )
        .unwrap();
        conn.commit().unwrap();

        let again: Vec<EntityRef<Address>> = reader.related(&patrick, "addresses").unwrap();
        assert_eq!(again.len(), 1);
        assert!(EntityRef::ptr_eq(&first[0], &again[0]));
    }

    #[test]
    fn only_changed_columns_are_updated() {
        let (engine, registry) = setup();
        let mut session = Session::new(&engine, Arc::clone(&registry)).unwrap();
        let sandy = session.add(user("sandy", "Sandy Cheeks")).unwrap();
        session.commit().unwrap();

        sandy.borrow_mut().fullname = "Sandy Squirrel".into();
        session.save(&sandy).unwrap();
        session.commit().unwrap();

        let mut conn = engine.connect().unwrap();
        let row = conn
            .execute("SELECT name, fullname FROM user_account WHERE id = 1", ())
            .unwrap()
            .one()
            .unwrap();
        assert_eq!(row.to_string(), "('sandy', 'Sandy Squirrel')");
    }

    #[test]
    fn mutating_a_deleted_row_is_stale() {
        let (engine, registry) = setup();
        let mut session = Session::new(&engine, registry).unwrap();
        let patrick = session.add(user("patrick", "Patrick Star")).unwrap();
        session.commit().unwrap();

        let mut conn = engine.connect().unwrap();
        conn.execute("DELETE FROM user_account WHERE id = 1", ()).unwrap();
        conn.commit().unwrap();

        patrick.borrow_mut().fullname = "Patrick".into();
        let err = session.commit().unwrap_err();
        assert!(matches!(err, OrmError::StaleEntity { ref table, .. } if table == "user_account"));
        session.rollback().unwrap();
        assert!(session.is_empty());
        assert!(!session.contains(&patrick));
    }

    #[test]
    fn refresh_of_a_deleted_row_is_stale() {
        let (engine, registry) = setup();
        let mut session = Session::new(&engine, registry).unwrap();
        let sandy = session.add(user("sandy", "Sandy Cheeks")).unwrap();
        session.commit().unwrap();

        sandy.borrow_mut().fullname = "unsaved".into();
        session.refresh(&sandy).unwrap();
        assert_eq!(sandy.borrow().fullname, "Sandy Cheeks");
        session.commit().unwrap();

        let mut conn = engine.connect().unwrap();
        conn.execute("DELETE FROM user_account", ()).unwrap();
        conn.commit().unwrap();
        assert!(matches!(
            session.refresh(&sandy),
            Err(OrmError::StaleEntity { .. })
        ));
    }

    #[test]
    fn delete_removes_row_and_identity() {
        let (engine, registry) = setup();
        let mut session = Session::new(&engine, registry).unwrap();
        let sandy = session.add(user("sandy", "Sandy Cheeks")).unwrap();
        let patrick = session.add(user("patrick", "Patrick Star")).unwrap();
        session.commit().unwrap();

        session.delete(&patrick).unwrap();
        assert!(session.get::<User>(2).unwrap().is_none());
        session.commit().unwrap();
        assert!(!session.contains(&patrick));
        let remaining = session.query::<User>().all().unwrap();
        assert_eq!(remaining.len(), 1);
        assert!(EntityRef::ptr_eq(&remaining[0], &sandy));
    }

    #[test]
    fn unmapped_attribute_is_rejected_on_add() {
        #[derive(Debug)]
        struct Nicknamed;

        impl Entity for Nicknamed {
            fn attributes(&self) -> Vec<(&'static str, Value)> {
                vec![("id", Value::Null), ("nickname", Value::from("sb"))]
            }
            fn from_attributes(_: &Attributes) -> OrmResult<Self> {
                Ok(Self)
            }
        }

        let (engine, _) = setup();
        let schema = TableSchema::builder("nicknamed")
            .column(Column::new("id", SqlType::Integer).primary_key())
            .build()
            .unwrap();
        let registry = Registry::new()
            .with::<Nicknamed>(Mapping::new(schema))
            .unwrap();
        let mut session = Session::new(&engine, Arc::new(registry)).unwrap();
        let err = session.add(Nicknamed).unwrap_err();
        assert!(matches!(
            err,
            OrmError::UnmappedAttribute { ref attribute, .. } if attribute == "nickname"
        ));
        assert!(matches!(
            session.query::<User>().all(),
            Err(OrmError::UnmappedEntity { .. })
        ));
    }

    #[test]
    fn without_autoflush_queries_miss_pending_rows() {
        let (engine, registry) = setup();
        let mut session =
            Session::with_config(&engine, registry, SessionConfig::new().autoflush(false)).unwrap();
        session.add(user("sandy", "Sandy Cheeks")).unwrap();
        assert!(session.query::<User>().all().unwrap().is_empty());
        session.flush().unwrap();
        assert_eq!(session.query::<User>().count().unwrap(), 1);
    }

    #[test]
    fn query_orders_limits_and_counts() {
        let (engine, registry) = setup();
        let mut session = Session::new(&engine, registry).unwrap();
        for (name, fullname) in [
            ("spongebob", "Spongebob Squarepants"),
            ("sandy", "Sandy Cheeks"),
            ("patrick", "Patrick Star"),
        ] {
            session.add(user(name, fullname)).unwrap();
        }
        let names: Vec<String> = session
            .query::<User>()
            .order_by(col("name").desc())
            .all()
            .unwrap()
            .iter()
            .map(|u| u.borrow().name.clone())
            .collect();
        assert_eq!(names, vec!["spongebob", "sandy", "patrick"]);

        let second = session
            .query::<User>()
            .order_by("id")
            .offset(1)
            .first()
            .unwrap()
            .unwrap();
        assert_eq!(second.borrow().name, "sandy");
        assert_eq!(
            session
                .query::<User>()
                .filter(col("name").like("s%"))
                .count()
                .unwrap(),
            2
        );
        assert!(matches!(
            session.query::<User>().one(),
            Err(OrmError::MultipleResults)
        ));
        assert!(matches!(
            session
                .query::<User>()
                .filter(col("name").eq("mr krabs"))
                .one(),
            Err(OrmError::NoResult)
        ));
    }

    #[test]
    fn constraint_errors_surface_from_flush() {
        let (engine, registry) = setup();
        let mut session = Session::new(&engine, registry).unwrap();
        session
            .add(Address {
                id: None,
                user_id: Some(42),
                email_address: "nobody@sqlalchemy.org".into(),
            })
            .unwrap();
        let err = session.commit().unwrap_err();
        assert_eq!(err.core_kind(), Some(reldb_core::ErrorKind::Constraint));
        session.rollback().unwrap();
        assert_eq!(session.query::<Address>().count().unwrap(), 0);
    }

    #[test]
    fn unknown_relationship_is_reported() {
        let (engine, registry) = setup();
        let mut session = Session::new(&engine, registry).unwrap();
        let sandy = session.add(user("sandy", "Sandy Cheeks")).unwrap();
        let result: OrmResult<Vec<EntityRef<Address>>> = session.related(&sandy, "friends");
        assert!(matches!(result, Err(OrmError::UnknownRelationship { .. })));
        let wrong: OrmResult<Vec<EntityRef<User>>> = session.related(&sandy, "addresses");
        assert!(wrong.is_err());
    }

    #[test]
    fn raw_statements_share_the_transaction() {
        let (engine, registry) = setup();
        let mut session = Session::new(&engine, registry).unwrap();
        session.add(user("sandy", "Sandy Cheeks")).unwrap();
        let count = session
            .execute("SELECT count(*) FROM user_account", ())
            .unwrap()
            .scalar()
            .unwrap();
        assert_eq!(count, Value::Integer(1));
        assert!(session.in_transaction());
        session.close().unwrap();
        assert!(engine.table_names().unwrap().contains(&"user_account".to_string()));
        let mut conn = engine.connect().unwrap();
        let count = conn
            .execute("SELECT count(*) FROM user_account", ())
            .unwrap()
            .scalar()
            .unwrap();
        assert_eq!(count, Value::Integer(0));
    }
}
