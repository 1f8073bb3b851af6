// ============================================================================
// In-Memory Session
// ============================================================================
//
// Reference implementation of `Session`:
// - storage: one keyed table of committed rows per registered entity type
// - identity map: managed handles with the field snapshot taken at load time
// - unit of work: pending inserts/deletes, turned into a `Change` list on flush
//
// Every statement that reaches storage is reported to the installed
// diagnostic logger (tracing by default).
//
// ============================================================================

use super::{
    Change, DiagnosticLogger, Entity, EntityIdentity, PrimaryKey, Session, SharedLogger,
    TracingLogger, TypeDescriptor,
};
use crate::core::{DbError, EntitySchema, Fields, Result, Value};
use crate::query::{Criteria, Direction, Query, QueryBuilder, StreamRow, StreamingResult};
use async_trait::async_trait;
use futures::{StreamExt, future, stream};
use serde::Serialize;
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};

/// Counters of the work a session has performed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SessionStats {
    pub persists: u64,
    pub removes: u64,
    pub flushes: u64,
    pub clears: u64,
    pub finds: u64,
    pub statements: u64,
    pub managed: usize,
}

#[derive(Debug)]
struct Table {
    schema: EntitySchema,
    rows: BTreeMap<PrimaryKey, Fields>,
}

impl Table {
    fn primary_key_of(&self, fields: &Fields) -> Result<PrimaryKey> {
        let mut values = Vec::with_capacity(self.schema.primary_key().len());
        for column in self.schema.primary_key() {
            match fields.get(column) {
                Some(value) if !value.is_null() => values.push(value.clone()),
                _ => {
                    return Err(DbError::ConstraintViolation(format!(
                        "Primary key column '{}' of '{}' must be set",
                        column,
                        self.schema.name()
                    )));
                }
            }
        }
        Ok(PrimaryKey::new(values))
    }

    /// Keys of the rows selected by `query`, in result order.
    fn select_keys(&self, query: &Query) -> Result<Vec<PrimaryKey>> {
        let mut selected = Vec::new();
        'rows: for (key, fields) in &self.rows {
            for filter in query.filters() {
                if !filter.matches(fields)? {
                    continue 'rows;
                }
            }
            selected.push((key, fields));
        }

        if !query.order_by().is_empty() {
            // stable sort keeps primary-key order between equal rows
            selected.sort_by(|(_, a), (_, b)| {
                for order in query.order_by() {
                    let left = a.get(&order.field).unwrap_or(&Value::Null);
                    let right = b.get(&order.field).unwrap_or(&Value::Null);
                    let ordering = left.compare(right).unwrap_or(Ordering::Equal);
                    let ordering = match order.direction {
                        Direction::Asc => ordering,
                        Direction::Desc => ordering.reverse(),
                    };
                    if ordering != Ordering::Equal {
                        return ordering;
                    }
                }
                Ordering::Equal
            });
        }

        Ok(selected
            .into_iter()
            .skip(query.first_result().unwrap_or(0))
            .take(query.max_results().unwrap_or(usize::MAX))
            .map(|(key, _)| key.clone())
            .collect())
    }
}

#[derive(Debug)]
enum EntryState {
    /// Persisted but not yet flushed
    New,
    /// Loaded or flushed; `original` is the last state known to storage
    Managed { original: Fields },
    /// Scheduled for deletion on the next flush
    Removed { original: Fields },
}

#[derive(Debug)]
struct ManagedEntry {
    entity: Entity,
    state: EntryState,
}

#[derive(Debug, Default)]
struct SessionState {
    tables: HashMap<TypeDescriptor, Table>,
    identity_map: HashMap<EntityIdentity, ManagedEntry>,
    pending_inserts: Vec<EntityIdentity>,
    pending_deletes: Vec<EntityIdentity>,
    stats: SessionStats,
}

impl SessionState {
    fn table(&self, type_descriptor: &TypeDescriptor) -> Result<&Table> {
        self.tables
            .get(type_descriptor)
            .ok_or_else(|| DbError::EntityTypeNotFound(type_descriptor.to_string()))
    }

    fn identity_of(&self, entity: &Entity) -> Result<EntityIdentity> {
        let type_descriptor = entity.type_descriptor();
        let primary_key = self.table(&type_descriptor)?.primary_key_of(&entity.fields())?;
        Ok(EntityIdentity {
            type_descriptor,
            primary_key,
        })
    }

    fn is_stored(&self, identity: &EntityIdentity) -> Result<bool> {
        Ok(self
            .table(&identity.type_descriptor)?
            .rows
            .contains_key(&identity.primary_key))
    }

    fn persist(&mut self, entity: &Entity) -> Result<()> {
        let identity = self.identity_of(entity)?;
        self.stats.persists += 1;

        if let Some(entry) = self.identity_map.get_mut(&identity) {
            if !entry.entity.same_instance(entity) {
                return Err(DbError::ConstraintViolation(format!(
                    "A different instance of {} is already managed",
                    identity
                )));
            }
            if let EntryState::Removed { original } = &mut entry.state {
                let original = std::mem::take(original);
                entry.state = EntryState::Managed { original };
                self.pending_deletes.retain(|pending| pending != &identity);
            }
            return Ok(());
        }

        if self.is_stored(&identity)? {
            return Err(DbError::DetachedEntity(identity.to_string()));
        }

        self.identity_map.insert(
            identity.clone(),
            ManagedEntry {
                entity: entity.clone(),
                state: EntryState::New,
            },
        );
        self.pending_inserts.push(identity);
        Ok(())
    }

    fn remove(&mut self, entity: &Entity) -> Result<()> {
        let identity = self.identity_of(entity)?;
        self.stats.removes += 1;

        let Some(entry) = self.identity_map.get_mut(&identity) else {
            if self.is_stored(&identity)? {
                return Err(DbError::DetachedEntity(identity.to_string()));
            }
            // never persisted: nothing to delete
            return Ok(());
        };

        if !entry.entity.same_instance(entity) {
            return Err(DbError::DetachedEntity(identity.to_string()));
        }

        let original = match &mut entry.state {
            EntryState::New => None,
            EntryState::Managed { original } => Some(std::mem::take(original)),
            EntryState::Removed { .. } => return Ok(()),
        };

        match original {
            Some(original) => {
                entry.state = EntryState::Removed { original };
                self.pending_deletes.push(identity);
            }
            None => {
                self.identity_map.remove(&identity);
                self.pending_inserts.retain(|pending| pending != &identity);
            }
        }
        Ok(())
    }

    fn collect_changes(&self) -> Vec<Change> {
        let mut changes = Vec::new();

        for identity in &self.pending_inserts {
            if let Some(entry) = self.identity_map.get(identity) {
                changes.push(Change::Insert {
                    identity: identity.clone(),
                    fields: entry.entity.fields(),
                });
            }
        }

        let mut updates: Vec<Change> = self
            .identity_map
            .iter()
            .filter_map(|(identity, entry)| match &entry.state {
                EntryState::Managed { original } => {
                    let current = entry.entity.fields();
                    (&current != original).then(|| Change::Update {
                        identity: identity.clone(),
                        old_fields: original.clone(),
                        new_fields: current,
                    })
                }
                _ => None,
            })
            .collect();
        updates.sort_by(|a, b| a.identity().cmp(b.identity()));
        changes.extend(updates);

        for identity in &self.pending_deletes {
            changes.push(Change::Delete {
                identity: identity.clone(),
            });
        }

        changes
    }

    fn validate_change(&self, change: &Change) -> Result<()> {
        let identity = change.identity();
        let table = self.table(&identity.type_descriptor)?;

        let fields = match change {
            Change::Insert { fields, .. } => {
                if table.rows.contains_key(&identity.primary_key) {
                    return Err(DbError::ConstraintViolation(format!(
                        "Duplicate primary key for {}",
                        identity
                    )));
                }
                fields
            }
            Change::Update { new_fields, .. } => new_fields,
            Change::Delete { .. } => return Ok(()),
        };

        table.schema.validate(fields)?;
        if table.primary_key_of(fields)? != identity.primary_key {
            return Err(DbError::ConstraintViolation(format!(
                "Primary key of managed entity {} cannot change",
                identity
            )));
        }
        Ok(())
    }

    fn apply_change(&mut self, change: &Change) {
        let identity = change.identity();
        let Some(table) = self.tables.get_mut(&identity.type_descriptor) else {
            return;
        };

        match change {
            Change::Insert { fields, .. } | Change::Update {
                new_fields: fields, ..
            } => {
                table.rows.insert(identity.primary_key.clone(), fields.clone());
                if let Some(entry) = self.identity_map.get_mut(identity) {
                    entry.state = EntryState::Managed {
                        original: fields.clone(),
                    };
                }
            }
            Change::Delete { .. } => {
                table.rows.remove(&identity.primary_key);
                self.identity_map.remove(identity);
            }
        }
    }

    fn flush(&mut self) -> Result<Vec<String>> {
        let changes = self.collect_changes();
        for change in &changes {
            self.validate_change(change)?;
        }
        for change in &changes {
            self.apply_change(change);
        }

        self.pending_inserts.clear();
        self.pending_deletes.clear();
        self.stats.flushes += 1;
        Ok(changes.iter().map(Change::to_statement).collect())
    }

    /// Returns the managed handle for a stored row, loading it if needed.
    fn manage_row(&mut self, identity: &EntityIdentity) -> Result<Option<Entity>> {
        if let Some(entry) = self.identity_map.get(identity) {
            return Ok(match entry.state {
                EntryState::Removed { .. } => None,
                _ => Some(entry.entity.clone()),
            });
        }

        let Some(fields) = self
            .table(&identity.type_descriptor)?
            .rows
            .get(&identity.primary_key)
            .cloned()
        else {
            return Ok(None);
        };

        let entity = Entity::from_fields(identity.type_descriptor.clone(), fields.clone());
        self.identity_map.insert(
            identity.clone(),
            ManagedEntry {
                entity: entity.clone(),
                state: EntryState::Managed { original: fields },
            },
        );
        Ok(Some(entity))
    }
}

struct SessionInner {
    state: Mutex<SessionState>,
    logger: Mutex<Option<SharedLogger>>,
}

/// In-process [`Session`] over typed, keyed tables.
///
/// Cloning is cheap and yields another handle to the same session.
///
/// # Examples
///
/// ```
/// use batchdb::{Column, DataType, Entity, EntitySchema, MemorySession, Session};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> batchdb::Result<()> {
/// let session = MemorySession::new();
/// session.register(EntitySchema::new(
///     "user",
///     vec![Column::new("id", DataType::Integer).not_null(), Column::new("name", DataType::Text)],
/// ))?;
///
/// session.persist(&Entity::new("user").with("id", 1).with("name", "alice")).await?;
/// session.flush().await?;
/// assert_eq!(session.row_count(&"user".into())?, 1);
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct MemorySession {
    inner: Arc<SessionInner>,
}

impl Default for MemorySession {
    fn default() -> Self {
        Self::new()
    }
}

impl MemorySession {
    /// Creates an empty session that logs statements through `tracing`.
    pub fn new() -> Self {
        let logger: SharedLogger = Arc::new(TracingLogger);
        Self {
            inner: Arc::new(SessionInner {
                state: Mutex::new(SessionState::default()),
                logger: Mutex::new(Some(logger)),
            }),
        }
    }

    /// Declares an entity type.
    pub fn register(&self, schema: EntitySchema) -> Result<()> {
        let type_descriptor = TypeDescriptor::new(schema.name());
        if schema.primary_key().is_empty() {
            return Err(DbError::ConstraintViolation(format!(
                "Entity type '{}' needs a primary key",
                type_descriptor
            )));
        }
        for column in schema.primary_key() {
            if !schema.has_column(column) {
                return Err(DbError::ColumnNotFound(column.clone(), type_descriptor.to_string()));
            }
        }

        let mut state = self.state()?;
        if state.tables.contains_key(&type_descriptor) {
            return Err(DbError::ExecutionError(format!(
                "Entity type '{}' already registered",
                type_descriptor
            )));
        }
        state.tables.insert(
            type_descriptor,
            Table {
                schema,
                rows: BTreeMap::new(),
            },
        );
        Ok(())
    }

    /// Number of committed rows of a type.
    pub fn row_count(&self, type_descriptor: &TypeDescriptor) -> Result<usize> {
        Ok(self.state()?.table(type_descriptor)?.rows.len())
    }

    /// Committed fields of a row, bypassing the identity map.
    pub fn stored_fields(&self, identity: &EntityIdentity) -> Result<Option<Fields>> {
        Ok(self
            .state()?
            .table(&identity.type_descriptor)?
            .rows
            .get(&identity.primary_key)
            .cloned())
    }

    /// Whether this exact handle is tracked by the identity map.
    pub fn is_managed(&self, entity: &Entity) -> bool {
        let Ok(state) = self.state() else {
            return false;
        };
        state
            .identity_of(entity)
            .ok()
            .and_then(|identity| state.identity_map.get(&identity))
            .is_some_and(|entry| entry.entity.same_instance(entity))
    }

    pub fn managed_count(&self) -> usize {
        self.state().map(|state| state.identity_map.len()).unwrap_or_default()
    }

    /// Number of inserts and deletes waiting for the next flush.
    pub fn pending_count(&self) -> usize {
        self.state()
            .map(|state| state.pending_inserts.len() + state.pending_deletes.len())
            .unwrap_or_default()
    }

    pub fn stats(&self) -> SessionStats {
        self.state()
            .map(|state| SessionStats {
                managed: state.identity_map.len(),
                ..state.stats
            })
            .unwrap_or_default()
    }

    pub fn diagnostic_logger(&self) -> Option<SharedLogger> {
        self.inner
            .logger
            .lock()
            .map(|logger| logger.clone())
            .unwrap_or_default()
    }

    /// Reports a statement to the current logger and counts it.
    pub fn log_statement(&self, statement: &str) {
        self.emit(vec![statement.to_string()]);
    }

    fn emit(&self, statements: Vec<String>) {
        if statements.is_empty() {
            return;
        }
        if let Ok(mut state) = self.state() {
            state.stats.statements += statements.len() as u64;
        }
        // the logger runs outside the state lock
        if let Some(logger) = self.diagnostic_logger() {
            for statement in &statements {
                logger.log_statement(statement);
            }
        }
    }

    fn state(&self) -> Result<MutexGuard<'_, SessionState>> {
        Ok(self.inner.state.lock()?)
    }

    fn load_row(
        &self,
        identity: &EntityIdentity,
        extra_select: &[String],
    ) -> Result<Option<StreamRow<Entity>>> {
        let mut state = self.state()?;
        let Some(entity) = state.manage_row(identity)? else {
            return Ok(None);
        };
        let aux = extra_select
            .iter()
            .map(|column| entity.get(column).unwrap_or(Value::Null))
            .collect();
        Ok(Some((entity, aux)))
    }
}

#[async_trait]
impl Session for MemorySession {
    type Object = Entity;

    async fn persist(&self, object: &Entity) -> Result<()> {
        self.state()?.persist(object)
    }

    async fn remove(&self, object: &Entity) -> Result<()> {
        self.state()?.remove(object)
    }

    async fn flush(&self) -> Result<()> {
        let statements = self.state()?.flush()?;
        self.emit(statements);
        Ok(())
    }

    async fn clear(&self) -> Result<()> {
        let mut state = self.state()?;
        state.identity_map.clear();
        state.pending_inserts.clear();
        state.pending_deletes.clear();
        state.stats.clears += 1;
        Ok(())
    }

    async fn find(
        &self,
        type_descriptor: &TypeDescriptor,
        primary_key: &PrimaryKey,
    ) -> Result<Option<Entity>> {
        let identity = EntityIdentity {
            type_descriptor: type_descriptor.clone(),
            primary_key: primary_key.clone(),
        };

        let (found, from_storage) = {
            let mut state = self.state()?;
            state.stats.finds += 1;
            let from_storage = !state.identity_map.contains_key(&identity);
            (state.manage_row(&identity)?, from_storage)
        };

        if from_storage {
            self.log_statement(&format!(
                "SELECT this FROM {} this WHERE key = {}",
                type_descriptor, primary_key
            ));
        }
        Ok(found)
    }

    fn class_identity(&self, object: &Entity) -> Result<EntityIdentity> {
        self.state()?.identity_of(object)
    }

    fn set_diagnostic_logger(&self, logger: Option<SharedLogger>) -> Option<SharedLogger> {
        let mut current = self
            .inner
            .logger
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        std::mem::replace(&mut *current, logger)
    }

    fn apply_criteria(&self, builder: QueryBuilder, criteria: &Criteria) -> Result<QueryBuilder> {
        let root = builder.root().cloned().ok_or_else(|| {
            DbError::CriteriaTranslation("query builder has no root entity".to_string())
        })?;

        let state = self.state()?;
        let table = state
            .table(&root)
            .map_err(|err| DbError::CriteriaTranslation(err.to_string()))?;

        for field in criteria.referenced_fields() {
            if !table.schema.has_column(field) {
                return Err(DbError::CriteriaTranslation(format!(
                    "Unknown field '{}' on entity '{}'",
                    field, root
                )));
            }
        }

        for filter in criteria.filters() {
            let Some(column) = table.schema.get_column(filter.field()) else {
                continue;
            };
            if let Some(bad) = filter
                .operands()
                .into_iter()
                .find(|operand| !column.data_type.is_compatible(operand))
            {
                return Err(DbError::CriteriaTranslation(format!(
                    "Field '{}' of '{}' is {}, criteria compares it with {}",
                    column.name,
                    root,
                    column.data_type,
                    bad.type_name()
                )));
            }
        }

        Ok(builder.merge_criteria(criteria))
    }

    async fn stream(&self, query: &Query) -> Result<StreamingResult<Entity>> {
        let keys = {
            let state = self.state()?;
            let table = state.table(query.root())?;
            for column in query.extra_select() {
                if !table.schema.has_column(column) {
                    return Err(DbError::ColumnNotFound(column.clone(), query.root().to_string()));
                }
            }
            table.select_keys(query)?
        };
        self.log_statement(&query.to_string());

        let session = self.clone();
        let root = query.root().clone();
        let extra_select = query.extra_select().to_vec();

        // rows are loaded into the identity map one poll at a time; rows
        // deleted after the key scan are skipped
        let rows = stream::iter(keys).filter_map(move |primary_key| {
            let identity = EntityIdentity {
                type_descriptor: root.clone(),
                primary_key,
            };
            future::ready(session.load_row(&identity, &extra_select).transpose())
        });

        Ok(StreamingResult::new(rows))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{Column, DataType};
    use crate::query::Comparison;
    use futures::TryStreamExt;

    fn session() -> MemorySession {
        let session = MemorySession::new();
        session
            .register(EntitySchema::new(
                "item",
                vec![
                    Column::new("id", DataType::Integer).not_null(),
                    Column::new("name", DataType::Text),
                    Column::new("score", DataType::Integer),
                ],
            ))
            .unwrap();
        session
    }

    fn item(id: i64, score: i64) -> Entity {
        Entity::new("item")
            .with("id", id)
            .with("name", format!("item-{}", id))
            .with("score", score)
    }

    async fn seed(session: &MemorySession, count: i64) {
        for id in 1..=count {
            session.persist(&item(id, id * 10)).await.unwrap();
        }
        session.flush().await.unwrap();
        session.clear().await.unwrap();
    }

    #[tokio::test]
    async fn test_persist_is_buffered_until_flush() {
        let session = session();
        session.persist(&item(1, 10)).await.unwrap();

        assert_eq!(session.row_count(&"item".into()).unwrap(), 0);
        assert_eq!(session.pending_count(), 1);

        session.flush().await.unwrap();
        assert_eq!(session.row_count(&"item".into()).unwrap(), 1);
        assert_eq!(session.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_clear_discards_pending_and_detaches() {
        let session = session();
        let entity = item(1, 10);
        session.persist(&entity).await.unwrap();
        session.flush().await.unwrap();
        assert!(session.is_managed(&entity));

        session.clear().await.unwrap();
        assert!(!session.is_managed(&entity));
        assert_eq!(session.managed_count(), 0);

        let err = session.remove(&entity).await.unwrap_err();
        assert!(matches!(err, DbError::DetachedEntity(_)));
        let err = session.persist(&entity).await.unwrap_err();
        assert!(matches!(err, DbError::DetachedEntity(_)));
    }

    #[tokio::test]
    async fn test_find_returns_identity_mapped_instance() {
        let session = session();
        seed(&session, 2).await;

        let first = session.find(&"item".into(), &1.into()).await.unwrap().unwrap();
        let again = session.find(&"item".into(), &1.into()).await.unwrap().unwrap();
        assert!(first.same_instance(&again));

        assert!(session.find(&"item".into(), &99.into()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_flush_writes_dirty_managed_entities() {
        let session = session();
        seed(&session, 1).await;

        let entity = session.find(&"item".into(), &1.into()).await.unwrap().unwrap();
        entity.set("score", 99);
        session.flush().await.unwrap();

        let stored = session
            .stored_fields(&EntityIdentity::new("item", 1))
            .unwrap()
            .unwrap();
        assert_eq!(stored.get("score"), Some(&Value::from(99)));
    }

    #[tokio::test]
    async fn test_flush_rejects_invalid_rows_without_partial_writes() {
        let session = session();
        session.persist(&item(1, 10)).await.unwrap();
        session
            .persist(&item(2, 20).with("score", "not a number"))
            .await
            .unwrap();

        let err = session.flush().await.unwrap_err();
        assert!(matches!(err, DbError::TypeMismatch(_)));
        assert_eq!(session.row_count(&"item".into()).unwrap(), 0);
    }

    #[tokio::test]
    async fn test_remove_new_entity_unschedules_insert() {
        let session = session();
        let entity = item(1, 10);
        session.persist(&entity).await.unwrap();
        session.remove(&entity).await.unwrap();
        session.flush().await.unwrap();

        assert_eq!(session.row_count(&"item".into()).unwrap(), 0);
    }

    #[tokio::test]
    async fn test_stream_applies_criteria_and_aux_columns() {
        let session = session();
        seed(&session, 5).await;

        let criteria = Criteria::new()
            .where_cmp("score", Comparison::Gte, 20)
            .order_by("score", Direction::Desc)
            .max_results(3);
        let builder = session
            .create_query_builder()
            .select_from("item")
            .add_select("name");
        let query = session
            .apply_criteria(builder, &criteria)
            .unwrap()
            .get_query()
            .unwrap();

        let rows: Vec<StreamRow<Entity>> = session
            .stream(&query)
            .await
            .unwrap()
            .try_collect()
            .await
            .unwrap();
        let ids: Vec<Value> = rows.iter().filter_map(|(e, _)| e.get("id")).collect();
        assert_eq!(ids, vec![Value::from(5), Value::from(4), Value::from(3)]);
        assert_eq!(rows[0].1, vec![Value::from("item-5")]);
        assert!(rows.iter().all(|(e, _)| session.is_managed(e)));
    }

    #[tokio::test]
    async fn test_apply_criteria_rejects_unknown_fields_and_bad_literals() {
        let session = session();
        let builder = session.create_query_builder().select_from("item");

        let err = session
            .apply_criteria(builder.clone(), &Criteria::new().where_eq("color", "red"))
            .unwrap_err();
        assert!(matches!(err, DbError::CriteriaTranslation(_)));

        let err = session
            .apply_criteria(builder, &Criteria::new().where_eq("score", "high"))
            .unwrap_err();
        assert!(matches!(err, DbError::CriteriaTranslation(_)));
    }

    #[tokio::test]
    async fn test_statements_reach_logger() {
        let session = session();
        let logger = Arc::new(crate::session::MemoryLogger::new());
        session.set_diagnostic_logger(Some(logger.clone() as SharedLogger));

        session.persist(&item(1, 10)).await.unwrap();
        session.flush().await.unwrap();

        assert_eq!(
            logger.statements(),
            vec!["INSERT INTO item (id, name, score) VALUES (1, 'item-1', 10)".to_string()]
        );
        assert_eq!(session.stats().statements, 1);
    }
}
