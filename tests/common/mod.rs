// Shared fixtures for the batch integration tests
//
// `RecordingSession` wraps a `MemorySession` and records every call the batch
// layer makes, so tests can assert on the exact interleaving of persist /
// remove / flush / clear.

#![allow(dead_code)]

use async_trait::async_trait;
use batchdb::{
    Column, Criteria, DataType, DbError, Entity, EntityIdentity, EntitySchema, MemorySession,
    PrimaryKey, Query, QueryBuilder, Result, Session, SharedLogger, StreamingResult,
    TypeDescriptor,
};
use std::sync::Mutex;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Op {
    Persist(i64),
    Remove(i64),
    Flush,
    Clear,
    Find(i64),
}

pub struct RecordingSession {
    inner: MemorySession,
    ops: Mutex<Vec<Op>>,
    failing_flush: Mutex<Option<usize>>,
}

impl RecordingSession {
    pub fn new() -> Self {
        let inner = MemorySession::new();
        inner
            .register(EntitySchema::new(
                "item",
                vec![
                    Column::new("id", DataType::Integer).not_null(),
                    Column::new("score", DataType::Integer),
                ],
            ))
            .unwrap();
        Self {
            inner,
            ops: Mutex::new(Vec::new()),
            failing_flush: Mutex::new(None),
        }
    }

    pub fn inner(&self) -> &MemorySession {
        &self.inner
    }

    /// Makes the `nth` flush from now on (1-based) fail.
    pub fn fail_flush(&self, nth: usize) {
        *self.failing_flush.lock().unwrap() = Some(nth);
    }

    pub fn ops(&self) -> Vec<Op> {
        self.ops.lock().unwrap().clone()
    }

    pub fn reset_ops(&self) {
        self.ops.lock().unwrap().clear();
    }

    pub fn count(&self, op: &Op) -> usize {
        self.ops().iter().filter(|recorded| *recorded == op).count()
    }

    /// Stores `ids` directly, leaving the identity map empty and no ops recorded.
    pub async fn seed(&self, ids: impl IntoIterator<Item = i64>) {
        for entity in items(ids) {
            self.inner.persist(&entity).await.unwrap();
        }
        self.inner.flush().await.unwrap();
        self.inner.clear().await.unwrap();
    }

    fn record(&self, op: Op) {
        self.ops.lock().unwrap().push(op);
    }
}

pub fn item(id: i64) -> Entity {
    Entity::new("item").with("id", id).with("score", id * 10)
}

pub fn items(ids: impl IntoIterator<Item = i64>) -> Vec<Entity> {
    ids.into_iter().map(item).collect()
}

fn id_of(entity: &Entity) -> i64 {
    entity.get("id").and_then(|id| id.as_i64()).unwrap_or(-1)
}

#[async_trait]
impl Session for RecordingSession {
    type Object = Entity;

    async fn persist(&self, object: &Entity) -> Result<()> {
        self.record(Op::Persist(id_of(object)));
        self.inner.persist(object).await
    }

    async fn remove(&self, object: &Entity) -> Result<()> {
        self.record(Op::Remove(id_of(object)));
        self.inner.remove(object).await
    }

    async fn flush(&self) -> Result<()> {
        self.record(Op::Flush);
        let fail = {
            let mut failing = self.failing_flush.lock().unwrap();
            match *failing {
                Some(1) => {
                    *failing = None;
                    true
                }
                Some(remaining) => {
                    *failing = Some(remaining - 1);
                    false
                }
                None => false,
            }
        };
        if fail {
            return Err(DbError::ExecutionError("injected flush failure".to_string()));
        }
        self.inner.flush().await
    }

    async fn clear(&self) -> Result<()> {
        self.record(Op::Clear);
        self.inner.clear().await
    }

    async fn find(
        &self,
        type_descriptor: &TypeDescriptor,
        primary_key: &PrimaryKey,
    ) -> Result<Option<Entity>> {
        let id = primary_key
            .values()
            .first()
            .and_then(|value| value.as_i64())
            .unwrap_or(-1);
        self.record(Op::Find(id));
        self.inner.find(type_descriptor, primary_key).await
    }

    fn class_identity(&self, object: &Entity) -> Result<EntityIdentity> {
        self.inner.class_identity(object)
    }

    fn set_diagnostic_logger(&self, logger: Option<SharedLogger>) -> Option<SharedLogger> {
        self.inner.set_diagnostic_logger(logger)
    }

    fn create_query_builder(&self) -> QueryBuilder {
        self.inner.create_query_builder()
    }

    fn apply_criteria(&self, builder: QueryBuilder, criteria: &Criteria) -> Result<QueryBuilder> {
        self.inner.apply_criteria(builder, criteria)
    }

    async fn stream(&self, query: &Query) -> Result<StreamingResult<Entity>> {
        self.inner.stream(query).await
    }
}
