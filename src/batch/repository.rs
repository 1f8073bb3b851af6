use super::{BatchCoordinator, BatchInput, BatchOptions, IterableResult};
use crate::core::Result;
use crate::query::Criteria;
use crate::session::{Session, TypeDescriptor};
use std::sync::{Arc, OnceLock};

/// Batch operations bound to one entity type.
///
/// Meant to be held as a field by an application repository; the coordinator
/// is built on first use and reused afterwards.
///
/// # Examples
///
/// ```
/// use batchdb::{BatchOptions, BatchRepository, Column, Criteria, DataType, Entity, EntitySchema, MemorySession};
/// use std::sync::Arc;
///
/// # tokio_test::block_on(async {
/// let session = Arc::new(MemorySession::new());
/// session.register(EntitySchema::new("user", vec![
///     Column::new("id", DataType::Integer),
///     Column::new("active", DataType::Boolean),
/// ])).unwrap();
///
/// let users = BatchRepository::new(session.clone(), "user");
/// let batch: Vec<Entity> = (1..=4)
///     .map(|id| Entity::new("user").with("id", id).with("active", id % 2 == 0))
///     .collect();
/// users.coordinator().persist(batch, &BatchOptions::new()).await.unwrap();
///
/// let removed = users
///     .remove_by(&Criteria::new().where_eq("active", false), &BatchOptions::new())
///     .await
///     .unwrap();
/// assert_eq!(removed, 2);
/// # });
/// ```
pub struct BatchRepository<S: Session> {
    session: Arc<S>,
    entity_type: TypeDescriptor,
    coordinator: OnceLock<BatchCoordinator<S>>,
}

impl<S: Session> BatchRepository<S> {
    pub fn new(session: Arc<S>, entity_type: impl Into<TypeDescriptor>) -> Self {
        Self {
            session,
            entity_type: entity_type.into(),
            coordinator: OnceLock::new(),
        }
    }

    pub fn entity_type(&self) -> &TypeDescriptor {
        &self.entity_type
    }

    pub fn coordinator(&self) -> &BatchCoordinator<S> {
        self.coordinator
            .get_or_init(|| BatchCoordinator::new(self.session.clone()))
    }

    pub fn iterate_by(
        &self,
        criteria: &Criteria,
        options: &BatchOptions,
    ) -> Result<IterableResult<S>> {
        self.coordinator()
            .iterate_by(self.entity_type.clone(), criteria, options)
    }

    pub async fn remove_by(&self, criteria: &Criteria, options: &BatchOptions) -> Result<usize> {
        self.coordinator()
            .remove_by(self.entity_type.clone(), criteria, options)
            .await
    }

    /// Same as [`BatchRepository::remove_by`].
    pub async fn delete_by(&self, criteria: &Criteria, options: &BatchOptions) -> Result<usize> {
        self.remove_by(criteria, options).await
    }

    pub fn iterate(
        &self,
        query: impl Into<BatchInput<S>>,
        options: &BatchOptions,
    ) -> Result<IterableResult<S>> {
        self.coordinator().iterate(query, options)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{Column, DataType, DbError, EntitySchema};
    use crate::query::{Direction, QueryBuilder};
    use crate::session::{Entity, MemorySession};

    async fn repository() -> BatchRepository<MemorySession> {
        let session = Arc::new(MemorySession::new());
        session
            .register(EntitySchema::new(
                "order",
                vec![
                    Column::new("id", DataType::Integer).not_null(),
                    Column::new("status", DataType::Text),
                ],
            ))
            .unwrap();

        let orders: Vec<Entity> = (1..=6)
            .map(|id| {
                let status = if id <= 2 { "open" } else { "shipped" };
                Entity::new("order").with("id", id).with("status", status)
            })
            .collect();

        let repository = BatchRepository::new(session, "order");
        repository
            .coordinator()
            .persist(orders, &BatchOptions::new())
            .await
            .unwrap();
        repository
    }

    #[tokio::test]
    async fn test_coordinator_is_built_once() {
        let repository = repository().await;
        assert!(std::ptr::eq(repository.coordinator(), repository.coordinator()));
    }

    #[tokio::test]
    async fn test_iterate_by_is_bound_to_entity_type() {
        let repository = repository().await;
        let criteria = Criteria::new()
            .where_eq("status", "shipped")
            .order_by("id", Direction::Desc)
            .max_results(2);

        let mut result = repository.iterate_by(&criteria, &BatchOptions::new()).unwrap();
        let mut ids = Vec::new();
        while let Some(order) = result.next().await.unwrap() {
            ids.push(order.get("id"));
        }

        assert_eq!(ids, vec![Some(6.into()), Some(5.into())]);
    }

    #[tokio::test]
    async fn test_delete_by_matches_remove_by() {
        let repository = repository().await;

        let removed = repository
            .delete_by(&Criteria::new().where_eq("status", "open"), &BatchOptions::new())
            .await
            .unwrap();

        assert_eq!(removed, 2);
        assert_eq!(repository.session.row_count(repository.entity_type()).unwrap(), 4);
    }

    #[tokio::test]
    async fn test_iterate_accepts_builder() {
        let repository = repository().await;
        let builder = QueryBuilder::new().select_from("order");

        let mut result = repository.iterate(builder, &BatchOptions::new()).unwrap();
        let mut count = 0;
        while result.next().await.unwrap().is_some() {
            count += 1;
        }
        assert_eq!(count, 6);

        let err = repository.iterate(7_i64, &BatchOptions::new()).unwrap_err();
        assert!(matches!(err, DbError::InvalidInput { .. }));
    }
}
