use super::{
    BatchConfig, BatchCursor, BatchInput, BatchOptions, BatchSource, IterableResult,
    SharedReferenceBag, batch_options, merge_options,
};
use crate::core::{DbError, Result};
use crate::query::{Criteria, Query, QueryBuilder};
use crate::session::{Session, TypeDescriptor};
use serde_json::json;
use std::fmt;
use std::sync::Arc;
use tracing::{Instrument, Level, event, info_span};

/// Entry point for batch operations against one session.
///
/// Every call builds a fresh [`BatchCursor`]; the coordinator itself keeps no
/// per-run state, so one instance can serve any number of sequential runs.
pub struct BatchCoordinator<S: Session> {
    session: Arc<S>,
    bag: Option<SharedReferenceBag<S>>,
}

impl<S: Session> BatchCoordinator<S> {
    pub fn new(session: Arc<S>) -> Self {
        Self { session, bag: None }
    }

    /// Attaches `bag` to every cursor this coordinator builds.
    pub fn with_reference_bag(mut self, bag: SharedReferenceBag<S>) -> Self {
        self.bag = Some(bag);
        self
    }

    pub fn session(&self) -> &Arc<S> {
        &self.session
    }

    pub fn reference_bag(&self) -> Option<&SharedReferenceBag<S>> {
        self.bag.as_ref()
    }

    /// Wraps `source` in a cursor without draining it.
    pub fn cursor(
        &self,
        source: impl Into<BatchInput<S>>,
        options: &BatchOptions,
    ) -> Result<BatchCursor<S>> {
        let config = BatchConfig::from_options(options);
        let source = self.coerce(source.into(), &config)?;

        let mut cursor = BatchCursor::new(self.session.clone(), source, config);
        cursor.set_reference_bag(self.bag.clone());
        Ok(cursor)
    }

    /// Persists every object of `source`, returning how many were handled.
    ///
    /// Auto flush is always on here: objects persisted but never flushed are
    /// dropped by the next clear.
    pub async fn persist(
        &self,
        source: impl Into<BatchInput<S>>,
        options: &BatchOptions,
    ) -> Result<usize> {
        let mut cursor = self.cursor(source, &force_flush(options))?;
        let span = info_span!("batch_persist", batch_size = cursor.config().size);

        let session = self.session.clone();
        async move {
            let mut count = 0;
            while let Some((_index, object)) = cursor.next().await? {
                session.persist(&object).await?;
                count += 1;
            }
            event!(Level::INFO, count, "batch persist finished");
            Ok::<_, DbError>(count)
        }
        .instrument(span)
        .await
    }

    /// Removes every object of `source`, returning how many were handled.
    pub async fn remove(
        &self,
        source: impl Into<BatchInput<S>>,
        options: &BatchOptions,
    ) -> Result<usize> {
        let mut cursor = self.cursor(source, &force_flush(options))?;
        let span = info_span!("batch_remove", batch_size = cursor.config().size);

        let session = self.session.clone();
        async move {
            let mut count = 0;
            while let Some((_index, object)) = cursor.next().await? {
                session.remove(&object).await?;
                count += 1;
            }
            event!(Level::INFO, count, "batch remove finished");
            Ok::<_, DbError>(count)
        }
        .instrument(span)
        .await
    }

    /// Runs a query or query builder through a batch cursor.
    ///
    /// Fails with [`DbError::InvalidInput`] for any other input.
    pub fn iterate(
        &self,
        query: impl Into<BatchInput<S>>,
        options: &BatchOptions,
    ) -> Result<IterableResult<S>> {
        let config = BatchConfig::from_options(options);
        match query.into() {
            BatchInput::Query(query) => Ok(self.iterable(query, config)),
            BatchInput::Builder(builder) => Ok(self.iterable(builder.get_query()?, config)),
            _ => Err(DbError::invalid_input("query", "a query or query builder")),
        }
    }

    /// Iterates every `type_descriptor` object matching `criteria`.
    pub fn iterate_by(
        &self,
        type_descriptor: impl Into<TypeDescriptor>,
        criteria: &Criteria,
        options: &BatchOptions,
    ) -> Result<IterableResult<S>> {
        let builder = self.criteria_query(type_descriptor.into(), criteria)?;
        self.iterate(builder, options)
    }

    /// Removes every `type_descriptor` object matching `criteria`.
    ///
    /// Criteria are translated before the session sees any write.
    pub async fn remove_by(
        &self,
        type_descriptor: impl Into<TypeDescriptor>,
        criteria: &Criteria,
        options: &BatchOptions,
    ) -> Result<usize> {
        let matching = self.iterate_by(type_descriptor, criteria, options)?;
        self.remove(matching, options).await
    }

    fn criteria_query(
        &self,
        type_descriptor: TypeDescriptor,
        criteria: &Criteria,
    ) -> Result<QueryBuilder> {
        let builder = self.session.create_query_builder().select_from(type_descriptor);
        self.session
            .apply_criteria(builder, criteria)
            .map_err(|err| {
                let reason = match err {
                    DbError::CriteriaTranslation(reason) => reason,
                    other => other.to_string(),
                };
                DbError::CriteriaTranslation(format!(
                    "failed to add criteria for batch iteration - {}",
                    reason
                ))
            })
    }

    fn iterable(&self, query: Query, config: BatchConfig) -> IterableResult<S> {
        let mut result = IterableResult::new(self.session.clone(), query, config);
        result.set_reference_bag(self.bag.clone());
        result
    }

    fn coerce(&self, input: BatchInput<S>, config: &BatchConfig) -> Result<BatchSource<S>> {
        match input {
            BatchInput::Objects(objects) => Ok(BatchSource::from_iter(objects)),
            BatchInput::Stream(objects) => Ok(BatchSource::Stream(objects)),
            BatchInput::Result(result) => Ok(result.into()),
            BatchInput::Query(query) => Ok(self.iterable(query, config.clone()).into()),
            BatchInput::Builder(builder) => {
                Ok(self.iterable(builder.get_query()?, config.clone()).into())
            }
            BatchInput::Scalar(_) => Err(DbError::invalid_input(
                "source",
                "a query, query builder or iterable of entities",
            )),
        }
    }
}

fn force_flush(options: &BatchOptions) -> BatchOptions {
    merge_options(options, batch_options(json!({ "flush_auto": true })))
}

impl<S: Session> Clone for BatchCoordinator<S> {
    fn clone(&self) -> Self {
        Self {
            session: self.session.clone(),
            bag: self.bag.clone(),
        }
    }
}

impl<S: Session> fmt::Debug for BatchCoordinator<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BatchCoordinator")
            .field("reference_bag", &self.bag.is_some())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{Column, DataType, EntitySchema, Value};
    use crate::query::Comparison;
    use crate::session::{Entity, MemorySession};

    fn coordinator() -> BatchCoordinator<MemorySession> {
        let session = Arc::new(MemorySession::new());
        session
            .register(EntitySchema::new(
                "item",
                vec![
                    Column::new("id", DataType::Integer).not_null(),
                    Column::new("score", DataType::Integer),
                ],
            ))
            .unwrap();
        BatchCoordinator::new(session)
    }

    fn items(ids: std::ops::RangeInclusive<i64>) -> Vec<Entity> {
        ids.map(|id| Entity::new("item").with("id", id).with("score", id * 10))
            .collect()
    }

    #[tokio::test]
    async fn test_persist_counts_and_stores_everything() {
        let coordinator = coordinator();
        let options = batch_options(json!({ "batch_size": 2 }));

        let count = coordinator.persist(items(1..=5), &options).await.unwrap();

        assert_eq!(count, 5);
        let session = coordinator.session();
        assert_eq!(session.row_count(&"item".into()).unwrap(), 5);
        assert_eq!(session.stats().flushes, 3);
        assert_eq!(session.stats().clears, 3);
    }

    #[tokio::test]
    async fn test_persist_forces_flush_auto() {
        let coordinator = coordinator();
        let options = batch_options(json!({ "flush_auto": false, "clear_auto": false }));

        coordinator.persist(items(1..=3), &options).await.unwrap();

        assert_eq!(coordinator.session().row_count(&"item".into()).unwrap(), 3);
        assert_eq!(coordinator.session().stats().clears, 0);
    }

    #[tokio::test]
    async fn test_scalar_source_is_rejected_before_session_use() {
        let coordinator = coordinator();

        let err = coordinator
            .persist(42_i64, &BatchOptions::new())
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            DbError::InvalidInput { argument: "source", .. }
        ));
        assert_eq!(coordinator.session().stats().persists, 0);
        assert_eq!(coordinator.session().stats().flushes, 0);
    }

    #[tokio::test]
    async fn test_iterate_requires_a_query() {
        let coordinator = coordinator();

        let err = coordinator
            .iterate(items(1..=2), &BatchOptions::new())
            .unwrap_err();
        assert!(matches!(err, DbError::InvalidInput { argument: "query", .. }));

        let err = coordinator
            .iterate(Value::from("SELECT 1"), &BatchOptions::new())
            .unwrap_err();
        assert!(matches!(err, DbError::InvalidInput { argument: "query", .. }));
    }

    #[tokio::test]
    async fn test_iterate_by_filters_with_criteria() {
        let coordinator = coordinator();
        coordinator
            .persist(items(1..=6), &BatchOptions::new())
            .await
            .unwrap();

        let criteria = Criteria::new().where_cmp("score", Comparison::Gt, 30);
        let mut result = coordinator
            .iterate_by("item", &criteria, &BatchOptions::new())
            .unwrap();

        let mut ids = Vec::new();
        while let Some(item) = result.next().await.unwrap() {
            ids.push(item.get("id"));
        }
        assert_eq!(ids, vec![Some(4.into()), Some(5.into()), Some(6.into())]);
    }

    #[tokio::test]
    async fn test_remove_by_deletes_matching_rows() {
        let coordinator = coordinator();
        coordinator
            .persist(items(1..=10), &BatchOptions::new())
            .await
            .unwrap();

        let criteria = Criteria::new().where_cmp("score", Comparison::Lte, 50);
        let removed = coordinator
            .remove_by("item", &criteria, &batch_options(json!({ "batch_size": 2 })))
            .await
            .unwrap();

        assert_eq!(removed, 5);
        assert_eq!(coordinator.session().row_count(&"item".into()).unwrap(), 5);
    }

    #[tokio::test]
    async fn test_remove_by_wraps_translation_errors() {
        let coordinator = coordinator();
        coordinator
            .persist(items(1..=3), &BatchOptions::new())
            .await
            .unwrap();
        let removes = coordinator.session().stats().removes;

        let criteria = Criteria::new().where_eq("colour", "red");
        let err = coordinator
            .remove_by("item", &criteria, &BatchOptions::new())
            .await
            .unwrap_err();

        match err {
            DbError::CriteriaTranslation(message) => {
                assert!(message.starts_with("failed to add criteria for batch iteration"));
                assert!(message.contains("colour"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(coordinator.session().stats().removes, removes);
    }

    #[tokio::test]
    async fn test_query_source_is_drained_through_nested_result() {
        let coordinator = coordinator();
        coordinator
            .persist(items(1..=4), &BatchOptions::new())
            .await
            .unwrap();
        let before = coordinator.session().stats();

        let query: Query = QueryBuilder::new().select_from("item").get_query().unwrap();
        let removed = coordinator
            .remove(query, &batch_options(json!({ "batch_size": 2 })))
            .await
            .unwrap();

        assert_eq!(removed, 4);
        let after = coordinator.session().stats();
        // only the outer cursor synchronizes
        assert_eq!(after.flushes - before.flushes, 3);
        assert_eq!(after.clears - before.clears, 3);
        assert_eq!(coordinator.session().row_count(&"item".into()).unwrap(), 0);
    }
}
