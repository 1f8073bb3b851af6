/// Reference bag tests
///
/// Pinned objects across identity-map purges driven by batch cursors.
/// Run with: cargo test --test reference_bag_tests

mod common;

use batchdb::{
    BatchCoordinator, BatchOptions, BatchRepository, Column, Criteria, DataType, DbError,
    EntityIdentity, EntitySchema, MemorySession, QueryBuilder, ReferenceBag, Session,
    batch_options,
};
use common::{Op, RecordingSession, item, items};
use futures::TryStreamExt;
use serde_json::json;
use std::sync::Arc;
use tokio_test::{assert_err, assert_ok};

#[tokio::test]
async fn test_pinned_object_stays_managed_across_batches() {
    let session = Arc::new(RecordingSession::new());
    session.seed([100]).await;

    let owner = assert_ok!(session.find(&"item".into(), &100.into()).await).unwrap();
    let bag = ReferenceBag::shared(session.clone());
    assert_ok!(bag.lock().await.set("owner", owner.clone()));

    let coordinator = BatchCoordinator::new(session.clone()).with_reference_bag(bag.clone());
    let mut cursor = assert_ok!(
        coordinator.cursor(items(1..=6), &batch_options(json!({ "batch_size": 2 })))
    );

    let mut owners = Vec::new();
    while let Some((_, entity)) = assert_ok!(cursor.next().await) {
        let current = assert_ok!(bag.lock().await.get("owner")).unwrap();
        assert!(session.inner().is_managed(&current));
        owners.push(current);
        assert_ok!(session.persist(&entity).await);
    }

    // one reload per clear: after items 2, 4, 6 and the final one
    assert_eq!(session.count(&Op::Find(100)), 1 + 4);
    assert!(owners[0].same_instance(&owner));
    assert!(!owners[2].same_instance(&owner));
    assert!(owners[2].same_instance(&owners[3]));

    let reloaded = assert_ok!(bag.lock().await.get("owner")).unwrap();
    assert_eq!(
        assert_ok!(session.class_identity(&reloaded)),
        EntityIdentity::new("item", 100)
    );
}

#[tokio::test]
async fn test_bag_is_not_reloaded_without_clear() {
    let session = Arc::new(RecordingSession::new());
    session.seed([100]).await;
    let owner = assert_ok!(session.find(&"item".into(), &100.into()).await).unwrap();

    let bag = ReferenceBag::shared(session.clone());
    assert_ok!(bag.lock().await.set("owner", owner.clone()));

    let coordinator = BatchCoordinator::new(session.clone()).with_reference_bag(bag.clone());
    assert_ok!(
        coordinator
            .persist(items(1..=4), &batch_options(json!({ "batch_size": 2, "clear_auto": false })))
            .await
    );

    assert_eq!(session.count(&Op::Find(100)), 1);
    assert!(assert_ok!(bag.lock().await.get("owner")).unwrap().same_instance(&owner));
}

#[tokio::test]
async fn test_removed_pinned_entity_becomes_placeholder() {
    let session = Arc::new(RecordingSession::new());
    session.seed(1..=4).await;

    let doomed = assert_ok!(session.find(&"item".into(), &1.into()).await).unwrap();
    let bag = ReferenceBag::shared(session.clone());
    assert_ok!(bag.lock().await.set("doomed", doomed));

    let coordinator = BatchCoordinator::new(session.clone()).with_reference_bag(bag.clone());
    let removed = assert_ok!(
        coordinator
            .remove_by("item", &Criteria::new(), &BatchOptions::new())
            .await
    );
    assert_eq!(removed, 4);

    let bag = bag.lock().await;
    assert!(bag.has("doomed"));
    assert!(assert_ok!(bag.get("doomed")).is_none());
    assert_eq!(bag.identity("doomed"), Some(&EntityIdentity::new("item", 1)));
}

#[tokio::test]
async fn test_unknown_key_is_not_found() {
    let session = Arc::new(MemorySession::new());
    let mut bag = ReferenceBag::new(session);
    bag.remove("never-set");

    let err = assert_err!(bag.get("never-set"));
    assert!(matches!(err, DbError::NotFound(_)));
    assert_eq!(err.to_string(), "Transactional entity with key 'never-set' was not found");
}

#[tokio::test]
async fn test_repository_streams_with_reference_bag() {
    let session = Arc::new(RecordingSession::new());
    session.seed(1..=5).await;
    let repository = BatchRepository::new(session.clone(), "item");

    let pinned = assert_ok!(session.find(&"item".into(), &5.into()).await).unwrap();
    let bag = ReferenceBag::shared(session.clone());
    assert_ok!(bag.lock().await.set("last", pinned));
    session.reset_ops();

    let result = assert_ok!(
        repository.iterate(
            QueryBuilder::new().select_from("item"),
            &batch_options(json!({ "batch_size": 2 })),
        )
    )
    .with_reference_bag(bag.clone());

    let scores: Vec<i64> = assert_ok!(
        result
            .into_stream()
            .map_ok(|entity| entity.get("score").and_then(|score| score.as_i64()).unwrap_or(0))
            .try_collect()
            .await
    );

    assert_eq!(scores, vec![10, 20, 30, 40, 50]);
    assert_eq!(session.count(&Op::Clear), 3);
    assert_eq!(session.count(&Op::Find(5)), 3);
    assert!(session.inner().is_managed(&assert_ok!(bag.lock().await.get("last")).unwrap()));
}

#[tokio::test]
async fn test_reload_after_clear_returns_fresh_instance() {
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
    let entity = item(9);
    assert_ok!(session.persist(&entity).await);
    assert_ok!(session.flush().await);

    let mut bag = ReferenceBag::new(session.clone());
    assert_ok!(bag.set("nine", entity.clone()));
    assert_ok!(session.clear().await);
    assert_ok!(bag.reload().await);

    let reloaded = assert_ok!(bag.get("nine")).unwrap();
    assert!(!reloaded.same_instance(&entity));
    assert_eq!(reloaded.get("score"), entity.get("score"));
}
