// ============================================================================
// batchdb Library
// ============================================================================

//! Flush/clear cadence control for sessions with an identity map.
//!
//! A session that tracks every object it hands out grows without bound
//! during bulk work. The batch layer drains a source of objects through a
//! [`BatchCursor`] that flushes pending writes and purges the identity map
//! every `batch_size` items, re-fetching any objects pinned in a
//! [`ReferenceBag`] so they stay usable after each purge.
//!
//! # Examples
//!
//! ```
//! use batchdb::{BatchCoordinator, Column, DataType, Entity, EntitySchema, MemorySession, batch_options};
//! use serde_json::json;
//! use std::sync::Arc;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> batchdb::Result<()> {
//! let session = Arc::new(MemorySession::new());
//! session.register(EntitySchema::new("item", vec![
//!     Column::new("id", DataType::Integer),
//!     Column::new("label", DataType::Text),
//! ]))?;
//!
//! let items: Vec<Entity> = (1..=100)
//!     .map(|id| Entity::new("item").with("id", id).with("label", format!("item-{id}")))
//!     .collect();
//!
//! let batches = BatchCoordinator::new(session.clone());
//! let persisted = batches.persist(items, &batch_options(json!({ "batch_size": 25 }))).await?;
//!
//! assert_eq!(persisted, 100);
//! assert_eq!(session.managed_count(), 0);
//! # Ok(())
//! # }
//! ```

pub mod batch;
pub mod core;
pub mod query;
pub mod session;

// Re-export main types for convenience
pub use core::{Column, DataType, DbError, EntitySchema, Fields, Result, Value};

pub use session::{
    Change, DiagnosticLogger, Entity, EntityIdentity, LoggerSuspension, MemoryLogger,
    MemorySession, PrimaryKey, Session, SessionStats, SharedLogger, TracingLogger, TypeDescriptor,
};

pub use query::{
    Comparison, Criteria, Direction, Expr, OrderBy, Query, QueryBuilder, StreamRow,
    StreamingResult,
};

pub use batch::{
    BatchConfig, BatchCoordinator, BatchCursor, BatchInput, BatchOptions, BatchRepository,
    BatchSource, CursorState, DEFAULT_BATCH_SIZE, IterableResult, NestedBagPolicy, PinnedEntity,
    ReferenceBag, SharedReferenceBag, batch_options, merge_options,
};
