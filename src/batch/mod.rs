// ============================================================================
// Batch Processing
// ============================================================================
//
// Bulk persist / remove / iterate over a `Session` without letting its
// identity map grow unbounded:
//
//   BatchCoordinator ──builds──> BatchCursor ──pulls──> BatchSource
//          │                          │                   (objects, stream,
//          │                          │                    IterableResult)
//          │                          └──at boundaries──> flush, clear,
//          │                                              ReferenceBag::reload
//          └── BatchRepository binds it to one entity type
//
// ============================================================================

pub mod bag;
pub mod config;
pub mod coordinator;
pub mod cursor;
pub mod iterable;
pub mod repository;
pub mod source;

pub use bag::{PinnedEntity, ReferenceBag, SharedReferenceBag};
pub use config::{
    BatchConfig, BatchOptions, DEFAULT_BATCH_SIZE, NestedBagPolicy, batch_options, merge_options,
};
pub use coordinator::BatchCoordinator;
pub use cursor::{BatchCursor, CursorState};
pub use iterable::IterableResult;
pub use repository::BatchRepository;
pub use source::{BatchInput, BatchSource};
