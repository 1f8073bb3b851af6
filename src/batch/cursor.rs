// ============================================================================
// Batch Cursor
// ============================================================================
//
// Pull-based cadence engine. Every item of the source is handed to the
// caller with a 1-based index; once the caller comes back for more after a
// boundary item, the session is synchronized (flush, then clear + reload of
// the reference bag) before the source is polled again. Exhaustion triggers
// one final synchronization.
//
// State transitions:
//
//   Idle ──first pull──> Running ──source exhausted──> Draining ──final sync──> Closed
//                           │                                                     ▲
//                           └────────────────────── error ────────────────────────┘
//
// ============================================================================

use super::{BatchConfig, BatchSource, NestedBagPolicy, SharedReferenceBag};
use crate::core::Result;
use crate::session::{LoggerSuspension, Session};
use futures::stream::{self, Stream};
use std::fmt;
use std::sync::Arc;
use tracing::{Level, event};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CursorState {
    /// Constructed, nothing pulled yet
    Idle,
    /// Yielding items
    Running,
    /// Source exhausted, final synchronization in progress
    Draining,
    /// Finished, failed, or finalized; yields nothing more
    Closed,
}

impl CursorState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, CursorState::Closed)
    }
}

impl fmt::Display for CursorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CursorState::Idle => write!(f, "IDLE"),
            CursorState::Running => write!(f, "RUNNING"),
            CursorState::Draining => write!(f, "DRAINING"),
            CursorState::Closed => write!(f, "CLOSED"),
        }
    }
}

/// Drains a [`BatchSource`] while applying the flush/clear cadence of a
/// [`BatchConfig`] to the session.
///
/// # Examples
///
/// ```
/// use batchdb::{BatchConfig, BatchCursor, BatchSource, Column, DataType, Entity, EntitySchema, MemorySession, Session};
/// use std::sync::Arc;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> batchdb::Result<()> {
/// let session = Arc::new(MemorySession::new());
/// session.register(EntitySchema::new("item", vec![Column::new("id", DataType::Integer)]))?;
///
/// let items: Vec<Entity> = (1..=5).map(|id| Entity::new("item").with("id", id)).collect();
/// let mut cursor = BatchCursor::new(session.clone(), BatchSource::from_iter(items), BatchConfig::new().size(2));
///
/// while let Some((_index, item)) = cursor.next().await? {
///     session.persist(&item).await?;
/// }
///
/// assert_eq!(session.row_count(&"item".into())?, 5);
/// assert_eq!(cursor.synchronizations(), 3);
/// # Ok(())
/// # }
/// ```
pub struct BatchCursor<S: Session> {
    session: Arc<S>,
    config: BatchConfig,
    source: BatchSource<S>,
    state: CursorState,
    index: usize,
    boundary_pending: bool,
    synchronizations: usize,
    bag: Option<SharedReferenceBag<S>>,
    suspend_logging: bool,
    logger_suspension: Option<LoggerSuspension<S>>,
}

impl<S: Session> BatchCursor<S> {
    pub fn new(session: Arc<S>, source: BatchSource<S>, config: BatchConfig) -> Self {
        Self {
            session,
            config,
            source,
            state: CursorState::Idle,
            index: 0,
            boundary_pending: false,
            synchronizations: 0,
            bag: None,
            suspend_logging: true,
            logger_suspension: None,
        }
    }

    /// Attaches a reference bag reloaded after every clear.
    pub fn with_reference_bag(mut self, bag: SharedReferenceBag<S>) -> Self {
        self.bag = Some(bag);
        self
    }

    pub fn set_reference_bag(&mut self, bag: Option<SharedReferenceBag<S>>) {
        self.bag = bag;
    }

    pub fn reference_bag(&self) -> Option<&SharedReferenceBag<S>> {
        self.bag.as_ref()
    }

    pub fn session(&self) -> &Arc<S> {
        &self.session
    }

    pub fn config(&self) -> &BatchConfig {
        &self.config
    }

    /// Cadence of the run; changes apply from the next synchronization on.
    pub fn config_mut(&mut self) -> &mut BatchConfig {
        &mut self.config
    }

    pub fn state(&self) -> CursorState {
        self.state
    }

    /// Index of the last yielded item, 0 before the first one.
    pub fn index(&self) -> usize {
        self.index
    }

    /// Synchronization steps run so far, final one included.
    pub fn synchronizations(&self) -> usize {
        self.synchronizations
    }

    /// Pulls the next `(index, object)` pair.
    ///
    /// Returns `Ok(None)` once the source is exhausted and the final
    /// synchronization ran, and on every call after that. Errors close the
    /// cursor.
    pub async fn next(&mut self) -> Result<Option<(usize, S::Object)>> {
        match self.state {
            CursorState::Closed => return Ok(None),
            CursorState::Idle => self.start(),
            CursorState::Running | CursorState::Draining => {}
        }

        let pulled = self.advance().await;
        if pulled.is_err() {
            self.close();
        }
        pulled
    }

    /// Drains the cursor, handing every object to `f`; returns the item count.
    pub async fn for_each<F>(&mut self, mut f: F) -> Result<usize>
    where
        F: FnMut(usize, S::Object) -> Result<()>,
    {
        let mut count = 0;
        while let Some((index, object)) = self.next().await? {
            if let Err(err) = f(index, object) {
                self.close();
                return Err(err);
            }
            count += 1;
        }
        Ok(count)
    }

    /// Adapts the cursor to a `Stream`; the stream ends after the first error.
    pub fn into_stream(self) -> impl Stream<Item = Result<(usize, S::Object)>> + Send {
        stream::unfold(self, |mut cursor| async move {
            match cursor.next().await {
                Ok(Some(item)) => Some((Ok(item), cursor)),
                Ok(None) => None,
                Err(err) => Some((Err(err), cursor)),
            }
        })
    }

    /// Runs the cursor under a suspension owned by its caller instead of
    /// acquiring one on the first pull.
    pub(crate) fn adopt_logger_suspension(&mut self, suspension: Option<LoggerSuspension<S>>) {
        self.suspend_logging = false;
        self.logger_suspension = suspension;
    }

    /// Gives up logger suspension for the rest of the run.
    pub(crate) fn take_logger_suspension(&mut self) -> Option<LoggerSuspension<S>> {
        self.suspend_logging = false;
        self.logger_suspension.take()
    }

    fn start(&mut self) {
        self.state = CursorState::Running;

        let inherited_bag = match self.config.nested_bag {
            NestedBagPolicy::Inherit => self.bag.clone(),
            NestedBagPolicy::Isolated => None,
        };

        if let Some(nested) = self.source.nested_mut() {
            nested.config_mut().disable_flush_auto().disable_clear_auto();
            if inherited_bag.is_some() {
                nested.set_reference_bag(inherited_bag);
            }
            // a result pulled before the handover already holds the suspension
            if let Some(suspension) = nested.take_logger_suspension() {
                self.logger_suspension = Some(suspension);
            }
        }

        // acquired before a nested result opens its query, held until close
        if self.suspend_logging && self.logger_suspension.is_none() {
            self.logger_suspension = Some(LoggerSuspension::acquire(self.session.clone()));
        }

        event!(
            Level::DEBUG,
            batch_size = self.config.size,
            flush_auto = self.config.flush_auto,
            clear_auto = self.config.clear_auto,
            nested = self.source.is_nested(),
            "batch cursor started"
        );
    }

    async fn advance(&mut self) -> Result<Option<(usize, S::Object)>> {
        if self.boundary_pending {
            self.boundary_pending = false;
            self.synchronize().await?;
        }

        match self.source.next_object().await? {
            Some(object) => {
                self.index += 1;
                self.boundary_pending = self.config.is_boundary(self.index);
                Ok(Some((self.index, object)))
            }
            None => {
                self.state = CursorState::Draining;
                self.synchronize().await?;
                self.close();
                Ok(None)
            }
        }
    }

    async fn synchronize(&mut self) -> Result<()> {
        // flush before clear: a clear drops whatever is still pending
        if self.config.flush_auto {
            self.session.flush().await?;
        }

        if self.config.clear_auto {
            self.session.clear().await?;
            if let Some(bag) = &self.bag {
                bag.lock().await.reload().await?;
            }
        }

        self.synchronizations += 1;
        event!(
            Level::DEBUG,
            index = self.index,
            draining = self.state == CursorState::Draining,
            "batch synchronized"
        );
        Ok(())
    }

    fn close(&mut self) {
        self.state = CursorState::Closed;
        if let Some(suspension) = self.logger_suspension.take() {
            suspension.release();
        }
        event!(
            Level::DEBUG,
            items = self.index,
            synchronizations = self.synchronizations,
            "batch cursor closed"
        );
    }
}

impl<S: Session> fmt::Debug for BatchCursor<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BatchCursor")
            .field("config", &self.config)
            .field("source", &self.source)
            .field("state", &self.state)
            .field("index", &self.index)
            .field("synchronizations", &self.synchronizations)
            .finish_non_exhaustive()
    }
}
