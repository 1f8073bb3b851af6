use super::{BatchConfig, BatchCursor, BatchSource, CursorState, SharedReferenceBag};
use crate::core::Result;
use crate::query::Query;
use crate::session::{LoggerSuspension, Session};
use futures::stream::{self, Stream};
use std::fmt;
use std::sync::Arc;

enum Execution<S: Session> {
    Pending,
    Open(BatchCursor<S>),
    Failed,
}

/// A query executed lazily and drained through its own [`BatchCursor`].
///
/// The query runs on the first [`IterableResult::next`]; rows are stripped of
/// their auxiliary columns so callers only see objects.
///
/// The session's diagnostic logger is suspended from the moment the query
/// opens until the run closes.
///
/// Handing an `IterableResult` to another cursor (as a nested source) makes
/// that outer cursor responsible for synchronization and for the logger: it
/// switches off this result's auto flush and auto clear, and takes over the
/// logger suspension, whether or not the result was already pulled.
pub struct IterableResult<S: Session> {
    session: Arc<S>,
    query: Query,
    config: BatchConfig,
    bag: Option<SharedReferenceBag<S>>,
    suspend_logging: bool,
    execution: Execution<S>,
}

impl<S: Session> IterableResult<S> {
    pub fn new(session: Arc<S>, query: Query, config: BatchConfig) -> Self {
        Self {
            session,
            query,
            config,
            bag: None,
            suspend_logging: true,
            execution: Execution::Pending,
        }
    }

    pub fn with_reference_bag(mut self, bag: SharedReferenceBag<S>) -> Self {
        self.set_reference_bag(Some(bag));
        self
    }

    pub fn set_reference_bag(&mut self, bag: Option<SharedReferenceBag<S>>) {
        if let Execution::Open(cursor) = &mut self.execution {
            cursor.set_reference_bag(bag.clone());
        }
        self.bag = bag;
    }

    pub fn reference_bag(&self) -> Option<&SharedReferenceBag<S>> {
        self.bag.as_ref()
    }

    pub fn query(&self) -> &Query {
        &self.query
    }

    pub fn config(&self) -> &BatchConfig {
        match &self.execution {
            Execution::Open(cursor) => cursor.config(),
            Execution::Pending | Execution::Failed => &self.config,
        }
    }

    /// Cadence of the run; once the query is open this is the cadence of the
    /// running cursor.
    pub fn config_mut(&mut self) -> &mut BatchConfig {
        match &mut self.execution {
            Execution::Open(cursor) => cursor.config_mut(),
            Execution::Pending | Execution::Failed => &mut self.config,
        }
    }

    /// Stops this result from suspending the logger and hands over the
    /// suspension it already holds, if any.
    pub(crate) fn take_logger_suspension(&mut self) -> Option<LoggerSuspension<S>> {
        self.suspend_logging = false;
        match &mut self.execution {
            Execution::Open(cursor) => cursor.take_logger_suspension(),
            Execution::Pending | Execution::Failed => None,
        }
    }

    pub fn state(&self) -> CursorState {
        match &self.execution {
            Execution::Pending => CursorState::Idle,
            Execution::Open(cursor) => cursor.state(),
            Execution::Failed => CursorState::Closed,
        }
    }

    /// Objects yielded so far.
    pub fn index(&self) -> usize {
        match &self.execution {
            Execution::Open(cursor) => cursor.index(),
            Execution::Pending | Execution::Failed => 0,
        }
    }

    pub async fn next(&mut self) -> Result<Option<S::Object>> {
        if let Execution::Pending = self.execution {
            self.execution = match self.open().await {
                Ok(cursor) => Execution::Open(cursor),
                Err(err) => {
                    self.execution = Execution::Failed;
                    return Err(err);
                }
            };
        }

        match &mut self.execution {
            Execution::Open(cursor) => Ok(cursor.next().await?.map(|(_index, object)| object)),
            Execution::Pending | Execution::Failed => Ok(None),
        }
    }

    pub fn into_stream(self) -> impl Stream<Item = Result<S::Object>> + Send {
        stream::unfold(self, |mut result| async move {
            match result.next().await {
                Ok(Some(object)) => Some((Ok(object), result)),
                Ok(None) => None,
                Err(err) => Some((Err(err), result)),
            }
        })
    }

    // `&mut self`: the row stream is not `Sync`
    async fn open(&mut self) -> Result<BatchCursor<S>> {
        let suspension = self
            .suspend_logging
            .then(|| LoggerSuspension::acquire(self.session.clone()));
        let rows = self.session.stream(&self.query).await?;
        let source = BatchSource::from_stream(rows.into_objects());

        let mut cursor = BatchCursor::new(self.session.clone(), source, self.config.clone());
        cursor.set_reference_bag(self.bag.clone());
        cursor.adopt_logger_suspension(suspension);
        Ok(cursor)
    }
}

impl<S: Session> fmt::Debug for IterableResult<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IterableResult")
            .field("query", &self.query)
            .field("config", self.config())
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}
