use super::IterableResult;
use crate::core::{Result, Value};
use crate::query::{Query, QueryBuilder};
use crate::session::Session;
use futures::FutureExt;
use futures::future::BoxFuture;
use futures::stream::{self, BoxStream, Stream, StreamExt};
use std::fmt;

/// Sequence a [`super::BatchCursor`] drains.
pub enum BatchSource<S: Session> {
    /// Any stream of objects
    Stream(BoxStream<'static, Result<S::Object>>),
    /// A streaming query result that runs its own cursor
    Nested(Box<IterableResult<S>>),
}

impl<S: Session> BatchSource<S> {
    pub fn from_iter<I>(objects: I) -> Self
    where
        I: IntoIterator<Item = S::Object>,
        I::IntoIter: Send + 'static,
    {
        Self::Stream(stream::iter(objects.into_iter().map(Ok)).boxed())
    }

    pub fn from_stream<St>(objects: St) -> Self
    where
        St: Stream<Item = Result<S::Object>> + Send + 'static,
    {
        Self::Stream(objects.boxed())
    }

    pub fn is_nested(&self) -> bool {
        matches!(self, Self::Nested(_))
    }

    pub(crate) fn nested_mut(&mut self) -> Option<&mut IterableResult<S>> {
        match self {
            Self::Nested(result) => Some(result),
            Self::Stream(_) => None,
        }
    }

    // Boxed so a cursor draining a nested result (which drains its own
    // cursor) has a finitely sized future.
    pub(crate) fn next_object(&mut self) -> BoxFuture<'_, Result<Option<S::Object>>> {
        match self {
            Self::Stream(objects) => async move { objects.next().await.transpose() }.boxed(),
            Self::Nested(result) => result.next().boxed(),
        }
    }
}

impl<S: Session> From<IterableResult<S>> for BatchSource<S> {
    fn from(result: IterableResult<S>) -> Self {
        Self::Nested(Box::new(result))
    }
}

impl<S: Session> fmt::Debug for BatchSource<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Stream(_) => f.write_str("BatchSource::Stream"),
            Self::Nested(result) => f
                .debug_tuple("BatchSource::Nested")
                .field(result.query())
                .finish(),
        }
    }
}

/// Anything a caller may hand to a batch operation.
///
/// Object collections, streams and streaming results are drained as they
/// are; queries and builders are executed first. Scalars are accepted so that
/// loosely typed callers get an [`crate::DbError::InvalidInput`] instead of a
/// silent no-op.
pub enum BatchInput<S: Session> {
    Objects(Vec<S::Object>),
    Stream(BoxStream<'static, Result<S::Object>>),
    Result(IterableResult<S>),
    Query(Query),
    Builder(QueryBuilder),
    Scalar(Value),
}

impl<S: Session> BatchInput<S> {
    pub fn stream<St>(objects: St) -> Self
    where
        St: Stream<Item = Result<S::Object>> + Send + 'static,
    {
        Self::Stream(objects.boxed())
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Objects(_) => "objects",
            Self::Stream(_) => "stream",
            Self::Result(_) => "streaming result",
            Self::Query(_) => "query",
            Self::Builder(_) => "query builder",
            Self::Scalar(_) => "scalar",
        }
    }
}

impl<S: Session> From<Vec<S::Object>> for BatchInput<S> {
    fn from(objects: Vec<S::Object>) -> Self {
        Self::Objects(objects)
    }
}

impl<S: Session> From<IterableResult<S>> for BatchInput<S> {
    fn from(result: IterableResult<S>) -> Self {
        Self::Result(result)
    }
}

impl<S: Session> From<Query> for BatchInput<S> {
    fn from(query: Query) -> Self {
        Self::Query(query)
    }
}

impl<S: Session> From<QueryBuilder> for BatchInput<S> {
    fn from(builder: QueryBuilder) -> Self {
        Self::Builder(builder)
    }
}

impl<S: Session> From<Value> for BatchInput<S> {
    fn from(value: Value) -> Self {
        Self::Scalar(value)
    }
}

impl<S: Session> From<i64> for BatchInput<S> {
    fn from(value: i64) -> Self {
        Self::Scalar(Value::Integer(value))
    }
}

impl<S: Session> From<&str> for BatchInput<S> {
    fn from(value: &str) -> Self {
        Self::Scalar(Value::from(value))
    }
}

impl<S: Session> fmt::Debug for BatchInput<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BatchInput::{}", self.kind())
    }
}
