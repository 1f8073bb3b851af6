use crate::core::{Result, Value};
use futures::stream::{self, BoxStream, Stream, StreamExt};
use std::fmt;
use std::pin::Pin;
use std::task::{Context, Poll};

/// One streamed row: the object plus any extra selected columns.
pub type StreamRow<O> = (O, Vec<Value>);

/// Lazy result of an executed query, materializing one row per poll.
pub struct StreamingResult<O> {
    rows: BoxStream<'static, Result<StreamRow<O>>>,
}

impl<O: Send + 'static> StreamingResult<O> {
    pub fn new<St>(rows: St) -> Self
    where
        St: Stream<Item = Result<StreamRow<O>>> + Send + 'static,
    {
        Self { rows: rows.boxed() }
    }

    /// Result over rows that are already in memory.
    pub fn from_rows(rows: Vec<StreamRow<O>>) -> Self {
        Self::new(stream::iter(rows.into_iter().map(Ok)))
    }

    /// Drops the auxiliary columns, keeping the bare objects.
    pub fn into_objects(self) -> BoxStream<'static, Result<O>> {
        self.rows
            .map(|row| row.map(|(object, _aux)| object))
            .boxed()
    }
}

impl<O> Stream for StreamingResult<O> {
    type Item = Result<StreamRow<O>>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rows.as_mut().poll_next(cx)
    }
}

impl<O> fmt::Debug for StreamingResult<O> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamingResult").finish_non_exhaustive()
    }
}
