use futures_core::Stream;

use crate::rs2::{from_stream, from_try_stream, RStream};

/// Extension trait lifting plain `futures` streams into RStream
pub trait RS2StreamExt: Stream + Sized + Send + 'static {
    /// Wrap this stream as an `RStream`, one element per chunk.
    ///
    /// The stream is consumed by the first run; running the result again
    /// fails with a defect.
    fn into_rs2<E>(self) -> RStream<E, Self::Item>
    where
        E: Clone + Send + Sync + 'static,
        Self::Item: Send + 'static,
    {
        from_stream(self)
    }

    /// Wrap this stream as an `RStream` with chunks of `size` elements
    fn chunked_rs2<E>(self, size: usize) -> RStream<E, Self::Item>
    where
        E: Clone + Send + Sync + 'static,
        Self::Item: Send + 'static,
    {
        from_stream(self).rechunk(size)
    }

    /// Run `f` on every element with at most `concurrency` inner streams at once
    fn par_flat_map_rs2<E, B, F>(self, concurrency: usize, f: F) -> RStream<E, B>
    where
        E: Clone + Send + Sync + 'static,
        Self::Item: Send + 'static,
        B: Send + 'static,
        F: Fn(Self::Item) -> RStream<E, B> + Send + Sync + 'static,
    {
        self.into_rs2().flat_map_par(concurrency, f)
    }
}

impl<S> RS2StreamExt for S where S: Stream + Sized + Send + 'static {}

/// Extension trait for streams of `Result`
pub trait RS2TryStreamExt<T, E>: Stream<Item = Result<T, E>> + Sized + Send + 'static {
    /// Wrap as an `RStream` whose first `Err` becomes the stream failure
    fn into_rs2_try(self) -> RStream<E, T>
    where
        T: Send + 'static,
        E: Clone + Send + Sync + 'static,
    {
        from_try_stream(self)
    }
}

impl<S, T, E> RS2TryStreamExt<T, E> for S where S: Stream<Item = Result<T, E>> + Sized + Send + 'static {}
