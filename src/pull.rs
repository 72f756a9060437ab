//! The pull protocol
//!
//! Every pull yields exactly one [`Take`]: a non-empty chunk, the end of the
//! stream, or a failure. Once a terminal take has been observed, further pulls
//! keep returning it without touching the producer again.

use std::fmt;
use std::panic::AssertUnwindSafe;

use futures::FutureExt;
use futures_util::stream::{BoxStream, StreamExt};

use crate::chunk::Chunk;
use crate::error::{Cause, Defect};

/// The raw producer behind a [`Pull`]: a stream of chunks that ends on
/// `None` and fails with `Err(cause)`
pub type ChunkStream<E, A> = BoxStream<'static, Result<Chunk<A>, Cause<E>>>;

/// The outcome of one pull
#[derive(Debug, Clone, PartialEq)]
pub enum Take<E, A> {
    Chunk(Chunk<A>),
    End,
    Fail(Cause<E>),
}

impl<E, A> Take<E, A> {
    pub fn single(value: A) -> Self {
        Take::Chunk(Chunk::single(value))
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, Take::Chunk(_))
    }

    pub fn map<B, F>(self, f: F) -> Take<E, B>
    where
        F: FnMut(A) -> B,
    {
        match self {
            Take::Chunk(chunk) => Take::Chunk(chunk.map(f)),
            Take::End => Take::End,
            Take::Fail(cause) => Take::Fail(cause),
        }
    }

    /// `None` at the end, otherwise the chunk or the failure
    pub fn into_result(self) -> Option<Result<Chunk<A>, Cause<E>>> {
        match self {
            Take::Chunk(chunk) => Some(Ok(chunk)),
            Take::End => None,
            Take::Fail(cause) => Some(Err(cause)),
        }
    }
}

/// A repeatable, idempotently-terminating pull over a [`ChunkStream`]
pub struct Pull<E, A> {
    source: Option<ChunkStream<E, A>>,
    terminal: Option<Cause<E>>,
}

impl<E, A> Pull<E, A>
where
    E: Clone + Send + 'static,
    A: Send + 'static,
{
    pub fn new(source: ChunkStream<E, A>) -> Self {
        Self {
            source: Some(source),
            terminal: None,
        }
    }

    /// A pull that has already ended
    pub fn end() -> Self {
        Self {
            source: None,
            terminal: None,
        }
    }

    pub fn is_done(&self) -> bool {
        self.source.is_none()
    }

    /// Produce the next non-empty chunk or the terminal signal.
    ///
    /// A panic raised by the producer is reported as `Cause::Die`.
    pub async fn pull(&mut self) -> Take<E, A> {
        loop {
            let next = match self.source.as_mut() {
                Some(source) => AssertUnwindSafe(source.next()).catch_unwind().await,
                None => return self.terminal(),
            };
            match next {
                Ok(Some(Ok(chunk))) => {
                    if !chunk.is_empty() {
                        return Take::Chunk(chunk);
                    }
                }
                Ok(Some(Err(cause))) => return self.finish(Some(cause)),
                Ok(None) => return self.finish(None),
                Err(panic) => {
                    let defect = Defect::from_panic(panic);
                    log::debug!("pull died: {}", defect.message());
                    return self.finish(Some(Cause::Die(defect)));
                }
            }
        }
    }

    fn finish(&mut self, cause: Option<Cause<E>>) -> Take<E, A> {
        self.source = None;
        self.terminal = cause;
        self.terminal()
    }

    fn terminal(&self) -> Take<E, A> {
        match &self.terminal {
            Some(cause) => Take::Fail(cause.clone()),
            None => Take::End,
        }
    }
}

impl<E, A> fmt::Debug for Pull<E, A>
where
    E: fmt::Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pull")
            .field("done", &self.source.is_none())
            .field("terminal", &self.terminal)
            .finish()
    }
}
