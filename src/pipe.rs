use crate::rs2::RStream;
use std::sync::Arc;

/// A Pipe represents a stream transformation from one element type to another.
/// It's a function from RStream[E, I] to RStream[E, O].
pub struct Pipe<E, I, O> {
    f: Arc<dyn Fn(RStream<E, I>) -> RStream<E, O> + Send + Sync + 'static>,
}

impl<E, I, O> Clone for Pipe<E, I, O> {
    fn clone(&self) -> Self {
        Pipe {
            f: Arc::clone(&self.f),
        }
    }
}

impl<E, I, O> Pipe<E, I, O> {
    /// Create a new pipe from a function
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(RStream<E, I>) -> RStream<E, O> + Send + Sync + 'static,
    {
        Pipe { f: Arc::new(f) }
    }

    /// Apply this pipe to a stream
    pub fn apply(&self, input: RStream<E, I>) -> RStream<E, O> {
        (self.f)(input)
    }
}

/// Create a pipe that applies the given function to each element
pub fn map<E, I, O, F>(f: F) -> Pipe<E, I, O>
where
    E: Clone + Send + Sync + 'static,
    F: Fn(I) -> O + Send + Sync + Clone + 'static,
    I: Send + 'static,
    O: Send + 'static,
{
    Pipe::new(move |input: RStream<E, I>| input.map(f.clone()))
}

/// Create a pipe that filters elements based on the predicate
pub fn filter<E, I, F>(predicate: F) -> Pipe<E, I, I>
where
    E: Clone + Send + Sync + 'static,
    F: Fn(&I) -> bool + Send + Sync + Clone + 'static,
    I: Send + 'static,
{
    Pipe::new(move |input: RStream<E, I>| input.filter(predicate.clone()))
}

/// Compose two pipes together
pub fn compose<E, I, M, O>(p1: Pipe<E, I, M>, p2: Pipe<E, M, O>) -> Pipe<E, I, O>
where
    E: 'static,
    I: 'static,
    M: 'static,
    O: 'static,
{
    Pipe::new(move |input| p2.apply(p1.apply(input)))
}

/// Identity pipe that doesn't transform the stream
pub fn identity<E, I>() -> Pipe<E, I, I>
where
    E: 'static,
    I: 'static,
{
    Pipe::new(|input| input)
}

/// Extension trait for pipes
pub trait PipeExt<E, I, O> {
    /// Compose this pipe with another pipe
    fn compose<P>(self, other: Pipe<E, O, P>) -> Pipe<E, I, P>
    where
        P: 'static;
}

impl<E, I, O> PipeExt<E, I, O> for Pipe<E, I, O>
where
    E: 'static,
    I: 'static,
    O: 'static,
{
    fn compose<P>(self, other: Pipe<E, O, P>) -> Pipe<E, I, P>
    where
        P: 'static,
    {
        compose(self, other)
    }
}
