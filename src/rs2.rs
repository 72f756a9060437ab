//! RStream - effectful, chunked, pull-based streams
//!
//! An [`RStream<E, A>`] is a re-runnable description of a sequence of `A`
//! values that may fail with `E`. Running it opens the description inside a
//! [`Scope`], producing a [`Pull`]; every resource acquired along the way is
//! released, in reverse order, when that scope closes.
//!
//! Internally a stream is a list of segments. A segment opens a chunk stream
//! in a scope, defers to another stream built on demand, or binds: it hands
//! out inner streams to be run one after the other. Segments are evaluated
//! from an explicit stack of frames, so long or recursive `concat`, `suspend`
//! and `flat_map` chains run in constant stack space.

use async_stream::stream;
use futures::future;
use futures_core::Stream;
use futures_util::stream::{self as futures_stream, BoxStream, StreamExt};
use std::collections::VecDeque;
use std::future::Future;
use std::ops::ControlFlow;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use crate::fiber::root_scope;

pub use crate::async_bridge::{
    effect_async, effect_async_interrupt, effect_async_m, effect_async_maybe, Canceler, Emit,
};
pub use crate::chunk::Chunk;
pub use crate::error::{Cause, Defect, StreamResult};
pub use crate::fanout::{Distributor, GroupBy, Subscription, SubscriptionId};
pub use crate::fiber::{current_scope, Fiber, FiberExit, FiberId};
pub use crate::parallel::MergeStrategy;
pub use crate::pipe::Pipe;
pub use crate::promise::Promise;
pub use crate::pull::{ChunkStream, Pull, Take};
pub use crate::queue::{Queue, QueueError, QueueStats};
pub use crate::scope::{ExitCase, FinalizerKey, Scope};
pub use crate::stream_configuration::{BackpressureStrategy, BufferConfig, StreamConfig};
pub use futures::future::Either;

type Process<E, A> = Arc<dyn Fn(&Scope) -> ChunkStream<E, A> + Send + Sync>;
type Deferred<E, A> = Arc<dyn Fn() -> RStream<E, A> + Send + Sync>;

/// The inner streams of a bind, produced lazily one per outer element
pub(crate) type InnerStreams<E, A> = BoxStream<'static, Result<RStream<E, A>, Cause<E>>>;
type Binder<E, A> = Arc<dyn Fn(&Scope) -> InnerStreams<E, A> + Send + Sync>;

enum Segment<E, A> {
    Run(Process<E, A>),
    Defer(Deferred<E, A>),
    Bind(Binder<E, A>),
}

impl<E, A> Clone for Segment<E, A> {
    fn clone(&self) -> Self {
        match self {
            Segment::Run(p) => Segment::Run(Arc::clone(p)),
            Segment::Defer(d) => Segment::Defer(Arc::clone(d)),
            Segment::Bind(b) => Segment::Bind(Arc::clone(b)),
        }
    }
}

/// One level of an opened stream
enum Frame<E, A> {
    /// Segments still to run, each in its own child of `scope`
    Segments {
        pending: VecDeque<Segment<E, A>>,
        scope: Scope,
        owned: bool,
    },
    Leaf {
        stream: ChunkStream<E, A>,
        scope: Scope,
    },
    /// A bind whose inner streams each run in a child of `scope`
    Bind {
        inner: InnerStreams<E, A>,
        scope: Scope,
    },
}

impl<E, A> Frame<E, A> {
    async fn close(self, exit: ExitCase) {
        let scope = match self {
            Frame::Segments { owned: false, .. } => return,
            Frame::Segments { scope, .. } => scope,
            Frame::Leaf { stream, scope } => {
                drop(stream);
                scope
            }
            Frame::Bind { inner, scope } => {
                drop(inner);
                scope
            }
        };
        scope.close(exit).await;
    }
}

enum Step<E, A> {
    Emit(Chunk<A>),
    Push(Frame<E, A>),
    Pop,
    Fail(Cause<E>),
    Continue,
}

/// A scoped, effectful stream of `A` that may fail with `E`
pub struct RStream<E, A> {
    segments: Vec<Segment<E, A>>,
}

impl<E, A> Clone for RStream<E, A> {
    fn clone(&self) -> Self {
        Self {
            segments: self.segments.clone(),
        }
    }
}

impl<E, A> std::fmt::Debug for RStream<E, A> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RStream")
            .field("segments", &self.segments.len())
            .finish()
    }
}

impl<E, A> RStream<E, A>
where
    E: Clone + Send + Sync + 'static,
    A: Send + 'static,
{
    /// Build a stream from a process that opens a chunk stream in a scope
    pub fn from_process<F>(process: F) -> Self
    where
        F: Fn(&Scope) -> ChunkStream<E, A> + Send + Sync + 'static,
    {
        Self {
            segments: vec![Segment::Run(Arc::new(process))],
        }
    }

    /// A stream whose inner streams come from `bind`, opened in a scope
    /// that closes once every inner stream has run
    pub(crate) fn from_bind<F>(bind: F) -> Self
    where
        F: Fn(&Scope) -> InnerStreams<E, A> + Send + Sync + 'static,
    {
        Self {
            segments: vec![Segment::Bind(Arc::new(bind))],
        }
    }

    /// Open the stream in `scope` as a raw chunk stream
    pub fn open_stream(&self, scope: &Scope) -> ChunkStream<E, A> {
        if let [Segment::Run(process)] = self.segments.as_slice() {
            return process(scope);
        }
        drive(self.segments.iter().cloned().collect(), scope.clone())
    }

    /// Open the stream in `scope` as an idempotent [`Pull`]
    pub fn open(&self, scope: &Scope) -> Pull<E, A> {
        Pull::new(self.open_stream(scope))
    }

    /// Run `self`, then `that`. A failure in `self` means `that` never starts.
    pub fn concat(mut self, that: RStream<E, A>) -> RStream<E, A> {
        self.segments.extend(that.segments);
        self
    }

    // ================================
    // Running streams
    // ================================

    async fn run_chunks<S, F>(self, init: S, mut step: F) -> StreamResult<S, E>
    where
        F: FnMut(S, Chunk<A>) -> ControlFlow<S, S>,
    {
        let scope = root_scope();
        let mut pull = self.open(&scope);
        let mut state = init;
        let result = loop {
            match pull.pull().await {
                Take::Chunk(chunk) => match step(state, chunk) {
                    ControlFlow::Continue(next) => state = next,
                    ControlFlow::Break(done) => break Ok(done),
                },
                Take::End => break Ok(state),
                Take::Fail(cause) => break Err(cause),
            }
        };
        drop(pull);
        scope.close(ExitCase::from_result(&result)).await;
        result
    }

    /// Collect every element; the first failure wins and partial output is discarded
    pub async fn run_collect(self) -> StreamResult<Vec<A>, E> {
        self.run_chunks(Vec::new(), |mut acc, chunk| {
            acc.extend(chunk);
            ControlFlow::Continue(acc)
        })
        .await
    }

    /// Run for effects only
    pub async fn run_drain(self) -> StreamResult<(), E> {
        self.run_chunks((), |_, _| ControlFlow::Continue(())).await
    }

    /// The first element, without pulling any further
    pub async fn run_head(self) -> StreamResult<Option<A>, E> {
        self.run_chunks(None, |_, chunk| ControlFlow::Break(chunk.into_iter().next()))
            .await
    }

    pub async fn run_last(self) -> StreamResult<Option<A>, E> {
        self.run_chunks(None, |last, chunk| {
            ControlFlow::Continue(chunk.into_iter().last().or(last))
        })
        .await
    }

    pub async fn run_count(self) -> StreamResult<usize, E> {
        self.run_chunks(0, |n, chunk| ControlFlow::Continue(n + chunk.len()))
            .await
    }

    pub async fn run_fold<S, F>(self, init: S, mut f: F) -> StreamResult<S, E>
    where
        F: FnMut(S, A) -> S,
    {
        self.run_chunks(init, |acc, chunk| {
            ControlFlow::Continue(chunk.into_iter().fold(acc, &mut f))
        })
        .await
    }

    /// Fold while `cont` holds for the accumulated state
    pub async fn run_fold_while<S, C, F>(self, init: S, cont: C, mut f: F) -> StreamResult<S, E>
    where
        C: Fn(&S) -> bool,
        F: FnMut(S, A) -> S,
    {
        if !cont(&init) {
            return Ok(init);
        }
        self.run_chunks(init, |mut acc, chunk| {
            for a in chunk {
                acc = f(acc, a);
                if !cont(&acc) {
                    return ControlFlow::Break(acc);
                }
            }
            ControlFlow::Continue(acc)
        })
        .await
    }

    /// Run an effect for every element, stopping at the first failure
    pub async fn run_for_each<F, Fut>(self, mut f: F) -> StreamResult<(), E>
    where
        F: FnMut(A) -> Fut,
        Fut: Future<Output = Result<(), E>>,
    {
        let scope = root_scope();
        let mut pull = self.open(&scope);
        let result = 'outer: loop {
            match pull.pull().await {
                Take::Chunk(chunk) => {
                    for a in chunk {
                        if let Err(e) = f(a).await {
                            break 'outer Err(Cause::Fail(e));
                        }
                    }
                }
                Take::End => break Ok(()),
                Take::Fail(cause) => break Err(cause),
            }
        };
        drop(pull);
        scope.close(ExitCase::from_result(&result)).await;
        result
    }

    /// Run the stream, offering every take to `queue`; the last offer is
    /// always `Take::End` or `Take::Fail`
    pub async fn into_queue(self, queue: &Queue<Take<E, A>>) -> Result<(), QueueError> {
        let scope = root_scope();
        let mut pull = self.open(&scope);
        let (outcome, exit) = loop {
            let take = pull.pull().await;
            let exit = match &take {
                Take::Chunk(_) => None,
                Take::End => Some(ExitCase::Completed),
                Take::Fail(cause) => Some(ExitCase::from_cause(cause)),
            };
            if let Err(e) = queue.offer(take).await {
                break (Err(e), ExitCase::Interrupted);
            }
            if let Some(exit) = exit {
                break (Ok(()), exit);
            }
        };
        drop(pull);
        scope.close(exit).await;
        outcome
    }

    /// Run the stream in a fiber of `scope`, delivering takes through a new
    /// bounded queue
    pub fn to_queue(self, scope: &Scope, capacity: usize) -> Queue<Take<E, A>> {
        let queue = Queue::bounded(capacity);
        let target = queue.clone();
        Fiber::fork(scope, move |_| async move {
            if let Err(e) = self.into_queue(&target).await {
                log::debug!("to_queue stopped early: {}", e);
            }
        });
        queue
    }

    /// Convert into a plain `futures` stream of elements
    pub fn into_stream(self) -> BoxStream<'static, Result<A, Cause<E>>> {
        stream! {
            let scope = root_scope();
            let mut pull = self.open(&scope);
            loop {
                match pull.pull().await {
                    Take::Chunk(chunk) => {
                        for a in chunk {
                            yield Ok(a);
                        }
                    }
                    Take::End => {
                        scope.close(ExitCase::Completed).await;
                        break;
                    }
                    Take::Fail(cause) => {
                        scope.close(ExitCase::from_cause(&cause)).await;
                        yield Err(cause);
                        break;
                    }
                }
            }
        }
        .boxed()
    }
}

/// Run `segments` in `scope` from an explicit frame stack.
///
/// Every leaf and every bind runs in its own child scope, closed as soon as
/// it is done. On failure the open frames are closed innermost first before
/// the failure is passed on.
fn drive<E, A>(segments: VecDeque<Segment<E, A>>, scope: Scope) -> ChunkStream<E, A>
where
    E: Clone + Send + Sync + 'static,
    A: Send + 'static,
{
    stream! {
        let mut frames = vec![Frame::Segments { pending: segments, scope, owned: false }];
        let mut failure = None;
        while let Some(frame) = frames.last_mut() {
            let step = match frame {
                Frame::Segments { pending, scope, .. } => match pending.pop_front() {
                    None => Step::Pop,
                    Some(Segment::Defer(build)) => match crate::error::catch_defect(|| build()) {
                        Ok(next) => {
                            for segment in next.segments.into_iter().rev() {
                                pending.push_front(segment);
                            }
                            Step::Continue
                        }
                        Err(defect) => Step::Fail(Cause::Die(defect)),
                    },
                    Some(Segment::Run(process)) => {
                        let child = scope.fork();
                        Step::Push(Frame::Leaf { stream: process(&child), scope: child })
                    }
                    Some(Segment::Bind(bind)) => {
                        let child = scope.fork();
                        Step::Push(Frame::Bind { inner: bind(&child), scope: child })
                    }
                },
                Frame::Leaf { stream, .. } => match stream.next().await {
                    Some(Ok(chunk)) => Step::Emit(chunk),
                    Some(Err(cause)) => Step::Fail(cause),
                    None => Step::Pop,
                },
                Frame::Bind { inner, scope } => match inner.next().await {
                    Some(Ok(next)) => {
                        let child = scope.fork();
                        let leaf = match next.segments.as_slice() {
                            [Segment::Run(process)] => Some(Arc::clone(process)),
                            _ => None,
                        };
                        Step::Push(match leaf {
                            Some(process) => Frame::Leaf { stream: process(&child), scope: child },
                            None => Frame::Segments {
                                pending: next.segments.into(),
                                scope: child,
                                owned: true,
                            },
                        })
                    }
                    Some(Err(cause)) => Step::Fail(cause),
                    None => Step::Pop,
                },
            };
            match step {
                Step::Emit(chunk) => yield Ok(chunk),
                Step::Push(frame) => frames.push(frame),
                Step::Pop => {
                    if let Some(frame) = frames.pop() {
                        frame.close(ExitCase::Completed).await;
                    }
                }
                Step::Fail(cause) => {
                    failure = Some(cause);
                    break;
                }
                Step::Continue => {}
            }
        }
        if let Some(cause) = failure {
            let exit = ExitCase::from_cause(&cause);
            while let Some(frame) = frames.pop() {
                frame.close(exit).await;
            }
            yield Err(cause);
        }
    }
    .boxed()
}

/// Forward `inner`, closing `scope` once it ends or fails and before the
/// failure is passed on
pub(crate) fn scoped<E, A>(scope: Scope, inner: ChunkStream<E, A>) -> ChunkStream<E, A>
where
    E: Clone + Send + Sync + 'static,
    A: Send + 'static,
{
    stream! {
        let mut inner = inner;
        let mut failure = None;
        while let Some(item) = inner.next().await {
            match item {
                Ok(chunk) => yield Ok(chunk),
                Err(cause) => {
                    failure = Some(cause);
                    break;
                }
            }
        }
        drop(inner);
        match failure {
            Some(cause) => {
                scope.close(ExitCase::from_cause(&cause)).await;
                yield Err(cause);
            }
            None => scope.close(ExitCase::Completed).await,
        }
    }
    .boxed()
}

// ================================
// Core Stream Constructors
// ================================

/// A stream that ends immediately
pub fn empty<E, A>() -> RStream<E, A> {
    RStream {
        segments: Vec::new(),
    }
}

/// Emit a single element
pub fn emit<E, A>(value: A) -> RStream<E, A>
where
    E: Clone + Send + Sync + 'static,
    A: Clone + Send + Sync + 'static,
{
    from_chunk(Chunk::single(value))
}

/// Emit the elements of one chunk
pub fn from_chunk<E, A>(chunk: Chunk<A>) -> RStream<E, A>
where
    E: Clone + Send + Sync + 'static,
    A: Clone + Send + Sync + 'static,
{
    RStream::from_process(move |_| futures_stream::once(future::ready(Ok(chunk.clone()))).boxed())
}

/// Emit several chunks in order; empty chunks are skipped
pub fn from_chunks<E, A, I>(chunks: I) -> RStream<E, A>
where
    E: Clone + Send + Sync + 'static,
    A: Clone + Send + Sync + 'static,
    I: IntoIterator<Item = Chunk<A>>,
{
    let chunks: Vec<Chunk<A>> = chunks.into_iter().filter(|c| !c.is_empty()).collect();
    RStream::from_process(move |_| futures_stream::iter(chunks.clone().into_iter().map(Ok)).boxed())
}

/// Create a stream from an iterator, chunked by `StreamConfig::chunk_size`
pub fn from_iter<E, I>(iter: I) -> RStream<E, I::Item>
where
    E: Clone + Send + Sync + 'static,
    I: IntoIterator + Clone + Send + Sync + 'static,
    I::IntoIter: Send + 'static,
    I::Item: Send + 'static,
{
    RStream::from_process(move |_| {
        let chunk_size = StreamConfig::global().chunk_size.max(1);
        let mut items = iter.clone().into_iter();
        futures_stream::iter(std::iter::from_fn(move || {
            let chunk: Chunk<I::Item> = items.by_ref().take(chunk_size).collect();
            if chunk.is_empty() {
                None
            } else {
                Some(Ok(chunk))
            }
        }))
        .boxed()
    })
}

/// The integers in `start..end`
pub fn range<E>(start: i32, end: i32) -> RStream<E, i32>
where
    E: Clone + Send + Sync + 'static,
{
    from_iter(start..end)
}

/// A stream that never produces anything and never ends
pub fn never<E, A>() -> RStream<E, A>
where
    E: Clone + Send + Sync + 'static,
    A: Send + 'static,
{
    RStream::from_process(|_| futures_stream::pending().boxed())
}

/// A stream failing with `error`
pub fn fail<E, A>(error: E) -> RStream<E, A>
where
    E: Clone + Send + Sync + 'static,
    A: Send + 'static,
{
    halt(Cause::Fail(error))
}

/// A stream failing with a defect
pub fn die<E, A>(message: impl Into<String>) -> RStream<E, A>
where
    E: Clone + Send + Sync + 'static,
    A: Send + 'static,
{
    halt(Cause::Die(Defect::new(message)))
}

/// A stream failing with `cause`
pub fn halt<E, A>(cause: Cause<E>) -> RStream<E, A>
where
    E: Clone + Send + Sync + 'static,
    A: Send + 'static,
{
    RStream::from_process(move |_| futures_stream::once(future::ready(Err(cause.clone()))).boxed())
}

/// Evaluate an effect and emit its result
pub fn eval<E, A, F, Fut>(effect: F) -> RStream<E, A>
where
    E: Clone + Send + Sync + 'static,
    A: Send + 'static,
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<A, E>> + Send + 'static,
{
    let effect = Arc::new(effect);
    RStream::from_process(move |_| {
        let effect = Arc::clone(&effect);
        stream! {
            match effect().await {
                Ok(value) => yield Ok(Chunk::single(value)),
                Err(error) => yield Err(Cause::Fail(error)),
            }
        }
        .boxed()
    })
}

/// Evaluate an infallible future and emit its output
pub fn from_future<E, A, F, Fut>(f: F) -> RStream<E, A>
where
    E: Clone + Send + Sync + 'static,
    A: Send + 'static,
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = A> + Send + 'static,
{
    let f = Arc::new(f);
    eval(move || {
        let fut = f();
        async move { Ok(fut.await) }
    })
}

/// Build the stream only when it is reached; recursive definitions through
/// `suspend` are evaluated without growing the stack
pub fn suspend<E, A, F>(f: F) -> RStream<E, A>
where
    F: Fn() -> RStream<E, A> + Send + Sync + 'static,
{
    RStream {
        segments: vec![Segment::Defer(Arc::new(f))],
    }
}

/// Concatenate multiple streams sequentially
pub fn concat<E, A>(streams: Vec<RStream<E, A>>) -> RStream<E, A> {
    RStream {
        segments: streams.into_iter().flat_map(|s| s.segments).collect(),
    }
}

/// Generate a stream from a seed value and a function
///
/// Continues until the function returns None.
///
/// # Examples
/// ```
/// use rs2_pull::rs2::*;
///
/// # async fn example() {
/// let fibonacci = unfold::<(), _, _, _>((0u64, 1u64), |(a, b)| Some((a, (b, a + b))));
/// let result = fibonacci.take(10).run_collect().await.unwrap();
/// assert_eq!(result, vec![0, 1, 1, 2, 3, 5, 8, 13, 21, 34]);
/// # }
/// ```
pub fn unfold<E, A, S, F>(init: S, f: F) -> RStream<E, A>
where
    E: Clone + Send + Sync + 'static,
    A: Send + 'static,
    S: Clone + Send + Sync + 'static,
    F: Fn(S) -> Option<(A, S)> + Send + Sync + 'static,
{
    let f = Arc::new(f);
    RStream::from_process(move |_| {
        let f = Arc::clone(&f);
        let mut state = Some(init.clone());
        futures_stream::iter(std::iter::from_fn(move || {
            let (value, next) = f(state.take()?)?;
            state = Some(next);
            Some(Ok(Chunk::single(value)))
        }))
        .boxed()
    })
}

/// Like [`unfold`] with an effectful, fallible step
pub fn unfold_eval<E, A, S, F, Fut>(init: S, f: F) -> RStream<E, A>
where
    E: Clone + Send + Sync + 'static,
    A: Send + 'static,
    S: Clone + Send + Sync + 'static,
    F: Fn(S) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Option<(A, S)>, E>> + Send + 'static,
{
    let f = Arc::new(f);
    RStream::from_process(move |_| {
        let f = Arc::clone(&f);
        let init = init.clone();
        stream! {
            let mut state = init;
            loop {
                match f(state).await {
                    Ok(Some((value, next))) => {
                        yield Ok(Chunk::single(value));
                        state = next;
                    }
                    Ok(None) => break,
                    Err(error) => {
                        yield Err(Cause::Fail(error));
                        break;
                    }
                }
            }
        }
        .boxed()
    })
}

/// `init`, `f(init)`, `f(f(init))`, ... forever
pub fn iterate<E, A, F>(init: A, f: F) -> RStream<E, A>
where
    E: Clone + Send + Sync + 'static,
    A: Clone + Send + Sync + 'static,
    F: Fn(&A) -> A + Send + Sync + 'static,
{
    unfold(init, move |a| {
        let next = f(&a);
        Some((a, next))
    })
}

// ================================
// Resource Management
// ================================

/// Acquire a resource, emit it, and release it when the stream's scope
/// closes
pub fn bracket<E, R, Acq, AcqFut, Rel, RelFut>(acquire: Acq, release: Rel) -> RStream<E, R>
where
    E: Clone + Send + Sync + 'static,
    R: Clone + Send + Sync + 'static,
    Acq: Fn() -> AcqFut + Send + Sync + 'static,
    AcqFut: Future<Output = Result<R, E>> + Send + 'static,
    Rel: Fn(R) -> RelFut + Send + Sync + 'static,
    RelFut: Future<Output = ()> + Send + 'static,
{
    let release = Arc::new(release);
    bracket_case(acquire, move |resource, _| release(resource))
}

/// BracketCase: the release function also learns how the scope was closed
pub fn bracket_case<E, R, Acq, AcqFut, Rel, RelFut>(acquire: Acq, release: Rel) -> RStream<E, R>
where
    E: Clone + Send + Sync + 'static,
    R: Clone + Send + Sync + 'static,
    Acq: Fn() -> AcqFut + Send + Sync + 'static,
    AcqFut: Future<Output = Result<R, E>> + Send + 'static,
    Rel: Fn(R, ExitCase) -> RelFut + Send + Sync + 'static,
    RelFut: Future<Output = ()> + Send + 'static,
{
    let acquire = Arc::new(acquire);
    let release = Arc::new(release);
    RStream::from_process(move |scope| {
        let acquire = Arc::clone(&acquire);
        let release = Arc::clone(&release);
        let scope = scope.clone();
        stream! {
            let resource_scope = scope.fork();
            match acquire().await {
                Ok(resource) => {
                    let held = resource.clone();
                    resource_scope.add_finalizer(move |exit| release(held, exit));
                    yield Ok(Chunk::single(resource));
                    resource_scope.close(ExitCase::Completed).await;
                }
                Err(error) => {
                    resource_scope.close(ExitCase::Errored).await;
                    yield Err(Cause::Fail(error));
                }
            }
        }
        .boxed()
    })
}

// ================================
// Interop
// ================================

fn consumed<E, A>() -> ChunkStream<E, A>
where
    E: Send + 'static,
    A: Send + 'static,
{
    futures_stream::once(future::ready(Err(Cause::die("single-use stream already consumed")))).boxed()
}

/// Wrap a `futures` stream. The result can be run once; later runs die.
pub fn from_stream<E, S>(s: S) -> RStream<E, S::Item>
where
    E: Clone + Send + Sync + 'static,
    S: Stream + Send + 'static,
    S::Item: Send + 'static,
{
    let slot = Arc::new(Mutex::new(Some(s.boxed())));
    RStream::from_process(move |_| {
        let taken = slot.lock().unwrap_or_else(PoisonError::into_inner).take();
        match taken {
            Some(s) => s.map(|a| Ok(Chunk::single(a))).boxed(),
            None => consumed(),
        }
    })
}

/// Wrap a `futures` stream of results; the first `Err` fails the stream
pub fn from_try_stream<E, A, S>(s: S) -> RStream<E, A>
where
    E: Clone + Send + Sync + 'static,
    A: Send + 'static,
    S: Stream<Item = Result<A, E>> + Send + 'static,
{
    let slot = Arc::new(Mutex::new(Some(s.boxed())));
    RStream::from_process(move |_| {
        let taken = slot.lock().unwrap_or_else(PoisonError::into_inner).take();
        match taken {
            Some(mut s) => stream! {
                while let Some(item) = s.next().await {
                    match item {
                        Ok(value) => yield Ok(Chunk::single(value)),
                        Err(error) => {
                            yield Err(Cause::Fail(error));
                            break;
                        }
                    }
                }
            }
            .boxed(),
            None => consumed(),
        }
    })
}

/// Read elements from `queue` until it is closed and drained
pub fn from_queue<E, A>(queue: Queue<A>) -> RStream<E, A>
where
    E: Clone + Send + Sync + 'static,
    A: Send + 'static,
{
    RStream::from_process(move |_| {
        let queue = queue.clone();
        stream! {
            let chunk_size = StreamConfig::global().chunk_size.max(1);
            while let Ok(first) = queue.take().await {
                let mut items = vec![first];
                while items.len() < chunk_size {
                    match queue.poll() {
                        Some(item) => items.push(item),
                        None => break,
                    }
                }
                yield Ok(Chunk::from(items));
            }
        }
        .boxed()
    })
}

/// Read takes from `queue` until a terminal take arrives.
///
/// The terminal take is put back so later readers observe it again. If the
/// consumer goes away before the end, the queue is shut down so producers
/// stop waiting on it.
pub fn from_take_queue<E, A>(queue: Queue<Take<E, A>>) -> RStream<E, A>
where
    E: Clone + Send + Sync + 'static,
    A: Send + 'static,
{
    RStream::from_process(move |scope| {
        let queue = queue.clone();
        let scope = scope.clone();
        stream! {
            let finished = Arc::new(AtomicBool::new(false));
            {
                let queue = queue.clone();
                let finished = Arc::clone(&finished);
                scope.add_finalizer(move |_| async move {
                    if !finished.load(Ordering::SeqCst) {
                        queue.shutdown();
                    }
                });
            }
            loop {
                match queue.take().await {
                    Ok(Take::Chunk(chunk)) => yield Ok(chunk),
                    Ok(Take::End) => {
                        finished.store(true, Ordering::SeqCst);
                        let _ = queue.try_offer(Take::End);
                        break;
                    }
                    Ok(Take::Fail(cause)) => {
                        finished.store(true, Ordering::SeqCst);
                        let _ = queue.try_offer(Take::Fail(cause.clone()));
                        yield Err(cause);
                        break;
                    }
                    Err(_) => {
                        yield Err(Cause::Interrupt);
                        break;
                    }
                }
            }
        }
        .boxed()
    })
}

// ================================
// Stream Extensions
// ================================

pub use crate::rs2_stream_ext::{RS2StreamExt, RS2TryStreamExt};
