//! Bounded-concurrency combinators for RStream
//!
//! Each combinator here runs its sources in fibers forked from the scope the
//! stream is opened in. Output travels through a bounded queue of [`Take`]
//! values. The first failure is recorded in a promise that the consumer
//! watches with priority: it interrupts every running fiber, waits for their
//! finalizers, and only then surfaces the failure.

use async_stream::stream;
use futures::future;
use futures_util::stream::StreamExt;
use std::collections::VecDeque;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::Semaphore;

use crate::error::{catch_defect, Cause};
use crate::fiber::Fiber;
use crate::promise::Promise;
use crate::pull::{ChunkStream, Take};
use crate::queue::Queue;
use crate::rs2::RStream;
use crate::scope::Scope;
use crate::stream_configuration::StreamConfig;
use futures::future::Either;

/// When a merged stream ends
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MergeStrategy {
    /// When both sides have ended
    #[default]
    Both,
    /// When the left side ends
    Left,
    /// When the right side ends
    Right,
    /// When either side ends
    Either,
}

/// Fork `driver` in `scope` and deliver what it offers to its output queue.
///
/// The driver reports failures through the promise; it offers `Take::End`
/// once everything it started has finished.
fn run_driven<E, B, D, Fut>(scope: &Scope, buffer: usize, driver: D) -> ChunkStream<E, B>
where
    E: Clone + Send + Sync + 'static,
    B: Send + 'static,
    D: FnOnce(Scope, Queue<Take<E, B>>, Promise<Cause<E>>) -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    let scope = scope.clone();
    stream! {
        let out: Queue<Take<E, B>> = Queue::bounded(buffer.max(1));
        let failure: Promise<Cause<E>> = Promise::new();
        let fiber = {
            let out = out.clone();
            let failure = failure.clone();
            Fiber::fork(&scope, move |driver_scope| driver(driver_scope, out, failure))
        };
        loop {
            let next = tokio::select! {
                biased;
                cause = failure.wait() => Err(cause),
                take = out.take() => Ok(take),
            };
            match next {
                Ok(Ok(Take::Chunk(chunk))) => yield Ok(chunk),
                Ok(Ok(Take::End)) => {
                    fiber.join().await;
                    break;
                }
                Ok(Ok(Take::Fail(cause))) | Err(cause) => {
                    log::debug!("concurrent stream failed, interrupting fiber {}", fiber.id());
                    fiber.interrupt().await;
                    yield Err(cause);
                    break;
                }
                Ok(Err(_)) => {
                    fiber.interrupt().await;
                    yield Err(Cause::Interrupt);
                    break;
                }
            }
        }
        out.shutdown();
    }
    .boxed()
}

/// Drain `stream` into `out`, recording a failure in `failure`
async fn forward<E, B>(stream: RStream<E, B>, scope: Scope, out: Queue<Take<E, B>>, failure: Promise<Cause<E>>)
where
    E: Clone + Send + Sync + 'static,
    B: Send + 'static,
{
    let mut pull = stream.open(&scope);
    loop {
        match pull.pull().await {
            Take::Chunk(chunk) => {
                if out.offer(Take::Chunk(chunk)).await.is_err() {
                    break;
                }
            }
            Take::End => break,
            Take::Fail(cause) => {
                failure.complete(cause);
                break;
            }
        }
    }
}

/// Wait for `fibers`, then signal the end; a failure cuts the wait short
async fn join_then_end<'a, E, B, I>(fibers: I, out: &Queue<Take<E, B>>, failure: &Promise<Cause<E>>)
where
    E: Clone + Send + Sync + 'static,
    B: Send + 'static,
    I: IntoIterator<Item = &'a Fiber<()>>,
{
    let all = future::join_all(fibers.into_iter().map(|fiber| fiber.join()));
    tokio::select! {
        biased;
        _ = failure.wait() => {}
        _ = all => {
            let _ = out.offer(Take::End).await;
        }
    }
}

async fn drive_par<E, A, B, F>(
    upstream: RStream<E, A>,
    scope: Scope,
    n: usize,
    f: Arc<F>,
    out: Queue<Take<E, B>>,
    failure: Promise<Cause<E>>,
) where
    E: Clone + Send + Sync + 'static,
    A: Send + 'static,
    B: Send + 'static,
    F: Fn(A) -> RStream<E, B> + Send + Sync + 'static,
{
    let permits = Arc::new(Semaphore::new(n));
    let mut pull = upstream.open(&scope);
    let mut running: Vec<Fiber<()>> = Vec::new();
    loop {
        let take = tokio::select! {
            biased;
            _ = failure.wait() => return,
            take = pull.pull() => take,
        };
        let chunk = match take {
            Take::Chunk(chunk) => chunk,
            Take::End => break,
            Take::Fail(cause) => {
                failure.complete(cause);
                return;
            }
        };
        for a in chunk {
            let permit = tokio::select! {
                biased;
                _ = failure.wait() => return,
                permit = Arc::clone(&permits).acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => return,
                },
            };
            let inner = match catch_defect(|| f(a)) {
                Ok(inner) => inner,
                Err(defect) => {
                    failure.complete(Cause::Die(defect));
                    return;
                }
            };
            running.retain(|fiber| !fiber.is_done());
            let out = out.clone();
            let failure = failure.clone();
            running.push(Fiber::fork(&scope, move |inner_scope| async move {
                // registered first, so released after everything the inner stream acquires
                inner_scope.add_finalizer(move |_| async move { drop(permit) });
                forward(inner, inner_scope, out, failure).await
            }));
        }
    }
    join_then_end(&running, &out, &failure).await;
}

async fn drive_switch<E, A, B, F>(
    upstream: RStream<E, A>,
    scope: Scope,
    n: usize,
    f: Arc<F>,
    out: Queue<Take<E, B>>,
    failure: Promise<Cause<E>>,
) where
    E: Clone + Send + Sync + 'static,
    A: Send + 'static,
    B: Send + 'static,
    F: Fn(A) -> RStream<E, B> + Send + Sync + 'static,
{
    let mut pull = upstream.open(&scope);
    let mut active: VecDeque<Fiber<()>> = VecDeque::new();
    loop {
        let take = tokio::select! {
            biased;
            _ = failure.wait() => return,
            take = pull.pull() => take,
        };
        let chunk = match take {
            Take::Chunk(chunk) => chunk,
            Take::End => break,
            Take::Fail(cause) => {
                failure.complete(cause);
                return;
            }
        };
        for a in chunk {
            active.retain(|fiber| !fiber.is_done());
            while active.len() >= n {
                match active.pop_front() {
                    Some(oldest) => {
                        log::trace!("switching away from fiber {}", oldest.id());
                        oldest.interrupt().await;
                    }
                    None => break,
                }
            }
            let inner = match catch_defect(|| f(a)) {
                Ok(inner) => inner,
                Err(defect) => {
                    failure.complete(Cause::Die(defect));
                    return;
                }
            };
            let out = out.clone();
            let failure = failure.clone();
            active.push_back(Fiber::fork(&scope, move |inner_scope| {
                forward(inner, inner_scope, out, failure)
            }));
        }
    }
    join_then_end(&active, &out, &failure).await;
}

async fn drive_merge<E, C>(
    left: RStream<E, C>,
    right: RStream<E, C>,
    strategy: MergeStrategy,
    scope: Scope,
    out: Queue<Take<E, C>>,
    failure: Promise<Cause<E>>,
) where
    E: Clone + Send + Sync + 'static,
    C: Send + 'static,
{
    let side = |stream: RStream<E, C>| {
        let out = out.clone();
        let failure = failure.clone();
        Fiber::fork(&scope, move |side_scope| forward(stream, side_scope, out, failure))
    };
    let l = side(left);
    let r = side(right);
    let finished = async {
        match strategy {
            MergeStrategy::Both => {
                future::join(l.join(), r.join()).await;
            }
            MergeStrategy::Left => {
                l.join().await;
            }
            MergeStrategy::Right => {
                r.join().await;
            }
            MergeStrategy::Either => {
                tokio::select! {
                    _ = l.join() => {}
                    _ = r.join() => {}
                }
            }
        }
    };
    tokio::select! {
        biased;
        _ = failure.wait() => return,
        _ = finished => {}
    }
    future::join(l.interrupt(), r.interrupt()).await;
    let _ = out.offer(Take::End).await;
}

impl<E, A> RStream<E, A>
where
    E: Clone + Send + Sync + 'static,
    A: Send + 'static,
{
    /// Run up to `n` inner streams at once, interleaving their output.
    ///
    /// With `n == 1` the output is exactly that of [`flat_map`](Self::flat_map).
    pub fn flat_map_par<B, F>(self, n: usize, f: F) -> RStream<E, B>
    where
        B: Send + 'static,
        F: Fn(A) -> RStream<E, B> + Send + Sync + 'static,
    {
        let buffer = StreamConfig::global().output_buffer;
        self.flat_map_par_buffer(n, buffer, f)
    }

    /// `flat_map_par` with the configured `max_concurrency`
    pub fn flat_map_par_default<B, F>(self, f: F) -> RStream<E, B>
    where
        B: Send + 'static,
        F: Fn(A) -> RStream<E, B> + Send + Sync + 'static,
    {
        let n = StreamConfig::global().max_concurrency;
        self.flat_map_par(n, f)
    }

    pub fn flat_map_par_buffer<B, F>(self, n: usize, buffer: usize, f: F) -> RStream<E, B>
    where
        B: Send + 'static,
        F: Fn(A) -> RStream<E, B> + Send + Sync + 'static,
    {
        let n = n.clamp(1, Semaphore::MAX_PERMITS);
        let f = Arc::new(f);
        RStream::from_process(move |scope| {
            let upstream = self.clone();
            let f = Arc::clone(&f);
            run_driven(scope, buffer, move |driver_scope, out, failure| {
                drive_par(upstream, driver_scope, n, f, out, failure)
            })
        })
    }

    /// Like `flat_map_par`, but when `n` inner streams are running a new
    /// element interrupts the oldest one first
    pub fn flat_map_par_switch<B, F>(self, n: usize, f: F) -> RStream<E, B>
    where
        B: Send + 'static,
        F: Fn(A) -> RStream<E, B> + Send + Sync + 'static,
    {
        let n = n.max(1);
        let buffer = StreamConfig::global().output_buffer;
        let f = Arc::new(f);
        RStream::from_process(move |scope| {
            let upstream = self.clone();
            let f = Arc::clone(&f);
            run_driven(scope, buffer, move |driver_scope, out, failure| {
                drive_switch(upstream, driver_scope, n, f, out, failure)
            })
        })
    }

    // ================================
    // Merging
    // ================================

    fn merge_sides(self, that: RStream<E, A>, strategy: MergeStrategy) -> RStream<E, A> {
        let buffer = StreamConfig::global().output_buffer;
        RStream::from_process(move |scope| {
            let left = self.clone();
            let right = that.clone();
            run_driven(scope, buffer, move |driver_scope, out, failure| {
                drive_merge(left, right, strategy, driver_scope, out, failure)
            })
        })
    }

    /// Run both streams concurrently, mapping each side into a common type
    pub fn merge_with<B, C, L, R>(
        self,
        that: RStream<E, B>,
        strategy: MergeStrategy,
        on_left: L,
        on_right: R,
    ) -> RStream<E, C>
    where
        B: Send + 'static,
        C: Send + 'static,
        L: Fn(A) -> C + Send + Sync + 'static,
        R: Fn(B) -> C + Send + Sync + 'static,
    {
        self.map(on_left).merge_sides(that.map(on_right), strategy)
    }

    pub fn merge(self, that: RStream<E, A>) -> RStream<E, A> {
        self.merge_sides(that, MergeStrategy::Both)
    }

    pub fn merge_either<B>(self, that: RStream<E, B>) -> RStream<E, Either<A, B>>
    where
        B: Send + 'static,
    {
        self.merge_with(that, MergeStrategy::Both, Either::Left, Either::Right)
    }

    pub fn merge_terminate_left(self, that: RStream<E, A>) -> RStream<E, A> {
        self.merge_sides(that, MergeStrategy::Left)
    }

    pub fn merge_terminate_right(self, that: RStream<E, A>) -> RStream<E, A> {
        self.merge_sides(that, MergeStrategy::Right)
    }

    pub fn merge_terminate_either(self, that: RStream<E, A>) -> RStream<E, A> {
        self.merge_sides(that, MergeStrategy::Either)
    }
}
