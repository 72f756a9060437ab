//! Bridging callback-based sources into RStream
//!
//! A registration function receives an [`Emit`] handle that can be called
//! from any thread or task, any number of times. Chunks go through a bounded
//! queue; the end or failure goes through a promise and is delivered after
//! the chunks emitted before it.

use async_stream::stream;
use futures::future::{self, BoxFuture, Either};
use futures::FutureExt;
use futures_util::stream::StreamExt;
use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::buffer::deliver;
use crate::chunk::Chunk;
use crate::error::{catch_defect, Cause, Defect};
use crate::promise::Promise;
use crate::queue::{Queue, QueueError};
use crate::rs2::RStream;

/// Handle for pushing values into a stream built by [`effect_async`]
pub struct Emit<E, A> {
    queue: Queue<Chunk<A>>,
    terminal: Promise<Option<Cause<E>>>,
    gate: Arc<Mutex<Gate<E>>>,
}

/// Offers in progress, and the terminal signal held back until they settle
struct Gate<E> {
    open: bool,
    in_flight: usize,
    held: Option<Option<Cause<E>>>,
}

/// Marks one offer in progress; the last one out publishes a held terminal
struct InFlight<'a, E, A>
where
    E: Clone + Send + Sync + 'static,
{
    emit: &'a Emit<E, A>,
}

impl<E, A> Drop for InFlight<'_, E, A>
where
    E: Clone + Send + Sync + 'static,
{
    fn drop(&mut self) {
        let held = {
            let mut gate = self.emit.gate();
            gate.in_flight -= 1;
            if gate.in_flight == 0 {
                gate.held.take()
            } else {
                None
            }
        };
        if let Some(cause) = held {
            self.emit.terminal.complete(cause);
        }
    }
}

impl<E, A> Clone for Emit<E, A> {
    fn clone(&self) -> Self {
        Self {
            queue: self.queue.clone(),
            terminal: self.terminal.clone(),
            gate: Arc::clone(&self.gate),
        }
    }
}

impl<E, A> Emit<E, A> {
    fn gate(&self) -> MutexGuard<'_, Gate<E>> {
        self.gate.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<E, A> Emit<E, A>
where
    E: Clone + Send + Sync + 'static,
    A: Send + 'static,
{
    fn channel(buffer: usize) -> Self {
        Self {
            queue: Queue::bounded(buffer.max(1)),
            terminal: Promise::new(),
            gate: Arc::new(Mutex::new(Gate {
                open: true,
                in_flight: 0,
                held: None,
            })),
        }
    }

    /// `Ok(chunk)` emits, `Err(Some(e))` fails, `Err(None)` ends the stream
    pub fn emit(&self, value: Result<Chunk<A>, Option<E>>) -> Result<(), QueueError> {
        match value {
            Ok(chunk) => self.chunk(chunk),
            Err(Some(error)) => self.signal(Cause::Fail(error)),
            Err(None) => self.finish(None),
        }
    }

    pub fn single(&self, value: A) -> Result<(), QueueError> {
        self.chunk(Chunk::single(value))
    }

    /// Emit without waiting; rejected with `QueueFull` while the consumer is behind
    pub fn chunk(&self, chunk: Chunk<A>) -> Result<(), QueueError> {
        let _offer = self.enter()?;
        if chunk.is_empty() {
            return Ok(());
        }
        self.queue.try_offer(chunk)
    }

    /// Emit, waiting for room in the buffer.
    ///
    /// An `end` or failure signalled meanwhile is delivered after this chunk.
    pub async fn emit_async(&self, chunk: Chunk<A>) -> Result<(), QueueError> {
        let _offer = self.enter()?;
        self.queue.offer(chunk).await
    }

    /// Emit from a thread outside the runtime, blocking it while the buffer is full
    pub fn emit_blocking(&self, chunk: Chunk<A>) -> Result<(), QueueError> {
        let _offer = self.enter()?;
        self.queue.offer_blocking(chunk)
    }

    pub fn fail(&self, error: E) -> Result<(), QueueError> {
        self.signal(Cause::Fail(error))
    }

    pub fn die(&self, message: impl Into<String>) -> Result<(), QueueError> {
        self.signal(Cause::Die(Defect::new(message)))
    }

    pub fn end(&self) -> Result<(), QueueError> {
        self.finish(None)
    }

    pub fn is_done(&self) -> bool {
        self.has_ended() || self.queue.is_shutdown()
    }

    fn has_ended(&self) -> bool {
        !self.gate().open || self.terminal.is_done()
    }

    fn enter(&self) -> Result<InFlight<'_, E, A>, QueueError> {
        let mut gate = self.gate();
        if !gate.open || self.terminal.is_done() {
            return Err(QueueError::QueueClosed);
        }
        gate.in_flight += 1;
        Ok(InFlight { emit: self })
    }

    fn signal(&self, cause: Cause<E>) -> Result<(), QueueError> {
        self.finish(Some(cause))
    }

    fn finish(&self, cause: Option<Cause<E>>) -> Result<(), QueueError> {
        let ready = {
            let mut gate = self.gate();
            if !gate.open {
                return Err(QueueError::QueueClosed);
            }
            gate.open = false;
            if gate.in_flight == 0 {
                Some(cause)
            } else {
                gate.held = Some(cause);
                None
            }
        };
        match ready {
            Some(cause) => {
                if !self.terminal.complete(cause) {
                    Err(QueueError::QueueClosed)
                } else {
                    Ok(())
                }
            }
            None => Ok(()),
        }
    }
}

impl<E, A> fmt::Debug for Emit<E, A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Emit").field("queue", &self.queue).finish()
    }
}

/// Cleanup run when the consumer goes away before the source has finished
pub struct Canceler {
    cancel: Box<dyn FnOnce() -> BoxFuture<'static, ()> + Send>,
}

impl Canceler {
    pub fn new<F, Fut>(cancel: F) -> Self
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        Self {
            cancel: Box::new(move || cancel().boxed()),
        }
    }

    pub async fn cancel(self) {
        (self.cancel)().await
    }
}

impl fmt::Debug for Canceler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Canceler")
    }
}

enum Registration<E, A> {
    Listening(Option<Canceler>),
    Ready(RStream<E, A>),
    Failed(Cause<E>),
}

fn bridge<E, A, R>(buffer: usize, register: R) -> RStream<E, A>
where
    E: Clone + Send + Sync + 'static,
    A: Send + 'static,
    R: Fn(Emit<E, A>) -> BoxFuture<'static, Registration<E, A>> + Send + Sync + 'static,
{
    let register = Arc::new(register);
    RStream::from_process(move |scope| {
        let register = Arc::clone(&register);
        let scope = scope.clone();
        stream! {
            let emit = Emit::channel(buffer);
            let registration = match catch_defect(|| register(emit.clone())) {
                Ok(pending) => AssertUnwindSafe(pending)
                    .catch_unwind()
                    .await
                    .unwrap_or_else(|panic| Registration::Failed(Cause::Die(Defect::from_panic(panic)))),
                Err(defect) => Registration::Failed(Cause::Die(defect)),
            };
            match registration {
                Registration::Failed(cause) => yield Err(cause),
                Registration::Ready(ready) => {
                    let mut inner = ready.open_stream(&scope);
                    while let Some(item) = inner.next().await {
                        yield item;
                    }
                }
                Registration::Listening(canceler) => {
                    {
                        let emit = emit.clone();
                        scope.add_finalizer(move |_| async move {
                            emit.queue.shutdown();
                            if let Some(canceler) = canceler {
                                if !emit.has_ended() {
                                    log::debug!("async source abandoned by its consumer, cancelling");
                                    canceler.cancel().await;
                                }
                            }
                        });
                    }
                    let mut inner = deliver(emit.queue.clone(), emit.terminal.clone());
                    while let Some(item) = inner.next().await {
                        yield item;
                    }
                }
            }
        }
        .boxed()
    })
}

/// A stream fed by a callback registered with `register`.
///
/// `buffer` is the number of chunks that can be waiting before non-blocking
/// emits are rejected.
pub fn effect_async<E, A, F>(register: F, buffer: usize) -> RStream<E, A>
where
    E: Clone + Send + Sync + 'static,
    A: Send + 'static,
    F: Fn(Emit<E, A>) + Send + Sync + 'static,
{
    bridge(buffer, move |emit| {
        register(emit);
        future::ready(Registration::Listening(None)).boxed()
    })
}

/// Like [`effect_async`], but registration may hand back a ready-made stream
pub fn effect_async_maybe<E, A, F>(register: F, buffer: usize) -> RStream<E, A>
where
    E: Clone + Send + Sync + 'static,
    A: Send + 'static,
    F: Fn(Emit<E, A>) -> Option<RStream<E, A>> + Send + Sync + 'static,
{
    bridge(buffer, move |emit| {
        let registration = match register(emit) {
            Some(ready) => Registration::Ready(ready),
            None => Registration::Listening(None),
        };
        future::ready(registration).boxed()
    })
}

/// Like [`effect_async`] with an effectful registration that can fail
pub fn effect_async_m<E, A, F, Fut>(register: F, buffer: usize) -> RStream<E, A>
where
    E: Clone + Send + Sync + 'static,
    A: Send + 'static,
    F: Fn(Emit<E, A>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), E>> + Send + 'static,
{
    bridge(buffer, move |emit| {
        let registered = register(emit);
        async move {
            match registered.await {
                Ok(()) => Registration::Listening(None),
                Err(error) => Registration::Failed(Cause::Fail(error)),
            }
        }
        .boxed()
    })
}

/// Like [`effect_async`]; the registration returns either a [`Canceler`],
/// run if the consumer stops before the source ends, or a ready-made stream
pub fn effect_async_interrupt<E, A, F>(register: F, buffer: usize) -> RStream<E, A>
where
    E: Clone + Send + Sync + 'static,
    A: Send + 'static,
    F: Fn(Emit<E, A>) -> Either<Canceler, RStream<E, A>> + Send + Sync + 'static,
{
    bridge(buffer, move |emit| {
        let registration = match register(emit) {
            Either::Left(canceler) => Registration::Listening(Some(canceler)),
            Either::Right(ready) => Registration::Ready(ready),
        };
        future::ready(registration).boxed()
    })
}
