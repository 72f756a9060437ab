//! Decoupling producer and consumer through a queue
//!
//! The producer runs ahead in a fiber, bounded by the queue's capacity and
//! strategy. The end or failure of the producer travels separately through a
//! promise, so it is never dropped by a sliding or dropping queue and never
//! waits behind a full one; the consumer delivers it after the chunks that
//! were queued before it.

use async_stream::stream;
use futures::future::Either;
use futures_util::stream::StreamExt;

use crate::chunk::Chunk;
use crate::error::Cause;
use crate::fiber::Fiber;
use crate::promise::Promise;
use crate::pull::{ChunkStream, Take};
use crate::queue::{Queue, QueueError};
use crate::rs2::RStream;
use crate::stream_configuration::{BackpressureStrategy, BufferConfig, StreamConfig};

/// Deliver queued chunks, then the terminal signal once it is set
pub(crate) fn deliver<E, A>(queue: Queue<Chunk<A>>, terminal: Promise<Option<Cause<E>>>) -> ChunkStream<E, A>
where
    E: Clone + Send + Sync + 'static,
    A: Send + 'static,
{
    stream! {
        loop {
            let next = tokio::select! {
                biased;
                chunk = queue.take() => Either::Left(chunk),
                cause = terminal.wait() => Either::Right(cause),
            };
            match next {
                Either::Left(Ok(chunk)) => yield Ok(chunk),
                Either::Left(Err(_)) => {
                    yield Err(Cause::Interrupt);
                    break;
                }
                Either::Right(cause) => {
                    while let Some(chunk) = queue.poll() {
                        yield Ok(chunk);
                    }
                    if let Some(cause) = cause {
                        yield Err(cause);
                    }
                    break;
                }
            }
        }
    }
    .boxed()
}

impl<E, A> RStream<E, A>
where
    E: Clone + Send + Sync + 'static,
    A: Send + 'static,
{
    /// Let upstream run ahead of the consumer as `config` allows.
    ///
    /// Capacity counts chunks. With [`BackpressureStrategy::Error`] a full
    /// buffer fails the stream with a defect.
    pub fn buffer_with(self, config: BufferConfig) -> RStream<E, A> {
        RStream::from_process(move |scope| {
            let upstream = self.clone();
            let config = config.clone();
            let scope = scope.clone();
            stream! {
                let queue: Queue<Chunk<A>> = Queue::with_strategy(config.capacity, config.strategy);
                let terminal: Promise<Option<Cause<E>>> = Promise::new();
                {
                    let queue = queue.clone();
                    let terminal = terminal.clone();
                    Fiber::fork(&scope, move |own| async move {
                        let mut pull = upstream.open(&own);
                        loop {
                            match pull.pull().await {
                                Take::Chunk(chunk) => match queue.offer(chunk).await {
                                    Ok(()) => {}
                                    Err(QueueError::QueueFull) => {
                                        log::warn!("buffer full ({:?})", queue.stats());
                                        terminal.complete(Some(Cause::die("buffer overflow")));
                                        break;
                                    }
                                    Err(_) => break,
                                },
                                Take::End => {
                                    terminal.complete(None);
                                    break;
                                }
                                Take::Fail(cause) => {
                                    terminal.complete(Some(cause));
                                    break;
                                }
                            }
                        }
                    });
                }
                let mut delivered = deliver(queue.clone(), terminal);
                while let Some(item) = delivered.next().await {
                    yield item;
                }
                queue.shutdown();
            }
            .boxed()
        })
    }

    /// Buffer up to `capacity` chunks, holding upstream back when full
    pub fn buffer(self, capacity: usize) -> RStream<E, A> {
        self.buffer_with(BufferConfig {
            capacity: Some(capacity),
            strategy: BackpressureStrategy::Block,
        })
    }

    /// Buffer with the configured defaults
    pub fn buffer_default(self) -> RStream<E, A> {
        self.buffer_with(StreamConfig::global().buffer)
    }

    pub fn buffer_unbounded(self) -> RStream<E, A> {
        self.buffer_with(BufferConfig {
            capacity: None,
            strategy: BackpressureStrategy::Block,
        })
    }

    /// Keep the newest `capacity` chunks when the consumer falls behind
    pub fn buffer_sliding(self, capacity: usize) -> RStream<E, A> {
        self.buffer_with(BufferConfig {
            capacity: Some(capacity),
            strategy: BackpressureStrategy::DropOldest,
        })
    }

    /// Keep the oldest `capacity` chunks when the consumer falls behind
    pub fn buffer_dropping(self, capacity: usize) -> RStream<E, A> {
        self.buffer_with(BufferConfig {
            capacity: Some(capacity),
            strategy: BackpressureStrategy::DropNewest,
        })
    }
}
