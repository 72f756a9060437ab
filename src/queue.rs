//! Concurrent queues for RStream
//!
//! Queues decouple producer and consumer fibers. A bounded queue blocks (or
//! drops, per [`BackpressureStrategy`]) when full, `take` waits when empty.
//! `close` stops new offers but lets takers drain what is left; `shutdown`
//! stops everything at once.

use async_stream::stream;
use futures_util::stream::BoxStream;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc::error::{TryRecvError, TrySendError};
use tokio::sync::{mpsc, Notify};

use crate::stream_configuration::BackpressureStrategy;

/// Error types for Queue operations
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueError {
    /// Queue has been closed or shut down
    QueueClosed,
    /// Queue is full (for bounded queues)
    QueueFull,
    /// Channel disconnected
    ChannelDisconnected,
}

impl fmt::Display for QueueError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QueueError::QueueClosed => write!(f, "Queue is closed"),
            QueueError::QueueFull => write!(f, "Queue is full"),
            QueueError::ChannelDisconnected => write!(f, "Queue channel disconnected"),
        }
    }
}

impl std::error::Error for QueueError {}

const UNBOUNDED_CAPACITY: usize = 1_000_000;

/// Internal queue state
struct QueueState<T> {
    sender: mpsc::Sender<T>,
    capacity: Option<usize>,
    strategy: BackpressureStrategy,
    closed: AtomicBool,
    shutdown: AtomicBool,
    item_count: AtomicUsize,
    close_notify: Notify,
}

/// Concurrent FIFO queue
pub struct Queue<T> {
    state: Arc<QueueState<T>>,
    receiver: Arc<tokio::sync::Mutex<mpsc::Receiver<T>>>,
}

impl<T> Clone for Queue<T> {
    fn clone(&self) -> Self {
        Self {
            state: Arc::clone(&self.state),
            receiver: Arc::clone(&self.receiver),
        }
    }
}

impl<T> Queue<T>
where
    T: Send + 'static,
{
    /// Create a new bounded queue that blocks producers when full
    pub fn bounded(capacity: usize) -> Self {
        Self::with_strategy(Some(capacity), BackpressureStrategy::Block)
    }

    /// Create a new unbounded queue
    pub fn unbounded() -> Self {
        Self::with_strategy(None, BackpressureStrategy::Block)
    }

    /// A bounded queue that evicts the oldest element to make room
    pub fn sliding(capacity: usize) -> Self {
        Self::with_strategy(Some(capacity), BackpressureStrategy::DropOldest)
    }

    /// A bounded queue that discards new elements while full
    pub fn dropping(capacity: usize) -> Self {
        Self::with_strategy(Some(capacity), BackpressureStrategy::DropNewest)
    }

    pub fn with_strategy(capacity: Option<usize>, strategy: BackpressureStrategy) -> Self {
        // Use a very large bounded channel to keep one interface for both cases
        let channel_capacity = capacity.map_or(UNBOUNDED_CAPACITY, |c| c.max(1));
        let (sender, receiver) = mpsc::channel(channel_capacity);
        Self {
            state: Arc::new(QueueState {
                sender,
                capacity: capacity.map(|c| c.max(1)),
                strategy,
                closed: AtomicBool::new(false),
                shutdown: AtomicBool::new(false),
                item_count: AtomicUsize::new(0),
                close_notify: Notify::new(),
            }),
            receiver: Arc::new(tokio::sync::Mutex::new(receiver)),
        }
    }

    /// Offer an item, waiting for space when a blocking queue is full
    pub async fn offer(&self, item: T) -> Result<(), QueueError> {
        if self.is_closed() {
            return Err(QueueError::QueueClosed);
        }
        match self.state.strategy {
            BackpressureStrategy::Block => {
                let sent = tokio::select! {
                    biased;
                    _ = self.wait_closed() => Err(QueueError::QueueClosed),
                    sent = self.state.sender.send(item) => sent.map_err(|_| QueueError::ChannelDisconnected),
                };
                if sent.is_ok() {
                    self.state.item_count.fetch_add(1, Ordering::Relaxed);
                }
                sent
            }
            BackpressureStrategy::DropOldest => self.offer_sliding(item).await,
            BackpressureStrategy::DropNewest | BackpressureStrategy::Error => self.try_offer(item),
        }
    }

    /// Offer an item without waiting
    pub fn try_offer(&self, item: T) -> Result<(), QueueError> {
        if self.is_closed() {
            return Err(QueueError::QueueClosed);
        }
        match self.state.sender.try_send(item) {
            Ok(()) => {
                self.state.item_count.fetch_add(1, Ordering::Relaxed);
                Ok(())
            }
            Err(TrySendError::Full(item)) => match self.state.strategy {
                BackpressureStrategy::DropNewest => {
                    log::trace!("queue full, dropping newest element");
                    Ok(())
                }
                BackpressureStrategy::DropOldest => {
                    if self.evict_oldest() {
                        self.try_offer(item)
                    } else {
                        Err(QueueError::QueueFull)
                    }
                }
                BackpressureStrategy::Block | BackpressureStrategy::Error => Err(QueueError::QueueFull),
            },
            Err(TrySendError::Closed(_)) => Err(QueueError::ChannelDisconnected),
        }
    }

    /// Offer from a thread that is not driven by the tokio runtime.
    ///
    /// Blocks the calling thread while a blocking queue is full. Must not be
    /// called from inside an async task.
    pub fn offer_blocking(&self, item: T) -> Result<(), QueueError> {
        if self.is_closed() {
            return Err(QueueError::QueueClosed);
        }
        match self.state.strategy {
            BackpressureStrategy::Block => {
                self.state
                    .sender
                    .blocking_send(item)
                    .map_err(|_| QueueError::ChannelDisconnected)?;
                self.state.item_count.fetch_add(1, Ordering::Relaxed);
                Ok(())
            }
            _ => self.try_offer(item),
        }
    }

    async fn offer_sliding(&self, mut item: T) -> Result<(), QueueError> {
        loop {
            if self.is_closed() {
                return Err(QueueError::QueueClosed);
            }
            match self.state.sender.try_send(item) {
                Ok(()) => {
                    self.state.item_count.fetch_add(1, Ordering::Relaxed);
                    return Ok(());
                }
                Err(TrySendError::Full(back)) => {
                    item = back;
                    if !self.evict_oldest() {
                        // a taker holds the receiver; it is about to make room
                        tokio::task::yield_now().await;
                    }
                }
                Err(TrySendError::Closed(_)) => return Err(QueueError::ChannelDisconnected),
            }
        }
    }

    fn evict_oldest(&self) -> bool {
        match self.receiver.try_lock() {
            Ok(mut rx) => {
                if rx.try_recv().is_ok() {
                    self.state.item_count.fetch_sub(1, Ordering::Relaxed);
                    log::trace!("queue full, evicted oldest element");
                }
                true
            }
            Err(_) => false,
        }
    }

    /// Take the next item, waiting while the queue is empty.
    ///
    /// After `close` the remaining items are still returned; once they are
    /// gone, and immediately after `shutdown`, this returns `QueueClosed`.
    pub async fn take(&self) -> Result<T, QueueError> {
        let mut rx = tokio::select! {
            biased;
            _ = self.wait_shutdown() => return Err(QueueError::QueueClosed),
            rx = self.receiver.lock() => rx,
        };
        loop {
            if self.is_shutdown() {
                return Err(QueueError::QueueClosed);
            }
            match rx.try_recv() {
                Ok(item) => {
                    self.state.item_count.fetch_sub(1, Ordering::Relaxed);
                    return Ok(item);
                }
                Err(TryRecvError::Disconnected) => return Err(QueueError::ChannelDisconnected),
                Err(TryRecvError::Empty) => {}
            }
            if self.is_closed() {
                return Err(QueueError::QueueClosed);
            }
            tokio::select! {
                biased;
                _ = self.wait_closed() => continue,
                item = rx.recv() => {
                    return match item {
                        Some(item) => {
                            self.state.item_count.fetch_sub(1, Ordering::Relaxed);
                            Ok(item)
                        }
                        None => Err(QueueError::ChannelDisconnected),
                    };
                }
            }
        }
    }

    /// Take an item if one is immediately available
    pub fn poll(&self) -> Option<T> {
        if self.is_shutdown() {
            return None;
        }
        let mut rx = self.receiver.try_lock().ok()?;
        let item = rx.try_recv().ok()?;
        self.state.item_count.fetch_sub(1, Ordering::Relaxed);
        Some(item)
    }

    /// Get a stream for dequeuing items until the queue is closed and drained
    pub fn dequeue(&self) -> BoxStream<'static, T> {
        let queue = self.clone();
        let stream = stream! {
            while let Ok(item) = queue.take().await {
                yield item;
            }
        };
        Box::pin(stream)
    }

    /// Close the queue, preventing further offers but allowing existing items to be consumed
    pub fn close(&self) {
        if !self.state.closed.swap(true, Ordering::AcqRel) {
            log::trace!("queue closed");
        }
        self.state.close_notify.notify_waiters();
    }

    /// Shut the queue down: pending and future offers and takes all fail
    pub fn shutdown(&self) {
        self.state.shutdown.store(true, Ordering::Release);
        self.close();
    }

    /// Check if the queue is closed
    pub fn is_closed(&self) -> bool {
        self.state.closed.load(Ordering::Acquire)
    }

    pub fn is_shutdown(&self) -> bool {
        self.state.shutdown.load(Ordering::Acquire)
    }

    async fn wait_closed(&self) {
        loop {
            let notified = self.state.close_notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.is_closed() {
                return;
            }
            notified.await;
        }
    }

    async fn wait_shutdown(&self) {
        loop {
            let notified = self.state.close_notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.is_shutdown() {
                return;
            }
            notified.await;
        }
    }

    /// Get the capacity of the queue (None for unbounded)
    pub fn capacity(&self) -> Option<usize> {
        self.state.capacity
    }

    /// Get the current number of items in the queue
    pub fn size(&self) -> usize {
        if let Ok(rx) = self.receiver.try_lock() {
            rx.len()
        } else {
            // Fallback to atomic counter (may have slight race conditions)
            self.state.item_count.load(Ordering::Relaxed)
        }
    }

    pub fn is_empty(&self) -> bool {
        self.size() == 0
    }

    /// Drain all immediately available items
    pub async fn take_all(&self) -> Vec<T> {
        let mut items = Vec::new();
        let mut rx = self.receiver.lock().await;

        while let Ok(item) = rx.try_recv() {
            self.state.item_count.fetch_sub(1, Ordering::Relaxed);
            items.push(item);
        }

        items
    }

    /// Get queue statistics for monitoring
    pub fn stats(&self) -> QueueStats {
        let length = self.size();
        let capacity = self.capacity();
        let utilization = match capacity {
            Some(cap) if cap > 0 => length as f64 / cap as f64,
            _ => 0.0,
        };

        QueueStats {
            length,
            capacity,
            utilization,
            is_closed: self.is_closed(),
        }
    }
}

/// Queue statistics for monitoring and debugging
#[derive(Debug, Clone)]
pub struct QueueStats {
    pub length: usize,
    pub capacity: Option<usize>,
    pub utilization: f64, // 0.0 to 1.0 for bounded queues
    pub is_closed: bool,
}

impl fmt::Display for QueueStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.capacity {
            Some(cap) => write!(
                f,
                "Queue({}/{}, {:.1}%{})",
                self.length,
                cap,
                self.utilization * 100.0,
                if self.is_closed { ", closed" } else { "" }
            ),
            None => write!(
                f,
                "Queue({}, unbounded{})",
                self.length,
                if self.is_closed { ", closed" } else { "" }
            ),
        }
    }
}

impl<T> fmt::Debug for Queue<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let current_len = self.state.item_count.load(Ordering::Relaxed);
        f.debug_struct("Queue")
            .field("capacity", &self.state.capacity)
            .field("strategy", &self.state.strategy)
            .field("length", &current_len)
            .field("is_closed", &self.state.closed.load(Ordering::Acquire))
            .field("is_shutdown", &self.state.shutdown.load(Ordering::Acquire))
            .finish()
    }
}
