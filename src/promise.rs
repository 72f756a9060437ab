//! One-shot promises
//!
//! A [`Promise`] is completed at most once and can be awaited by any number of
//! waiters. It is the signalling primitive behind fiber exits, failure
//! propagation in the parallel combinators and terminal delivery in buffers.

use std::fmt;
use std::sync::Arc;

use tokio::sync::watch;

/// A write-once cell that many tasks can wait on
pub struct Promise<T> {
    slot: Arc<watch::Sender<Option<T>>>,
}

impl<T> Clone for Promise<T> {
    fn clone(&self) -> Self {
        Self {
            slot: Arc::clone(&self.slot),
        }
    }
}

impl<T> Promise<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        let (slot, _) = watch::channel(None);
        Self {
            slot: Arc::new(slot),
        }
    }

    /// Complete the promise. Returns `false` if it was already completed.
    pub fn complete(&self, value: T) -> bool {
        let mut won = false;
        self.slot.send_if_modified(|slot| {
            if slot.is_none() {
                *slot = Some(value);
                won = true;
                true
            } else {
                false
            }
        });
        won
    }

    pub fn is_done(&self) -> bool {
        self.slot.borrow().is_some()
    }

    /// The value, if the promise has been completed
    pub fn poll(&self) -> Option<T> {
        self.slot.borrow().clone()
    }

    /// Wait until the promise is completed
    pub async fn wait(&self) -> T {
        let mut rx = self.slot.subscribe();
        loop {
            let current = rx.borrow_and_update().clone();
            if let Some(value) = current {
                return value;
            }
            // The sender lives in `self`, so `changed` only errors if the
            // promise itself is gone.
            if rx.changed().await.is_err() {
                std::future::pending::<()>().await;
            }
        }
    }
}

impl<T> Default for Promise<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for Promise<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Promise")
            .field("done", &self.slot.borrow().is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn first_completion_wins() {
        let p = Promise::new();
        assert!(p.complete(1));
        assert!(!p.complete(2));
        assert_eq!(p.wait().await, 1);
        assert_eq!(p.poll(), Some(1));
    }

    #[tokio::test]
    async fn waiters_wake_on_completion() {
        let p: Promise<&'static str> = Promise::new();
        let waiter = {
            let p = p.clone();
            tokio::spawn(async move { p.wait().await })
        };
        tokio::task::yield_now().await;
        p.complete("done");
        assert_eq!(waiter.await.unwrap(), "done");
    }
}
