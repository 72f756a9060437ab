//! Fibers: cancellable units of concurrent work
//!
//! A [`Fiber`] is a tokio task with its own [`Scope`]. Forking registers the
//! fiber with the parent scope, so closing the parent interrupts the fiber and
//! waits for the fiber's own finalizers. Interruption drops the running body,
//! closes the fiber scope with [`ExitCase::Interrupted`] and only then reports
//! the fiber as done.
//!
//! While a fiber runs, its scope is installed as the ambient scope: stream runs
//! started inside the fiber (`run_collect`, `run_drain`, ...) open their root
//! scope beneath it.

use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};

use futures::FutureExt;

use crate::error::Defect;
use crate::promise::Promise;
use crate::scope::{ExitCase, Scope};

tokio::task_local! {
    static CURRENT_SCOPE: Scope;
}

/// The scope of the fiber currently running, if any
pub fn current_scope() -> Option<Scope> {
    CURRENT_SCOPE.try_with(|scope| scope.clone()).ok()
}

/// A fresh scope beneath the ambient fiber scope, or a detached root scope
pub(crate) fn root_scope() -> Scope {
    current_scope().map_or_else(Scope::new, |scope| scope.fork())
}

static NEXT_FIBER_ID: AtomicU64 = AtomicU64::new(0);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FiberId(u64);

impl fmt::Display for FiberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// How a fiber finished
#[derive(Debug, Clone, PartialEq)]
pub enum FiberExit<T> {
    Completed(T),
    Died(Defect),
    Interrupted,
}

impl<T> FiberExit<T> {
    pub fn exit_case(&self) -> ExitCase {
        match self {
            FiberExit::Completed(_) => ExitCase::Completed,
            FiberExit::Died(_) => ExitCase::Errored,
            FiberExit::Interrupted => ExitCase::Interrupted,
        }
    }

    pub fn completed(self) -> Option<T> {
        match self {
            FiberExit::Completed(value) => Some(value),
            _ => None,
        }
    }

    pub fn is_interrupted(&self) -> bool {
        matches!(self, FiberExit::Interrupted)
    }
}

/// Handle to a forked fiber
pub struct Fiber<T> {
    id: FiberId,
    interrupt: Promise<()>,
    exit: Promise<FiberExit<T>>,
}

impl<T> Clone for Fiber<T> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            interrupt: self.interrupt.clone(),
            exit: self.exit.clone(),
        }
    }
}

impl<T> Fiber<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Fork `body` onto the runtime, bounded by `parent`.
    ///
    /// The body receives the fiber's own scope. Panics in the body are caught
    /// and reported as [`FiberExit::Died`].
    pub fn fork<F, Fut>(parent: &Scope, body: F) -> Fiber<T>
    where
        F: FnOnce(Scope) -> Fut + Send + 'static,
        Fut: Future<Output = T> + Send + 'static,
    {
        let fiber = Fiber {
            id: FiberId(NEXT_FIBER_ID.fetch_add(1, Ordering::Relaxed)),
            interrupt: Promise::new(),
            exit: Promise::new(),
        };
        let handle = fiber.clone();
        let key = parent.add_finalizer(move |_| async move {
            handle.interrupt().await;
        });
        let parent = parent.downgrade();
        let task = fiber.clone();
        log::trace!("forking fiber {}", fiber.id);

        tokio::spawn(async move {
            let scope = Scope::new();
            let body = CURRENT_SCOPE.scope(
                scope.clone(),
                AssertUnwindSafe(body(scope.clone())).catch_unwind(),
            );
            let exit = tokio::select! {
                biased;
                _ = task.interrupt.wait() => FiberExit::Interrupted,
                outcome = body => match outcome {
                    Ok(value) => FiberExit::Completed(value),
                    Err(panic) => {
                        let defect = Defect::from_panic(panic);
                        log::warn!("fiber {} died: {}", task.id, defect.message());
                        FiberExit::Died(defect)
                    }
                },
            };
            scope.close(exit.exit_case()).await;
            if let (Some(parent), Some(key)) = (parent.upgrade(), key) {
                parent.forget(key);
            }
            log::trace!("fiber {} done ({:?})", task.id, exit.exit_case());
            task.exit.complete(exit);
        });

        fiber
    }

    pub fn id(&self) -> FiberId {
        self.id
    }

    /// Wait for the fiber to finish
    pub async fn join(&self) -> FiberExit<T> {
        self.exit.wait().await
    }

    /// Interrupt the fiber and wait until its finalizers have run
    pub async fn interrupt(&self) -> FiberExit<T> {
        if self.interrupt.complete(()) {
            log::trace!("interrupting fiber {}", self.id);
        }
        self.exit.wait().await
    }

    pub fn poll(&self) -> Option<FiberExit<T>> {
        self.exit.poll()
    }

    pub fn is_done(&self) -> bool {
        self.exit.is_done()
    }
}

impl<T> fmt::Debug for Fiber<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Fiber").field("id", &self.id).finish()
    }
}
