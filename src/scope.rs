//! Scopes: LIFO resource lifetimes
//!
//! A [`Scope`] owns finalizers in acquisition order and runs them in reverse
//! order exactly once when it is closed, whatever the reason for closing.
//! Child scopes created with [`Scope::fork`] are closed with their parent and
//! detach themselves from it when they are closed first.
//!
//! If the last handle to an open scope is dropped (the future driving a stream
//! was cancelled), the pending finalizers are spawned on the current runtime
//! with [`ExitCase::Interrupted`].

use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use futures::future::BoxFuture;
use futures::FutureExt;

use crate::error::{Cause, Defect};
use crate::promise::Promise;

/// How a scope was closed; handed to every finalizer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExitCase {
    Completed,
    Errored,
    Interrupted,
}

impl ExitCase {
    pub fn from_cause<E>(cause: &Cause<E>) -> Self {
        if cause.is_interrupt() {
            ExitCase::Interrupted
        } else {
            ExitCase::Errored
        }
    }

    pub fn from_result<T, E>(result: &Result<T, Cause<E>>) -> Self {
        match result {
            Ok(_) => ExitCase::Completed,
            Err(cause) => ExitCase::from_cause(cause),
        }
    }
}

/// Handle to a registered finalizer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FinalizerKey(u64);

type Finalizer = Box<dyn FnOnce(ExitCase) -> BoxFuture<'static, ()> + Send>;

/// A registered cleanup: a user finalizer, or a child scope to close
enum Entry {
    Run(Finalizer),
    Child(Scope),
}

type Entries = Vec<(FinalizerKey, Entry)>;

static NEXT_SCOPE_ID: AtomicU64 = AtomicU64::new(0);

struct ScopeState {
    next_key: u64,
    finalizers: Entries,
    closing: bool,
    parent: Option<(Weak<ScopeInner>, FinalizerKey)>,
}

struct ScopeInner {
    id: u64,
    state: Mutex<ScopeState>,
    closed: Promise<()>,
}

/// An ownership boundary for acquired resources
#[derive(Clone)]
pub struct Scope {
    inner: Arc<ScopeInner>,
}

#[derive(Clone)]
pub(crate) struct WeakScope(Weak<ScopeInner>);

impl WeakScope {
    pub(crate) fn upgrade(&self) -> Option<Scope> {
        self.0.upgrade().map(|inner| Scope { inner })
    }
}

impl Scope {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(ScopeInner {
                id: NEXT_SCOPE_ID.fetch_add(1, Ordering::Relaxed),
                state: Mutex::new(ScopeState {
                    next_key: 0,
                    finalizers: Vec::new(),
                    closing: false,
                    parent: None,
                }),
                closed: Promise::new(),
            }),
        }
    }

    pub fn id(&self) -> u64 {
        self.inner.id
    }

    fn lock(&self) -> MutexGuard<'_, ScopeState> {
        self.inner.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn downgrade(&self) -> WeakScope {
        WeakScope(Arc::downgrade(&self.inner))
    }

    /// Register a finalizer.
    ///
    /// Returns `None` when the scope is already closed; the finalizer is then
    /// run right away with [`ExitCase::Interrupted`].
    pub fn add_finalizer<F, Fut>(&self, finalizer: F) -> Option<FinalizerKey>
    where
        F: FnOnce(ExitCase) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let finalizer: Finalizer = Box::new(move |exit| finalizer(exit).boxed());
        self.register(Entry::Run(finalizer))
    }

    fn register(&self, entry: Entry) -> Option<FinalizerKey> {
        let mut state = self.lock();
        if state.closing {
            drop(state);
            log::debug!("scope {} already closed, running late finalizer", self.inner.id);
            spawn_entries(vec![(FinalizerKey(0), entry)], ExitCase::Interrupted);
            return None;
        }
        let key = FinalizerKey(state.next_key);
        state.next_key += 1;
        state.finalizers.push((key, entry));
        Some(key)
    }

    /// Remove a finalizer without running it
    pub fn forget(&self, key: FinalizerKey) -> bool {
        let mut state = self.lock();
        let before = state.finalizers.len();
        state.finalizers.retain(|(k, _)| *k != key);
        before != state.finalizers.len()
    }

    /// Run a single finalizer ahead of the scope closing
    pub async fn release(&self, key: FinalizerKey, exit: ExitCase) -> bool {
        let finalizer = {
            let mut state = self.lock();
            let position = state.finalizers.iter().position(|(k, _)| *k == key);
            position.map(|i| state.finalizers.remove(i).1)
        };
        match finalizer {
            Some(finalizer) => {
                run_entries(vec![(None, vec![(key, finalizer)])], exit).await;
                true
            }
            None => false,
        }
    }

    /// Create a child scope that closes no later than this one
    pub fn fork(&self) -> Scope {
        let child = Scope::new();
        if let Some(key) = self.register(Entry::Child(child.clone())) {
            child.lock().parent = Some((Arc::downgrade(&self.inner), key));
        }
        child
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closing
    }

    /// Close the scope, running every finalizer in reverse registration order.
    ///
    /// Concurrent callers all return once the finalizers have finished.
    /// Nested child scopes are closed from an explicit stack, so arbitrarily
    /// deep scope chains close in constant stack space.
    pub async fn close(&self, exit: ExitCase) {
        match self.begin_close() {
            Some(entries) => run_entries(vec![(Some(self.clone()), entries)], exit).await,
            None => self.inner.closed.wait().await,
        }
    }

    /// Mark the scope closing and detach it from its parent. `None` when
    /// someone else got there first.
    fn begin_close(&self) -> Option<Entries> {
        let (entries, parent) = {
            let mut state = self.lock();
            if state.closing {
                return None;
            }
            state.closing = true;
            (std::mem::take(&mut state.finalizers), state.parent.take())
        };
        if let Some((parent, key)) = parent {
            if let Some(parent) = parent.upgrade() {
                Scope { inner: parent }.forget(key);
            }
        }
        Some(entries)
    }
}

impl Default for Scope {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.lock();
        f.debug_struct("Scope")
            .field("id", &self.inner.id)
            .field("finalizers", &state.finalizers.len())
            .field("closing", &state.closing)
            .finish()
    }
}

impl Drop for ScopeInner {
    fn drop(&mut self) {
        let state = self.state.get_mut().unwrap_or_else(PoisonError::into_inner);
        if state.closing || state.finalizers.is_empty() {
            return;
        }
        state.closing = true;
        let finalizers = std::mem::take(&mut state.finalizers);
        log::debug!(
            "scope {} dropped while open, releasing {} finalizers",
            self.id,
            finalizers.len()
        );
        spawn_entries(finalizers, ExitCase::Interrupted);
    }
}

/// Run entries last to first. A child entry pushes the child's own entries
/// on top of the stack, and the child counts as closed once they are done.
async fn run_entries(mut frames: Vec<(Option<Scope>, Entries)>, exit: ExitCase) {
    while let Some((_, entries)) = frames.last_mut() {
        match entries.pop() {
            Some((_, Entry::Run(finalizer))) => {
                let outcome = AssertUnwindSafe(async move { finalizer(exit).await })
                    .catch_unwind()
                    .await;
                if let Err(panic) = outcome {
                    log::error!("finalizer panicked: {}", Defect::from_panic(panic).message());
                }
            }
            Some((_, Entry::Child(child))) => match child.begin_close() {
                Some(entries) => frames.push((Some(child), entries)),
                None => child.inner.closed.wait().await,
            },
            None => {
                if let Some((Some(scope), _)) = frames.pop() {
                    log::trace!("closed scope {} ({:?})", scope.inner.id, exit);
                    scope.inner.closed.complete(());
                }
            }
        }
    }
}

fn spawn_entries(entries: Entries, exit: ExitCase) {
    let work = run_entries(vec![(None, entries)], exit);
    match tokio::runtime::Handle::try_current() {
        Ok(handle) => {
            handle.spawn(work);
        }
        Err(_) => futures::executor::block_on(work),
    }
}
