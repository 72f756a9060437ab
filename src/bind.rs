//! Sequential composition, finalization and error recovery
//!
//! `flat_map` evaluates every inner stream to completion in its own child
//! scope before the next outer element is requested, so inner resources are
//! released in strict LIFO order relative to outer ones.

use async_stream::stream;
use futures_util::stream::StreamExt;
use std::future::Future;
use std::sync::Arc;

use crate::chunk::Chunk;
use crate::error::{catch_defect, Cause};
use crate::pull::Take;
use crate::rs2::{halt, scoped, RStream};
use crate::scope::ExitCase;

impl<E, A> RStream<E, A>
where
    E: Clone + Send + Sync + 'static,
    A: Send + 'static,
{
    /// Replace every element with the stream `f` builds from it.
    ///
    /// `f` is only called for an element once the inner stream of the
    /// previous one has been drained and its scope closed. Inner streams that
    /// are themselves binds run on the same frame stack as this one, so
    /// recursion through `flat_map` does not grow the call stack.
    pub fn flat_map<B, F>(self, f: F) -> RStream<E, B>
    where
        B: Send + 'static,
        F: Fn(A) -> RStream<E, B> + Send + Sync + 'static,
    {
        let f = Arc::new(f);
        RStream::from_bind(move |scope| {
            let f = Arc::clone(&f);
            let mut outer = self.open(scope);
            stream! {
                'outer: loop {
                    let chunk = match outer.pull().await {
                        Take::Chunk(chunk) => chunk,
                        Take::End => break,
                        Take::Fail(cause) => {
                            yield Err(cause);
                            break;
                        }
                    };
                    for a in chunk {
                        match catch_defect(|| f(a)) {
                            Ok(next) => yield Ok(next),
                            Err(defect) => {
                                yield Err(Cause::Die(defect));
                                break 'outer;
                            }
                        }
                    }
                }
            }
            .boxed()
        })
    }

    // ================================
    // Finalization
    // ================================

    /// Run `finalizer` once the stream is done, however it ends
    pub fn ensuring<F, Fut>(self, finalizer: F) -> RStream<E, A>
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.ensuring_with(move |_| finalizer())
    }

    /// Like [`ensuring`](Self::ensuring), telling the finalizer how the stream ended
    pub fn ensuring_with<F, Fut>(self, finalizer: F) -> RStream<E, A>
    where
        F: Fn(ExitCase) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let finalizer = Arc::new(finalizer);
        RStream::from_process(move |scope| {
            let finalizer = Arc::clone(&finalizer);
            let child = scope.fork();
            child.add_finalizer(move |exit| finalizer(exit));
            scoped(child.clone(), self.open_stream(&child))
        })
    }

    /// Run `f` only if the stream is interrupted
    pub fn on_interrupt<F, Fut>(self, f: F) -> RStream<E, A>
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.ensuring_with(move |exit| {
            let cleanup = (exit == ExitCase::Interrupted).then(|| f());
            async move {
                if let Some(cleanup) = cleanup {
                    cleanup.await;
                }
            }
        })
    }

    // ================================
    // Error handling
    // ================================

    pub fn map_error<E2, F>(self, f: F) -> RStream<E2, A>
    where
        E2: Clone + Send + Sync + 'static,
        F: Fn(E) -> E2 + Send + Sync + 'static,
    {
        let f = Arc::new(f);
        self.map_error_cause(move |cause| cause.map(|e| f(e)))
    }

    pub fn map_error_cause<E2, F>(self, f: F) -> RStream<E2, A>
    where
        E2: Clone + Send + Sync + 'static,
        F: Fn(Cause<E>) -> Cause<E2> + Send + Sync + 'static,
    {
        let f = Arc::new(f);
        RStream::from_process(move |scope| {
            let f = Arc::clone(&f);
            self.open_stream(scope)
                .map(move |item| item.map_err(|cause| f(cause)))
                .boxed()
        })
    }

    /// Switch to the stream built by `handler` on failure or defect.
    ///
    /// Interruption is never intercepted. The failed stream's scope is
    /// closed before the handler's stream starts.
    pub fn catch_all_cause<E2, F>(self, handler: F) -> RStream<E2, A>
    where
        E2: Clone + Send + Sync + 'static,
        F: Fn(Cause<E>) -> RStream<E2, A> + Send + Sync + 'static,
    {
        let handler = Arc::new(handler);
        RStream::from_process(move |scope| {
            let handler = Arc::clone(&handler);
            let scope = scope.clone();
            let child = scope.fork();
            let mut inner = self.open_stream(&child);
            stream! {
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
                    None => child.close(ExitCase::Completed).await,
                    Some(Cause::Interrupt) => {
                        child.close(ExitCase::Interrupted).await;
                        yield Err(Cause::Interrupt);
                    }
                    Some(cause) => {
                        child.close(ExitCase::Errored).await;
                        log::debug!("recovering from stream failure");
                        match catch_defect(|| handler(cause)) {
                            Ok(recovery) => {
                                let recovery_scope = scope.fork();
                                let mut recovered = scoped(
                                    recovery_scope.clone(),
                                    recovery.open_stream(&recovery_scope),
                                );
                                while let Some(item) = recovered.next().await {
                                    let failed = item.is_err();
                                    yield item;
                                    if failed {
                                        break;
                                    }
                                }
                            }
                            Err(defect) => yield Err(Cause::Die(defect)),
                        }
                    }
                }
            }
            .boxed()
        })
    }

    /// Recover from expected failures only; defects and interruption pass through
    pub fn catch_all<E2, F>(self, handler: F) -> RStream<E2, A>
    where
        E2: Clone + Send + Sync + 'static,
        F: Fn(E) -> RStream<E2, A> + Send + Sync + 'static,
    {
        self.catch_all_cause(move |cause| match cause {
            Cause::Fail(e) => handler(e),
            Cause::Die(defect) => halt(Cause::Die(defect)),
            Cause::Interrupt => halt(Cause::Interrupt),
        })
    }

    /// Continue with `that` if `self` fails
    pub fn or_else<E2>(self, that: RStream<E2, A>) -> RStream<E2, A>
    where
        E2: Clone + Send + Sync + 'static,
    {
        self.catch_all(move |_| that.clone())
    }

    /// Surface an expected failure as a final `Err` element and end normally
    pub fn either<E2>(self) -> RStream<E2, Result<A, E>>
    where
        E2: Clone + Send + Sync + 'static,
    {
        RStream::from_process(move |scope| {
            let mut inner = self.open_stream(scope);
            stream! {
                while let Some(item) = inner.next().await {
                    match item {
                        Ok(chunk) => yield Ok(chunk.map(Ok)),
                        Err(Cause::Fail(e)) => {
                            yield Ok(Chunk::single(Err(e)));
                            break;
                        }
                        Err(Cause::Die(defect)) => {
                            yield Err(Cause::Die(defect));
                            break;
                        }
                        Err(Cause::Interrupt) => {
                            yield Err(Cause::Interrupt);
                            break;
                        }
                    }
                }
            }
            .boxed()
        })
    }
}

impl<E, A> RStream<E, RStream<E, A>>
where
    E: Clone + Send + Sync + 'static,
    A: Send + 'static,
{
    pub fn flatten(self) -> RStream<E, A> {
        self.flat_map(|inner| inner)
    }
}

impl<E, A> RStream<E, Result<A, E>>
where
    E: Clone + Send + Sync + 'static,
    A: Send + 'static,
{
    /// Turn the first `Err` element into a stream failure
    pub fn absolve(self) -> RStream<E, A> {
        self.via(|s| {
            stream! {
                let mut s = s;
                'outer: while let Some(item) = s.next().await {
                    match item {
                        Ok(chunk) => {
                            let mut out = Vec::with_capacity(chunk.len());
                            for element in chunk {
                                match element {
                                    Ok(a) => out.push(a),
                                    Err(e) => {
                                        yield Ok(Chunk::from(out));
                                        yield Err(Cause::Fail(e));
                                        break 'outer;
                                    }
                                }
                            }
                            yield Ok(Chunk::from(out));
                        }
                        Err(cause) => {
                            yield Err(cause);
                            break;
                        }
                    }
                }
            }
            .boxed()
        })
    }
}

#[cfg(test)]
mod tests {
    use crate::rs2::*;
    use std::sync::{Arc, Mutex};

    #[tokio::test]
    async fn flat_map_releases_inner_before_next_outer() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let l = Arc::clone(&log);
        let out = from_iter::<(), _>(vec![1, 2])
            .flat_map(move |x| {
                let l = Arc::clone(&l);
                emit(x).ensuring(move || {
                    let l = Arc::clone(&l);
                    async move { l.lock().unwrap().push(format!("release {}", x)) }
                })
            })
            .tap({
                let log = Arc::clone(&log);
                move |x| {
                    log.lock().unwrap().push(format!("use {}", x));
                    async { Ok(()) }
                }
            })
            .run_collect()
            .await
            .unwrap();
        assert_eq!(out, vec![1, 2]);
        assert_eq!(
            *log.lock().unwrap(),
            vec!["use 1", "release 1", "use 2", "release 2"]
        );
    }

    #[tokio::test]
    async fn catch_all_leaves_defects_alone() {
        let out = die::<&str, i32>("broken")
            .catch_all(|_| emit::<&str, i32>(0))
            .run_collect()
            .await;
        assert_eq!(out, Err(Cause::die("broken")));
    }

    #[tokio::test]
    async fn either_ends_after_failure() {
        let out = from_iter::<&str, _>(vec![1, 2])
            .concat(fail("stop"))
            .either::<()>()
            .run_collect()
            .await
            .unwrap();
        assert_eq!(out, vec![Ok(1), Ok(2), Err("stop")]);
    }
}
